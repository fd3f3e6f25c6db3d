//! jdbg: an interactive, line-oriented debugger for Java programs.
//!
//! The debuggee is started under the JDWP agent and driven over
//! [`jdbg_jdwp`]. The operator sets line breakpoints in the main class, steps,
//! and prints local variables, including recursive expansion of arrays and
//! objects.

pub mod breakpoints;
pub mod command;
pub mod config;
pub mod error;
pub mod format;
pub mod inspect;
pub mod jdwp_target;
pub mod launch;
pub mod logging;
pub mod repl;
pub mod session;
pub mod target;

#[cfg(test)]
mod testing;

pub use crate::error::{DebugError, DebugResult};
pub use crate::jdwp_target::JdwpTarget;
pub use crate::repl::Operator;
pub use crate::session::Session;
