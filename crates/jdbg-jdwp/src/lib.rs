//! Java Debug Wire Protocol (JDWP) client for jdbg.
//!
//! The `jdbg` crate drives a suspended JVM through this client: it arms
//! class-prepare, breakpoint and single-step requests, reads stack frames and
//! values, and receives the VM's composite event packets as ordered
//! [`wire::EventSet`]s.
//!
//! Only the subset of JDWP needed for line breakpoints, stepping and value
//! inspection is implemented.

pub mod wire;

/// Size of every JDWP packet header (length, id, flags, command set/command or error code).
pub const JDWP_HEADER_LEN: usize = 11;

pub use wire::{JdwpClient, JdwpClientConfig, JdwpError};
