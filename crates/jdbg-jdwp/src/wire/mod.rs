//! Wire-level JDWP implementation.
//!
//! This module speaks the actual JDWP binary protocol over TCP. It is
//! async (`tokio`) and cancellation-aware.

mod client;
mod codec;
mod poison;
pub mod types;

pub use client::{EventModifier, JdwpClient, JdwpClientConfig};
pub use codec::class_name_to_signature;
pub use types::{
    EventSet, FieldId, FieldInfo, FrameId, FrameInfo, JdwpError, JdwpEvent,
    JdwpIdSizes, JdwpValue, LineTable, LineTableEntry, Location, MethodId, MethodInfo, ObjectId,
    ReferenceTypeId, Result, ThreadId, VariableInfo,
};

// The mock server is only needed for tests and downstream integration suites. It is
// compiled for this crate's own unit tests and behind `wire-test-support` otherwise.
#[cfg(any(test, feature = "wire-test-support"))]
pub mod mock;
