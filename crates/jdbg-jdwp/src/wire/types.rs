use std::io;

use thiserror::Error;

pub type ObjectId = u64;
pub type ThreadId = ObjectId;
pub type ReferenceTypeId = u64;
pub type MethodId = u64;
pub type FieldId = u64;
pub type FrameId = u64;

pub type Result<T> = std::result::Result<T, JdwpError>;

#[derive(Debug, Error)]
pub enum JdwpError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("VM returned error code {0}")]
    VmError(u16),
    #[error("timed out waiting for the VM")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
    #[error("connection to the VM closed")]
    ConnectionClosed,
}

impl JdwpError {
    /// Whether the failure means the VM is gone rather than that one command was rejected.
    pub fn is_disconnect(&self) -> bool {
        match self {
            JdwpError::ConnectionClosed | JdwpError::Cancelled => true,
            JdwpError::VmError(code) => *code == ERROR_VM_DEAD,
            JdwpError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            JdwpError::Protocol(_) | JdwpError::Timeout => false,
        }
    }
}

// JDWP error codes (subset).
pub const ERROR_INVALID_OBJECT: u16 = 20;
pub const ERROR_ABSENT_INFORMATION: u16 = 101;
pub const ERROR_VM_DEAD: u16 = 112;
pub const ERROR_NATIVE_METHOD: u16 = 511;

// Event kinds.
pub const EVENT_KIND_SINGLE_STEP: u8 = 1;
pub const EVENT_KIND_BREAKPOINT: u8 = 2;
pub const EVENT_KIND_CLASS_PREPARE: u8 = 8;
pub const EVENT_KIND_VM_START: u8 = 90;
pub const EVENT_KIND_VM_DEATH: u8 = 99;

// Event request modifier kinds.
pub const EVENT_MODIFIER_KIND_THREAD_ONLY: u8 = 3;
pub const EVENT_MODIFIER_KIND_CLASS_MATCH: u8 = 5;
pub const EVENT_MODIFIER_KIND_LOCATION_ONLY: u8 = 7;
pub const EVENT_MODIFIER_KIND_STEP: u8 = 10;

pub const SUSPEND_POLICY_NONE: u8 = 0;
pub const SUSPEND_POLICY_ALL: u8 = 2;

pub const STEP_SIZE_LINE: u32 = 1;
pub const STEP_DEPTH_INTO: u32 = 0;
pub const STEP_DEPTH_OVER: u32 = 1;
pub const STEP_DEPTH_OUT: u32 = 2;

pub const TYPE_TAG_CLASS: u8 = 1;
pub const TYPE_TAG_ARRAY: u8 = 3;

pub const FIELD_MODIFIER_STATIC: u32 = 0x0008;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JdwpIdSizes {
    pub field_id: usize,
    pub method_id: usize,
    pub object_id: usize,
    pub reference_type_id: usize,
    pub frame_id: usize,
}

impl Default for JdwpIdSizes {
    fn default() -> Self {
        // HotSpot on 64-bit platforms uses 8-byte ids everywhere.
        Self {
            field_id: 8,
            method_id: 8,
            object_id: 8,
            reference_type_id: 8,
            frame_id: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub type_tag: u8,
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JdwpValue {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Any reference value; `tag` is the JDWP tag (`L`, `[`, `s`, `t`, ...).
    Object {
        tag: u8,
        id: ObjectId,
    },
    Void,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub method_id: MethodId,
    pub name: String,
    pub signature: String,
    pub mod_bits: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub field_id: FieldId,
    pub name: String,
    pub signature: String,
    pub mod_bits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTableEntry {
    pub code_index: u64,
    pub line: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineTable {
    pub start: u64,
    pub end: u64,
    pub lines: Vec<LineTableEntry>,
}

impl LineTable {
    /// The source line for `index`: the entry with the greatest code index not after it.
    pub fn line_for_index(&self, index: u64) -> Option<i32> {
        self.lines
            .iter()
            .filter(|entry| entry.code_index <= index)
            .max_by_key(|entry| entry.code_index)
            .map(|entry| entry.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableInfo {
    pub code_index: u64,
    pub name: String,
    pub signature: String,
    pub length: u32,
    pub slot: u32,
}

impl VariableInfo {
    pub fn is_live_at(&self, index: u64) -> bool {
        index >= self.code_index && index < self.code_index + u64::from(self.length)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_id: FrameId,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JdwpEvent {
    VmStart {
        request_id: i32,
        thread: ThreadId,
    },
    SingleStep {
        request_id: i32,
        thread: ThreadId,
        location: Location,
    },
    Breakpoint {
        request_id: i32,
        thread: ThreadId,
        location: Location,
    },
    ClassPrepare {
        request_id: i32,
        thread: ThreadId,
        ref_type_tag: u8,
        type_id: ReferenceTypeId,
        signature: String,
        status: u32,
    },
    VmDeath,
    /// Synthesized by the client when the VM closes the connection.
    VmDisconnect,
}

/// One composite event packet: every event the VM reported together, in wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSet {
    pub suspend_policy: u8,
    pub events: Vec<JdwpEvent>,
}

impl EventSet {
    pub(crate) fn disconnect() -> Self {
        Self {
            suspend_policy: SUSPEND_POLICY_NONE,
            events: vec![JdwpEvent::VmDisconnect],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_for_index_picks_closest_preceding_entry() {
        let table = LineTable {
            start: 0,
            end: 40,
            lines: vec![
                LineTableEntry { code_index: 0, line: 5 },
                LineTableEntry { code_index: 8, line: 6 },
                LineTableEntry { code_index: 20, line: 9 },
            ],
        };
        assert_eq!(table.line_for_index(0), Some(5));
        assert_eq!(table.line_for_index(12), Some(6));
        assert_eq!(table.line_for_index(39), Some(9));
    }

    #[test]
    fn variable_liveness_is_half_open() {
        let var = VariableInfo {
            code_index: 4,
            name: "x".to_string(),
            signature: "I".to_string(),
            length: 6,
            slot: 1,
        };
        assert!(!var.is_live_at(3));
        assert!(var.is_live_at(4));
        assert!(var.is_live_at(9));
        assert!(!var.is_live_at(10));
    }

    #[test]
    fn vm_dead_is_a_disconnect() {
        assert!(JdwpError::VmError(ERROR_VM_DEAD).is_disconnect());
        assert!(JdwpError::ConnectionClosed.is_disconnect());
        assert!(!JdwpError::VmError(ERROR_ABSENT_INFORMATION).is_disconnect());
        assert!(!JdwpError::Timeout.is_disconnect());
    }
}
