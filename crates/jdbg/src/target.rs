//! The execution facility the debugger drives.
//!
//! [`DebugTarget`] is the seam between the session logic and the JVM. The
//! production implementation is [`crate::jdwp_target::JdwpTarget`]; unit tests
//! use a scripted in-memory target.

use std::fmt;

use crate::error::DebugResult;

pub type ObjectId = u64;
pub type ThreadId = u64;

/// A loaded class the debugger can resolve lines in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedClass {
    pub id: u64,
    /// Binary name, e.g. `org.ssw.Debuggee`.
    pub name: String,
}

/// An executable position inside a loaded class.
///
/// Two source lines may share a location; equality is by position only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeLocation {
    pub class_id: u64,
    pub method_id: u64,
    pub code_index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Breakpoint,
    Step,
}

/// Handle of an event request registered with the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventRequest {
    pub kind: RequestKind,
    pub id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDepth {
    Over,
    Into,
    Out,
}

impl fmt::Display for StepDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StepDepth::Over => "over",
            StepDepth::Into => "into",
            StepDepth::Out => "out",
        })
    }
}

/// One event reported by the target. Events arrive grouped in batches.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetEvent {
    VmStart,
    ClassPrepare(LoadedClass),
    Breakpoint {
        request: EventRequest,
        thread: ThreadId,
    },
    StepComplete {
        request: EventRequest,
        thread: ThreadId,
    },
    VmDeath,
    /// The connection is gone. Always the last event.
    Disconnect,
}

/// Everything the target reported together; the VM stays suspended until the
/// batch is resumed.
pub type EventBatch = Vec<TargetEvent>;

/// A reference to a heap object, carrying what its summary needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub id: ObjectId,
    /// Java type name, e.g. `java.util.ArrayList` or `int[]`.
    pub type_name: String,
}

/// A live value as read from the target.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Void,
    Null,
    /// Strings are read eagerly and behave as scalars.
    Str(String),
    Array { array: ObjectRef, length: usize },
    Object(ObjectRef),
}

impl Value {
    pub fn is_composite(&self) -> bool {
        matches!(self, Value::Array { .. } | Value::Object(_))
    }
}

/// A field as shown in an object expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    /// Java name of the type that declares the field.
    pub declaring_type: String,
    pub name: String,
}

/// The top frame of a suspended thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopFrame {
    pub thread: ThreadId,
    pub frame_id: u64,
    pub class_id: u64,
    pub method_id: u64,
    pub code_index: u64,
    /// `Type:line`, with `-1` when the line is unknown.
    pub location: String,
}

/// Local variables visible in a frame. `None` when the class carries no
/// local variable information.
pub type VisibleVariables = Option<Vec<(String, Value)>>;

/// The execution facility behind a debugging session.
///
/// Implementations are driven by one task; `&mut self` everywhere keeps them
/// free of interior locking.
#[allow(async_fn_in_trait)]
pub trait DebugTarget {
    /// The next batch of events. After [`TargetEvent::Disconnect`] has been
    /// delivered this returns `Ok(None)`. An error or a `None` without a
    /// preceding disconnect means the connection failed.
    async fn next_batch(&mut self) -> DebugResult<Option<EventBatch>>;

    /// Executable locations whose line is exactly `line`, in method order.
    async fn resolve_line(
        &mut self,
        class: &LoadedClass,
        line: u32,
    ) -> DebugResult<Vec<CodeLocation>>;

    /// Install and enable a breakpoint request at `location`.
    async fn install_breakpoint(&mut self, location: &CodeLocation) -> DebugResult<EventRequest>;

    /// Disable (and discard) a request.
    async fn disable(&mut self, request: EventRequest) -> DebugResult<()>;

    /// Arm a line step on `thread`.
    async fn arm_step(&mut self, thread: ThreadId, depth: StepDepth) -> DebugResult<EventRequest>;

    /// The top frame of a suspended thread.
    async fn stop_frame(&mut self, thread: ThreadId) -> DebugResult<StopFrame>;

    async fn visible_variables(&mut self, frame: &StopFrame) -> DebugResult<VisibleVariables>;

    async fn array_elements(&mut self, array: &ObjectRef) -> DebugResult<Vec<Value>>;

    /// Fields of the runtime type and all superclasses, static ones included,
    /// most-derived first.
    async fn object_fields(&mut self, object: &ObjectRef) -> DebugResult<Vec<(FieldRef, Value)>>;

    /// Resume every thread.
    async fn resume(&mut self) -> DebugResult<()>;

    /// Ask the debuggee to exit.
    async fn terminate(&mut self) -> DebugResult<()>;

    /// Everything the debuggee wrote to standard output, in order.
    ///
    /// Waits for the debuggee to close its output.
    async fn captured_output(&mut self) -> DebugResult<Vec<String>>;
}
