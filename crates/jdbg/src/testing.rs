//! A scripted in-memory [`DebugTarget`] for unit tests.

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use jdbg_jdwp::JdwpError;

use crate::{
    error::{DebugError, DebugResult},
    target::{
        CodeLocation, DebugTarget, EventBatch, EventRequest, FieldRef, LoadedClass, ObjectId,
        ObjectRef, RequestKind, StepDepth, StopFrame, TargetEvent, ThreadId, Value,
        VisibleVariables,
    },
};

pub(crate) const MAIN_THREAD: ThreadId = 1;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    /// A breakpoint install, by the first line registered for its location.
    Install(u32),
    Disable(EventRequest),
    ArmStep(ThreadId, StepDepth),
    Resume,
    Terminate,
}

/// The calls a [`FakeTarget`] received. Clones share one log, so it can be
/// read after the target has been moved into a session.
#[derive(Debug, Clone, Default)]
pub(crate) struct CallLog(Rc<RefCell<Vec<Call>>>);

impl CallLog {
    fn push(&self, call: Call) {
        self.0.borrow_mut().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().clone()
    }
}

#[derive(Default)]
pub(crate) struct FakeTarget {
    batches: VecDeque<EventBatch>,
    code_lines: HashMap<u32, Vec<CodeLocation>>,
    /// First line registered for each code index, for the call log.
    index_lines: HashMap<u64, u32>,
    stop_locations: VecDeque<String>,
    variables: VisibleVariables,
    arrays: HashMap<ObjectId, Vec<Value>>,
    objects: HashMap<ObjectId, Vec<(FieldRef, Value)>>,
    output: Vec<String>,
    failing_lines: Vec<u32>,
    disconnect_on_resume: bool,
    broken_frames: bool,
    broken_variables: bool,
    next_request: i32,
    log: CallLog,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self {
            variables: Some(Vec::new()),
            ..Self::default()
        }
    }

    pub fn main_class() -> LoadedClass {
        LoadedClass {
            id: 1,
            name: "Main".to_string(),
        }
    }

    /// Make `line` resolvable to one location per entry in `code_indexes`.
    ///
    /// Lines given the same code index share one executable location.
    pub fn with_code_at(mut self, line: u32, code_indexes: &[u64]) -> Self {
        for &code_index in code_indexes {
            self.index_lines.entry(code_index).or_insert(line);
        }
        let locations = code_indexes
            .iter()
            .map(|&code_index| CodeLocation {
                class_id: 1,
                method_id: 1,
                code_index,
            })
            .collect();
        self.code_lines.insert(line, locations);
        self
    }

    pub fn with_batch(mut self, batch: EventBatch) -> Self {
        self.batches.push_back(batch);
        self
    }

    /// Location text reported by the next `stop_frame` calls, in order.
    pub fn with_stops(mut self, locations: &[&str]) -> Self {
        self.stop_locations
            .extend(locations.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_variables(mut self, variables: VisibleVariables) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_array(mut self, id: ObjectId, elements: Vec<Value>) -> Self {
        self.arrays.insert(id, elements);
        self
    }

    pub fn with_object(mut self, id: ObjectId, fields: Vec<(FieldRef, Value)>) -> Self {
        self.objects.insert(id, fields);
        self
    }

    pub fn with_output(mut self, lines: &[&str]) -> Self {
        self.output = lines.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Resolving `line` fails with a VM error.
    pub fn failing_at(mut self, line: u32) -> Self {
        self.failing_lines.push(line);
        self
    }

    pub fn disconnecting_on_resume(mut self) -> Self {
        self.disconnect_on_resume = true;
        self
    }

    /// Stopped threads report no frame.
    pub fn with_broken_frames(mut self) -> Self {
        self.broken_frames = true;
        self
    }

    /// Reading locals fails with a VM error.
    pub fn with_broken_variables(mut self) -> Self {
        self.broken_variables = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.calls()
    }

    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    fn next_request(&mut self, kind: RequestKind) -> EventRequest {
        self.next_request += 1;
        EventRequest {
            kind,
            id: self.next_request,
        }
    }
}

pub(crate) fn breakpoint_hit(id: i32) -> TargetEvent {
    TargetEvent::Breakpoint {
        request: EventRequest {
            kind: RequestKind::Breakpoint,
            id,
        },
        thread: MAIN_THREAD,
    }
}

pub(crate) fn step_done(id: i32) -> TargetEvent {
    TargetEvent::StepComplete {
        request: EventRequest {
            kind: RequestKind::Step,
            id,
        },
        thread: MAIN_THREAD,
    }
}

pub(crate) fn object(id: ObjectId, type_name: &str) -> ObjectRef {
    ObjectRef {
        id,
        type_name: type_name.to_string(),
    }
}

pub(crate) fn field(declaring_type: &str, name: &str) -> FieldRef {
    FieldRef {
        declaring_type: declaring_type.to_string(),
        name: name.to_string(),
    }
}

impl DebugTarget for FakeTarget {
    async fn next_batch(&mut self) -> DebugResult<Option<EventBatch>> {
        Ok(self.batches.pop_front())
    }

    async fn resolve_line(
        &mut self,
        _class: &LoadedClass,
        line: u32,
    ) -> DebugResult<Vec<CodeLocation>> {
        if self.failing_lines.contains(&line) {
            return Err(JdwpError::VmError(20).into());
        }
        Ok(self.code_lines.get(&line).cloned().unwrap_or_default())
    }

    async fn install_breakpoint(&mut self, location: &CodeLocation) -> DebugResult<EventRequest> {
        let line = self
            .index_lines
            .get(&location.code_index)
            .copied()
            .unwrap_or_default();
        self.log.push(Call::Install(line));
        Ok(self.next_request(RequestKind::Breakpoint))
    }

    async fn disable(&mut self, request: EventRequest) -> DebugResult<()> {
        self.log.push(Call::Disable(request));
        Ok(())
    }

    async fn arm_step(&mut self, thread: ThreadId, depth: StepDepth) -> DebugResult<EventRequest> {
        self.log.push(Call::ArmStep(thread, depth));
        Ok(self.next_request(RequestKind::Step))
    }

    async fn stop_frame(&mut self, thread: ThreadId) -> DebugResult<StopFrame> {
        if self.broken_frames {
            return Err(DebugError::NoFrame(thread));
        }
        Ok(StopFrame {
            thread,
            frame_id: 1,
            class_id: 1,
            method_id: 1,
            code_index: 0,
            location: self
                .stop_locations
                .pop_front()
                .unwrap_or_else(|| "Main:-1".to_string()),
        })
    }

    async fn visible_variables(&mut self, _frame: &StopFrame) -> DebugResult<VisibleVariables> {
        if self.broken_variables {
            return Err(JdwpError::VmError(35).into());
        }
        Ok(self.variables.clone())
    }

    async fn array_elements(&mut self, array: &ObjectRef) -> DebugResult<Vec<Value>> {
        Ok(self.arrays.get(&array.id).cloned().unwrap_or_default())
    }

    async fn object_fields(&mut self, object: &ObjectRef) -> DebugResult<Vec<(FieldRef, Value)>> {
        Ok(self.objects.get(&object.id).cloned().unwrap_or_default())
    }

    async fn resume(&mut self) -> DebugResult<()> {
        self.log.push(Call::Resume);
        if self.disconnect_on_resume {
            return Err(DebugError::Jdwp(JdwpError::ConnectionClosed));
        }
        Ok(())
    }

    async fn terminate(&mut self) -> DebugResult<()> {
        self.log.push(Call::Terminate);
        Ok(())
    }

    async fn captured_output(&mut self) -> DebugResult<Vec<String>> {
        Ok(self.output.clone())
    }
}
