//! [`DebugTarget`] over a JDWP connection.

use std::{collections::HashMap, time::Duration};

use jdbg_jdwp::wire::{
    types::{
        ERROR_ABSENT_INFORMATION, ERROR_NATIVE_METHOD, EVENT_KIND_BREAKPOINT,
        EVENT_KIND_CLASS_PREPARE, EVENT_KIND_SINGLE_STEP, STEP_DEPTH_INTO, STEP_DEPTH_OUT,
        STEP_DEPTH_OVER, STEP_SIZE_LINE, SUSPEND_POLICY_ALL, TYPE_TAG_CLASS,
    },
    EventModifier, EventSet, FieldId, JdwpClient, JdwpError, JdwpEvent, JdwpValue, LineTable,
    Location, MethodId, MethodInfo, ReferenceTypeId, VariableInfo,
};
use tokio::process::Child;

use crate::{
    error::{DebugError, DebugResult},
    launch::{self, LaunchError, LaunchSpec, OutputCapture},
    target::{
        CodeLocation, DebugTarget, EventBatch, EventRequest, FieldRef, LoadedClass, ObjectRef,
        RequestKind, StepDepth, StopFrame, TargetEvent, ThreadId, Value, VisibleVariables,
    },
};

/// How long to wait for the JVM process to exit once its output has closed.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct JdwpTarget {
    client: JdwpClient,
    output: OutputCapture,
    process: Option<Child>,
    signatures: HashMap<ReferenceTypeId, String>,
    methods: HashMap<ReferenceTypeId, Vec<MethodInfo>>,
    /// `None` for methods without line information.
    line_tables: HashMap<(ReferenceTypeId, MethodId), Option<LineTable>>,
    /// `None` for methods compiled without local variable information.
    variable_tables: HashMap<(ReferenceTypeId, MethodId), Option<Vec<VariableInfo>>>,
    fields: HashMap<ReferenceTypeId, Vec<(FieldRef, FieldId)>>,
    armed_step: Option<i32>,
}

impl JdwpTarget {
    /// Start the debuggee described by `spec` and attach to it.
    pub async fn launch(spec: &LaunchSpec) -> Result<Self, LaunchError> {
        let (client, debuggee) = launch::launch(spec).await?;
        Ok(Self::attach(client, &spec.main_class, debuggee.output, Some(debuggee.child)).await?)
    }

    /// Take over an attached connection to a VM that has not yet loaded `main_class`.
    ///
    /// Arms the class-prepare request that lets breakpoints be installed before
    /// any code of `main_class` runs.
    pub async fn attach(
        client: JdwpClient,
        main_class: &str,
        output: OutputCapture,
        process: Option<Child>,
    ) -> Result<Self, JdwpError> {
        let request_id = client
            .event_request_set(
                EVENT_KIND_CLASS_PREPARE,
                SUSPEND_POLICY_ALL,
                vec![EventModifier::ClassMatch {
                    pattern: main_class.to_string(),
                }],
            )
            .await?;
        tracing::debug!(target: "jdbg.target", main_class, request_id, "armed class prepare request");

        Ok(Self {
            client,
            output,
            process,
            signatures: HashMap::new(),
            methods: HashMap::new(),
            line_tables: HashMap::new(),
            variable_tables: HashMap::new(),
            fields: HashMap::new(),
            armed_step: None,
        })
    }

    fn translate(&self, set: EventSet) -> EventBatch {
        set.events
            .into_iter()
            .map(|event| match event {
                JdwpEvent::VmStart { .. } => TargetEvent::VmStart,
                JdwpEvent::ClassPrepare {
                    type_id, signature, ..
                } => TargetEvent::ClassPrepare(LoadedClass {
                    id: type_id,
                    name: signature_to_type_name(&signature),
                }),
                JdwpEvent::Breakpoint {
                    request_id, thread, ..
                } => TargetEvent::Breakpoint {
                    request: EventRequest {
                        kind: RequestKind::Breakpoint,
                        id: request_id,
                    },
                    thread,
                },
                JdwpEvent::SingleStep {
                    request_id, thread, ..
                } => TargetEvent::StepComplete {
                    request: EventRequest {
                        kind: RequestKind::Step,
                        id: request_id,
                    },
                    thread,
                },
                JdwpEvent::VmDeath => TargetEvent::VmDeath,
                JdwpEvent::VmDisconnect => TargetEvent::Disconnect,
            })
            .collect()
    }

    async fn type_name(&mut self, type_id: ReferenceTypeId) -> DebugResult<String> {
        if let Some(signature) = self.signatures.get(&type_id) {
            return Ok(signature_to_type_name(signature));
        }
        let signature = self.client.reference_type_signature(type_id).await?;
        let name = signature_to_type_name(&signature);
        self.signatures.insert(type_id, signature);
        Ok(name)
    }

    async fn methods(&mut self, class_id: ReferenceTypeId) -> DebugResult<Vec<MethodInfo>> {
        if let Some(methods) = self.methods.get(&class_id) {
            return Ok(methods.clone());
        }
        let methods = self.client.reference_type_methods(class_id).await?;
        self.methods.insert(class_id, methods.clone());
        Ok(methods)
    }

    async fn line_table(
        &mut self,
        class_id: ReferenceTypeId,
        method_id: MethodId,
    ) -> DebugResult<Option<LineTable>> {
        if let Some(table) = self.line_tables.get(&(class_id, method_id)) {
            return Ok(table.clone());
        }
        let table = match self.client.method_line_table(class_id, method_id).await {
            Ok(table) => Some(table),
            Err(JdwpError::VmError(ERROR_ABSENT_INFORMATION | ERROR_NATIVE_METHOD)) => None,
            Err(err) => return Err(err.into()),
        };
        self.line_tables
            .insert((class_id, method_id), table.clone());
        Ok(table)
    }

    async fn variable_table(
        &mut self,
        class_id: ReferenceTypeId,
        method_id: MethodId,
    ) -> DebugResult<Option<Vec<VariableInfo>>> {
        if let Some(table) = self.variable_tables.get(&(class_id, method_id)) {
            return Ok(table.clone());
        }
        let table = match self.client.method_variable_table(class_id, method_id).await {
            Ok((_arg_count, vars)) => Some(vars),
            Err(JdwpError::VmError(ERROR_ABSENT_INFORMATION | ERROR_NATIVE_METHOD)) => None,
            Err(err) => return Err(err.into()),
        };
        self.variable_tables
            .insert((class_id, method_id), table.clone());
        Ok(table)
    }

    /// Every field declared by `type_id` and its superclasses, static ones
    /// included, most-derived first.
    async fn all_fields(
        &mut self,
        type_id: ReferenceTypeId,
    ) -> DebugResult<Vec<(FieldRef, FieldId)>> {
        if let Some(fields) = self.fields.get(&type_id) {
            return Ok(fields.clone());
        }

        let mut fields = Vec::new();
        let mut current = Some(type_id);
        while let Some(class_id) = current {
            let declaring_type = self.type_name(class_id).await?;
            for field in self.client.reference_type_fields(class_id).await? {
                fields.push((
                    FieldRef {
                        declaring_type: declaring_type.clone(),
                        name: field.name,
                    },
                    field.field_id,
                ));
            }
            current = self.client.class_type_superclass(class_id).await?;
        }

        self.fields.insert(type_id, fields.clone());
        Ok(fields)
    }

    /// Turn a wire value into a [`Value`], reading strings and array lengths.
    async fn lift(&mut self, value: JdwpValue) -> DebugResult<Value> {
        Ok(match value {
            JdwpValue::Boolean(v) => Value::Boolean(v),
            JdwpValue::Byte(v) => Value::Byte(v),
            JdwpValue::Char(v) => Value::Char(v),
            JdwpValue::Short(v) => Value::Short(v),
            JdwpValue::Int(v) => Value::Int(v),
            JdwpValue::Long(v) => Value::Long(v),
            JdwpValue::Float(v) => Value::Float(v),
            JdwpValue::Double(v) => Value::Double(v),
            JdwpValue::Void => Value::Void,
            JdwpValue::Object { id: 0, .. } => Value::Null,
            JdwpValue::Object { tag: b's', id } => {
                Value::Str(self.client.string_reference_value(id).await?)
            }
            JdwpValue::Object { tag, id } => {
                let type_id = self.client.object_reference_reference_type(id).await?;
                let object = ObjectRef {
                    id,
                    type_name: self.type_name(type_id).await?,
                };
                if tag == b'[' {
                    let length = self.client.array_reference_length(id).await?;
                    Value::Array {
                        array: object,
                        length: usize::try_from(length).unwrap_or(0),
                    }
                } else {
                    Value::Object(object)
                }
            }
        })
    }

    async fn lift_all(&mut self, values: Vec<JdwpValue>) -> DebugResult<Vec<Value>> {
        let mut lifted = Vec::with_capacity(values.len());
        for value in values {
            lifted.push(self.lift(value).await?);
        }
        Ok(lifted)
    }
}

impl DebugTarget for JdwpTarget {
    async fn next_batch(&mut self) -> DebugResult<Option<EventBatch>> {
        Ok(self
            .client
            .next_event_set()
            .await
            .map(|set| self.translate(set)))
    }

    async fn resolve_line(
        &mut self,
        class: &LoadedClass,
        line: u32,
    ) -> DebugResult<Vec<CodeLocation>> {
        let Ok(wanted) = i32::try_from(line) else {
            return Ok(Vec::new());
        };

        let mut locations = Vec::new();
        for method in self.methods(class.id).await? {
            let Some(table) = self.line_table(class.id, method.method_id).await? else {
                continue;
            };
            locations.extend(
                table
                    .lines
                    .iter()
                    .filter(|entry| entry.line == wanted)
                    .map(|entry| CodeLocation {
                        class_id: class.id,
                        method_id: method.method_id,
                        code_index: entry.code_index,
                    }),
            );
        }
        Ok(locations)
    }

    async fn install_breakpoint(&mut self, location: &CodeLocation) -> DebugResult<EventRequest> {
        let id = self
            .client
            .event_request_set(
                EVENT_KIND_BREAKPOINT,
                SUSPEND_POLICY_ALL,
                vec![EventModifier::LocationOnly {
                    location: Location {
                        type_tag: TYPE_TAG_CLASS,
                        class_id: location.class_id,
                        method_id: location.method_id,
                        index: location.code_index,
                    },
                }],
            )
            .await?;
        Ok(EventRequest {
            kind: RequestKind::Breakpoint,
            id,
        })
    }

    async fn disable(&mut self, request: EventRequest) -> DebugResult<()> {
        let kind = match request.kind {
            RequestKind::Breakpoint => EVENT_KIND_BREAKPOINT,
            RequestKind::Step => {
                if self.armed_step == Some(request.id) {
                    self.armed_step = None;
                }
                EVENT_KIND_SINGLE_STEP
            }
        };
        self.client.event_request_clear(kind, request.id).await?;
        Ok(())
    }

    async fn arm_step(&mut self, thread: ThreadId, depth: StepDepth) -> DebugResult<EventRequest> {
        // A thread may carry only one step request at a time.
        if let Some(previous) = self.armed_step.take() {
            self.client
                .event_request_clear(EVENT_KIND_SINGLE_STEP, previous)
                .await?;
        }

        let depth_code = match depth {
            StepDepth::Into => STEP_DEPTH_INTO,
            StepDepth::Over => STEP_DEPTH_OVER,
            StepDepth::Out => STEP_DEPTH_OUT,
        };
        let id = self
            .client
            .event_request_set(
                EVENT_KIND_SINGLE_STEP,
                SUSPEND_POLICY_ALL,
                vec![EventModifier::Step {
                    thread,
                    size: STEP_SIZE_LINE,
                    depth: depth_code,
                }],
            )
            .await?;
        self.armed_step = Some(id);
        tracing::debug!(target: "jdbg.target", thread, %depth, request_id = id, "armed step request");
        Ok(EventRequest {
            kind: RequestKind::Step,
            id,
        })
    }

    async fn stop_frame(&mut self, thread: ThreadId) -> DebugResult<StopFrame> {
        let frame = self
            .client
            .frames(thread, 0, 1)
            .await?
            .into_iter()
            .next()
            .ok_or(DebugError::NoFrame(thread))?;
        let location = frame.location;

        let type_name = self.type_name(location.class_id).await?;
        let line = self
            .line_table(location.class_id, location.method_id)
            .await?
            .and_then(|table| table.line_for_index(location.index))
            .unwrap_or(-1);

        Ok(StopFrame {
            thread,
            frame_id: frame.frame_id,
            class_id: location.class_id,
            method_id: location.method_id,
            code_index: location.index,
            location: format!("{type_name}:{line}"),
        })
    }

    async fn visible_variables(&mut self, frame: &StopFrame) -> DebugResult<VisibleVariables> {
        let Some(table) = self.variable_table(frame.class_id, frame.method_id).await? else {
            return Ok(None);
        };
        let live: Vec<VariableInfo> = table
            .into_iter()
            .filter(|var| var.is_live_at(frame.code_index))
            .collect();
        if live.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let slots: Vec<(u32, String)> = live
            .iter()
            .map(|var| (var.slot, var.signature.clone()))
            .collect();
        let values = self
            .client
            .stack_frame_get_values(frame.thread, frame.frame_id, &slots)
            .await?;
        let values = self.lift_all(values).await?;

        Ok(Some(
            live.into_iter()
                .map(|var| var.name)
                .zip(values)
                .collect(),
        ))
    }

    async fn array_elements(&mut self, array: &ObjectRef) -> DebugResult<Vec<Value>> {
        let length = self.client.array_reference_length(array.id).await?;
        if length <= 0 {
            return Ok(Vec::new());
        }
        let values = self
            .client
            .array_reference_get_values(array.id, 0, length)
            .await?;
        self.lift_all(values).await
    }

    async fn object_fields(&mut self, object: &ObjectRef) -> DebugResult<Vec<(FieldRef, Value)>> {
        let type_id = self.client.object_reference_reference_type(object.id).await?;
        let fields = self.all_fields(type_id).await?;
        if fields.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<FieldId> = fields.iter().map(|(_, id)| *id).collect();
        let values = self
            .client
            .object_reference_get_values(object.id, &ids)
            .await?;
        let values = self.lift_all(values).await?;
        Ok(fields
            .into_iter()
            .map(|(field, _)| field)
            .zip(values)
            .collect())
    }

    async fn resume(&mut self) -> DebugResult<()> {
        self.client.vm_resume().await?;
        Ok(())
    }

    async fn terminate(&mut self) -> DebugResult<()> {
        self.client.vm_exit(1).await?;
        Ok(())
    }

    async fn captured_output(&mut self) -> DebugResult<Vec<String>> {
        let lines = self.output.collect().await;
        if let Some(mut child) = self.process.take() {
            match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(target: "jdbg.target", %status, "debuggee exited");
                }
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => {
                    tracing::warn!(target: "jdbg.target", "debuggee did not exit; killing it");
                    child.kill().await?;
                }
            }
        }
        Ok(lines)
    }
}

impl Drop for JdwpTarget {
    fn drop(&mut self) {
        self.client.shutdown();
    }
}

/// Java type name for a JVM signature, e.g. `[Ljava/lang/String;` becomes `java.lang.String[]`.
pub(crate) fn signature_to_type_name(signature: &str) -> String {
    let element = signature.trim_start_matches('[');
    let dims = signature.len() - element.len();

    let mut name = match element.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
        Some(class) => class.replace('/', "."),
        None => match element {
            "Z" => "boolean",
            "B" => "byte",
            "C" => "char",
            "S" => "short",
            "I" => "int",
            "J" => "long",
            "F" => "float",
            "D" => "double",
            "V" => "void",
            _ => "<unknown>",
        }
        .to_string(),
    };
    name.push_str(&"[]".repeat(dims));
    name
}
