use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicI32, AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{tcp::OwnedReadHalf, TcpListener},
};
use tokio_util::sync::CancellationToken;

use super::{
    client::EventModifier,
    codec::{
        class_name_to_signature, encode_command, encode_reply, JdwpReader, JdwpWriter,
        EVENT_COMMAND_SET, EVENT_COMPOSITE_COMMAND, HANDSHAKE, HEADER_LEN,
    },
    poison::lock,
    types::{
        FieldId, JdwpIdSizes, JdwpValue, LineTableEntry, Location, MethodId, ObjectId,
        ReferenceTypeId, ThreadId, VariableInfo, ERROR_ABSENT_INFORMATION, ERROR_INVALID_OBJECT,
        ERROR_NATIVE_METHOD, EVENT_KIND_BREAKPOINT, EVENT_KIND_CLASS_PREPARE,
        EVENT_KIND_SINGLE_STEP, EVENT_KIND_VM_DEATH, EVENT_KIND_VM_START,
        EVENT_MODIFIER_KIND_CLASS_MATCH, EVENT_MODIFIER_KIND_LOCATION_ONLY,
        EVENT_MODIFIER_KIND_STEP, EVENT_MODIFIER_KIND_THREAD_ONLY, FIELD_MODIFIER_STATIC,
        STEP_DEPTH_OUT, SUSPEND_POLICY_ALL, SUSPEND_POLICY_NONE, TYPE_TAG_ARRAY, TYPE_TAG_CLASS,
    },
};

/// A tiny JDWP server that plays a scripted, single-threaded Java program.
///
/// It supports the subset of JDWP that jdbg uses, which is enough to drive a
/// whole debugging session without a JDK installed. The program is `main` of
/// [`MockJdwpServerConfig::main_class`]:
///
/// ```text
///  5  String[] args            (live from line 5)
///  6  int n = 10;
///  7  double pi = 3.0;
///  8  int[] arr = {2, 3, 6, 2}; String[] words = {"hello", null};
/// 10  ArrayList list = ...; Node node = ...; node.next = node; String greeting = "hi";
/// 12  ..
/// 13  ..
/// 14  ..
/// 16  return;
/// ```
///
/// Lines 9, 11 and 15 carry no code. Every resume runs to the next armed
/// breakpoint or step target; when there is none the VM dies and closes the
/// connection.
pub struct MockJdwpServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<State>,
}

#[derive(Clone, Debug)]
pub struct MockJdwpServerConfig {
    /// JDWP identifier sizes returned by `VirtualMachine.IDSizes`.
    pub id_sizes: JdwpIdSizes,
    /// Binary name of the class whose `main` the mock runs.
    pub main_class: String,
    /// Answer `Method.VariableTable` with `ABSENT_INFORMATION`, as for classes
    /// compiled without `-g`.
    pub absent_variable_info: bool,
}

impl Default for MockJdwpServerConfig {
    fn default() -> Self {
        Self {
            id_sizes: JdwpIdSizes::default(),
            main_class: "org.ssw.Debuggee".to_string(),
            absent_variable_info: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockEventRequest {
    pub event_kind: u8,
    pub suspend_policy: u8,
    pub request_id: i32,
    pub modifiers: Vec<EventModifier>,
}

impl MockEventRequest {
    fn location(&self) -> Option<Location> {
        self.modifiers.iter().find_map(|m| match m {
            EventModifier::LocationOnly { location } => Some(*location),
            _ => None,
        })
    }

    fn step_depth(&self) -> Option<u32> {
        self.modifiers.iter().find_map(|m| match m {
            EventModifier::Step { depth, .. } => Some(*depth),
            _ => None,
        })
    }

    fn class_pattern(&self) -> Option<&str> {
        self.modifiers.iter().find_map(|m| match m {
            EventModifier::ClassMatch { pattern } => Some(pattern.as_str()),
            _ => None,
        })
    }
}

impl MockJdwpServer {
    pub async fn spawn() -> std::io::Result<Self> {
        Self::spawn_with_config(Default::default()).await
    }

    pub async fn spawn_with_config(config: MockJdwpServerConfig) -> std::io::Result<Self> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let state = Arc::new(State::new(config));
        let task_shutdown = shutdown.clone();
        let task_state = state.clone();

        tokio::spawn(async move {
            if let Err(err) = run(listener, task_state, task_shutdown).await {
                tracing::debug!(target: "jdbg.jdwp", error = %err, "mock JDWP server stopped");
            }
        });

        Ok(Self {
            addr,
            shutdown,
            state,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn main_class_name(&self) -> &str {
        &self.state.config.main_class
    }

    pub fn main_class_signature(&self) -> &str {
        &self.state.main_signature
    }

    /// The `String[] words` local: `{"hello", null}`.
    pub fn words_array_id(&self) -> ObjectId {
        WORDS_ARRAY_ID
    }

    /// Requests currently armed in the mock VM.
    pub fn event_requests(&self) -> Vec<MockEventRequest> {
        lock(&self.state.requests, "mock.requests").clone()
    }

    /// `(event kind, request id)` of every `EventRequest.Clear`, in order.
    pub fn cleared_requests(&self) -> Vec<(u8, i32)> {
        lock(&self.state.cleared, "mock.cleared").clone()
    }

    pub fn vm_resume_calls(&self) -> u32 {
        self.state.vm_resume_calls.load(Ordering::Relaxed)
    }

    pub fn exit_code(&self) -> Option<i32> {
        *lock(&self.state.exit_code, "mock.exit_code")
    }
}

impl Drop for MockJdwpServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// Use a thread object id with the high bit set so id handling is exercised
// with values that do not fit an i64.
const THREAD_ID: ThreadId = 0x8000_0000_0000_1001;
const FRAME_ID: u64 = 0x2001;

const MAIN_CLASS_ID: ReferenceTypeId = 0x3001;
const OBJECT_CLASS_ID: ReferenceTypeId = 0x3002;
const STRING_CLASS_ID: ReferenceTypeId = 0x3003;
const ABSTRACT_LIST_CLASS_ID: ReferenceTypeId = 0x3004;
const ARRAY_LIST_CLASS_ID: ReferenceTypeId = 0x3005;
const NODE_CLASS_ID: ReferenceTypeId = 0x3006;
const INT_ARRAY_CLASS_ID: ReferenceTypeId = 0x3007;
const STRING_ARRAY_CLASS_ID: ReferenceTypeId = 0x3008;
const OBJECT_ARRAY_CLASS_ID: ReferenceTypeId = 0x3009;

const INIT_METHOD_ID: MethodId = 0x4001;
const MAIN_METHOD_ID: MethodId = 0x4002;
const NATIVE_METHOD_ID: MethodId = 0x4003;

const ARGS_ARRAY_ID: ObjectId = 0x5001;
const INT_ARRAY_ID: ObjectId = 0x5002;
const WORDS_ARRAY_ID: ObjectId = 0x5003;
const LIST_ID: ObjectId = 0x5004;
const ELEMENT_DATA_ID: ObjectId = 0x5005;
const NODE_ID: ObjectId = 0x5006;
const HELLO_STRING_ID: ObjectId = 0x5007;
const GREETING_STRING_ID: ObjectId = 0x5008;

const SERIAL_VERSION_FIELD_ID: FieldId = 0x6001;
const ELEMENT_DATA_FIELD_ID: FieldId = 0x6002;
const SIZE_FIELD_ID: FieldId = 0x6003;
const MOD_COUNT_FIELD_ID: FieldId = 0x6004;
const NODE_VALUE_FIELD_ID: FieldId = 0x6005;
const NODE_NEXT_FIELD_ID: FieldId = 0x6006;
const NODE_COUNT_FIELD_ID: FieldId = 0x6007;

const ERROR_NOT_IMPLEMENTED: u16 = 99;
const CLASS_STATUS_INITIALIZED: u32 = 7;

const MAIN_LINES: &[(u64, i32)] = &[
    (0, 5),
    (4, 6),
    (9, 7),
    (15, 8),
    (22, 10),
    (30, 12),
    (38, 13),
    (45, 14),
    (52, 16),
];
const MAIN_END: u64 = 60;

struct MockField {
    id: FieldId,
    name: &'static str,
    signature: &'static str,
    mod_bits: u32,
}

struct MockClass {
    tag: u8,
    signature: String,
    superclass: ReferenceTypeId,
    fields: Vec<MockField>,
}

enum MockObject {
    Str(&'static str),
    Array {
        class_id: ReferenceTypeId,
        element_tag: u8,
        elements: Vec<JdwpValue>,
    },
    Instance {
        class_id: ReferenceTypeId,
        values: HashMap<FieldId, JdwpValue>,
    },
}

impl MockObject {
    fn class_id(&self) -> ReferenceTypeId {
        match self {
            MockObject::Str(_) => STRING_CLASS_ID,
            MockObject::Array { class_id, .. } | MockObject::Instance { class_id, .. } => {
                *class_id
            }
        }
    }
}

struct State {
    config: MockJdwpServerConfig,
    main_signature: String,
    classes: HashMap<ReferenceTypeId, MockClass>,
    heap: HashMap<ObjectId, MockObject>,
    next_request_id: AtomicI32,
    next_packet_id: AtomicU32,
    vm_resume_calls: AtomicU32,
    requests: Mutex<Vec<MockEventRequest>>,
    cleared: Mutex<Vec<(u8, i32)>>,
    exit_code: Mutex<Option<i32>>,
    vm: Mutex<VmProgress>,
}

#[derive(Default)]
struct VmProgress {
    started: bool,
    prepared: bool,
    /// Code index of `main` the thread is suspended at.
    pc: Option<u64>,
}

impl State {
    fn new(config: MockJdwpServerConfig) -> Self {
        let main_signature = class_name_to_signature(&config.main_class);
        Self {
            classes: classes(&main_signature),
            heap: heap(),
            main_signature,
            config,
            next_request_id: AtomicI32::new(0),
            next_packet_id: AtomicU32::new(0),
            vm_resume_calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
            cleared: Mutex::new(Vec::new()),
            exit_code: Mutex::new(None),
            vm: Mutex::new(VmProgress::default()),
        }
    }

    fn alloc_request_id(&self) -> i32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn alloc_packet_id(&self) -> u32 {
        self.next_packet_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn main_location(&self, index: u64) -> Location {
        Location {
            type_tag: TYPE_TAG_CLASS,
            class_id: MAIN_CLASS_ID,
            method_id: MAIN_METHOD_ID,
            index,
        }
    }

    /// The runtime tag of a reference, as reported in tagged values.
    fn object_tag(&self, id: ObjectId) -> u8 {
        match self.heap.get(&id) {
            Some(MockObject::Str(_)) => b's',
            Some(MockObject::Array { .. }) => b'[',
            _ => b'L',
        }
    }

    fn reference(&self, id: ObjectId) -> JdwpValue {
        JdwpValue::Object {
            tag: self.object_tag(id),
            id,
        }
    }
}

fn classes(main_signature: &str) -> HashMap<ReferenceTypeId, MockClass> {
    let class = |tag, signature: &str, superclass, fields| MockClass {
        tag,
        signature: signature.to_string(),
        superclass,
        fields,
    };
    let field = |id, name, signature, mod_bits| MockField {
        id,
        name,
        signature,
        mod_bits,
    };

    HashMap::from([
        (
            MAIN_CLASS_ID,
            class(TYPE_TAG_CLASS, main_signature, OBJECT_CLASS_ID, Vec::new()),
        ),
        (
            OBJECT_CLASS_ID,
            class(TYPE_TAG_CLASS, "Ljava/lang/Object;", 0, Vec::new()),
        ),
        (
            STRING_CLASS_ID,
            class(TYPE_TAG_CLASS, "Ljava/lang/String;", OBJECT_CLASS_ID, Vec::new()),
        ),
        (
            ABSTRACT_LIST_CLASS_ID,
            class(
                TYPE_TAG_CLASS,
                "Ljava/util/AbstractList;",
                OBJECT_CLASS_ID,
                vec![field(MOD_COUNT_FIELD_ID, "modCount", "I", 0x0080)],
            ),
        ),
        (
            ARRAY_LIST_CLASS_ID,
            class(
                TYPE_TAG_CLASS,
                "Ljava/util/ArrayList;",
                ABSTRACT_LIST_CLASS_ID,
                vec![
                    field(
                        SERIAL_VERSION_FIELD_ID,
                        "serialVersionUID",
                        "J",
                        0x0002 | FIELD_MODIFIER_STATIC | 0x0010,
                    ),
                    field(ELEMENT_DATA_FIELD_ID, "elementData", "[Ljava/lang/Object;", 0x0080),
                    field(SIZE_FIELD_ID, "size", "I", 0x0002),
                ],
            ),
        ),
        (
            NODE_CLASS_ID,
            class(
                TYPE_TAG_CLASS,
                "Lorg/ssw/Node;",
                OBJECT_CLASS_ID,
                vec![
                    field(NODE_COUNT_FIELD_ID, "count", "I", FIELD_MODIFIER_STATIC),
                    field(NODE_VALUE_FIELD_ID, "value", "I", 0),
                    field(NODE_NEXT_FIELD_ID, "next", "Lorg/ssw/Node;", 0),
                ],
            ),
        ),
        (
            INT_ARRAY_CLASS_ID,
            class(TYPE_TAG_ARRAY, "[I", OBJECT_CLASS_ID, Vec::new()),
        ),
        (
            STRING_ARRAY_CLASS_ID,
            class(TYPE_TAG_ARRAY, "[Ljava/lang/String;", OBJECT_CLASS_ID, Vec::new()),
        ),
        (
            OBJECT_ARRAY_CLASS_ID,
            class(TYPE_TAG_ARRAY, "[Ljava/lang/Object;", OBJECT_CLASS_ID, Vec::new()),
        ),
    ])
}

fn heap() -> HashMap<ObjectId, MockObject> {
    let string = |id| JdwpValue::Object { tag: b's', id };
    let null = JdwpValue::Object { tag: b'L', id: 0 };

    HashMap::from([
        (
            ARGS_ARRAY_ID,
            MockObject::Array {
                class_id: STRING_ARRAY_CLASS_ID,
                element_tag: b'L',
                elements: Vec::new(),
            },
        ),
        (
            INT_ARRAY_ID,
            MockObject::Array {
                class_id: INT_ARRAY_CLASS_ID,
                element_tag: b'I',
                elements: [2, 3, 6, 2].into_iter().map(JdwpValue::Int).collect(),
            },
        ),
        (
            WORDS_ARRAY_ID,
            MockObject::Array {
                class_id: STRING_ARRAY_CLASS_ID,
                element_tag: b'L',
                elements: vec![string(HELLO_STRING_ID), null],
            },
        ),
        (
            ELEMENT_DATA_ID,
            MockObject::Array {
                class_id: OBJECT_ARRAY_CLASS_ID,
                element_tag: b'L',
                elements: vec![string(GREETING_STRING_ID), null],
            },
        ),
        (
            LIST_ID,
            MockObject::Instance {
                class_id: ARRAY_LIST_CLASS_ID,
                values: HashMap::from([
                    (SERIAL_VERSION_FIELD_ID, JdwpValue::Long(8683452581122892189)),
                    (
                        ELEMENT_DATA_FIELD_ID,
                        JdwpValue::Object {
                            tag: b'[',
                            id: ELEMENT_DATA_ID,
                        },
                    ),
                    (SIZE_FIELD_ID, JdwpValue::Int(1)),
                    (MOD_COUNT_FIELD_ID, JdwpValue::Int(1)),
                ]),
            },
        ),
        (
            NODE_ID,
            MockObject::Instance {
                class_id: NODE_CLASS_ID,
                values: HashMap::from([
                    (NODE_COUNT_FIELD_ID, JdwpValue::Int(1)),
                    (NODE_VALUE_FIELD_ID, JdwpValue::Int(7)),
                    (
                        NODE_NEXT_FIELD_ID,
                        JdwpValue::Object {
                            tag: b'L',
                            id: NODE_ID,
                        },
                    ),
                ]),
            },
        ),
        (HELLO_STRING_ID, MockObject::Str("hello")),
        (GREETING_STRING_ID, MockObject::Str("hi")),
    ])
}

/// `main`'s locals: (slot, name, signature, first live index, value).
fn main_locals() -> Vec<(u32, &'static str, &'static str, u64, JdwpValue)> {
    let obj = |tag, id| JdwpValue::Object { tag, id };
    vec![
        (0, "args", "[Ljava/lang/String;", 0, obj(b'[', ARGS_ARRAY_ID)),
        (1, "n", "I", 4, JdwpValue::Int(10)),
        (2, "pi", "D", 9, JdwpValue::Double(3.0)),
        (4, "arr", "[I", 15, obj(b'[', INT_ARRAY_ID)),
        (5, "words", "[Ljava/lang/String;", 15, obj(b'[', WORDS_ARRAY_ID)),
        (6, "list", "Ljava/util/ArrayList;", 22, obj(b'L', LIST_ID)),
        (7, "node", "Lorg/ssw/Node;", 22, obj(b'L', NODE_ID)),
        (8, "greeting", "Ljava/lang/String;", 22, obj(b's', GREETING_STRING_ID)),
    ]
}

async fn run(
    listener: TcpListener,
    state: Arc<State>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let (mut socket, _) = tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        accept = listener.accept() => accept?,
    };

    // Handshake: debugger -> "JDWP-Handshake", server echoes back.
    let mut hs = [0u8; HANDSHAKE.len()];
    socket.read_exact(&mut hs).await?;
    if hs != *HANDSHAKE {
        return Ok(());
    }
    socket.write_all(HANDSHAKE).await?;

    let (mut reader, mut writer) = socket.into_split();

    loop {
        let packet = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            res = read_packet(&mut reader) => res?,
        };
        let Some(packet) = packet else {
            return Ok(());
        };

        let outcome = handle_packet(&state, packet);
        writer.write_all(&outcome.reply).await?;
        for event in &outcome.events {
            writer.write_all(event).await?;
        }
        if outcome.close_after {
            writer.shutdown().await?;
            return Ok(());
        }
    }
}

struct Packet {
    id: u32,
    command_set: u8,
    command: u8,
    payload: Vec<u8>,
}

async fn read_packet(socket: &mut OwnedReadHalf) -> std::io::Result<Option<Packet>> {
    let mut header = [0u8; HEADER_LEN];
    match socket.read_exact(&mut header).await {
        Ok(_n) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if length < HEADER_LEN || header[8] != 0 {
        // The mock only expects commands from the debugger.
        return Ok(None);
    }
    let mut payload = vec![0u8; length - HEADER_LEN];
    socket.read_exact(&mut payload).await?;
    Ok(Some(Packet {
        id: u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
        command_set: header[9],
        command: header[10],
        payload,
    }))
}

struct Outcome {
    reply: Vec<u8>,
    events: Vec<Vec<u8>>,
    close_after: bool,
}

type Answer = Result<Vec<u8>, u16>;

fn handle_packet(state: &State, packet: Packet) -> Outcome {
    let sizes = state.config.id_sizes;
    let mut r = JdwpReader::new(&packet.payload);
    let mut events = Vec::new();
    let mut close_after = false;

    let answer: Answer = match (packet.command_set, packet.command) {
        // VirtualMachine.IDSizes
        (1, 7) => {
            let mut w = JdwpWriter::new();
            for size in [
                sizes.field_id,
                sizes.method_id,
                sizes.object_id,
                sizes.reference_type_id,
                sizes.frame_id,
            ] {
                w.write_u32(size as u32);
            }
            // A `suspend=y` VM reports its start once the debugger is attached.
            let mut vm = lock(&state.vm, "mock.vm");
            if !vm.started {
                vm.started = true;
                events.push(vm_start_packet(state));
            }
            Ok(w.into_vec())
        }
        // VirtualMachine.Resume
        (1, 9) => {
            state.vm_resume_calls.fetch_add(1, Ordering::Relaxed);
            let (packet, vm_died) = run_until_next_event(state);
            events.push(packet);
            close_after = vm_died;
            Ok(Vec::new())
        }
        // VirtualMachine.Exit
        (1, 10) => match r.read_i32() {
            Ok(code) => {
                *lock(&state.exit_code, "mock.exit_code") = Some(code);
                close_after = true;
                Ok(Vec::new())
            }
            Err(_) => Err(ERROR_NOT_IMPLEMENTED),
        },
        // ReferenceType.Signature
        (2, 1) => read_class(state, &mut r).and_then(|class| {
            let mut w = JdwpWriter::new();
            w.write_string(&class.signature);
            Ok(w.into_vec())
        }),
        // ReferenceType.Fields
        (2, 4) => read_class(state, &mut r).and_then(|class| {
            let mut w = JdwpWriter::new();
            w.write_u32(class.fields.len() as u32);
            for field in &class.fields {
                w.write_id(field.id, sizes.field_id);
                w.write_string(field.name);
                w.write_string(field.signature);
                w.write_u32(field.mod_bits);
            }
            Ok(w.into_vec())
        }),
        // ReferenceType.Methods
        (2, 5) => read_class(state, &mut r).and_then(|class| {
            let mut w = JdwpWriter::new();
            if class.signature != state.main_signature {
                w.write_u32(0);
                return Ok(w.into_vec());
            }
            let methods = [
                (INIT_METHOD_ID, "<init>", "()V", 0x0001),
                (MAIN_METHOD_ID, "main", "([Ljava/lang/String;)V", 0x0009),
                (NATIVE_METHOD_ID, "helper", "()I", 0x0108),
            ];
            w.write_u32(methods.len() as u32);
            for (id, name, signature, mod_bits) in methods {
                w.write_id(id, sizes.method_id);
                w.write_string(name);
                w.write_string(signature);
                w.write_u32(mod_bits);
            }
            Ok(w.into_vec())
        }),
        // ClassType.Superclass
        (3, 1) => read_class(state, &mut r).and_then(|class| {
            let mut w = JdwpWriter::new();
            w.write_reference_type_id(class.superclass, &sizes);
            Ok(w.into_vec())
        }),
        // Method.LineTable
        (6, 1) => read_method(&mut r, &sizes).and_then(|(class_id, method_id)| {
            let lines: Vec<LineTableEntry> = match (class_id, method_id) {
                (MAIN_CLASS_ID, INIT_METHOD_ID) => vec![LineTableEntry {
                    code_index: 0,
                    line: 3,
                }],
                (MAIN_CLASS_ID, MAIN_METHOD_ID) => MAIN_LINES
                    .iter()
                    .map(|&(code_index, line)| LineTableEntry { code_index, line })
                    .collect(),
                (MAIN_CLASS_ID, NATIVE_METHOD_ID) => return Err(ERROR_NATIVE_METHOD),
                _ => return Err(ERROR_INVALID_OBJECT),
            };
            let end = lines.last().map_or(0, |entry| entry.code_index + 8);
            let mut w = JdwpWriter::new();
            w.write_u64(0);
            w.write_u64(end);
            w.write_u32(lines.len() as u32);
            for entry in lines {
                w.write_u64(entry.code_index);
                w.write_i32(entry.line);
            }
            Ok(w.into_vec())
        }),
        // Method.VariableTable
        (6, 2) => read_method(&mut r, &sizes).and_then(|(class_id, method_id)| {
            if (class_id, method_id) != (MAIN_CLASS_ID, MAIN_METHOD_ID) {
                return Err(ERROR_ABSENT_INFORMATION);
            }
            if state.config.absent_variable_info {
                return Err(ERROR_ABSENT_INFORMATION);
            }
            let vars: Vec<VariableInfo> = main_locals()
                .into_iter()
                .map(|(slot, name, signature, start, _)| VariableInfo {
                    code_index: start,
                    name: name.to_string(),
                    signature: signature.to_string(),
                    length: (MAIN_END - start) as u32,
                    slot,
                })
                .collect();
            let mut w = JdwpWriter::new();
            w.write_u32(1);
            w.write_u32(vars.len() as u32);
            for var in vars {
                w.write_u64(var.code_index);
                w.write_string(&var.name);
                w.write_string(&var.signature);
                w.write_u32(var.length);
                w.write_u32(var.slot);
            }
            Ok(w.into_vec())
        }),
        // ObjectReference.ReferenceType
        (9, 1) => read_object(state, &mut r).and_then(|object| {
            let class_id = object.class_id();
            let tag = state.classes.get(&class_id).map_or(TYPE_TAG_CLASS, |c| c.tag);
            let mut w = JdwpWriter::new();
            w.write_u8(tag);
            w.write_reference_type_id(class_id, &sizes);
            Ok(w.into_vec())
        }),
        // ObjectReference.GetValues
        (9, 2) => read_object(state, &mut r).and_then(|object| {
            let MockObject::Instance { values, .. } = object else {
                return Ok(tagged_values(&sizes, &[]));
            };
            let count = r.read_u32().map_err(|_| ERROR_NOT_IMPLEMENTED)?;
            let mut out = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let field_id = r.read_id(sizes.field_id).map_err(|_| ERROR_NOT_IMPLEMENTED)?;
                out.push(*values.get(&field_id).ok_or(ERROR_INVALID_OBJECT)?);
            }
            Ok(tagged_values(&sizes, &out))
        }),
        // StringReference.Value
        (10, 1) => read_object(state, &mut r).and_then(|object| match object {
            MockObject::Str(text) => {
                let mut w = JdwpWriter::new();
                w.write_string(text);
                Ok(w.into_vec())
            }
            _ => Err(ERROR_INVALID_OBJECT),
        }),
        // ThreadReference.Frames
        (11, 6) => match r.read_object_id(&sizes) {
            Ok(THREAD_ID) => {
                let pc = lock(&state.vm, "mock.vm").pc;
                let mut w = JdwpWriter::new();
                match pc {
                    Some(pc) => {
                        w.write_u32(1);
                        w.write_id(FRAME_ID, sizes.frame_id);
                        w.write_location(&state.main_location(pc), &sizes);
                    }
                    None => w.write_u32(0),
                }
                Ok(w.into_vec())
            }
            _ => Err(ERROR_INVALID_OBJECT),
        },
        // ArrayReference.Length
        (13, 1) => read_object(state, &mut r).and_then(|object| match object {
            MockObject::Array { elements, .. } => {
                let mut w = JdwpWriter::new();
                w.write_i32(elements.len() as i32);
                Ok(w.into_vec())
            }
            _ => Err(ERROR_INVALID_OBJECT),
        }),
        // ArrayReference.GetValues
        (13, 2) => read_object(state, &mut r).and_then(|object| {
            let MockObject::Array {
                element_tag,
                elements,
                ..
            } = object
            else {
                return Err(ERROR_INVALID_OBJECT);
            };
            let first = r.read_i32().map_err(|_| ERROR_NOT_IMPLEMENTED)?.max(0) as usize;
            let length = r.read_i32().map_err(|_| ERROR_NOT_IMPLEMENTED)?.max(0) as usize;
            let region = elements
                .get(first..first + length)
                .ok_or(ERROR_INVALID_OBJECT)?;
            let mut w = JdwpWriter::new();
            w.write_u8(*element_tag);
            w.write_u32(region.len() as u32);
            for value in region {
                if *element_tag == b'L' {
                    w.write_tagged_value(value, &sizes);
                } else {
                    w.write_value(value, &sizes);
                }
            }
            Ok(w.into_vec())
        }),
        // EventRequest.Set
        (15, 1) => read_event_request(state, &mut r, &sizes).map(|request| {
            let mut w = JdwpWriter::new();
            w.write_i32(request.request_id);
            lock(&state.requests, "mock.requests").push(request);
            w.into_vec()
        }),
        // EventRequest.Clear
        (15, 2) => match (r.read_u8(), r.read_i32()) {
            (Ok(kind), Ok(request_id)) => {
                lock(&state.requests, "mock.requests")
                    .retain(|req| !(req.event_kind == kind && req.request_id == request_id));
                lock(&state.cleared, "mock.cleared").push((kind, request_id));
                Ok(Vec::new())
            }
            _ => Err(ERROR_NOT_IMPLEMENTED),
        },
        // StackFrame.GetValues
        (16, 1) => read_frame_values(state, &mut r, &sizes),
        _ => Err(ERROR_NOT_IMPLEMENTED),
    };

    let reply = match answer {
        Ok(payload) => encode_reply(packet.id, 0, &payload),
        Err(code) => {
            // Nothing is sent after a failed command.
            events.clear();
            close_after = false;
            encode_reply(packet.id, code, &[])
        }
    };

    Outcome {
        reply,
        events,
        close_after,
    }
}

fn read_class<'s>(state: &'s State, r: &mut JdwpReader<'_>) -> Result<&'s MockClass, u16> {
    let class_id = r
        .read_reference_type_id(&state.config.id_sizes)
        .map_err(|_| ERROR_NOT_IMPLEMENTED)?;
    state.classes.get(&class_id).ok_or(ERROR_INVALID_OBJECT)
}

fn read_object<'s>(state: &'s State, r: &mut JdwpReader<'_>) -> Result<&'s MockObject, u16> {
    let object_id = r
        .read_object_id(&state.config.id_sizes)
        .map_err(|_| ERROR_NOT_IMPLEMENTED)?;
    state.heap.get(&object_id).ok_or(ERROR_INVALID_OBJECT)
}

fn read_method(
    r: &mut JdwpReader<'_>,
    sizes: &JdwpIdSizes,
) -> Result<(ReferenceTypeId, MethodId), u16> {
    let class_id = r
        .read_reference_type_id(sizes)
        .map_err(|_| ERROR_NOT_IMPLEMENTED)?;
    let method_id = r
        .read_id(sizes.method_id)
        .map_err(|_| ERROR_NOT_IMPLEMENTED)?;
    Ok((class_id, method_id))
}

fn read_frame_values(state: &State, r: &mut JdwpReader<'_>, sizes: &JdwpIdSizes) -> Answer {
    let bad = |_| ERROR_NOT_IMPLEMENTED;
    let thread = r.read_object_id(sizes).map_err(bad)?;
    let frame = r.read_id(sizes.frame_id).map_err(bad)?;
    if thread != THREAD_ID || frame != FRAME_ID {
        return Err(ERROR_INVALID_OBJECT);
    }
    let locals = main_locals();
    let count = r.read_u32().map_err(bad)?;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let slot = r.read_u32().map_err(bad)?;
        let _tag = r.read_u8().map_err(bad)?;
        let value = locals
            .iter()
            .find(|local| local.0 == slot)
            .map(|local| local.4)
            .ok_or(ERROR_INVALID_OBJECT)?;
        values.push(match value {
            JdwpValue::Object { id, .. } => state.reference(id),
            other => other,
        });
    }
    Ok(tagged_values(sizes, &values))
}

fn tagged_values(sizes: &JdwpIdSizes, values: &[JdwpValue]) -> Vec<u8> {
    let mut w = JdwpWriter::new();
    w.write_u32(values.len() as u32);
    for value in values {
        w.write_tagged_value(value, sizes);
    }
    w.into_vec()
}

fn read_event_request(
    state: &State,
    r: &mut JdwpReader<'_>,
    sizes: &JdwpIdSizes,
) -> Result<MockEventRequest, u16> {
    let bad = |_| ERROR_NOT_IMPLEMENTED;
    let event_kind = r.read_u8().map_err(bad)?;
    let suspend_policy = r.read_u8().map_err(bad)?;
    let count = r.read_u32().map_err(bad)?;
    let mut modifiers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let modifier = match r.read_u8().map_err(bad)? {
            EVENT_MODIFIER_KIND_THREAD_ONLY => EventModifier::ThreadOnly {
                thread: r.read_object_id(sizes).map_err(bad)?,
            },
            EVENT_MODIFIER_KIND_CLASS_MATCH => EventModifier::ClassMatch {
                pattern: r.read_string().map_err(bad)?,
            },
            EVENT_MODIFIER_KIND_LOCATION_ONLY => EventModifier::LocationOnly {
                location: r.read_location(sizes).map_err(bad)?,
            },
            EVENT_MODIFIER_KIND_STEP => EventModifier::Step {
                thread: r.read_object_id(sizes).map_err(bad)?,
                size: r.read_u32().map_err(bad)?,
                depth: r.read_u32().map_err(bad)?,
            },
            _ => return Err(ERROR_NOT_IMPLEMENTED),
        };
        modifiers.push(modifier);
    }
    Ok(MockEventRequest {
        event_kind,
        suspend_policy,
        request_id: state.alloc_request_id(),
        modifiers,
    })
}

/// Advance the scripted program to its next reportable event.
///
/// Returns the composite event packet and whether the VM died.
fn run_until_next_event(state: &State) -> (Vec<u8>, bool) {
    let sizes = state.config.id_sizes;
    let requests = lock(&state.requests, "mock.requests").clone();
    let mut vm = lock(&state.vm, "mock.vm");

    if !vm.prepared {
        vm.prepared = true;
        let prepare = requests.iter().find(|req| {
            req.event_kind == EVENT_KIND_CLASS_PREPARE
                && req
                    .class_pattern()
                    .map_or(true, |pattern| class_matches(pattern, &state.config.main_class))
        });
        if let Some(prepare) = prepare {
            let mut w = JdwpWriter::new();
            w.write_u8(prepare.suspend_policy);
            w.write_u32(1);
            w.write_u8(EVENT_KIND_CLASS_PREPARE);
            w.write_i32(prepare.request_id);
            w.write_object_id(THREAD_ID, &sizes);
            w.write_u8(TYPE_TAG_CLASS);
            w.write_reference_type_id(MAIN_CLASS_ID, &sizes);
            w.write_string(&state.main_signature);
            w.write_u32(CLASS_STATUS_INITIALIZED);
            return (composite(state, w), false);
        }
    }

    let after = |index: u64| vm.pc.map_or(true, |pc| index > pc);

    let step = requests
        .iter()
        .find(|req| req.event_kind == EVENT_KIND_SINGLE_STEP);
    let step_target = step.and_then(|req| {
        if req.step_depth() == Some(STEP_DEPTH_OUT) {
            // `main` has no caller to return to.
            return None;
        }
        MAIN_LINES
            .iter()
            .map(|&(index, _)| index)
            .find(|&index| after(index))
    });

    let breakpoint_target = requests
        .iter()
        .filter(|req| req.event_kind == EVENT_KIND_BREAKPOINT)
        .filter_map(|req| req.location())
        .filter(|loc| loc.class_id == MAIN_CLASS_ID && loc.method_id == MAIN_METHOD_ID)
        .map(|loc| loc.index)
        .filter(|&index| after(index))
        .min();

    let target = match (step_target, breakpoint_target) {
        (Some(s), Some(b)) => Some(s.min(b)),
        (s, b) => s.or(b),
    };

    let Some(index) = target else {
        vm.pc = None;
        let mut w = JdwpWriter::new();
        w.write_u8(SUSPEND_POLICY_NONE);
        w.write_u32(1);
        w.write_u8(EVENT_KIND_VM_DEATH);
        w.write_i32(0);
        return (composite(state, w), true);
    };

    vm.pc = Some(index);
    let location = state.main_location(index);

    let mut stops: Vec<(u8, i32)> = Vec::new();
    if let (Some(step), Some(s)) = (step, step_target) {
        if s == index {
            stops.push((EVENT_KIND_SINGLE_STEP, step.request_id));
        }
    }
    for req in &requests {
        if req.event_kind == EVENT_KIND_BREAKPOINT
            && req.location().map(|loc| loc.index) == Some(index)
        {
            stops.push((EVENT_KIND_BREAKPOINT, req.request_id));
        }
    }

    let mut w = JdwpWriter::new();
    w.write_u8(SUSPEND_POLICY_ALL);
    w.write_u32(stops.len() as u32);
    for (kind, request_id) in stops {
        w.write_u8(kind);
        w.write_i32(request_id);
        w.write_object_id(THREAD_ID, &sizes);
        w.write_location(&location, &sizes);
    }
    (composite(state, w), false)
}

fn vm_start_packet(state: &State) -> Vec<u8> {
    let mut w = JdwpWriter::new();
    w.write_u8(SUSPEND_POLICY_ALL);
    w.write_u32(1);
    w.write_u8(EVENT_KIND_VM_START);
    w.write_i32(0);
    w.write_object_id(THREAD_ID, &state.config.id_sizes);
    composite(state, w)
}

fn composite(state: &State, w: JdwpWriter) -> Vec<u8> {
    encode_command(
        state.alloc_packet_id(),
        EVENT_COMMAND_SET,
        EVENT_COMPOSITE_COMMAND,
        &w.into_vec(),
    )
}

/// JDWP class patterns: exact, `prefix.*` or `*.suffix`.
fn class_matches(pattern: &str, class: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        class.starts_with(prefix)
    } else if let Some(suffix) = pattern.strip_prefix('*') {
        class.ends_with(suffix)
    } else {
        pattern == class
    }
}
