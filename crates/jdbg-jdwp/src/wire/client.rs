use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{mpsc, oneshot, Mutex},
};
use tokio_util::sync::CancellationToken;

use super::{
    codec::{
        encode_command, signature_to_tag, JdwpReader, JdwpWriter, EVENT_COMMAND_SET,
        EVENT_COMPOSITE_COMMAND, FLAG_REPLY, HANDSHAKE, HEADER_LEN,
    },
    poison::lock,
    types::{
        EventSet, FieldInfo, FrameId, FrameInfo, JdwpError, JdwpEvent, JdwpIdSizes, JdwpValue,
        LineTable, LineTableEntry, Location, MethodId, MethodInfo, ObjectId, ReferenceTypeId,
        Result, ThreadId, VariableInfo, EVENT_KIND_BREAKPOINT, EVENT_KIND_CLASS_PREPARE,
        EVENT_KIND_SINGLE_STEP, EVENT_KIND_VM_DEATH, EVENT_KIND_VM_START,
        EVENT_MODIFIER_KIND_CLASS_MATCH, EVENT_MODIFIER_KIND_LOCATION_ONLY,
        EVENT_MODIFIER_KIND_STEP, EVENT_MODIFIER_KIND_THREAD_ONLY,
    },
};

#[derive(Debug, Clone)]
pub struct JdwpClientConfig {
    pub handshake_timeout: Duration,
    pub reply_timeout: Duration,
}

impl Default for JdwpClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            reply_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
struct Reply {
    error_code: u16,
    payload: Vec<u8>,
}

type PendingReplies = HashMap<u32, oneshot::Sender<std::result::Result<Reply, JdwpError>>>;

/// Event traffic as seen by the read loop. Payloads are decoded by the consumer,
/// once the negotiated id sizes are known.
#[derive(Debug)]
enum Incoming {
    Composite(Vec<u8>),
    Disconnected,
}

#[derive(Debug)]
struct Inner {
    writer: Mutex<OwnedWriteHalf>,
    pending: std::sync::Mutex<PendingReplies>,
    next_id: AtomicU32,
    id_sizes: std::sync::Mutex<JdwpIdSizes>,
    events: Mutex<mpsc::UnboundedReceiver<Incoming>>,
    shutdown: CancellationToken,
    config: JdwpClientConfig,
}

impl Inner {
    fn id_sizes(&self) -> JdwpIdSizes {
        *lock(&self.id_sizes, "jdwp.id_sizes")
    }

    fn fail_pending(&self) {
        let pending = std::mem::take(&mut *lock(&self.pending, "jdwp.pending"));
        for (_id, tx) in pending {
            let _ = tx.send(Err(JdwpError::ConnectionClosed));
        }
    }
}

/// Handle to one JDWP connection. Cloning shares the connection.
#[derive(Clone, Debug)]
pub struct JdwpClient {
    inner: Arc<Inner>,
}

impl JdwpClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with_config(addr, JdwpClientConfig::default()).await
    }

    pub async fn connect_with_config(addr: SocketAddr, config: JdwpClientConfig) -> Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);

        tokio::time::timeout(config.handshake_timeout, stream.write_all(HANDSHAKE))
            .await
            .map_err(|_| JdwpError::Timeout)??;

        let mut handshake = [0u8; HANDSHAKE.len()];
        tokio::time::timeout(config.handshake_timeout, stream.read_exact(&mut handshake))
            .await
            .map_err(|_| JdwpError::Timeout)??;

        if handshake != *HANDSHAKE {
            return Err(JdwpError::Protocol(format!(
                "invalid handshake reply: {:?}",
                String::from_utf8_lossy(&handshake)
            )));
        }

        let (reader, writer) = stream.into_split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            writer: Mutex::new(writer),
            pending: std::sync::Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            id_sizes: std::sync::Mutex::new(JdwpIdSizes::default()),
            events: Mutex::new(events_rx),
            shutdown: CancellationToken::new(),
            config,
        });

        tokio::spawn(read_loop(reader, inner.clone(), events_tx));

        let client = Self { inner };
        // ID sizes are required for correct parsing of most replies/events.
        let sizes = client.idsizes().await?;
        tracing::debug!(target: "jdbg.jdwp", %addr, ?sizes, "connected to VM");

        Ok(client)
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Next composite event set sent by the VM.
    ///
    /// After a clean close by the VM a final set holding only
    /// [`JdwpEvent::VmDisconnect`] is returned. `None` means the stream is over;
    /// if no disconnect set preceded it the connection failed.
    pub async fn next_event_set(&self) -> Option<EventSet> {
        let mut events = self.inner.events.lock().await;
        loop {
            match events.recv().await? {
                Incoming::Disconnected => return Some(EventSet::disconnect()),
                Incoming::Composite(payload) => {
                    match parse_event_packet(&payload, &self.inner.id_sizes()) {
                        Ok(set) => {
                            tracing::debug!(
                                target: "jdbg.jdwp",
                                suspend_policy = set.suspend_policy,
                                events = set.events.len(),
                                "event set received"
                            );
                            return Some(set);
                        }
                        Err(err) => {
                            tracing::warn!(target: "jdbg.jdwp", error = %err, "dropping malformed event packet");
                        }
                    }
                }
            }
        }
    }

    async fn send_command_raw(
        &self,
        command_set: u8,
        command: u8,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>> {
        if self.inner.shutdown.is_cancelled() {
            return Err(JdwpError::ConnectionClosed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending, "jdwp.pending").insert(id, tx);

        let packet = encode_command(id, command_set, command, &payload);
        {
            let mut writer = self.inner.writer.lock().await;
            if let Err(err) = writer.write_all(&packet).await {
                self.remove_pending(id);
                return Err(err.into());
            }
        }

        // A reply that raced with the connection closing still wins.
        let reply = tokio::select! {
            biased;
            res = tokio::time::timeout(self.inner.config.reply_timeout, rx) => {
                match res {
                    Ok(Ok(r)) => r,
                    Ok(Err(_closed)) => return Err(JdwpError::ConnectionClosed),
                    Err(_elapsed) => {
                        self.remove_pending(id);
                        return Err(JdwpError::Timeout);
                    }
                }
            }
            _ = self.inner.shutdown.cancelled() => {
                self.remove_pending(id);
                return Err(JdwpError::Cancelled);
            }
        }?;

        if reply.error_code != 0 {
            return Err(JdwpError::VmError(reply.error_code));
        }

        Ok(reply.payload)
    }

    fn remove_pending(&self, id: u32) {
        lock(&self.inner.pending, "jdwp.pending").remove(&id);
    }

    /// VirtualMachine.IDSizes (1, 7)
    pub async fn idsizes(&self) -> Result<JdwpIdSizes> {
        let payload = self.send_command_raw(1, 7, Vec::new()).await?;
        let mut r = JdwpReader::new(&payload);
        let sizes = JdwpIdSizes {
            field_id: r.read_u32()? as usize,
            method_id: r.read_u32()? as usize,
            object_id: r.read_u32()? as usize,
            reference_type_id: r.read_u32()? as usize,
            frame_id: r.read_u32()? as usize,
        };
        *lock(&self.inner.id_sizes, "jdwp.id_sizes") = sizes;
        Ok(sizes)
    }

    /// VirtualMachine.Resume (1, 9)
    pub async fn vm_resume(&self) -> Result<()> {
        let _ = self.send_command_raw(1, 9, Vec::new()).await?;
        Ok(())
    }

    /// VirtualMachine.Exit (1, 10)
    pub async fn vm_exit(&self, exit_code: i32) -> Result<()> {
        let mut w = JdwpWriter::new();
        w.write_i32(exit_code);
        let _ = self.send_command_raw(1, 10, w.into_vec()).await?;
        Ok(())
    }

    /// ThreadReference.Frames (11, 6)
    pub async fn frames(
        &self,
        thread: ThreadId,
        start: i32,
        length: i32,
    ) -> Result<Vec<FrameInfo>> {
        let sizes = self.inner.id_sizes();
        let mut w = JdwpWriter::new();
        w.write_object_id(thread, &sizes);
        w.write_i32(start);
        w.write_i32(length);
        let payload = self.send_command_raw(11, 6, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let count = r.read_u32()? as usize;
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            let frame_id = r.read_id(sizes.frame_id)?;
            let location = r.read_location(&sizes)?;
            frames.push(FrameInfo { frame_id, location });
        }
        Ok(frames)
    }

    /// ReferenceType.Signature (2, 1)
    pub async fn reference_type_signature(&self, class_id: ReferenceTypeId) -> Result<String> {
        let sizes = self.inner.id_sizes();
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        let payload = self.send_command_raw(2, 1, w.into_vec()).await?;
        JdwpReader::new(&payload).read_string()
    }

    /// ReferenceType.Fields (2, 4)
    pub async fn reference_type_fields(&self, class_id: ReferenceTypeId) -> Result<Vec<FieldInfo>> {
        let sizes = self.inner.id_sizes();
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        let payload = self.send_command_raw(2, 4, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let count = r.read_u32()? as usize;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            fields.push(FieldInfo {
                field_id: r.read_id(sizes.field_id)?,
                name: r.read_string()?,
                signature: r.read_string()?,
                mod_bits: r.read_u32()?,
            });
        }
        Ok(fields)
    }

    /// ReferenceType.Methods (2, 5)
    pub async fn reference_type_methods(
        &self,
        class_id: ReferenceTypeId,
    ) -> Result<Vec<MethodInfo>> {
        let sizes = self.inner.id_sizes();
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        let payload = self.send_command_raw(2, 5, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let count = r.read_u32()? as usize;
        let mut methods = Vec::with_capacity(count);
        for _ in 0..count {
            methods.push(MethodInfo {
                method_id: r.read_id(sizes.method_id)?,
                name: r.read_string()?,
                signature: r.read_string()?,
                mod_bits: r.read_u32()?,
            });
        }
        Ok(methods)
    }

    /// ClassType.Superclass (3, 1). `None` for `java.lang.Object` and interfaces.
    pub async fn class_type_superclass(
        &self,
        class_id: ReferenceTypeId,
    ) -> Result<Option<ReferenceTypeId>> {
        let sizes = self.inner.id_sizes();
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        let payload = self.send_command_raw(3, 1, w.into_vec()).await?;
        let superclass = JdwpReader::new(&payload).read_reference_type_id(&sizes)?;
        Ok((superclass != 0).then_some(superclass))
    }

    /// Method.LineTable (6, 1)
    pub async fn method_line_table(
        &self,
        class_id: ReferenceTypeId,
        method_id: MethodId,
    ) -> Result<LineTable> {
        let sizes = self.inner.id_sizes();
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        w.write_id(method_id, sizes.method_id);
        let payload = self.send_command_raw(6, 1, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let start = r.read_u64()?;
        let end = r.read_u64()?;
        let count = r.read_u32()? as usize;
        let mut lines = Vec::with_capacity(count);
        for _ in 0..count {
            lines.push(LineTableEntry {
                code_index: r.read_u64()?,
                line: r.read_i32()?,
            });
        }
        Ok(LineTable { start, end, lines })
    }

    /// Method.VariableTable (6, 2). Returns the argument count and the slots.
    pub async fn method_variable_table(
        &self,
        class_id: ReferenceTypeId,
        method_id: MethodId,
    ) -> Result<(u32, Vec<VariableInfo>)> {
        let sizes = self.inner.id_sizes();
        let mut w = JdwpWriter::new();
        w.write_reference_type_id(class_id, &sizes);
        w.write_id(method_id, sizes.method_id);
        let payload = self.send_command_raw(6, 2, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        let arg_count = r.read_u32()?;
        let count = r.read_u32()? as usize;
        let mut vars = Vec::with_capacity(count);
        for _ in 0..count {
            vars.push(VariableInfo {
                code_index: r.read_u64()?,
                name: r.read_string()?,
                signature: r.read_string()?,
                length: r.read_u32()?,
                slot: r.read_u32()?,
            });
        }
        Ok((arg_count, vars))
    }

    /// StackFrame.GetValues (16, 1)
    pub async fn stack_frame_get_values(
        &self,
        thread: ThreadId,
        frame_id: FrameId,
        slots: &[(u32, String)],
    ) -> Result<Vec<JdwpValue>> {
        let sizes = self.inner.id_sizes();
        let mut w = JdwpWriter::new();
        w.write_object_id(thread, &sizes);
        w.write_id(frame_id, sizes.frame_id);
        w.write_u32(slots.len() as u32);
        for (slot, signature) in slots {
            w.write_u32(*slot);
            w.write_u8(signature_to_tag(signature));
        }
        let payload = self.send_command_raw(16, 1, w.into_vec()).await?;
        read_tagged_values(&payload, &sizes)
    }

    /// ObjectReference.ReferenceType (9, 1)
    pub async fn object_reference_reference_type(
        &self,
        object_id: ObjectId,
    ) -> Result<ReferenceTypeId> {
        let sizes = self.inner.id_sizes();
        let mut w = JdwpWriter::new();
        w.write_object_id(object_id, &sizes);
        let payload = self.send_command_raw(9, 1, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        // The reply starts with a `refTypeTag` byte.
        let _ref_type_tag = r.read_u8()?;
        r.read_reference_type_id(&sizes)
    }

    /// ObjectReference.GetValues (9, 2)
    pub async fn object_reference_get_values(
        &self,
        object_id: ObjectId,
        field_ids: &[u64],
    ) -> Result<Vec<JdwpValue>> {
        let sizes = self.inner.id_sizes();
        let mut w = JdwpWriter::new();
        w.write_object_id(object_id, &sizes);
        w.write_u32(field_ids.len() as u32);
        for field_id in field_ids {
            w.write_id(*field_id, sizes.field_id);
        }
        let payload = self.send_command_raw(9, 2, w.into_vec()).await?;
        read_tagged_values(&payload, &sizes)
    }

    /// StringReference.Value (10, 1)
    pub async fn string_reference_value(&self, string_id: ObjectId) -> Result<String> {
        let sizes = self.inner.id_sizes();
        let mut w = JdwpWriter::new();
        w.write_object_id(string_id, &sizes);
        let payload = self.send_command_raw(10, 1, w.into_vec()).await?;
        JdwpReader::new(&payload).read_string()
    }

    /// ArrayReference.Length (13, 1)
    pub async fn array_reference_length(&self, array_id: ObjectId) -> Result<i32> {
        let sizes = self.inner.id_sizes();
        let mut w = JdwpWriter::new();
        w.write_object_id(array_id, &sizes);
        let payload = self.send_command_raw(13, 1, w.into_vec()).await?;
        JdwpReader::new(&payload).read_i32()
    }

    /// ArrayReference.GetValues (13, 2)
    pub async fn array_reference_get_values(
        &self,
        array_id: ObjectId,
        first_index: i32,
        length: i32,
    ) -> Result<Vec<JdwpValue>> {
        let sizes = self.inner.id_sizes();
        let mut w = JdwpWriter::new();
        w.write_object_id(array_id, &sizes);
        w.write_i32(first_index);
        w.write_i32(length);
        let payload = self.send_command_raw(13, 2, w.into_vec()).await?;
        let mut r = JdwpReader::new(&payload);
        // An array region holds one tag followed by the values. Primitive
        // elements are untagged; object elements carry their own tag.
        let tag = r.read_u8()?;
        let count = r.read_u32()? as usize;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let value = if is_primitive_tag(tag) {
                r.read_value(tag, &sizes)?
            } else {
                r.read_tagged_value(&sizes)?
            };
            values.push(value);
        }
        Ok(values)
    }

    /// EventRequest.Set (15, 1). Returns the request id.
    pub async fn event_request_set(
        &self,
        event_kind: u8,
        suspend_policy: u8,
        modifiers: Vec<EventModifier>,
    ) -> Result<i32> {
        let sizes = self.inner.id_sizes();
        let mut w = JdwpWriter::new();
        w.write_u8(event_kind);
        w.write_u8(suspend_policy);
        w.write_u32(modifiers.len() as u32);
        for modifier in modifiers {
            modifier.encode(&mut w, &sizes);
        }
        let payload = self.send_command_raw(15, 1, w.into_vec()).await?;
        JdwpReader::new(&payload).read_i32()
    }

    /// EventRequest.Clear (15, 2)
    pub async fn event_request_clear(&self, event_kind: u8, request_id: i32) -> Result<()> {
        let mut w = JdwpWriter::new();
        w.write_u8(event_kind);
        w.write_i32(request_id);
        let _ = self.send_command_raw(15, 2, w.into_vec()).await?;
        Ok(())
    }
}

fn is_primitive_tag(tag: u8) -> bool {
    matches!(tag, b'Z' | b'B' | b'C' | b'S' | b'I' | b'J' | b'F' | b'D')
}

fn read_tagged_values(payload: &[u8], sizes: &JdwpIdSizes) -> Result<Vec<JdwpValue>> {
    let mut r = JdwpReader::new(payload);
    let count = r.read_u32()? as usize;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(r.read_tagged_value(sizes)?);
    }
    Ok(values)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventModifier {
    ThreadOnly { thread: ThreadId },
    ClassMatch { pattern: String },
    LocationOnly { location: Location },
    Step { thread: ThreadId, size: u32, depth: u32 },
}

impl EventModifier {
    fn encode(self, w: &mut JdwpWriter, sizes: &JdwpIdSizes) {
        match self {
            EventModifier::ThreadOnly { thread } => {
                w.write_u8(EVENT_MODIFIER_KIND_THREAD_ONLY);
                w.write_object_id(thread, sizes);
            }
            EventModifier::ClassMatch { pattern } => {
                w.write_u8(EVENT_MODIFIER_KIND_CLASS_MATCH);
                w.write_string(&pattern);
            }
            EventModifier::LocationOnly { location } => {
                w.write_u8(EVENT_MODIFIER_KIND_LOCATION_ONLY);
                w.write_location(&location, sizes);
            }
            EventModifier::Step {
                thread,
                size,
                depth,
            } => {
                w.write_u8(EVENT_MODIFIER_KIND_STEP);
                w.write_object_id(thread, sizes);
                w.write_u32(size);
                w.write_u32(depth);
            }
        }
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    inner: Arc<Inner>,
    events: mpsc::UnboundedSender<Incoming>,
) {
    let mut closed_by_peer = false;

    loop {
        let mut header = [0u8; HEADER_LEN];
        let header_read = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            res = reader.read_exact(&mut header) => res,
        };
        if let Err(err) = header_read {
            closed_by_peer = err.kind() == std::io::ErrorKind::UnexpectedEof;
            if !closed_by_peer {
                tracing::warn!(target: "jdbg.jdwp", error = %err, "failed to read packet header");
            }
            break;
        }

        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if length < HEADER_LEN {
            tracing::warn!(target: "jdbg.jdwp", length, "packet shorter than its header");
            break;
        }

        let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        let flags = header[8];
        let mut payload = vec![0u8; length - HEADER_LEN];
        let payload_read = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            res = reader.read_exact(&mut payload) => res,
        };
        if let Err(err) = payload_read {
            tracing::warn!(target: "jdbg.jdwp", error = %err, "failed to read packet payload");
            break;
        }

        if (flags & FLAG_REPLY) != 0 {
            let error_code = u16::from_be_bytes([header[9], header[10]]);
            let tx = lock(&inner.pending, "jdwp.pending").remove(&id);
            if let Some(tx) = tx {
                let _ = tx.send(Ok(Reply {
                    error_code,
                    payload,
                }));
            }
            continue;
        }

        let (command_set, command) = (header[9], header[10]);
        if (command_set, command) != (EVENT_COMMAND_SET, EVENT_COMPOSITE_COMMAND) {
            // The VM sends no other commands to a debugger.
            tracing::debug!(target: "jdbg.jdwp", command_set, command, "ignoring VM command");
            continue;
        }

        let _ = events.send(Incoming::Composite(payload));
    }

    inner.shutdown.cancel();
    inner.fail_pending();

    if closed_by_peer {
        tracing::debug!(target: "jdbg.jdwp", "VM closed the connection");
        let _ = events.send(Incoming::Disconnected);
    }
}

fn parse_event_packet(payload: &[u8], sizes: &JdwpIdSizes) -> Result<EventSet> {
    let mut r = JdwpReader::new(payload);
    let suspend_policy = r.read_u8()?;
    let event_count = r.read_u32()? as usize;
    let mut events = Vec::with_capacity(event_count);
    for _ in 0..event_count {
        let kind = r.read_u8()?;
        let request_id = r.read_i32()?;
        let event = match kind {
            EVENT_KIND_SINGLE_STEP => JdwpEvent::SingleStep {
                request_id,
                thread: r.read_object_id(sizes)?,
                location: r.read_location(sizes)?,
            },
            EVENT_KIND_BREAKPOINT => JdwpEvent::Breakpoint {
                request_id,
                thread: r.read_object_id(sizes)?,
                location: r.read_location(sizes)?,
            },
            EVENT_KIND_CLASS_PREPARE => JdwpEvent::ClassPrepare {
                request_id,
                thread: r.read_object_id(sizes)?,
                ref_type_tag: r.read_u8()?,
                type_id: r.read_reference_type_id(sizes)?,
                signature: r.read_string()?,
                status: r.read_u32()?,
            },
            EVENT_KIND_VM_START => JdwpEvent::VmStart {
                request_id,
                thread: r.read_object_id(sizes)?,
            },
            EVENT_KIND_VM_DEATH => JdwpEvent::VmDeath,
            _ => {
                // Unknown layout: the rest of this packet cannot be decoded.
                tracing::debug!(target: "jdbg.jdwp", kind, "unsupported event kind");
                break;
            }
        };
        events.push(event);
    }
    Ok(EventSet {
        suspend_policy,
        events,
    })
}
