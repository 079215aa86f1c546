//! Typed wrappers for the JDWP commands the tracer issues.

use super::event::{kind, suspend, EventSet};
use super::packet::{IdSizes, PacketReader, PacketWriter};
use super::{
    Connection, FieldId, FrameId, JdwpError, Location, MethodId, ObjectId, ReferenceTypeId,
    RequestId, ThreadId, Value,
};
use std::collections::HashMap;
use std::time::Duration;

type Command = (u8, u8);

const VM_CLASSES_BY_SIGNATURE: Command = (1, 2);
const VM_DISPOSE: Command = (1, 6);
const VM_ID_SIZES: Command = (1, 7);
const VM_RESUME: Command = (1, 9);
const VM_EXIT: Command = (1, 10);
const RT_SIGNATURE: Command = (2, 1);
const RT_FIELDS: Command = (2, 4);
const RT_METHODS: Command = (2, 5);
const CT_SUPERCLASS: Command = (3, 1);
const METHOD_LINE_TABLE: Command = (6, 1);
const METHOD_VARIABLE_TABLE: Command = (6, 2);
const OR_REFERENCE_TYPE: Command = (9, 1);
const OR_GET_VALUES: Command = (9, 2);
const OR_INVOKE_METHOD: Command = (9, 6);
const SR_VALUE: Command = (10, 1);
const TR_FRAMES: Command = (11, 6);
const AR_LENGTH: Command = (13, 1);
const AR_GET_VALUES: Command = (13, 2);
const ER_SET: Command = (15, 1);
const ER_CLEAR: Command = (15, 2);
const SF_GET_VALUES: Command = (16, 1);
const SF_THIS_OBJECT: Command = (16, 3);

const MOD_CLASS_MATCH: u8 = 5;
const MOD_LOCATION_ONLY: u8 = 7;
const MOD_STEP: u8 = 10;

const STEP_LINE: i32 = 1;
const STEP_OVER: i32 = 1;

const INVOKE_SINGLE_THREADED: i32 = 1;

/// Access flags on fields and methods.
pub mod modifiers {
    pub const PUBLIC: u32 = 0x0001;
    pub const STATIC: u32 = 0x0008;
    pub const SYNTHETIC: u32 = 0xf000_0000;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub id: MethodId,
    pub name: String,
    pub signature: String,
    pub mod_bits: u32,
}

impl MethodInfo {
    pub fn is_static(&self) -> bool {
        self.mod_bits & modifiers::STATIC != 0
    }

    /// Instance method taking no arguments and returning a value.
    pub fn is_nullary_getter(&self) -> bool {
        !self.is_static()
            && self.mod_bits & modifiers::SYNTHETIC == 0
            && !self.name.starts_with('<')
            && self.signature.starts_with("()")
            && !self.signature.ends_with(")V")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub id: FieldId,
    pub name: String,
    pub signature: String,
    pub mod_bits: u32,
}

impl FieldInfo {
    pub fn is_static(&self) -> bool {
        self.mod_bits & modifiers::STATIC != 0
    }

    pub fn is_public(&self) -> bool {
        self.mod_bits & modifiers::PUBLIC != 0
    }

    pub fn is_synthetic(&self) -> bool {
        self.mod_bits & modifiers::SYNTHETIC != 0 || self.name.starts_with("this$")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    pub code_index: u64,
    pub line: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineTable {
    pub start: i64,
    pub end: i64,
    pub lines: Vec<LineEntry>,
}

impl LineTable {
    /// Source line for a code index: the entry with the greatest start at or before it.
    pub fn line_at(&self, index: u64) -> Option<u32> {
        self.lines
            .iter()
            .filter(|e| e.code_index <= index)
            .max_by_key(|e| e.code_index)
            .map(|e| e.line)
    }

    /// Lowest code index that maps to a source line.
    pub fn first_index(&self) -> Option<u64> {
        self.lines.iter().map(|e| e.code_index).min()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableInfo {
    pub code_index: u64,
    pub name: String,
    pub signature: String,
    pub length: u32,
    pub slot: i32,
}

impl VariableInfo {
    pub fn is_visible_at(&self, index: u64) -> bool {
        self.code_index <= index && index < self.code_index + u64::from(self.length)
    }
}

/// A connected subject VM with per-type metadata caches.
pub struct Vm {
    conn: Connection,
    sizes: IdSizes,
    type_names: HashMap<ReferenceTypeId, String>,
    methods: HashMap<ReferenceTypeId, Vec<MethodInfo>>,
    fields: HashMap<ReferenceTypeId, Vec<FieldInfo>>,
    superclasses: HashMap<ReferenceTypeId, Option<ReferenceTypeId>>,
    line_tables: HashMap<(ReferenceTypeId, MethodId), LineTable>,
    variable_tables: HashMap<(ReferenceTypeId, MethodId), Vec<VariableInfo>>,
}

impl Vm {
    /// Wrap a handshaken connection and negotiate identifier sizes.
    pub fn new(conn: Connection) -> Result<Self, JdwpError> {
        let mut vm = Self {
            conn,
            sizes: IdSizes::default(),
            type_names: HashMap::new(),
            methods: HashMap::new(),
            fields: HashMap::new(),
            superclasses: HashMap::new(),
            line_tables: HashMap::new(),
            variable_tables: HashMap::new(),
        };
        vm.sizes = vm.id_sizes()?;
        tracing::debug!("Negotiated JDWP id sizes: {:?}", vm.sizes);
        Ok(vm)
    }

    pub fn sizes(&self) -> IdSizes {
        self.sizes
    }

    fn writer(&self) -> PacketWriter {
        PacketWriter::new(self.sizes)
    }

    fn send(&mut self, (set, cmd): Command, data: Vec<u8>) -> Result<Vec<u8>, JdwpError> {
        self.conn.command(set, cmd, data)
    }

    fn id_sizes(&mut self) -> Result<IdSizes, JdwpError> {
        let data = self.send(VM_ID_SIZES, Vec::new())?;
        let mut r = PacketReader::new(&data, self.sizes);
        let mut size = || -> Result<usize, JdwpError> { r.count() };
        Ok(IdSizes {
            field: size()?,
            method: size()?,
            object: size()?,
            reference_type: size()?,
            frame: size()?,
        })
    }

    /// Loaded reference types matching a JNI signature.
    pub fn classes_by_signature(
        &mut self,
        signature: &str,
    ) -> Result<Vec<(u8, ReferenceTypeId)>, JdwpError> {
        let data = self.send(VM_CLASSES_BY_SIGNATURE, self.writer().string(signature).finish())?;
        let mut r = PacketReader::new(&data, self.sizes);
        let count = r.list_len()?;
        let mut classes = Vec::with_capacity(count);
        for _ in 0..count {
            let tag = r.u8()?;
            let id = r.reference_type_id()?;
            let _status = r.i32()?;
            classes.push((tag, id));
        }
        Ok(classes)
    }

    /// Fully qualified Java name of a reference type.
    pub fn type_name(&mut self, type_id: ReferenceTypeId) -> Result<String, JdwpError> {
        if let Some(name) = self.type_names.get(&type_id) {
            return Ok(name.clone());
        }
        let data = self.send(RT_SIGNATURE, self.writer().reference_type_id(type_id).finish())?;
        let signature = PacketReader::new(&data, self.sizes).string()?;
        let name = super::signature_to_name(&signature);
        self.type_names.insert(type_id, name.clone());
        Ok(name)
    }

    /// Methods declared directly by a type (not inherited ones).
    pub fn methods(&mut self, type_id: ReferenceTypeId) -> Result<Vec<MethodInfo>, JdwpError> {
        if let Some(methods) = self.methods.get(&type_id) {
            return Ok(methods.clone());
        }
        let data = self.send(RT_METHODS, self.writer().reference_type_id(type_id).finish())?;
        let mut r = PacketReader::new(&data, self.sizes);
        let count = r.list_len()?;
        let mut methods = Vec::with_capacity(count);
        for _ in 0..count {
            methods.push(MethodInfo {
                id: r.method_id()?,
                name: r.string()?,
                signature: r.string()?,
                mod_bits: r.i32()? as u32,
            });
        }
        self.methods.insert(type_id, methods.clone());
        Ok(methods)
    }

    /// Fields declared directly by a type (not inherited ones).
    pub fn fields(&mut self, type_id: ReferenceTypeId) -> Result<Vec<FieldInfo>, JdwpError> {
        if let Some(fields) = self.fields.get(&type_id) {
            return Ok(fields.clone());
        }
        let data = self.send(RT_FIELDS, self.writer().reference_type_id(type_id).finish())?;
        let mut r = PacketReader::new(&data, self.sizes);
        let count = r.list_len()?;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            fields.push(FieldInfo {
                id: r.field_id()?,
                name: r.string()?,
                signature: r.string()?,
                mod_bits: r.i32()? as u32,
            });
        }
        self.fields.insert(type_id, fields.clone());
        Ok(fields)
    }

    pub fn superclass(
        &mut self,
        class: ReferenceTypeId,
    ) -> Result<Option<ReferenceTypeId>, JdwpError> {
        if let Some(parent) = self.superclasses.get(&class) {
            return Ok(*parent);
        }
        let data = self.send(CT_SUPERCLASS, self.writer().reference_type_id(class).finish())?;
        let id = PacketReader::new(&data, self.sizes).reference_type_id()?;
        let parent = (id != 0).then_some(id);
        self.superclasses.insert(class, parent);
        Ok(parent)
    }

    /// The class followed by each of its superclasses, most derived first.
    pub fn class_chain(&mut self, class: ReferenceTypeId) -> Result<Vec<ReferenceTypeId>, JdwpError> {
        let mut chain = vec![class];
        let mut current = class;
        while let Some(parent) = self.superclass(current)? {
            chain.push(parent);
            current = parent;
        }
        Ok(chain)
    }

    pub fn line_table(
        &mut self,
        type_id: ReferenceTypeId,
        method: MethodId,
    ) -> Result<LineTable, JdwpError> {
        if let Some(table) = self.line_tables.get(&(type_id, method)) {
            return Ok(table.clone());
        }
        let payload = self
            .writer()
            .reference_type_id(type_id)
            .method_id(method)
            .finish();
        let data = self.send(METHOD_LINE_TABLE, payload)?;
        let mut r = PacketReader::new(&data, self.sizes);
        let start = r.i64()?;
        let end = r.i64()?;
        let count = r.list_len()?;
        let mut lines = Vec::with_capacity(count);
        for _ in 0..count {
            let code_index = r.u64()?;
            let line = r.i32()?;
            if let Ok(line) = u32::try_from(line) {
                lines.push(LineEntry { code_index, line });
            }
        }
        let table = LineTable { start, end, lines };
        self.line_tables.insert((type_id, method), table.clone());
        Ok(table)
    }

    pub fn variable_table(
        &mut self,
        type_id: ReferenceTypeId,
        method: MethodId,
    ) -> Result<Vec<VariableInfo>, JdwpError> {
        if let Some(vars) = self.variable_tables.get(&(type_id, method)) {
            return Ok(vars.clone());
        }
        let payload = self
            .writer()
            .reference_type_id(type_id)
            .method_id(method)
            .finish();
        let data = self.send(METHOD_VARIABLE_TABLE, payload)?;
        let mut r = PacketReader::new(&data, self.sizes);
        let _arg_count = r.i32()?;
        let count = r.list_len()?;
        let mut vars = Vec::with_capacity(count);
        for _ in 0..count {
            vars.push(VariableInfo {
                code_index: r.u64()?,
                name: r.string()?,
                signature: r.string()?,
                length: r.i32()? as u32,
                slot: r.i32()?,
            });
        }
        self.variable_tables.insert((type_id, method), vars.clone());
        Ok(vars)
    }

    pub fn frames(
        &mut self,
        thread: ThreadId,
        start: i32,
        length: i32,
    ) -> Result<Vec<(FrameId, Location)>, JdwpError> {
        let payload = self
            .writer()
            .object_id(thread)
            .i32(start)
            .i32(length)
            .finish();
        let data = self.send(TR_FRAMES, payload)?;
        let mut r = PacketReader::new(&data, self.sizes);
        let count = r.list_len()?;
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            let frame = r.frame_id()?;
            frames.push((frame, r.location()?));
        }
        Ok(frames)
    }

    /// Values of local variable slots; each slot is paired with its signature tag byte.
    pub fn frame_values(
        &mut self,
        thread: ThreadId,
        frame: FrameId,
        slots: &[(i32, u8)],
    ) -> Result<Vec<Value>, JdwpError> {
        let mut w = self
            .writer()
            .object_id(thread)
            .frame_id(frame)
            .i32(slots.len() as i32);
        for (slot, sig) in slots {
            w = w.i32(*slot).u8(*sig);
        }
        let data = self.send(SF_GET_VALUES, w.finish())?;
        let mut r = PacketReader::new(&data, self.sizes);
        let count = r.list_len()?;
        (0..count).map(|_| r.tagged_value()).collect()
    }

    pub fn this_object(
        &mut self,
        thread: ThreadId,
        frame: FrameId,
    ) -> Result<Option<ObjectId>, JdwpError> {
        let payload = self.writer().object_id(thread).frame_id(frame).finish();
        let data = self.send(SF_THIS_OBJECT, payload)?;
        let mut r = PacketReader::new(&data, self.sizes);
        let _tag = r.u8()?;
        let id = r.object_id()?;
        Ok((id != 0).then_some(id))
    }

    pub fn object_type(&mut self, object: ObjectId) -> Result<ReferenceTypeId, JdwpError> {
        let data = self.send(OR_REFERENCE_TYPE, self.writer().object_id(object).finish())?;
        let mut r = PacketReader::new(&data, self.sizes);
        let _tag = r.u8()?;
        r.reference_type_id()
    }

    pub fn object_field_values(
        &mut self,
        object: ObjectId,
        fields: &[FieldId],
    ) -> Result<Vec<Value>, JdwpError> {
        let mut w = self.writer().object_id(object).i32(fields.len() as i32);
        for field in fields {
            w = w.field_id(*field);
        }
        let data = self.send(OR_GET_VALUES, w.finish())?;
        let mut r = PacketReader::new(&data, self.sizes);
        let count = r.list_len()?;
        (0..count).map(|_| r.tagged_value()).collect()
    }

    pub fn string_value(&mut self, object: ObjectId) -> Result<String, JdwpError> {
        let data = self.send(SR_VALUE, self.writer().object_id(object).finish())?;
        PacketReader::new(&data, self.sizes).string()
    }

    /// All elements of an array.
    pub fn array_values(&mut self, array: ObjectId) -> Result<Vec<Value>, JdwpError> {
        let data = self.send(AR_LENGTH, self.writer().object_id(array).finish())?;
        let length = PacketReader::new(&data, self.sizes).i32()?;
        if length <= 0 {
            return Ok(Vec::new());
        }

        let payload = self.writer().object_id(array).i32(0).i32(length).finish();
        let data = self.send(AR_GET_VALUES, payload)?;
        let mut r = PacketReader::new(&data, self.sizes);
        let element_tag = r.u8()?;
        let count = r.list_len()?;
        if super::tag::is_object(element_tag) {
            (0..count).map(|_| r.tagged_value()).collect()
        } else {
            (0..count).map(|_| r.untagged_value(element_tag)).collect()
        }
    }

    /// Invoke a zero-argument instance method with only `thread` resumed.
    pub fn invoke_method(
        &mut self,
        object: ObjectId,
        thread: ThreadId,
        class: ReferenceTypeId,
        method: MethodId,
    ) -> Result<Value, JdwpError> {
        let payload = self
            .writer()
            .object_id(object)
            .object_id(thread)
            .reference_type_id(class)
            .method_id(method)
            .i32(0)
            .i32(INVOKE_SINGLE_THREADED)
            .finish();
        let data = self.send(OR_INVOKE_METHOD, payload)?;
        let mut r = PacketReader::new(&data, self.sizes);
        let value = r.tagged_value()?;
        let _tag = r.u8()?;
        if r.object_id()? != 0 {
            return Err(JdwpError::InvocationException);
        }
        Ok(value)
    }

    /// Request a class-prepare event for classes matching `pattern`.
    pub fn set_class_prepare(&mut self, pattern: &str) -> Result<RequestId, JdwpError> {
        let payload = self
            .writer()
            .u8(kind::CLASS_PREPARE)
            .u8(suspend::ALL)
            .i32(1)
            .u8(MOD_CLASS_MATCH)
            .string(pattern)
            .finish();
        self.set_request(payload)
    }

    pub fn set_breakpoint(&mut self, location: &Location) -> Result<RequestId, JdwpError> {
        let payload = self
            .writer()
            .u8(kind::BREAKPOINT)
            .u8(suspend::ALL)
            .i32(1)
            .u8(MOD_LOCATION_ONLY)
            .location(location)
            .finish();
        self.set_request(payload)
    }

    /// Line-granularity step-over on `thread`.
    pub fn set_step(&mut self, thread: ThreadId) -> Result<RequestId, JdwpError> {
        let payload = self
            .writer()
            .u8(kind::SINGLE_STEP)
            .u8(suspend::ALL)
            .i32(1)
            .u8(MOD_STEP)
            .object_id(thread)
            .i32(STEP_LINE)
            .i32(STEP_OVER)
            .finish();
        self.set_request(payload)
    }

    fn set_request(&mut self, payload: Vec<u8>) -> Result<RequestId, JdwpError> {
        let data = self.send(ER_SET, payload)?;
        PacketReader::new(&data, self.sizes).i32()
    }

    pub fn clear_request(&mut self, event_kind: u8, request: RequestId) -> Result<(), JdwpError> {
        let payload = self.writer().u8(event_kind).i32(request).finish();
        self.send(ER_CLEAR, payload)?;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), JdwpError> {
        self.send(VM_RESUME, Vec::new())?;
        Ok(())
    }

    pub fn exit(&mut self, code: i32) -> Result<(), JdwpError> {
        self.send(VM_EXIT, self.writer().i32(code).finish())?;
        Ok(())
    }

    pub fn dispose(&mut self) -> Result<(), JdwpError> {
        self.send(VM_DISPOSE, Vec::new())?;
        Ok(())
    }

    /// Wait up to `poll` for the next event set.
    pub fn next_event_set(&mut self, poll: Duration) -> Result<Option<EventSet>, JdwpError> {
        match self.conn.next_event(poll)? {
            Some(packet) => EventSet::decode(&packet, self.sizes).map(Some),
            None => Ok(None),
        }
    }

    pub fn shutdown(&self) {
        self.conn.shutdown();
    }
}
