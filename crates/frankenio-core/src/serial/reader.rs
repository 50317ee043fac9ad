//! Object input stream.
//!
//! Decodes what [`ObjectOutputStream`](crate::serial::writer::ObjectOutputStream)
//! produces. Handles are assigned in the writer's order; objects get their
//! handle before their contents are read so cyclic graphs resolve. Classes
//! without a registered binding are decoded from their stream descriptor
//! alone, and any custom data they carry is captured verbatim.
//!
//! A protocol failure at the top level abandons the stream: values read
//! before it stay valid, later reads fail.

use std::sync::Arc;

use serde_json::json;

use crate::error::{IoError, Result};
use crate::io::data::{DataInput, decode_modified_utf8};
use crate::io::traits::ByteSource;
use crate::serial::block::BlockDataInput;
use crate::serial::constants::*;
use crate::serial::desc::ClassDesc;
use crate::serial::field::{ObjectStreamField, TypeCode};
use crate::serial::handles::ReadHandles;
use crate::serial::registry::TypeRegistry;
use crate::serial::value::{
    ArrayData, ArrayObject, Content, EnumConstant, Instance, Value, decode_primitive,
};
use crate::trace;

const COMPONENT: &str = "object_input";

/// Upper bound on proxy interface counts.
const MAX_PROXY_INTERFACES: i32 = 65535;

/// Bytes decoded per step when reading primitive arrays and long strings,
/// so a corrupt length cannot force one huge allocation.
const CHUNK: usize = 8192;

pub struct ObjectInputStream<S> {
    bin: BlockDataInput<S>,
    handles: ReadHandles,
    registry: Arc<TypeRegistry>,
    /// The current hook has consumed its class's default fields and the
    /// writer emitted no custom data after them.
    default_data_end: bool,
    failed: Option<String>,
    closed: bool,
}

impl<S: ByteSource> ObjectInputStream<S> {
    /// Read and verify the stream header.
    pub fn new(src: S) -> Result<Self> {
        Self::with_registry(src, Arc::new(TypeRegistry::new()))
    }

    pub fn with_registry(src: S, registry: Arc<TypeRegistry>) -> Result<Self> {
        let mut bin = BlockDataInput::new(src);
        let magic = bin.read_unsigned_short()?;
        let version = bin.read_unsigned_short()?;
        if magic != STREAM_MAGIC || version != STREAM_VERSION {
            let err = IoError::StreamCorrupted(format!(
                "invalid stream header: {magic:04X}{version:04X}"
            ));
            trace::error(COMPONENT, "header", &err);
            return Err(err);
        }
        bin.set_block_mode(true)?;
        Ok(Self {
            bin,
            handles: ReadHandles::new(),
            registry,
            default_data_end: false,
            failed: None,
            closed: false,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Handles assigned since the start of the stream or the last reset.
    #[must_use]
    pub fn handles_assigned(&self) -> usize {
        self.handles.len()
    }

    pub fn read_object(&mut self) -> Result<Value> {
        self.ensure_usable()?;
        let result = self.read_object0(false);
        self.note_failure(result)
    }

    /// Read an object that must not be referenced again by later handles.
    pub fn read_unshared(&mut self) -> Result<Value> {
        self.ensure_usable()?;
        let result = self.read_object0(true);
        self.note_failure(result)
    }

    /// Next top-level item: a block-data record, a reset or an object.
    /// `None` at a clean end of stream.
    pub fn read_content(&mut self) -> Result<Option<Content>> {
        self.ensure_usable()?;
        let result = self.read_content0();
        self.note_failure(result)
    }

    /// Bytes left in the current block-data record.
    #[must_use]
    pub fn available(&self) -> usize {
        self.bin.current_block_remaining()
    }

    /// Close the source. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.bin.source_mut().close()
    }

    #[must_use]
    pub fn get_ref(&self) -> &S {
        self.bin.source()
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.closed {
            return Err(IoError::Closed);
        }
        match &self.failed {
            Some(first) => Err(IoError::StreamCorrupted(format!(
                "stream abandoned after earlier failure: {first}"
            ))),
            None => Ok(()),
        }
    }

    fn note_failure<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_protocol() && !matches!(e.root(), IoError::WriteAborted(_)) {
                trace::error(COMPONENT, "protocol_error", e);
                self.failed = Some(e.to_string());
            }
        }
        result
    }

    fn read_content0(&mut self) -> Result<Option<Content>> {
        if self.bin.take_reset() {
            self.handle_reset()?;
            return Ok(Some(Content::Reset));
        }
        if self.bin.current_block_remaining() > 0 {
            return self.bin.take_block_remainder().map(|b| Some(Content::Block(b)));
        }
        self.bin.set_block_mode(false)?;
        let item = self.read_top_item();
        let restored = self.bin.set_block_mode(true);
        let item = item?;
        restored?;
        Ok(item)
    }

    fn read_top_item(&mut self) -> Result<Option<Content>> {
        Ok(match self.bin.peek_byte()? {
            None => None,
            Some(TC_RESET) => {
                self.bin.read_tag()?;
                self.handle_reset()?;
                Some(Content::Reset)
            }
            Some(TC_BLOCKDATA | TC_BLOCKDATALONG) => Some(Content::Block(self.bin.read_block()?)),
            Some(_) => Some(Content::Object(self.read_object0(false)?)),
        })
    }

    fn handle_reset(&mut self) -> Result<()> {
        if self.bin.depth > 0 {
            return Err(IoError::StreamCorrupted(format!(
                "unexpected reset; recursion depth: {}",
                self.bin.depth
            )));
        }
        let dropped = self.handles.len();
        self.handles.clear();
        trace::debug(COMPONENT, "reset", json!({ "handles": dropped }));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Object dispatch
    // -----------------------------------------------------------------------

    fn read_object0(&mut self, unshared: bool) -> Result<Value> {
        if self.bin.take_reset() {
            self.handle_reset()?;
        }
        let old_mode = self.bin.block_mode();
        if old_mode {
            let remain = self.bin.current_block_remaining();
            if remain > 0 {
                return Err(IoError::OptionalData {
                    length: remain,
                    eof: false,
                });
            }
            if self.default_data_end {
                return Err(IoError::OptionalData {
                    length: 0,
                    eof: true,
                });
            }
            self.bin.set_block_mode(false)?;
        }
        let result = self.read_tagged(unshared, old_mode);
        let restored = self.bin.set_block_mode(old_mode);
        let value = result?;
        restored?;
        Ok(value)
    }

    fn read_tagged(&mut self, unshared: bool, old_mode: bool) -> Result<Value> {
        let tc = loop {
            match self.bin.peek_byte()? {
                None => return Err(IoError::UnexpectedEof),
                Some(TC_RESET) => {
                    self.bin.read_tag()?;
                    self.handle_reset()?;
                }
                Some(tc) => break tc,
            }
        };
        self.bin.depth += 1;
        let result = self.dispatch(tc, unshared, old_mode);
        self.bin.depth -= 1;
        result
    }

    fn dispatch(&mut self, tc: u8, unshared: bool, old_mode: bool) -> Result<Value> {
        match tc {
            TC_NULL => {
                self.bin.read_tag()?;
                Ok(Value::Null)
            }
            TC_REFERENCE => self.read_handle(unshared),
            TC_CLASS => self.read_class(unshared),
            TC_CLASSDESC | TC_PROXYCLASSDESC => {
                let desc = self.required_class_desc(unshared)?;
                Ok(Value::ClassDesc(desc))
            }
            TC_STRING | TC_LONGSTRING => self.read_string(unshared).map(Value::String),
            TC_ARRAY => self.read_array(unshared),
            TC_ENUM => self.read_enum(unshared),
            TC_OBJECT => self.read_ordinary_object(unshared),
            TC_EXCEPTION => {
                let exception = self.read_fatal_exception()?;
                Err(IoError::WriteAborted(Box::new(exception)))
            }
            TC_BLOCKDATA | TC_BLOCKDATALONG if old_mode => {
                self.bin.set_block_mode(true)?;
                let length = self.bin.fill()?;
                Err(IoError::OptionalData { length, eof: false })
            }
            TC_BLOCKDATA | TC_BLOCKDATALONG => {
                Err(IoError::StreamCorrupted("unexpected block data".into()))
            }
            TC_ENDBLOCKDATA if old_mode => Err(IoError::OptionalData {
                length: 0,
                eof: true,
            }),
            TC_ENDBLOCKDATA => Err(IoError::StreamCorrupted(
                "unexpected end of block data".into(),
            )),
            other => Err(invalid_tag(other)),
        }
    }

    fn read_handle(&mut self, unshared: bool) -> Result<Value> {
        self.bin.read_tag()?;
        if unshared {
            return Err(IoError::InvalidObject(
                "cannot read back reference as unshared".into(),
            ));
        }
        let handle = self.bin.read_int()?;
        self.handles.lookup(handle)
    }

    fn read_string(&mut self, unshared: bool) -> Result<Arc<str>> {
        let text: Arc<str> = match self.bin.read_tag()? {
            TC_STRING => Arc::from(self.bin.read_utf()?),
            TC_LONGSTRING => {
                let len = self.bin.read_long()?;
                let len = u64::try_from(len).map_err(|_| {
                    IoError::StreamCorrupted(format!("invalid long string length: {len}"))
                })?;
                Arc::from(self.read_long_utf_body(len)?)
            }
            other => return Err(invalid_tag(other)),
        };
        self.handles.assign(Value::String(Arc::clone(&text)), unshared);
        Ok(text)
    }

    fn read_long_utf_body(&mut self, len: u64) -> Result<String> {
        let mut bytes = Vec::new();
        let mut left = len;
        while left > 0 {
            let n = left.min(CHUNK as u64) as usize;
            let start = bytes.len();
            bytes.resize(start + n, 0);
            self.bin.read_fully(&mut bytes[start..])?;
            left -= n as u64;
        }
        decode_modified_utf8(&bytes)
    }

    /// Field type signature: a string or a reference to one.
    fn read_type_string(&mut self) -> Result<Option<Arc<str>>> {
        match self.bin.peek_byte()? {
            Some(TC_NULL) => {
                self.bin.read_tag()?;
                Ok(None)
            }
            Some(TC_REFERENCE) => match self.read_handle(false)? {
                Value::String(s) => Ok(Some(s)),
                other => Err(IoError::StreamCorrupted(format!(
                    "type string handle refers to a {}",
                    other.kind_name()
                ))),
            },
            Some(TC_STRING | TC_LONGSTRING) => self.read_string(false).map(Some),
            Some(other) => Err(invalid_tag(other)),
            None => Err(IoError::UnexpectedEof),
        }
    }

    fn read_class(&mut self, unshared: bool) -> Result<Value> {
        self.bin.read_tag()?;
        let desc = self.required_class_desc(false)?;
        let v = Value::Class(desc);
        self.handles.assign(v.clone(), unshared);
        Ok(v)
    }

    fn read_fatal_exception(&mut self) -> Result<Value> {
        self.bin.read_tag()?;
        self.handles.clear();
        let exception = self.read_object0(false)?;
        self.handles.clear();
        trace::info(
            COMPONENT,
            "write_aborted",
            json!({ "exception": exception.kind_name() }),
        );
        Ok(exception)
    }

    // -----------------------------------------------------------------------
    // Class descriptors
    // -----------------------------------------------------------------------

    fn read_class_desc(&mut self, unshared: bool) -> Result<Option<Arc<ClassDesc>>> {
        match self.bin.peek_byte()? {
            Some(TC_NULL) => {
                self.bin.read_tag()?;
                Ok(None)
            }
            Some(TC_REFERENCE) => match self.read_handle(unshared)? {
                Value::ClassDesc(d) => Ok(Some(d)),
                other => Err(IoError::StreamCorrupted(format!(
                    "expected class descriptor, found {}",
                    other.kind_name()
                ))),
            },
            Some(TC_PROXYCLASSDESC) => self.read_proxy_desc(unshared).map(Some),
            Some(TC_CLASSDESC) => self.read_non_proxy_desc(unshared).map(Some),
            Some(other) => Err(invalid_tag(other)),
            None => Err(IoError::UnexpectedEof),
        }
    }

    fn required_class_desc(&mut self, unshared: bool) -> Result<Arc<ClassDesc>> {
        self.read_class_desc(unshared)?
            .ok_or_else(|| IoError::StreamCorrupted("missing class descriptor".into()))
    }

    fn read_non_proxy_desc(&mut self, unshared: bool) -> Result<Arc<ClassDesc>> {
        self.bin.read_tag()?;
        let handle = self.handles.reserve(unshared);
        let name = self.bin.read_utf()?;
        let suid = self.bin.read_long()?;
        let flags = self.bin.read_unsigned_byte()?;
        let count = self.bin.read_short()?;
        if count < 0 {
            return Err(IoError::invalid_class(
                name,
                format!("invalid field count: {count}"),
            ));
        }
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let code = self.bin.read_unsigned_byte()?;
            let field_name = self.bin.read_utf()?;
            let signature = if code == b'L' || code == b'[' {
                self.read_type_string()?
            } else {
                None
            };
            let field = ObjectStreamField::from_wire(code, &field_name, signature).ok_or_else(
                || IoError::invalid_class(name.as_str(), format!("invalid descriptor for field {field_name}")),
            )?;
            fields.push(field);
        }
        let annotations = self.read_custom_data()?;
        let super_desc = self.read_class_desc(false)?;
        let desc = ClassDesc::from_wire(&name, suid, flags, fields, super_desc, annotations)?;
        self.registry.validate(&desc)?;
        self.handles.finish(handle, Value::ClassDesc(Arc::clone(&desc)));
        trace::debug(
            COMPONENT,
            "class_desc",
            json!({ "class": desc.name(), "suid": suid, "flags": flags }),
        );
        Ok(desc)
    }

    fn read_proxy_desc(&mut self, unshared: bool) -> Result<Arc<ClassDesc>> {
        self.bin.read_tag()?;
        let handle = self.handles.reserve(unshared);
        let count = self.bin.read_int()?;
        if !(0..=MAX_PROXY_INTERFACES).contains(&count) {
            return Err(IoError::InvalidObject(format!(
                "interface limit exceeded: {count}"
            )));
        }
        let mut interfaces = Vec::with_capacity(count as usize);
        for _ in 0..count {
            interfaces.push(Arc::from(self.bin.read_utf()?));
        }
        let annotations = self.read_custom_data()?;
        let super_desc = self.read_class_desc(false)?;
        let desc = ClassDesc::proxy_from_wire(interfaces, super_desc, annotations);
        self.handles.finish(handle, Value::ClassDesc(Arc::clone(&desc)));
        Ok(desc)
    }

    /// Custom data up to and including `TC_ENDBLOCKDATA`.
    fn read_custom_data(&mut self) -> Result<Vec<Content>> {
        let mut items = Vec::new();
        loop {
            if self.bin.block_mode() {
                if self.bin.current_block_remaining() > 0 {
                    items.push(Content::Block(self.bin.take_block_remainder()?));
                }
                self.bin.set_block_mode(false)?;
            }
            match self.bin.peek_byte()? {
                None => return Err(IoError::UnexpectedEof),
                Some(TC_BLOCKDATA | TC_BLOCKDATALONG) => {
                    items.push(Content::Block(self.bin.read_block()?));
                }
                Some(TC_ENDBLOCKDATA) => {
                    self.bin.read_tag()?;
                    return Ok(items);
                }
                Some(_) => items.push(Content::Object(self.read_object0(false)?)),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Arrays and enums
    // -----------------------------------------------------------------------

    fn read_array(&mut self, unshared: bool) -> Result<Value> {
        self.bin.read_tag()?;
        let desc = self.required_class_desc(false)?;
        let len = self.bin.read_int()?;
        let len = usize::try_from(len)
            .map_err(|_| IoError::StreamCorrupted("Array length is negative".into()))?;
        let component = desc
            .component_type()
            .ok_or_else(|| IoError::invalid_class(desc.name(), "not an array class"))?;
        let array = ArrayObject::new(Arc::clone(&desc), ArrayData::empty(component))?;
        let v = Value::Array(Arc::clone(&array));
        self.handles.assign(v.clone(), unshared);
        let data = if component.is_primitive() {
            self.read_primitive_array(component, len)?
        } else {
            let mut items = Vec::with_capacity(len.min(CHUNK));
            for _ in 0..len {
                items.push(self.read_object0(false)?);
            }
            ArrayData::Object(items)
        };
        array.replace(data)?;
        Ok(v)
    }

    fn read_primitive_array(&mut self, component: TypeCode, len: usize) -> Result<ArrayData> {
        let size = component.size();
        let mut data = ArrayData::empty(component);
        let mut chunk = vec![0u8; CHUNK];
        let mut left = len;
        while left > 0 {
            let n = left.min(CHUNK / size);
            let bytes = &mut chunk[..n * size];
            self.bin.read_fully(bytes)?;
            data.extend_from_be(bytes);
            left -= n;
        }
        Ok(data)
    }

    fn read_enum(&mut self, unshared: bool) -> Result<Value> {
        self.bin.read_tag()?;
        let desc = self.required_class_desc(false)?;
        if !desc.is_enum() {
            return Err(IoError::invalid_class(desc.name(), "non-enum class"));
        }
        let handle = self.handles.reserve(unshared);
        let name = self.read_string(false)?;
        self.registry.check_enum_constant(&desc, &name)?;
        let v = Value::Enum(Arc::new(EnumConstant { desc, name }));
        self.handles.finish(handle, v.clone());
        Ok(v)
    }

    // -----------------------------------------------------------------------
    // Ordinary objects
    // -----------------------------------------------------------------------

    fn read_ordinary_object(&mut self, unshared: bool) -> Result<Value> {
        self.bin.read_tag()?;
        let desc = self.required_class_desc(false)?;
        if desc.is_array() {
            return Err(IoError::invalid_class(desc.name(), "invalid class descriptor"));
        }
        let inst = Instance::new(Arc::clone(&desc));
        let v = Value::Object(Arc::clone(&inst));
        self.handles.assign(v.clone(), unshared);
        if desc.is_externalizable() {
            self.read_external_data(&inst, &desc)?;
        } else {
            self.read_serial_data(&inst)?;
        }
        Ok(v)
    }

    fn read_external_data(&mut self, inst: &Arc<Instance>, desc: &Arc<ClassDesc>) -> Result<()> {
        let framed = desc.has_block_data();
        let hook = self.registry.read_hook(desc.name());
        if hook.is_none() && !framed {
            return Err(IoError::invalid_class(
                desc.name(),
                "unframed external data needs a registered reader",
            ));
        }
        if framed {
            self.bin.set_block_mode(true)?;
        }
        if let Some(hook) = hook {
            let mut ctx = ReadContext::new(self, Arc::clone(inst), 0, Arc::clone(desc), false);
            hook(inst, &mut ctx)?;
        }
        if framed {
            let extra = self.read_custom_data()?;
            inst.push_extra_at(0, extra);
        }
        Ok(())
    }

    fn read_serial_data(&mut self, inst: &Arc<Instance>) -> Result<()> {
        for (i, slot_desc) in inst.desc().hierarchy().iter().enumerate() {
            let hook = self.registry.read_hook(slot_desc.name());
            match hook {
                Some(hook) => {
                    self.bin.set_block_mode(true)?;
                    let mut ctx = ReadContext::new(self, Arc::clone(inst), i, Arc::clone(slot_desc), true);
                    let outcome = hook(inst, &mut ctx);
                    self.default_data_end = false;
                    outcome?;
                }
                None => {
                    let values = self.read_fields(slot_desc)?;
                    inst.set_slot_values(i, values);
                }
            }
            if slot_desc.has_write_method() {
                let extra = self.read_custom_data()?;
                inst.push_extra_at(i, extra);
            } else {
                self.bin.set_block_mode(false)?;
            }
        }
        Ok(())
    }

    /// Default field data of one class, read outside block mode.
    fn read_fields(&mut self, desc: &ClassDesc) -> Result<Vec<Value>> {
        let mut prim = vec![0u8; desc.prim_data_size()];
        self.bin.read_fully(&mut prim)?;
        let mut values = Vec::with_capacity(desc.fields().len());
        for field in desc.fields() {
            let value = if field.is_primitive() {
                decode_primitive(field.type_code, &prim, field.offset)
            } else {
                self.read_object0(field.unshared)?
            };
            values.push(value);
        }
        Ok(values)
    }
}

fn invalid_tag(tc: u8) -> IoError {
    IoError::StreamCorrupted(format!("invalid type code: {tc:02X}"))
}

impl<S: ByteSource> DataInput for ObjectInputStream<S> {
    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ensure_usable()?;
        self.bin.read_fully(buf)
    }

    fn skip_bytes(&mut self, n: usize) -> Result<usize> {
        self.ensure_usable()?;
        self.bin.skip_bytes(n)
    }
}

// ---------------------------------------------------------------------------
// Hook context
// ---------------------------------------------------------------------------

/// What a read hook may do to the stream it runs in.
pub(crate) trait ObjectSource {
    fn source_fully(&mut self, buf: &mut [u8]) -> Result<()>;
    fn source_skip(&mut self, n: usize) -> Result<usize>;
    fn source_object(&mut self, unshared: bool) -> Result<Value>;
    fn source_fields(&mut self, desc: &ClassDesc) -> Result<Vec<Value>>;
}

impl<S: ByteSource> ObjectSource for ObjectInputStream<S> {
    fn source_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        self.bin.read_fully(buf)
    }

    fn source_skip(&mut self, n: usize) -> Result<usize> {
        self.bin.skip_bytes(n)
    }

    fn source_object(&mut self, unshared: bool) -> Result<Value> {
        self.read_object0(unshared)
    }

    fn source_fields(&mut self, desc: &ClassDesc) -> Result<Vec<Value>> {
        self.bin.set_block_mode(false)?;
        let values = self.read_fields(desc)?;
        self.bin.set_block_mode(true)?;
        if !desc.has_write_method() {
            self.default_data_end = true;
        }
        Ok(values)
    }
}

/// Handed to a read hook for exactly one class of one object; the
/// counterpart of [`WriteContext`](crate::serial::writer::WriteContext).
pub struct ReadContext<'a> {
    src: &'a mut dyn ObjectSource,
    instance: Arc<Instance>,
    slot: usize,
    desc: Arc<ClassDesc>,
    fields_allowed: bool,
    fields_read: bool,
}

impl<'a> ReadContext<'a> {
    pub(crate) fn new(
        src: &'a mut dyn ObjectSource,
        instance: Arc<Instance>,
        slot: usize,
        desc: Arc<ClassDesc>,
        fields_allowed: bool,
    ) -> Self {
        Self {
            src,
            instance,
            slot,
            desc,
            fields_allowed,
            fields_read: false,
        }
    }

    /// The stream descriptor of the class whose data this hook reads.
    #[must_use]
    pub fn desc(&self) -> &Arc<ClassDesc> {
        &self.desc
    }

    #[must_use]
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    fn claim_fields(&mut self) -> Result<()> {
        if !self.fields_allowed {
            return Err(IoError::NotActive("not in call to readObject"));
        }
        if self.fields_read {
            return Err(IoError::NotActive(
                "not in call to readObject or fields already read",
            ));
        }
        self.fields_read = true;
        Ok(())
    }

    /// Read this class's default fields into the instance.
    pub fn default_read_object(&mut self) -> Result<()> {
        self.claim_fields()?;
        let values = self.src.source_fields(&self.desc)?;
        self.instance.set_slot_values(self.slot, values);
        Ok(())
    }

    /// Read this class's default fields by name. The values are stored in
    /// the instance as well.
    pub fn read_fields(&mut self) -> Result<GetField> {
        self.claim_fields()?;
        let values = self.src.source_fields(&self.desc)?;
        self.instance.set_slot_values(self.slot, values.clone());
        Ok(GetField {
            desc: Arc::clone(&self.desc),
            values,
        })
    }

    pub fn read_object(&mut self) -> Result<Value> {
        self.src.source_object(false)
    }

    pub fn read_unshared(&mut self) -> Result<Value> {
        self.src.source_object(true)
    }
}

impl DataInput for ReadContext<'_> {
    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        self.src.source_fully(buf)
    }

    fn skip_bytes(&mut self, n: usize) -> Result<usize> {
        self.src.source_skip(n)
    }
}

/// Default field values of one class, looked up by name.
#[derive(Debug, Clone)]
pub struct GetField {
    desc: Arc<ClassDesc>,
    values: Vec<Value>,
}

impl GetField {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.desc.field_index(name).map(|i| &self.values[i])
    }

    /// The stream carried no value for `name`.
    #[must_use]
    pub fn defaulted(&self, name: &str) -> bool {
        self.desc.field_index(name).is_none()
    }

    /// Value of `name`, or `default` when the stream has no such field.
    /// A value of a different primitive type is an error.
    pub fn get_or(&self, name: &str, default: impl Into<Value>) -> Result<Value> {
        let default = default.into();
        match self.get(name) {
            None => Ok(default),
            Some(v) if v.primitive_code() == default.primitive_code() => Ok(v.clone()),
            Some(v) if !v.is_primitive() && !default.is_primitive() => Ok(v.clone()),
            Some(v) => Err(IoError::IllegalArgument(format!(
                "field {name} is {}, not {}",
                v.kind_name(),
                default.kind_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::array::ByteArrayInputStream;
    use crate::io::growable::ByteArrayOutputStream;
    use crate::serial::writer::ObjectOutputStream;

    fn reader(bytes: Vec<u8>) -> Result<ObjectInputStream<ByteArrayInputStream>> {
        ObjectInputStream::new(ByteArrayInputStream::new(bytes))
    }

    fn with_header(body: &[u8]) -> Vec<u8> {
        let mut b = vec![0xAC, 0xED, 0x00, 0x05];
        b.extend_from_slice(body);
        b
    }

    #[test]
    fn bad_header() {
        let err = reader(vec![0xCA, 0xFE, 0xBA, 0xBE]).err().unwrap();
        assert_eq!(err.to_string(), "stream corrupted: invalid stream header: CAFEBABE");
    }

    #[test]
    fn string_and_reference() {
        let mut r = reader(with_header(&[0x74, 0, 2, b'h', b'i', 0x71, 0, 0x7E, 0, 0])).unwrap();
        let a = r.read_object().unwrap();
        let b = r.read_object().unwrap();
        assert_eq!(a.as_str(), Some("hi"));
        assert_eq!(a, b);
        assert!(matches!(r.read_object(), Err(IoError::UnexpectedEof)));
    }

    #[test]
    fn dangling_handle_abandons_stream() {
        let mut r = reader(with_header(&[0x71, 0, 0x7E, 0, 0x0A, 0x70])).unwrap();
        let err = r.read_object().unwrap_err();
        assert_eq!(err.to_string(), "stream corrupted: invalid handle value: 007E000A");
        let again = r.read_object().unwrap_err();
        assert!(again.to_string().contains("abandoned"));
    }

    #[test]
    fn unknown_tag() {
        let mut r = reader(with_header(&[0x6F])).unwrap();
        let err = r.read_object().unwrap_err();
        assert_eq!(err.to_string(), "stream corrupted: invalid type code: 6F");
    }

    #[test]
    fn primitive_data_before_object_is_optional_data() {
        let mut r = reader(with_header(&[0x77, 0x04, 0, 0, 0, 9, 0x70])).unwrap();
        match r.read_object() {
            Err(IoError::OptionalData { length: 4, eof: false }) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(r.read_int().unwrap(), 9);
        assert_eq!(r.read_object().unwrap(), Value::Null);
    }

    #[test]
    fn end_of_custom_data_at_top_level() {
        let mut r = reader(with_header(&[0x78])).unwrap();
        match r.read_object() {
            Err(IoError::OptionalData { length: 0, eof: true }) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn array_without_descriptor() {
        let mut r = reader(with_header(&[0x75, 0x78])).unwrap();
        let err = r.read_object().unwrap_err();
        assert_eq!(err.to_string(), "stream corrupted: invalid type code: 78");
    }

    #[test]
    fn negative_array_length() {
        let mut body = vec![0x75, 0x72, 0, 2, b'[', b'I'];
        body.extend_from_slice(&[0; 8]);
        body.extend_from_slice(&[0x02, 0, 0, 0x78, 0x70]);
        body.extend_from_slice(&(-1i32).to_be_bytes());
        let mut r = reader(with_header(&body)).unwrap();
        let err = r.read_object().unwrap_err();
        assert_eq!(err.to_string(), "stream corrupted: Array length is negative");
    }

    #[test]
    fn reset_between_objects() {
        let out = ByteArrayOutputStream::new();
        let mut w = ObjectOutputStream::new(out).unwrap();
        let s = Value::string("x");
        w.write_object(&s).unwrap();
        w.reset().unwrap();
        w.write_object(&s).unwrap();
        let bytes = w.into_inner().unwrap().into_inner();
        let mut r = reader(bytes).unwrap();
        let a = r.read_object().unwrap();
        assert_eq!(r.handles_assigned(), 1);
        let b = r.read_object().unwrap();
        assert_eq!(r.handles_assigned(), 1);
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn get_field_lookup() {
        let desc = ClassDesc::builder("P")
            .primitive("x", TypeCode::Int)
            .build()
            .unwrap();
        let g = GetField {
            desc,
            values: vec![Value::Int(4)],
        };
        assert_eq!(g.get("x"), Some(&Value::Int(4)));
        assert!(g.defaulted("y"));
        assert_eq!(g.get_or("y", 7i64).unwrap(), Value::Long(7));
        assert_eq!(g.get_or("x", 0).unwrap(), Value::Int(4));
        assert!(g.get_or("x", 0i64).is_err());
    }
}
