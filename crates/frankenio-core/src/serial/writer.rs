//! Object output stream.
//!
//! Encodes object graphs as tagged records. Primitive data written
//! between objects is packed into block-data records; objects switch the
//! underlying framing off, write their tag and body, and switch it back.
//! Every referenceable value is assigned a handle on first write; later
//! writes of the same `Arc` emit a back reference instead.

use std::sync::Arc;

use serde_json::json;

use crate::error::{IoError, Result};
use crate::io::data::{DataOutput, MAX_UTF_LENGTH, utf_length};
use crate::io::filter::flush_then_close;
use crate::io::traits::ByteSink;
use crate::serial::block::BlockDataOutput;
use crate::serial::constants::*;
use crate::serial::desc::ClassDesc;
use crate::serial::handles::WriteHandles;
use crate::serial::registry::TypeRegistry;
use crate::serial::value::{
    ArrayData, ArrayObject, Content, EnumConstant, Instance, Value, encode_primitive,
};
use crate::trace;

const COMPONENT: &str = "object_output";

pub struct ObjectOutputStream<S> {
    out: BlockDataOutput<S>,
    handles: WriteHandles,
    registry: Arc<TypeRegistry>,
    protocol: u8,
    depth: usize,
    closed: bool,
}

impl<S: ByteSink> ObjectOutputStream<S> {
    /// Write the stream header and enter block-data mode.
    pub fn new(sink: S) -> Result<Self> {
        Self::with_registry(sink, Arc::new(TypeRegistry::new()))
    }

    pub fn with_registry(sink: S, registry: Arc<TypeRegistry>) -> Result<Self> {
        let mut out = BlockDataOutput::new(sink);
        out.write_short(STREAM_MAGIC as i16)?;
        out.write_short(STREAM_VERSION as i16)?;
        out.set_block_mode(true)?;
        Ok(Self {
            out,
            handles: WriteHandles::new(),
            registry,
            protocol: PROTOCOL_VERSION_2,
            depth: 0,
            closed: false,
        })
    }

    /// Select the externalizable data framing. Only allowed before any
    /// handle has been assigned.
    pub fn use_protocol_version(&mut self, version: u8) -> Result<()> {
        if !self.handles.is_empty() {
            return Err(IoError::IllegalState("stream non-empty"));
        }
        match version {
            PROTOCOL_VERSION_1 | PROTOCOL_VERSION_2 => {
                self.protocol = version;
                Ok(())
            }
            other => Err(IoError::IllegalArgument(format!(
                "unknown version: {other}"
            ))),
        }
    }

    #[must_use]
    pub fn protocol_version(&self) -> u8 {
        self.protocol
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Handles assigned since the start of the stream or the last reset.
    #[must_use]
    pub fn handles_assigned(&self) -> u32 {
        self.handles.len()
    }

    pub fn write_object(&mut self, v: &Value) -> Result<()> {
        self.write_top(v, false)
    }

    /// Write `v` as a fresh object that later writes never refer back to.
    pub fn write_unshared(&mut self, v: &Value) -> Result<()> {
        self.write_top(v, true)
    }

    fn write_top(&mut self, v: &Value, unshared: bool) -> Result<()> {
        self.ensure_open()?;
        let result = self.write_object0(v, unshared);
        if let Err(e) = &result {
            trace::error(COMPONENT, "write_object", e);
        }
        result
    }

    /// Replay one top-level item captured by a reader.
    pub fn write_content(&mut self, item: &Content) -> Result<()> {
        match item {
            Content::Block(bytes) => {
                self.ensure_open()?;
                self.out.write_block_exact(bytes)
            }
            Content::Object(v) => self.write_object(v),
            Content::Reset => self.reset(),
        }
    }

    /// Forget every handle; the reader does the same when it meets the
    /// emitted `TC_RESET`.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.depth != 0 {
            return Err(IoError::IllegalState("stream active"));
        }
        let old = self.out.set_block_mode(false)?;
        self.out.write_tag(TC_RESET)?;
        let dropped = self.handles.len();
        self.handles.clear();
        self.out.set_block_mode(old)?;
        trace::debug(COMPONENT, "reset", json!({ "handles": dropped }));
        Ok(())
    }

    /// Record that writing failed: clear the handles, emit `TC_EXCEPTION`
    /// followed by `exception`, and clear again.
    pub fn abort_with(&mut self, exception: &Value) -> Result<()> {
        self.ensure_open()?;
        self.handles.clear();
        let old = self.out.set_block_mode(false)?;
        self.out.write_tag(TC_EXCEPTION)?;
        let written = self.write_object0(exception, false);
        self.handles.clear();
        self.out.set_block_mode(old)?;
        trace::info(
            COMPONENT,
            "abort",
            json!({ "exception": exception.kind_name() }),
        );
        written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.out.flush()
    }

    /// Flush buffered block data and close the sink. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let flushed = self.out.flush();
        flush_then_close(COMPONENT, flushed, || self.out.sink_mut().close())
    }

    #[must_use]
    pub fn get_ref(&self) -> &S {
        self.out.sink()
    }

    /// Drain pending block data and hand back the sink.
    pub fn into_inner(mut self) -> Result<S> {
        self.out.drain()?;
        Ok(self.out.into_inner())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(IoError::Closed)
        } else {
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Object dispatch
    // -----------------------------------------------------------------------

    fn write_object0(&mut self, v: &Value, unshared: bool) -> Result<()> {
        if v.is_primitive() {
            return Err(IoError::IllegalArgument(format!(
                "cannot write a {} as an object",
                v.kind_name()
            )));
        }
        let old = self.out.set_block_mode(false)?;
        self.depth += 1;
        let result = self.write_value(v, unshared);
        self.depth -= 1;
        let restored = self.out.set_block_mode(old);
        result?;
        restored.map(|_| ())
    }

    fn write_value(&mut self, v: &Value, unshared: bool) -> Result<()> {
        if v.is_null() {
            return self.out.write_tag(TC_NULL);
        }
        if !unshared {
            if let Some(h) = self.handles.lookup(v) {
                return self.write_handle(h);
            }
        }
        match v {
            Value::String(s) => self.write_string(v, s, unshared),
            Value::Array(a) => self.write_array(v, a, unshared),
            Value::Enum(e) => self.write_enum(v, e, unshared),
            Value::Object(o) => self.write_ordinary_object(v, o, unshared),
            Value::Class(d) => self.write_class(v, d, unshared),
            Value::ClassDesc(d) => self.write_class_desc(d, unshared),
            other => Err(IoError::IllegalArgument(format!(
                "cannot write a {} as an object",
                other.kind_name()
            ))),
        }
    }

    fn write_handle(&mut self, handle: u32) -> Result<()> {
        self.out.write_tag(TC_REFERENCE)?;
        self.out.write_int(handle as i32)
    }

    fn shared<'v>(v: &'v Value, unshared: bool) -> Option<&'v Value> {
        (!unshared).then_some(v)
    }

    fn write_string(&mut self, v: &Value, s: &str, unshared: bool) -> Result<()> {
        self.handles.assign(Self::shared(v, unshared));
        self.write_string_body(s)
    }

    fn write_string_body(&mut self, s: &str) -> Result<()> {
        if utf_length(s) <= MAX_UTF_LENGTH {
            self.out.write_tag(TC_STRING)?;
            self.out.write_utf(s)
        } else {
            self.out.write_tag(TC_LONGSTRING)?;
            self.out.write_long_utf(s)
        }
    }

    /// Field type signature, shared with earlier signatures of the same text
    /// and with the string value it was decoded from.
    fn write_type_string(&mut self, sig: &Arc<str>) -> Result<()> {
        if let Some(h) = self.handles.lookup_text(sig) {
            return self.write_handle(h);
        }
        self.handles.assign_text(sig);
        self.write_string_body(sig)
    }

    fn write_class(&mut self, v: &Value, desc: &Arc<ClassDesc>, unshared: bool) -> Result<()> {
        self.out.write_tag(TC_CLASS)?;
        self.write_class_desc(desc, false)?;
        self.handles.assign(Self::shared(v, unshared));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Class descriptors
    // -----------------------------------------------------------------------

    fn write_class_desc(&mut self, desc: &Arc<ClassDesc>, unshared: bool) -> Result<()> {
        let v = Value::ClassDesc(Arc::clone(desc));
        if !unshared {
            if let Some(h) = self.handles.lookup(&v) {
                return self.write_handle(h);
            }
        }
        if desc.is_proxy() {
            self.write_proxy_desc(desc, &v, unshared)
        } else {
            self.write_non_proxy_desc(desc, &v, unshared)
        }
    }

    /// Flags as they go on the wire: protocol 1 has no block framing for
    /// externalizable data.
    fn wire_flags(&self, desc: &ClassDesc) -> u8 {
        let mut flags = desc.flags();
        if desc.is_externalizable() && self.protocol == PROTOCOL_VERSION_1 {
            flags &= !SC_BLOCK_DATA;
        }
        flags
    }

    fn write_non_proxy_desc(&mut self, desc: &Arc<ClassDesc>, v: &Value, unshared: bool) -> Result<()> {
        self.out.write_tag(TC_CLASSDESC)?;
        self.handles.assign(Self::shared(v, unshared));
        self.out.write_utf(desc.name())?;
        self.out.write_long(desc.suid())?;
        let flags = self.wire_flags(desc);
        self.out.write_i8(flags as i8)?;
        let count = i16::try_from(desc.fields().len()).map_err(|_| {
            IoError::invalid_class(desc.name(), "too many serializable fields")
        })?;
        self.out.write_short(count)?;
        for field in desc.fields() {
            self.out.write_i8(field.type_code.code() as i8)?;
            self.out.write_utf(&field.name)?;
            if let Some(sig) = &field.signature {
                self.write_type_string(sig)?;
            }
        }
        self.write_annotations(desc.annotations())?;
        self.write_super_desc(desc.super_desc())
    }

    fn write_proxy_desc(&mut self, desc: &Arc<ClassDesc>, v: &Value, unshared: bool) -> Result<()> {
        self.out.write_tag(TC_PROXYCLASSDESC)?;
        self.handles.assign(Self::shared(v, unshared));
        let interfaces = desc.interfaces();
        self.out.write_int(interfaces.len() as i32)?;
        for name in interfaces {
            self.out.write_utf(name)?;
        }
        self.write_annotations(desc.annotations())?;
        self.write_super_desc(desc.super_desc())
    }

    fn write_super_desc(&mut self, super_desc: Option<&Arc<ClassDesc>>) -> Result<()> {
        match super_desc {
            Some(s) => self.write_class_desc(s, false),
            None => self.out.write_tag(TC_NULL),
        }
    }

    fn write_annotations(&mut self, items: &[Content]) -> Result<()> {
        self.out.set_block_mode(true)?;
        self.write_contents(items)?;
        self.out.set_block_mode(false)?;
        self.out.write_tag(TC_ENDBLOCKDATA)
    }

    /// Replay captured custom data in the current framing mode.
    fn write_contents(&mut self, items: &[Content]) -> Result<()> {
        for item in items {
            match item {
                Content::Block(bytes) if self.out.block_mode() => self.out.write_block_exact(bytes)?,
                Content::Block(bytes) => self.out.write_raw(bytes)?,
                Content::Object(v) => self.write_object0(v, false)?,
                Content::Reset => return Err(IoError::IllegalState("reset inside custom data")),
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Arrays and enums
    // -----------------------------------------------------------------------

    fn write_array(&mut self, v: &Value, array: &Arc<ArrayObject>, unshared: bool) -> Result<()> {
        self.out.write_tag(TC_ARRAY)?;
        self.write_class_desc(array.desc(), false)?;
        self.handles.assign(Self::shared(v, unshared));
        // Snapshot so no lock is held while elements are written.
        let data = array.data().clone();
        self.out.write_int(data.len() as i32)?;
        match data {
            ArrayData::Object(items) => {
                for item in &items {
                    self.write_object0(item, false)?;
                }
                Ok(())
            }
            primitive => match primitive.to_be_bytes() {
                Some(bytes) => self.out.write_raw(&bytes),
                None => Ok(()),
            },
        }
    }

    fn write_enum(&mut self, v: &Value, constant: &Arc<EnumConstant>, unshared: bool) -> Result<()> {
        if !constant.desc.is_enum() {
            return Err(IoError::invalid_class(constant.desc.name(), "non-enum class"));
        }
        self.out.write_tag(TC_ENUM)?;
        self.write_class_desc(&constant.desc, false)?;
        self.handles.assign(Self::shared(v, unshared));
        let name = Value::String(Arc::clone(&constant.name));
        self.write_string(&name, &constant.name, false)
    }

    // -----------------------------------------------------------------------
    // Ordinary objects
    // -----------------------------------------------------------------------

    fn write_ordinary_object(&mut self, v: &Value, obj: &Arc<Instance>, unshared: bool) -> Result<()> {
        let desc = Arc::clone(obj.desc());
        if !desc.is_serializable() && !desc.is_externalizable() {
            return Err(IoError::NotSerializable(desc.name().to_string()));
        }
        self.out.write_tag(TC_OBJECT)?;
        self.write_class_desc(&desc, false)?;
        self.handles.assign(Self::shared(v, unshared));
        if desc.is_externalizable() {
            self.write_external_data(obj, &desc)
        } else {
            self.write_serial_data(obj)
        }
    }

    fn write_external_data(&mut self, obj: &Arc<Instance>, desc: &Arc<ClassDesc>) -> Result<()> {
        let framed = self.wire_flags(desc) & SC_BLOCK_DATA != 0;
        if framed {
            self.out.set_block_mode(true)?;
        }
        let hook = self.registry.write_hook(desc.name());
        match hook {
            Some(hook) => {
                let mut ctx = WriteContext::new(self, Arc::clone(obj), 0, Arc::clone(desc), false);
                hook(obj, &mut ctx)?;
            }
            None => {
                let extra = obj.slot(0).map(|s| s.extra).unwrap_or_default();
                self.write_contents(&extra)?;
            }
        }
        if framed {
            self.out.set_block_mode(false)?;
            self.out.write_tag(TC_ENDBLOCKDATA)?;
        }
        Ok(())
    }

    fn write_serial_data(&mut self, obj: &Arc<Instance>) -> Result<()> {
        for (i, slot) in obj.slots().into_iter().enumerate() {
            if !slot.desc.has_write_method() {
                self.write_fields(&slot.desc, &slot.values)?;
                continue;
            }
            let hook = self.registry.write_hook(slot.desc.name());
            match hook {
                Some(hook) => {
                    self.out.set_block_mode(true)?;
                    let mut ctx = WriteContext::new(self, Arc::clone(obj), i, Arc::clone(&slot.desc), true);
                    hook(obj, &mut ctx)?;
                }
                None => {
                    self.write_fields(&slot.desc, &slot.values)?;
                    self.out.set_block_mode(true)?;
                    self.write_contents(&slot.extra)?;
                }
            }
            self.out.set_block_mode(false)?;
            self.out.write_tag(TC_ENDBLOCKDATA)?;
        }
        Ok(())
    }

    /// Default field data: the packed primitive block, then each object
    /// field in order.
    fn write_fields(&mut self, desc: &ClassDesc, values: &[Value]) -> Result<()> {
        if values.len() != desc.fields().len() {
            return Err(IoError::InvalidObject(format!(
                "{} expects {} field values, got {}",
                desc.name(),
                desc.fields().len(),
                values.len()
            )));
        }
        let mut prim = vec![0u8; desc.prim_data_size()];
        for (field, value) in desc.fields().iter().zip(values) {
            if field.is_primitive()
                && !(value.fits(field.type_code) && encode_primitive(&mut prim, field.offset, value))
            {
                return Err(mismatch(desc, &field.name, value));
            }
        }
        self.out.write_raw(&prim)?;
        for (field, value) in desc.fields().iter().zip(values) {
            if !field.is_primitive() {
                if value.is_primitive() {
                    return Err(mismatch(desc, &field.name, value));
                }
                self.write_object0(value, field.unshared)?;
            }
        }
        Ok(())
    }
}

fn mismatch(desc: &ClassDesc, field: &str, value: &Value) -> IoError {
    IoError::InvalidObject(format!(
        "field {field} of {} cannot hold a {}",
        desc.name(),
        value.kind_name()
    ))
}

impl<S: ByteSink> DataOutput for ObjectOutputStream<S> {
    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.out.write_raw(data)
    }
}

impl<S: ByteSink> ByteSink for ObjectOutputStream<S> {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.write_raw(buf)
    }

    fn flush(&mut self) -> Result<()> {
        ObjectOutputStream::flush(self)
    }

    fn close(&mut self) -> Result<()> {
        ObjectOutputStream::close(self)
    }
}

// ---------------------------------------------------------------------------
// Hook context
// ---------------------------------------------------------------------------

/// What a write hook may do to the stream it runs in.
pub(crate) trait ObjectSink {
    fn sink_raw(&mut self, data: &[u8]) -> Result<()>;
    fn sink_object(&mut self, v: &Value, unshared: bool) -> Result<()>;
    fn sink_fields(&mut self, desc: &ClassDesc, values: &[Value]) -> Result<()>;
}

impl<S: ByteSink> ObjectSink for ObjectOutputStream<S> {
    fn sink_raw(&mut self, data: &[u8]) -> Result<()> {
        self.out.write_raw(data)
    }

    fn sink_object(&mut self, v: &Value, unshared: bool) -> Result<()> {
        self.write_object0(v, unshared)
    }

    fn sink_fields(&mut self, desc: &ClassDesc, values: &[Value]) -> Result<()> {
        let old = self.out.set_block_mode(false)?;
        self.write_fields(desc, values)?;
        self.out.set_block_mode(old)?;
        Ok(())
    }
}

/// Handed to a write hook for exactly one class of one object. The
/// context borrows the stream for the duration of the call, so field
/// operations can never happen outside a hook.
pub struct WriteContext<'a> {
    out: &'a mut dyn ObjectSink,
    instance: Arc<Instance>,
    slot: usize,
    desc: Arc<ClassDesc>,
    fields_allowed: bool,
    fields_written: bool,
    put: Option<PutField>,
}

impl<'a> WriteContext<'a> {
    pub(crate) fn new(
        out: &'a mut dyn ObjectSink,
        instance: Arc<Instance>,
        slot: usize,
        desc: Arc<ClassDesc>,
        fields_allowed: bool,
    ) -> Self {
        Self {
            out,
            instance,
            slot,
            desc,
            fields_allowed,
            fields_written: false,
            put: None,
        }
    }

    /// The class whose data this hook writes.
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
            return Err(IoError::NotActive("not in call to writeObject"));
        }
        if self.fields_written {
            return Err(IoError::NotActive(
                "not in call to writeObject or fields already written",
            ));
        }
        self.fields_written = true;
        Ok(())
    }

    /// Write this class's fields from the instance, as if no hook ran.
    pub fn default_write_object(&mut self) -> Result<()> {
        self.claim_fields()?;
        let values = self
            .instance
            .slot(self.slot)
            .map(|s| s.values)
            .unwrap_or_default();
        self.out.sink_fields(&self.desc, &values)
    }

    /// Field values to be written by [`write_fields`](Self::write_fields),
    /// starting at their zero values.
    pub fn put_fields(&mut self) -> Result<&mut PutField> {
        if self.put.is_none() {
            self.claim_fields()?;
        }
        let desc = Arc::clone(&self.desc);
        Ok(self.put.get_or_insert_with(|| PutField::new(desc)))
    }

    pub fn write_fields(&mut self) -> Result<()> {
        let put = self
            .put
            .take()
            .ok_or(IoError::NotActive("no current PutField object"))?;
        self.out.sink_fields(&self.desc, &put.values)
    }

    pub fn write_object(&mut self, v: &Value) -> Result<()> {
        self.out.sink_object(v, false)
    }

    pub fn write_unshared(&mut self, v: &Value) -> Result<()> {
        self.out.sink_object(v, true)
    }
}

impl DataOutput for WriteContext<'_> {
    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.out.sink_raw(data)
    }
}

/// Named field values staged by a write hook.
#[derive(Debug, Clone)]
pub struct PutField {
    desc: Arc<ClassDesc>,
    values: Vec<Value>,
}

impl PutField {
    fn new(desc: Arc<ClassDesc>) -> Self {
        let values = desc
            .fields()
            .iter()
            .map(|f| Value::default_for(f.type_code))
            .collect();
        Self { desc, values }
    }

    pub fn put(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let i = self
            .desc
            .field_index(name)
            .ok_or_else(|| IoError::IllegalArgument(format!("no such field: {name}")))?;
        let field = &self.desc.fields()[i];
        if !value.fits(field.type_code) {
            return Err(IoError::IllegalArgument(format!(
                "field {name} is {}, not {}",
                field.type_code.name(),
                value.kind_name()
            )));
        }
        self.values[i] = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::growable::ByteArrayOutputStream;
    use crate::serial::field::TypeCode;

    fn stream() -> ObjectOutputStream<ByteArrayOutputStream> {
        ObjectOutputStream::new(ByteArrayOutputStream::new()).unwrap()
    }

    fn bytes(out: ObjectOutputStream<ByteArrayOutputStream>) -> Vec<u8> {
        out.into_inner().unwrap().into_inner()
    }

    #[test]
    fn header_only() {
        assert_eq!(bytes(stream()), [0xAC, 0xED, 0x00, 0x05]);
    }

    #[test]
    fn string_then_back_reference() {
        let mut out = stream();
        let s = Value::string("hi");
        out.write_object(&s).unwrap();
        out.write_object(&s).unwrap();
        assert_eq!(
            bytes(out),
            [
                0xAC, 0xED, 0x00, 0x05, 0x74, 0x00, 0x02, b'h', b'i', 0x71, 0x00, 0x7E, 0x00,
                0x00
            ]
        );
    }

    #[test]
    fn objects_and_arrays_are_written_once_then_referenced() {
        let desc = ClassDesc::builder("demo.E").suid(1).build().unwrap();
        let obj = Value::Object(Instance::new(desc));
        let arr = Value::array("[I", ArrayData::Int(vec![7])).unwrap();
        let arr_suid = arr.as_array().unwrap().desc().suid();

        let mut out = stream();
        out.write_object(&obj).unwrap();
        out.write_object(&obj).unwrap();
        out.write_object(&arr).unwrap();
        out.write_object(&arr).unwrap();

        let mut expected = vec![0xAC, 0xED, 0x00, 0x05];
        // Descriptor 7E0000, object 7E0001.
        expected.extend([TC_OBJECT, TC_CLASSDESC, 0x00, 0x06]);
        expected.extend(b"demo.E");
        expected.extend(1i64.to_be_bytes());
        expected.extend([SC_SERIALIZABLE, 0x00, 0x00, TC_ENDBLOCKDATA, TC_NULL]);
        expected.extend([TC_REFERENCE, 0x00, 0x7E, 0x00, 0x01]);
        // Descriptor 7E0002, array 7E0003.
        expected.extend([TC_ARRAY, TC_CLASSDESC, 0x00, 0x02, b'[', b'I']);
        expected.extend(arr_suid.to_be_bytes());
        expected.extend([SC_SERIALIZABLE, 0x00, 0x00, TC_ENDBLOCKDATA, TC_NULL]);
        expected.extend([0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x07]);
        expected.extend([TC_REFERENCE, 0x00, 0x7E, 0x00, 0x03]);
        assert_eq!(bytes(out), expected);
    }

    #[test]
    fn unshared_string_is_rewritten() {
        let mut out = stream();
        let s = Value::string("a");
        out.write_unshared(&s).unwrap();
        out.write_object(&s).unwrap();
        let b = bytes(out);
        assert_eq!(&b[4..], [0x74, 0x00, 0x01, b'a', 0x74, 0x00, 0x01, b'a']);
    }

    #[test]
    fn primitives_are_block_framed() {
        let mut out = stream();
        out.write_int(7).unwrap();
        out.write_object(&Value::Null).unwrap();
        assert_eq!(&bytes(out)[4..], [0x77, 0x04, 0, 0, 0, 7, 0x70]);
    }

    #[test]
    fn simple_object_layout() {
        let desc = ClassDesc::builder("P")
            .suid(1)
            .primitive("x", TypeCode::Int)
            .build()
            .unwrap();
        let p = Instance::new(desc);
        p.set("x", 5).unwrap();
        let mut out = stream();
        out.write_object(&Value::Object(p)).unwrap();
        let expected = [
            0x73, // TC_OBJECT
            0x72, 0x00, 0x01, b'P', // TC_CLASSDESC, name
            0, 0, 0, 0, 0, 0, 0, 1, // suid
            0x02, 0x00, 0x01, // flags, one field
            b'I', 0x00, 0x01, b'x', // field
            0x78, 0x70, // end annotations, no super
            0, 0, 0, 5,
        ];
        assert_eq!(&bytes(out)[4..], expected);
    }

    #[test]
    fn reset_clears_handles() {
        let mut out = stream();
        let s = Value::string("x");
        out.write_object(&s).unwrap();
        assert_eq!(out.handles_assigned(), 1);
        out.reset().unwrap();
        assert_eq!(out.handles_assigned(), 0);
        out.write_object(&s).unwrap();
        let b = bytes(out);
        assert_eq!(&b[4..], [0x74, 0, 1, b'x', 0x79, 0x74, 0, 1, b'x']);
    }

    #[test]
    fn protocol_version_only_on_empty_stream() {
        let mut out = stream();
        out.use_protocol_version(PROTOCOL_VERSION_1).unwrap();
        assert!(out.use_protocol_version(9).is_err());
        out.write_object(&Value::string("a")).unwrap();
        let err = out.use_protocol_version(PROTOCOL_VERSION_2).unwrap_err();
        assert!(matches!(err, IoError::IllegalState("stream non-empty")));
    }

    #[test]
    fn primitive_value_is_not_an_object() {
        let mut out = stream();
        assert!(matches!(
            out.write_object(&Value::Int(1)),
            Err(IoError::IllegalArgument(_))
        ));
    }

    #[test]
    fn non_serializable_class() {
        let desc = ClassDesc::from_wire("demo.Plain", 1, 0, vec![], None, vec![]).unwrap();
        let mut out = stream();
        let err = out.write_object(&Value::Object(Instance::new(desc))).unwrap_err();
        assert!(matches!(err, IoError::NotSerializable(ref c) if c == "demo.Plain"));
    }

    #[test]
    fn put_field_type_checks() {
        let desc = ClassDesc::builder("P")
            .primitive("x", TypeCode::Int)
            .build()
            .unwrap();
        let mut put = PutField::new(desc);
        put.put("x", 3).unwrap();
        assert!(put.put("x", 3i64).is_err());
        assert!(put.put("nope", 3).is_err());
    }

    #[test]
    fn closed_stream_rejects_writes() {
        let mut out = stream();
        out.close().unwrap();
        out.close().unwrap();
        assert!(out.write_object(&Value::Null).unwrap_err().is_closed());
    }
}
