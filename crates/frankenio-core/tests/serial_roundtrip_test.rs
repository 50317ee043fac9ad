//! Integration test: object graphs survive a write/read cycle.
//!
//! Covers shared identity, cycles, class hierarchies, enums, proxies,
//! custom-data hooks, externalizable framing under both protocol versions,
//! and byte-exact replay of captured streams.

use std::sync::Arc;

use parking_lot::Mutex;

use frankenio_core::IoError;
use frankenio_core::io::ByteArrayInputStream;
use frankenio_core::io::ByteArrayOutputStream;
use frankenio_core::io::data::{DataInput, DataOutput};
use frankenio_core::serial::constants::{PROTOCOL_VERSION_1, TC_LONGSTRING};
use frankenio_core::serial::{
    ArrayData, ClassBinding, ClassDesc, Content, Instance, ObjectInputStream, ObjectOutputStream,
    TypeCode, TypeRegistry, Value,
};

fn write_all(registry: &Arc<TypeRegistry>, values: &[Value]) -> Vec<u8> {
    let mut out =
        ObjectOutputStream::with_registry(ByteArrayOutputStream::new(), Arc::clone(registry))
            .unwrap();
    for v in values {
        out.write_object(v).unwrap();
    }
    out.into_inner().unwrap().into_inner()
}

fn open(registry: &Arc<TypeRegistry>, bytes: Vec<u8>) -> ObjectInputStream<ByteArrayInputStream> {
    ObjectInputStream::with_registry(ByteArrayInputStream::new(bytes), Arc::clone(registry))
        .unwrap()
}

fn round_trip(values: &[Value]) -> Vec<Value> {
    let registry = Arc::new(TypeRegistry::new());
    let bytes = write_all(&registry, values);
    let mut input = open(&registry, bytes);
    values.iter().map(|_| input.read_object().unwrap()).collect()
}

fn node_desc() -> Arc<ClassDesc> {
    ClassDesc::builder("demo.Node")
        .suid(1)
        .primitive("id", TypeCode::Int)
        .object("next", "Ldemo/Node;")
        .build()
        .unwrap()
}

fn same_object(a: &Value, b: &Value) -> bool {
    match (a.as_object(), b.as_object()) {
        (Some(x), Some(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

#[test]
fn primitive_arrays_of_every_type() {
    let arrays = vec![
        Value::array("[Z", ArrayData::Boolean(vec![true, false])).unwrap(),
        Value::array("[B", ArrayData::Byte(vec![-1, 0, 127])).unwrap(),
        Value::array("[C", ArrayData::Char(vec![0x41, 0xFFFF])).unwrap(),
        Value::array("[S", ArrayData::Short(vec![i16::MIN])).unwrap(),
        Value::array("[I", ArrayData::Int(vec![1, -2, 3])).unwrap(),
        Value::array("[J", ArrayData::Long(vec![i64::MAX])).unwrap(),
        Value::array("[F", ArrayData::Float(vec![1.5, f32::NAN])).unwrap(),
        Value::array("[D", ArrayData::Double(vec![-0.0])).unwrap(),
    ];
    let back = round_trip(&arrays);
    for (a, b) in arrays.iter().zip(&back) {
        assert!(a.deep_eq(b), "{a:?} != {b:?}");
    }
    let floats = back[6].as_array().unwrap();
    assert!(matches!(floats.get(1), Some(Value::Float(f)) if f.is_nan()));
}

#[test]
fn shared_references_keep_identity() {
    let s = Value::string("shared");
    let node = Value::Object(Instance::new(node_desc()));
    let list = Value::array(
        "[Ljava.lang.Object;",
        ArrayData::Object(vec![s.clone(), s.clone(), node.clone(), node.clone(), Value::Null]),
    )
    .unwrap();
    let back = round_trip(&[list]);
    let items = back[0].as_array().unwrap();
    let (a, b) = (items.get(0).unwrap(), items.get(1).unwrap());
    assert!(std::ptr::eq(a.as_str().unwrap(), b.as_str().unwrap()));
    assert!(same_object(&items.get(2).unwrap(), &items.get(3).unwrap()));
    assert!(items.get(4).unwrap().is_null());
}

#[test]
fn cycles_resolve_to_the_same_instances() {
    let a = Instance::new(node_desc());
    let b = Instance::new(node_desc());
    a.set("id", 1).unwrap();
    b.set("id", 2).unwrap();
    a.set("next", Arc::clone(&b)).unwrap();
    b.set("next", Arc::clone(&a)).unwrap();

    let back = round_trip(&[Value::Object(Arc::clone(&a))]);
    let ra = back[0].as_object().unwrap();
    let rb = ra.get("next").unwrap();
    assert_eq!(rb.as_object().unwrap().get("id"), Some(Value::Int(2)));
    let again = rb.as_object().unwrap().get("next").unwrap();
    assert!(same_object(&again, &back[0]));
    assert!(back[0].deep_eq(&Value::Object(Arc::clone(&a))));

    a.clear();
    ra.clear();
}

#[test]
fn superclass_fields_travel_in_their_own_slot() {
    let base = ClassDesc::builder("demo.Base")
        .suid(10)
        .primitive("id", TypeCode::Long)
        .build()
        .unwrap();
    let derived = ClassDesc::builder("demo.Derived")
        .suid(11)
        .object("label", "Ljava/lang/String;")
        .primitive("id", TypeCode::Int)
        .super_desc(base)
        .build()
        .unwrap();
    let inst = Instance::new(derived);
    inst.set("label", "x").unwrap();
    inst.set("id", 7).unwrap();
    let back = round_trip(&[Value::Object(inst)]);
    let r = back[0].as_object().unwrap();
    assert_eq!(r.slot_count(), 2);
    assert_eq!(r.get_in("demo.Base", "id"), Some(Value::Long(0)));
    assert_eq!(r.get_in("demo.Derived", "id"), Some(Value::Int(7)));
    assert_eq!(r.get("label").unwrap().as_str(), Some("x"));
}

#[test]
fn long_strings_use_the_long_form() {
    let text = "a".repeat(70_000);
    let registry = Arc::new(TypeRegistry::new());
    let bytes = write_all(&registry, &[Value::string(&text)]);
    assert_eq!(bytes[4], TC_LONGSTRING);
    assert_eq!(&bytes[5..13], &70_000i64.to_be_bytes());
    let mut input = open(&registry, bytes);
    assert_eq!(input.read_object().unwrap().as_str(), Some(text.as_str()));
}

#[test]
fn supplementary_characters_round_trip() {
    let back = round_trip(&[Value::string("nul\u{0} and \u{1F600}")]);
    assert_eq!(back[0].as_str(), Some("nul\u{0} and \u{1F600}"));
}

#[test]
fn enum_constants_are_shared() {
    let color = ClassDesc::enum_type("demo.Color");
    let red = Value::enum_constant(Arc::clone(&color), "RED");
    let back = round_trip(&[red.clone(), red]);
    assert_eq!(back[0], back[1]);
    match &back[0] {
        Value::Enum(e) => {
            assert_eq!(&*e.name, "RED");
            assert_eq!(e.desc.super_desc().unwrap().name(), "java.lang.Enum");
        }
        other => panic!("expected enum, got {other:?}"),
    }
}

#[test]
fn unknown_enum_constant_is_rejected_when_bound() {
    let color = ClassDesc::enum_type("demo.Color");
    let red = Value::enum_constant(Arc::clone(&color), "RED");
    let bytes = write_all(&Arc::new(TypeRegistry::new()), &[red]);
    let mut reg = TypeRegistry::new();
    reg.register(ClassBinding::new(color).constants(&["GREEN"]));
    let mut input = open(&Arc::new(reg), bytes);
    let err = input.read_object().unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid object: enum constant RED does not exist in demo.Color"
    );
}

#[test]
fn class_objects_and_proxies() {
    let proxy = Instance::new(ClassDesc::proxy(&["demo.Api", "demo.Other"]));
    let back = round_trip(&[Value::Class(node_desc()), Value::Object(proxy)]);
    match &back[0] {
        Value::Class(d) => assert_eq!(d.name(), "demo.Node"),
        other => panic!("expected class, got {other:?}"),
    }
    let p = back[1].as_object().unwrap();
    let desc = p.desc();
    assert!(desc.is_proxy());
    let names: Vec<&str> = desc.interfaces().iter().map(|i| &**i).collect();
    assert_eq!(names, ["demo.Api", "demo.Other"]);
    assert_eq!(desc.super_desc().unwrap().name(), "java.lang.reflect.Proxy");
    assert_eq!(p.get("h"), Some(Value::Null));
}

#[test]
fn unshared_objects_are_written_twice() {
    let registry = Arc::new(TypeRegistry::new());
    let node = Value::Object(Instance::new(node_desc()));
    let mut out =
        ObjectOutputStream::with_registry(ByteArrayOutputStream::new(), Arc::clone(&registry))
            .unwrap();
    out.write_unshared(&node).unwrap();
    out.write_object(&node).unwrap();
    let mut input = open(&registry, out.into_inner().unwrap().into_inner());
    let a = input.read_unshared().unwrap();
    let b = input.read_object().unwrap();
    assert!(!same_object(&a, &b));
}

// ---------------------------------------------------------------------------
// Custom data
// ---------------------------------------------------------------------------

fn counted_desc() -> Arc<ClassDesc> {
    ClassDesc::builder("demo.Counted")
        .suid(3)
        .primitive("count", TypeCode::Int)
        .write_method()
        .build()
        .unwrap()
}

fn counted_writer() -> Arc<TypeRegistry> {
    let mut reg = TypeRegistry::new();
    reg.register(ClassBinding::new(counted_desc()).on_write(|_, ctx| {
        ctx.default_write_object()?;
        ctx.write_int(99)?;
        ctx.write_object(&Value::string("tail"))
    }));
    Arc::new(reg)
}

fn counted_value() -> Value {
    let inst = Instance::new(counted_desc());
    inst.set("count", 5).unwrap();
    Value::Object(inst)
}

#[test]
fn custom_data_is_captured_without_a_reader_hook() {
    let bytes = write_all(&counted_writer(), &[counted_value()]);
    let plain = Arc::new(TypeRegistry::new());
    let mut input = open(&plain, bytes.clone());
    let v = input.read_object().unwrap();
    let inst = v.as_object().unwrap();
    assert_eq!(inst.get("count"), Some(Value::Int(5)));
    let extra = inst.extra("demo.Counted");
    assert_eq!(extra.len(), 2);
    assert!(matches!(&extra[0], Content::Block(b) if b == &[0, 0, 0, 99]));
    assert!(matches!(&extra[1], Content::Object(s) if s.as_str() == Some("tail")));

    // Writing the captured instance again reproduces the stream.
    assert_eq!(write_all(&plain, &[v]), bytes);
}

#[test]
fn read_hook_sees_what_the_write_hook_wrote() {
    let bytes = write_all(&counted_writer(), &[counted_value()]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut reg = TypeRegistry::new();
    reg.register(ClassBinding::new(counted_desc()).on_read(move |_, ctx| {
        let fields = ctx.read_fields()?;
        sink.lock().push(fields.get("count").cloned().unwrap_or(Value::Null));
        sink.lock().push(Value::Int(ctx.read_int()?));
        sink.lock().push(ctx.read_object()?);
        Ok(())
    }));
    let mut input = open(&Arc::new(reg), bytes);
    let v = input.read_object().unwrap();
    assert_eq!(v.as_object().unwrap().get("count"), Some(Value::Int(5)));
    let seen = seen.lock();
    assert_eq!(seen[0], Value::Int(5));
    assert_eq!(seen[1], Value::Int(99));
    assert_eq!(seen[2].as_str(), Some("tail"));
}

#[test]
fn reading_past_default_fields_reports_end_of_data() {
    let plain_desc = ClassDesc::builder("demo.Plain")
        .suid(4)
        .primitive("n", TypeCode::Int)
        .build()
        .unwrap();
    let inst = Instance::new(Arc::clone(&plain_desc));
    let bytes = write_all(&Arc::new(TypeRegistry::new()), &[Value::Object(inst)]);

    let outcome = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&outcome);
    let mut reg = TypeRegistry::new();
    reg.register(ClassBinding::new(plain_desc).on_read(move |_, ctx| {
        ctx.default_read_object()?;
        *slot.lock() = Some(ctx.read_object().map(|_| ()));
        Ok(())
    }));
    let mut input = open(&Arc::new(reg), bytes);
    input.read_object().unwrap();
    match outcome.lock().take() {
        Some(Err(IoError::OptionalData { length: 0, eof: true })) => {}
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn fields_can_only_be_written_once_per_hook() {
    let mut reg = TypeRegistry::new();
    reg.register(ClassBinding::new(counted_desc()).on_write(|_, ctx| {
        ctx.default_write_object()?;
        match ctx.default_write_object() {
            Err(IoError::NotActive(_)) => Ok(()),
            other => panic!("unexpected {other:?}"),
        }
    }));
    write_all(&Arc::new(reg), &[counted_value()]);
}

#[test]
fn put_fields_replace_instance_values() {
    let mut reg = TypeRegistry::new();
    reg.register(ClassBinding::new(counted_desc()).on_write(|_, ctx| {
        ctx.put_fields()?.put("count", 42)?;
        ctx.write_fields()
    }));
    let bytes = write_all(&Arc::new(reg), &[counted_value()]);
    let mut input = open(&Arc::new(TypeRegistry::new()), bytes);
    let v = input.read_object().unwrap();
    assert_eq!(v.as_object().unwrap().get("count"), Some(Value::Int(42)));
}

// ---------------------------------------------------------------------------
// Externalizable data
// ---------------------------------------------------------------------------

fn ext_desc() -> Arc<ClassDesc> {
    ClassDesc::builder("demo.Ext").suid(7).externalizable().build().unwrap()
}

fn ext_writer_bytes(protocol: Option<u8>) -> Vec<u8> {
    let mut reg = TypeRegistry::new();
    reg.register(ClassBinding::new(ext_desc()).on_write(|_, ctx| {
        assert!(matches!(ctx.default_write_object(), Err(IoError::NotActive(_))));
        ctx.write_int(5)?;
        ctx.write_utf("x")
    }));
    let mut out =
        ObjectOutputStream::with_registry(ByteArrayOutputStream::new(), Arc::new(reg)).unwrap();
    if let Some(p) = protocol {
        out.use_protocol_version(p).unwrap();
    }
    out.write_object(&Value::Object(Instance::new(ext_desc())))
        .unwrap();
    out.into_inner().unwrap().into_inner()
}

fn ext_reader() -> Arc<TypeRegistry> {
    let mut reg = TypeRegistry::new();
    reg.register(ClassBinding::new(ext_desc()).on_read(|inst, ctx| {
        let n = ctx.read_int()?;
        let s = ctx.read_utf()?;
        inst.push_extra("demo.Ext", Content::Object(Value::string(&format!("{n}{s}"))))
    }));
    Arc::new(reg)
}

#[test]
fn framed_external_data_is_captured_or_handed_to_the_hook() {
    let bytes = ext_writer_bytes(None);
    let mut plain = open(&Arc::new(TypeRegistry::new()), bytes.clone());
    let v = plain.read_object().unwrap();
    let extra = v.as_object().unwrap().extra("demo.Ext");
    assert!(matches!(&extra[..], [Content::Block(b)] if b == &[0, 0, 0, 5, 0, 1, b'x']));

    let mut hooked = open(&ext_reader(), bytes);
    let v = hooked.read_object().unwrap();
    let extra = v.as_object().unwrap().extra("demo.Ext");
    assert!(matches!(&extra[..], [Content::Object(s)] if s.as_str() == Some("5x")));
}

#[test]
fn unframed_external_data_needs_a_reader() {
    let bytes = ext_writer_bytes(Some(PROTOCOL_VERSION_1));
    let mut plain = open(&Arc::new(TypeRegistry::new()), bytes.clone());
    let err = plain.read_object().unwrap_err();
    assert!(matches!(err, IoError::InvalidClass { ref class, .. } if class == "demo.Ext"));

    let mut hooked = open(&ext_reader(), bytes);
    assert!(hooked.read_object().is_ok());
}

// ---------------------------------------------------------------------------
// Stream-level behavior
// ---------------------------------------------------------------------------

#[test]
fn primitive_data_before_an_object_is_optional_data() {
    let registry = Arc::new(TypeRegistry::new());
    let mut out =
        ObjectOutputStream::with_registry(ByteArrayOutputStream::new(), Arc::clone(&registry))
            .unwrap();
    out.write_int(1234).unwrap();
    out.write_object(&Value::string("after")).unwrap();
    let mut input = open(&registry, out.into_inner().unwrap().into_inner());
    match input.read_object() {
        Err(IoError::OptionalData { length: 4, eof: false }) => {}
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(input.read_int().unwrap(), 1234);
    assert_eq!(input.read_object().unwrap().as_str(), Some("after"));
}

#[test]
fn suid_mismatch_is_an_invalid_class() {
    let desc = ClassDesc::builder("demo.Point")
        .suid(1)
        .primitive("x", TypeCode::Int)
        .build()
        .unwrap();
    let bytes = write_all(&Arc::new(TypeRegistry::new()), &[Value::Object(Instance::new(desc))]);
    let local = ClassDesc::builder("demo.Point")
        .suid(2)
        .primitive("x", TypeCode::Int)
        .build()
        .unwrap();
    let mut reg = TypeRegistry::new();
    reg.register(ClassBinding::new(local));
    let mut input = open(&Arc::new(reg), bytes);
    let err = input.read_object().unwrap_err();
    assert_eq!(
        err.to_string(),
        "demo.Point; local class incompatible: stream classdesc serialVersionUID = 1, \
         local class serialVersionUID = 2"
    );
    assert!(input.read_object().is_err());
}

#[test]
fn aborted_write_surfaces_the_exception_and_continues() {
    let registry = Arc::new(TypeRegistry::new());
    let mut out =
        ObjectOutputStream::with_registry(ByteArrayOutputStream::new(), Arc::clone(&registry))
            .unwrap();
    out.write_object(&Value::string("before")).unwrap();
    out.abort_with(&Value::string("boom")).unwrap();
    out.write_object(&Value::string("after")).unwrap();
    let mut input = open(&registry, out.into_inner().unwrap().into_inner());
    assert_eq!(input.read_object().unwrap().as_str(), Some("before"));
    match input.read_object() {
        Err(IoError::WriteAborted(v)) => assert_eq!(v.as_str(), Some("boom")),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(input.read_object().unwrap().as_str(), Some("after"));
}

#[test]
fn captured_contents_replay_byte_for_byte() {
    let registry = Arc::new(TypeRegistry::new());
    let s = Value::string("s");
    let mut out =
        ObjectOutputStream::with_registry(ByteArrayOutputStream::new(), Arc::clone(&registry))
            .unwrap();
    out.write_int(1).unwrap();
    out.write_object(&s).unwrap();
    out.write_object(&s).unwrap();
    out.reset().unwrap();
    out.write_object(&s).unwrap();
    out.write_object(&counted_value()).unwrap();
    let original = out.into_inner().unwrap().into_inner();

    let mut input = open(&registry, original.clone());
    let mut items = Vec::new();
    while let Some(item) = input.read_content().unwrap() {
        items.push(item);
    }
    assert!(matches!(items[0], Content::Block(_)));
    assert!(matches!(items[3], Content::Reset));
    assert_eq!(items.len(), 6);

    let mut replay =
        ObjectOutputStream::with_registry(ByteArrayOutputStream::new(), Arc::clone(&registry))
            .unwrap();
    for item in &items {
        replay.write_content(item).unwrap();
    }
    assert_eq!(replay.into_inner().unwrap().into_inner(), original);
}

fn replay(bytes: &[u8]) -> (Vec<Content>, Vec<u8>) {
    let registry = Arc::new(TypeRegistry::new());
    let mut input = open(&registry, bytes.to_vec());
    let mut items = Vec::new();
    while let Some(item) = input.read_content().unwrap() {
        items.push(item);
    }
    let mut out =
        ObjectOutputStream::with_registry(ByteArrayOutputStream::new(), Arc::clone(&registry))
            .unwrap();
    for item in &items {
        out.write_content(item).unwrap();
    }
    (items, out.into_inner().unwrap().into_inner())
}

/// Class `P` with one field `x` of type `Ljava/lang/String;`; the type
/// string is either inline or a back-reference to `sig`.
fn string_field_desc(sig: &[u8]) -> Vec<u8> {
    let mut b = vec![0x72, 0x00, 0x01, b'P'];
    b.extend(5i64.to_be_bytes());
    b.extend([0x02, 0x00, 0x01, b'L', 0x00, 0x01, b'x']);
    b.extend(sig);
    b.extend([0x78, 0x70]);
    b
}

fn inline_signature() -> Vec<u8> {
    let mut b = vec![0x74, 0x00, 0x12];
    b.extend(b"Ljava/lang/String;");
    b
}

#[test]
fn field_value_may_reference_a_type_string() {
    // Descriptor 7E0000, type string 7E0001, object 7E0002.
    let mut bytes = vec![0xAC, 0xED, 0x00, 0x05, 0x73];
    bytes.extend(string_field_desc(&inline_signature()));
    bytes.extend([0x71, 0x00, 0x7E, 0x00, 0x01]);
    assert_eq!(bytes.len(), 52);

    let (items, replayed) = replay(&bytes);
    let Content::Object(Value::Object(p)) = &items[0] else {
        panic!("unexpected {:?}", items[0]);
    };
    assert_eq!(p.get("x").unwrap().as_str(), Some("Ljava/lang/String;"));
    assert_eq!(replayed, bytes);
}

#[test]
fn type_string_may_reference_an_earlier_value() {
    // String 7E0000, descriptor 7E0001, object 7E0002 with a null field.
    let mut bytes = vec![0xAC, 0xED, 0x00, 0x05];
    bytes.extend(inline_signature());
    bytes.push(0x73);
    bytes.extend(string_field_desc(&[0x71, 0x00, 0x7E, 0x00, 0x00]));
    bytes.push(0x70);

    let (items, replayed) = replay(&bytes);
    assert_eq!(items.len(), 2);
    assert_eq!(replayed, bytes);
}
