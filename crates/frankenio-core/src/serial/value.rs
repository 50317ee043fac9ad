//! Object graphs as the serialization streams see them.
//!
//! [`Value`] is either a primitive or a reference. References are `Arc`s;
//! two values alias when they point at the same allocation, and the handle
//! tables key on that identity so shared and cyclic graphs round-trip.
//! Objects and arrays are created empty and filled afterwards (a cyclic
//! graph needs its handle before its contents), hence the interior locks.
//!
//! Cycles keep their `Arc`s alive; call [`Instance::clear`] on one member
//! to break a cycle before dropping the graph.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use serde_json::json;

use crate::error::{IoError, Result};
use crate::io::codec;
use crate::serial::desc::ClassDesc;
use crate::serial::field::TypeCode;

#[derive(Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(i8),
    /// One UTF-16 code unit.
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(Arc<str>),
    Array(Arc<ArrayObject>),
    Object(Arc<Instance>),
    Enum(Arc<EnumConstant>),
    /// A class object (`TC_CLASS`).
    Class(Arc<ClassDesc>),
    /// A class descriptor read as a top-level value.
    ClassDesc(Arc<ClassDesc>),
}

/// One item of custom data: a run of block data, an object, or (at top
/// level only) a stream reset.
#[derive(Debug, Clone)]
pub enum Content {
    Block(Vec<u8>),
    Object(Value),
    Reset,
}

/// Identity of a referenceable value: kind plus allocation address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Identity(u8, usize);

impl Value {
    #[must_use]
    pub fn string(s: &str) -> Self {
        Self::String(Arc::from(s))
    }

    /// Array value of the named array class.
    pub fn array(class: &str, data: ArrayData) -> Result<Self> {
        Ok(Self::Array(ArrayObject::new(ClassDesc::array(class)?, data)?))
    }

    #[must_use]
    pub fn enum_constant(desc: Arc<ClassDesc>, name: &str) -> Self {
        Self::Enum(Arc::new(EnumConstant {
            desc,
            name: Arc::from(name),
        }))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn is_primitive(&self) -> bool {
        self.primitive_code().is_some()
    }

    #[must_use]
    pub fn primitive_code(&self) -> Option<TypeCode> {
        Some(match self {
            Self::Boolean(_) => TypeCode::Boolean,
            Self::Byte(_) => TypeCode::Byte,
            Self::Char(_) => TypeCode::Char,
            Self::Short(_) => TypeCode::Short,
            Self::Int(_) => TypeCode::Int,
            Self::Long(_) => TypeCode::Long,
            Self::Float(_) => TypeCode::Float,
            Self::Double(_) => TypeCode::Double,
            _ => return None,
        })
    }

    /// Whether this value may be stored in a field of type `code`.
    #[must_use]
    pub fn fits(&self, code: TypeCode) -> bool {
        match self.primitive_code() {
            Some(p) => p == code,
            None => !code.is_primitive(),
        }
    }

    /// The zero value of a field type.
    #[must_use]
    pub fn default_for(code: TypeCode) -> Self {
        match code {
            TypeCode::Boolean => Self::Boolean(false),
            TypeCode::Byte => Self::Byte(0),
            TypeCode::Char => Self::Char(0),
            TypeCode::Short => Self::Short(0),
            TypeCode::Int => Self::Int(0),
            TypeCode::Long => Self::Long(0),
            TypeCode::Float => Self::Float(0.0),
            TypeCode::Double => Self::Double(0.0),
            TypeCode::Object | TypeCode::Array => Self::Null,
        }
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Enum(_) => "enum",
            Self::Class(_) => "class",
            Self::ClassDesc(_) => "class descriptor",
            other => other.primitive_code().map_or("?", TypeCode::name),
        }
    }

    pub(crate) fn identity(&self) -> Option<Identity> {
        Some(match self {
            Self::String(s) => Identity(0, Arc::as_ptr(s).cast::<u8>() as usize),
            Self::Array(a) => Identity(1, Arc::as_ptr(a) as usize),
            Self::Object(o) => Identity(2, Arc::as_ptr(o) as usize),
            Self::Enum(e) => Identity(3, Arc::as_ptr(e) as usize),
            Self::Class(d) => Identity(4, Arc::as_ptr(d) as usize),
            Self::ClassDesc(d) => Identity(5, Arc::as_ptr(d) as usize),
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(&**s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Arc<Instance>> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&Arc<ArrayObject>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Structural equality: same shape and values, aliasing ignored.
    /// Cycles are followed once.
    #[must_use]
    pub fn deep_eq(&self, other: &Value) -> bool {
        deep_eq_in(self, other, &mut HashSet::new())
    }

    /// JSON rendering. A reference seen before renders as `{"$ref": id}`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        self.json_in(&mut HashMap::new())
    }

    fn json_in(&self, ids: &mut HashMap<Identity, usize>) -> serde_json::Value {
        let id = match self.identity() {
            None => return self.primitive_json(),
            Some(Identity(0, _)) => return self.primitive_json(),
            Some(key) => {
                if let Some(seen) = ids.get(&key) {
                    return json!({ "$ref": seen });
                }
                let next = ids.len();
                ids.insert(key, next);
                next
            }
        };
        match self {
            Self::Array(a) => {
                let elements = a.data().clone();
                json!({
                    "$id": id,
                    "$array": a.desc().name(),
                    "elements": elements.json_in(ids),
                })
            }
            Self::Object(o) => {
                let slots = o.slots();
                let data: Vec<serde_json::Value> = slots
                    .iter()
                    .map(|slot| {
                        let mut fields = serde_json::Map::new();
                        for (f, v) in slot.desc.fields().iter().zip(&slot.values) {
                            fields.insert(f.name.to_string(), v.json_in(ids));
                        }
                        let mut entry = json!({ "class": slot.desc.name(), "fields": fields });
                        if !slot.extra.is_empty() {
                            entry["extra"] = contents_json_in(&slot.extra, ids);
                        }
                        entry
                    })
                    .collect();
                json!({ "$id": id, "$class": o.desc().name(), "data": data })
            }
            Self::Enum(e) => json!({ "$id": id, "$enum": e.desc.name(), "name": &*e.name }),
            Self::Class(d) => json!({ "$id": id, "$class_of": d.name() }),
            Self::ClassDesc(d) => json!({ "$id": id, "$desc": d.name(), "suid": d.suid() }),
            _ => self.primitive_json(),
        }
    }

    fn primitive_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Boolean(b) => json!(b),
            Self::Byte(v) => json!(v),
            Self::Char(c) => json!({ "char": c }),
            Self::Short(v) => json!(v),
            Self::Int(v) => json!(v),
            Self::Long(v) => json!(v),
            Self::Float(v) => float_json(f64::from(*v)),
            Self::Double(v) => float_json(*v),
            Self::String(s) => json!(&**s),
            _ => serde_json::Value::Null,
        }
    }
}

fn float_json(v: f64) -> serde_json::Value {
    serde_json::Number::from_f64(v).map_or_else(|| json!(v.to_string()), serde_json::Value::Number)
}

/// JSON rendering of a content list with one shared id space.
#[must_use]
pub fn contents_to_json(items: &[Content]) -> serde_json::Value {
    contents_json_in(items, &mut HashMap::new())
}

fn contents_json_in(items: &[Content], ids: &mut HashMap<Identity, usize>) -> serde_json::Value {
    serde_json::Value::Array(
        items
            .iter()
            .map(|c| match c {
                Content::Block(bytes) => json!({ "block": hex(bytes) }),
                Content::Object(v) => v.json_in(ids),
                Content::Reset => json!({ "reset": true }),
            })
            .collect(),
    )
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

impl PartialEq for Value {
    /// Primitives and strings compare by value (floats bitwise); every other
    /// reference compares by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Byte(a), Self::Byte(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Short(a), Self::Short(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Arc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::Enum(a), Self::Enum(b)) => Arc::ptr_eq(a, b),
            (Self::Class(a), Self::Class(b)) | (Self::ClassDesc(a), Self::ClassDesc(b)) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Boolean(v) => write!(f, "Boolean({v})"),
            Self::Byte(v) => write!(f, "Byte({v})"),
            Self::Char(v) => write!(f, "Char({v:#06x})"),
            Self::Short(v) => write!(f, "Short({v})"),
            Self::Int(v) => write!(f, "Int({v})"),
            Self::Long(v) => write!(f, "Long({v})"),
            Self::Float(v) => write!(f, "Float({v})"),
            Self::Double(v) => write!(f, "Double({v})"),
            Self::String(s) if s.len() > 64 => write!(f, "String({} chars)", s.chars().count()),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Array(a) => write!(f, "Array({}; {})", a.desc().name(), a.len()),
            Self::Object(o) => write!(f, "Object({})", o.desc().name()),
            Self::Enum(e) => write!(f, "Enum({}.{})", e.desc.name(), e.name),
            Self::Class(d) => write!(f, "Class({})", d.name()),
            Self::ClassDesc(d) => write!(f, "ClassDesc({})", d.name()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

macro_rules! primitive_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }

            impl TryFrom<&Value> for $ty {
                type Error = IoError;

                fn try_from(v: &Value) -> Result<Self> {
                    match v {
                        Value::$variant(x) => Ok(*x),
                        other => Err(IoError::InvalidObject(format!(
                            "expected {}, found {}",
                            stringify!($variant).to_ascii_lowercase(),
                            other.kind_name()
                        ))),
                    }
                }
            }
        )*
    };
}

primitive_conversions! {
    bool => Boolean,
    i8 => Byte,
    u16 => Char,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<Arc<Instance>> for Value {
    fn from(o: Arc<Instance>) -> Self {
        Value::Object(o)
    }
}

impl From<Arc<ArrayObject>> for Value {
    fn from(a: Arc<ArrayObject>) -> Self {
        Value::Array(a)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl TryFrom<&Value> for String {
    type Error = IoError;

    fn try_from(v: &Value) -> Result<Self> {
        match v {
            Value::String(s) => Ok(s.to_string()),
            other => Err(IoError::InvalidObject(format!(
                "expected string, found {}",
                other.kind_name()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Arrays
// ---------------------------------------------------------------------------

/// Array elements, stored unboxed per component type.
#[derive(Debug, Clone)]
pub enum ArrayData {
    Boolean(Vec<bool>),
    Byte(Vec<i8>),
    Char(Vec<u16>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Object(Vec<Value>),
}

impl ArrayData {
    /// Empty storage for a component type.
    #[must_use]
    pub fn empty(component: TypeCode) -> Self {
        match component {
            TypeCode::Boolean => Self::Boolean(Vec::new()),
            TypeCode::Byte => Self::Byte(Vec::new()),
            TypeCode::Char => Self::Char(Vec::new()),
            TypeCode::Short => Self::Short(Vec::new()),
            TypeCode::Int => Self::Int(Vec::new()),
            TypeCode::Long => Self::Long(Vec::new()),
            TypeCode::Float => Self::Float(Vec::new()),
            TypeCode::Double => Self::Double(Vec::new()),
            TypeCode::Object | TypeCode::Array => Self::Object(Vec::new()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Boolean(v) => v.len(),
            Self::Byte(v) => v.len(),
            Self::Char(v) => v.len(),
            Self::Short(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Long(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Double(v) => v.len(),
            Self::Object(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this storage can hold elements of `component`.
    #[must_use]
    pub fn holds(&self, component: TypeCode) -> bool {
        matches!(
            (self, component),
            (Self::Boolean(_), TypeCode::Boolean)
                | (Self::Byte(_), TypeCode::Byte)
                | (Self::Char(_), TypeCode::Char)
                | (Self::Short(_), TypeCode::Short)
                | (Self::Int(_), TypeCode::Int)
                | (Self::Long(_), TypeCode::Long)
                | (Self::Float(_), TypeCode::Float)
                | (Self::Double(_), TypeCode::Double)
                | (Self::Object(_), TypeCode::Object | TypeCode::Array)
        )
    }

    /// Element `i` as a value.
    #[must_use]
    pub fn get(&self, i: usize) -> Option<Value> {
        match self {
            Self::Boolean(v) => v.get(i).map(|x| Value::Boolean(*x)),
            Self::Byte(v) => v.get(i).map(|x| Value::Byte(*x)),
            Self::Char(v) => v.get(i).map(|x| Value::Char(*x)),
            Self::Short(v) => v.get(i).map(|x| Value::Short(*x)),
            Self::Int(v) => v.get(i).map(|x| Value::Int(*x)),
            Self::Long(v) => v.get(i).map(|x| Value::Long(*x)),
            Self::Float(v) => v.get(i).map(|x| Value::Float(*x)),
            Self::Double(v) => v.get(i).map(|x| Value::Double(*x)),
            Self::Object(v) => v.get(i).cloned(),
        }
    }

    fn json_in(&self, ids: &mut HashMap<Identity, usize>) -> serde_json::Value {
        match self {
            Self::Object(v) => serde_json::Value::Array(v.iter().map(|x| x.json_in(ids)).collect()),
            other => serde_json::Value::Array(
                (0..other.len())
                    .filter_map(|i| other.get(i))
                    .map(|x| x.primitive_json())
                    .collect(),
            ),
        }
    }
}

impl ArrayData {
    /// Append elements decoded from big-endian bytes.
    pub(crate) fn extend_from_be(&mut self, bytes: &[u8]) {
        match self {
            Self::Boolean(v) => v.extend(bytes.iter().map(|&b| b != 0)),
            Self::Byte(v) => v.extend(bytes.iter().map(|&b| b as i8)),
            Self::Char(v) => v.extend(bytes.chunks_exact(2).map(|c| codec::get_char(c, 0))),
            Self::Short(v) => v.extend(bytes.chunks_exact(2).map(|c| codec::get_short(c, 0))),
            Self::Int(v) => v.extend(bytes.chunks_exact(4).map(|c| codec::get_int(c, 0))),
            Self::Long(v) => v.extend(bytes.chunks_exact(8).map(|c| codec::get_long(c, 0))),
            Self::Float(v) => v.extend(bytes.chunks_exact(4).map(|c| codec::get_float(c, 0))),
            Self::Double(v) => v.extend(bytes.chunks_exact(8).map(|c| codec::get_double(c, 0))),
            Self::Object(_) => {}
        }
    }

    /// Big-endian encoding of primitive elements; `None` for object arrays.
    pub(crate) fn to_be_bytes(&self) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Self::Boolean(v) => out.extend(v.iter().map(|&b| u8::from(b))),
            Self::Byte(v) => out.extend(v.iter().map(|&b| b as u8)),
            Self::Char(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
            Self::Short(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
            Self::Int(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
            Self::Long(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_be_bytes())),
            Self::Float(v) => v
                .iter()
                .for_each(|x| out.extend_from_slice(&x.to_bits().to_be_bytes())),
            Self::Double(v) => v
                .iter()
                .for_each(|x| out.extend_from_slice(&x.to_bits().to_be_bytes())),
            Self::Object(_) => return None,
        }
        Some(out)
    }
}

/// Primitive field value at `off` in a packed primitive block.
pub(crate) fn decode_primitive(code: TypeCode, buf: &[u8], off: usize) -> Value {
    match code {
        TypeCode::Boolean => Value::Boolean(codec::get_boolean(buf, off)),
        TypeCode::Byte => Value::Byte(codec::get_byte(buf, off)),
        TypeCode::Char => Value::Char(codec::get_char(buf, off)),
        TypeCode::Short => Value::Short(codec::get_short(buf, off)),
        TypeCode::Int => Value::Int(codec::get_int(buf, off)),
        TypeCode::Long => Value::Long(codec::get_long(buf, off)),
        TypeCode::Float => Value::Float(codec::get_float(buf, off)),
        TypeCode::Double => Value::Double(codec::get_double(buf, off)),
        TypeCode::Object | TypeCode::Array => Value::Null,
    }
}

/// Pack a primitive value at `off`; false when `v` is not a primitive.
pub(crate) fn encode_primitive(buf: &mut [u8], off: usize, v: &Value) -> bool {
    match v {
        Value::Boolean(x) => codec::put_boolean(buf, off, *x),
        Value::Byte(x) => codec::put_byte(buf, off, *x),
        Value::Char(x) => codec::put_char(buf, off, *x),
        Value::Short(x) => codec::put_short(buf, off, *x),
        Value::Int(x) => codec::put_int(buf, off, *x),
        Value::Long(x) => codec::put_long(buf, off, *x),
        Value::Float(x) => codec::put_float(buf, off, *x),
        Value::Double(x) => codec::put_double(buf, off, *x),
        _ => return false,
    }
    true
}

/// An array instance.
pub struct ArrayObject {
    desc: Arc<ClassDesc>,
    data: RwLock<ArrayData>,
}

impl ArrayObject {
    /// `data` must match the component type named by `desc`.
    pub fn new(desc: Arc<ClassDesc>, data: ArrayData) -> Result<Arc<Self>> {
        let component = desc
            .component_type()
            .ok_or_else(|| IoError::IllegalArgument(format!("not an array class: {}", desc.name())))?;
        if !data.holds(component) {
            return Err(IoError::IllegalArgument(format!(
                "{} cannot hold {} elements",
                desc.name(),
                component.name()
            )));
        }
        Ok(Arc::new(Self {
            desc,
            data: RwLock::new(data),
        }))
    }

    #[must_use]
    pub fn desc(&self) -> &Arc<ClassDesc> {
        &self.desc
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, i: usize) -> Option<Value> {
        self.data.read().get(i)
    }

    /// Borrow the elements.
    pub fn data(&self) -> RwLockReadGuard<'_, ArrayData> {
        self.data.read()
    }

    /// Replace the elements; the new storage must keep the component type.
    pub fn replace(&self, data: ArrayData) -> Result<()> {
        let component = self.desc.component_type().unwrap_or(TypeCode::Object);
        if !data.holds(component) {
            return Err(IoError::IllegalArgument(format!(
                "{} cannot hold these elements",
                self.desc.name()
            )));
        }
        *self.data.write() = data;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Enum constants
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct EnumConstant {
    pub desc: Arc<ClassDesc>,
    pub name: Arc<str>,
}

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

/// Data one class of the hierarchy contributes to an instance.
#[derive(Debug, Clone)]
pub struct Slot {
    pub desc: Arc<ClassDesc>,
    /// Parallel to `desc.fields()`.
    pub values: Vec<Value>,
    /// Custom data written after the default fields, or the whole
    /// external form of an externalizable class.
    pub extra: Vec<Content>,
}

/// A serializable object: one [`Slot`] per class, outermost superclass
/// first.
pub struct Instance {
    desc: Arc<ClassDesc>,
    slots: RwLock<Vec<Slot>>,
}

impl Instance {
    /// New instance with every field at its zero value.
    #[must_use]
    pub fn new(desc: Arc<ClassDesc>) -> Arc<Self> {
        let slots = desc
            .hierarchy()
            .into_iter()
            .map(|d| Slot {
                values: d.fields().iter().map(|f| Value::default_for(f.type_code)).collect(),
                desc: d,
                extra: Vec::new(),
            })
            .collect();
        Arc::new(Self {
            desc,
            slots: RwLock::new(slots),
        })
    }

    #[must_use]
    pub fn desc(&self) -> &Arc<ClassDesc> {
        &self.desc
    }

    #[must_use]
    pub fn class_name(&self) -> &str {
        self.desc.name()
    }

    /// Field value, searching from the most derived class.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        let slots = self.slots.read();
        slots.iter().rev().find_map(|s| {
            s.desc.field_index(name).map(|i| s.values[i].clone())
        })
    }

    /// Field value declared by `class`.
    #[must_use]
    pub fn get_in(&self, class: &str, name: &str) -> Option<Value> {
        let slots = self.slots.read();
        let slot = slots.iter().find(|s| s.desc.name() == class)?;
        slot.desc.field_index(name).map(|i| slot.values[i].clone())
    }

    /// Store a field value; the value must fit the field's type.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let mut slots = self.slots.write();
        let (slot, i) = slots
            .iter_mut()
            .rev()
            .find_map(|s| s.desc.field_index(name).map(|i| (s, i)))
            .ok_or_else(|| IoError::IllegalArgument(format!("no such field: {name}")))?;
        let field = &slot.desc.fields()[i];
        if !value.fits(field.type_code) {
            return Err(IoError::IllegalArgument(format!(
                "field {name} is {}, not {}",
                field.type_code.name(),
                value.kind_name()
            )));
        }
        slot.values[i] = value;
        Ok(())
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.read().len()
    }

    /// Snapshot of every slot.
    #[must_use]
    pub fn slots(&self) -> Vec<Slot> {
        self.slots.read().clone()
    }

    #[must_use]
    pub fn slot(&self, i: usize) -> Option<Slot> {
        self.slots.read().get(i).cloned()
    }

    /// Custom data recorded for `class`.
    #[must_use]
    pub fn extra(&self, class: &str) -> Vec<Content> {
        self.slots
            .read()
            .iter()
            .find(|s| s.desc.name() == class)
            .map(|s| s.extra.clone())
            .unwrap_or_default()
    }

    /// Append custom data for `class`, replayed when no write hook is
    /// registered for it.
    pub fn push_extra(&self, class: &str, content: Content) -> Result<()> {
        let mut slots = self.slots.write();
        let slot = slots
            .iter_mut()
            .find(|s| s.desc.name() == class)
            .ok_or_else(|| IoError::IllegalArgument(format!("{class} is not in the hierarchy")))?;
        slot.extra.push(content);
        Ok(())
    }

    pub(crate) fn set_slot_values(&self, i: usize, values: Vec<Value>) {
        if let Some(slot) = self.slots.write().get_mut(i) {
            slot.values = values;
        }
    }

    pub(crate) fn push_extra_at(&self, i: usize, content: Vec<Content>) {
        if let Some(slot) = self.slots.write().get_mut(i) {
            slot.extra.extend(content);
        }
    }

    /// Reset every field to its zero value and drop custom data, releasing
    /// whatever the instance referenced.
    pub fn clear(&self) {
        for slot in self.slots.write().iter_mut() {
            for (v, f) in slot.values.iter_mut().zip(slot.desc.fields()) {
                *v = Value::default_for(f.type_code);
            }
            slot.extra.clear();
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.desc.name())
            .field("slots", &self.slot_count())
            .finish()
    }
}

impl fmt::Debug for ArrayObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayObject")
            .field("class", &self.desc.name())
            .field("len", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Structural equality
// ---------------------------------------------------------------------------

fn deep_eq_in(a: &Value, b: &Value, seen: &mut HashSet<(Identity, Identity)>) -> bool {
    if let (Some(ia), Some(ib)) = (a.identity(), b.identity()) {
        if ia == ib {
            return true;
        }
        if !matches!((a, b), (Value::String(_), Value::String(_))) && !seen.insert((ia, ib)) {
            return true;
        }
    }
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            let (xs, ys) = (x.slots(), y.slots());
            x.class_name() == y.class_name()
                && xs.len() == ys.len()
                && xs.iter().zip(&ys).all(|(sx, sy)| {
                    sx.desc.name() == sy.desc.name()
                        && sx.values.len() == sy.values.len()
                        && sx.values.iter().zip(&sy.values).all(|(p, q)| deep_eq_in(p, q, seen))
                        && contents_eq(&sx.extra, &sy.extra, seen)
                })
        }
        (Value::Array(x), Value::Array(y)) => {
            if x.desc().name() != y.desc().name() {
                return false;
            }
            let (dx, dy) = (x.data().clone(), y.data().clone());
            match (&dx, &dy) {
                (ArrayData::Object(p), ArrayData::Object(q)) => {
                    p.len() == q.len() && p.iter().zip(q).all(|(m, n)| deep_eq_in(m, n, seen))
                }
                _ => dx.len() == dy.len() && (0..dx.len()).all(|i| dx.get(i) == dy.get(i)),
            }
        }
        (Value::Enum(x), Value::Enum(y)) => x.desc.name() == y.desc.name() && x.name == y.name,
        (Value::Class(x), Value::Class(y)) | (Value::ClassDesc(x), Value::ClassDesc(y)) => {
            x.name() == y.name() && x.suid() == y.suid()
        }
        _ => a == b,
    }
}

fn contents_eq(a: &[Content], b: &[Content], seen: &mut HashSet<(Identity, Identity)>) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|pair| match pair {
            (Content::Block(x), Content::Block(y)) => x == y,
            (Content::Object(x), Content::Object(y)) => deep_eq_in(x, y, seen),
            (Content::Reset, Content::Reset) => true,
            _ => false,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> Arc<ClassDesc> {
        ClassDesc::builder("demo.Point")
            .primitive("x", TypeCode::Int)
            .primitive("y", TypeCode::Int)
            .object("label", "Ljava/lang/String;")
            .build()
            .unwrap()
    }

    #[test]
    fn fields_start_at_zero_and_type_check() {
        let p = Instance::new(point());
        assert_eq!(p.get("x"), Some(Value::Int(0)));
        assert_eq!(p.get("label"), Some(Value::Null));
        p.set("x", 3).unwrap();
        p.set("label", "here").unwrap();
        assert_eq!(p.get("x"), Some(Value::Int(3)));
        assert_eq!(p.get("label").unwrap().as_str(), Some("here"));
        assert!(p.set("x", 3i64).is_err());
        assert!(p.set("label", 1).is_err());
        assert!(p.set("z", 1).is_err());
    }

    #[test]
    fn identity_versus_structure() {
        let a = Instance::new(point());
        let b = Instance::new(point());
        let va = Value::Object(Arc::clone(&a));
        let vb = Value::Object(b);
        assert_ne!(va, vb);
        assert!(va.deep_eq(&vb));
        assert_eq!(va, Value::Object(a));
        assert_eq!(Value::string("s"), Value::string("s"));
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
    }

    #[test]
    fn cycles_terminate() {
        let desc = ClassDesc::builder("demo.Node")
            .object("next", "Ldemo/Node;")
            .build()
            .unwrap();
        let a = Instance::new(Arc::clone(&desc));
        let b = Instance::new(desc);
        a.set("next", Value::Object(Arc::clone(&a))).unwrap();
        b.set("next", Value::Object(Arc::clone(&b))).unwrap();
        let (va, vb) = (Value::Object(Arc::clone(&a)), Value::Object(Arc::clone(&b)));
        assert!(va.deep_eq(&vb));
        let json = va.to_json();
        assert_eq!(json["data"][0]["fields"]["next"], json!({ "$ref": 0 }));
        a.clear();
        b.clear();
    }

    #[test]
    fn arrays_check_component_type() {
        let ints = Value::array("[I", ArrayData::Int(vec![1, 2, 3])).unwrap();
        let arr = ints.as_array().unwrap();
        assert_eq!(arr.len(), 3);
        assert_eq!(arr.get(1), Some(Value::Int(2)));
        assert!(Value::array("[I", ArrayData::Long(vec![1])).is_err());
        assert!(arr.replace(ArrayData::Byte(vec![])).is_err());
        assert_eq!(ints.to_json()["elements"], json!([1, 2, 3]));
    }

    #[test]
    fn primitive_packing() {
        let mut block = [0u8; 12];
        assert!(encode_primitive(&mut block, 0, &Value::Int(-1)));
        assert!(encode_primitive(&mut block, 4, &Value::Double(1.0)));
        assert!(!encode_primitive(&mut block, 0, &Value::Null));
        assert_eq!(&block[..4], &[0xFF; 4]);
        assert_eq!(decode_primitive(TypeCode::Double, &block, 4), Value::Double(1.0));

        let data = ArrayData::Short(vec![1, -2]);
        let bytes = data.to_be_bytes().unwrap();
        assert_eq!(bytes, [0, 1, 0xFF, 0xFE]);
        let mut back = ArrayData::empty(TypeCode::Short);
        back.extend_from_be(&bytes);
        assert_eq!(back.get(1), Some(Value::Short(-2)));
        assert!(ArrayData::Object(vec![]).to_be_bytes().is_none());
    }

    #[test]
    fn conversions() {
        assert_eq!(i32::try_from(&Value::Int(7)).unwrap(), 7);
        let err = i64::try_from(&Value::Int(7)).unwrap_err();
        assert_eq!(err.to_string(), "invalid object: expected long, found int");
        assert_eq!(String::try_from(&Value::from("x")).unwrap(), "x");
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }

    #[test]
    fn contents_json_shares_ids() {
        let p = Value::Object(Instance::new(point()));
        let json = contents_to_json(&[
            Content::Object(p.clone()),
            Content::Block(vec![0xAB, 0x01]),
            Content::Object(p),
            Content::Reset,
        ]);
        assert_eq!(json[1], json!({ "block": "ab01" }));
        assert_eq!(json[2], json!({ "$ref": 0 }));
        assert_eq!(json[3], json!({ "reset": true }));
    }
}
