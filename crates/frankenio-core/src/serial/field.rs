//! Serializable field descriptors.
//!
//! A class descriptor lists its fields in canonical order: every primitive
//! field before every object field, each group sorted by name (compared as
//! UTF-16 code units). Primitive values are packed back to back in that
//! order, so a field's `offset` is its position in the primitive block.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{IoError, Result};

/// Field type as written on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Object,
    Array,
}

impl TypeCode {
    #[must_use]
    pub const fn from_code(c: u8) -> Option<Self> {
        Some(match c {
            b'Z' => Self::Boolean,
            b'B' => Self::Byte,
            b'C' => Self::Char,
            b'S' => Self::Short,
            b'I' => Self::Int,
            b'J' => Self::Long,
            b'F' => Self::Float,
            b'D' => Self::Double,
            b'L' => Self::Object,
            b'[' => Self::Array,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Boolean => b'Z',
            Self::Byte => b'B',
            Self::Char => b'C',
            Self::Short => b'S',
            Self::Int => b'I',
            Self::Long => b'J',
            Self::Float => b'F',
            Self::Double => b'D',
            Self::Object => b'L',
            Self::Array => b'[',
        }
    }

    #[must_use]
    pub const fn is_primitive(self) -> bool {
        !matches!(self, Self::Object | Self::Array)
    }

    /// Bytes a value of this type occupies in the primitive block.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Boolean | Self::Byte => 1,
            Self::Char | Self::Short => 2,
            Self::Int | Self::Float => 4,
            Self::Long | Self::Double => 8,
            Self::Object | Self::Array => 0,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Char => "char",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// One serializable field of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStreamField {
    pub name: Arc<str>,
    pub type_code: TypeCode,
    /// JVM signature for object and array fields, e.g. `Ljava/lang/String;`.
    pub signature: Option<Arc<str>>,
    pub unshared: bool,
    /// Position in the primitive block; 0 for object fields.
    pub offset: usize,
}

impl ObjectStreamField {
    #[must_use]
    pub fn primitive(name: &str, type_code: TypeCode) -> Self {
        debug_assert!(type_code.is_primitive());
        Self {
            name: Arc::from(name),
            type_code,
            signature: None,
            unshared: false,
            offset: 0,
        }
    }

    /// Object or array field; the code is taken from the signature's
    /// first character.
    pub fn object(name: &str, signature: &str) -> Result<Self> {
        let code = signature.as_bytes().first().copied().unwrap_or(0);
        Self::from_wire(code, name, Some(Arc::from(signature)))
            .filter(|f| !f.type_code.is_primitive())
            .ok_or_else(|| IoError::IllegalArgument(format!("illegal signature: {signature}")))
    }

    /// Build from a wire type code; `None` when the code or signature is
    /// unusable.
    #[must_use]
    pub fn from_wire(code: u8, name: &str, signature: Option<Arc<str>>) -> Option<Self> {
        let type_code = TypeCode::from_code(code)?;
        let signature = if type_code.is_primitive() {
            None
        } else {
            let sig = signature?;
            if !valid_signature(&sig) || sig.as_bytes()[0] != code {
                return None;
            }
            Some(sig)
        };
        Some(Self {
            name: Arc::from(name),
            type_code,
            signature,
            unshared: false,
            offset: 0,
        })
    }

    #[must_use]
    pub fn unshared(mut self) -> Self {
        self.unshared = true;
        self
    }

    #[must_use]
    pub fn is_primitive(&self) -> bool {
        self.type_code.is_primitive()
    }

    /// Signature text: the JVM signature for references, the one-letter
    /// code for primitives.
    #[must_use]
    pub fn type_string(&self) -> String {
        match &self.signature {
            Some(s) => s.to_string(),
            None => char::from(self.type_code.code()).to_string(),
        }
    }
}

pub(crate) fn valid_signature(sig: &str) -> bool {
    let bytes = sig.as_bytes();
    let mut i = 0;
    while bytes.get(i) == Some(&b'[') {
        i += 1;
    }
    match bytes.get(i) {
        Some(b'L') => bytes.len() > i + 2 && bytes.last() == Some(&b';'),
        Some(&c) => {
            i > 0
                && i + 1 == bytes.len()
                && TypeCode::from_code(c).is_some_and(TypeCode::is_primitive)
        }
        None => false,
    }
}

/// Canonical field order: primitives first, then by UTF-16 name.
#[must_use]
pub fn canonical_order(a: &ObjectStreamField, b: &ObjectStreamField) -> Ordering {
    b.is_primitive()
        .cmp(&a.is_primitive())
        .then_with(|| a.name.encode_utf16().cmp(b.name.encode_utf16()))
}

/// Assign primitive offsets in list order.
///
/// Returns `(primitive block size, object field count)`. A primitive
/// field after an object field is an `InvalidClass` error.
pub fn compute_offsets(class: &str, fields: &mut [ObjectStreamField]) -> Result<(usize, usize)> {
    let mut prim_size = 0;
    let mut objects = 0;
    for f in fields.iter_mut() {
        if f.is_primitive() {
            if objects > 0 {
                return Err(IoError::invalid_class(class, "illegal field order"));
            }
            f.offset = prim_size;
            prim_size += f.type_code.size();
        } else {
            f.offset = 0;
            objects += 1;
        }
    }
    Ok((prim_size, objects))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_sort_and_offsets() {
        let mut fields = vec![
            ObjectStreamField::object("name", "Ljava/lang/String;").unwrap(),
            ObjectStreamField::primitive("y", TypeCode::Long),
            ObjectStreamField::primitive("x", TypeCode::Int),
            ObjectStreamField::object("data", "[B").unwrap(),
            ObjectStreamField::primitive("flag", TypeCode::Boolean),
        ];
        fields.sort_by(canonical_order);
        let names: Vec<&str> = fields.iter().map(|f| &*f.name).collect();
        assert_eq!(names, ["flag", "x", "y", "data", "name"]);
        let (prim, objs) = compute_offsets("demo.T", &mut fields).unwrap();
        assert_eq!((prim, objs), (13, 2));
        assert_eq!(fields[1].offset, 1);
        assert_eq!(fields[2].offset, 5);
    }

    #[test]
    fn primitive_after_object_is_rejected() {
        let mut fields = vec![
            ObjectStreamField::object("a", "Ljava/lang/Object;").unwrap(),
            ObjectStreamField::primitive("b", TypeCode::Int),
        ];
        let err = compute_offsets("demo.Bad", &mut fields).unwrap_err();
        assert_eq!(err.to_string(), "demo.Bad; illegal field order");
    }

    #[test]
    fn names_sort_by_utf16_units() {
        // U+1F600 encodes as D83D DE00, which sorts before FF21.
        let a = ObjectStreamField::primitive("\u{FF21}", TypeCode::Int);
        let b = ObjectStreamField::primitive("\u{1F600}", TypeCode::Int);
        assert_eq!(canonical_order(&b, &a), Ordering::Less);
    }

    #[test]
    fn signatures_are_checked() {
        assert!(ObjectStreamField::object("a", "I").is_err());
        assert!(ObjectStreamField::object("a", "Lfoo").is_err());
        assert!(ObjectStreamField::object("a", "[[Ljava/lang/String;").is_ok());
        assert!(ObjectStreamField::from_wire(b'L', "a", Some(Arc::from("[I"))).is_none());
        assert!(ObjectStreamField::from_wire(b'Q', "a", None).is_none());
        assert_eq!(
            ObjectStreamField::primitive("c", TypeCode::Char).type_string(),
            "C"
        );
    }
}
