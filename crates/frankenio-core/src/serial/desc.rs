//! Class descriptors.
//!
//! A [`ClassDesc`] is the wire-level description of one serializable
//! class: name, serial version UID, flag bits, fields in canonical order and
//! the descriptor of its nearest serializable superclass. Descriptors are
//! immutable and shared through `Arc`; a stream writes each distinct `Arc`
//! once and back-references it afterwards.
//!
//! Descriptors come from two places: [`ClassDescBuilder`] for classes
//! registered locally, and [`ClassDesc::from_wire`] for descriptors decoded
//! off a stream. Array, enum and proxy descriptors have canonical
//! constructors.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::{IoError, Result};
use crate::serial::constants::{
    SC_BLOCK_DATA, SC_ENUM, SC_EXTERNALIZABLE, SC_SERIALIZABLE, SC_WRITE_METHOD,
};
use crate::serial::field::{ObjectStreamField, TypeCode, canonical_order, compute_offsets};
use crate::serial::value::Content;

/// Serial version UIDs of the standard array classes.
const KNOWN_ARRAY_SUIDS: [(&str, u64); 10] = [
    ("[B", 0xACF3_17F8_0608_54E0),
    ("[I", 0x4DBA_6026_76EA_B2A5),
    ("[J", 0x7820_04B5_12B1_7593),
    ("[D", 0x3EA6_8C14_AB63_5A1E),
    ("[F", 0x0B9C_8189_22E0_0C42),
    ("[Z", 0x578F_2039_14B8_5DE2),
    ("[C", 0xB026_66B0_E25D_84AC),
    ("[S", 0xEF83_2E06_E55D_B0FA),
    ("[Ljava.lang.Object;", 0x90CE_589F_1073_296C),
    ("[Ljava.lang.String;", 0xADD2_56E7_E91D_7B47),
];

const ENUM_BASE: &str = "java.lang.Enum";
const PROXY_BASE: &str = "java.lang.reflect.Proxy";
const PROXY_BASE_SUID: i64 = -2_222_568_056_686_623_797;
const INVOCATION_HANDLER: &str = "Ljava/lang/reflect/InvocationHandler;";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescKind {
    Ordinary,
    Array,
    Enum,
    /// Dynamic proxy; only the interface list travels on the wire.
    Proxy { interfaces: Vec<Arc<str>> },
}

#[derive(Debug, Clone)]
pub struct ClassDesc {
    name: Arc<str>,
    suid: i64,
    flags: u8,
    fields: Vec<ObjectStreamField>,
    prim_data_size: usize,
    num_obj_fields: usize,
    kind: DescKind,
    super_desc: Option<Arc<ClassDesc>>,
    annotations: Vec<Content>,
}

impl ClassDesc {
    #[must_use]
    pub fn builder(name: &str) -> ClassDescBuilder {
        ClassDescBuilder::new(name)
    }

    /// Rebuild a descriptor decoded off a stream.
    ///
    /// Fields keep their wire order; the flag combination, enum
    /// constraints and field order are validated.
    pub fn from_wire(
        name: &str,
        suid: i64,
        flags: u8,
        mut fields: Vec<ObjectStreamField>,
        super_desc: Option<Arc<ClassDesc>>,
        annotations: Vec<Content>,
    ) -> Result<Arc<Self>> {
        if flags & SC_SERIALIZABLE != 0 && flags & SC_EXTERNALIZABLE != 0 {
            return Err(IoError::invalid_class(
                name,
                "serializable and externalizable flags conflict",
            ));
        }
        let kind = if flags & SC_ENUM != 0 {
            if suid != 0 {
                return Err(IoError::invalid_class(
                    name,
                    format!("enum descriptor has non-zero serialVersionUID: {suid}"),
                ));
            }
            if !fields.is_empty() {
                return Err(IoError::invalid_class(
                    name,
                    format!("enum descriptor has non-zero field count: {}", fields.len()),
                ));
            }
            DescKind::Enum
        } else if name.starts_with('[') {
            DescKind::Array
        } else {
            DescKind::Ordinary
        };
        let (prim_data_size, num_obj_fields) = compute_offsets(name, &mut fields)?;
        Ok(Arc::new(Self {
            name: Arc::from(name),
            suid,
            flags,
            fields,
            prim_data_size,
            num_obj_fields,
            kind,
            super_desc,
            annotations,
        }))
    }

    /// Rebuild a proxy descriptor decoded off a stream.
    #[must_use]
    pub fn proxy_from_wire(
        interfaces: Vec<Arc<str>>,
        super_desc: Option<Arc<ClassDesc>>,
        annotations: Vec<Content>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: Arc::from(proxy_name(&interfaces)),
            suid: 0,
            flags: SC_SERIALIZABLE,
            fields: Vec::new(),
            prim_data_size: 0,
            num_obj_fields: 0,
            kind: DescKind::Proxy { interfaces },
            super_desc,
            annotations,
        })
    }

    /// Canonical descriptor of an array class such as `[I` or
    /// `[Ljava.lang.String;`. Repeated calls return the same `Arc`.
    pub fn array(name: &str) -> Result<Arc<Self>> {
        static CACHE: OnceLock<Mutex<HashMap<String, Arc<ClassDesc>>>> = OnceLock::new();
        if !name.starts_with('[') || !crate::serial::field::valid_signature(name) {
            return Err(IoError::IllegalArgument(format!("not an array class: {name}")));
        }
        let mut cache = CACHE.get_or_init(|| Mutex::new(HashMap::new())).lock();
        if let Some(desc) = cache.get(name) {
            return Ok(Arc::clone(desc));
        }
        let suid = KNOWN_ARRAY_SUIDS
            .iter()
            .find(|(n, _)| *n == name)
            .map_or_else(|| default_suid(name, SC_SERIALIZABLE, &[]), |(_, s)| *s as i64);
        let desc = Arc::new(Self {
            name: Arc::from(name),
            suid,
            flags: SC_SERIALIZABLE,
            fields: Vec::new(),
            prim_data_size: 0,
            num_obj_fields: 0,
            kind: DescKind::Array,
            super_desc: None,
            annotations: Vec::new(),
        });
        cache.insert(name.to_string(), Arc::clone(&desc));
        Ok(desc)
    }

    /// Descriptor of an enum class. Enum descriptors carry no fields and a
    /// zero UID; their superclass is `java.lang.Enum`.
    #[must_use]
    pub fn enum_type(name: &str) -> Arc<Self> {
        Arc::new(Self::bare(name, 0, SC_SERIALIZABLE | SC_ENUM, DescKind::Enum, Some(Self::enum_base())))
    }

    /// Descriptor of `java.lang.Enum` itself.
    #[must_use]
    pub fn enum_base() -> Arc<Self> {
        static BASE: OnceLock<Arc<ClassDesc>> = OnceLock::new();
        Arc::clone(BASE.get_or_init(|| {
            Arc::new(Self::bare(ENUM_BASE, 0, SC_SERIALIZABLE | SC_ENUM, DescKind::Enum, None))
        }))
    }

    /// Descriptor of a proxy class implementing `interfaces`.
    #[must_use]
    pub fn proxy(interfaces: &[&str]) -> Arc<Self> {
        let interfaces = interfaces.iter().map(|i| Arc::from(*i)).collect();
        Self::proxy_from_wire(interfaces, Some(Self::proxy_base()), Vec::new())
    }

    /// Descriptor of `java.lang.reflect.Proxy` with its handler field `h`.
    #[must_use]
    pub fn proxy_base() -> Arc<Self> {
        static BASE: OnceLock<Arc<ClassDesc>> = OnceLock::new();
        Arc::clone(BASE.get_or_init(|| {
            let mut desc = Self::bare(PROXY_BASE, PROXY_BASE_SUID, SC_SERIALIZABLE, DescKind::Ordinary, None);
            desc.fields.push(ObjectStreamField {
                name: Arc::from("h"),
                type_code: TypeCode::Object,
                signature: Some(Arc::from(INVOCATION_HANDLER)),
                unshared: false,
                offset: 0,
            });
            desc.num_obj_fields = 1;
            Arc::new(desc)
        }))
    }

    fn bare(name: &str, suid: i64, flags: u8, kind: DescKind, super_desc: Option<Arc<Self>>) -> Self {
        Self {
            name: Arc::from(name),
            suid,
            flags,
            fields: Vec::new(),
            prim_data_size: 0,
            num_obj_fields: 0,
            kind,
            super_desc,
            annotations: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    #[must_use]
    pub fn suid(&self) -> i64 {
        self.suid
    }

    #[must_use]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    #[must_use]
    pub fn fields(&self) -> &[ObjectStreamField] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&ObjectStreamField> {
        self.fields.iter().find(|f| &*f.name == name)
    }

    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| &*f.name == name)
    }

    /// Size of the packed primitive block.
    #[must_use]
    pub fn prim_data_size(&self) -> usize {
        self.prim_data_size
    }

    #[must_use]
    pub fn num_obj_fields(&self) -> usize {
        self.num_obj_fields
    }

    #[must_use]
    pub fn kind(&self) -> &DescKind {
        &self.kind
    }

    #[must_use]
    pub fn super_desc(&self) -> Option<&Arc<ClassDesc>> {
        self.super_desc.as_ref()
    }

    /// Class annotations captured from (or replayed to) the stream.
    #[must_use]
    pub fn annotations(&self) -> &[Content] {
        &self.annotations
    }

    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.kind == DescKind::Enum
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.kind == DescKind::Array
    }

    #[must_use]
    pub fn is_proxy(&self) -> bool {
        matches!(self.kind, DescKind::Proxy { .. })
    }

    #[must_use]
    pub fn interfaces(&self) -> &[Arc<str>] {
        match &self.kind {
            DescKind::Proxy { interfaces } => interfaces,
            _ => &[],
        }
    }

    #[must_use]
    pub fn is_serializable(&self) -> bool {
        self.flags & SC_SERIALIZABLE != 0
    }

    #[must_use]
    pub fn is_externalizable(&self) -> bool {
        self.flags & SC_EXTERNALIZABLE != 0
    }

    /// The writer emitted custom data after (or instead of) the default
    /// fields of this class.
    #[must_use]
    pub fn has_write_method(&self) -> bool {
        self.flags & SC_WRITE_METHOD != 0
    }

    /// Externalizable data is framed as block data.
    #[must_use]
    pub fn has_block_data(&self) -> bool {
        self.flags & SC_BLOCK_DATA != 0
    }

    /// Element type code of an array class.
    #[must_use]
    pub fn component_type(&self) -> Option<TypeCode> {
        if !self.is_array() {
            return None;
        }
        self.name.as_bytes().get(1).and_then(|&c| TypeCode::from_code(c))
    }

    /// JVM field signature naming this class.
    #[must_use]
    pub fn signature(&self) -> String {
        if self.is_array() {
            self.name.replace('.', "/")
        } else {
            format!("L{};", self.name.replace('.', "/"))
        }
    }

    /// Descriptors whose data an instance carries, outermost superclass
    /// first. Externalizable classes carry only their own.
    #[must_use]
    pub fn hierarchy(self: &Arc<Self>) -> Vec<Arc<ClassDesc>> {
        if self.is_externalizable() {
            return vec![Arc::clone(self)];
        }
        let mut chain = vec![Arc::clone(self)];
        let mut cur = self.super_desc.clone();
        while let Some(d) = cur {
            cur = d.super_desc.clone();
            chain.push(d);
        }
        chain.reverse();
        chain
    }
}

fn proxy_name(interfaces: &[Arc<str>]) -> String {
    let joined: Vec<&str> = interfaces.iter().map(|i| &**i).collect();
    format!("$Proxy[{}]", joined.join(","))
}

/// Default serial version UID: the first eight bytes of a SHA-256 over the
/// class name, the flag byte and every field's name and signature.
#[must_use]
pub fn default_suid(name: &str, flags: u8, fields: &[ObjectStreamField]) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0, flags]);
    for f in fields {
        hasher.update(f.name.as_bytes());
        hasher.update([0]);
        hasher.update(f.type_string().as_bytes());
        hasher.update([0]);
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(head)
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Descriptor builder for locally registered classes.
#[derive(Debug)]
pub struct ClassDescBuilder {
    name: String,
    suid: Option<i64>,
    flags: u8,
    fields: Vec<ObjectStreamField>,
    super_desc: Option<Arc<ClassDesc>>,
    annotations: Vec<Content>,
    error: Option<IoError>,
}

impl ClassDescBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            suid: None,
            flags: SC_SERIALIZABLE,
            fields: Vec::new(),
            super_desc: None,
            annotations: Vec::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn suid(mut self, suid: i64) -> Self {
        self.suid = Some(suid);
        self
    }

    #[must_use]
    pub fn field(mut self, field: ObjectStreamField) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn primitive(self, name: &str, type_code: TypeCode) -> Self {
        if !type_code.is_primitive() {
            return self.fail(IoError::IllegalArgument(format!(
                "{} is not a primitive type",
                type_code.name()
            )));
        }
        self.field(ObjectStreamField::primitive(name, type_code))
    }

    /// Object or array field with a JVM signature such as
    /// `Ljava/lang/String;` or `[I`.
    #[must_use]
    pub fn object(self, name: &str, signature: &str) -> Self {
        match ObjectStreamField::object(name, signature) {
            Ok(f) => self.field(f),
            Err(e) => self.fail(e),
        }
    }

    /// Instances write custom data after their default fields.
    #[must_use]
    pub fn write_method(mut self) -> Self {
        self.flags |= SC_WRITE_METHOD;
        self
    }

    /// Instances carry only externally written data, block framed.
    #[must_use]
    pub fn externalizable(mut self) -> Self {
        self.flags = SC_EXTERNALIZABLE | SC_BLOCK_DATA;
        self
    }

    #[must_use]
    pub fn super_desc(mut self, desc: Arc<ClassDesc>) -> Self {
        self.super_desc = Some(desc);
        self
    }

    #[must_use]
    pub fn annotation(mut self, content: Content) -> Self {
        self.annotations.push(content);
        self
    }

    fn fail(mut self, e: IoError) -> Self {
        self.error.get_or_insert(e);
        self
    }

    pub fn build(self) -> Result<Arc<ClassDesc>> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let name = self.name;
        let mut fields = self.fields;
        if self.flags & SC_EXTERNALIZABLE != 0 && !fields.is_empty() {
            return Err(IoError::invalid_class(
                name,
                "externalizable class declares serializable fields",
            ));
        }
        let mut seen = HashSet::new();
        for f in &fields {
            if !seen.insert(f.name.clone()) {
                return Err(IoError::invalid_class(
                    name,
                    format!("duplicate field name: {}", f.name),
                ));
            }
        }
        fields.sort_by(canonical_order);
        let (prim_data_size, num_obj_fields) = compute_offsets(&name, &mut fields)?;
        let suid = self
            .suid
            .unwrap_or_else(|| default_suid(&name, self.flags, &fields));
        let kind = if name.starts_with('[') {
            DescKind::Array
        } else {
            DescKind::Ordinary
        };
        Ok(Arc::new(ClassDesc {
            name: Arc::from(name.as_str()),
            suid,
            flags: self.flags,
            fields,
            prim_data_size,
            num_obj_fields,
            kind,
            super_desc: self.super_desc,
            annotations: self.annotations,
        }))
    }
}
