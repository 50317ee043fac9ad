//! Local class bindings.
//!
//! A [`TypeRegistry`] maps class names to what this process knows about
//! them: the local descriptor, optional custom-data hooks and, for enums,
//! the constant names. Streams consult it to validate incoming
//! descriptors and to run hooks in place of default field handling.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{IoError, Result};
use crate::serial::desc::ClassDesc;
use crate::serial::reader::ReadContext;
use crate::serial::value::{Instance, Value};
use crate::serial::writer::WriteContext;

/// Custom writer for one class of an object's hierarchy.
pub type WriteHook = Arc<dyn Fn(&Arc<Instance>, &mut WriteContext<'_>) -> Result<()> + Send + Sync>;

/// Custom reader for one class of an object's hierarchy.
pub type ReadHook = Arc<dyn Fn(&Arc<Instance>, &mut ReadContext<'_>) -> Result<()> + Send + Sync>;

/// Everything registered for one class.
#[derive(Clone)]
pub struct ClassBinding {
    desc: Arc<ClassDesc>,
    write_hook: Option<WriteHook>,
    read_hook: Option<ReadHook>,
    constants: Option<Vec<Arc<str>>>,
}

impl ClassBinding {
    #[must_use]
    pub fn new(desc: Arc<ClassDesc>) -> Self {
        Self {
            desc,
            write_hook: None,
            read_hook: None,
            constants: None,
        }
    }

    /// Hook run while writing this class's slot. It is only invoked for
    /// descriptors flagged with a write method, or externalizable ones.
    #[must_use]
    pub fn on_write<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Arc<Instance>, &mut WriteContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.write_hook = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_read<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Arc<Instance>, &mut ReadContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.read_hook = Some(Arc::new(hook));
        self
    }

    /// Known constant names of an enum class.
    #[must_use]
    pub fn constants(mut self, names: &[&str]) -> Self {
        self.constants = Some(names.iter().map(|n| Arc::from(*n)).collect());
        self
    }

    #[must_use]
    pub fn desc(&self) -> &Arc<ClassDesc> {
        &self.desc
    }

    #[must_use]
    pub fn write_hook(&self) -> Option<&WriteHook> {
        self.write_hook.as_ref()
    }

    #[must_use]
    pub fn read_hook(&self) -> Option<&ReadHook> {
        self.read_hook.as_ref()
    }
}

impl fmt::Debug for ClassBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassBinding")
            .field("class", &self.desc.name())
            .field("write_hook", &self.write_hook.is_some())
            .field("read_hook", &self.read_hook.is_some())
            .field("constants", &self.constants)
            .finish()
    }
}

/// Class name to local binding.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    classes: HashMap<String, ClassBinding>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binding, replacing any earlier one for the same class.
    pub fn register(&mut self, binding: ClassBinding) -> Option<ClassBinding> {
        self.classes
            .insert(binding.desc.name().to_string(), binding)
    }

    #[must_use]
    pub fn get(&self, class: &str) -> Option<&ClassBinding> {
        self.classes.get(class)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub(crate) fn write_hook(&self, class: &str) -> Option<WriteHook> {
        self.get(class).and_then(|b| b.write_hook.clone())
    }

    pub(crate) fn read_hook(&self, class: &str) -> Option<ReadHook> {
        self.get(class).and_then(|b| b.read_hook.clone())
    }

    /// Check a descriptor read from a stream against the local binding.
    /// Unknown classes pass: their data is kept as read.
    pub fn validate(&self, stream: &ClassDesc) -> Result<()> {
        let Some(binding) = self.get(stream.name()) else {
            return Ok(());
        };
        let local = &binding.desc;
        let class = stream.name();
        if stream.is_enum() != local.is_enum() {
            let reason = if stream.is_enum() {
                "cannot bind enum descriptor to a non-enum class"
            } else {
                "cannot bind non-enum descriptor to an enum class"
            };
            return Err(IoError::invalid_class(class, reason));
        }
        if stream.is_serializable() == local.is_externalizable()
            && (stream.is_serializable() || stream.is_externalizable())
            && (local.is_serializable() || local.is_externalizable())
        {
            return Err(IoError::invalid_class(
                class,
                "Serializable incompatible with Externalizable",
            ));
        }
        if !stream.is_enum() && !stream.is_array() && stream.suid() != local.suid() {
            return Err(IoError::invalid_class(
                class,
                format!(
                    "local class incompatible: stream classdesc serialVersionUID = {}, \
                     local class serialVersionUID = {}",
                    stream.suid(),
                    local.suid()
                ),
            ));
        }
        for field in stream.fields() {
            if let Some(mine) = local.field(&field.name) {
                let primitive = field.is_primitive() || mine.is_primitive();
                if primitive && field.type_code != mine.type_code {
                    return Err(IoError::invalid_class(
                        class,
                        format!("incompatible types for field {}", field.name),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Fail when the class is bound with a constant list that lacks `name`.
    pub fn check_enum_constant(&self, desc: &ClassDesc, name: &str) -> Result<()> {
        match self.get(desc.name()).and_then(|b| b.constants.as_ref()) {
            Some(names) if !names.iter().any(|n| &**n == name) => Err(IoError::InvalidObject(
                format!("enum constant {name} does not exist in {}", desc.name()),
            )),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed field tables
// ---------------------------------------------------------------------------

/// Maps one serializable field to a Rust struct member.
pub struct FieldAccessor<T> {
    name: Arc<str>,
    get: fn(&T) -> Value,
    set: fn(&mut T, &Value) -> Result<()>,
}

/// Converts between a plain Rust type and an [`Instance`] of one class,
/// field by field.
pub struct FieldTable<T> {
    desc: Arc<ClassDesc>,
    accessors: Vec<FieldAccessor<T>>,
}

impl<T> FieldTable<T> {
    #[must_use]
    pub fn new(desc: Arc<ClassDesc>) -> Self {
        Self {
            desc,
            accessors: Vec::new(),
        }
    }

    pub fn field(
        mut self,
        name: &str,
        get: fn(&T) -> Value,
        set: fn(&mut T, &Value) -> Result<()>,
    ) -> Result<Self> {
        let field = self
            .desc
            .field(name)
            .ok_or_else(|| IoError::IllegalArgument(format!("no such field: {name}")))?;
        let name = Arc::clone(&field.name);
        self.accessors.push(FieldAccessor { name, get, set });
        Ok(self)
    }

    #[must_use]
    pub fn desc(&self) -> &Arc<ClassDesc> {
        &self.desc
    }

    pub fn to_value(&self, obj: &T) -> Result<Value> {
        let inst = Instance::new(Arc::clone(&self.desc));
        for a in &self.accessors {
            inst.set(&a.name, (a.get)(obj))?;
        }
        Ok(Value::Object(inst))
    }

    /// Rebuild `T`; fields missing from the instance keep `T::default()`.
    pub fn from_value(&self, v: &Value) -> Result<T>
    where
        T: Default,
    {
        let inst = match v {
            Value::Object(inst) if inst.class_name() == self.desc.name() => inst,
            Value::Object(inst) => {
                return Err(IoError::InvalidObject(format!(
                    "expected {}, found {}",
                    self.desc.name(),
                    inst.class_name()
                )));
            }
            other => {
                return Err(IoError::InvalidObject(format!(
                    "expected {}, found {}",
                    self.desc.name(),
                    other.kind_name()
                )));
            }
        };
        let mut out = T::default();
        for a in &self.accessors {
            if let Some(value) = inst.get_in(self.desc.name(), &a.name) {
                (a.set)(&mut out, &value)?;
            }
        }
        Ok(out)
    }
}

impl<T> fmt::Debug for FieldTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldTable")
            .field("class", &self.desc.name())
            .field(
                "fields",
                &self.accessors.iter().map(|a| &*a.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::field::TypeCode;

    fn point(suid: i64) -> Arc<ClassDesc> {
        ClassDesc::builder("demo.Point")
            .suid(suid)
            .primitive("x", TypeCode::Int)
            .primitive("y", TypeCode::Int)
            .build()
            .unwrap()
    }

    #[test]
    fn unknown_classes_pass() {
        let reg = TypeRegistry::new();
        assert!(reg.validate(&point(1)).is_ok());
    }

    #[test]
    fn suid_mismatch() {
        let mut reg = TypeRegistry::new();
        reg.register(ClassBinding::new(point(1)));
        let err = reg.validate(&point(2)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "demo.Point; local class incompatible: stream classdesc serialVersionUID = 2, \
             local class serialVersionUID = 1"
        );
    }

    #[test]
    fn enum_kind_mismatch() {
        let mut reg = TypeRegistry::new();
        reg.register(ClassBinding::new(
            ClassDesc::builder("demo.Color").suid(0).build().unwrap(),
        ));
        let err = reg.validate(&ClassDesc::enum_type("demo.Color")).unwrap_err();
        assert!(err.to_string().contains("cannot bind enum descriptor"));
    }

    #[test]
    fn serializable_vs_externalizable() {
        let mut reg = TypeRegistry::new();
        reg.register(ClassBinding::new(
            ClassDesc::builder("demo.Point").suid(1).externalizable().build().unwrap(),
        ));
        let err = reg.validate(&point(1)).unwrap_err();
        assert!(err.to_string().ends_with("Serializable incompatible with Externalizable"));
    }

    #[test]
    fn field_type_mismatch() {
        let mut reg = TypeRegistry::new();
        reg.register(ClassBinding::new(point(1)));
        let stream = ClassDesc::builder("demo.Point")
            .suid(1)
            .primitive("x", TypeCode::Long)
            .build()
            .unwrap();
        let err = reg.validate(&stream).unwrap_err();
        assert_eq!(err.to_string(), "demo.Point; incompatible types for field x");
    }

    #[test]
    fn enum_constants() {
        let color = ClassDesc::enum_type("demo.Color");
        let mut reg = TypeRegistry::new();
        reg.register(ClassBinding::new(Arc::clone(&color)).constants(&["RED", "GREEN"]));
        assert!(reg.check_enum_constant(&color, "RED").is_ok());
        let err = reg.check_enum_constant(&color, "BLUE").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid object: enum constant BLUE does not exist in demo.Color"
        );
    }

    #[derive(Debug, Default, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    fn int(v: &Value) -> Result<i32> {
        i32::try_from(v)
    }

    #[test]
    fn field_table_round_trip() {
        let table = FieldTable::<Point>::new(point(1))
            .field("x", |p| Value::Int(p.x), |p, v| Ok(p.x = int(v)?))
            .unwrap()
            .field("y", |p| Value::Int(p.y), |p, v| Ok(p.y = int(v)?))
            .unwrap();
        let v = table.to_value(&Point { x: 3, y: -4 }).unwrap();
        assert_eq!(v.as_object().unwrap().get("y"), Some(Value::Int(-4)));
        assert_eq!(table.from_value(&v).unwrap(), Point { x: 3, y: -4 });
        assert!(table.from_value(&Value::Int(1)).is_err());
        assert!(FieldTable::<Point>::new(point(1))
            .field("z", |_| Value::Null, |_, _| Ok(()))
            .is_err());
    }
}
