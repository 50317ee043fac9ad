//! Object-serialization wire protocol.
//!
//! [`ObjectOutputStream`] turns [`Value`] graphs into the tagged stream
//! format; [`ObjectInputStream`] turns them back. Classes are described by
//! [`ClassDesc`]; a [`TypeRegistry`] binds descriptors to local knowledge
//! (UIDs to check, custom-data hooks, enum constants).

pub mod block;
pub mod constants;
pub mod desc;
pub mod field;
pub mod handles;
pub mod reader;
pub mod registry;
pub mod value;
pub mod writer;

pub use block::{BlockDataInput, BlockDataOutput};
pub use constants::Tag;
pub use desc::{ClassDesc, ClassDescBuilder, DescKind};
pub use field::{ObjectStreamField, TypeCode};
pub use reader::{GetField, ObjectInputStream, ReadContext};
pub use registry::{ClassBinding, FieldTable, ReadHook, TypeRegistry, WriteHook};
pub use value::{ArrayData, ArrayObject, Content, EnumConstant, Instance, Slot, Value, contents_to_json};
pub use writer::{ObjectOutputStream, PutField, WriteContext};
