//! Byte and character streams.
//!
//! Terminal streams (`array`, `growable`, `piped`) hold or produce data
//! themselves. Filters (`filter`, `buffered`, `pushback`, `line_number`,
//! `data`) wrap exactly one inner stream and own it: closing a filter closes
//! the inner stream once and severs the link.

pub mod array;
pub mod buffered;
pub mod codec;
pub mod data;
pub mod filter;
pub mod growable;
pub mod line_number;
pub mod piped;
pub mod pushback;
pub mod shared;
pub mod traits;

pub use array::{ByteArrayInputStream, CharArrayReader, StringReader};
pub use buffered::{BufferedInputStream, BufferedOutputStream, BufferedReader, BufferedWriter};
pub use data::{DataInputStream, DataOutputStream};
pub use filter::{FilterCore, FilterInputStream, FilterOutputStream, FilterReader, FilterWriter};
pub use growable::{ByteArrayOutputStream, CharArrayWriter, StringWriter};
pub use line_number::LineNumberReader;
pub use piped::{PipedInputStream, PipedOutputStream, PipedReader, PipedWriter};
pub use pushback::{PushbackInputStream, PushbackReader};
pub use shared::{Attachment, Release, SharedResource};
pub use traits::{
    ByteSink, ByteSource, CharSink, CharSource, NullSink, NullSource, StdSink, StdSource,
    Synchronized,
};
