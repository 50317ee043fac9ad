//! # frankenio-core
//!
//! Layered byte/character streams and the tagged object-serialization
//! wire protocol.
//!
//! The `io` tree holds the stream capabilities and their implementations:
//! terminal array sources, growable sinks, filter decorators (buffering,
//! pushback, line counting), the piped channel and the data streams.
//! The `serial` tree encodes and decodes object graphs on top of any byte
//! sink/source using the big-endian primitive codec.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod io;
pub mod serial;
pub mod trace;

pub use error::{IoError, PipeError, Result, ResultExt};
pub use io::traits::{ByteSink, ByteSource, CharSink, CharSource, Synchronized};
