//! Error taxonomy for streams and the serialization protocol.
//!
//! Every fallible operation in this crate returns [`Result`]. Lower layers
//! never swallow an inner failure: they either propagate it unchanged or
//! wrap it with [`IoError::Context`], keeping the original reachable through
//! `std::error::Error::source`.

use thiserror::Error;

use crate::serial::value::Value;

/// errno values reported by [`IoError::errno`].
pub mod errno {
    pub const EIO: i32 = 5;
    pub const EBADF: i32 = 9;
    pub const ENOMEM: i32 = 12;
    pub const EINVAL: i32 = 22;
    pub const ENOSPC: i32 = 28;
    pub const EPIPE: i32 = 32;
    pub const EPROTO: i32 = 71;
    pub const EOVERFLOW: i32 = 75;
    pub const EILSEQ: i32 = 84;
    pub const ENOTSUP: i32 = 95;
    pub const EISCONN: i32 = 106;
    pub const ENOTCONN: i32 = 107;
}

/// Lifecycle failures of a piped channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipeError {
    #[error("Pipe not connected")]
    NotConnected,
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Pipe closed")]
    Closed,
    #[error("Write end dead")]
    WriteEndDead,
    #[error("Read end dead")]
    ReadEndDead,
    #[error("Pipe broken")]
    Broken,
}

#[derive(Debug, Error)]
pub enum IoError {
    // -- stream state / usage --------------------------------------------
    #[error("Stream closed")]
    Closed,
    #[error("Range [{offset}, {offset} + {len}) out of bounds for length {size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("{0}")]
    IllegalArgument(String),
    #[error("{0}")]
    IllegalState(&'static str),
    #[error("mark/reset not supported")]
    MarkUnsupported,
    #[error("{0}")]
    InvalidMark(&'static str),

    // -- overflow --------------------------------------------------------
    #[error("Pushback buffer overflow")]
    PushbackOverflow,
    #[error("Required length {required} exceeds implementation limit")]
    CapacityOverflow { required: usize },

    // -- transport -------------------------------------------------------
    #[error(transparent)]
    Pipe(#[from] PipeError),
    #[error("unexpected end of stream")]
    UnexpectedEof,
    #[error("io: {0}")]
    Os(#[from] std::io::Error),
    #[error("malformed modified UTF-8: {0}")]
    UtfDataFormat(String),

    // -- serialization protocol -----------------------------------------
    #[error("stream corrupted: {0}")]
    StreamCorrupted(String),
    #[error("{class}; {reason}")]
    InvalidClass { class: String, reason: String },
    #[error("invalid object: {0}")]
    InvalidObject(String),
    #[error("not serializable: {0}")]
    NotSerializable(String),
    #[error("{0}")]
    NotActive(&'static str),
    #[error("optional data (length {length}, eof {eof})")]
    OptionalData { length: usize, eof: bool },
    #[error("writing aborted")]
    WriteAborted(Box<Value>),

    // -- composition -----------------------------------------------------
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<IoError>,
    },
    #[error("{primary} ({} suppressed)", .suppressed.len())]
    Suppressed {
        #[source]
        primary: Box<IoError>,
        suppressed: Vec<IoError>,
    },
}

pub type Result<T> = std::result::Result<T, IoError>;

impl IoError {
    /// Build an `InvalidClass` error.
    pub fn invalid_class(class: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidClass {
            class: class.into(),
            reason: reason.into(),
        }
    }

    /// Fold a primary failure and any later ones into one error.
    ///
    /// With no later failures the primary is returned untouched.
    pub fn with_suppressed(primary: IoError, suppressed: Vec<IoError>) -> Self {
        if suppressed.is_empty() {
            primary
        } else {
            Self::Suppressed {
                primary: Box::new(primary),
                suppressed,
            }
        }
    }

    /// Failures attached as suppressed to this one.
    #[must_use]
    pub fn suppressed(&self) -> &[IoError] {
        match self {
            Self::Suppressed { suppressed, .. } => suppressed,
            _ => &[],
        }
    }

    /// The innermost error once context and suppression wrappers are removed.
    #[must_use]
    pub fn root(&self) -> &IoError {
        match self {
            Self::Context { source, .. } => source.root(),
            Self::Suppressed { primary, .. } => primary.root(),
            other => other,
        }
    }

    /// True for failures that end decoding of a serialization stream.
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(
            self.root(),
            Self::StreamCorrupted(_)
                | Self::InvalidClass { .. }
                | Self::InvalidObject(_)
                | Self::UtfDataFormat(_)
                | Self::WriteAborted(_)
        )
    }

    /// True when the failure is "operating on a closed stream".
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.root(), Self::Closed)
    }

    /// POSIX errno closest to this failure.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::Closed => errno::EBADF,
            Self::OutOfBounds { .. } | Self::IllegalArgument(_) | Self::IllegalState(_) => {
                errno::EINVAL
            }
            Self::MarkUnsupported => errno::ENOTSUP,
            Self::InvalidMark(_) => errno::EINVAL,
            Self::PushbackOverflow => errno::ENOSPC,
            Self::CapacityOverflow { .. } => errno::ENOMEM,
            Self::Pipe(PipeError::NotConnected) => errno::ENOTCONN,
            Self::Pipe(PipeError::AlreadyConnected) => errno::EISCONN,
            Self::Pipe(_) => errno::EPIPE,
            Self::UnexpectedEof => errno::EIO,
            Self::Os(e) => e.raw_os_error().unwrap_or(errno::EIO),
            Self::UtfDataFormat(_) => errno::EILSEQ,
            Self::StreamCorrupted(_)
            | Self::InvalidClass { .. }
            | Self::InvalidObject(_)
            | Self::WriteAborted(_) => errno::EPROTO,
            Self::NotSerializable(_) | Self::NotActive(_) => errno::EINVAL,
            Self::OptionalData { .. } => errno::EOVERFLOW,
            Self::Context { source, .. } => source.errno(),
            Self::Suppressed { primary, .. } => primary.errno(),
        }
    }
}

/// Attach context to a failure while keeping it as the inspectable cause.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| IoError::Context {
            context: context.into(),
            source: Box::new(source),
        })
    }
}

/// Validate `[offset, offset + len)` against a buffer of `size` elements.
pub fn check_range(offset: usize, len: usize, size: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(IoError::OutOfBounds { offset, len, size }),
    }
}
