//! Tooling around frankenio.
//!
//! This crate provides:
//! - Structured JSONL logs shared by the CLI and integration tests
//! - Stream inspection: decode a serialization stream to JSON, or replay it
//!   and compare digests of the input and the re-encoded bytes
//! - Pipe stress: producer/consumer throughput through a byte pipe

#![forbid(unsafe_code)]

pub mod inspect;
pub mod stress;
pub mod structured_log;

pub use inspect::{RoundTripReport, dump, roundtrip};
pub use stress::{StressConfig, StressReport, pipe_stress};

use frankenio_core::IoError;

/// Failures surfaced by the harness.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error(transparent)]
    Stream(#[from] IoError),
    #[error("file error: {0}")]
    File(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

impl HarnessError {
    /// POSIX errno for the log record, when the failure came from a stream.
    #[must_use]
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Stream(e) => Some(e.errno()),
            _ => None,
        }
    }
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex(&Sha256::digest(bytes))
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn stream_errors_carry_errno() {
        let err = HarnessError::from(IoError::Closed);
        assert!(err.errno().is_some());
        assert_eq!(HarnessError::Invalid("x".into()).errno(), None);
    }
}
