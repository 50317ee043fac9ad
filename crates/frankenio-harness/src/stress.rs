//! Producer/consumer throughput through a byte pipe.
//!
//! A writer thread pushes a deterministic byte pattern through
//! [`byte_pipe`] in fixed-size chunks while the calling thread drains it.
//! Both sides hash what they moved so a lost or reordered byte shows up as
//! a digest mismatch rather than a silent pass.

use std::thread;
use std::time::Instant;

use serde::Serialize;
use sha2::{Digest, Sha256};

use frankenio_core::io::piped::byte_pipe;
use frankenio_core::{ByteSink, ByteSource, IoError};

use crate::{HarnessError, hex};

#[derive(Debug, Clone, Copy)]
pub struct StressConfig {
    /// Total bytes pushed through the pipe.
    pub bytes: u64,
    /// Pipe buffer size.
    pub pipe_size: usize,
    /// Writer chunk size.
    pub chunk: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            bytes: 1 << 20,
            pipe_size: 1024,
            chunk: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub bytes: u64,
    pub pipe_size: usize,
    pub chunk: usize,
    pub elapsed_ns: u64,
    pub bytes_per_sec: f64,
    pub writer_sha256: String,
    pub reader_sha256: String,
}

impl StressReport {
    #[must_use]
    pub fn intact(&self) -> bool {
        self.writer_sha256 == self.reader_sha256
    }
}

fn pattern_byte(i: u64) -> u8 {
    (i.wrapping_mul(31) ^ (i >> 8)) as u8
}

/// Run one transfer and report its throughput and digests.
pub fn pipe_stress(config: StressConfig) -> Result<StressReport, HarnessError> {
    if config.chunk == 0 {
        return Err(HarnessError::Invalid("chunk size must be positive".into()));
    }
    let (mut out, mut input) = byte_pipe(config.pipe_size)?;
    let StressConfig { bytes, chunk, .. } = config;
    let started = Instant::now();

    let producer = thread::spawn(move || -> Result<String, IoError> {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; chunk];
        let mut sent = 0u64;
        while sent < bytes {
            let n = chunk.min(usize::try_from(bytes - sent).unwrap_or(chunk));
            for (k, slot) in buf[..n].iter_mut().enumerate() {
                *slot = pattern_byte(sent + k as u64);
            }
            out.write(&buf[..n])?;
            hasher.update(&buf[..n]);
            sent += n as u64;
        }
        out.close()?;
        Ok(hex(&hasher.finalize()))
    });

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; config.pipe_size.max(1)];
    let mut received = 0u64;
    let drained = loop {
        match input.read(&mut buf) {
            Ok(Some(n)) => {
                hasher.update(&buf[..n]);
                received += n as u64;
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    // Closing the read end unblocks a producer stuck on a full buffer.
    let closed = input.close();
    let written = producer
        .join()
        .map_err(|_| HarnessError::Invalid("producer thread panicked".into()))?;
    drained?;
    let writer_sha256 = written?;
    closed?;

    if received != bytes {
        return Err(HarnessError::Invalid(format!(
            "received {received} of {bytes} bytes"
        )));
    }
    let elapsed = started.elapsed();
    let secs = elapsed.as_secs_f64();
    Ok(StressReport {
        bytes,
        pipe_size: config.pipe_size,
        chunk,
        elapsed_ns: u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
        bytes_per_sec: if secs > 0.0 { bytes as f64 / secs } else { 0.0 },
        writer_sha256,
        reader_sha256: hex(&hasher.finalize()),
    })
}
