//! Decode serialization streams for inspection and replay them.

use serde::Serialize;

use frankenio_core::io::{ByteArrayInputStream, ByteArrayOutputStream};
use frankenio_core::serial::{Content, ObjectInputStream, ObjectOutputStream, contents_to_json};

use crate::{HarnessError, sha256_hex};

/// Every top-level item of a serialization stream.
pub fn read_contents(bytes: &[u8]) -> Result<Vec<Content>, HarnessError> {
    let mut input = ObjectInputStream::new(ByteArrayInputStream::new(bytes.to_vec()))?;
    let mut items = Vec::new();
    while let Some(item) = input.read_content()? {
        items.push(item);
    }
    Ok(items)
}

/// Decode a stream into its JSON rendering.
pub fn dump(bytes: &[u8]) -> Result<serde_json::Value, HarnessError> {
    Ok(contents_to_json(&read_contents(bytes)?))
}

/// Outcome of decoding and re-encoding a stream.
#[derive(Debug, Clone, Serialize)]
pub struct RoundTripReport {
    pub items: usize,
    pub protocol: u8,
    pub input_len: usize,
    pub output_len: usize,
    pub input_sha256: String,
    pub output_sha256: String,
    pub identical: bool,
    /// Offset of the first differing byte, when the outputs differ.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_difference: Option<usize>,
}

/// Decode `bytes`, write every item back out with `protocol`, and compare.
pub fn roundtrip(bytes: &[u8], protocol: u8) -> Result<RoundTripReport, HarnessError> {
    let items = read_contents(bytes)?;
    let mut output = ObjectOutputStream::new(ByteArrayOutputStream::new())?;
    output.use_protocol_version(protocol)?;
    for item in &items {
        output.write_content(item)?;
    }
    let encoded = output.into_inner()?.into_inner();

    let first_difference = bytes
        .iter()
        .zip(&encoded)
        .position(|(a, b)| a != b)
        .or_else(|| (bytes.len() != encoded.len()).then(|| bytes.len().min(encoded.len())));
    Ok(RoundTripReport {
        items: items.len(),
        protocol,
        input_len: bytes.len(),
        output_len: encoded.len(),
        input_sha256: sha256_hex(bytes),
        output_sha256: sha256_hex(&encoded),
        identical: first_difference.is_none(),
        first_difference,
    })
}
