//! Growable in-memory sinks.
//!
//! [`ByteArrayOutputStream`], [`CharArrayWriter`] and [`StringWriter`]
//! accumulate everything written to them. Each guards its state with one
//! per-instance lock, so every method takes `&self` and an `Arc` of the
//! sink can be shared between writers.
//!
//! Growth follows [`new_length`]: preferred growth is the old capacity
//! (doubling), bounded by [`SOFT_MAX_ARRAY_LENGTH`]; a required length past
//! `i32::MAX` fails with `CapacityOverflow`.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{IoError, Result, check_range};
use crate::io::traits::{ByteSink, CharSink};
use crate::trace;

/// Largest capacity handed out by the preferred-growth path.
pub const SOFT_MAX_ARRAY_LENGTH: usize = i32::MAX as usize - 8;

/// Hard ceiling on any buffer length.
pub const MAX_ARRAY_LENGTH: usize = i32::MAX as usize;

/// Initial capacity when none is given.
pub const DEFAULT_INITIAL_SIZE: usize = 32;

const GROWTH_TRACE_THRESHOLD: usize = 1 << 20;

/// Compute a new capacity given the current one and the growth needed.
///
/// Returns `old_length + max(min_growth, pref_growth)` when that stays
/// within [`SOFT_MAX_ARRAY_LENGTH`]. Otherwise the minimum required length
/// is honored: it is raised to the soft maximum when below it and fails
/// with `CapacityOverflow` when it exceeds [`MAX_ARRAY_LENGTH`].
pub fn new_length(old_length: usize, min_growth: usize, pref_growth: usize) -> Result<usize> {
    let pref_length = old_length.saturating_add(min_growth.max(pref_growth));
    if pref_length > 0 && pref_length <= SOFT_MAX_ARRAY_LENGTH {
        return Ok(pref_length);
    }
    huge_length(old_length, min_growth)
}

fn huge_length(old_length: usize, min_growth: usize) -> Result<usize> {
    match old_length.checked_add(min_growth) {
        Some(min_length) if min_length <= MAX_ARRAY_LENGTH => {
            Ok(min_length.max(SOFT_MAX_ARRAY_LENGTH))
        }
        Some(required) => Err(IoError::CapacityOverflow { required }),
        None => Err(IoError::CapacityOverflow {
            required: usize::MAX,
        }),
    }
}

fn checked_initial_size(size: i64) -> Result<usize> {
    if size < 0 {
        return Err(IoError::IllegalArgument(format!(
            "Negative initial size: {size}"
        )));
    }
    usize::try_from(size)
        .ok()
        .filter(|&s| s <= MAX_ARRAY_LENGTH)
        .ok_or(IoError::CapacityOverflow {
            required: size as usize,
        })
}

// ---------------------------------------------------------------------------
// Shared storage
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Store<T> {
    buf: Vec<T>,
    closed: bool,
}

impl<T: Copy> Store<T> {
    fn with_capacity(size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(size),
            closed: false,
        }
    }

    fn ensure_capacity(&mut self, min_capacity: usize, component: &str) -> Result<()> {
        let old = self.buf.capacity();
        if min_capacity <= old {
            return Ok(());
        }
        let target = new_length(old, min_capacity - old, old)?;
        self.buf.reserve_exact(target - self.buf.len());
        if target >= GROWTH_TRACE_THRESHOLD {
            trace::debug(
                component,
                "grow",
                serde_json::json!({ "from": old, "to": target }),
            );
        }
        Ok(())
    }

    fn append(&mut self, data: &[T], component: &str) -> Result<()> {
        if self.closed {
            return Err(IoError::Closed);
        }
        let required = self
            .buf
            .len()
            .checked_add(data.len())
            .ok_or(IoError::CapacityOverflow {
                required: usize::MAX,
            })?;
        self.ensure_capacity(required, component)?;
        self.buf.extend_from_slice(data);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ByteArrayOutputStream
// ---------------------------------------------------------------------------

/// Byte sink that collects into a growable array.
#[derive(Debug)]
pub struct ByteArrayOutputStream {
    state: Mutex<Store<u8>>,
}

impl Default for ByteArrayOutputStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteArrayOutputStream {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INITIAL_SIZE)
    }

    #[must_use]
    pub fn with_capacity(size: usize) -> Self {
        Self {
            state: Mutex::new(Store::with_capacity(size)),
        }
    }

    /// Checked constructor for sizes that arrive as signed values.
    pub fn with_size(size: i64) -> Result<Self> {
        Ok(Self::with_capacity(checked_initial_size(size)?))
    }

    /// Append `data` in one step.
    pub fn write_bytes(&self, data: &[u8]) -> Result<()> {
        self.state.lock().append(data, "byte_array_output")
    }

    /// Append `data[off..off + len]`.
    pub fn write_range(&self, data: &[u8], off: usize, len: usize) -> Result<()> {
        check_range(off, len, data.len())?;
        self.write_bytes(&data[off..off + len])
    }

    /// Copy the complete contents to `out` without consuming them.
    pub fn write_to(&self, out: &mut dyn ByteSink) -> Result<()> {
        let state = self.state.lock();
        out.write(&state.buf)
    }

    /// Discard the contents, keeping the allocated capacity.
    pub fn reset(&self) {
        self.state.lock().buf.clear();
    }

    /// Independent copy of the valid bytes.
    #[must_use]
    pub fn to_byte_array(&self) -> Vec<u8> {
        self.state.lock().buf.clone()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.state.lock().buf.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.lock().buf.capacity()
    }

    /// Contents decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().buf).into_owned()
    }

    /// Refuse further writes. The contents stay readable.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Take the contents, leaving the sink empty.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.state.into_inner().buf
    }
}

impl ByteSink for ByteArrayOutputStream {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.write_bytes(buf)
    }
    fn close(&mut self) -> Result<()> {
        ByteArrayOutputStream::close(self);
        Ok(())
    }
}

impl ByteSink for Arc<ByteArrayOutputStream> {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.write_bytes(buf)
    }
    fn close(&mut self) -> Result<()> {
        ByteArrayOutputStream::close(self);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CharArrayWriter
// ---------------------------------------------------------------------------

/// Character sink that collects into a growable array.
#[derive(Debug)]
pub struct CharArrayWriter {
    state: Mutex<Store<char>>,
}

impl Default for CharArrayWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl CharArrayWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INITIAL_SIZE)
    }

    #[must_use]
    pub fn with_capacity(size: usize) -> Self {
        Self {
            state: Mutex::new(Store::with_capacity(size)),
        }
    }

    pub fn with_size(size: i64) -> Result<Self> {
        Ok(Self::with_capacity(checked_initial_size(size)?))
    }

    pub fn write_chars(&self, data: &[char]) -> Result<()> {
        self.state.lock().append(data, "char_array_writer")
    }

    /// Append the characters of `s`.
    pub fn append(&self, s: &str) -> Result<()> {
        let chars: Vec<char> = s.chars().collect();
        self.write_chars(&chars)
    }

    pub fn write_to(&self, out: &mut dyn CharSink) -> Result<()> {
        let state = self.state.lock();
        out.write(&state.buf)
    }

    pub fn reset(&self) {
        self.state.lock().buf.clear();
    }

    #[must_use]
    pub fn to_char_array(&self) -> Vec<char> {
        self.state.lock().buf.clone()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.state.lock().buf.len()
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
    }
}

impl fmt::Display for CharArrayWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: String = self.state.lock().buf.iter().collect();
        f.write_str(&text)
    }
}

impl CharSink for CharArrayWriter {
    fn write(&mut self, buf: &[char]) -> Result<()> {
        self.write_chars(buf)
    }
    fn close(&mut self) -> Result<()> {
        CharArrayWriter::close(self);
        Ok(())
    }
}

impl CharSink for Arc<CharArrayWriter> {
    fn write(&mut self, buf: &[char]) -> Result<()> {
        self.write_chars(buf)
    }
    fn close(&mut self) -> Result<()> {
        CharArrayWriter::close(self);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StringWriter
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TextState {
    text: String,
    closed: bool,
}

/// Character sink backed by a `String`.
#[derive(Debug, Default)]
pub struct StringWriter {
    state: Mutex<TextState>,
}

impl StringWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(size: i64) -> Result<Self> {
        let cap = checked_initial_size(size)?;
        Ok(Self {
            state: Mutex::new(TextState {
                text: String::with_capacity(cap),
                closed: false,
            }),
        })
    }

    pub fn append(&self, s: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(IoError::Closed);
        }
        state.text.push_str(s);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().text.chars().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().text.is_empty()
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.state.into_inner().text
    }
}

impl fmt::Display for StringWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.state.lock().text)
    }
}

impl CharSink for StringWriter {
    fn write(&mut self, buf: &[char]) -> Result<()> {
        let s: String = buf.iter().collect();
        self.append(&s)
    }
    fn write_str(&mut self, s: &str) -> Result<()> {
        self.append(s)
    }
    fn close(&mut self) -> Result<()> {
        StringWriter::close(self);
        Ok(())
    }
}

impl CharSink for Arc<StringWriter> {
    fn write(&mut self, buf: &[char]) -> Result<()> {
        let s: String = buf.iter().collect();
        self.append(&s)
    }
    fn write_str(&mut self, s: &str) -> Result<()> {
        self.append(s)
    }
    fn close(&mut self) -> Result<()> {
        StringWriter::close(self);
        Ok(())
    }
}
