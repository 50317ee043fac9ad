//! Primitive data streams and modified UTF-8.
//!
//! [`DataOutput`] and [`DataInput`] write and read every primitive in
//! big-endian order through [`codec`](crate::io::codec). The object streams
//! implement the same traits so custom serialization hooks see one API.
//!
//! Strings use modified UTF-8: UTF-16 code units, NUL encoded as two
//! bytes, supplementary characters as two three-byte surrogates, prefixed
//! by a two-byte length (at most 65535 encoded bytes).

use crate::error::{IoError, Result};
use crate::io::codec;
use crate::io::filter::{FilterCore, flush_then_close};
use crate::io::traits::{ByteSink, ByteSource};

/// Largest encoded length `write_utf` accepts.
pub const MAX_UTF_LENGTH: usize = 0xFFFF;

// ---------------------------------------------------------------------------
// Modified UTF-8
// ---------------------------------------------------------------------------

/// Encoded length of `s` in modified UTF-8.
#[must_use]
pub fn utf_length(s: &str) -> usize {
    s.encode_utf16().map(unit_length).sum()
}

#[inline]
fn unit_length(c: u16) -> usize {
    match c {
        0x0001..=0x007F => 1,
        0x0000 | 0x0080..=0x07FF => 2,
        _ => 3,
    }
}

/// Append the modified UTF-8 bytes of `s` (no length prefix).
pub fn encode_modified_utf8(s: &str, out: &mut Vec<u8>) {
    out.reserve(utf_length(s));
    for c in s.encode_utf16() {
        match unit_length(c) {
            1 => out.push(c as u8),
            2 => {
                out.push(0xC0 | ((c >> 6) & 0x1F) as u8);
                out.push(0x80 | (c & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((c >> 12) & 0x0F) as u8);
                out.push(0x80 | ((c >> 6) & 0x3F) as u8);
                out.push(0x80 | (c & 0x3F) as u8);
            }
        }
    }
}

/// Decode modified UTF-8 into a string.
///
/// Malformed sequences and unpaired surrogates fail with `UtfDataFormat`.
/// The encoding itself can carry a lone surrogate (`ED A0 80`), but a Rust
/// string cannot hold one.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    let utflen = bytes.len();
    let mut units: Vec<u16> = Vec::with_capacity(utflen);
    let mut count = 0;
    while count < utflen {
        let c = u16::from(bytes[count]);
        match c >> 4 {
            0..=7 => {
                count += 1;
                units.push(c);
            }
            12 | 13 => {
                count += 2;
                if count > utflen {
                    return Err(partial_at_end());
                }
                let c2 = u16::from(bytes[count - 1]);
                if c2 & 0xC0 != 0x80 {
                    return Err(malformed_around(count));
                }
                units.push(((c & 0x1F) << 6) | (c2 & 0x3F));
            }
            14 => {
                count += 3;
                if count > utflen {
                    return Err(partial_at_end());
                }
                let c2 = u16::from(bytes[count - 2]);
                let c3 = u16::from(bytes[count - 1]);
                if c2 & 0xC0 != 0x80 || c3 & 0xC0 != 0x80 {
                    return Err(malformed_around(count - 1));
                }
                units.push(((c & 0x0F) << 12) | ((c2 & 0x3F) << 6) | (c3 & 0x3F));
            }
            _ => return Err(malformed_around(count)),
        }
    }
    String::from_utf16(&units)
        .map_err(|_| IoError::UtfDataFormat("unpaired surrogate".into()))
}

fn partial_at_end() -> IoError {
    IoError::UtfDataFormat("malformed input: partial character at end".into())
}

fn malformed_around(count: usize) -> IoError {
    IoError::UtfDataFormat(format!("malformed input around byte {count}"))
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Big-endian primitive output.
pub trait DataOutput {
    /// Write `data` in full.
    fn write_raw(&mut self, data: &[u8]) -> Result<()>;

    fn write_boolean(&mut self, v: bool) -> Result<()> {
        self.write_raw(&[u8::from(v)])
    }

    fn write_i8(&mut self, v: i8) -> Result<()> {
        self.write_raw(&[v as u8])
    }

    fn write_short(&mut self, v: i16) -> Result<()> {
        let mut b = [0u8; 2];
        codec::put_short(&mut b, 0, v);
        self.write_raw(&b)
    }

    /// One UTF-16 code unit.
    fn write_char(&mut self, v: u16) -> Result<()> {
        let mut b = [0u8; 2];
        codec::put_char(&mut b, 0, v);
        self.write_raw(&b)
    }

    fn write_int(&mut self, v: i32) -> Result<()> {
        let mut b = [0u8; 4];
        codec::put_int(&mut b, 0, v);
        self.write_raw(&b)
    }

    fn write_long(&mut self, v: i64) -> Result<()> {
        let mut b = [0u8; 8];
        codec::put_long(&mut b, 0, v);
        self.write_raw(&b)
    }

    fn write_float(&mut self, v: f32) -> Result<()> {
        let mut b = [0u8; 4];
        codec::put_float(&mut b, 0, v);
        self.write_raw(&b)
    }

    fn write_double(&mut self, v: f64) -> Result<()> {
        let mut b = [0u8; 8];
        codec::put_double(&mut b, 0, v);
        self.write_raw(&b)
    }

    /// Low byte of each UTF-16 unit of `s`.
    fn write_bytes(&mut self, s: &str) -> Result<()> {
        let bytes: Vec<u8> = s.encode_utf16().map(|c| c as u8).collect();
        self.write_raw(&bytes)
    }

    /// Each UTF-16 unit of `s` as two bytes.
    fn write_chars(&mut self, s: &str) -> Result<()> {
        let mut bytes = Vec::with_capacity(s.len() * 2);
        for c in s.encode_utf16() {
            bytes.extend_from_slice(&c.to_be_bytes());
        }
        self.write_raw(&bytes)
    }

    /// Two-byte length followed by modified UTF-8.
    fn write_utf(&mut self, s: &str) -> Result<()> {
        let utflen = utf_length(s);
        if utflen > MAX_UTF_LENGTH {
            return Err(IoError::UtfDataFormat(format!(
                "encoded string too long: {utflen} bytes"
            )));
        }
        let mut bytes = Vec::with_capacity(utflen + 2);
        bytes.extend_from_slice(&(utflen as u16).to_be_bytes());
        encode_modified_utf8(s, &mut bytes);
        self.write_raw(&bytes)
    }

    /// Eight-byte length followed by modified UTF-8.
    fn write_long_utf(&mut self, s: &str) -> Result<()> {
        let mut bytes = Vec::with_capacity(utf_length(s) + 8);
        bytes.extend_from_slice(&(utf_length(s) as i64).to_be_bytes());
        encode_modified_utf8(s, &mut bytes);
        self.write_raw(&bytes)
    }
}

/// Big-endian primitive input. Every method fails with `UnexpectedEof`
/// when the stream ends early.
pub trait DataInput {
    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Skip up to `n` bytes, returning how many were skipped.
    fn skip_bytes(&mut self, n: usize) -> Result<usize>;

    fn read_boolean(&mut self) -> Result<bool> {
        let mut b = [0u8; 1];
        self.read_fully(&mut b)?;
        Ok(codec::get_boolean(&b, 0))
    }

    fn read_i8(&mut self) -> Result<i8> {
        let mut b = [0u8; 1];
        self.read_fully(&mut b)?;
        Ok(codec::get_byte(&b, 0))
    }

    fn read_unsigned_byte(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_fully(&mut b)?;
        Ok(b[0])
    }

    fn read_short(&mut self) -> Result<i16> {
        let mut b = [0u8; 2];
        self.read_fully(&mut b)?;
        Ok(codec::get_short(&b, 0))
    }

    fn read_unsigned_short(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_fully(&mut b)?;
        Ok(codec::get_unsigned_short(&b, 0))
    }

    fn read_char(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_fully(&mut b)?;
        Ok(codec::get_char(&b, 0))
    }

    fn read_int(&mut self) -> Result<i32> {
        let mut b = [0u8; 4];
        self.read_fully(&mut b)?;
        Ok(codec::get_int(&b, 0))
    }

    fn read_long(&mut self) -> Result<i64> {
        let mut b = [0u8; 8];
        self.read_fully(&mut b)?;
        Ok(codec::get_long(&b, 0))
    }

    fn read_float(&mut self) -> Result<f32> {
        let mut b = [0u8; 4];
        self.read_fully(&mut b)?;
        Ok(codec::get_float(&b, 0))
    }

    fn read_double(&mut self) -> Result<f64> {
        let mut b = [0u8; 8];
        self.read_fully(&mut b)?;
        Ok(codec::get_double(&b, 0))
    }

    fn read_utf(&mut self) -> Result<String> {
        let len = self.read_unsigned_short()?;
        self.read_utf_body(len as usize)
    }

    /// Read `len` bytes of modified UTF-8 without a length prefix.
    fn read_utf_body(&mut self, len: usize) -> Result<String> {
        let mut bytes = vec![0u8; len];
        self.read_fully(&mut bytes)?;
        decode_modified_utf8(&bytes)
    }
}

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

/// Byte filter writing primitives; counts the bytes written.
#[derive(Debug)]
pub struct DataOutputStream<S> {
    core: FilterCore<S>,
    written: u64,
}

impl<S: ByteSink> DataOutputStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            core: FilterCore::new(inner),
            written: 0,
        }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.written
    }

    pub fn get_ref(&self) -> Option<&S> {
        self.core.get_ref()
    }

    pub fn into_inner(self) -> Option<S> {
        self.core.into_inner()
    }
}

impl<S: ByteSink> DataOutput for DataOutputStream<S> {
    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.core.get()?.write(data)?;
        self.written += data.len() as u64;
        Ok(())
    }
}

impl<S: ByteSink> ByteSink for DataOutputStream<S> {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.write_raw(buf)
    }
    fn flush(&mut self) -> Result<()> {
        self.core.get()?.flush()
    }
    fn close(&mut self) -> Result<()> {
        self.core
            .close_with(|s| flush_then_close("data_output", s.flush(), || s.close()))
    }
}

/// Byte filter reading primitives.
#[derive(Debug)]
pub struct DataInputStream<S> {
    core: FilterCore<S>,
}

impl<S: ByteSource> DataInputStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            core: FilterCore::new(inner),
        }
    }

    pub fn get_ref(&self) -> Option<&S> {
        self.core.get_ref()
    }
}

impl<S: ByteSource> DataInput for DataInputStream<S> {
    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        self.core.get()?.read_exact(buf)
    }

    fn skip_bytes(&mut self, n: usize) -> Result<usize> {
        let inner = self.core.get()?;
        let mut total = 0usize;
        while total < n {
            let step = inner.skip((n - total) as i64)?;
            if step <= 0 {
                break;
            }
            total += step as usize;
        }
        Ok(total)
    }
}

impl<S: ByteSource> ByteSource for DataInputStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        self.core.get()?.read(buf)
    }
    fn skip(&mut self, n: i64) -> Result<i64> {
        self.core.get()?.skip(n)
    }
    fn available(&mut self) -> Result<usize> {
        self.core.get()?.available()
    }
    fn mark_supported(&self) -> bool {
        self.core.get_ref().is_some_and(|s| s.mark_supported())
    }
    fn mark(&mut self, read_limit: usize) {
        if let Ok(inner) = self.core.get() {
            inner.mark(read_limit);
        }
    }
    fn reset(&mut self) -> Result<()> {
        self.core.get()?.reset()
    }
    fn close(&mut self) -> Result<()> {
        self.core.close_with(|s| s.close())
    }
}
