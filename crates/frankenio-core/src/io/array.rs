//! Array-backed sources.
//!
//! All data is resident, so reads never block: an exhausted cursor reports
//! end of stream immediately. The cursor invariant is
//! `0 <= pos <= count <= buf.len()`, and `reset` returns `pos` to the last
//! mark (the starting offset when never marked).

use crate::error::{IoError, Result};
use crate::io::traits::{ByteSink, ByteSource, CharSink, CharSource};

// ---------------------------------------------------------------------------
// ByteArrayInputStream
// ---------------------------------------------------------------------------

/// Byte source reading from an owned array.
///
/// `close` has no effect: the array stays readable afterwards.
#[derive(Debug, Clone)]
pub struct ByteArrayInputStream {
    buf: Vec<u8>,
    pos: usize,
    count: usize,
    mark: usize,
}

impl ByteArrayInputStream {
    #[must_use]
    pub fn new(buf: Vec<u8>) -> Self {
        let count = buf.len();
        Self {
            buf,
            pos: 0,
            count,
            mark: 0,
        }
    }

    /// Read `buf[offset..offset + length]`, truncated to the array end.
    #[must_use]
    pub fn with_range(buf: Vec<u8>, offset: usize, length: usize) -> Self {
        let count = offset.saturating_add(length).min(buf.len());
        let pos = offset.min(count);
        Self {
            buf,
            pos,
            count,
            mark: pos,
        }
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> &[u8] {
        &self.buf[self.pos..self.count]
    }
}

impl ByteSource for ByteArrayInputStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        if self.pos >= self.count {
            return Ok(None);
        }
        let n = buf.len().min(self.count - self.pos);
        buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(Some(n))
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        if self.pos < self.count {
            let b = self.buf[self.pos];
            self.pos += 1;
            Ok(Some(b))
        } else {
            Ok(None)
        }
    }

    /// Negative counts are clamped to zero.
    fn skip(&mut self, n: i64) -> Result<i64> {
        let avail = (self.count - self.pos) as i64;
        let k = n.clamp(0, avail);
        self.pos += k as usize;
        Ok(k)
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.count - self.pos)
    }

    fn mark_supported(&self) -> bool {
        true
    }

    fn mark(&mut self, _read_limit: usize) {
        self.mark = self.pos;
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = self.mark;
        Ok(())
    }

    fn read_all_bytes(&mut self) -> Result<Vec<u8>> {
        let out = self.remaining().to_vec();
        self.pos = self.count;
        Ok(out)
    }

    fn transfer_to(&mut self, out: &mut dyn ByteSink) -> Result<u64> {
        let n = self.count - self.pos;
        out.write(self.remaining())?;
        self.pos = self.count;
        Ok(n as u64)
    }
}

// ---------------------------------------------------------------------------
// CharArrayReader
// ---------------------------------------------------------------------------

/// Character source reading from an owned array.
#[derive(Debug)]
pub struct CharArrayReader {
    buf: Option<Vec<char>>,
    pos: usize,
    count: usize,
    marked_pos: usize,
}

impl CharArrayReader {
    #[must_use]
    pub fn new(buf: Vec<char>) -> Self {
        let count = buf.len();
        Self {
            buf: Some(buf),
            pos: 0,
            count,
            marked_pos: 0,
        }
    }

    pub fn with_range(buf: Vec<char>, offset: usize, length: usize) -> Result<Self> {
        if offset > buf.len() {
            return Err(IoError::IllegalArgument(format!(
                "offset {offset} beyond array length {}",
                buf.len()
            )));
        }
        let count = offset.saturating_add(length).min(buf.len());
        Ok(Self {
            buf: Some(buf),
            pos: offset,
            count,
            marked_pos: offset,
        })
    }

    fn ensure_open(&self) -> Result<&[char]> {
        self.buf.as_deref().ok_or(IoError::Closed)
    }
}

impl CharSource for CharArrayReader {
    fn read(&mut self, out: &mut [char]) -> Result<Option<usize>> {
        let buf = self.buf.as_deref().ok_or(IoError::Closed)?;
        if out.is_empty() {
            return Ok(Some(0));
        }
        if self.pos >= self.count {
            return Ok(None);
        }
        let n = out.len().min(self.count - self.pos);
        out[..n].copy_from_slice(&buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(Some(n))
    }

    /// Skips at most the remaining characters; negative counts skip nothing.
    fn skip(&mut self, n: i64) -> Result<i64> {
        self.ensure_open()?;
        let avail = (self.count - self.pos) as i64;
        let k = n.min(avail);
        if k < 0 {
            return Ok(0);
        }
        self.pos += k as usize;
        Ok(k)
    }

    fn ready(&mut self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.count > self.pos)
    }

    fn mark_supported(&self) -> bool {
        true
    }

    fn mark(&mut self, _read_ahead_limit: usize) -> Result<()> {
        self.ensure_open()?;
        self.marked_pos = self.pos;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.pos = self.marked_pos;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.buf = None;
        Ok(())
    }

    fn transfer_to(&mut self, out: &mut dyn CharSink) -> Result<u64> {
        let buf = self.buf.as_deref().ok_or(IoError::Closed)?;
        let n = self.count.saturating_sub(self.pos);
        out.write(&buf[self.pos..self.pos + n])?;
        self.pos += n;
        Ok(n as u64)
    }
}

// ---------------------------------------------------------------------------
// StringReader
// ---------------------------------------------------------------------------

/// Character source over a string.
#[derive(Debug)]
pub struct StringReader {
    chars: Option<Vec<char>>,
    next: usize,
    mark: usize,
}

impl StringReader {
    #[must_use]
    pub fn new(s: &str) -> Self {
        Self {
            chars: Some(s.chars().collect()),
            next: 0,
            mark: 0,
        }
    }

    fn ensure_open(&self) -> Result<&[char]> {
        self.chars.as_deref().ok_or(IoError::Closed)
    }
}

impl CharSource for StringReader {
    fn read(&mut self, out: &mut [char]) -> Result<Option<usize>> {
        let chars = self.chars.as_deref().ok_or(IoError::Closed)?;
        if out.is_empty() {
            return Ok(Some(0));
        }
        if self.next >= chars.len() {
            return Ok(None);
        }
        let n = out.len().min(chars.len() - self.next);
        out[..n].copy_from_slice(&chars[self.next..self.next + n]);
        self.next += n;
        Ok(Some(n))
    }

    /// Negative counts move backwards, but never before the start.
    fn skip(&mut self, n: i64) -> Result<i64> {
        let len = self.ensure_open()?.len();
        if self.next >= len {
            return Ok(0);
        }
        let r = ((len - self.next) as i64).min(n).max(-(self.next as i64));
        self.next = (self.next as i64 + r) as usize;
        Ok(r)
    }

    fn ready(&mut self) -> Result<bool> {
        self.ensure_open()?;
        Ok(true)
    }

    fn mark_supported(&self) -> bool {
        true
    }

    fn mark(&mut self, _read_ahead_limit: usize) -> Result<()> {
        self.ensure_open()?;
        self.mark = self.next;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.next = self.mark;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.chars = None;
        Ok(())
    }
}
