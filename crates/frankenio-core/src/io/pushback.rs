//! Pushback filters.
//!
//! Unread data sits at the tail of a fixed buffer: `pos` is the first
//! pending element and `[pos, capacity)` is drained front to back before
//! the inner stream is consulted. Unreading more than the free space fails
//! with `PushbackOverflow` and leaves the buffer untouched.

use crate::error::{IoError, Result};
use crate::io::filter::FilterCore;
use crate::io::traits::{ByteSource, CharSource};

fn checked_size(size: usize) -> Result<usize> {
    if size == 0 {
        return Err(IoError::IllegalArgument("size <= 0".into()));
    }
    Ok(size)
}

#[derive(Debug)]
struct Pushback<T> {
    buf: Vec<T>,
    pos: usize,
}

impl<T: Copy + Default> Pushback<T> {
    fn new(size: usize) -> Self {
        Self {
            buf: vec![T::default(); size],
            pos: size,
        }
    }

    fn pending(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn unread_one(&mut self, v: T) -> Result<()> {
        if self.pos == 0 {
            return Err(IoError::PushbackOverflow);
        }
        self.pos -= 1;
        self.buf[self.pos] = v;
        Ok(())
    }

    fn unread(&mut self, data: &[T]) -> Result<()> {
        if data.len() > self.pos {
            return Err(IoError::PushbackOverflow);
        }
        self.pos -= data.len();
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn take_one(&mut self) -> Option<T> {
        (self.pos < self.buf.len()).then(|| {
            let v = self.buf[self.pos];
            self.pos += 1;
            v
        })
    }

    fn drain_into(&mut self, out: &mut [T]) -> usize {
        let n = self.pending().min(out.len());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    fn skip(&mut self, n: usize) -> usize {
        let k = self.pending().min(n);
        self.pos += k;
        k
    }

    fn release(&mut self) {
        self.buf = Vec::new();
        self.pos = 0;
    }
}

// ---------------------------------------------------------------------------
// PushbackReader
// ---------------------------------------------------------------------------

/// Character filter that lets characters be pushed back onto the stream.
///
/// `mark` and `reset` always fail.
#[derive(Debug)]
pub struct PushbackReader<R> {
    core: FilterCore<R>,
    back: Pushback<char>,
}

impl<R: CharSource> PushbackReader<R> {
    /// Pushback capacity of one character.
    pub fn new(inner: R) -> Self {
        Self {
            core: FilterCore::new(inner),
            back: Pushback::new(1),
        }
    }

    pub fn with_capacity(inner: R, size: usize) -> Result<Self> {
        Ok(Self {
            core: FilterCore::new(inner),
            back: Pushback::new(checked_size(size)?),
        })
    }

    /// Push one character back; it is the next one read.
    pub fn unread(&mut self, c: char) -> Result<()> {
        self.core.ensure_open()?;
        self.back.unread_one(c)
    }

    /// Push `data` back so that `data[0]` is the next character read.
    pub fn unread_slice(&mut self, data: &[char]) -> Result<()> {
        self.core.ensure_open()?;
        self.back.unread(data)
    }

    /// Characters currently pushed back.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.back.pending()
    }
}

impl<R: CharSource> CharSource for PushbackReader<R> {
    fn read(&mut self, out: &mut [char]) -> Result<Option<usize>> {
        self.core.ensure_open()?;
        if out.is_empty() {
            return Ok(Some(0));
        }
        let n = self.back.drain_into(out);
        if n == out.len() {
            return Ok(Some(n));
        }
        match self.core.get()?.read(&mut out[n..])? {
            Some(k) => Ok(Some(n + k)),
            None if n > 0 => Ok(Some(n)),
            None => Ok(None),
        }
    }

    fn read_char(&mut self) -> Result<Option<char>> {
        self.core.ensure_open()?;
        match self.back.take_one() {
            Some(c) => Ok(Some(c)),
            None => self.core.get()?.read_char(),
        }
    }

    fn skip(&mut self, n: i64) -> Result<i64> {
        if n < 0 {
            return Err(IoError::IllegalArgument("skip value is negative".into()));
        }
        self.core.ensure_open()?;
        let from_back = self.back.skip(n as usize) as i64;
        if from_back == n {
            return Ok(n);
        }
        Ok(from_back + self.core.get()?.skip(n - from_back)?)
    }

    fn ready(&mut self) -> Result<bool> {
        self.core.ensure_open()?;
        Ok(self.back.pending() > 0 || self.core.get()?.ready()?)
    }

    fn mark_supported(&self) -> bool {
        false
    }

    fn mark(&mut self, _read_ahead_limit: usize) -> Result<()> {
        Err(IoError::MarkUnsupported)
    }

    fn reset(&mut self) -> Result<()> {
        Err(IoError::MarkUnsupported)
    }

    fn close(&mut self) -> Result<()> {
        let result = self.core.close_with(|r| r.close());
        self.back.release();
        result
    }
}

// ---------------------------------------------------------------------------
// PushbackInputStream
// ---------------------------------------------------------------------------

/// Byte filter that lets bytes be pushed back onto the stream.
#[derive(Debug)]
pub struct PushbackInputStream<S> {
    core: FilterCore<S>,
    back: Pushback<u8>,
}

impl<S: ByteSource> PushbackInputStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            core: FilterCore::new(inner),
            back: Pushback::new(1),
        }
    }

    pub fn with_capacity(inner: S, size: usize) -> Result<Self> {
        Ok(Self {
            core: FilterCore::new(inner),
            back: Pushback::new(checked_size(size)?),
        })
    }

    pub fn unread(&mut self, b: u8) -> Result<()> {
        self.core.ensure_open()?;
        self.back.unread_one(b)
    }

    pub fn unread_slice(&mut self, data: &[u8]) -> Result<()> {
        self.core.ensure_open()?;
        self.back.unread(data)
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.back.pending()
    }
}

impl<S: ByteSource> ByteSource for PushbackInputStream<S> {
    fn read(&mut self, out: &mut [u8]) -> Result<Option<usize>> {
        self.core.ensure_open()?;
        if out.is_empty() {
            return Ok(Some(0));
        }
        let n = self.back.drain_into(out);
        if n == out.len() {
            return Ok(Some(n));
        }
        match self.core.get()?.read(&mut out[n..])? {
            Some(k) => Ok(Some(n + k)),
            None if n > 0 => Ok(Some(n)),
            None => Ok(None),
        }
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        self.core.ensure_open()?;
        match self.back.take_one() {
            Some(b) => Ok(Some(b)),
            None => self.core.get()?.read_byte(),
        }
    }

    fn skip(&mut self, n: i64) -> Result<i64> {
        self.core.ensure_open()?;
        if n <= 0 {
            return Ok(0);
        }
        let from_back = self.back.skip(n as usize) as i64;
        if from_back == n {
            return Ok(n);
        }
        Ok(from_back + self.core.get()?.skip(n - from_back)?)
    }

    fn available(&mut self) -> Result<usize> {
        self.core.ensure_open()?;
        let inner = self.core.get()?.available()?;
        Ok(self.back.pending().saturating_add(inner))
    }

    fn mark_supported(&self) -> bool {
        false
    }

    fn reset(&mut self) -> Result<()> {
        Err(IoError::MarkUnsupported)
    }

    fn close(&mut self) -> Result<()> {
        let result = self.core.close_with(|s| s.close());
        self.back.release();
        result
    }
}
