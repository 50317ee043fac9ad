//! Buffering filters.
//!
//! [`BufferedWriter`] holds its state behind a per-instance lock so one
//! writer can be shared (`Arc<BufferedWriter<_>>`) between threads; every
//! mutating call takes the lock for its whole duration. The reader and
//! byte-stream variants rely on `&mut self` exclusivity and are wrapped in
//! [`Synchronized`](crate::io::traits::Synchronized) when shared.
//!
//! Writes at least as long as the buffer bypass it: pending data is
//! flushed first, then the caller's data goes straight to the sink.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{self, IoConfig, LineSeparator};
use crate::error::{IoError, Result};
use crate::io::filter::{FilterCore, flush_then_close};
use crate::io::growable::new_length;
use crate::io::traits::{ByteSink, ByteSource, CharSink, CharSource};
use crate::trace;

fn checked_size(size: usize) -> Result<usize> {
    if size == 0 {
        return Err(IoError::IllegalArgument("Buffer size <= 0".into()));
    }
    Ok(size)
}

// ---------------------------------------------------------------------------
// BufferedWriter
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct WriterState<W> {
    core: FilterCore<W>,
    cb: Vec<char>,
    next_char: usize,
    separator: &'static str,
}

impl<W: CharSink> WriterState<W> {
    fn flush_buffer(&mut self) -> Result<()> {
        let out = self.core.get()?;
        if self.next_char == 0 {
            return Ok(());
        }
        out.write(&self.cb[..self.next_char])?;
        self.next_char = 0;
        Ok(())
    }

    fn write_char(&mut self, c: char) -> Result<()> {
        self.core.ensure_open()?;
        if self.next_char >= self.cb.len() {
            self.flush_buffer()?;
        }
        self.cb[self.next_char] = c;
        self.next_char += 1;
        Ok(())
    }

    fn write(&mut self, data: &[char]) -> Result<()> {
        self.core.ensure_open()?;
        let n_chars = self.cb.len();
        if data.len() >= n_chars {
            self.flush_buffer()?;
            return self.core.get()?.write(data);
        }
        let mut b = 0;
        while b < data.len() {
            let d = (n_chars - self.next_char).min(data.len() - b);
            self.cb[self.next_char..self.next_char + d].copy_from_slice(&data[b..b + d]);
            b += d;
            self.next_char += d;
            if self.next_char >= n_chars {
                self.flush_buffer()?;
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let WriterState {
            core,
            cb,
            next_char,
            ..
        } = self;
        let result = core.close_with(|out| {
            let flushed = if *next_char > 0 {
                out.write(&cb[..*next_char]).map(|()| *next_char = 0)
            } else {
                Ok(())
            };
            flush_then_close("buffered_writer", flushed, || out.close())
        });
        *cb = Vec::new();
        *next_char = 0;
        result
    }
}

/// Character sink that batches writes into a fixed-size buffer.
#[derive(Debug)]
pub struct BufferedWriter<W> {
    state: Mutex<WriterState<W>>,
}

impl<W: CharSink> BufferedWriter<W> {
    /// Writer with the configured default buffer size.
    pub fn new(out: W) -> Self {
        let size = config::default_buffer_size().max(1);
        Self::build(out, size, config::line_separator())
    }

    pub fn with_capacity(out: W, size: usize) -> Result<Self> {
        Ok(Self::build(out, checked_size(size)?, config::line_separator()))
    }

    /// Writer sized and terminated according to `cfg`.
    pub fn with_config(out: W, cfg: &IoConfig) -> Result<Self> {
        Ok(Self::build(
            out,
            checked_size(cfg.buffer_size)?,
            cfg.line_separator.as_str(),
        ))
    }

    fn build(out: W, size: usize, separator: &'static str) -> Self {
        Self {
            state: Mutex::new(WriterState {
                core: FilterCore::new(out),
                cb: vec!['\0'; size],
                next_char: 0,
                separator,
            }),
        }
    }

    /// Replace the terminator written by [`new_line`](Self::new_line).
    #[must_use]
    pub fn with_line_separator(self, separator: LineSeparator) -> Self {
        self.state.lock().separator = separator.as_str();
        self
    }

    pub fn write_char(&self, c: char) -> Result<()> {
        self.state.lock().write_char(c)
    }

    pub fn write_chars(&self, data: &[char]) -> Result<()> {
        self.state.lock().write(data)
    }

    pub fn write_str(&self, s: &str) -> Result<()> {
        let chars: Vec<char> = s.chars().collect();
        self.state.lock().write(&chars)
    }

    /// Write the configured line terminator.
    pub fn new_line(&self) -> Result<()> {
        let mut state = self.state.lock();
        let sep: Vec<char> = state.separator.chars().collect();
        state.write(&sep)
    }

    /// Forward pending characters to the sink without flushing the sink.
    pub fn flush_buffer(&self) -> Result<()> {
        self.state.lock().flush_buffer()
    }

    /// Forward pending characters, then flush the sink.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.flush_buffer()?;
        state.core.get()?.flush()
    }

    /// Flush pending characters and close the sink.
    ///
    /// The sink is closed even when the flush fails; both failures are
    /// reported, the flush failure first.
    pub fn close(&self) -> Result<()> {
        self.state.lock().close()
    }

    /// Characters waiting in the buffer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().next_char
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.lock().cb.len()
    }

    /// Run `f` against the sink while holding this writer's lock.
    pub fn with_inner<T>(&self, f: impl FnOnce(&W) -> T) -> Option<T> {
        self.state.lock().core.get_ref().map(f)
    }
}

impl<W: CharSink> CharSink for BufferedWriter<W> {
    fn write(&mut self, buf: &[char]) -> Result<()> {
        self.write_chars(buf)
    }
    fn write_char(&mut self, c: char) -> Result<()> {
        (*self).write_char(c)
    }
    fn write_str(&mut self, s: &str) -> Result<()> {
        (*self).write_str(s)
    }
    fn flush(&mut self) -> Result<()> {
        (*self).flush()
    }
    fn close(&mut self) -> Result<()> {
        (*self).close()
    }
}

impl<W: CharSink> CharSink for Arc<BufferedWriter<W>> {
    fn write(&mut self, buf: &[char]) -> Result<()> {
        self.write_chars(buf)
    }
    fn write_str(&mut self, s: &str) -> Result<()> {
        (**self).write_str(s)
    }
    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

// ---------------------------------------------------------------------------
// BufferedReader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unmarked,
    Invalidated,
    At(usize),
}

/// Character source that reads ahead into a buffer.
///
/// Supports `mark` with a read-ahead limit: once more than `limit`
/// characters have been read past the mark, the mark is invalidated and
/// `reset` fails with "Mark invalid".
#[derive(Debug)]
pub struct BufferedReader<R> {
    core: FilterCore<R>,
    cb: Vec<char>,
    n_chars: usize,
    next_char: usize,
    mark: Mark,
    read_ahead_limit: usize,
    skip_lf: bool,
    marked_skip_lf: bool,
}

impl<R: CharSource> BufferedReader<R> {
    pub fn new(inner: R) -> Self {
        Self::build(inner, config::default_buffer_size().max(1))
    }

    pub fn with_capacity(inner: R, size: usize) -> Result<Self> {
        Ok(Self::build(inner, checked_size(size)?))
    }

    fn build(inner: R, size: usize) -> Self {
        Self {
            core: FilterCore::new(inner),
            cb: vec!['\0'; size],
            n_chars: 0,
            next_char: 0,
            mark: Mark::Unmarked,
            read_ahead_limit: 0,
            skip_lf: false,
            marked_skip_lf: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let dst = match self.mark {
            Mark::At(marked) => {
                let delta = self.next_char - marked;
                if delta >= self.read_ahead_limit {
                    self.mark = Mark::Invalidated;
                    self.read_ahead_limit = 0;
                    0
                } else {
                    if self.read_ahead_limit <= self.cb.len() {
                        self.cb.copy_within(marked..marked + delta, 0);
                    } else {
                        let mut ncb = vec!['\0'; self.read_ahead_limit];
                        ncb[..delta].copy_from_slice(&self.cb[marked..marked + delta]);
                        self.cb = ncb;
                    }
                    self.mark = Mark::At(0);
                    self.next_char = delta;
                    self.n_chars = delta;
                    delta
                }
            }
            Mark::Unmarked | Mark::Invalidated => 0,
        };
        let input = self.core.get()?;
        loop {
            match input.read(&mut self.cb[dst..])? {
                Some(0) => continue,
                Some(n) => {
                    self.n_chars = dst + n;
                    self.next_char = dst;
                    return Ok(());
                }
                None => return Ok(()),
            }
        }
    }

    fn read1(&mut self, out: &mut [char]) -> Result<Option<usize>> {
        if self.next_char >= self.n_chars {
            // Large reads with nothing buffered go straight to the source.
            if out.len() >= self.cb.len() && !matches!(self.mark, Mark::At(_)) && !self.skip_lf {
                return self.core.get()?.read(out);
            }
            self.fill()?;
        }
        if self.next_char >= self.n_chars {
            return Ok(None);
        }
        if self.skip_lf {
            self.skip_lf = false;
            if self.cb[self.next_char] == '\n' {
                self.next_char += 1;
                if self.next_char >= self.n_chars {
                    self.fill()?;
                }
                if self.next_char >= self.n_chars {
                    return Ok(None);
                }
            }
        }
        let n = out.len().min(self.n_chars - self.next_char);
        out[..n].copy_from_slice(&self.cb[self.next_char..self.next_char + n]);
        self.next_char += n;
        Ok(Some(n))
    }

    /// Read a line, returning it with a flag telling whether a terminator
    /// ended it (false for a final unterminated line).
    pub(crate) fn read_line_with(&mut self, ignore_lf: bool) -> Result<Option<(String, bool)>> {
        self.core.ensure_open()?;
        let mut partial: Option<String> = None;
        let mut omit_lf = ignore_lf || self.skip_lf;
        loop {
            if self.next_char >= self.n_chars {
                self.fill()?;
            }
            if self.next_char >= self.n_chars {
                return Ok(partial.filter(|s| !s.is_empty()).map(|s| (s, false)));
            }
            if omit_lf && self.cb[self.next_char] == '\n' {
                self.next_char += 1;
            }
            self.skip_lf = false;
            omit_lf = false;

            let start = self.next_char;
            let eol = self.cb[start..self.n_chars]
                .iter()
                .position(|&c| c == '\n' || c == '\r');
            match eol {
                Some(off) => {
                    let i = start + off;
                    let mut line = partial.unwrap_or_default();
                    line.extend(&self.cb[start..i]);
                    self.next_char = i + 1;
                    if self.cb[i] == '\r' {
                        self.skip_lf = true;
                    }
                    return Ok(Some((line, true)));
                }
                None => {
                    partial
                        .get_or_insert_with(|| String::with_capacity(80))
                        .extend(&self.cb[start..self.n_chars]);
                    self.next_char = self.n_chars;
                }
            }
        }
    }

    /// Read one line, terminated by `\n`, `\r` or `\r\n`, without the
    /// terminator. `None` at end of stream.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        Ok(self.read_line_with(false)?.map(|(line, _)| line))
    }

    /// Iterate over the remaining lines.
    pub fn lines(&mut self) -> Lines<'_, R> {
        Lines { reader: self }
    }

    pub fn get_ref(&self) -> Option<&R> {
        self.core.get_ref()
    }
}

impl<R: CharSource> CharSource for BufferedReader<R> {
    fn read(&mut self, out: &mut [char]) -> Result<Option<usize>> {
        self.core.ensure_open()?;
        if out.is_empty() {
            return Ok(Some(0));
        }
        let mut n = match self.read1(out)? {
            None => return Ok(None),
            Some(0) => return Ok(Some(0)),
            Some(n) => n,
        };
        while n < out.len() && self.core.get()?.ready()? {
            match self.read1(&mut out[n..])? {
                Some(k) if k > 0 => n += k,
                _ => break,
            }
        }
        Ok(Some(n))
    }

    fn read_char(&mut self) -> Result<Option<char>> {
        self.core.ensure_open()?;
        loop {
            if self.next_char >= self.n_chars {
                self.fill()?;
                if self.next_char >= self.n_chars {
                    return Ok(None);
                }
            }
            if self.skip_lf {
                self.skip_lf = false;
                if self.cb[self.next_char] == '\n' {
                    self.next_char += 1;
                    continue;
                }
            }
            let c = self.cb[self.next_char];
            self.next_char += 1;
            return Ok(Some(c));
        }
    }

    fn skip(&mut self, n: i64) -> Result<i64> {
        if n < 0 {
            return Err(IoError::IllegalArgument("skip value is negative".into()));
        }
        self.core.ensure_open()?;
        let mut r = n;
        while r > 0 {
            if self.next_char >= self.n_chars {
                self.fill()?;
            }
            if self.next_char >= self.n_chars {
                break;
            }
            if self.skip_lf {
                self.skip_lf = false;
                if self.cb[self.next_char] == '\n' {
                    self.next_char += 1;
                }
            }
            let d = (self.n_chars - self.next_char) as i64;
            if r <= d {
                self.next_char += r as usize;
                r = 0;
                break;
            }
            r -= d;
            self.next_char = self.n_chars;
        }
        Ok(n - r)
    }

    fn ready(&mut self) -> Result<bool> {
        self.core.ensure_open()?;
        // A pending '\n' after '\r' does not count as readable data.
        if self.skip_lf {
            if self.next_char >= self.n_chars && self.core.get()?.ready()? {
                self.fill()?;
            }
            if self.next_char < self.n_chars {
                if self.cb[self.next_char] == '\n' {
                    self.next_char += 1;
                }
                self.skip_lf = false;
            }
        }
        Ok(self.next_char < self.n_chars || self.core.get()?.ready()?)
    }

    fn mark_supported(&self) -> bool {
        true
    }

    fn mark(&mut self, read_ahead_limit: usize) -> Result<()> {
        self.core.ensure_open()?;
        self.read_ahead_limit = read_ahead_limit;
        self.mark = Mark::At(self.next_char);
        self.marked_skip_lf = self.skip_lf;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.core.ensure_open()?;
        match self.mark {
            Mark::At(pos) => {
                self.next_char = pos;
                self.skip_lf = self.marked_skip_lf;
                Ok(())
            }
            Mark::Invalidated => Err(IoError::InvalidMark("Mark invalid")),
            Mark::Unmarked => Err(IoError::InvalidMark("Stream not marked")),
        }
    }

    fn close(&mut self) -> Result<()> {
        let result = self.core.close_with(|r| r.close());
        self.cb = Vec::new();
        self.n_chars = 0;
        self.next_char = 0;
        result
    }
}

/// Iterator over the lines of a [`BufferedReader`].
pub struct Lines<'a, R> {
    reader: &'a mut BufferedReader<R>,
}

impl<R: CharSource> Iterator for Lines<'_, R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_line().transpose()
    }
}

// ---------------------------------------------------------------------------
// BufferedInputStream
// ---------------------------------------------------------------------------

/// Byte source that reads ahead into a buffer.
///
/// The buffer grows (up to the mark limit) while a mark is active. Once the
/// reader moves more than `read_limit` bytes past the mark and the buffer
/// must be refilled, the mark is dropped and `reset` fails with
/// "Resetting to invalid mark".
#[derive(Debug)]
pub struct BufferedInputStream<S> {
    core: FilterCore<S>,
    buf: Vec<u8>,
    count: usize,
    pos: usize,
    markpos: Option<usize>,
    marklimit: usize,
}

impl<S: ByteSource> BufferedInputStream<S> {
    pub fn new(inner: S) -> Self {
        Self::build(inner, config::default_buffer_size().max(1))
    }

    pub fn with_capacity(inner: S, size: usize) -> Result<Self> {
        Ok(Self::build(inner, checked_size(size)?))
    }

    fn build(inner: S, size: usize) -> Self {
        Self {
            core: FilterCore::new(inner),
            buf: vec![0; size],
            count: 0,
            pos: 0,
            markpos: None,
            marklimit: 0,
        }
    }

    fn fill(&mut self) -> Result<()> {
        match self.markpos {
            None => self.pos = 0,
            Some(markpos) if self.pos >= self.buf.len() => {
                if markpos > 0 {
                    let sz = self.pos - markpos;
                    self.buf.copy_within(markpos..self.pos, 0);
                    self.pos = sz;
                    self.markpos = Some(0);
                } else if self.buf.len() >= self.marklimit {
                    self.markpos = None;
                    self.pos = 0;
                    trace::debug(
                        "buffered_input",
                        "mark_invalidated",
                        serde_json::json!({ "limit": self.marklimit, "buffer": self.buf.len() }),
                    );
                } else {
                    let nsz = new_length(self.pos, 1, self.pos)?.min(self.marklimit);
                    self.buf.resize(nsz, 0);
                }
            }
            Some(_) => {}
        }
        self.count = self.pos;
        let pos = self.pos;
        if let Some(n) = self.core.get()?.read(&mut self.buf[pos..])? {
            self.count = pos + n;
        }
        Ok(())
    }

    fn read1(&mut self, out: &mut [u8]) -> Result<Option<usize>> {
        let mut avail = self.count - self.pos;
        if avail == 0 {
            if out.len() >= self.buf.len() && self.markpos.is_none() {
                return self.core.get()?.read(out);
            }
            self.fill()?;
            avail = self.count - self.pos;
            if avail == 0 {
                return Ok(None);
            }
        }
        let cnt = avail.min(out.len());
        out[..cnt].copy_from_slice(&self.buf[self.pos..self.pos + cnt]);
        self.pos += cnt;
        Ok(Some(cnt))
    }

    /// Bytes currently buffered and not yet read.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.count - self.pos
    }

    pub fn get_ref(&self) -> Option<&S> {
        self.core.get_ref()
    }
}

impl<S: ByteSource> ByteSource for BufferedInputStream<S> {
    fn read(&mut self, out: &mut [u8]) -> Result<Option<usize>> {
        self.core.ensure_open()?;
        if out.is_empty() {
            return Ok(Some(0));
        }
        let mut n = 0;
        loop {
            match self.read1(&mut out[n..])? {
                Some(k) if k > 0 => n += k,
                other => return Ok(if n == 0 { other } else { Some(n) }),
            }
            if n >= out.len() {
                return Ok(Some(n));
            }
            if self.core.get()?.available()? == 0 {
                return Ok(Some(n));
            }
        }
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        self.core.ensure_open()?;
        if self.pos >= self.count {
            self.fill()?;
            if self.pos >= self.count {
                return Ok(None);
            }
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(Some(b))
    }

    fn skip(&mut self, n: i64) -> Result<i64> {
        self.core.ensure_open()?;
        if n <= 0 {
            return Ok(0);
        }
        let mut avail = self.count - self.pos;
        if avail == 0 {
            if self.markpos.is_none() {
                return self.core.get()?.skip(n);
            }
            self.fill()?;
            avail = self.count - self.pos;
            if avail == 0 {
                return Ok(0);
            }
        }
        let skipped = (avail as i64).min(n);
        self.pos += skipped as usize;
        Ok(skipped)
    }

    fn available(&mut self) -> Result<usize> {
        let n = self.count - self.pos;
        let avail = self.core.get()?.available()?;
        Ok(n.saturating_add(avail))
    }

    fn mark_supported(&self) -> bool {
        true
    }

    fn mark(&mut self, read_limit: usize) {
        self.marklimit = read_limit;
        self.markpos = Some(self.pos);
    }

    fn reset(&mut self) -> Result<()> {
        self.core.ensure_open()?;
        match self.markpos {
            Some(markpos) => {
                self.pos = markpos;
                Ok(())
            }
            None => Err(IoError::InvalidMark("Resetting to invalid mark")),
        }
    }

    fn close(&mut self) -> Result<()> {
        let result = self.core.close_with(|s| s.close());
        self.buf = Vec::new();
        self.count = 0;
        self.pos = 0;
        result
    }
}

// ---------------------------------------------------------------------------
// BufferedOutputStream
// ---------------------------------------------------------------------------

/// Byte sink that batches writes into a fixed-size buffer.
#[derive(Debug)]
pub struct BufferedOutputStream<S> {
    core: FilterCore<S>,
    buf: Vec<u8>,
    size: usize,
}

impl<S: ByteSink> BufferedOutputStream<S> {
    pub fn new(inner: S) -> Self {
        Self::build(inner, config::default_buffer_size().max(1))
    }

    pub fn with_capacity(inner: S, size: usize) -> Result<Self> {
        Ok(Self::build(inner, checked_size(size)?))
    }

    fn build(inner: S, size: usize) -> Self {
        Self {
            core: FilterCore::new(inner),
            buf: Vec::with_capacity(size),
            size,
        }
    }

    fn flush_buffer(&mut self) -> Result<()> {
        let out = self.core.get()?;
        if !self.buf.is_empty() {
            out.write(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }

    /// Bytes waiting in the buffer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn get_ref(&self) -> Option<&S> {
        self.core.get_ref()
    }
}

impl<S: ByteSink> ByteSink for BufferedOutputStream<S> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.core.ensure_open()?;
        if data.len() >= self.size {
            self.flush_buffer()?;
            return self.core.get()?.write(data);
        }
        if data.len() > self.size - self.buf.len() {
            self.flush_buffer()?;
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn write_byte(&mut self, b: u8) -> Result<()> {
        self.core.ensure_open()?;
        if self.buf.len() >= self.size {
            self.flush_buffer()?;
        }
        self.buf.push(b);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_buffer()?;
        self.core.get()?.flush()
    }

    fn close(&mut self) -> Result<()> {
        let buf = &mut self.buf;
        let result = self.core.close_with(|out| {
            let mut flushed = Ok(());
            if !buf.is_empty() {
                flushed = out.write(buf);
                buf.clear();
            }
            let flushed = flushed.and_then(|()| out.flush());
            flush_then_close("buffered_output", flushed, || out.close())
        });
        self.buf = Vec::new();
        result
    }
}
