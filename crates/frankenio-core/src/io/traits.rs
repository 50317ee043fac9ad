//! Stream capabilities.
//!
//! Four directional traits: [`ByteSource`]/[`ByteSink`] for bytes and
//! [`CharSource`]/[`CharSink`] for characters. Each has one required bulk
//! method; every other operation has a default body built on it so that
//! filters only override what they change.
//!
//! End of stream is `Ok(None)`, never an error and never a data value.
//! A bulk read returns `Ok(Some(0))` only when asked for zero elements.
//!
//! Locking: each concrete stream serializes its own mutations. Wrap a
//! chain in [`Synchronized`] when composed operations must be atomic across
//! the whole chain.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::error::{IoError, Result, check_range};

/// Scratch size for `transfer_to` and `read_all_bytes`.
pub const TRANSFER_BUFFER_SIZE: usize = 8192;
const MAX_SKIP_BUFFER_SIZE: usize = 2048;

// ---------------------------------------------------------------------------
// Bytes
// ---------------------------------------------------------------------------

pub trait ByteSource: Send {
    /// Read up to `buf.len()` bytes.
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>>;

    /// Read one byte.
    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut one = [0u8; 1];
        loop {
            match self.read(&mut one)? {
                None => return Ok(None),
                Some(0) => continue,
                Some(_) => return Ok(Some(one[0])),
            }
        }
    }

    /// Read into `buf[off..off + len]`, validating the range first.
    fn read_range(&mut self, buf: &mut [u8], off: usize, len: usize) -> Result<Option<usize>> {
        check_range(off, len, buf.len())?;
        self.read(&mut buf[off..off + len])
    }

    /// Fill `buf` completely or fail with `UnexpectedEof`.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut n = 0;
        while n < buf.len() {
            match self.read(&mut buf[n..])? {
                None => return Err(IoError::UnexpectedEof),
                Some(k) => n += k,
            }
        }
        Ok(())
    }

    /// Skip up to `n` bytes. Non-positive `n` skips nothing.
    fn skip(&mut self, n: i64) -> Result<i64> {
        if n <= 0 {
            return Ok(0);
        }
        let size = (n as u64).min(MAX_SKIP_BUFFER_SIZE as u64) as usize;
        let mut scratch = vec![0u8; size];
        let mut remaining = n;
        while remaining > 0 {
            let want = (remaining as u64).min(size as u64) as usize;
            match self.read(&mut scratch[..want])? {
                None => break,
                Some(k) => remaining -= k as i64,
            }
        }
        Ok(n - remaining)
    }

    /// Bytes readable without blocking.
    fn available(&mut self) -> Result<usize> {
        Ok(0)
    }

    fn mark_supported(&self) -> bool {
        false
    }

    /// Remember the current position. No-op unless `mark_supported`.
    fn mark(&mut self, _read_limit: usize) {}

    fn reset(&mut self) -> Result<()> {
        Err(IoError::MarkUnsupported)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read until end of stream.
    fn read_all_bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; TRANSFER_BUFFER_SIZE];
        while let Some(n) = self.read(&mut chunk)? {
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out)
    }

    /// Read up to `n` bytes, stopping early at end of stream.
    fn read_n_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n.min(TRANSFER_BUFFER_SIZE));
        let mut chunk = vec![0u8; n.min(TRANSFER_BUFFER_SIZE)];
        while out.len() < n {
            let want = (n - out.len()).min(chunk.len());
            match self.read(&mut chunk[..want])? {
                None => break,
                Some(k) => out.extend_from_slice(&chunk[..k]),
            }
        }
        Ok(out)
    }

    /// Copy everything that remains into `out`, returning the byte count.
    fn transfer_to(&mut self, out: &mut dyn ByteSink) -> Result<u64> {
        let mut chunk = vec![0u8; TRANSFER_BUFFER_SIZE];
        let mut total = 0u64;
        while let Some(n) = self.read(&mut chunk)? {
            out.write(&chunk[..n])?;
            total += n as u64;
        }
        Ok(total)
    }
}

pub trait ByteSink: Send {
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    fn write_byte(&mut self, b: u8) -> Result<()> {
        self.write(&[b])
    }

    fn write_range(&mut self, buf: &[u8], off: usize, len: usize) -> Result<()> {
        check_range(off, len, buf.len())?;
        self.write(&buf[off..off + len])
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Characters
// ---------------------------------------------------------------------------

pub trait CharSource: Send {
    fn read(&mut self, buf: &mut [char]) -> Result<Option<usize>>;

    fn read_char(&mut self) -> Result<Option<char>> {
        let mut one = ['\0'; 1];
        loop {
            match self.read(&mut one)? {
                None => return Ok(None),
                Some(0) => continue,
                Some(_) => return Ok(Some(one[0])),
            }
        }
    }

    fn read_range(&mut self, buf: &mut [char], off: usize, len: usize) -> Result<Option<usize>> {
        check_range(off, len, buf.len())?;
        self.read(&mut buf[off..off + len])
    }

    /// Skip up to `n` characters. Negative `n` is rejected.
    fn skip(&mut self, n: i64) -> Result<i64> {
        if n < 0 {
            return Err(IoError::IllegalArgument("skip value is negative".into()));
        }
        let size = (n as u64).min(TRANSFER_BUFFER_SIZE as u64) as usize;
        let mut scratch = vec!['\0'; size];
        let mut remaining = n;
        while remaining > 0 {
            let want = (remaining as u64).min(size as u64) as usize;
            match self.read(&mut scratch[..want])? {
                None => break,
                Some(k) => remaining -= k as i64,
            }
        }
        Ok(n - remaining)
    }

    /// True when the next read will not block.
    fn ready(&mut self) -> Result<bool> {
        Ok(false)
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
        Ok(())
    }

    fn read_to_string(&mut self) -> Result<String> {
        let mut out = String::new();
        let mut chunk = vec!['\0'; TRANSFER_BUFFER_SIZE];
        while let Some(n) = self.read(&mut chunk)? {
            out.extend(&chunk[..n]);
        }
        Ok(out)
    }

    fn transfer_to(&mut self, out: &mut dyn CharSink) -> Result<u64> {
        let mut chunk = vec!['\0'; TRANSFER_BUFFER_SIZE];
        let mut total = 0u64;
        while let Some(n) = self.read(&mut chunk)? {
            out.write(&chunk[..n])?;
            total += n as u64;
        }
        Ok(total)
    }
}

pub trait CharSink: Send {
    fn write(&mut self, buf: &[char]) -> Result<()>;

    fn write_char(&mut self, c: char) -> Result<()> {
        self.write(&[c])
    }

    fn write_range(&mut self, buf: &[char], off: usize, len: usize) -> Result<()> {
        check_range(off, len, buf.len())?;
        self.write(&buf[off..off + len])
    }

    fn write_str(&mut self, s: &str) -> Result<()> {
        let chars: Vec<char> = s.chars().collect();
        self.write(&chars)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Forwarding impls
// ---------------------------------------------------------------------------

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        (**self).read(buf)
    }
    fn read_byte(&mut self) -> Result<Option<u8>> {
        (**self).read_byte()
    }
    fn skip(&mut self, n: i64) -> Result<i64> {
        (**self).skip(n)
    }
    fn available(&mut self) -> Result<usize> {
        (**self).available()
    }
    fn mark_supported(&self) -> bool {
        (**self).mark_supported()
    }
    fn mark(&mut self, read_limit: usize) {
        (**self).mark(read_limit)
    }
    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

impl<S: ByteSink + ?Sized> ByteSink for Box<S> {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write(buf)
    }
    fn write_byte(&mut self, b: u8) -> Result<()> {
        (**self).write_byte(b)
    }
    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

impl<S: CharSource + ?Sized> CharSource for Box<S> {
    fn read(&mut self, buf: &mut [char]) -> Result<Option<usize>> {
        (**self).read(buf)
    }
    fn read_char(&mut self) -> Result<Option<char>> {
        (**self).read_char()
    }
    fn skip(&mut self, n: i64) -> Result<i64> {
        (**self).skip(n)
    }
    fn ready(&mut self) -> Result<bool> {
        (**self).ready()
    }
    fn mark_supported(&self) -> bool {
        (**self).mark_supported()
    }
    fn mark(&mut self, read_ahead_limit: usize) -> Result<()> {
        (**self).mark(read_ahead_limit)
    }
    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

impl<S: CharSink + ?Sized> CharSink for Box<S> {
    fn write(&mut self, buf: &[char]) -> Result<()> {
        (**self).write(buf)
    }
    fn write_char(&mut self, c: char) -> Result<()> {
        (**self).write_char(c)
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

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        (**self).read(buf)
    }
    fn available(&mut self) -> Result<usize> {
        (**self).available()
    }
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

impl<S: ByteSink + ?Sized> ByteSink for &mut S {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write(buf)
    }
    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

impl ByteSink for Vec<u8> {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.extend_from_slice(buf);
        Ok(())
    }
}

impl CharSink for String {
    fn write(&mut self, buf: &[char]) -> Result<()> {
        self.extend(buf);
        Ok(())
    }

    fn write_str(&mut self, s: &str) -> Result<()> {
        self.push_str(s);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Null streams
// ---------------------------------------------------------------------------

/// A source with no data. Reads fail once closed.
#[derive(Debug, Default)]
pub struct NullSource {
    closed: bool,
}

impl NullSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ByteSource for NullSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        if self.closed {
            return Err(IoError::Closed);
        }
        Ok(if buf.is_empty() { Some(0) } else { None })
    }

    fn skip(&mut self, _n: i64) -> Result<i64> {
        if self.closed {
            return Err(IoError::Closed);
        }
        Ok(0)
    }

    fn available(&mut self) -> Result<usize> {
        if self.closed {
            return Err(IoError::Closed);
        }
        Ok(0)
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// A sink that discards everything. Writes fail once closed.
#[derive(Debug, Default)]
pub struct NullSink {
    closed: bool,
    discarded: u64,
}

impl NullSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes accepted and dropped so far.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

impl ByteSink for NullSink {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        if self.closed {
            return Err(IoError::Closed);
        }
        self.discarded += buf.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.closed {
            return Err(IoError::Closed);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// std::io bridges
// ---------------------------------------------------------------------------

/// Byte source over any `std::io::Read` (files, sockets, stdin).
#[derive(Debug)]
pub struct StdSource<R> {
    inner: Option<R>,
}

impl<R: std::io::Read + Send> StdSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner: Some(inner) }
    }

    pub fn into_inner(self) -> Option<R> {
        self.inner
    }
}

impl<R: std::io::Read + Send> ByteSource for StdSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        let inner = self.inner.as_mut().ok_or(IoError::Closed)?;
        if buf.is_empty() {
            return Ok(Some(0));
        }
        loop {
            match inner.read(buf) {
                Ok(0) => return Ok(None),
                Ok(n) => return Ok(Some(n)),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.inner = None;
        Ok(())
    }
}

/// Byte sink over any `std::io::Write`.
#[derive(Debug)]
pub struct StdSink<W> {
    inner: Option<W>,
}

impl<W: std::io::Write + Send> StdSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner: Some(inner) }
    }

    pub fn into_inner(self) -> Option<W> {
        self.inner
    }
}

impl<W: std::io::Write + Send> ByteSink for StdSink<W> {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        let inner = self.inner.as_mut().ok_or(IoError::Closed)?;
        inner.write_all(buf)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let inner = self.inner.as_mut().ok_or(IoError::Closed)?;
        inner.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(mut w) => {
                w.flush()?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Chain-wide lock
// ---------------------------------------------------------------------------

/// A stream behind one shared mutual-exclusion lock.
///
/// Clones share the lock, so a chain built from the same `Synchronized`
/// handle serializes every operation issued through any clone. Use
/// [`Synchronized::with`] to run several operations atomically.
pub struct Synchronized<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for Synchronized<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Synchronized<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(stream)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.inner.lock()
    }

    /// Run `f` with the lock held for its whole duration.
    pub fn with<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Recover the stream when this is the last handle.
    pub fn try_unwrap(self) -> std::result::Result<S, Self> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|inner| Self { inner })
    }
}

impl<S: ByteSource> ByteSource for Synchronized<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        self.inner.lock().read(buf)
    }
    fn skip(&mut self, n: i64) -> Result<i64> {
        self.inner.lock().skip(n)
    }
    fn available(&mut self) -> Result<usize> {
        self.inner.lock().available()
    }
    fn mark_supported(&self) -> bool {
        self.inner.lock().mark_supported()
    }
    fn mark(&mut self, read_limit: usize) {
        self.inner.lock().mark(read_limit)
    }
    fn reset(&mut self) -> Result<()> {
        self.inner.lock().reset()
    }
    fn close(&mut self) -> Result<()> {
        self.inner.lock().close()
    }
}

impl<S: ByteSink> ByteSink for Synchronized<S> {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.inner.lock().write(buf)
    }
    fn flush(&mut self) -> Result<()> {
        self.inner.lock().flush()
    }
    fn close(&mut self) -> Result<()> {
        self.inner.lock().close()
    }
}

impl<S: CharSource> CharSource for Synchronized<S> {
    fn read(&mut self, buf: &mut [char]) -> Result<Option<usize>> {
        self.inner.lock().read(buf)
    }
    fn skip(&mut self, n: i64) -> Result<i64> {
        self.inner.lock().skip(n)
    }
    fn ready(&mut self) -> Result<bool> {
        self.inner.lock().ready()
    }
    fn mark_supported(&self) -> bool {
        self.inner.lock().mark_supported()
    }
    fn mark(&mut self, read_ahead_limit: usize) -> Result<()> {
        self.inner.lock().mark(read_ahead_limit)
    }
    fn reset(&mut self) -> Result<()> {
        self.inner.lock().reset()
    }
    fn close(&mut self) -> Result<()> {
        self.inner.lock().close()
    }
}

impl<S: CharSink> CharSink for Synchronized<S> {
    fn write(&mut self, buf: &[char]) -> Result<()> {
        self.inner.lock().write(buf)
    }
    fn write_str(&mut self, s: &str) -> Result<()> {
        self.inner.lock().write_str(s)
    }
    fn flush(&mut self) -> Result<()> {
        self.inner.lock().flush()
    }
    fn close(&mut self) -> Result<()> {
        self.inner.lock().close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Source that hands out at most `step` bytes per read.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl ByteSource for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
            if buf.is_empty() {
                return Ok(Some(0));
            }
            if self.pos >= self.data.len() {
                return Ok(None);
            }
            let n = buf.len().min(self.step).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(Some(n))
        }
    }

    fn trickle(len: usize, step: usize) -> Trickle {
        Trickle {
            data: (0..len).map(|i| i as u8).collect(),
            pos: 0,
            step,
        }
    }

    #[test]
    fn default_read_byte_and_eof() {
        let mut t = trickle(2, 1);
        assert_eq!(t.read_byte().unwrap(), Some(0));
        assert_eq!(t.read_byte().unwrap(), Some(1));
        assert_eq!(t.read_byte().unwrap(), None);
    }

    #[test]
    fn read_range_checks_bounds() {
        let mut t = trickle(4, 4);
        let mut buf = [0u8; 4];
        assert!(matches!(
            t.read_range(&mut buf, 3, 2),
            Err(IoError::OutOfBounds { .. })
        ));
        assert_eq!(t.read_range(&mut buf, 1, 3).unwrap(), Some(3));
        assert_eq!(&buf[1..], &[0, 1, 2]);
    }

    #[test]
    fn read_exact_spans_short_reads() {
        let mut t = trickle(10, 3);
        let mut buf = [0u8; 7];
        t.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0, 1, 2, 3, 4, 5, 6]);
        let mut rest = [0u8; 4];
        assert!(matches!(t.read_exact(&mut rest), Err(IoError::UnexpectedEof)));
    }

    #[test]
    fn default_skip_reads_through() {
        let mut t = trickle(5000, 7);
        assert_eq!(t.skip(-3).unwrap(), 0);
        assert_eq!(t.skip(4096).unwrap(), 4096);
        assert_eq!(t.skip(10_000).unwrap(), 904);
    }

    #[test]
    fn read_all_and_transfer() {
        let mut t = trickle(20_000, 999);
        let all = t.read_all_bytes().unwrap();
        assert_eq!(all.len(), 20_000);
        assert_eq!(all[12_345], (12_345 % 256) as u8);

        let mut t = trickle(300, 64);
        let mut sink = Vec::new();
        assert_eq!(t.transfer_to(&mut sink).unwrap(), 300);
        assert_eq!(sink.len(), 300);
    }

    #[test]
    fn read_n_bytes_stops_at_eof() {
        let mut t = trickle(10, 4);
        assert_eq!(t.read_n_bytes(6).unwrap(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(t.read_n_bytes(100).unwrap(), vec![6, 7, 8, 9]);
        assert!(t.read_n_bytes(1).unwrap().is_empty());
    }

    #[test]
    fn mark_unsupported_by_default() {
        let mut t = trickle(1, 1);
        assert!(!t.mark_supported());
        t.mark(10);
        assert!(matches!(t.reset(), Err(IoError::MarkUnsupported)));
    }

    struct Letters(std::vec::IntoIter<char>);

    impl CharSource for Letters {
        fn read(&mut self, buf: &mut [char]) -> Result<Option<usize>> {
            if buf.is_empty() {
                return Ok(Some(0));
            }
            match self.0.next() {
                Some(c) => {
                    buf[0] = c;
                    Ok(Some(1))
                }
                None => Ok(None),
            }
        }
    }

    #[test]
    fn default_char_skip() {
        let mut s = Letters("abcdef".chars().collect::<Vec<_>>().into_iter());
        assert!(matches!(s.skip(-1), Err(IoError::IllegalArgument(_))));
        assert_eq!(s.skip(2).unwrap(), 2);
        assert_eq!(s.read_char().unwrap(), Some('c'));
        assert_eq!(s.skip(10).unwrap(), 3);
        assert_eq!(s.read_to_string().unwrap(), "");
    }

    #[test]
    fn null_streams_close() {
        let mut src = NullSource::new();
        assert_eq!(src.read(&mut [0u8; 4]).unwrap(), None);
        src.close().unwrap();
        assert!(src.read(&mut [0u8; 4]).unwrap_err().is_closed());

        let mut sink = NullSink::new();
        sink.write(&[1, 2, 3]).unwrap();
        assert_eq!(sink.discarded(), 3);
        sink.close().unwrap();
        assert!(sink.write(&[1]).unwrap_err().is_closed());
    }

    #[test]
    fn std_bridges() {
        let mut src = StdSource::new(std::io::Cursor::new(vec![9u8, 8, 7]));
        assert_eq!(src.read_all_bytes().unwrap(), vec![9, 8, 7]);
        src.close().unwrap();
        assert!(src.read(&mut [0u8; 1]).unwrap_err().is_closed());

        let mut sink = StdSink::new(Vec::new());
        sink.write(b"xyz").unwrap();
        assert_eq!(sink.into_inner().unwrap(), b"xyz".to_vec());
    }

    #[test]
    fn synchronized_clones_share_state() {
        let a = Synchronized::new(Vec::<u8>::new());
        let mut b = a.clone();
        b.write(&[1, 2]).unwrap();
        a.with(|v| v.push(3));
        assert_eq!(*a.lock(), vec![1, 2, 3]);
        drop(b);
        assert_eq!(a.try_unwrap().ok().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn synchronized_serializes_concurrent_writers() {
        let shared = Synchronized::new(Vec::<u8>::new());
        let handles: Vec<_> = (0..4u8)
            .map(|t| {
                let mut w = shared.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        w.write(&[t, t]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let data = shared.lock().clone();
        assert_eq!(data.len(), 2000);
        for pair in data.chunks(2) {
            assert_eq!(pair[0], pair[1]);
        }
    }
}
