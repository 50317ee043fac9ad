//! Filter stream chain.
//!
//! A filter wraps exactly one inner stream and forwards every operation to
//! it unless it overrides that operation. [`FilterCore`] is the shared
//! composition piece: it owns the inner stream, reports `Closed` after
//! close, and guarantees the inner stream's `close` runs at most once.
//!
//! The inner stream is fixed at construction. The one exception is
//! [`FilterCore::unbound`], for filters whose inner stream can only be
//! created after the filter itself; such a filter must be bound exactly
//! once with [`FilterCore::bind`] before use.

use crate::error::{IoError, Result};
use crate::io::traits::{ByteSink, ByteSource, CharSink, CharSource};
use crate::trace;

// ---------------------------------------------------------------------------
// Core
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Link<S> {
    Unbound,
    Open(S),
    Closed,
}

/// Owned link from a filter to its inner stream.
#[derive(Debug)]
pub struct FilterCore<S> {
    link: Link<S>,
}

impl<S> FilterCore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            link: Link::Open(inner),
        }
    }

    /// A core whose inner stream is supplied later through [`bind`](Self::bind).
    pub fn unbound() -> Self {
        Self { link: Link::Unbound }
    }

    /// Set the inner stream of an unbound core.
    pub fn bind(&mut self, inner: S) -> Result<()> {
        match self.link {
            Link::Unbound => {
                self.link = Link::Open(inner);
                Ok(())
            }
            Link::Open(_) => Err(IoError::IllegalState("filter already bound")),
            Link::Closed => Err(IoError::Closed),
        }
    }

    /// The inner stream, or `Closed` once the filter has been closed.
    pub fn get(&mut self) -> Result<&mut S> {
        match &mut self.link {
            Link::Open(s) => Ok(s),
            Link::Closed => Err(IoError::Closed),
            Link::Unbound => Err(IoError::IllegalState("filter not bound")),
        }
    }

    pub fn get_ref(&self) -> Option<&S> {
        match &self.link {
            Link::Open(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.link, Link::Closed)
    }

    /// Fail with `Closed` if the filter is closed.
    pub fn ensure_open(&self) -> Result<()> {
        match self.link {
            Link::Closed => Err(IoError::Closed),
            _ => Ok(()),
        }
    }

    /// Sever the link and hand the inner stream to `close`.
    ///
    /// Runs `close` only on the first call; later calls return `Ok(())`.
    pub fn close_with(&mut self, close: impl FnOnce(&mut S) -> Result<()>) -> Result<()> {
        match std::mem::replace(&mut self.link, Link::Closed) {
            Link::Open(mut inner) => close(&mut inner),
            Link::Unbound | Link::Closed => Ok(()),
        }
    }

    pub fn into_inner(self) -> Option<S> {
        match self.link {
            Link::Open(s) => Some(s),
            _ => None,
        }
    }
}

/// Combine a flush result with the close that must follow it.
///
/// The close always runs; when both fail the close failure is attached to
/// the flush failure as suppressed.
pub(crate) fn flush_then_close(
    component: &str,
    flushed: Result<()>,
    close: impl FnOnce() -> Result<()>,
) -> Result<()> {
    let closed = close();
    let outcome = match (flushed, closed) {
        (Ok(()), Ok(())) => return Ok(()),
        (Err(e), Ok(())) | (Ok(()), Err(e)) => e,
        (Err(flush), Err(close)) => IoError::with_suppressed(flush, vec![close]),
    };
    trace::error(component, "close_failed", &outcome);
    Err(outcome)
}

// ---------------------------------------------------------------------------
// Pass-through filters
// ---------------------------------------------------------------------------

/// Byte source filter that forwards everything.
#[derive(Debug)]
pub struct FilterInputStream<S> {
    core: FilterCore<S>,
}

impl<S: ByteSource> FilterInputStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            core: FilterCore::new(inner),
        }
    }

    pub fn unbound() -> Self {
        Self {
            core: FilterCore::unbound(),
        }
    }

    pub fn bind(&mut self, inner: S) -> Result<()> {
        self.core.bind(inner)
    }

    pub fn get_ref(&self) -> Option<&S> {
        self.core.get_ref()
    }

    pub fn into_inner(self) -> Option<S> {
        self.core.into_inner()
    }
}

impl<S: ByteSource> ByteSource for FilterInputStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        self.core.get()?.read(buf)
    }
    fn read_byte(&mut self) -> Result<Option<u8>> {
        self.core.get()?.read_byte()
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

/// Byte sink filter. Close flushes, then closes the inner sink even when
/// the flush failed.
#[derive(Debug)]
pub struct FilterOutputStream<S> {
    core: FilterCore<S>,
}

impl<S: ByteSink> FilterOutputStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            core: FilterCore::new(inner),
        }
    }

    pub fn get_ref(&self) -> Option<&S> {
        self.core.get_ref()
    }
}

impl<S: ByteSink> ByteSink for FilterOutputStream<S> {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.core.get()?.write(buf)
    }
    fn write_byte(&mut self, b: u8) -> Result<()> {
        self.core.get()?.write_byte(b)
    }
    fn flush(&mut self) -> Result<()> {
        self.core.get()?.flush()
    }
    fn close(&mut self) -> Result<()> {
        self.core
            .close_with(|s| flush_then_close("filter_output", s.flush(), || s.close()))
    }
}

/// Character source filter that forwards everything.
#[derive(Debug)]
pub struct FilterReader<S> {
    core: FilterCore<S>,
}

impl<S: CharSource> FilterReader<S> {
    pub fn new(inner: S) -> Self {
        Self {
            core: FilterCore::new(inner),
        }
    }

    pub fn get_ref(&self) -> Option<&S> {
        self.core.get_ref()
    }
}

impl<S: CharSource> CharSource for FilterReader<S> {
    fn read(&mut self, buf: &mut [char]) -> Result<Option<usize>> {
        self.core.get()?.read(buf)
    }
    fn read_char(&mut self) -> Result<Option<char>> {
        self.core.get()?.read_char()
    }
    fn skip(&mut self, n: i64) -> Result<i64> {
        self.core.get()?.skip(n)
    }
    fn ready(&mut self) -> Result<bool> {
        self.core.get()?.ready()
    }
    fn mark_supported(&self) -> bool {
        self.core.get_ref().is_some_and(|s| s.mark_supported())
    }
    fn mark(&mut self, read_ahead_limit: usize) -> Result<()> {
        self.core.get()?.mark(read_ahead_limit)
    }
    fn reset(&mut self) -> Result<()> {
        self.core.get()?.reset()
    }
    fn close(&mut self) -> Result<()> {
        self.core.close_with(|s| s.close())
    }
}

/// Character sink filter that forwards everything.
#[derive(Debug)]
pub struct FilterWriter<S> {
    core: FilterCore<S>,
}

impl<S: CharSink> FilterWriter<S> {
    pub fn new(inner: S) -> Self {
        Self {
            core: FilterCore::new(inner),
        }
    }

    pub fn get_ref(&self) -> Option<&S> {
        self.core.get_ref()
    }
}

impl<S: CharSink> CharSink for FilterWriter<S> {
    fn write(&mut self, buf: &[char]) -> Result<()> {
        self.core.get()?.write(buf)
    }
    fn write_char(&mut self, c: char) -> Result<()> {
        self.core.get()?.write_char(c)
    }
    fn write_str(&mut self, s: &str) -> Result<()> {
        self.core.get()?.write_str(s)
    }
    fn flush(&mut self) -> Result<()> {
        self.core.get()?.flush()
    }
    fn close(&mut self) -> Result<()> {
        self.core.close_with(|s| s.close())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::array::ByteArrayInputStream;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sink counting close calls; optionally failing flush/close.
    struct Recorder {
        closes: Arc<AtomicUsize>,
        fail_flush: bool,
        fail_close: bool,
        data: Vec<u8>,
    }

    impl Recorder {
        fn new(closes: &Arc<AtomicUsize>) -> Self {
            Self {
                closes: Arc::clone(closes),
                fail_flush: false,
                fail_close: false,
                data: Vec::new(),
            }
        }
    }

    impl ByteSink for Recorder {
        fn write(&mut self, buf: &[u8]) -> Result<()> {
            self.data.extend_from_slice(buf);
            Ok(())
        }
        fn flush(&mut self) -> Result<()> {
            if self.fail_flush {
                Err(IoError::UnexpectedEof)
            } else {
                Ok(())
            }
        }
        fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                Err(IoError::Closed)
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn delegates_reads() {
        let mut f = FilterInputStream::new(ByteArrayInputStream::new(vec![10, 20, 30]));
        assert_eq!(f.skip(1).unwrap(), 1);
        assert_eq!(f.read_byte().unwrap(), Some(20));
        assert_eq!(f.available().unwrap(), 1);
        assert!(f.mark_supported());
    }

    #[test]
    fn close_runs_inner_close_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut f = FilterOutputStream::new(Recorder::new(&closes));
        f.write(&[1, 2, 3]).unwrap();
        f.close().unwrap();
        f.close().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(f.write(&[4]).unwrap_err().is_closed());
        assert!(f.flush().unwrap_err().is_closed());
    }

    #[test]
    fn close_still_closes_inner_when_flush_fails() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut recorder = Recorder::new(&closes);
        recorder.fail_flush = true;
        recorder.fail_close = true;
        let mut f = FilterOutputStream::new(recorder);
        let err = f.close().unwrap_err();
        assert!(matches!(err.root(), IoError::UnexpectedEof));
        assert_eq!(err.suppressed().len(), 1);
        assert!(err.suppressed()[0].is_closed());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_binding() {
        let mut f: FilterInputStream<ByteArrayInputStream> = FilterInputStream::unbound();
        assert!(matches!(
            f.read(&mut [0u8; 1]),
            Err(IoError::IllegalState("filter not bound"))
        ));
        f.bind(ByteArrayInputStream::new(vec![7])).unwrap();
        assert!(matches!(
            f.bind(ByteArrayInputStream::new(vec![8])),
            Err(IoError::IllegalState("filter already bound"))
        ));
        assert_eq!(f.read_byte().unwrap(), Some(7));
    }

    #[test]
    fn closing_unbound_is_a_noop() {
        let mut f: FilterInputStream<ByteArrayInputStream> = FilterInputStream::unbound();
        f.close().unwrap();
        assert!(f.read(&mut [0u8; 1]).unwrap_err().is_closed());
        assert!(f.bind(ByteArrayInputStream::new(vec![])).unwrap_err().is_closed());
    }

    #[test]
    fn char_filters_forward() {
        let mut r = FilterReader::new(crate::io::StringReader::new("hey"));
        assert_eq!(r.read_char().unwrap(), Some('h'));
        assert!(r.ready().unwrap());
        r.close().unwrap();
        assert!(r.read_char().unwrap_err().is_closed());

        let mut w = FilterWriter::new(String::new());
        w.write_str("ab").unwrap();
        w.write_char('c').unwrap();
        assert_eq!(w.get_ref().map(String::as_str), Some("abc"));
    }
}
