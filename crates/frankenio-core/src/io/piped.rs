//! Piped channel.
//!
//! A bounded circular buffer shared by one writing endpoint and one reading
//! endpoint. The buffer belongs to the reader; connecting a writer to it is
//! a one-time operation. Writes block while the buffer is full and reads
//! block while it is empty, coordinated by a condition variable on the
//! buffer's lock.
//!
//! Closing the writer lets the reader drain what is left and then see end
//! of stream. An endpoint dropped without `close` is considered dead: its
//! peer fails with "Write end dead" or "Read end dead" instead of waiting
//! forever.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{IoError, PipeError, Result};
use crate::io::traits::{ByteSink, ByteSource, CharSink, CharSource};
use crate::trace::{self, EventLevel, TraceEvent};

/// Buffer size when none is given.
pub const DEFAULT_PIPE_SIZE: usize = 1024;

#[derive(Debug)]
struct PipeState<T> {
    buffer: Vec<T>,
    /// Next slot to write; `None` while the buffer is empty.
    in_pos: Option<usize>,
    /// Next slot to read.
    out_pos: usize,
    connected: bool,
    closed_by_writer: bool,
    closed_by_reader: bool,
    writer_dead: bool,
    reader_dead: bool,
}

impl<T> PipeState<T> {
    fn check_receive(&self) -> Result<()> {
        if !self.connected {
            Err(PipeError::NotConnected.into())
        } else if self.closed_by_writer || self.closed_by_reader {
            Err(PipeError::Closed.into())
        } else if self.reader_dead {
            Err(PipeError::ReadEndDead.into())
        } else {
            Ok(())
        }
    }

    fn check_read(&self) -> Result<()> {
        if !self.connected {
            Err(PipeError::NotConnected.into())
        } else if self.closed_by_reader {
            Err(PipeError::Closed.into())
        } else if self.writer_dead && !self.closed_by_writer && self.in_pos.is_none() {
            Err(PipeError::WriteEndDead.into())
        } else {
            Ok(())
        }
    }

    fn is_full(&self) -> bool {
        self.in_pos == Some(self.out_pos)
    }

    fn available(&self) -> usize {
        match self.in_pos {
            None => 0,
            Some(i) if i == self.out_pos => self.buffer.len(),
            Some(i) if i > self.out_pos => i - self.out_pos,
            Some(i) => i + self.buffer.len() - self.out_pos,
        }
    }
}

#[derive(Debug)]
struct Pipe<T> {
    state: Mutex<PipeState<T>>,
    cond: Condvar,
}

impl<T: Copy + Default> Pipe<T> {
    fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(IoError::IllegalArgument("Pipe size <= 0".into()));
        }
        Ok(Self {
            state: Mutex::new(PipeState {
                buffer: vec![T::default(); size],
                in_pos: None,
                out_pos: 0,
                connected: false,
                closed_by_writer: false,
                closed_by_reader: false,
                writer_dead: false,
                reader_dead: false,
            }),
            cond: Condvar::new(),
        })
    }

    fn receive(&self, data: &[T]) -> Result<()> {
        let mut st = self.state.lock();
        st.check_receive()?;
        let mut rest = data;
        while !rest.is_empty() {
            while st.is_full() {
                st.check_receive()?;
                self.cond.notify_all();
                self.cond.wait(&mut st);
            }
            // The reader may have gone away while we waited for space.
            st.check_receive()?;
            let s = &mut *st;
            let len = s.buffer.len();
            let start = match s.in_pos {
                Some(i) => i,
                None => {
                    s.out_pos = 0;
                    0
                }
            };
            let space = if start < s.out_pos {
                s.out_pos - start
            } else {
                len - start
            };
            let n = space.min(rest.len());
            s.buffer[start..start + n].copy_from_slice(&rest[..n]);
            let next = start + n;
            s.in_pos = Some(if next >= len { 0 } else { next });
            rest = &rest[n..];
            self.cond.notify_all();
        }
        Ok(())
    }

    fn read(&self, out: &mut [T]) -> Result<Option<usize>> {
        let mut st = self.state.lock();
        st.check_read()?;
        if out.is_empty() {
            return Ok(Some(0));
        }
        while st.in_pos.is_none() {
            if st.closed_by_writer {
                return Ok(None);
            }
            if st.writer_dead {
                return Err(PipeError::Broken.into());
            }
            self.cond.notify_all();
            self.cond.wait(&mut st);
        }
        let s = &mut *st;
        let len = s.buffer.len();
        let mut n = 0;
        while n < out.len() {
            let Some(in_pos) = s.in_pos else { break };
            let avail = if in_pos > s.out_pos {
                in_pos - s.out_pos
            } else {
                len - s.out_pos
            };
            let k = avail.min(out.len() - n);
            out[n..n + k].copy_from_slice(&s.buffer[s.out_pos..s.out_pos + k]);
            s.out_pos += k;
            if s.out_pos >= len {
                s.out_pos = 0;
            }
            if s.in_pos == Some(s.out_pos) {
                s.in_pos = None;
            }
            n += k;
        }
        self.cond.notify_all();
        Ok(Some(n))
    }
}

fn endpoint_dead(event: &str, size: usize) {
    if trace::level().enabled() {
        trace::emit(
            TraceEvent::new(EventLevel::Warn, "pipe", event)
                .with_details(serde_json::json!({ "size": size })),
        );
    }
}

// ---------------------------------------------------------------------------
// Generic endpoints
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Sender<T> {
    sink: Option<Arc<Pipe<T>>>,
    closed: bool,
}

impl<T: Copy + Default> Sender<T> {
    const fn new() -> Self {
        Self {
            sink: None,
            closed: false,
        }
    }

    fn connect(&mut self, receiver: &Receiver<T>) -> Result<()> {
        let mut st = receiver.pipe.state.lock();
        if self.sink.is_some() || st.connected {
            return Err(PipeError::AlreadyConnected.into());
        }
        if st.closed_by_reader {
            return Err(PipeError::Closed.into());
        }
        st.in_pos = None;
        st.out_pos = 0;
        st.connected = true;
        drop(st);
        self.sink = Some(Arc::clone(&receiver.pipe));
        Ok(())
    }

    fn pipe(&self) -> Result<&Pipe<T>> {
        self.sink
            .as_deref()
            .ok_or_else(|| PipeError::NotConnected.into())
    }

    fn write(&self, data: &[T]) -> Result<()> {
        self.pipe()?.receive(data)
    }

    fn flush(&self) -> Result<()> {
        if let Some(pipe) = &self.sink {
            let st = pipe.state.lock();
            if st.closed_by_reader || self.closed {
                return Err(PipeError::Closed.into());
            }
            pipe.cond.notify_all();
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        if let Some(pipe) = &self.sink {
            pipe.state.lock().closed_by_writer = true;
            pipe.cond.notify_all();
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Some(pipe) = &self.sink {
            let size = {
                let mut st = pipe.state.lock();
                st.writer_dead = true;
                st.buffer.len()
            };
            pipe.cond.notify_all();
            endpoint_dead("write_end_dead", size);
        }
    }
}

#[derive(Debug)]
struct Receiver<T> {
    pipe: Arc<Pipe<T>>,
}

impl<T: Copy + Default> Receiver<T> {
    fn new(size: usize) -> Result<Self> {
        Ok(Self {
            pipe: Arc::new(Pipe::new(size)?),
        })
    }

    fn read(&self, out: &mut [T]) -> Result<Option<usize>> {
        self.pipe.read(out)
    }

    fn available(&self) -> Result<usize> {
        let st = self.pipe.state.lock();
        if st.closed_by_reader {
            return Err(PipeError::Closed.into());
        }
        Ok(st.available())
    }

    fn ready(&self) -> Result<bool> {
        let st = self.pipe.state.lock();
        if st.closed_by_reader {
            return Err(PipeError::Closed.into());
        }
        if st.writer_dead && !st.closed_by_writer && st.in_pos.is_none() {
            return Err(PipeError::WriteEndDead.into());
        }
        Ok(st.in_pos.is_some())
    }

    fn close(&self) {
        let mut st = self.pipe.state.lock();
        st.closed_by_reader = true;
        st.in_pos = None;
        drop(st);
        self.pipe.cond.notify_all();
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let (connected, size) = {
            let mut st = self.pipe.state.lock();
            if st.closed_by_reader {
                return;
            }
            st.reader_dead = true;
            (st.connected, st.buffer.len())
        };
        self.pipe.cond.notify_all();
        if connected {
            endpoint_dead("read_end_dead", size);
        }
    }
}

// ---------------------------------------------------------------------------
// Character pipe
// ---------------------------------------------------------------------------

/// Writing end of a character pipe.
#[derive(Debug)]
pub struct PipedWriter {
    sender: Sender<char>,
}

impl Default for PipedWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PipedWriter {
    /// An unconnected writer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sender: Sender::new(),
        }
    }

    pub fn connected_to(reader: &PipedReader) -> Result<Self> {
        let mut w = Self::new();
        w.connect(reader)?;
        Ok(w)
    }

    pub fn connect(&mut self, reader: &PipedReader) -> Result<()> {
        self.sender.connect(&reader.receiver)
    }
}

impl CharSink for PipedWriter {
    fn write(&mut self, buf: &[char]) -> Result<()> {
        self.sender.write(buf)
    }
    fn flush(&mut self) -> Result<()> {
        self.sender.flush()
    }
    fn close(&mut self) -> Result<()> {
        self.sender.close();
        Ok(())
    }
}

/// Reading end of a character pipe. Owns the shared buffer.
#[derive(Debug)]
pub struct PipedReader {
    receiver: Receiver<char>,
}

impl PipedReader {
    pub fn new() -> Result<Self> {
        Self::with_capacity(DEFAULT_PIPE_SIZE)
    }

    pub fn with_capacity(size: usize) -> Result<Self> {
        Ok(Self {
            receiver: Receiver::new(size)?,
        })
    }

    pub fn connected_to(writer: &mut PipedWriter, size: usize) -> Result<Self> {
        let reader = Self::with_capacity(size)?;
        writer.connect(&reader)?;
        Ok(reader)
    }

    pub fn connect(&self, writer: &mut PipedWriter) -> Result<()> {
        writer.connect(self)
    }
}

impl CharSource for PipedReader {
    fn read(&mut self, buf: &mut [char]) -> Result<Option<usize>> {
        self.receiver.read(buf)
    }
    fn ready(&mut self) -> Result<bool> {
        self.receiver.ready()
    }
    fn close(&mut self) -> Result<()> {
        self.receiver.close();
        Ok(())
    }
}

/// Connected character pipe with a buffer of `size` characters.
pub fn pipe(size: usize) -> Result<(PipedWriter, PipedReader)> {
    let reader = PipedReader::with_capacity(size)?;
    let writer = PipedWriter::connected_to(&reader)?;
    Ok((writer, reader))
}

// ---------------------------------------------------------------------------
// Byte pipe
// ---------------------------------------------------------------------------

/// Writing end of a byte pipe.
#[derive(Debug)]
pub struct PipedOutputStream {
    sender: Sender<u8>,
}

impl Default for PipedOutputStream {
    fn default() -> Self {
        Self::new()
    }
}

impl PipedOutputStream {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sender: Sender::new(),
        }
    }

    pub fn connected_to(input: &PipedInputStream) -> Result<Self> {
        let mut out = Self::new();
        out.connect(input)?;
        Ok(out)
    }

    pub fn connect(&mut self, input: &PipedInputStream) -> Result<()> {
        self.sender.connect(&input.receiver)
    }
}

impl ByteSink for PipedOutputStream {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.sender.write(buf)
    }
    fn flush(&mut self) -> Result<()> {
        self.sender.flush()
    }
    fn close(&mut self) -> Result<()> {
        self.sender.close();
        Ok(())
    }
}

/// Reading end of a byte pipe. Owns the shared buffer.
#[derive(Debug)]
pub struct PipedInputStream {
    receiver: Receiver<u8>,
}

impl PipedInputStream {
    pub fn new() -> Result<Self> {
        Self::with_capacity(DEFAULT_PIPE_SIZE)
    }

    pub fn with_capacity(size: usize) -> Result<Self> {
        Ok(Self {
            receiver: Receiver::new(size)?,
        })
    }

    pub fn connect(&self, output: &mut PipedOutputStream) -> Result<()> {
        output.connect(self)
    }
}

impl ByteSource for PipedInputStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        self.receiver.read(buf)
    }
    fn available(&mut self) -> Result<usize> {
        self.receiver.available()
    }
    fn close(&mut self) -> Result<()> {
        self.receiver.close();
        Ok(())
    }
}

/// Connected byte pipe with a buffer of `size` bytes.
pub fn byte_pipe(size: usize) -> Result<(PipedOutputStream, PipedInputStream)> {
    let input = PipedInputStream::with_capacity(size)?;
    let output = PipedOutputStream::connected_to(&input)?;
    Ok((output, input))
}
