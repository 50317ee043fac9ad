//! Block-data framing.
//!
//! Primitive data written outside a class's declared fields travels in
//! records: `TC_BLOCKDATA` with a one-byte length, or `TC_BLOCKDATALONG`
//! with a four-byte length. In block mode the output side packs writes into
//! records of at most [`MAX_BLOCK_SIZE`] bytes and the input side reads
//! across record boundaries as one continuous stream, stopping at the first
//! tag that is not a block header.

use crate::error::{IoError, Result};
use crate::io::codec;
use crate::io::data::{DataInput, DataOutput};
use crate::io::traits::{ByteSink, ByteSource};
use crate::serial::constants::{
    MAX_BLOCK_SIZE, TC_BASE, TC_BLOCKDATA, TC_BLOCKDATALONG, TC_MAX, TC_RESET,
};

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct BlockDataOutput<S> {
    sink: S,
    buf: Vec<u8>,
    block_mode: bool,
}

impl<S: ByteSink> BlockDataOutput<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            buf: Vec::with_capacity(MAX_BLOCK_SIZE),
            block_mode: false,
        }
    }

    #[must_use]
    pub fn block_mode(&self) -> bool {
        self.block_mode
    }

    /// Switch mode, returning the previous one. Leaving block mode emits
    /// any pending record.
    pub fn set_block_mode(&mut self, on: bool) -> Result<bool> {
        let old = self.block_mode;
        if old != on {
            self.drain()?;
            self.block_mode = on;
        }
        Ok(old)
    }

    /// Emit the pending record, if any.
    pub fn drain(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.write_header(self.buf.len())?;
        self.sink.write(&self.buf)?;
        self.buf.clear();
        Ok(())
    }

    fn write_header(&mut self, len: usize) -> Result<()> {
        if len <= 0xFF {
            self.sink.write(&[TC_BLOCKDATA, len as u8])
        } else {
            let mut h = [TC_BLOCKDATALONG, 0, 0, 0, 0];
            codec::put_int(&mut h, 1, len as i32);
            self.sink.write(&h)
        }
    }

    /// Emit `data` as exactly one record, after any pending one.
    pub fn write_block_exact(&mut self, data: &[u8]) -> Result<()> {
        self.drain()?;
        if data.is_empty() {
            return Ok(());
        }
        self.write_header(data.len())?;
        self.sink.write(data)
    }

    /// One byte outside block framing (a tag).
    pub fn write_tag(&mut self, tag: u8) -> Result<()> {
        debug_assert!(!self.block_mode);
        self.sink.write(&[tag])
    }

    pub fn flush(&mut self) -> Result<()> {
        self.drain()?;
        self.sink.flush()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_inner(self) -> S {
        self.sink
    }
}

impl<S: ByteSink> DataOutput for BlockDataOutput<S> {
    fn write_raw(&mut self, mut data: &[u8]) -> Result<()> {
        if !self.block_mode {
            return self.sink.write(data);
        }
        while !data.is_empty() {
            if self.buf.len() >= MAX_BLOCK_SIZE {
                self.drain()?;
            }
            let n = data.len().min(MAX_BLOCK_SIZE - self.buf.len());
            self.buf.extend_from_slice(&data[..n]);
            data = &data[n..];
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct BlockDataInput<S> {
    src: S,
    peeked: Option<u8>,
    block_mode: bool,
    /// Bytes left in the current record.
    unread: usize,
    /// The block run ended at a non-header tag.
    end: bool,
    reset_pending: bool,
    /// Object nesting depth, maintained by the object reader.
    pub(crate) depth: usize,
}

impl<S: ByteSource> BlockDataInput<S> {
    pub fn new(src: S) -> Self {
        Self {
            src,
            peeked: None,
            block_mode: false,
            unread: 0,
            end: false,
            reset_pending: false,
            depth: 0,
        }
    }

    #[must_use]
    pub fn block_mode(&self) -> bool {
        self.block_mode
    }

    /// Switch mode, returning the previous one. Leaving block mode with
    /// bytes left in the current record is an error.
    pub fn set_block_mode(&mut self, on: bool) -> Result<bool> {
        let old = self.block_mode;
        if old == on {
            return Ok(old);
        }
        if on {
            self.unread = 0;
            self.end = false;
        } else if self.unread > 0 {
            return Err(IoError::IllegalState("unread block data"));
        }
        self.block_mode = on;
        Ok(old)
    }

    /// Bytes left in the current record, without reading the next header.
    #[must_use]
    pub fn current_block_remaining(&self) -> usize {
        if self.block_mode && !self.end {
            self.unread
        } else {
            0
        }
    }

    /// A `TC_RESET` passed between records since the last call.
    pub fn take_reset(&mut self) -> bool {
        std::mem::take(&mut self.reset_pending)
    }

    /// Read ahead to the next record header in block mode; returns the
    /// bytes available in it.
    pub fn fill(&mut self) -> Result<usize> {
        if self.block_mode {
            self.refill()?;
        }
        Ok(self.current_block_remaining())
    }

    /// Next raw byte without consuming it.
    pub fn peek_byte(&mut self) -> Result<Option<u8>> {
        if self.peeked.is_none() {
            self.peeked = self.src.read_byte()?;
        }
        Ok(self.peeked)
    }

    fn raw_byte(&mut self) -> Result<Option<u8>> {
        match self.peeked.take() {
            Some(b) => Ok(Some(b)),
            None => self.src.read_byte(),
        }
    }

    fn raw_read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        if buf.is_empty() {
            return Ok(Some(0));
        }
        if let Some(b) = self.peeked.take() {
            buf[0] = b;
            return Ok(Some(1));
        }
        self.src.read(buf)
    }

    fn raw_read_fully(&mut self, buf: &mut [u8], eof: &str) -> Result<()> {
        let mut n = 0;
        while n < buf.len() {
            match self.raw_read(&mut buf[n..])? {
                None => return Err(IoError::StreamCorrupted(eof.to_string())),
                Some(k) => n += k,
            }
        }
        Ok(())
    }

    /// Consume one record header at the current position.
    fn read_header(&mut self) -> Result<usize> {
        match self.raw_byte()? {
            Some(TC_BLOCKDATA) => match self.raw_byte()? {
                Some(len) => Ok(usize::from(len)),
                None => Err(header_eof()),
            },
            Some(TC_BLOCKDATALONG) => {
                let mut b = [0u8; 4];
                self.raw_read_fully(&mut b, "unexpected EOF while reading block data header")?;
                let len = codec::get_int(&b, 0);
                if len < 0 {
                    return Err(IoError::StreamCorrupted(format!(
                        "illegal block data header length: {len}"
                    )));
                }
                Ok(len as usize)
            }
            Some(other) => Err(IoError::StreamCorrupted(format!(
                "invalid type code: {other:02X}"
            ))),
            None => Err(header_eof()),
        }
    }

    /// Advance to the next non-empty record or to the end of the run.
    fn refill(&mut self) -> Result<()> {
        while self.unread == 0 && !self.end {
            match self.peek_byte()? {
                None => self.end = true,
                Some(TC_BLOCKDATA | TC_BLOCKDATALONG) => self.unread = self.read_header()?,
                Some(TC_RESET) => {
                    self.raw_byte()?;
                    if self.depth > 0 {
                        return Err(IoError::StreamCorrupted(format!(
                            "unexpected reset; recursion depth: {}",
                            self.depth
                        )));
                    }
                    self.reset_pending = true;
                }
                Some(t) if !(TC_BASE..=TC_MAX).contains(&t) => {
                    return Err(IoError::StreamCorrupted(format!("invalid type code: {t:02X}")));
                }
                Some(_) => self.end = true,
            }
        }
        Ok(())
    }

    /// Read up to `buf.len()` bytes. In block mode `None` marks the end of
    /// the block-data run.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        if !self.block_mode {
            return self.raw_read(buf);
        }
        if buf.is_empty() {
            return Ok(Some(0));
        }
        self.refill()?;
        if self.end {
            return Ok(None);
        }
        let want = buf.len().min(self.unread);
        match self.raw_read(&mut buf[..want])? {
            None => Err(IoError::StreamCorrupted(
                "unexpected EOF in middle of data block".into(),
            )),
            Some(k) => {
                self.unread -= k;
                Ok(Some(k))
            }
        }
    }

    /// Discard the rest of the current block-data run.
    pub fn skip_block_data(&mut self) -> Result<()> {
        let mut scratch = [0u8; 256];
        while self.block_mode && self.read(&mut scratch)?.is_some() {}
        Ok(())
    }

    /// The unread tail of the current record (block mode).
    pub fn take_block_remainder(&mut self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.current_block_remaining()];
        self.raw_read_fully(&mut out, "unexpected EOF in middle of data block")?;
        self.unread = 0;
        Ok(out)
    }

    /// One whole record, header included, outside block mode.
    pub fn read_block(&mut self) -> Result<Vec<u8>> {
        let len = self.read_header()?;
        let mut out = Vec::with_capacity(len.min(MAX_BLOCK_SIZE * 64));
        let mut chunk = [0u8; MAX_BLOCK_SIZE];
        let mut left = len;
        while left > 0 {
            let n = left.min(chunk.len());
            self.raw_read_fully(&mut chunk[..n], "unexpected EOF in middle of data block")?;
            out.extend_from_slice(&chunk[..n]);
            left -= n;
        }
        Ok(out)
    }

    /// One raw byte outside block mode (a tag or a field byte).
    pub fn read_tag(&mut self) -> Result<u8> {
        debug_assert!(!self.block_mode);
        self.raw_byte()?.ok_or(IoError::UnexpectedEof)
    }

    pub fn source(&self) -> &S {
        &self.src
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.src
    }
}

fn header_eof() -> IoError {
    IoError::StreamCorrupted("unexpected EOF while reading block data header".into())
}

impl<S: ByteSource> DataInput for BlockDataInput<S> {
    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut n = 0;
        while n < buf.len() {
            match self.read(&mut buf[n..])? {
                None => return Err(IoError::UnexpectedEof),
                Some(k) => n += k,
            }
        }
        Ok(())
    }

    fn skip_bytes(&mut self, n: usize) -> Result<usize> {
        let mut scratch = [0u8; 256];
        let mut done = 0;
        while done < n {
            let want = (n - done).min(scratch.len());
            match self.read(&mut scratch[..want])? {
                None => break,
                Some(k) => done += k,
            }
        }
        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::array::ByteArrayInputStream;
    use crate::serial::constants::{TC_ENDBLOCKDATA, TC_NULL};

    #[test]
    fn short_and_long_headers() {
        let mut out = BlockDataOutput::new(Vec::new());
        out.set_block_mode(true).unwrap();
        out.write_int(7).unwrap();
        out.set_block_mode(false).unwrap();
        assert_eq!(out.sink(), &vec![TC_BLOCKDATA, 4, 0, 0, 0, 7]);

        let mut out = BlockDataOutput::new(Vec::new());
        out.set_block_mode(true).unwrap();
        out.write_raw(&[1u8; 1100]).unwrap();
        out.flush().unwrap();
        let bytes = out.into_inner();
        assert_eq!(&bytes[..5], &[TC_BLOCKDATALONG, 0, 0, 0x04, 0x00]);
        assert_eq!(bytes[5 + 1024], TC_BLOCKDATA);
        assert_eq!(bytes[5 + 1024 + 1], 76);
        assert_eq!(bytes.len(), 5 + 1024 + 2 + 76);
    }

    #[test]
    fn reads_across_records_and_stops_at_tag() {
        let bytes = vec![TC_BLOCKDATA, 2, 0, 1, TC_BLOCKDATA, 2, 0, 2, TC_ENDBLOCKDATA];
        let mut input = BlockDataInput::new(ByteArrayInputStream::new(bytes));
        input.set_block_mode(true).unwrap();
        assert_eq!(input.read_short().unwrap(), 1);
        assert_eq!(input.read_short().unwrap(), 2);
        assert!(matches!(input.read_i8(), Err(IoError::UnexpectedEof)));
        input.set_block_mode(false).unwrap();
        assert_eq!(input.read_tag().unwrap(), TC_ENDBLOCKDATA);
    }

    #[test]
    fn leaving_block_mode_mid_record_fails() {
        let bytes = vec![TC_BLOCKDATA, 2, 9, 9];
        let mut input = BlockDataInput::new(ByteArrayInputStream::new(bytes));
        input.set_block_mode(true).unwrap();
        input.read_i8().unwrap();
        assert_eq!(input.current_block_remaining(), 1);
        assert!(matches!(
            input.set_block_mode(false),
            Err(IoError::IllegalState("unread block data"))
        ));
        assert_eq!(input.take_block_remainder().unwrap(), vec![9]);
        input.set_block_mode(false).unwrap();
    }

    #[test]
    fn header_errors() {
        let mut input = BlockDataInput::new(ByteArrayInputStream::new(vec![0x10]));
        input.set_block_mode(true).unwrap();
        let err = input.read_i8().unwrap_err();
        assert_eq!(err.to_string(), "stream corrupted: invalid type code: 10");

        let mut input =
            BlockDataInput::new(ByteArrayInputStream::new(vec![TC_BLOCKDATALONG, 0xFF, 0, 0, 0]));
        input.set_block_mode(true).unwrap();
        assert!(input.read_i8().unwrap_err().to_string().contains("illegal block data header length"));

        let mut input = BlockDataInput::new(ByteArrayInputStream::new(vec![TC_BLOCKDATA]));
        input.set_block_mode(true).unwrap();
        assert!(input.read_i8().unwrap_err().to_string().contains("while reading block data header"));

        let mut input = BlockDataInput::new(ByteArrayInputStream::new(vec![TC_BLOCKDATA, 4, 1]));
        input.set_block_mode(true).unwrap();
        let mut buf = [0u8; 4];
        assert!(input.read_fully(&mut buf).unwrap_err().to_string().contains("middle of data block"));
    }

    #[test]
    fn reset_between_records() {
        let bytes = vec![TC_RESET, TC_BLOCKDATA, 1, 5, TC_NULL];
        let mut input = BlockDataInput::new(ByteArrayInputStream::new(bytes.clone()));
        input.set_block_mode(true).unwrap();
        assert_eq!(input.read_i8().unwrap(), 5);
        assert!(input.take_reset());
        assert!(!input.take_reset());

        let mut nested = BlockDataInput::new(ByteArrayInputStream::new(bytes));
        nested.depth = 2;
        nested.set_block_mode(true).unwrap();
        let err = nested.read_i8().unwrap_err();
        assert_eq!(err.to_string(), "stream corrupted: unexpected reset; recursion depth: 2");
    }

    #[test]
    fn exact_records_replay() {
        let mut out = BlockDataOutput::new(Vec::new());
        out.write_block_exact(&[1, 2, 3]).unwrap();
        out.write_block_exact(&[]).unwrap();
        let bytes = out.into_inner();
        assert_eq!(bytes, vec![TC_BLOCKDATA, 3, 1, 2, 3]);
        let mut input = BlockDataInput::new(ByteArrayInputStream::new(bytes));
        assert_eq!(input.read_block().unwrap(), vec![1, 2, 3]);
    }
}
