//! Line-counting reader.
//!
//! `\n`, `\r` and `\r\n` each end one line. Single-character reads
//! translate every terminator to `\n`; bulk reads count but do not
//! translate. A final line without a terminator is counted once end of
//! stream is reached.

use crate::error::{IoError, Result};
use crate::io::buffered::BufferedReader;
use crate::io::traits::CharSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prev {
    /// Nothing read yet, or last character was a terminator.
    Eol,
    /// Last character was ordinary data.
    Char,
    /// End of stream already reported.
    Eof,
}

#[derive(Debug, Clone, Copy)]
struct Saved {
    line_number: u64,
    skip_lf: bool,
    prev: Prev,
}

/// Buffered reader that keeps track of the current line number.
#[derive(Debug)]
pub struct LineNumberReader<R> {
    reader: BufferedReader<R>,
    line_number: u64,
    skip_lf: bool,
    prev: Prev,
    marked: Option<Saved>,
}

impl<R: CharSource> LineNumberReader<R> {
    pub fn new(inner: R) -> Self {
        Self::from_reader(BufferedReader::new(inner))
    }

    pub fn with_capacity(inner: R, size: usize) -> Result<Self> {
        Ok(Self::from_reader(BufferedReader::with_capacity(inner, size)?))
    }

    fn from_reader(reader: BufferedReader<R>) -> Self {
        Self {
            reader,
            line_number: 0,
            skip_lf: false,
            prev: Prev::Eol,
            marked: None,
        }
    }

    #[must_use]
    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    pub fn set_line_number(&mut self, line_number: u64) {
        self.line_number = line_number;
    }

    fn at_eof(&mut self) {
        if self.prev == Prev::Char {
            self.line_number += 1;
        }
        self.prev = Prev::Eof;
    }

    /// Read a line and advance the line number.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        let line = self.reader.read_line_with(self.skip_lf)?;
        self.skip_lf = false;
        match line {
            Some((text, terminated)) => {
                self.line_number += 1;
                self.prev = if terminated { Prev::Eol } else { Prev::Eof };
                Ok(Some(text))
            }
            None => {
                self.at_eof();
                Ok(None)
            }
        }
    }
}

impl<R: CharSource> CharSource for LineNumberReader<R> {
    fn read_char(&mut self) -> Result<Option<char>> {
        let mut c = self.reader.read_char()?;
        if self.skip_lf {
            if c == Some('\n') {
                c = self.reader.read_char()?;
            }
            self.skip_lf = false;
        }
        match c {
            Some('\r') => {
                self.skip_lf = true;
                self.line_number += 1;
                self.prev = Prev::Eol;
                Ok(Some('\n'))
            }
            Some('\n') => {
                self.line_number += 1;
                self.prev = Prev::Eol;
                Ok(Some('\n'))
            }
            None => {
                self.at_eof();
                Ok(None)
            }
            Some(other) => {
                self.prev = Prev::Char;
                Ok(Some(other))
            }
        }
    }

    fn read(&mut self, out: &mut [char]) -> Result<Option<usize>> {
        let n = match self.reader.read(out)? {
            None => {
                self.at_eof();
                return Ok(None);
            }
            Some(n) => n,
        };
        for &c in &out[..n] {
            if self.skip_lf {
                self.skip_lf = false;
                if c == '\n' {
                    continue;
                }
            }
            match c {
                '\r' => {
                    self.skip_lf = true;
                    self.line_number += 1;
                }
                '\n' => self.line_number += 1,
                _ => {}
            }
        }
        if let Some(&last) = out[..n].last() {
            self.prev = if last == '\r' || last == '\n' {
                Prev::Eol
            } else {
                Prev::Char
            };
        }
        Ok(Some(n))
    }

    /// Skips by reading, so skipped terminators are counted.
    fn skip(&mut self, n: i64) -> Result<i64> {
        if n < 0 {
            return Err(IoError::IllegalArgument("skip() value is negative".into()));
        }
        let size = (n as u64).min(8192) as usize;
        let mut scratch = vec!['\0'; size];
        let mut r = n;
        while r > 0 {
            let want = (r as u64).min(size as u64) as usize;
            match self.read(&mut scratch[..want])? {
                None => break,
                Some(k) => r -= k as i64,
            }
        }
        Ok(n - r)
    }

    fn ready(&mut self) -> Result<bool> {
        self.reader.ready()
    }

    fn mark_supported(&self) -> bool {
        true
    }

    fn mark(&mut self, read_ahead_limit: usize) -> Result<()> {
        // One extra character covers a '\n' swallowed after a '\r'.
        let limit = if self.skip_lf {
            read_ahead_limit.saturating_add(1)
        } else {
            read_ahead_limit
        };
        self.reader.mark(limit)?;
        self.marked = Some(Saved {
            line_number: self.line_number,
            skip_lf: self.skip_lf,
            prev: self.prev,
        });
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.reader.reset()?;
        if let Some(saved) = self.marked {
            self.line_number = saved.line_number;
            self.skip_lf = saved.skip_lf;
            self.prev = saved.prev;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.reader.close()
    }
}
