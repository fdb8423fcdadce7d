//! Raw wire-record files: a plain concatenation of 536-byte records.

use std::io::{self, Read, Write};

use dcache_core::{TraceEvent, RECORD_SIZE};

use crate::error::{ExportError, Result};

pub struct RawWriter<W: Write> {
    out: W,
    records: u64,
}

impl<W: Write> RawWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, records: 0 }
    }

    pub fn write(&mut self, evt: &TraceEvent) -> Result<()> {
        self.out.write_all(&evt.to_bytes())?;
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Iterates records of a raw stream. A trailing partial record is reported
/// as [`dcache_core::DecodeError::Truncated`] and ends the stream.
pub struct RawReader<R: Read> {
    input: R,
    done: bool,
}

impl<R: Read> RawReader<R> {
    pub fn new(input: R) -> Self {
        Self { input, done: false }
    }

    fn fill(&mut self, buf: &mut [u8; RECORD_SIZE]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < RECORD_SIZE {
            match self.input.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Iterator for RawReader<R> {
    type Item = Result<TraceEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = [0u8; RECORD_SIZE];
        match self.fill(&mut buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(n) => {
                if n < RECORD_SIZE {
                    self.done = true;
                }
                Some(TraceEvent::decode(&buf[..n]).map_err(ExportError::from))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}
