//! File-backed staging buffer for compressed entry data.
//!
//! The compress stage writes deflate output into a `StagingBuffer`. Output
//! fills a fixed in-memory buffer first; anything beyond that capacity spills
//! to a uniquely named temporary file, so a pathological entry never grows
//! resident memory past the configured bound. The writer stage drains the
//! in-memory part and then the spill file, which is unlinked once consumed.

use std::io::{self, Write};

use tempfile::{Builder, NamedTempFile};

/// In-memory capacity before output spills to disk.
pub const DEFAULT_BUFFER_CAPACITY: usize = 2 * 1024 * 1024;

const OVERFLOW_PREFIX: &str = "pzip-overflow";

#[derive(Debug)]
pub struct StagingBuffer {
    buf: Vec<u8>,
    capacity: usize,
    overflow: Option<NamedTempFile>,
    written: u64,
}

impl StagingBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        StagingBuffer {
            buf: Vec::with_capacity(capacity),
            capacity,
            overflow: None,
            written: 0,
        }
    }

    /// Total number of bytes accepted through `Write`.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// True if the buffered output was too large to fit in memory. The
    /// overflowed tail lives in a temporary file until consumed.
    pub fn overflowed(&self) -> bool {
        self.overflow.is_some()
    }

    /// The in-memory portion of the buffered output.
    pub fn in_memory(&self) -> &[u8] {
        &self.buf
    }

    /// Hands the spill file to the caller. Dropping the returned handle
    /// unlinks the file.
    pub fn take_overflow(&mut self) -> Option<NamedTempFile> {
        self.overflow.take()
    }

    /// Clears the buffer for reuse by another entry, keeping the in-memory
    /// allocation. Any unconsumed spill file is unlinked.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.overflow = None;
        self.written = 0;
    }
}

impl Default for StagingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for StagingBuffer {
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        let mut rest = p;

        let available = self.capacity - self.buf.len();
        if available > 0 {
            let max_writeable = available.min(rest.len());
            self.buf.extend_from_slice(&rest[..max_writeable]);
            self.written += max_writeable as u64;
            rest = &rest[max_writeable..];
        }

        if !rest.is_empty() {
            if self.overflow.is_none() {
                let file = Builder::new().prefix(OVERFLOW_PREFIX).tempfile()?;
                self.overflow = Some(file);
            }
            if let Some(ref mut overflow) = self.overflow {
                overflow.write_all(rest)?;
                self.written += rest.len() as u64;
            }
        }

        Ok(p.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(ref mut overflow) = self.overflow {
            overflow.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom};

    #[test]
    fn small_writes_stay_in_memory() {
        let mut buf = StagingBuffer::with_capacity(16);

        let n = buf.write(b"hello").unwrap();

        assert_eq!(n, 5);
        assert_eq!(buf.written(), 5);
        assert!(!buf.overflowed());
        assert_eq!(buf.in_memory(), b"hello");
    }

    #[test]
    fn exact_capacity_does_not_overflow() {
        let mut buf = StagingBuffer::with_capacity(4);

        buf.write_all(b"abcd").unwrap();

        assert!(!buf.overflowed());
        assert_eq!(buf.written(), 4);
    }

    #[test]
    fn overflow_spills_to_temp_file() {
        let mut buf = StagingBuffer::with_capacity(4);

        buf.write_all(b"abcdefgh").unwrap();
        buf.write_all(b"ij").unwrap();

        assert!(buf.overflowed());
        assert_eq!(buf.written(), 10);
        assert_eq!(buf.in_memory(), b"abcd");

        let mut overflow = buf.take_overflow().unwrap();
        let name = overflow
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        assert!(name.starts_with("pzip-overflow"));

        overflow.as_file_mut().seek(SeekFrom::Start(0)).unwrap();
        let mut spilled = Vec::new();
        overflow.read_to_end(&mut spilled).unwrap();
        assert_eq!(spilled, b"efghij");
    }

    #[test]
    fn write_never_reports_short_counts() {
        let mut buf = StagingBuffer::with_capacity(2);

        assert_eq!(buf.write(b"abcdef").unwrap(), 6);
    }

    #[test]
    fn reset_clears_state_for_reuse() {
        let mut buf = StagingBuffer::with_capacity(2);
        buf.write_all(b"abcdef").unwrap();
        assert!(buf.overflowed());

        buf.reset();

        assert_eq!(buf.written(), 0);
        assert!(!buf.overflowed());
        assert!(buf.in_memory().is_empty());

        buf.write_all(b"xy").unwrap();
        assert_eq!(buf.in_memory(), b"xy");
        assert!(!buf.overflowed());
    }
}
