//! A bounded, stateful view over one piece's region of the backing file.
//! Reads and writes happen at `base_offset + cursor`, clamped to `length`;
//! seeks are relative to start/current/end and saturate at the bounds.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

pub struct ChunkStream {
    file: Arc<Mutex<File>>,
    base_offset: u64,
    length: u32,
    cursor: u32,
}

impl ChunkStream {
    pub(crate) fn new(file: Arc<Mutex<File>>, base_offset: u64, length: u32) -> Self {
        Self {
            file,
            base_offset,
            length,
            cursor: 0,
        }
    }

    pub const fn length(&self) -> u32 {
        self.length
    }

    pub const fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Seek relative to `whence`, saturating the resulting cursor to `[0, length]`.
    pub fn seek(&mut self, whence: Whence, offset: i64) -> u32 {
        let base = match whence {
            Whence::Start => 0i64,
            Whence::Current => self.cursor as i64,
            Whence::End => self.length as i64,
        };
        let target = base.saturating_add(offset);
        self.cursor = target.clamp(0, self.length as i64) as u32;
        self.cursor
    }

    /// Read up to `len` bytes from the cursor, clamped to the piece boundary,
    /// and advance the cursor by the amount actually read.
    pub fn read(&mut self, len: u32) -> Result<Vec<u8>> {
        let remaining = self.length - self.cursor;
        let to_read = len.min(remaining) as usize;
        let mut buf = vec![0u8; to_read];
        if to_read > 0 {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(
                self.base_offset + self.cursor as u64,
            ))?;
            file.read_exact(&mut buf)?;
        }
        self.cursor += to_read as u32;
        Ok(buf)
    }

    /// Write `data` at the cursor. Fails if the write would cross the piece
    /// boundary; advances the cursor and flushes on success.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let end = self.cursor as u64 + data.len() as u64;
        if end > self.length as u64 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "write past end of chunk",
            )));
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.base_offset + self.cursor as u64))?;
        file.write_all(data)?;
        file.flush()?;
        drop(file);
        self.cursor = end as u32;
        Ok(())
    }

    /// Read the entire piece from the start, independent of the current cursor.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.length as usize];
        if self.length > 0 {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(self.base_offset))?;
            file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn backing(len: u64) -> Arc<Mutex<File>> {
        let mut f = tempfile::tempfile().unwrap();
        f.write_all(&vec![0u8; len as usize]).unwrap();
        Arc::new(Mutex::new(f))
    }

    #[test]
    fn test_write_then_read_back() {
        let file = backing(100);
        let mut cs = ChunkStream::new(file.clone(), 10, 20);
        cs.write(b"hello world").unwrap();
        cs.seek(Whence::Start, 0);
        let data = cs.read(11).unwrap();
        assert_eq!(&data, b"hello world");
    }

    #[test]
    fn test_write_past_end_fails() {
        let file = backing(100);
        let mut cs = ChunkStream::new(file, 0, 5);
        assert!(cs.write(b"toolong!!").is_err());
    }

    #[test]
    fn test_seek_saturates_at_bounds() {
        let file = backing(100);
        let mut cs = ChunkStream::new(file, 0, 10);
        assert_eq!(cs.seek(Whence::Start, -5), 0);
        assert_eq!(cs.seek(Whence::End, 100), 10);
        assert_eq!(cs.seek(Whence::Current, -3), 7);
    }

    #[test]
    fn test_read_clamped_to_remaining() {
        let file = backing(100);
        let mut cs = ChunkStream::new(file, 0, 4);
        let data = cs.read(100).unwrap();
        assert_eq!(data.len(), 4);
        assert_eq!(cs.cursor(), 4);
        assert!(cs.read(10).unwrap().is_empty());
    }

    #[test]
    fn test_read_all_ignores_cursor() {
        let file = backing(100);
        let mut cs = ChunkStream::new(file, 10, 5);
        cs.write(b"abcde").unwrap();
        cs.seek(Whence::Start, 2);
        assert_eq!(cs.read_all().unwrap(), b"abcde");
    }
}
