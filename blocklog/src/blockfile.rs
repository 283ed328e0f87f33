//! Thin wrapper over the two on-disk files (`blocks.log`, `blocks.index`):
//! positioned read/write plus Linux hole-punching for pruning.

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub struct RandomAccessFile {
    file: File,
}

impl RandomAccessFile {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        Ok(RandomAccessFile { file })
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    pub fn append(&mut self, buf: &[u8]) -> Result<u64> {
        let pos = self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(buf)?;
        Ok(pos)
    }

    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    /// Reads from `offset` to end of file, tolerating a shorter read than
    /// requested (used for forensic dumps of a possibly-truncated tail).
    pub fn read_to_end_from(&mut self, offset: u64) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    pub fn inner(&self) -> &File {
        &self.file
    }

    pub fn inner_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Punches a hole in `[offset, offset+len)`, leaving the file's reported
    /// length unchanged (`FALLOC_FL_PUNCH_HOLE | FALLOC_FL_KEEP_SIZE`). Used
    /// by pruning so retained blocks keep their absolute byte offsets.
    #[cfg(unix)]
    pub fn punch_hole(&mut self, offset: u64, len: u64) -> Result<()> {
        use nix::fcntl::{fallocate, FallocateFlags};
        use std::os::unix::io::AsRawFd;
        if len == 0 {
            return Ok(());
        }
        fallocate(
            self.file.as_raw_fd(),
            FallocateFlags::FALLOC_FL_PUNCH_HOLE | FallocateFlags::FALLOC_FL_KEEP_SIZE,
            offset as i64,
            len as i64,
        )
        .map_err(|e| crate::error::BlockLogError::Exception(format!("punch_hole failed: {e}")))?;
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn punch_hole(&mut self, _offset: u64, _len: u64) -> Result<()> {
        // Non-Linux targets keep the full file size; pruning still advances
        // `first_block_num` and is otherwise correct, just not sparse.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_read_round_trip() {
        let dir = tempdir().unwrap();
        let mut f = RandomAccessFile::open_or_create(&dir.path().join("x")).unwrap();
        let pos = f.append(b"hello").unwrap();
        assert_eq!(pos, 0);
        let pos2 = f.append(b"world").unwrap();
        assert_eq!(pos2, 5);
        let mut buf = [0u8; 5];
        f.read_at(5, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn truncate_shrinks_file() {
        let dir = tempdir().unwrap();
        let mut f = RandomAccessFile::open_or_create(&dir.path().join("x")).unwrap();
        f.append(b"0123456789").unwrap();
        f.truncate(4).unwrap();
        assert_eq!(f.len().unwrap(), 4);
    }
}
