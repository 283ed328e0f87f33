//! Dense array of `u64` start offsets, one per block, `index[k]` = start
//! offset of block `first_block_num + k`.

use crate::blockfile::RandomAccessFile;
use crate::error::{BlockLogError, Result};
use memmap2::MmapMut;
use std::path::Path;

pub const ENTRY_WIDTH: u64 = 8;

pub struct IndexFile {
    file: RandomAccessFile,
}

impl IndexFile {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        Ok(IndexFile { file: RandomAccessFile::open_or_create(path)? })
    }

    pub fn len_bytes(&self) -> Result<u64> {
        self.file.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.file.is_empty()
    }

    pub fn num_entries(&self) -> Result<u64> {
        Ok(self.len_bytes()? / ENTRY_WIDTH)
    }

    pub fn read_entry(&mut self, relative_index: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.file.read_at(relative_index * ENTRY_WIDTH, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn append_entry(&mut self, start_offset: u64) -> Result<()> {
        self.file.append(&start_offset.to_le_bytes())?;
        Ok(())
    }

    pub fn tail_entry(&mut self) -> Result<Option<u64>> {
        let entries = self.num_entries()?;
        if entries == 0 {
            return Ok(None);
        }
        Ok(Some(self.read_entry(entries - 1)?))
    }

    pub fn truncate_to_entries(&mut self, entries: u64) -> Result<()> {
        self.file.truncate(entries * ENTRY_WIDTH)
    }

    pub fn read_raw_region(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.read_at(offset, buf)
    }

    pub fn write_raw_region(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.write_at(offset, buf)
    }

    pub fn delete_all(&mut self) -> Result<()> {
        self.file.truncate(0)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()
    }

    /// Rewrites every entry, subtracting `delta` (used by `vacuum` once
    /// block payload offsets have all shifted down by the same amount).
    pub fn rebase(&mut self, delta: u64) -> Result<()> {
        let entries = self.num_entries()?;
        for i in 0..entries {
            let old = self.read_entry(i)?;
            let new = old.checked_sub(delta).ok_or_else(|| {
                BlockLogError::Exception(format!("index rebase underflow: {old} - {delta}"))
            })?;
            self.file.write_at(i * ENTRY_WIDTH, &new.to_le_bytes())?;
        }
        Ok(())
    }

    /// Rewrites every entry, adding a signed `delta` (used when the entries'
    /// backing region moves to a new absolute position, e.g. a header size
    /// change during pruning — unlike `rebase`, the shift may be positive).
    pub fn shift(&mut self, delta: i64) -> Result<()> {
        let entries = self.num_entries()?;
        for i in 0..entries {
            let old = self.read_entry(i)?;
            let new = old
                .checked_add_signed(delta)
                .ok_or_else(|| BlockLogError::Exception(format!("index shift overflow: {old} + {delta}")))?;
            self.file.write_at(i * ENTRY_WIDTH, &new.to_le_bytes())?;
        }
        Ok(())
    }

    /// Reconstructs the index by chasing the block file's trailing
    /// self-offset chain backward from `tail_offset` (the start offset of
    /// the last entry, as recovered from the block file) down to
    /// `header_size`, writing entries right-to-left into a memory-mapped
    /// file sized `num_blocks * 8` (spec.md §4.E).
    pub fn reconstruct(
        &mut self,
        block_file: &mut RandomAccessFile,
        header_size: u64,
        tail_start_offset: u64,
    ) -> Result<u64> {
        // First pass: count entries by chasing the chain without writing.
        let mut count = 0u64;
        let mut cursor = tail_start_offset;
        loop {
            count += 1;
            if cursor == header_size {
                break;
            }
            cursor = read_prev_start_offset(block_file, cursor)?;
        }

        self.delete_all()?;
        self.file.truncate(count * ENTRY_WIDTH)?;
        let mut mmap = unsafe { MmapMut::map_mut(self.file.inner())? };

        let mut cursor = tail_start_offset;
        let mut remaining = count;
        loop {
            remaining -= 1;
            let slot = (remaining * ENTRY_WIDTH) as usize;
            mmap[slot..slot + 8].copy_from_slice(&cursor.to_le_bytes());
            if cursor == header_size {
                break;
            }
            cursor = read_prev_start_offset(block_file, cursor)?;
        }
        mmap.flush()?;
        Ok(count)
    }
}

/// Every block entry ends with its own start offset as a trailing `u64`,
/// immediately before the next entry's payload begins; for a block whose
/// payload begins at `start_offset`, the previous block's trailing word
/// sits 8 bytes before that.
fn read_prev_start_offset(block_file: &mut RandomAccessFile, start_offset: u64) -> Result<u64> {
    if start_offset < 8 {
        return Err(BlockLogError::Exception("index reconstruction ran past start of file".into()));
    }
    let mut buf = [0u8; 8];
    block_file.read_at(start_offset - 8, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_tail() {
        let dir = tempdir().unwrap();
        let mut idx = IndexFile::open_or_create(&dir.path().join("i")).unwrap();
        idx.append_entry(100).unwrap();
        idx.append_entry(200).unwrap();
        assert_eq!(idx.num_entries().unwrap(), 2);
        assert_eq!(idx.tail_entry().unwrap(), Some(200));
        assert_eq!(idx.read_entry(0).unwrap(), 100);
    }

    #[test]
    fn rebase_shifts_every_entry() {
        let dir = tempdir().unwrap();
        let mut idx = IndexFile::open_or_create(&dir.path().join("i")).unwrap();
        idx.append_entry(1000).unwrap();
        idx.append_entry(2000).unwrap();
        idx.rebase(500).unwrap();
        assert_eq!(idx.read_entry(0).unwrap(), 500);
        assert_eq!(idx.read_entry(1).unwrap(), 1500);
    }
}
