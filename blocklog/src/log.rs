//! `BlockLog` ties the block file and index file together and implements
//! the lifecycle spec.md §4.E describes: open/recover, prune, vacuum,
//! repair, extract range.

use crate::blockfile::RandomAccessFile;
use crate::error::{BlockLogError, Result};
use crate::header::{fallback_chain_id, ChainIdentity, LogHeader};
use crate::indexfile::{IndexFile, ENTRY_WIDTH};
use crate::version::{LogVersion, CURRENT_VERSION};
use glint_core::{decode_varuint32, encode_varuint32, BlockId, BlockNum};
use std::fs;
use std::path::{Path, PathBuf};

const BLOCK_FILE_NAME: &str = "blocks.log";
const INDEX_FILE_NAME: &str = "blocks.index";
const PRUNED_TRAILER_WIDTH: u64 = 4;

#[derive(Debug, Clone, Copy)]
pub struct BlockLogConfig {
    /// `None` means "do not prune, stay a dense log".
    pub prune_blocks: Option<u32>,
    /// Rounded up to a power of two on construction, per spec.md §4.E.
    pub prune_threshold: u32,
    /// Chain id to adopt if pruning ever needs to evict a genesis identity
    /// past block 1. `None` falls back to [`header::fallback_chain_id`].
    pub chain_id_if_needed: Option<[u8; 32]>,
}

impl BlockLogConfig {
    pub fn new(prune_blocks: Option<u32>, prune_threshold: u32) -> Self {
        BlockLogConfig {
            prune_blocks,
            prune_threshold: prune_threshold.max(1).next_power_of_two(),
            chain_id_if_needed: None,
        }
    }

    pub fn dense() -> Self {
        BlockLogConfig { prune_blocks: None, prune_threshold: 1, chain_id_if_needed: None }
    }

    pub fn with_chain_id_if_needed(mut self, chain_id: [u8; 32]) -> Self {
        self.chain_id_if_needed = Some(chain_id);
        self
    }
}

pub struct BlockLog {
    data_dir: PathBuf,
    block_file: RandomAccessFile,
    index_file: IndexFile,
    header: LogHeader,
    header_size: u64,
    head: Option<(BlockNum, u64)>,
    config: BlockLogConfig,
}

pub struct RepairReport {
    pub blocks_recovered: u32,
    pub stopped_at: Option<BlockNum>,
    pub bad_tail_path: Option<PathBuf>,
}

impl BlockLog {
    pub fn first_block_num(&self) -> BlockNum {
        self.header.first_block_num
    }

    pub fn head_block_num(&self) -> Option<BlockNum> {
        self.head.map(|(n, _)| n)
    }

    pub fn is_pruned(&self) -> bool {
        self.header.version.is_pruned()
    }

    pub fn identity(&self) -> &ChainIdentity {
        &self.header.identity
    }

    pub fn open(data_dir: impl AsRef<Path>, config: BlockLogConfig, default_identity: ChainIdentity) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;
        let block_path = data_dir.join(BLOCK_FILE_NAME);
        let index_path = data_dir.join(INDEX_FILE_NAME);

        let mut block_file = RandomAccessFile::open_or_create(&block_path)?;
        let mut index_file = IndexFile::open_or_create(&index_path)?;

        if block_file.is_empty()? {
            if !index_file.is_empty()? {
                index_file.delete_all()?;
            }
            let version = LogVersion::unpruned(CURRENT_VERSION);
            let header = match default_identity {
                ChainIdentity::Genesis(g) => LogHeader::new_genesis(version, g),
                ChainIdentity::ChainId(id) => LogHeader::new_chain_id(version, 1, id),
            };
            let mut buf = Vec::new();
            let header_size = header.write(&mut buf)?;
            block_file.append(&buf)?;
            block_file.flush()?;
            return Ok(BlockLog { data_dir, block_file, index_file, header, header_size, head: None, config });
        }

        let mut header_reader = fs::File::open(&block_path)?;
        let (header, header_size) = LogHeader::read(&mut header_reader)?;

        let file_len = block_file.len()?;
        let trailer_len = if header.version.is_pruned() { PRUNED_TRAILER_WIDTH } else { 0 };
        if file_len < header_size + trailer_len {
            return Err(BlockLogError::Exception("block file shorter than its own header".into()));
        }
        let region_end = file_len - trailer_len;

        let mut log = BlockLog { data_dir, block_file, index_file, header, header_size, head: None, config };

        if region_end == header_size {
            // Header only, no blocks yet.
            if !log.index_file.is_empty()? {
                log.index_file.delete_all()?;
            }
            return Ok(log);
        }

        let mut tail_buf = [0u8; 8];
        log.block_file.read_at(region_end - 8, &mut tail_buf)?;
        let last_start_offset = u64::from_le_bytes(tail_buf);

        let index_tail = log.index_file.tail_entry()?;
        let num_entries = if log.index_file.is_empty()? || index_tail != Some(last_start_offset) {
            log.index_file.reconstruct(&mut log.block_file, header_size, last_start_offset)?
        } else {
            log.index_file.num_entries()?
        };

        if num_entries > 0 {
            let head_num = log.header.first_block_num + (num_entries as u32 - 1);
            log.head = Some((head_num, last_start_offset));
        }

        log.reconcile_mode()?;
        Ok(log)
    }

    fn reconcile_mode(&mut self) -> Result<()> {
        let wants_pruned = self.config.prune_blocks.is_some();
        if wants_pruned && !self.header.version.is_pruned() {
            self.prune()?;
        } else if !wants_pruned && self.header.version.is_pruned() {
            self.vacuum()?;
        }
        Ok(())
    }

    fn entry_region_end(&mut self) -> Result<u64> {
        let file_len = self.block_file.len()?;
        let trailer = if self.header.version.is_pruned() { PRUNED_TRAILER_WIDTH } else { 0 };
        Ok(file_len - trailer)
    }

    pub fn append(&mut self, block_num: BlockNum, payload: &[u8]) -> Result<()> {
        let expected = match self.head {
            Some((n, _)) => n + 1,
            None => self.header.first_block_num,
        };
        if block_num != expected {
            return Err(BlockLogError::AppendFail(format!(
                "expected block {expected}, got {block_num}"
            )));
        }
        let expected_index_len = (block_num - self.header.first_block_num) as u64 * ENTRY_WIDTH;
        let actual_index_len = self.index_file.len_bytes()?;
        if actual_index_len != expected_index_len {
            return Err(BlockLogError::Exception(format!(
                "index length {actual_index_len} does not match expected {expected_index_len} before appending block {block_num}"
            )));
        }

        let region_end = self.entry_region_end()?;
        let start_offset = region_end;

        let mut entry = Vec::with_capacity(payload.len() + 13);
        let mut len_buf = Vec::new();
        encode_varuint32(payload.len() as u32, &mut len_buf);
        entry.extend_from_slice(&len_buf);
        entry.extend_from_slice(payload);
        entry.extend_from_slice(&start_offset.to_le_bytes());

        if self.header.version.is_pruned() {
            // Overwrite the trailer position with the new entry, then
            // reappend a trailer (truncate drops the stale 4 bytes first).
            self.block_file.truncate(start_offset)?;
        }
        self.block_file.write_at(start_offset, &entry)?;
        self.index_file.append_entry(start_offset)?;
        self.head = Some((block_num, start_offset));

        if self.header.version.is_pruned() {
            let num_blocks = block_num - self.header.first_block_num + 1;
            self.block_file.append(&num_blocks.to_le_bytes())?;
        }

        self.maybe_autoprune()?;
        Ok(())
    }

    /// `prune_threshold` rounds to a power of two (spec.md §4.E) and bounds
    /// how large the unreclaimed slack between the logical retention window
    /// and the physically punched region is allowed to grow before a hole
    /// is actually punched; the logical window (`first_block_num`, index)
    /// always tracks `head - prune_blocks + 1` exactly on every append, so
    /// `read_block_by_num` never exposes a block outside the configured
    /// retention even when the physical reclaim is deferred.
    fn maybe_autoprune(&mut self) -> Result<()> {
        let Some(k) = self.config.prune_blocks else { return Ok(()) };
        let Some((head, _)) = self.head else { return Ok(()) };
        if head < k {
            return Ok(());
        }
        let prune_to = head - k + 1;
        self.prune_to(prune_to)
    }

    pub fn prune(&mut self) -> Result<()> {
        let Some(k) = self.config.prune_blocks else { return Ok(()) };
        let Some((head, _)) = self.head else { return Ok(()) };
        if head < k {
            return Ok(());
        }
        self.prune_to(head - k + 1)
    }

    fn prune_to(&mut self, prune_to: BlockNum) -> Result<()> {
        if prune_to <= self.header.first_block_num {
            return Ok(());
        }
        let Some((head, _)) = self.head else { return Ok(()) };

        if prune_to > 1 {
            if let ChainIdentity::Genesis(genesis) = &self.header.identity {
                let chain_id = self.config.chain_id_if_needed.unwrap_or_else(|| fallback_chain_id(genesis));
                return self.prune_to_converting_identity(prune_to, head, chain_id);
            }
        }

        let was_pruned_before = self.header.version.is_pruned();

        let relative = (prune_to - self.header.first_block_num) as u64;
        let prune_to_offset = self.index_file.read_entry(relative)?;

        self.block_file.punch_hole(self.header_size, prune_to_offset - self.header_size)?;

        let old_index_len = self.index_file.len_bytes()?;
        let keep_from_bytes = relative * ENTRY_WIDTH;
        let keep_len = old_index_len - keep_from_bytes;
        if keep_len > 0 {
            let mut remaining = vec![0u8; keep_len as usize];
            self.index_file.read_raw_region(keep_from_bytes, &mut remaining)?;
            self.index_file.write_raw_region(0, &remaining)?;
        }
        self.index_file.truncate_to_entries(keep_len / ENTRY_WIDTH)?;

        self.header.first_block_num = prune_to;
        self.header.version = self.header.version.with_pruned(true);
        self.rewrite_header_in_place()?;

        if was_pruned_before {
            let file_len = self.block_file.len()?;
            self.block_file.truncate(file_len - PRUNED_TRAILER_WIDTH)?;
        }
        let num_blocks = head - self.header.first_block_num + 1;
        self.block_file.append(&num_blocks.to_le_bytes())?;

        self.block_file.flush()?;
        self.index_file.flush()?;
        Ok(())
    }

    /// Pruning past block 1 on a genesis-identified log can no longer carry
    /// the genesis blob (it falls outside the retained window), so the
    /// header must switch to a fixed-size chain id — a size change the
    /// in-place rewrite (`rewrite_header_in_place`) refuses on purpose.
    /// This physically relocates the retained entry region to sit right
    /// after the new (differently sized) header instead of rewriting the
    /// header in place, the same relocate-and-rebase technique `vacuum`
    /// uses for its own size change.
    fn prune_to_converting_identity(&mut self, prune_to: BlockNum, head: BlockNum, chain_id: [u8; 32]) -> Result<()> {
        let relative = (prune_to - self.header.first_block_num) as u64;
        let old_prune_to_offset = self.index_file.read_entry(relative)?;
        let old_region_end = self.block_file.len()?;

        let new_header = LogHeader {
            version: self.header.version.with_pruned(true),
            first_block_num: prune_to,
            identity: ChainIdentity::ChainId(chain_id),
        };
        let mut header_buf = Vec::new();
        let new_header_size = new_header.write(&mut header_buf)?;

        let length = old_region_end - old_prune_to_offset;
        relocate_bytes(&mut self.block_file, old_prune_to_offset, new_header_size, length)?;

        let delta = new_header_size as i64 - old_prune_to_offset as i64;
        let count = self.index_file.num_entries()?;
        let kept_old_offsets: Vec<u64> = (relative..count).map(|i| self.index_file.read_entry(i)).collect::<Result<_>>()?;
        for (i, &old_off) in kept_old_offsets.iter().enumerate() {
            let entry_end_old = if i + 1 < kept_old_offsets.len() { kept_old_offsets[i + 1] } else { old_region_end };
            let trailer_pos_new = (entry_end_old as i64 + delta - 8) as u64;
            let new_off = (old_off as i64 + delta) as u64;
            self.block_file.write_at(trailer_pos_new, &new_off.to_le_bytes())?;
        }

        let old_index_len = self.index_file.len_bytes()?;
        let keep_from_bytes = relative * ENTRY_WIDTH;
        let keep_len = old_index_len - keep_from_bytes;
        if keep_len > 0 {
            let mut remaining = vec![0u8; keep_len as usize];
            self.index_file.read_raw_region(keep_from_bytes, &mut remaining)?;
            self.index_file.write_raw_region(0, &remaining)?;
        }
        self.index_file.truncate_to_entries(keep_len / ENTRY_WIDTH)?;
        self.index_file.shift(delta)?;

        self.block_file.truncate(new_header_size + length)?;
        self.block_file.write_at(0, &header_buf)?;

        self.header = new_header;
        self.header_size = new_header_size;

        let num_blocks = head - self.header.first_block_num + 1;
        self.block_file.append(&num_blocks.to_le_bytes())?;

        self.block_file.flush()?;
        self.index_file.flush()?;
        Ok(())
    }

    pub fn vacuum(&mut self) -> Result<()> {
        if !self.header.version.is_pruned() {
            return Ok(());
        }
        let count = self.index_file.num_entries()?;
        if count == 0 {
            self.header.version = self.header.version.with_pruned(false);
            self.rewrite_header_in_place()?;
            self.block_file.truncate(self.header_size)?;
            return Ok(());
        }

        let old_offsets: Vec<u64> = (0..count).map(|i| self.index_file.read_entry(i)).collect::<Result<_>>()?;
        let old_region_start = old_offsets[0];
        let file_len = self.block_file.len()?;
        let old_region_end = file_len - PRUNED_TRAILER_WIDTH;
        let delta = old_region_start - self.header_size;

        if delta > 0 {
            let mut buf = vec![0u8; 1 << 20];
            let mut src = old_region_start;
            let mut dst = self.header_size;
            let mut remaining = old_region_end - old_region_start;
            while remaining > 0 {
                let chunk = remaining.min(buf.len() as u64) as usize;
                self.block_file.read_at(src, &mut buf[..chunk])?;
                self.block_file.write_at(dst, &buf[..chunk])?;
                src += chunk as u64;
                dst += chunk as u64;
                remaining -= chunk as u64;
            }

            for i in 0..count as usize {
                let old_off = old_offsets[i];
                let new_off = old_off - delta;
                let entry_end_old = if i + 1 < count as usize { old_offsets[i + 1] } else { old_region_end };
                let trailer_pos_new = entry_end_old - delta - 8;
                self.block_file.write_at(trailer_pos_new, &new_off.to_le_bytes())?;
            }
            self.index_file.rebase(delta)?;
        }

        self.block_file.truncate(old_region_end - delta)?;
        self.header.version = self.header.version.with_pruned(false);
        self.rewrite_header_in_place()?;
        self.block_file.flush()?;
        self.index_file.flush()?;
        Ok(())
    }

    fn rewrite_header_in_place(&mut self) -> Result<()> {
        let mut buf = Vec::new();
        let new_size = self.header.write(&mut buf)?;
        if new_size != self.header_size {
            return Err(BlockLogError::Exception(
                "header rewrite changed size; vacuum/prune only ever toggle the pruned bit".into(),
            ));
        }
        self.block_file.write_at(0, &buf)?;
        Ok(())
    }

    pub fn read_block_by_num(&mut self, n: BlockNum) -> Result<Vec<u8>> {
        let Some((head, _)) = self.head else { return Err(BlockLogError::BlockNotFound(n)) };
        if n < self.header.first_block_num || n > head {
            return Err(BlockLogError::BlockNotFound(n));
        }
        let relative = (n - self.header.first_block_num) as u64;
        let start_offset = self.index_file.read_entry(relative)?;
        self.read_entry_payload(start_offset)
    }

    fn read_entry_payload(&mut self, start_offset: u64) -> Result<Vec<u8>> {
        let mut len_bytes = Vec::with_capacity(5);
        loop {
            let mut b = [0u8; 1];
            self.block_file.read_at(start_offset + len_bytes.len() as u64, &mut b)?;
            len_bytes.push(b[0]);
            if b[0] & 0x80 == 0 || len_bytes.len() >= 5 {
                break;
            }
        }
        let (len, consumed) = decode_varuint32(&len_bytes)?;
        let mut payload = vec![0u8; len as usize];
        self.block_file.read_at(start_offset + consumed as u64, &mut payload)?;
        Ok(payload)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.block_file.flush()?;
        self.index_file.flush()?;
        Ok(())
    }

    /// Streams blocks from a damaged log into a fresh one, stopping at the
    /// first block that fails to decode or breaks chain continuity. `decode`
    /// returns `(block_num, id, previous_id)` for a raw payload; the block
    /// log itself never interprets block bytes (spec.md non-goal).
    pub fn repair_log(
        data_dir: impl AsRef<Path>,
        now_for_backup_name: u64,
        decode: impl Fn(&[u8]) -> std::result::Result<(BlockNum, BlockId, BlockId), String>,
    ) -> Result<RepairReport> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let backup_dir = data_dir.with_file_name(format!(
            "{}-backup-{now_for_backup_name}",
            data_dir.file_name().and_then(|s| s.to_str()).unwrap_or("blocks")
        ));
        if backup_dir.exists() {
            return Err(BlockLogError::BackupDirExists(backup_dir.display().to_string()));
        }
        fs::rename(&data_dir, &backup_dir)?;
        fs::create_dir_all(&data_dir)?;

        let old_block_path = backup_dir.join(BLOCK_FILE_NAME);
        let mut old_reader = fs::File::open(&old_block_path)?;
        let (old_header, header_size) = LogHeader::read(&mut old_reader)?;
        let old_file_len = fs::metadata(&old_block_path)?.len();
        let old_trailer = if old_header.version.is_pruned() { PRUNED_TRAILER_WIDTH } else { 0 };
        let region_end = old_file_len.saturating_sub(old_trailer);

        let mut new_log = BlockLog::open(&data_dir, BlockLogConfig::dense(), old_header.identity.clone())?;
        // The fresh log always starts dense at the recovered first block
        // number, regardless of the source's pruning mode.
        new_log.header.first_block_num = old_header.first_block_num;
        new_log.rewrite_header_in_place_unchecked()?;

        let mut old_block_file = RandomAccessFile::open_or_create(&old_block_path)?;
        let mut pos = header_size;
        let mut expected_num = old_header.first_block_num;
        let mut prior_id: Option<BlockId> = None;
        let mut recovered = 0u32;
        let mut stopped_at = None;
        let mut bad_tail_path = None;

        while pos < region_end {
            let read_result = read_len_prefixed_at(&mut old_block_file, pos, region_end);
            let (payload, entry_len) = match read_result {
                Ok(v) => v,
                Err(_) => {
                    stopped_at = Some(expected_num);
                    bad_tail_path = Some(write_bad_tail(&data_dir, now_for_backup_name, &mut old_block_file, pos, region_end)?);
                    break;
                }
            };

            match decode(&payload) {
                Ok((num, id, previous)) => {
                    let continuity_ok = num == expected_num && prior_id.map(|p| p == previous).unwrap_or(true);
                    if !continuity_ok {
                        stopped_at = Some(expected_num);
                        bad_tail_path = Some(write_bad_tail(&data_dir, now_for_backup_name, &mut old_block_file, pos, region_end)?);
                        break;
                    }
                    new_log.append(num, &payload)?;
                    prior_id = Some(id);
                    expected_num += 1;
                    recovered += 1;
                    pos += entry_len;
                }
                Err(_) => {
                    stopped_at = Some(expected_num);
                    bad_tail_path = Some(write_bad_tail(&data_dir, now_for_backup_name, &mut old_block_file, pos, region_end)?);
                    break;
                }
            }
        }

        new_log.flush()?;
        Ok(RepairReport { blocks_recovered: recovered, stopped_at, bad_tail_path })
    }

    fn rewrite_header_in_place_unchecked(&mut self) -> Result<()> {
        let mut buf = Vec::new();
        let new_size = self.header.write(&mut buf)?;
        self.header_size = new_size;
        self.block_file.truncate(0)?;
        self.block_file.write_at(0, &buf)?;
        Ok(())
    }

    /// Writes a new log containing only `[start, end]`, offsets rebased to
    /// start flush against a fresh header. `chain_id_if_needed` supplies
    /// the chain id when `start > 1` and the source log's identity is a
    /// genesis blob (the extracted range can no longer carry genesis).
    pub fn extract_range(
        &mut self,
        start: BlockNum,
        end: BlockNum,
        dest_dir: impl AsRef<Path>,
        chain_id_if_needed: Option<[u8; 32]>,
    ) -> Result<()> {
        let Some((head, _)) = self.head else { return Err(BlockLogError::Exception("empty log".into())) };
        let start = start.max(self.header.first_block_num);
        let end = end.min(head);
        if start > end {
            return Err(BlockLogError::Exception(format!("empty extraction range [{start}, {end}]")));
        }

        let identity = if start == 1 {
            self.header.identity.clone()
        } else {
            match chain_id_if_needed {
                Some(id) => ChainIdentity::ChainId(id),
                None => match &self.header.identity {
                    ChainIdentity::ChainId(id) => ChainIdentity::ChainId(*id),
                    ChainIdentity::Genesis(_) => {
                        return Err(BlockLogError::Exception(
                            "extracting a sub-range starting after block 1 requires a chain id".into(),
                        ))
                    }
                },
            }
        };

        let mut dest = BlockLog::open(dest_dir, BlockLogConfig::dense(), identity)?;
        dest.header.first_block_num = start;
        dest.rewrite_header_in_place_unchecked()?;

        for n in start..=end {
            let payload = self.read_block_by_num(n)?;
            dest.append(n, &payload)?;
        }
        dest.flush()?;
        Ok(())
    }
}

/// Moves `[src_start, src_start+len)` to `[dst_start, dst_start+len)` within
/// the same file, safe for overlapping ranges in either direction (the
/// standard memmove technique: copy back-to-front when shifting to a higher
/// offset, front-to-back otherwise).
fn relocate_bytes(file: &mut RandomAccessFile, src_start: u64, dst_start: u64, len: u64) -> Result<()> {
    if len == 0 || src_start == dst_start {
        return Ok(());
    }
    let mut buf = vec![0u8; 1 << 20];
    if dst_start > src_start {
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(buf.len() as u64) as usize;
            let src = src_start + remaining - chunk as u64;
            let dst = dst_start + remaining - chunk as u64;
            file.read_at(src, &mut buf[..chunk])?;
            file.write_at(dst, &buf[..chunk])?;
            remaining -= chunk as u64;
        }
    } else {
        let mut moved = 0u64;
        while moved < len {
            let chunk = (len - moved).min(buf.len() as u64) as usize;
            file.read_at(src_start + moved, &mut buf[..chunk])?;
            file.write_at(dst_start + moved, &buf[..chunk])?;
            moved += chunk as u64;
        }
    }
    Ok(())
}

fn read_len_prefixed_at(file: &mut RandomAccessFile, pos: u64, region_end: u64) -> Result<(Vec<u8>, u64)> {
    let mut len_bytes = Vec::with_capacity(5);
    let mut cursor = pos;
    loop {
        if cursor >= region_end {
            return Err(BlockLogError::Exception("truncated length prefix".into()));
        }
        let mut b = [0u8; 1];
        file.read_at(cursor, &mut b)?;
        len_bytes.push(b[0]);
        cursor += 1;
        if b[0] & 0x80 == 0 || len_bytes.len() >= 5 {
            break;
        }
    }
    let (len, consumed) = decode_varuint32(&len_bytes)?;
    let payload_start = pos + consumed as u64;
    let payload_end = payload_start + len as u64;
    let entry_end = payload_end + 8;
    if entry_end > region_end {
        return Err(BlockLogError::Exception("truncated payload or trailing offset".into()));
    }
    let mut payload = vec![0u8; len as usize];
    file.read_at(payload_start, &mut payload)?;
    Ok((payload, entry_end - pos))
}

fn write_bad_tail(data_dir: &Path, now: u64, old_file: &mut RandomAccessFile, from: u64, _to: u64) -> Result<PathBuf> {
    let path = data_dir.join(format!("blocks-bad-tail-{now}.log"));
    let buf = old_file.read_to_end_from(from)?;
    fs::write(&path, &buf)?;
    Ok(path)
}
