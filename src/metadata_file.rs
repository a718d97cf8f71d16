//! Metadata sidecar (spec §4.2, §6): the only authoritative description of
//! which block_ids are live, their versions, and their physical sizes. The
//! data file alone is not self-describing.
//!
//! Wire format (little-endian):
//!
//! ```text
//! u64 block_size               (see DESIGN.md: resolves the spec's open
//!                                question about rejecting a reopen with a
//!                                mismatched block_size)
//! u32 count
//! count * { u8 flag, i64 version, u32 size }
//! ```
//!
//! flag: 0 = EMPTY, 1 = DATAIN, 2 = REF_LOG. Version 0 is reserved.

use std::path::{Path, PathBuf};

use crate::backend::BackendFs;
use crate::block::{BlockFlag, BlockMeta};
use crate::error::{Error, Result};

pub const META_FILE_SUFFIX: &str = "meta";

pub fn make_meta_path(data_path: &Path) -> PathBuf {
    let mut s = data_path.as_os_str().to_owned();
    s.push(".");
    s.push(META_FILE_SUFFIX);
    PathBuf::from(s)
}

pub fn is_meta_path(path: &Path) -> bool {
    path.extension().map(|ext| ext == META_FILE_SUFFIX).unwrap_or(false)
}

/// In-memory + on-disk block metadata sequence for a single replica.
pub struct MetaFile {
    data_path: PathBuf,
    meta_path: PathBuf,
    block_size: u64,
    blocks: Vec<BlockMeta>,
    synced: bool,
    file_exists: bool,
}

impl MetaFile {
    /// Opens the sidecar if present. If the sidecar exists and its stored
    /// `block_size` disagrees with `block_size`, this is a usage error: the
    /// caller opened a replica written with a different block size than it
    /// is now using (spec §9 open question, resolved in DESIGN.md).
    pub fn open(fs: &dyn BackendFs, data_path: &Path, block_size: u64) -> Result<Self> {
        let meta_path = make_meta_path(data_path);
        let mut meta = MetaFile {
            data_path: data_path.to_path_buf(),
            meta_path: meta_path.clone(),
            block_size,
            blocks: Vec::new(),
            synced: true,
            file_exists: false,
        };

        if fs.exists(&meta_path) {
            let stat = fs.stat(&meta_path)?;
            let buf = fs.read(&meta_path, 0, stat.size as usize)?;
            let (stored_block_size, blocks) = deserialize(&buf)
                .map_err(|reason| Error::corrupt_meta(meta_path.clone(), reason))?;
            if stored_block_size != block_size {
                return Err(Error::usage(format!(
                    "replica at {:?} was written with block_size {} but opened with {}",
                    data_path, stored_block_size, block_size
                )));
            }
            meta.blocks = blocks;
            meta.file_exists = true;
        }

        Ok(meta)
    }

    pub fn write_block_meta(&mut self, fs: &dyn BackendFs, id: u64, value: BlockMeta, sync_now: bool) -> Result<()> {
        let idx = id as usize;
        if self.blocks.len() <= idx {
            self.blocks.resize(idx + 1, BlockMeta::EMPTY);
        }
        self.blocks[idx] = value;
        self.synced = false;
        self.compact_block_meta(fs, sync_now)
    }

    pub fn delete_block_meta(&mut self, fs: &dyn BackendFs, id: u64, sync_now: bool) -> Result<()> {
        let idx = id as usize;
        if idx < self.blocks.len() {
            self.blocks[idx] = BlockMeta::EMPTY;
            self.synced = false;
        }
        self.compact_block_meta(fs, sync_now)
    }

    /// Trims trailing EMPTY slots so the last entry (if any) is non-EMPTY
    /// (spec I2, P6). Internal holes are preserved, never trimmed.
    pub fn compact_block_meta(&mut self, fs: &dyn BackendFs, sync_now: bool) -> Result<()> {
        let cut_to = self
            .blocks
            .iter()
            .rposition(|b| !b.is_empty())
            .map(|i| i + 1)
            .unwrap_or(0);
        if cut_to != self.blocks.len() {
            self.blocks.truncate(cut_to);
            self.synced = false;
        }
        if sync_now {
            self.sync(fs)?;
        }
        Ok(())
    }

    pub fn get_block_meta_len(&self) -> usize {
        self.blocks.len()
    }

    /// An id beyond the current length returns EMPTY; this is never an
    /// error (spec §4.2 edge-case policy).
    pub fn read_block_meta(&self, id: u64) -> BlockMeta {
        self.blocks.get(id as usize).copied().unwrap_or(BlockMeta::EMPTY)
    }

    /// Sum of every slot's size, including holes (which contribute 0).
    pub fn get_data_file_size(&self) -> u64 {
        self.blocks.iter().map(|b| b.size as u64).sum()
    }

    pub fn sync(&mut self, fs: &dyn BackendFs) -> Result<()> {
        if self.synced {
            return Ok(());
        }
        let buf = serialize(self.block_size, &self.blocks);
        fs.write(&self.meta_path, 0, &buf)?;
        self.synced = true;
        self.file_exists = true;
        Ok(())
    }

    pub fn clear(&mut self, fs: &dyn BackendFs) -> Result<()> {
        if self.file_exists {
            fs.unlink(&self.meta_path)?;
        }
        self.blocks.clear();
        self.synced = true;
        self.file_exists = false;
        Ok(())
    }

    pub fn rename(&mut self, fs: &dyn BackendFs, new_data_path: &Path) -> Result<()> {
        let new_meta_path = make_meta_path(new_data_path);
        if fs.exists(&new_meta_path) {
            return Err(Error::name_conflict(new_meta_path));
        }
        if self.file_exists {
            fs.rename(&self.meta_path, &new_meta_path)?;
        }
        self.data_path = new_data_path.to_path_buf();
        self.meta_path = new_meta_path;
        Ok(())
    }

    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    #[allow(dead_code)]
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }
}

fn serialize(block_size: u64, blocks: &[BlockMeta]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12 + blocks.len() * 13);
    buf.extend_from_slice(&block_size.to_le_bytes());
    buf.extend_from_slice(&(blocks.len() as u32).to_le_bytes());
    for b in blocks {
        buf.push(b.flag.to_wire());
        buf.extend_from_slice(&b.version.to_le_bytes());
        buf.extend_from_slice(&b.size.to_le_bytes());
    }
    buf
}

fn deserialize(buf: &[u8]) -> std::result::Result<(u64, Vec<BlockMeta>), String> {
    if buf.len() < 12 {
        return Err(format!("metadata frame too short: {} bytes", buf.len()));
    }
    let block_size = u64::from_le_bytes(buf[0..8].try_into().unwrap());
    let count = u32::from_le_bytes(buf[8..12].try_into().unwrap());

    let mut pos = 12usize;
    let mut blocks = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if buf.len() < pos + 13 {
            return Err(format!("truncated metadata record at offset {pos}"));
        }
        let flag_byte = buf[pos];
        let version = i64::from_le_bytes(buf[pos + 1..pos + 9].try_into().unwrap());
        let size = u32::from_le_bytes(buf[pos + 9..pos + 13].try_into().unwrap());
        pos += 13;

        let flag = BlockFlag::from_wire(flag_byte)
            .ok_or_else(|| format!("unknown block flag tag {flag_byte}"))?;
        blocks.push(BlockMeta { flag, version, size });
    }

    if pos != buf.len() {
        return Err(format!("{} trailing bytes after metadata frame", buf.len() - pos));
    }

    Ok((block_size, blocks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_serialize_deserialize() {
        let blocks = vec![
            BlockMeta { flag: BlockFlag::DataIn, version: 1, size: 4 },
            BlockMeta::EMPTY,
            BlockMeta { flag: BlockFlag::RefLog, version: 2, size: 2 },
        ];
        let buf = serialize(4096, &blocks);
        let (bs, b2) = deserialize(&buf).unwrap();
        assert_eq!(bs, 4096);
        assert_eq!(b2, blocks);
    }

    #[test]
    fn rejects_unknown_flag() {
        let mut buf = serialize(4, &[BlockMeta::EMPTY]);
        buf[12] = 9; // corrupt the flag byte
        assert!(deserialize(&buf).is_err());
    }

    #[test]
    fn compact_trims_trailing_empty_but_keeps_internal_holes() {
        use crate::backend::LocalFsBackend;
        let tmp = tempfile::tempdir().unwrap();
        let fs = LocalFsBackend::new(tmp.path());
        let mut meta = MetaFile::open(&fs, Path::new("r"), 4).unwrap();
        meta.write_block_meta(&fs, 0, BlockMeta { flag: BlockFlag::DataIn, version: 1, size: 4 }, false).unwrap();
        meta.write_block_meta(&fs, 3, BlockMeta { flag: BlockFlag::DataIn, version: 1, size: 1 }, false).unwrap();
        assert_eq!(meta.get_block_meta_len(), 4);
        assert!(meta.read_block_meta(1).is_empty());
        assert!(meta.read_block_meta(2).is_empty());
        meta.delete_block_meta(&fs, 3, true).unwrap();
        assert_eq!(meta.get_block_meta_len(), 1);
    }

    #[test]
    fn read_beyond_length_is_empty_not_error() {
        use crate::backend::LocalFsBackend;
        let tmp = tempfile::tempdir().unwrap();
        let fs = LocalFsBackend::new(tmp.path());
        let meta = MetaFile::open(&fs, Path::new("r"), 4).unwrap();
        assert_eq!(meta.read_block_meta(999), BlockMeta::EMPTY);
    }
}
