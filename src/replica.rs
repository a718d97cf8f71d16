//! Replica (spec §4.3): the public component. Owns a data path, an undo
//! log, a metadata sidecar, and transactional state, and exposes
//! read/write/delete of versioned blocks plus a crash-recovery primitive.
//!
//! Per Design Note 9 ("re-entrant lock → exclusive lock + non-reentrant
//! private helpers"), every public method takes the lock exactly once and
//! delegates to a private `*_locked` helper that already holds
//! `&mut ReplicaInner` — nothing here calls back into a public method
//! while the lock is held.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::backend::BackendFs;
use crate::block::{BlockFlag, BlockMeta, BlockRequest, ReadResult, WriteRequest};
use crate::error::{Error, Result};
use crate::metadata_file::{self, MetaFile};
use crate::undo_log::{self, UndoBlockLog, UndoEventLog, UndoLog};

pub const INCOMPLETE_SUFFIX: &str = "part";

pub fn make_incomplete_path(data_path: &Path) -> PathBuf {
    let mut s = data_path.as_os_str().to_owned();
    s.push(".");
    s.push(INCOMPLETE_SUFFIX);
    PathBuf::from(s)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplicaState {
    Committed,
    InTx,
}

impl ReplicaState {
    fn name(self) -> &'static str {
        match self {
            ReplicaState::Committed => "COMMITTED",
            ReplicaState::InTx => "IN_TX",
        }
    }
}

struct ReplicaInner {
    data_path: PathBuf,
    incomplete_path: PathBuf,
    block_size: u64,
    log: UndoLog,
    meta: MetaFile,
    state: ReplicaState,
    /// Present on disk as either `data_path` (committed) or
    /// `incomplete_path` (mid-transaction).
    file_exists: bool,
    /// Block ids whose pre-transaction snapshot has already been captured
    /// in the undo log during the current transaction (spec §9 open
    /// question, resolved in DESIGN.md: dedupe on id rather than letting
    /// a second write in the same transaction overwrite the true original
    /// with an intermediate value).
    touched_blocks: HashSet<u64>,
}

/// The public replica handle. Generic over the backend so callers pay no
/// dynamic-dispatch cost and the core never depends on a specific
/// backend's error vocabulary (Design Note 9).
pub struct Replica<F: BackendFs> {
    fs: F,
    inner: Mutex<ReplicaInner>,
}

impl<F: BackendFs> Replica<F> {
    /// Opens (or creates the in-memory handle for) the replica at logical
    /// path `path`. State is derived from the backend: `IN_TX` if
    /// `path.part` exists, `COMMITTED` otherwise. Does not itself run
    /// recovery — call `fix_consistency` before transacting against a
    /// freshly opened replica.
    pub fn open(fs: F, path: impl Into<PathBuf>, block_size: u64) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::usage("block_size must be nonzero"));
        }

        let data_path = path.into();
        let incomplete_path = make_incomplete_path(&data_path);

        let log = UndoLog::open(&fs, &data_path)?;
        let meta = MetaFile::open(&fs, &data_path, block_size)?;

        let (file_exists, state) = if fs.exists(&data_path) {
            (true, ReplicaState::Committed)
        } else if fs.exists(&incomplete_path) {
            (true, ReplicaState::InTx)
        } else {
            (false, ReplicaState::Committed)
        };

        log::debug!(
            "opened replica at {:?} (block_size={block_size}, state={:?})",
            data_path,
            state
        );

        Ok(Replica {
            fs,
            inner: Mutex::new(ReplicaInner {
                data_path,
                incomplete_path,
                block_size,
                log,
                meta,
                state,
                file_exists,
                touched_blocks: HashSet::new(),
            }),
        })
    }

    /// Normalizes any on-disk state into `COMMITTED`. Idempotent; safe to
    /// call on every open regardless of the replica's actual state.
    pub fn fix_consistency(&self) -> Result<()> {
        let mut g = self.inner.lock();
        if g.state == ReplicaState::InTx {
            log::info!("fix_consistency: rolling back in-flight transaction at {:?}", g.data_path);
            rollback_locked(&self.fs, &mut g)?;
        } else if g.file_exists {
            g.meta.compact_block_meta(&self.fs, true)?;
            let expected = g.meta.get_data_file_size();
            let stat = self.fs.stat(&g.data_path)?;
            if expected != stat.size {
                log::warn!(
                    "fix_consistency: {:?} size {} disagrees with metadata sum {}, truncating",
                    g.data_path,
                    stat.size,
                    expected
                );
                self.fs.truncate(&g.data_path, expected)?;
            }
        }
        // I4: an undo log surviving next to a committed (or fully absent)
        // replica means the transaction that wrote it already committed
        // before the log was cleared. Always safe to drop.
        g.log.clear(&self.fs)?;
        Ok(())
    }

    pub fn begin_transaction(&self) -> Result<()> {
        let mut g = self.inner.lock();
        require_state(g.state, ReplicaState::Committed, "begin_transaction")?;

        let file_size = if g.file_exists {
            let stat = self.fs.stat(&g.data_path)?;
            self.fs.rename(&g.data_path, &g.incomplete_path)?;
            stat.size
        } else {
            0
        };

        g.log.clear(&self.fs)?;
        g.log.write_event_log(&self.fs, UndoEventLog::Size(file_size), false)?;
        g.touched_blocks.clear();
        g.state = ReplicaState::InTx;
        Ok(())
    }

    pub fn write_data_blocks(&self, requests: Vec<WriteRequest>) -> Result<()> {
        let mut g = self.inner.lock();
        require_state(g.state, ReplicaState::InTx, "write_data_blocks")?;
        validate_writes(&requests, g.block_size)?;
        write_data_blocks_locked(&self.fs, &mut g, requests)
    }

    pub fn read_data_blocks(&self, requests: Vec<BlockRequest>) -> Result<Vec<ReadResult>> {
        let g = self.inner.lock();
        require_state(g.state, ReplicaState::Committed, "read_data_blocks")?;

        let mut results = Vec::with_capacity(requests.len());
        for r in requests {
            let meta = g.meta.read_block_meta(r.id);
            let data = if meta.version == r.version && meta.size > 0 && g.file_exists {
                let offset = block_offset(r.id, g.block_size)?;
                let bytes = self.fs.read(&g.data_path, offset, meta.size as usize)?;
                if bytes.len() != meta.size as usize {
                    return Err(Error::backend_io(
                        "read",
                        g.data_path.clone(),
                        std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!("short read: expected {} bytes, got {}", meta.size, bytes.len()),
                        ),
                    ));
                }
                Some(bytes)
            } else {
                None
            };
            results.push(ReadResult { id: r.id, version: r.version, data });
        }
        Ok(results)
    }

    pub fn delete_data_blocks(&self, requests: Vec<BlockRequest>) -> Result<()> {
        let mut g = self.inner.lock();
        require_state(g.state, ReplicaState::InTx, "delete_data_blocks")?;

        for r in &requests {
            let meta = g.meta.read_block_meta(r.id);
            if meta.version == r.version {
                g.meta.delete_block_meta(&self.fs, r.id, false)?;
            }
        }
        g.meta.sync(&self.fs)?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        let mut g = self.inner.lock();
        require_state(g.state, ReplicaState::InTx, "commit")?;

        g.log.clear(&self.fs)?;
        g.meta.sync(&self.fs)?;
        let file_size = g.meta.get_data_file_size();
        if file_size > 0 {
            self.fs.truncate(&g.incomplete_path, file_size)?;
            self.fs.rename(&g.incomplete_path, &g.data_path)?;
            g.file_exists = true;
        } else if g.file_exists {
            self.fs.unlink(&g.incomplete_path)?;
            g.meta.clear(&self.fs)?;
            g.file_exists = false;
        }
        g.touched_blocks.clear();
        g.state = ReplicaState::Committed;
        log::debug!("committed transaction on {:?} (size={file_size})", g.data_path);
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        let mut g = self.inner.lock();
        require_state(g.state, ReplicaState::InTx, "rollback")?;
        rollback_locked(&self.fs, &mut g)
    }

    /// Renames data, meta, and undo-log files together. Fails atomically
    /// (moves none) if any of the three destinations already exists.
    pub fn rename(&self, new_path: impl Into<PathBuf>) -> Result<()> {
        let mut g = self.inner.lock();
        require_state(g.state, ReplicaState::Committed, "rename")?;

        let new_path = new_path.into();
        let new_meta_path = metadata_file::make_meta_path(&new_path);
        let new_log_path = undo_log::make_log_path(&new_path);

        if self.fs.exists(&new_path) {
            return Err(Error::name_conflict(new_path));
        }
        if self.fs.exists(&new_meta_path) {
            return Err(Error::name_conflict(new_meta_path));
        }
        if self.fs.exists(&new_log_path) {
            return Err(Error::name_conflict(new_log_path));
        }

        if let Some(parent) = new_path.parent() {
            self.fs.make_dirs(parent)?;
        }

        if g.file_exists {
            self.fs.rename(&g.data_path, &new_path)?;
        }
        g.meta.rename(&self.fs, &new_path)?;
        g.log.rename(&self.fs, &new_path)?;

        g.incomplete_path = make_incomplete_path(&new_path);
        g.data_path = new_path;
        Ok(())
    }

    pub fn get_data_file_size(&self) -> Result<u64> {
        let g = self.inner.lock();
        require_state(g.state, ReplicaState::Committed, "get_data_file_size")?;
        Ok(g.meta.get_data_file_size())
    }

    pub fn get_data_block_len(&self) -> Result<usize> {
        let g = self.inner.lock();
        require_state(g.state, ReplicaState::Committed, "get_data_block_len")?;
        Ok(g.meta.get_block_meta_len())
    }

    #[cfg(test)]
    pub(crate) fn data_path_for_testing(&self) -> PathBuf {
        self.inner.lock().data_path.clone()
    }
}

fn require_state(actual: ReplicaState, expected: ReplicaState, op: &'static str) -> Result<()> {
    if actual != expected {
        return Err(Error::state_violation(op, expected.name(), actual.name()));
    }
    Ok(())
}

fn block_offset(id: u64, block_size: u64) -> Result<u64> {
    id.checked_mul(block_size)
        .ok_or_else(|| Error::usage(format!("block id {id} overflows at block_size {block_size}")))
}

fn validate_writes(requests: &[WriteRequest], block_size: u64) -> Result<()> {
    for r in requests {
        if r.data.is_empty() {
            return Err(Error::usage(format!("write_data_blocks: block {} has empty data", r.id)));
        }
        if r.data.len() as u64 > block_size {
            return Err(Error::usage(format!(
                "write_data_blocks: block {} has {} bytes, exceeds block_size {}",
                r.id,
                r.data.len(),
                block_size
            )));
        }
        if r.version == 0 {
            return Err(Error::usage(format!(
                "write_data_blocks: block {} requested with reserved version 0",
                r.id
            )));
        }
    }
    Ok(())
}

fn write_data_blocks_locked<F: BackendFs>(fs: &F, g: &mut ReplicaInner, requests: Vec<WriteRequest>) -> Result<()> {
    if !g.file_exists {
        if let Some(parent) = g.data_path.parent() {
            fs.make_dirs(parent)?;
        }
    }

    let mut captured_any = false;
    for r in &requests {
        if g.touched_blocks.contains(&r.id) {
            continue;
        }
        let old_meta = g.meta.read_block_meta(r.id);
        let old_bytes = if old_meta.size > 0 {
            let offset = block_offset(r.id, g.block_size)?;
            let bytes = fs.read(&g.incomplete_path, offset, old_meta.size as usize)?;
            if bytes.len() != old_meta.size as usize {
                return Err(Error::backend_io(
                    "read",
                    g.incomplete_path.clone(),
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!(
                            "short read capturing undo for block {}: expected {} bytes, got {}",
                            r.id,
                            old_meta.size,
                            bytes.len()
                        ),
                    ),
                ));
            }
            bytes
        } else {
            Vec::new()
        };
        g.log.write_block_log(
            fs,
            UndoBlockLog { id: r.id, data: old_bytes, version: old_meta.version, size: old_meta.size },
            false,
        )?;
        let ref_meta = BlockMeta { flag: BlockFlag::RefLog, version: old_meta.version, size: old_meta.size };
        g.meta.write_block_meta(fs, r.id, ref_meta, false)?;
        g.touched_blocks.insert(r.id);
        captured_any = true;
    }
    if captured_any {
        g.log.sync(fs)?;
        g.meta.sync(fs)?;
    }

    for r in &requests {
        let offset = block_offset(r.id, g.block_size)?;
        fs.write(&g.incomplete_path, offset, &r.data)?;
        g.file_exists = true;
    }

    for r in requests {
        let new_meta = BlockMeta { flag: BlockFlag::DataIn, version: r.version, size: r.data.len() as u32 };
        g.meta.write_block_meta(fs, r.id, new_meta, false)?;
    }
    g.meta.sync(fs)?;
    Ok(())
}

fn rollback_locked<F: BackendFs>(fs: &F, g: &mut ReplicaInner) -> Result<()> {
    let block_logs: Vec<UndoBlockLog> = g.log.block_logs().to_vec();
    for bl in &block_logs {
        if !bl.data.is_empty() {
            let offset = block_offset(bl.id, g.block_size)?;
            fs.write(&g.incomplete_path, offset, &bl.data)?;
        }
        let flag = if bl.data.is_empty() { BlockFlag::Empty } else { BlockFlag::DataIn };
        let restored = BlockMeta { flag, version: bl.version, size: bl.size };
        g.meta.write_block_meta(fs, bl.id, restored, false)?;
    }

    let mut new_file_size = 0u64;
    for ev in g.log.event_logs() {
        let UndoEventLog::Size(size) = ev;
        new_file_size = *size;
    }

    if g.file_exists {
        if new_file_size > 0 {
            fs.truncate(&g.incomplete_path, new_file_size)?;
        } else {
            fs.unlink(&g.incomplete_path)?;
            g.meta.clear(fs)?;
            g.file_exists = false;
        }
    }

    g.meta.sync(fs)?;
    g.log.clear(fs)?;

    if g.file_exists {
        fs.rename(&g.incomplete_path, &g.data_path)?;
    }

    g.touched_blocks.clear();
    g.state = ReplicaState::Committed;
    Ok(())
}
