//! Backend FS contract (spec §4.4) and a local-POSIX reference implementation.
//!
//! The engine treats the backend as a minimal byte-addressable file store.
//! It never assumes atomicity across operations, only that a single
//! `write`/`rename`/`unlink`/`truncate` call is durable once it returns.
//! The per-backend drivers this is eventually layered under (iRODS, FTP,
//! S3, Dropbox) are out of scope for this crate; `LocalFsBackend` exists so
//! the engine has something real to run its own tests against.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Metadata about a path on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
}

/// Minimal capability trait modeling a remote or local byte-addressable
/// file store. Implementors need not provide atomicity across operations,
/// but every individual call must be durable once it returns successfully.
pub trait BackendFs: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn stat(&self, path: &Path) -> Result<FileStat>;

    /// Read up to `len` bytes starting at `offset`. A short read (file
    /// shorter than `offset + len`) is acceptable backend behavior; the
    /// core treats a read that returns fewer bytes than requested as a
    /// backend failure, since it only ever reads exactly `meta.size` bytes
    /// per block.
    fn read(&self, path: &Path, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Durable, single-call write of `buf` at `offset`. May extend the
    /// file. The core always writes contiguously from offset 0 upward, so
    /// sparse-write support is not required of implementors.
    fn write(&self, path: &Path, offset: u64, buf: &[u8]) -> Result<()>;

    /// Truncate (or zero-extend) the file at `path` to exactly `size`
    /// bytes. Backends that cannot implement this (FTP, S3) are only
    /// suitable for replicas that never shrink.
    fn truncate(&self, path: &Path, size: u64) -> Result<()>;

    /// Rename `from` to `to`. The core always renames into a destination
    /// it has first verified absent, except the final `.part` -> data-path
    /// rename on commit, where a pre-existing destination indicates an I1
    /// violation and is a fatal bug rather than a recoverable error.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    fn unlink(&self, path: &Path) -> Result<()>;

    fn make_dirs(&self, path: &Path) -> Result<()>;
}

/// Reference `BackendFs` over the local filesystem, used by this crate's
/// own tests and by `demos/persist_demo.rs`. Not one of the per-backend
/// drivers (iRODS/FTP/S3/Dropbox) the real driver ships with — those stay
/// out of scope.
pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl BackendFs for LocalFsBackend {
    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    fn stat(&self, path: &Path) -> Result<FileStat> {
        let full = self.resolve(path);
        let meta = std::fs::metadata(&full).map_err(|e| Error::backend_io("stat", full, e))?;
        Ok(FileStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    fn read(&self, path: &Path, offset: u64, len: usize) -> Result<Vec<u8>> {
        use std::io::{Read, Seek, SeekFrom};

        let full = self.resolve(path);
        let mut file = std::fs::File::open(&full).map_err(|e| Error::backend_io("read", full.clone(), e))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::backend_io("read", full.clone(), e))?;
        let mut buf = vec![0u8; len];
        let mut filled = 0usize;
        loop {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => return Err(Error::backend_io("read", full, e)),
            }
            if filled == len {
                break;
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn write(&self, path: &Path, offset: u64, buf: &[u8]) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};

        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::backend_io("write", full.clone(), e))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&full)
            .map_err(|e| Error::backend_io("write", full.clone(), e))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::backend_io("write", full.clone(), e))?;
        file.write_all(buf).map_err(|e| Error::backend_io("write", full.clone(), e))?;
        file.sync_all().map_err(|e| Error::backend_io("write", full, e))?;
        Ok(())
    }

    fn truncate(&self, path: &Path, size: u64) -> Result<()> {
        let full = self.resolve(path);
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&full)
            .map_err(|e| Error::backend_io("truncate", full.clone(), e))?;
        file.set_len(size).map_err(|e| Error::backend_io("truncate", full.clone(), e))?;
        file.sync_all().map_err(|e| Error::backend_io("truncate", full, e))?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let full_from = self.resolve(from);
        let full_to = self.resolve(to);
        std::fs::rename(&full_from, &full_to).map_err(|e| Error::backend_io("rename", full_from, e))?;
        Ok(())
    }

    fn unlink(&self, path: &Path) -> Result<()> {
        let full = self.resolve(path);
        std::fs::remove_file(&full).map_err(|e| Error::backend_io("unlink", full, e))
    }

    fn make_dirs(&self, path: &Path) -> Result<()> {
        let full = self.resolve(path);
        std::fs::create_dir_all(&full).map_err(|e| Error::backend_io("make_dirs", full, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path());
        let path = Path::new("a/b/file.bin");
        backend.write(path, 0, b"hello").unwrap();
        let data = backend.read(path, 0, 5).unwrap();
        assert_eq!(data, b"hello");
        assert!(backend.exists(path));
        assert_eq!(backend.stat(path).unwrap().size, 5);
    }

    #[test]
    fn rename_then_unlink() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path());
        let a = Path::new("a.bin");
        let b = Path::new("b.bin");
        backend.write(a, 0, b"x").unwrap();
        backend.rename(a, b).unwrap();
        assert!(!backend.exists(a));
        assert!(backend.exists(b));
        backend.unlink(b).unwrap();
        assert!(!backend.exists(b));
    }

    #[test]
    fn truncate_shrinks_file() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path());
        let path = Path::new("f.bin");
        backend.write(path, 0, b"0123456789").unwrap();
        backend.truncate(path, 4).unwrap();
        assert_eq!(backend.stat(path).unwrap().size, 4);
    }
}
