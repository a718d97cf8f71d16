//! A crash-consistent, versioned block replication engine over a pluggable
//! backend filesystem.
//!
//! A [`Replica`] owns a logical data path on a [`BackendFs`]. Writes happen
//! inside a transaction (`begin_transaction` / `write_data_blocks` /
//! `delete_data_blocks` / `commit` or `rollback`); reads happen outside one.
//! `fix_consistency` is the crash-recovery entry point: call it once after
//! `open` before transacting, and it normalizes whatever the backend was
//! left in (mid-transaction or stale-log-but-committed) back to a clean
//! `COMMITTED` state.
//!
//! See `DESIGN.md` for the wire formats and the resolutions to this
//! engine's open design questions.

pub mod backend;
pub mod block;
pub mod error;
pub mod metadata_file;
pub mod replica;
pub mod undo_log;

pub use backend::{BackendFs, FileStat, LocalFsBackend};
pub use block::{BlockFlag, BlockMeta, BlockRequest, ReadResult, WriteRequest};
pub use error::{Error, Result};
pub use replica::Replica;
