//! Incremental MD5 for checkpointable transfers.
//!
//! The transfer engine persists mid-stream hash state to disk so a crashed
//! or paused transfer can resume without re-hashing the whole file. That
//! requires a digest whose exact internal state (state words, byte count,
//! trailing partial block) can be snapshotted and restored, which is why
//! the block engine lives here rather than behind a registry digest crate.
//!
//! [`Md5`] is the synchronous engine. [`HashPool`] plus [`AsyncMd5`]
//! offload update work to a small shared worker pool so hashing never
//! blocks protocol message handling; per-hasher updates stay strictly FIFO
//! with at most one in flight.

mod md5;
mod worker;

pub use md5::{Md5, Md5Snapshot, file_md5, md5_hex};
pub use worker::{AsyncMd5, HashPool};
