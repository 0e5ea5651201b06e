//! Resumable chunked file transfer over a message-oriented transport.
//!
//! A [`SenderTask`] offers a file; a [`ReceiverTask`] accepts chunks, writes
//! them at their byte offsets, and keeps two sidecar files next to the
//! destination (the merged chunk map and a periodic hash checkpoint) so an
//! interrupted transfer resumes from durable state instead of restarting.
//! Verification is an incremental MD5 fed in the background while chunks
//! arrive, finalized once coverage is complete.

mod checkpoint;
mod fsio;
mod range;
mod receiver;
mod sender;
mod task;

pub use checkpoint::{CHECK_SUFFIX, CHUNK_SUFFIX, CheckpointStore};
pub use fsio::{FileHandle, Filesystem, StdFilesystem};
pub use range::{
    ByteRange, complement, covered_bytes, entries_to_ranges, is_fully_covered, merge,
    progress_percent, ranges_to_entries,
};
pub use receiver::ReceiverTask;
pub use sender::SenderTask;
pub use task::{EventListener, TaskEvent, TaskStatus, Transport};

use freighter_protocol::ProtocolError;

/// A receiver suggests chunks of one tenth of the file.
pub const RECEIVER_CHUNK_DIVISOR: u64 = 10;

/// A sender's own estimate before the receiver's suggestion arrives.
pub const SENDER_CHUNK_DIVISOR: u64 = 20;

/// Upper bound on a single hashing read: 5 MiB.
pub const HASH_READ_STEP: u64 = 5 * 1024 * 1024;

/// Minimum progress advance, in percentage points, between two persisted
/// hash checkpoints.
pub const CHECKPOINT_PROGRESS_STEP: u32 = 20;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("short write: expected {expected} bytes, wrote {written}")]
    ShortWrite { expected: u64, written: u64 },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("peer reported a terminal failure")]
    PeerError,

    #[error("transport refused to send")]
    SendFailed,

    #[error("message arrived before negotiation completed")]
    NotNegotiated,

    #[error("peer signalled finish before coverage was complete")]
    PrematureFinish,
}
