//! Wire protocol for Freighter file transfers.
//!
//! Both ends of a transfer exchange JSON messages over an opaque,
//! message-oriented transport. Every message carries an integer `command`
//! code and a `taskid` scoping it to one transfer on a shared connection.
//! Chunk payloads are base64-encoded inside the JSON body.
//!
//! Decoding is a single schema-checked step: [`decode`] parses the envelope,
//! resolves the command, deserializes the typed payload, and validates range
//! invariants. Handlers never re-validate individual fields.

mod commands;
mod messages;

pub use commands::Command;
pub use messages::{
    ChunkAck, ChunkData, ChunkEntry, Inbound, Offer, OfferAck, Signal, decode,
};

/// Errors produced while encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message has no command field")]
    MissingCommand,

    #[error("unknown command code: {0}")]
    UnknownCommand(u64),

    #[error("invalid byte range: [{left}, {right}]")]
    InvalidRange { left: u64, right: u64 },

    #[error("chunk size must be at least 1 byte")]
    ZeroChunkSize,

    #[error("chunk payload shorter than declared: declared {declared}, got {actual}")]
    TruncatedPayload { declared: u64, actual: u64 },
}
