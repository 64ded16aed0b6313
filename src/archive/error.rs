//! Archive pipeline error types.

use thiserror::Error;

use super::store::StorageError;

/// Errors that abort an archival or rehydration pipeline.
///
/// Apart from the terminal flag update (which is retried and then swallowed by
/// its caller), every stage propagates the first error it sees and the whole
/// pipeline stops pulling.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Relational store operation failed.
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    /// Object store operation failed.
    #[error("object storage error: {0}")]
    Storage(#[from] StorageError),

    /// A record could not be serialized to an archive line.
    #[error("encoding message record: {0}")]
    Encode(#[source] serde_json::Error),

    /// A line in an archived object could not be parsed. Fail-fast: the
    /// decode stream terminates, there is no skip-and-continue.
    #[error("malformed archive line: {0}")]
    Decode(#[source] serde_json::Error),

    /// I/O error while reading an archived object.
    #[error("archive stream i/o: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP response consumer went away mid-stream.
    #[error("response channel closed by consumer")]
    ResponseClosed,
}
