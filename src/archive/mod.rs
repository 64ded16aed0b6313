//! Conversation cold storage.
//!
//! The archive job relocates the message rows of stale conversations into the
//! object store as a newline-delimited stream; the read path restores them on
//! demand while streaming the records to the requesting client. Every stage is
//! pull-based, so neither direction ever buffers a whole conversation.

mod batcher;
mod codec;
mod error;
mod export;
mod job;
mod paginator;
mod rehydrate;
mod store;

pub use batcher::Batcher;
pub use codec::{decode_lines, encode_lines};
pub use error::ArchiveError;
pub use export::{HtmlBuilder, export_conversation};
pub use job::{ArchiveJob, ArchiveRunSummary, ArchiveThreshold};
pub use paginator::{message_pages, message_stream};
pub use rehydrate::{BodySender, RehydrationOutcome, rehydrate_conversation};
pub use store::{FsObjectStore, MemoryObjectStore, ObjectReader, ObjectStore, StorageError, StorageResult};

use std::time::Duration;

/// Bucket holding line-delimited message archives.
pub const ARCHIVE_BUCKET: &str = "conversation-message-archives";

/// Bucket holding rendered HTML exports.
pub const EXPORT_BUCKET: &str = "conversation-exports";

/// Cursor page size used by the archive job.
pub const ARCHIVE_PAGE_SIZE: i64 = 8;

/// Cursor page size used by the HTML export (independent of the archive path).
pub const EXPORT_PAGE_SIZE: i64 = 2;

/// Insert batch size used during rehydration.
pub const REHYDRATE_BATCH_SIZE: usize = 2;

/// Attempts allowed for the terminal archived-flag update.
pub const MAX_FLIP_ATTEMPTS: u32 = 3;

/// Base backoff between flag-update attempts; attempt `n` waits `n` times this.
pub const FLIP_BACKOFF: Duration = Duration::from_millis(250);

/// Object name of a conversation's message archive.
pub fn archive_object_name(conversation_id: &str) -> String {
    format!("{conversation_id}_messages")
}

/// Object name of a conversation's HTML export.
pub fn export_object_name(conversation_id: &str) -> String {
    format!("{conversation_id}_export.html")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_names_are_deterministic() {
        assert_eq!(archive_object_name("thread_abc"), "thread_abc_messages");
        assert_eq!(export_object_name("thread_abc"), "thread_abc_export.html");
    }
}
