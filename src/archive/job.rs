//! The archive job: move stale conversations' messages into cold storage.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Months, Utc};
use futures::stream::TryStreamExt;
use sqlx::SqlitePool;
use tokio::time::sleep;
use tokio_util::io::StreamReader;
use tracing::{error, info, warn};

use super::codec::encode_lines;
use super::error::ArchiveError;
use super::paginator::message_stream;
use super::store::ObjectStore;
use super::{ARCHIVE_BUCKET, FLIP_BACKOFF, MAX_FLIP_ATTEMPTS, archive_object_name};
use crate::conversation::ConversationRepository;

/// Staleness threshold parsed from the operator-supplied `"<n> MONTHS"` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveThreshold {
    months: u32,
}

impl ArchiveThreshold {
    pub fn months(&self) -> u32 {
        self.months
    }

    /// Cutoff instant: conversations last updated before this are stale.
    pub fn cutoff_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_months(Months::new(self.months))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl FromStr for ArchiveThreshold {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let digits = value
            .strip_suffix(" MONTHS")
            .ok_or_else(|| anyhow::anyhow!("threshold must look like \"6 MONTHS\", got {value:?}"))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            anyhow::bail!("threshold must look like \"6 MONTHS\", got {value:?}");
        }
        let months = digits
            .parse::<u32>()
            .map_err(|err| anyhow::anyhow!("threshold months out of range: {err}"))?;
        Ok(Self { months })
    }
}

/// Counts from one archive run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveRunSummary {
    pub archived: usize,
    pub failed: usize,
}

/// One-shot job that archives every stale conversation.
pub struct ArchiveJob {
    pool: SqlitePool,
    store: Arc<dyn ObjectStore>,
    threshold: ArchiveThreshold,
    page_size: i64,
}

impl ArchiveJob {
    pub fn new(
        pool: SqlitePool,
        store: Arc<dyn ObjectStore>,
        threshold: ArchiveThreshold,
        page_size: i64,
    ) -> Self {
        Self {
            pool,
            store,
            threshold,
            page_size,
        }
    }

    /// Archive all stale conversations. A failure on one conversation is
    /// logged and does not stop the rest of the run.
    pub async fn run(&self) -> Result<ArchiveRunSummary, ArchiveError> {
        self.store.ensure_bucket(ARCHIVE_BUCKET).await?;

        let cutoff = self.threshold.cutoff_from(Utc::now()).to_rfc3339();
        let repo = ConversationRepository::new(self.pool.clone());
        let candidates = repo
            .stale_conversation_ids(&cutoff)
            .await
            .map_err(|err| ArchiveError::Db(sqlx::Error::Protocol(err.to_string())))?;

        if candidates.is_empty() {
            info!(%cutoff, "no conversations to archive");
            return Ok(ArchiveRunSummary::default());
        }

        info!(%cutoff, candidates = candidates.len(), "archive run starting");
        let mut summary = ArchiveRunSummary::default();
        for conversation_id in candidates {
            match self.archive_one(&conversation_id).await {
                Ok(messages) => {
                    info!(conversation_id, messages, "conversation archived");
                    summary.archived += 1;
                }
                Err(err) => {
                    error!(conversation_id, %err, "archiving conversation failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Archive one conversation: stream its rows into the object store, then
    /// retire the rows and set the archived flag. Returns the message count.
    async fn archive_one(&self, conversation_id: &str) -> Result<u64, ArchiveError> {
        let written = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&written);

        let messages = message_stream(
            self.pool.clone(),
            conversation_id.to_string(),
            self.page_size,
        )
        .inspect_ok(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        let lines = encode_lines(messages).map_err(std::io::Error::other);
        let mut reader = StreamReader::new(Box::pin(lines));
        self.store
            .put_stream(ARCHIVE_BUCKET, &archive_object_name(conversation_id), &mut reader)
            .await?;

        self.retire_messages(conversation_id).await;
        Ok(written.load(Ordering::Relaxed))
    }

    /// Delete the archived rows and set the flag, atomically, with bounded
    /// retries. The object is already durable, so exhausted retries leave the
    /// conversation unarchived for the next run rather than failing the job.
    async fn retire_messages(&self, conversation_id: &str) {
        for attempt in 1..=MAX_FLIP_ATTEMPTS {
            let result = async {
                let mut tx = self.pool.begin().await?;
                sqlx::query("DELETE FROM conversation_messages WHERE conversation_id = ?")
                    .bind(conversation_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("UPDATE conversations SET archived = TRUE WHERE id = ?")
                    .bind(conversation_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await
            }
            .await;

            match result {
                Ok(()) => return,
                Err(err) if attempt == MAX_FLIP_ATTEMPTS => {
                    error!(
                        conversation_id,
                        attempt, %err,
                        "giving up on retiring archived messages"
                    );
                }
                Err(err) => {
                    warn!(conversation_id, attempt, %err, "retiring messages failed, retrying");
                    sleep(FLIP_BACKOFF * attempt).await;
                }
            }
        }
    }
}
