//! Rehydration: restore archived message rows while streaming them out.
//!
//! The archived object is decoded batch by batch. Each batch is inserted into
//! the database (inside one transaction spanning the whole conversation) and
//! simultaneously framed as a slice of a JSON array pushed to the HTTP
//! response channel. After the final batch the conversation's archived flag is
//! cleared, with bounded retries; a flag that cannot be cleared is logged and
//! swallowed so the already streamed response stays valid.

use bytes::Bytes;
use futures::stream::StreamExt;
use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use super::batcher::Batcher;
use super::codec::decode_lines;
use super::error::ArchiveError;
use super::store::ObjectReader;
use super::{FLIP_BACKOFF, MAX_FLIP_ATTEMPTS};
use crate::conversation::ConversationMessage;

/// Sender half of the response body channel fed during rehydration.
pub type BodySender = mpsc::Sender<Result<Bytes, std::io::Error>>;

/// What a completed rehydration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RehydrationOutcome {
    /// Message records streamed to the client.
    pub messages: usize,
    /// Insert batches executed.
    pub batches: usize,
    /// Whether the archived flag was successfully cleared.
    pub flag_flipped: bool,
}

/// Restore a conversation's messages from an archived object.
///
/// Streams each record to `body` as it is re-inserted. The caller frames the
/// surrounding `[` and `]`; this function emits only the comma-joined record
/// slices between them. Holding the insert transaction open while the response
/// streams is a deliberate trade-off: a mid-stream failure rolls everything
/// back instead of leaving a half-restored conversation.
pub async fn rehydrate_conversation(
    pool: &SqlitePool,
    archive: ObjectReader,
    conversation_id: &str,
    batch_size: usize,
    body: &BodySender,
) -> Result<RehydrationOutcome, ArchiveError> {
    let records = decode_lines::<ConversationMessage, _>(archive);
    let mut batches = Batcher::new(records, batch_size);

    let mut tx = pool.begin().await?;
    let mut outcome = RehydrationOutcome {
        messages: 0,
        batches: 0,
        flag_flipped: false,
    };
    let mut first = true;

    while let Some(batch) = batches.next().await {
        let batch = batch?;
        insert_batch(&mut tx, &batch).await?;

        let frame = frame_batch(&batch, first)?;
        body.send(Ok(frame))
            .await
            .map_err(|_| ArchiveError::ResponseClosed)?;

        outcome.messages += batch.len();
        outcome.batches += 1;
        first = false;
    }

    outcome.flag_flipped = flip_archived(&mut tx, conversation_id).await;
    tx.commit().await?;

    debug!(
        conversation_id,
        messages = outcome.messages,
        batches = outcome.batches,
        "conversation rehydrated"
    );
    Ok(outcome)
}

/// Bulk insert a batch, skipping rows whose ids already exist. Preserved ids
/// make a re-run after a crashed response idempotent. Only true id duplicates
/// are skipped: a row colliding on (conversation_id, sequence_number) under a
/// different id is a real inconsistency and fails the insert rather than
/// being dropped silently.
async fn insert_batch(
    tx: &mut Transaction<'_, Sqlite>,
    batch: &[ConversationMessage],
) -> Result<(), ArchiveError> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "INSERT INTO conversation_messages \
         (id, conversation_id, message_text, role, sequence_number, created_at) ",
    );
    builder.push_values(batch, |mut row, message| {
        row.push_bind(message.id)
            .push_bind(&message.conversation_id)
            .push_bind(&message.message_text)
            .push_bind(message.role)
            .push_bind(message.sequence_number)
            .push_bind(&message.created_at);
    });
    builder.push(" ON CONFLICT(id) DO NOTHING");
    builder.build().execute(&mut **tx).await?;
    Ok(())
}

/// Serialize a batch as a comma-joined slice of the surrounding JSON array.
fn frame_batch(batch: &[ConversationMessage], first: bool) -> Result<Bytes, ArchiveError> {
    let mut out = Vec::new();
    for (i, message) in batch.iter().enumerate() {
        if !first || i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(&serde_json::to_vec(message).map_err(ArchiveError::Encode)?);
    }
    Ok(Bytes::from(out))
}

/// Clear the archived flag with bounded retries. Returns whether it stuck.
async fn flip_archived(tx: &mut Transaction<'_, Sqlite>, conversation_id: &str) -> bool {
    for attempt in 1..=MAX_FLIP_ATTEMPTS {
        match sqlx::query("UPDATE conversations SET archived = FALSE WHERE id = ?")
            .bind(conversation_id)
            .execute(&mut **tx)
            .await
        {
            Ok(_) => return true,
            Err(err) if attempt == MAX_FLIP_ATTEMPTS => {
                error!(
                    conversation_id,
                    attempt, %err,
                    "giving up on clearing archived flag"
                );
            }
            Err(err) => {
                warn!(conversation_id, attempt, %err, "clearing archived flag failed, retrying");
                sleep(FLIP_BACKOFF * attempt).await;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ConversationRepository, Role};
    use crate::db::Database;
    use tokio_stream::wrappers::ReceiverStream;

    fn archive_blob(conversation_id: &str, count: usize) -> Vec<u8> {
        let mut blob = Vec::new();
        for i in 1..=count {
            let message = ConversationMessage {
                id: i as i64,
                conversation_id: conversation_id.to_string(),
                message_text: format!("message {i}"),
                role: if i % 2 == 1 { Role::User } else { Role::Assistant },
                sequence_number: i as i64,
                created_at: "2024-01-01T00:00:00+00:00".to_string(),
            };
            blob.extend_from_slice(&serde_json::to_vec(&message).unwrap());
            blob.push(b'\n');
        }
        blob
    }

    async fn setup(count: usize) -> (Database, ConversationRepository, Vec<u8>) {
        let db = Database::in_memory().await.unwrap();
        let repo = ConversationRepository::new(db.pool().clone());
        repo.create("thread_1", None).await.unwrap();
        repo.set_archived("thread_1", true).await.unwrap();
        let blob = archive_blob("thread_1", count);
        (db, repo, blob)
    }

    async fn run_and_collect_body(
        db: &Database,
        blob: Vec<u8>,
    ) -> (Result<RehydrationOutcome, ArchiveError>, String) {
        let (tx, rx) = mpsc::channel(16);
        let reader: ObjectReader = Box::pin(std::io::Cursor::new(blob));
        let result =
            rehydrate_conversation(db.pool(), reader, "thread_1", 2, &tx).await;
        drop(tx);

        let chunks: Vec<_> = ReceiverStream::new(rx).collect().await;
        let mut body = String::new();
        for chunk in chunks {
            body.push_str(std::str::from_utf8(&chunk.unwrap()).unwrap());
        }
        (result, body)
    }

    #[tokio::test]
    async fn framed_body_parses_as_json_array() {
        for count in [0usize, 1, 2, 5] {
            let (db, repo, blob) = setup(count).await;
            let (result, inner) = run_and_collect_body(&db, blob).await;

            let outcome = result.unwrap();
            assert_eq!(outcome.messages, count);
            assert!(outcome.flag_flipped);

            let body = format!("[{inner}]");
            let parsed: Vec<ConversationMessage> = serde_json::from_str(&body).unwrap();
            assert_eq!(parsed.len(), count);
            for (i, message) in parsed.iter().enumerate() {
                assert_eq!(message.sequence_number, (i + 1) as i64);
            }

            assert_eq!(repo.count_messages("thread_1").await.unwrap(), count as i64);
            assert!(!repo.get("thread_1").await.unwrap().unwrap().archived);
        }
    }

    #[tokio::test]
    async fn rerun_skips_already_restored_rows() {
        let (db, repo, blob) = setup(5).await;
        run_and_collect_body(&db, blob.clone()).await.0.unwrap();
        run_and_collect_body(&db, blob).await.0.unwrap();

        assert_eq!(repo.count_messages("thread_1").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn sequence_collision_under_new_id_aborts_instead_of_dropping() {
        let (db, repo, blob) = setup(2).await;
        // A row written while the conversation sat archived: fresh id, but it
        // reuses sequence number 1 of the archived records.
        sqlx::query(
            r#"
            INSERT INTO conversation_messages
                (id, conversation_id, message_text, role, sequence_number, created_at)
            VALUES (100, 'thread_1', 'written while archived', 'user', 1, '2024-02-01T00:00:00+00:00')
            "#,
        )
        .execute(db.pool())
        .await
        .unwrap();

        let (result, _) = run_and_collect_body(&db, blob).await;
        assert!(matches!(result, Err(ArchiveError::Db(_))));

        // Rolled back: the live row survives, no archived record was half
        // applied, and the flag still marks the blob as authoritative.
        let texts: Vec<String> = sqlx::query_scalar(
            "SELECT message_text FROM conversation_messages WHERE conversation_id = 'thread_1'",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        assert_eq!(texts, vec!["written while archived".to_string()]);
        assert!(repo.get("thread_1").await.unwrap().unwrap().archived);
    }

    #[tokio::test]
    async fn malformed_archive_rolls_back_all_inserts() {
        let (db, repo, mut blob) = setup(4).await;
        blob.extend_from_slice(b"not json\n");

        let (result, _) = run_and_collect_body(&db, blob).await;
        assert!(matches!(result.unwrap_err(), ArchiveError::Decode(_)));

        // Transaction dropped without commit, nothing persisted.
        assert_eq!(repo.count_messages("thread_1").await.unwrap(), 0);
        assert!(repo.get("thread_1").await.unwrap().unwrap().archived);
    }

    #[tokio::test]
    async fn flag_flip_failure_still_commits_rows() {
        let (db, repo, blob) = setup(3).await;
        // Make every archived-flag update fail while message inserts still work.
        sqlx::raw_sql(
            "CREATE TRIGGER fail_flip BEFORE UPDATE OF archived ON conversations \
             BEGIN SELECT RAISE(ABORT, 'flip refused'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let (result, inner) = run_and_collect_body(&db, blob).await;
        let outcome = result.unwrap();
        assert!(!outcome.flag_flipped);
        assert_eq!(outcome.messages, 3);

        let parsed: Vec<ConversationMessage> =
            serde_json::from_str(&format!("[{inner}]")).unwrap();
        assert_eq!(parsed.len(), 3);

        assert_eq!(repo.count_messages("thread_1").await.unwrap(), 3);
        assert!(repo.get("thread_1").await.unwrap().unwrap().archived);
    }
}
