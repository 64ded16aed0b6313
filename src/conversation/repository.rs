//! Repository for conversation database operations.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use super::models::{Conversation, ConversationMessage, Role};

/// Repository for conversations and their messages.
#[derive(Debug, Clone)]
pub struct ConversationRepository {
    pool: SqlitePool,
}

impl ConversationRepository {
    /// Create a new repository instance.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a new conversation under the given thread id.
    pub async fn create(&self, id: &str, user_id: Option<&str>) -> Result<Conversation> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO conversations (id, user_id, archived, created_at, updated_at)
            VALUES (?, ?, FALSE, ?, ?)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("inserting conversation")?;

        Ok(Conversation {
            id: id.to_string(),
            user_id: user_id.map(str::to_string),
            archived: false,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Get a conversation by id.
    pub async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        sqlx::query_as::<_, Conversation>(
            "SELECT id, user_id, archived, created_at, updated_at FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching conversation")
    }

    /// Append a message to a conversation, assigning the next sequence number
    /// and touching the conversation's `updated_at`.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        message_text: &str,
    ) -> Result<ConversationMessage> {
        let now = Utc::now().to_rfc3339();
        let sequence_number = self.next_sequence_number(conversation_id).await?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO conversation_messages
                (conversation_id, message_text, role, sequence_number, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(conversation_id)
        .bind(message_text)
        .bind(role)
        .bind(sequence_number)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .context("inserting conversation message")?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .context("touching conversation")?;

        Ok(ConversationMessage {
            id,
            conversation_id: conversation_id.to_string(),
            message_text: message_text.to_string(),
            role,
            sequence_number,
            created_at: now,
        })
    }

    /// Next sequence number for a conversation (1 for the first message).
    async fn next_sequence_number(&self, conversation_id: &str) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM conversation_messages WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await
        .context("computing next sequence number")
    }

    /// All messages of an unarchived conversation, in primary-key order.
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<ConversationMessage>> {
        sqlx::query_as::<_, ConversationMessage>(
            r#"
            SELECT id, conversation_id, message_text, role, sequence_number, created_at
            FROM conversation_messages
            WHERE conversation_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .context("listing conversation messages")
    }

    /// Count message rows currently held for a conversation.
    pub async fn count_messages(&self, conversation_id: &str) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM conversation_messages WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await
        .context("counting conversation messages")
    }

    /// Set the archived flag on a conversation.
    pub async fn set_archived(&self, conversation_id: &str, archived: bool) -> Result<()> {
        sqlx::query("UPDATE conversations SET archived = ? WHERE id = ?")
            .bind(archived)
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .context("updating archived flag")?;
        Ok(())
    }

    /// Ids of conversations last updated before `cutoff` (RFC 3339) that still
    /// hold at least one message row. These are the archive-job candidates.
    pub async fn stale_conversation_ids(&self, cutoff: &str) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT id FROM conversations
            WHERE updated_at < ?
              AND EXISTS (
                  SELECT 1 FROM conversation_messages m
                  WHERE m.conversation_id = conversations.id
              )
            ORDER BY updated_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("listing stale conversations")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> ConversationRepository {
        let db = Database::in_memory().await.unwrap();
        ConversationRepository::new(db.pool().clone())
    }

    #[tokio::test]
    async fn create_and_get_conversation() {
        let repo = setup().await;

        let created = repo.create("thread_1", Some("user_1")).await.unwrap();
        assert!(!created.archived);

        let fetched = repo.get("thread_1").await.unwrap().unwrap();
        assert_eq!(fetched.id, "thread_1");
        assert_eq!(fetched.user_id.as_deref(), Some("user_1"));

        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sequence_numbers_increase_per_conversation() {
        let repo = setup().await;
        repo.create("thread_1", None).await.unwrap();
        repo.create("thread_2", None).await.unwrap();

        let first = repo
            .append_message("thread_1", Role::User, "hi")
            .await
            .unwrap();
        let second = repo
            .append_message("thread_1", Role::Assistant, "hello")
            .await
            .unwrap();
        let other = repo
            .append_message("thread_2", Role::User, "unrelated")
            .await
            .unwrap();

        assert_eq!(first.sequence_number, 1);
        assert_eq!(second.sequence_number, 2);
        assert_eq!(other.sequence_number, 1);
    }

    #[tokio::test]
    async fn stale_candidates_require_messages() {
        let repo = setup().await;
        repo.create("with_messages", None).await.unwrap();
        repo.create("empty", None).await.unwrap();
        repo.append_message("with_messages", Role::User, "old")
            .await
            .unwrap();

        // A cutoff in the far future makes both conversations "old enough".
        let stale = repo.stale_conversation_ids("9999-01-01T00:00:00+00:00").await.unwrap();
        assert_eq!(stale, vec!["with_messages".to_string()]);
    }
}
