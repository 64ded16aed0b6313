//! Keyset pagination over a conversation's message rows.
//!
//! Pages are fetched on demand as the consumer pulls, ordered by primary key,
//! with the last id of each page as the cursor for the next. A page shorter
//! than the requested size ends the stream without issuing another query.

use futures::stream::{self, Stream, TryStreamExt};
use sqlx::SqlitePool;

use super::error::ArchiveError;
use crate::conversation::ConversationMessage;

struct PageState {
    pool: SqlitePool,
    conversation_id: String,
    after: Option<i64>,
    page_size: i64,
    done: bool,
}

async fn fetch_page(state: &PageState) -> Result<Vec<ConversationMessage>, ArchiveError> {
    let rows = match state.after {
        Some(after) => {
            sqlx::query_as::<_, ConversationMessage>(
                r#"
                SELECT id, conversation_id, message_text, role, sequence_number, created_at
                FROM conversation_messages
                WHERE conversation_id = ? AND id > ?
                ORDER BY id ASC
                LIMIT ?
                "#,
            )
            .bind(&state.conversation_id)
            .bind(after)
            .bind(state.page_size)
            .fetch_all(&state.pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, ConversationMessage>(
                r#"
                SELECT id, conversation_id, message_text, role, sequence_number, created_at
                FROM conversation_messages
                WHERE conversation_id = ?
                ORDER BY id ASC
                LIMIT ?
                "#,
            )
            .bind(&state.conversation_id)
            .bind(state.page_size)
            .fetch_all(&state.pool)
            .await?
        }
    };
    Ok(rows)
}

/// Stream a conversation's messages one page at a time.
pub fn message_pages(
    pool: SqlitePool,
    conversation_id: String,
    page_size: i64,
) -> impl Stream<Item = Result<Vec<ConversationMessage>, ArchiveError>> + Send {
    let state = PageState {
        pool,
        conversation_id,
        after: None,
        page_size,
        done: false,
    };

    stream::try_unfold(state, |mut state| async move {
        if state.done {
            return Ok(None);
        }

        let page = fetch_page(&state).await?;
        if page.is_empty() {
            return Ok(None);
        }

        if (page.len() as i64) < state.page_size {
            state.done = true;
        } else if let Some(last) = page.last() {
            state.after = Some(last.id);
        }

        Ok(Some((page, state)))
    })
}

/// Flatten [`message_pages`] into a stream of individual messages.
pub fn message_stream(
    pool: SqlitePool,
    conversation_id: String,
    page_size: i64,
) -> impl Stream<Item = Result<ConversationMessage, ArchiveError>> + Send {
    message_pages(pool, conversation_id, page_size)
        .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
        .try_flatten()
}
