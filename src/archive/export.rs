//! HTML export of a conversation's messages.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use sqlx::SqlitePool;
use tokio_util::io::StreamReader;
use tracing::info;

use super::error::ArchiveError;
use super::paginator::message_stream;
use super::store::ObjectStore;
use super::{EXPORT_BUCKET, EXPORT_PAGE_SIZE, export_object_name};
use crate::conversation::ConversationMessage;

enum BuilderState {
    Streaming,
    Footer,
    Done,
}

/// Renders a stream of messages into HTML document chunks.
///
/// The header is emitted with the first poll; whether the list or the empty
/// placeholder follows depends on whether any message arrives. An inner error
/// ends the document mid-stream.
pub struct HtmlBuilder {
    inner: BoxStream<'static, Result<ConversationMessage, ArchiveError>>,
    header_written: bool,
    saw_message: bool,
    state: BuilderState,
}

const HEADER: &str =
    "<!DOCTYPE html><html><head><title>Conversation Export</title></head><body>\
     <h1>Conversation Export</h1>";

impl HtmlBuilder {
    pub fn new<S>(inner: S) -> Self
    where
        S: Stream<Item = Result<ConversationMessage, ArchiveError>> + Send + 'static,
    {
        Self {
            inner: inner.boxed(),
            header_written: false,
            saw_message: false,
            state: BuilderState::Streaming,
        }
    }
}

impl Stream for HtmlBuilder {
    type Item = Result<Bytes, ArchiveError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.state {
                BuilderState::Streaming => match this.inner.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(message))) => {
                        let mut chunk = String::new();
                        if !this.header_written {
                            this.header_written = true;
                            chunk.push_str(HEADER);
                            chunk.push_str("<ul>");
                        }
                        this.saw_message = true;
                        chunk.push_str("<li><p>");
                        chunk.push_str(&message.message_text);
                        chunk.push_str("</p></li>");
                        return Poll::Ready(Some(Ok(Bytes::from(chunk))));
                    }
                    Poll::Ready(Some(Err(err))) => {
                        this.state = BuilderState::Done;
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Ready(None) => {
                        this.state = BuilderState::Footer;
                    }
                    Poll::Pending => return Poll::Pending,
                },
                BuilderState::Footer => {
                    this.state = BuilderState::Done;
                    let mut chunk = String::new();
                    if !this.header_written {
                        chunk.push_str(HEADER);
                    }
                    if this.saw_message {
                        chunk.push_str("</ul></body></html>");
                    } else {
                        chunk.push_str("<p>No messages found</p></body></html>");
                    }
                    return Poll::Ready(Some(Ok(Bytes::from(chunk))));
                }
                BuilderState::Done => return Poll::Ready(None),
            }
        }
    }
}

/// Render a conversation to HTML and store it in the export bucket.
/// Returns the size of the stored document.
pub async fn export_conversation(
    pool: &SqlitePool,
    store: &Arc<dyn ObjectStore>,
    conversation_id: &str,
) -> Result<u64, ArchiveError> {
    store.ensure_bucket(EXPORT_BUCKET).await?;

    let messages = message_stream(pool.clone(), conversation_id.to_string(), EXPORT_PAGE_SIZE);
    let html = HtmlBuilder::new(messages).map_err(std::io::Error::other);
    let mut reader = StreamReader::new(html);

    let written = store
        .put_stream(EXPORT_BUCKET, &export_object_name(conversation_id), &mut reader)
        .await?;
    info!(conversation_id, written, "conversation exported");
    Ok(written)
}
