//! Client for the upstream assistant provider.
//!
//! Thin HTTP wrapper over the provider's threads API: create a thread, append
//! a user message, run the assistant and poll until the run settles, then read
//! the newest assistant message back. The trait seam lets tests script replies
//! without a network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

/// Result type for assistant operations.
pub type AssistantResult<T> = Result<T, AssistantError>;

/// Errors from talking to the assistant provider.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("assistant integration is disabled")]
    Disabled,

    #[error("assistant request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("assistant API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("assistant run did not settle after {0} polls")]
    RunTimedOut(u32),

    #[error("assistant run settled without a reply message")]
    MissingReply,
}

/// Assistant provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub assistant_id: String,
    pub poll_interval_secs: u64,
    pub max_polls: u32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            assistant_id: String::new(),
            poll_interval_secs: 5,
            max_polls: 60,
        }
    }
}

/// Operations the chat endpoint needs from an assistant provider.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// Create a thread seeded with the user's first message. Returns thread id.
    async fn create_thread(&self, first_message: &str) -> AssistantResult<String>;

    /// Append a user message to an existing thread.
    async fn add_user_message(&self, thread_id: &str, message: &str) -> AssistantResult<()>;

    /// Run the assistant on the thread, wait for completion, return its reply.
    async fn run_to_completion(&self, thread_id: &str) -> AssistantResult<String>;
}

/// HTTP-backed assistant client.
pub struct HttpAssistant {
    client: reqwest::Client,
    config: AssistantConfig,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct RunStatus {
    status: String,
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

#[derive(Deserialize)]
struct ThreadMessage {
    role: String,
    content: Vec<MessageContent>,
}

#[derive(Deserialize)]
struct MessageContent {
    text: Option<MessageText>,
}

#[derive(Deserialize)]
struct MessageText {
    value: String,
}

impl HttpAssistant {
    pub fn new(config: AssistantConfig) -> anyhow::Result<Self> {
        if config.api_key.is_empty() || config.assistant_id.is_empty() {
            anyhow::bail!("assistant is enabled but api_key or assistant_id is unset");
        }

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("assistants=v2"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn check(response: reqwest::Response) -> AssistantResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(AssistantError::Api { status, message })
    }
}

#[async_trait]
impl AssistantApi for HttpAssistant {
    async fn create_thread(&self, first_message: &str) -> AssistantResult<String> {
        let response = self
            .client
            .post(self.url("/threads"))
            .json(&json!({
                "messages": [{ "role": "user", "content": first_message }]
            }))
            .send()
            .await?;
        let thread: IdResponse = Self::check(response).await?.json().await?;
        debug!(thread_id = %thread.id, "assistant thread created");
        Ok(thread.id)
    }

    async fn add_user_message(&self, thread_id: &str, message: &str) -> AssistantResult<()> {
        let response = self
            .client
            .post(self.url(&format!("/threads/{thread_id}/messages")))
            .json(&json!({ "role": "user", "content": message }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn run_to_completion(&self, thread_id: &str) -> AssistantResult<String> {
        let response = self
            .client
            .post(self.url(&format!("/threads/{thread_id}/runs")))
            .json(&json!({ "assistant_id": self.config.assistant_id }))
            .send()
            .await?;
        let run: IdResponse = Self::check(response).await?.json().await?;

        let mut settled = false;
        for poll in 1..=self.config.max_polls {
            let response = self
                .client
                .get(self.url(&format!("/threads/{thread_id}/runs/{}", run.id)))
                .send()
                .await?;
            let status: RunStatus = Self::check(response).await?.json().await?;
            debug!(thread_id, run_id = %run.id, status = %status.status, poll, "run polled");

            match status.status.as_str() {
                "completed" => {
                    settled = true;
                    break;
                }
                "failed" | "cancelled" | "expired" => {
                    return Err(AssistantError::Api {
                        status: 200,
                        message: format!("run ended with status {}", status.status),
                    });
                }
                _ => {
                    tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
                }
            }
        }
        if !settled {
            return Err(AssistantError::RunTimedOut(self.config.max_polls));
        }

        let response = self
            .client
            .get(self.url(&format!("/threads/{thread_id}/messages")))
            .query(&[("order", "desc"), ("limit", "10")])
            .send()
            .await?;
        let messages: MessageList = Self::check(response).await?.json().await?;

        messages
            .data
            .into_iter()
            .find(|message| message.role == "assistant")
            .and_then(|message| {
                message
                    .content
                    .into_iter()
                    .find_map(|content| content.text.map(|text| text.value))
            })
            .ok_or(AssistantError::MissingReply)
    }
}

/// Placeholder used when no provider is configured. Every call fails with
/// [`AssistantError::Disabled`], which the API layer maps to 503.
pub struct DisabledAssistant;

#[async_trait]
impl AssistantApi for DisabledAssistant {
    async fn create_thread(&self, _first_message: &str) -> AssistantResult<String> {
        Err(AssistantError::Disabled)
    }

    async fn add_user_message(&self, _thread_id: &str, _message: &str) -> AssistantResult<()> {
        Err(AssistantError::Disabled)
    }

    async fn run_to_completion(&self, _thread_id: &str) -> AssistantResult<String> {
        Err(AssistantError::Disabled)
    }
}
