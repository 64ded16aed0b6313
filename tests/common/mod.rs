//! Shared test harness.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use uuid::Uuid;

use chatvault::api::{AppState, create_router};
use chatvault::archive::{MemoryObjectStore, ObjectStore};
use chatvault::assistant::{AssistantApi, AssistantResult};
use chatvault::auth::{AuthConfig, AuthState};
use chatvault::conversation::ConversationRepository;
use chatvault::db::Database;

/// Assistant stub that echoes the latest user message per thread.
pub struct MockAssistant {
    last_message: Mutex<HashMap<String, String>>,
}

impl MockAssistant {
    pub fn new() -> Self {
        Self {
            last_message: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl AssistantApi for MockAssistant {
    async fn create_thread(&self, first_message: &str) -> AssistantResult<String> {
        let thread_id = format!("thread_{}", Uuid::new_v4().simple());
        self.last_message
            .lock()
            .unwrap()
            .insert(thread_id.clone(), first_message.to_string());
        Ok(thread_id)
    }

    async fn add_user_message(&self, thread_id: &str, message: &str) -> AssistantResult<()> {
        self.last_message
            .lock()
            .unwrap()
            .insert(thread_id.to_string(), message.to_string());
        Ok(())
    }

    async fn run_to_completion(&self, thread_id: &str) -> AssistantResult<String> {
        let last = self
            .last_message
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .unwrap_or_default();
        Ok(format!("echo: {last}"))
    }
}

pub struct TestContext {
    pub app: Router,
    pub db: Database,
    pub store: Arc<MemoryObjectStore>,
}

impl TestContext {
    /// In-memory database, in-memory object store, auth disabled.
    pub async fn new() -> Self {
        let db = Database::in_memory().await.unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let object_store: Arc<dyn ObjectStore> = store.clone();
        let auth = AuthState::new(AuthConfig::default());
        let assistant = Arc::new(MockAssistant::new());

        let state = AppState::new(db.clone(), object_store, assistant, auth, None);
        let app = create_router(state);
        Self { app, db, store }
    }

    pub fn repo(&self) -> ConversationRepository {
        ConversationRepository::new(self.db.pool().clone())
    }
}
