//! Shared application state.

use std::sync::Arc;

use crate::archive::ObjectStore;
use crate::assistant::AssistantApi;
use crate::auth::AuthState;
use crate::conversation::ConversationRepository;
use crate::db::Database;

/// State shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub store: Arc<dyn ObjectStore>,
    pub assistant: Arc<dyn AssistantApi>,
    pub auth: AuthState,
    pub cors_origin: Option<String>,
}

impl AppState {
    pub fn new(
        db: Database,
        store: Arc<dyn ObjectStore>,
        assistant: Arc<dyn AssistantApi>,
        auth: AuthState,
        cors_origin: Option<String>,
    ) -> Self {
        Self {
            db,
            store,
            assistant,
            auth,
            cors_origin,
        }
    }

    pub fn repo(&self) -> ConversationRepository {
        ConversationRepository::new(self.db.pool().clone())
    }
}
