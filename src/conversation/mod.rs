//! Conversation domain: models and repository.

mod models;
mod repository;

pub use models::{Conversation, ConversationMessage, Role};
pub use repository::ConversationRepository;
