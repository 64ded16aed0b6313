//! Chatbot backend with conversation cold-storage archival.
//!
//! Live conversations are recorded in SQLite; a scheduled job relocates the
//! message rows of stale conversations into an object store as line-delimited
//! JSON, and the read path restores them on demand while streaming the records
//! back to the client.

pub mod api;
pub mod archive;
pub mod assistant;
pub mod auth;
pub mod conversation;
pub mod db;
