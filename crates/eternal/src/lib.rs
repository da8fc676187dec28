//! Eternal - long-lived memory for AI agents
//!
//! Conversations and documents are distilled into durable facts stored in
//! LanceDB with embeddings, organized into a category tree and retrieved by
//! a relevance, recency and importance score. A durable buffer collects raw
//! dialogue until it is worth flushing, and a background scheduler keeps the
//! store consolidated and reflected upon.

pub mod buffer;
pub mod config;
pub mod consolidate;
pub mod engine;
pub mod error;
pub mod llm;
pub mod memory;
pub mod scheduler;
pub mod storage;
pub mod testing;
pub mod vault;

pub use engine::EternalMemory;
pub use error::{AdvisoryError, EternalError};
