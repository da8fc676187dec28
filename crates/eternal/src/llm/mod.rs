//! Language model capability: trait, typed I/O and the HTTP adapter

pub mod cache;
pub mod prompts;
pub mod provider;
pub mod remote;
pub mod types;

pub use provider::LlmService;
pub use cache::{CacheStats, EmbeddingCache};
pub use remote::RemoteLlm;
pub use types::{
    DailyReflection, ExtractedFact, ExtractedTriple, LlmError, MonthlySummary, ProfileInsight,
    Relationship, WeeklySummary,
};
