//! Memory pipelines and the data model they operate on

pub mod memorize;
pub mod predict;
pub mod retrieval;
pub mod scoring;
pub mod triples;
pub mod types;

pub use memorize::{FactInput, MemorizePipeline, MemorizeReport, StoreOutcome};
pub use predict::PredictPipeline;
pub use retrieval::{RankedResult, RetrievalEngine, RetrievalMode, RetrievedItem};
pub use triples::TripleExtractor;
pub use types::{Category, MemoryItem, MemoryKind, Resource, ScheduledTask, SemanticTriple};

/// First `max` characters of `text`, on a char boundary
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
