//! Multi-signal scoring for retrieval
//!
//! `score = alpha_relevance * cosine + alpha_recency * decay^hours + alpha_importance * importance`

use chrono::{DateTime, Utc};

use crate::config::ScoringConfig;
use crate::memory::types::MemoryItem;

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Exponential recency term: `decay^hours`, 1.0 for a just-accessed item
pub fn recency_score(hours_since_access: f32, decay: f32) -> f32 {
    decay.powf(hours_since_access.max(0.0))
}

/// Score breakdown for one item
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemScore {
    pub relevance: f32,
    pub recency: f32,
    pub importance: f32,
    pub total: f32,
}

/// Score an item against a query embedding at time `now`
pub fn score_item(
    item: &MemoryItem,
    query_embedding: &[f32],
    now: DateTime<Utc>,
    config: &ScoringConfig,
) -> ItemScore {
    let relevance = cosine_similarity(query_embedding, &item.embedding);
    let recency = recency_score(item.hours_since_access(now), config.recency_decay);
    let importance = item.importance;
    let total = config.alpha_relevance * relevance
        + config.alpha_recency * recency
        + config.alpha_importance * importance;

    ItemScore {
        relevance,
        recency,
        importance,
        total,
    }
}
