//! Memory retrieval with multi-signal scoring
//!
//! Fast mode: evolve the query, embed it, score every active item by
//! relevance, recency and importance, keep the best above the relevance
//! floor. Deep mode widens recall and hands the results to the model for a
//! synthesized answer. When triples are enabled, entity-level facts refine
//! the item list and are prepended as higher-precision context.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ScoringConfig;
use crate::error::Result;
use crate::llm::LlmService;
use crate::memory::scoring::{ItemScore, score_item};
use crate::memory::types::{MemoryItem, SemanticTriple};
use crate::storage::{ItemFilter, LanceStore};

const NO_RESULTS: &str = "No relevant memories found.";
const QUICK_CONTEXT_ITEMS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    #[default]
    Fast,
    Deep,
}

impl FromStr for RetrievalMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Ok(RetrievalMode::Fast),
            "deep" => Ok(RetrievalMode::Deep),
            other => Err(format!("Unknown retrieval mode: {other}")),
        }
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RetrievalMode::Fast => "fast",
            RetrievalMode::Deep => "deep",
        })
    }
}

/// A retrieved item with its score breakdown
#[derive(Debug, Clone)]
pub struct RetrievedItem {
    pub item: MemoryItem,
    pub score: ItemScore,
}

/// Result of a retrieval call
#[derive(Debug, Clone)]
pub struct RankedResult {
    /// Best first
    pub items: Vec<RetrievedItem>,
    pub related_categories: Vec<String>,
    /// Context string for prompt injection (fast) or the reasoned answer (deep)
    pub suggested_context: String,
    /// Set only when evolution changed the query
    pub evolved_query: Option<String>,
    pub mode: RetrievalMode,
    pub confidence: f32,
}

impl RankedResult {
    pub fn contents(&self) -> Vec<&str> {
        self.items.iter().map(|r| r.item.content.as_str()).collect()
    }
}

/// Score and rank items against a query embedding.
///
/// Items below `min_relevance` are dropped. Sorting is stable, so equal
/// scores keep the input order.
pub fn rank_items(
    items: Vec<MemoryItem>,
    query_embedding: &[f32],
    now: DateTime<Utc>,
    config: &ScoringConfig,
    min_relevance: f32,
    limit: usize,
) -> Vec<RetrievedItem> {
    let mut ranked: Vec<RetrievedItem> = items
        .into_iter()
        .filter(|item| item.is_active)
        .map(|item| {
            let score = score_item(&item, query_embedding, now, config);
            RetrievedItem { item, score }
        })
        .filter(|r| r.score.relevance >= min_relevance)
        .collect();

    ranked.sort_by(|a, b| b.score.total.total_cmp(&a.score.total));
    ranked.truncate(limit);
    ranked
}

/// Refine ranked items with triples found for the same query.
///
/// Items covered only by inactive triples are dropped, items covered by at
/// least one active triple are kept, uncovered items pass through. Returns
/// the kept items and the rendered context of the top active triples.
pub fn apply_triple_filter(
    items: Vec<RetrievedItem>,
    triples: &[SemanticTriple],
    context_limit: usize,
) -> (Vec<RetrievedItem>, String) {
    if triples.is_empty() {
        return (items, String::new());
    }

    let mut by_item: HashMap<Uuid, Vec<&SemanticTriple>> = HashMap::new();
    for triple in triples {
        if let Some(item_id) = triple.memory_item_id {
            by_item.entry(item_id).or_default().push(triple);
        }
    }

    let mut seen = HashSet::new();
    let statements: Vec<String> = triples
        .iter()
        .filter(|t| t.is_active)
        .filter(|t| seen.insert(t.spo_key()))
        .map(|t| t.to_natural_language())
        .take(context_limit)
        .collect();

    let kept = items
        .into_iter()
        .filter(|r| match by_item.get(&r.item.id) {
            Some(covering) => covering.iter().any(|t| t.is_active),
            None => true,
        })
        .collect();

    (kept, statements.join("; "))
}

/// Prompt-ready context from the top items and optional triple context
pub fn quick_context(items: &[RetrievedItem], triple_context: &str) -> String {
    let mut parts = Vec::new();
    if !triple_context.is_empty() {
        parts.push(format!("[Precise facts] {triple_context}"));
    }
    if !items.is_empty() {
        let top: Vec<&str> = items
            .iter()
            .take(QUICK_CONTEXT_ITEMS)
            .map(|r| r.item.content.as_str())
            .collect();
        parts.push(format!("Relevant context: {}", top.join("; ")));
    }

    if parts.is_empty() {
        NO_RESULTS.to_string()
    } else {
        parts.join(" | ")
    }
}

fn related_categories(items: &[RetrievedItem]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .map(|r| r.item.category_path.clone())
        .filter(|p| !p.is_empty() && seen.insert(p.clone()))
        .collect()
}

fn mean_confidence(items: &[RetrievedItem]) -> f32 {
    if items.is_empty() {
        return 0.0;
    }
    let total: f32 = items.iter().map(|r| r.item.confidence).sum();
    (total / items.len() as f32).min(1.0)
}

pub struct RetrievalEngine {
    store: Arc<LanceStore>,
    llm: Arc<dyn LlmService>,
    scoring: ScoringConfig,
    triples_enabled: bool,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<LanceStore>,
        llm: Arc<dyn LlmService>,
        scoring: ScoringConfig,
        triples_enabled: bool,
    ) -> Self {
        Self {
            store,
            llm,
            scoring,
            triples_enabled,
        }
    }

    /// Retrieve memories for a query.
    ///
    /// `conversation` is recent dialogue used to resolve vague queries. An
    /// empty store yields an empty, low-confidence result. Every returned
    /// item has its access time refreshed.
    pub async fn retrieve(
        &self,
        query: &str,
        mode: RetrievalMode,
        conversation: &str,
    ) -> Result<RankedResult> {
        let evolved = match self.llm.evolve_query(query, conversation).await {
            Ok(evolved) if !evolved.trim().is_empty() => evolved,
            Ok(_) => query.to_string(),
            Err(e) => {
                warn!("Query evolution failed, using original query: {}", e);
                query.to_string()
            }
        };
        let evolved_query = (evolved != query).then(|| evolved.clone());

        let query_embedding = self.llm.embed(&evolved).await?;

        let (limit, floor) = match mode {
            RetrievalMode::Fast => (self.scoring.fast_limit, self.scoring.min_relevance),
            RetrievalMode::Deep => (
                self.scoring.deep_limit,
                self.scoring.min_relevance * self.scoring.deep_threshold_factor,
            ),
        };

        let now = Utc::now();
        let candidates = self.store.list_items(&ItemFilter::active()).await?;
        let candidate_count = candidates.len();
        let ranked = rank_items(candidates, &query_embedding, now, &self.scoring, floor, limit);

        let (items, triple_context) = if self.triples_enabled {
            let triples = self.relevant_triples(&query_embedding).await?;
            apply_triple_filter(ranked, &triples, self.scoring.triple_context_limit)
        } else {
            (ranked, String::new())
        };

        debug!(
            mode = %mode,
            candidates = candidate_count,
            returned = items.len(),
            "Retrieval scored"
        );

        let ids: Vec<Uuid> = items.iter().map(|r| r.item.id).collect();
        self.store.touch_items(&ids, now).await?;

        let related_categories = related_categories(&items);

        let (suggested_context, confidence) = match mode {
            RetrievalMode::Fast => (quick_context(&items, &triple_context), mean_confidence(&items)),
            RetrievalMode::Deep => {
                let answer = self.reason(&evolved, &items, &triple_context).await;
                let confidence = if !triple_context.is_empty() {
                    0.85
                } else if !items.is_empty() {
                    0.8
                } else {
                    0.3
                };
                (answer, confidence)
            }
        };

        Ok(RankedResult {
            items,
            related_categories,
            suggested_context,
            evolved_query,
            mode,
            confidence,
        })
    }

    async fn relevant_triples(&self, query_embedding: &[f32]) -> Result<Vec<SemanticTriple>> {
        let scored = self
            .store
            .search_triples(query_embedding, self.scoring.triple_limit)
            .await?;
        Ok(scored
            .into_iter()
            .filter(|(_, similarity)| *similarity >= self.scoring.triple_threshold)
            .map(|(triple, _)| triple)
            .collect())
    }

    /// Deep mode answer; falls back to the quick context if reasoning fails
    async fn reason(&self, query: &str, items: &[RetrievedItem], triple_context: &str) -> String {
        let mut contents = Vec::with_capacity(items.len() + 1);
        if !triple_context.is_empty() {
            contents.push(format!("[High-precision entity facts]: {triple_context}"));
        }
        contents.extend(items.iter().map(|r| r.item.content.clone()));

        match self.llm.reason_from_context(query, &contents, &[]).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Deep reasoning failed, returning quick context: {}", e);
                quick_context(items, triple_context)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryKind;
    use chrono::Duration;

    fn item(content: &str, embedding: Vec<f32>) -> MemoryItem {
        MemoryItem::new(
            content.to_string(),
            embedding,
            MemoryKind::Fact,
            "personal".to_string(),
        )
    }

    fn retrieved(content: &str) -> RetrievedItem {
        RetrievedItem {
            item: item(content, vec![1.0, 0.0]),
            score: ItemScore {
                relevance: 1.0,
                recency: 1.0,
                importance: 0.5,
                total: 2.5,
            },
        }
    }

    fn triple_for(item_id: Uuid, predicate: &str, object: &str, active: bool) -> SemanticTriple {
        let mut triple = SemanticTriple::new("user", predicate, object, None);
        triple.memory_item_id = Some(item_id);
        triple.is_active = active;
        triple
    }

    #[test]
    fn test_rank_applies_floor_and_limit() {
        let now = Utc::now();
        let config = ScoringConfig::default();
        let items = vec![
            item("relevant", vec![1.0, 0.0]),
            item("orthogonal", vec![0.0, 1.0]),
            item("close", vec![0.9, 0.1]),
        ];

        let ranked = rank_items(items, &[1.0, 0.0], now, &config, 0.3, 10);
        let contents: Vec<&str> = ranked.iter().map(|r| r.item.content.as_str()).collect();
        assert_eq!(contents, vec!["relevant", "close"]);

        let items = vec![item("a", vec![1.0, 0.0]), item("b", vec![1.0, 0.0])];
        assert_eq!(rank_items(items, &[1.0, 0.0], now, &config, 0.3, 1).len(), 1);
    }

    #[test]
    fn test_rank_skips_inactive() {
        let mut old = item("User lives in Busan", vec![1.0, 0.0]);
        old.is_active = false;
        let ranked = rank_items(vec![old], &[1.0, 0.0], Utc::now(), &ScoringConfig::default(), 0.3, 10);
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_rank_prefers_recent_on_equal_relevance() {
        let now = Utc::now();
        let mut stale = item("stale", vec![1.0, 0.0]);
        stale.last_accessed = now - Duration::days(30);
        let fresh = item("fresh", vec![1.0, 0.0]);

        let ranked = rank_items(vec![stale, fresh], &[1.0, 0.0], now, &ScoringConfig::default(), 0.3, 10);
        assert_eq!(ranked[0].item.content, "fresh");
    }

    #[test]
    fn test_ties_keep_input_order() {
        let now = Utc::now();
        let mut first = item("first", vec![1.0, 0.0]);
        let mut second = item("second", vec![1.0, 0.0]);
        first.last_accessed = now;
        second.last_accessed = now;

        let ranked = rank_items(vec![first, second], &[1.0, 0.0], now, &ScoringConfig::default(), 0.3, 10);
        assert_eq!(ranked[0].item.content, "first");
        assert_eq!(ranked[1].item.content, "second");
    }

    #[test]
    fn test_triple_filter_drops_fully_superseded_items() {
        let covered_active = retrieved("User likes coffee");
        let covered_inactive = retrieved("User lives in Busan");
        let uncovered = retrieved("User has a cat");

        let triples = vec![
            triple_for(covered_active.item.id, "likes", "coffee", true),
            triple_for(covered_inactive.item.id, "lives_in", "Busan", false),
        ];
        let (kept, context) = apply_triple_filter(
            vec![covered_active, covered_inactive, uncovered],
            &triples,
            5,
        );

        let contents: Vec<&str> = kept.iter().map(|r| r.item.content.as_str()).collect();
        assert_eq!(contents, vec!["User likes coffee", "User has a cat"]);
        assert_eq!(context, "user likes coffee");
    }

    #[test]
    fn test_triple_context_deduplicates_and_limits() {
        let id = Uuid::new_v4();
        let triples = vec![
            triple_for(id, "likes", "coffee", true),
            triple_for(id, "loves", "coffee", true),
            triple_for(id, "knows", "Rust", true),
            triple_for(id, "knows", "Python", true),
        ];
        let (_, context) = apply_triple_filter(Vec::new(), &triples, 2);
        assert_eq!(context, "user likes coffee; user knows Rust");
    }

    #[test]
    fn test_item_without_triples_passes_through() {
        let plain = retrieved("User has a cat");
        let other = triple_for(Uuid::new_v4(), "likes", "tea", true);
        let (kept, _) = apply_triple_filter(vec![plain], &[other], 5);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_quick_context_formats() {
        assert_eq!(quick_context(&[], ""), NO_RESULTS);

        let items = vec![retrieved("a"), retrieved("b"), retrieved("c"), retrieved("d")];
        assert_eq!(quick_context(&items, ""), "Relevant context: a; b; c");
        assert_eq!(
            quick_context(&items[..1], "user likes tea"),
            "[Precise facts] user likes tea | Relevant context: a"
        );
        assert_eq!(quick_context(&[], "user likes tea"), "[Precise facts] user likes tea");
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Deep".parse::<RetrievalMode>().unwrap(), RetrievalMode::Deep);
        assert!("slow".parse::<RetrievalMode>().is_err());
    }
}
