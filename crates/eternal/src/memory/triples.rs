//! Entity-level triples: predicate canonicalization, conflict detection and
//! extraction from stored items.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::llm::LlmService;
use crate::memory::types::{MemoryItem, SemanticTriple};
use crate::storage::{ItemFilter, LanceStore};

/// Synonym predicates mapped to their canonical form
const PREDICATE_ALIASES: &[(&str, &str)] = &[
    ("loves", "likes"),
    ("enjoys", "likes"),
    ("adores", "likes"),
    ("prefers", "likes"),
    ("hates", "dislikes"),
    ("despises", "dislikes"),
    ("understands", "knows"),
    ("is_called", "is_named"),
    ("named", "is_named"),
    ("works_at", "employed_by"),
    ("lives_in", "resides_in"),
];

/// Predicate pairs that contradict each other for the same subject and object
const OPPOSITE_PAIRS: &[(&str, &str)] = &[
    ("likes", "dislikes"),
    ("loves", "hates"),
    ("wants", "avoids"),
    ("prefers", "dislikes"),
    ("is", "is_not"),
    ("can", "cannot"),
];

/// Lowercase, underscore-joined, alias-resolved predicate
pub fn canonicalize_predicate(predicate: &str) -> String {
    let normalized = predicate
        .trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    PREDICATE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(normalized)
}

/// Whether two predicates contradict each other, compared in canonical form
pub fn are_opposites(a: &str, b: &str) -> bool {
    let (a, b) = (canonicalize_predicate(a), canonicalize_predicate(b));
    OPPOSITE_PAIRS.iter().any(|(x, y)| {
        let (x, y) = (canonicalize_predicate(x), canonicalize_predicate(y));
        (a == x && b == y) || (a == y && b == x)
    })
}

/// Ids of active triples that `new` contradicts.
///
/// A triple conflicts when it shares subject and predicate but has a
/// different object, or shares subject and object with an opposite predicate.
pub fn conflicting_triples(new: &SemanticTriple, existing: &[SemanticTriple]) -> Vec<Uuid> {
    let subject = new.subject.to_lowercase();
    let object = new.object.to_lowercase();

    existing
        .iter()
        .filter(|old| old.is_active && old.id != new.id)
        .filter(|old| old.subject.to_lowercase() == subject)
        .filter(|old| {
            let same_object = old.object.to_lowercase() == object;
            (old.predicate == new.predicate && !same_object)
                || (same_object && are_opposites(&old.predicate, &new.predicate))
        })
        .map(|old| old.id)
        .collect()
}

/// Extracts triples from stored items and resolves conflicts against the
/// active triple set.
pub struct TripleExtractor {
    store: Arc<LanceStore>,
    llm: Arc<dyn LlmService>,
}

impl TripleExtractor {
    pub fn new(store: Arc<LanceStore>, llm: Arc<dyn LlmService>) -> Self {
        Self { store, llm }
    }

    /// Extract, embed and store the triples of one item.
    ///
    /// Subject and object embeddings for every triple come from a single
    /// batch call. Identical active triples are skipped; conflicting ones are
    /// superseded by the new triple. Returns the number of triples stored.
    pub async fn extract_for_item(&self, item: &MemoryItem) -> Result<usize> {
        let extracted = self.llm.extract_triples(&item.content).await?;
        if extracted.is_empty() {
            self.store.set_triples_pending(item.id, false).await?;
            return Ok(0);
        }

        let mut triples: Vec<SemanticTriple> = extracted
            .into_iter()
            .map(|t| {
                let mut triple = SemanticTriple::new(&t.subject, &t.predicate, &t.object, t.context);
                triple.memory_item_id = Some(item.id);
                triple.importance = item.importance;
                triple
            })
            .collect();

        let texts: Vec<String> = triples
            .iter()
            .map(|t| t.subject.clone())
            .chain(triples.iter().map(|t| t.object.clone()))
            .collect();
        let mut embeddings = self.llm.batch_embed(&texts).await?.into_iter();
        for triple in triples.iter_mut() {
            triple.subject_embedding = embeddings.next().unwrap_or_default();
        }
        for triple in triples.iter_mut() {
            triple.object_embedding = embeddings.next().unwrap_or_default();
        }

        let mut known: HashMap<String, Vec<SemanticTriple>> = HashMap::new();
        let mut stored = 0;

        for triple in triples {
            let subject_key = triple.subject.to_lowercase();
            if !known.contains_key(&subject_key) {
                let existing = self.store.active_triples_for_subject(&triple.subject).await?;
                known.insert(subject_key.clone(), existing);
            }
            let existing = known.entry(subject_key).or_default();

            if existing.iter().any(|t| t.spo_key() == triple.spo_key()) {
                debug!("Skipping duplicate triple: {}", triple.to_natural_language());
                continue;
            }

            let conflicts = conflicting_triples(&triple, existing);
            self.store.insert_triples(std::slice::from_ref(&triple)).await?;
            for old_id in &conflicts {
                if self.store.supersede_triple(*old_id, triple.id).await? {
                    info!(old = %old_id, new = %triple.id, "Superseded triple");
                }
            }
            existing.retain(|t| !conflicts.contains(&t.id));
            existing.push(triple);
            stored += 1;
        }

        self.store.set_triples_pending(item.id, false).await?;
        debug!(item = %item.id, stored, "Extracted triples");
        Ok(stored)
    }

    /// Work through items flagged for lazy extraction.
    ///
    /// A failing item stays flagged for the next run. Returns the number of
    /// items processed successfully.
    pub async fn process_pending(&self, limit: usize) -> Result<usize> {
        let mut pending = self
            .store
            .list_items(&ItemFilter::active().pending_triples())
            .await?;
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending.truncate(limit);

        let mut processed = 0;
        for item in &pending {
            match self.extract_for_item(item).await {
                Ok(_) => processed += 1,
                Err(e) => warn!(item = %item.id, "Triple extraction failed: {}", e),
            }
        }

        if processed > 0 {
            info!("Processed {} of {} pending items", processed, pending.len());
        }
        Ok(processed)
    }
}
