//! Test utilities for eternal - deterministic model and mirror doubles
//!
//! [`MockLlm`] implements [`LlmService`] without a network. Embeddings are
//! hashed bags of words, so texts sharing content words are similar and
//! identical texts are identical. Every other answer can be scripted per
//! input, and any capability can be made to fail.
//!
//! [`RecordingMirror`] keeps every mirror call in memory for assertions.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use crate::llm::{
    DailyReflection, ExtractedFact, ExtractedTriple, LlmError, LlmService, MonthlySummary,
    ProfileInsight, Relationship, WeeklySummary,
};
use crate::memory::types::MemoryItem;
use crate::vault::{Mirror, MirrorError, ProfileTier};

/// Embedding width produced by [`MockLlm`]
pub const MOCK_DIMENSION: usize = 128;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "at", "do", "does", "for", "i", "in", "is", "it", "my", "of", "on",
    "the", "to", "was", "what", "where", "who", "with",
];

/// Content words of `text`: lowercased, stop words dropped, trailing plural
/// `s` removed
pub fn content_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(&w.as_str()))
        .map(|w| match w.strip_suffix('s') {
            Some(stem) if stem.len() > 2 => stem.to_string(),
            _ => w,
        })
        .collect()
}

/// Deterministic unit-length bag-of-words embedding
pub fn mock_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; MOCK_DIMENSION];
    for word in content_words(text) {
        let mut hasher = DefaultHasher::new();
        word.hash(&mut hasher);
        vector[(hasher.finish() % MOCK_DIMENSION as u64) as usize] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        // Texts without content words still need a valid vector
        vector[0] = 1.0;
    } else {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

/// Scriptable in-process [`LlmService`]
#[derive(Default)]
pub struct MockLlm {
    facts: DashMap<String, Vec<ExtractedFact>>,
    embeddings: DashMap<String, Vec<f32>>,
    categories: DashMap<String, String>,
    triples: DashMap<String, Vec<ExtractedTriple>>,
    evolved: DashMap<String, String>,
    relationship: Mutex<Option<Relationship>>,
    importance: Mutex<Option<f32>>,
    enduring_facts: Mutex<Option<String>>,
    insights: Mutex<Vec<ProfileInsight>>,
    failing: DashSet<&'static str>,
    calls: DashMap<&'static str, usize>,
    embed_batches: Mutex<Vec<Vec<String>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Facts returned when `text` is extracted. Unscripted input yields
    /// the whole text as a single fact.
    pub fn with_facts(self, text: &str, facts: Vec<ExtractedFact>) -> Self {
        self.facts.insert(text.to_string(), facts);
        self
    }

    pub fn with_embedding(self, text: &str, embedding: Vec<f32>) -> Self {
        self.embeddings.insert(text.to_string(), embedding);
        self
    }

    /// Category suggested for `fact`. Unscripted facts get `knowledge/general`.
    pub fn with_category(self, fact: &str, path: &str) -> Self {
        self.categories.insert(fact.to_string(), path.to_string());
        self
    }

    pub fn with_triples(self, text: &str, triples: Vec<ExtractedTriple>) -> Self {
        self.triples.insert(text.to_string(), triples);
        self
    }

    pub fn with_evolved_query(self, query: &str, evolved: &str) -> Self {
        self.evolved.insert(query.to_string(), evolved.to_string());
        self
    }

    /// Verdict for every supersession check. Defaults to `Add`.
    pub fn with_relationship(self, relationship: Relationship) -> Self {
        *locked(&self.relationship) = Some(relationship);
        self
    }

    pub fn with_importance(self, importance: f32) -> Self {
        *locked(&self.importance) = Some(importance);
        self
    }

    /// Raw enduring-facts answer. Defaults to `NONE`.
    pub fn with_enduring_facts(self, response: &str) -> Self {
        *locked(&self.enduring_facts) = Some(response.to_string());
        self
    }

    pub fn with_insights(self, insights: Vec<ProfileInsight>) -> Self {
        *locked(&self.insights) = insights;
        self
    }

    /// Make a capability fail, by method name (e.g. `"batch_embed"`)
    pub fn fail_on(self, method: &'static str) -> Self {
        self.failing.insert(method);
        self
    }

    /// Make a capability fail from now on
    pub fn set_failing(&self, method: &'static str, failing: bool) {
        if failing {
            self.failing.insert(method);
        } else {
            self.failing.remove(method);
        }
    }

    /// How many times a capability was called
    pub fn calls(&self, method: &str) -> usize {
        self.calls.get(method).map(|c| *c).unwrap_or(0)
    }

    /// Every text passed to `batch_embed`, in call order
    pub fn embedded_texts(&self) -> Vec<String> {
        locked(&self.embed_batches).concat()
    }

    /// The texts of each `batch_embed` call, one entry per call
    pub fn embed_batches(&self) -> Vec<Vec<String>> {
        locked(&self.embed_batches).clone()
    }

    fn enter(&self, method: &'static str) -> Result<(), LlmError> {
        *self.calls.entry(method).or_insert(0) += 1;
        if self.failing.contains(method) {
            return Err(LlmError::Api(format!("mock failure in {method}")));
        }
        Ok(())
    }
}

#[async_trait]
impl LlmService for MockLlm {
    async fn extract_facts(&self, text: &str) -> Result<Vec<ExtractedFact>, LlmError> {
        self.enter("extract_facts")?;
        Ok(self
            .facts
            .get(text)
            .map(|f| f.clone())
            .unwrap_or_else(|| vec![ExtractedFact::new(text, Default::default())]))
    }

    async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.enter("batch_embed")?;
        locked(&self.embed_batches).push(texts.to_vec());
        Ok(texts
            .iter()
            .map(|text| {
                self.embeddings
                    .get(text)
                    .map(|e| e.clone())
                    .unwrap_or_else(|| mock_embedding(text))
            })
            .collect())
    }

    async fn evolve_query(&self, query: &str, _context: &str) -> Result<String, LlmError> {
        self.enter("evolve_query")?;
        Ok(self
            .evolved
            .get(query)
            .map(|q| q.clone())
            .unwrap_or_else(|| query.to_string()))
    }

    async fn reason_from_context(
        &self,
        query: &str,
        items: &[String],
        _summaries: &[String],
    ) -> Result<String, LlmError> {
        self.enter("reason_from_context")?;
        Ok(format!("Answer to '{query}' from {} memories", items.len()))
    }

    async fn suggest_category(
        &self,
        fact: &str,
        _candidates: &[String],
    ) -> Result<String, LlmError> {
        self.enter("suggest_category")?;
        Ok(self
            .categories
            .get(fact)
            .map(|c| c.clone())
            .unwrap_or_else(|| "knowledge/general".to_string()))
    }

    async fn summarize_category(&self, path: &str, items: &[String]) -> Result<String, LlmError> {
        self.enter("summarize_category")?;
        Ok(format!("{path}: {} memories", items.len()))
    }

    async fn rate_importance(&self, _content: &str) -> Result<f32, LlmError> {
        self.enter("rate_importance")?;
        Ok(locked(&self.importance).unwrap_or(0.5))
    }

    async fn is_update_or_correction(
        &self,
        _new_content: &str,
        _old_content: &str,
    ) -> Result<Relationship, LlmError> {
        self.enter("is_update_or_correction")?;
        Ok(locked(&self.relationship).unwrap_or(Relationship::Add))
    }

    async fn extract_triples(&self, text: &str) -> Result<Vec<ExtractedTriple>, LlmError> {
        self.enter("extract_triples")?;
        Ok(self.triples.get(text).map(|t| t.clone()).unwrap_or_default())
    }

    async fn predict_next_intent(
        &self,
        _context: &serde_json::Value,
        patterns: &[String],
    ) -> Result<String, LlmError> {
        self.enter("predict_next_intent")?;
        Ok(format!("Likely continuing recent work ({} patterns)", patterns.len()))
    }

    async fn extract_enduring_facts(&self, _transcript: &str) -> Result<String, LlmError> {
        self.enter("extract_enduring_facts")?;
        Ok(locked(&self.enduring_facts)
            .clone()
            .unwrap_or_else(|| "NONE".to_string()))
    }

    async fn extract_profile_insights(
        &self,
        _text: &str,
    ) -> Result<Vec<ProfileInsight>, LlmError> {
        self.enter("extract_profile_insights")?;
        Ok(locked(&self.insights).clone())
    }

    async fn generate_daily_reflection(
        &self,
        items: &[String],
        _date: &str,
    ) -> Result<DailyReflection, LlmError> {
        self.enter("generate_daily_reflection")?;
        Ok(DailyReflection {
            summary: format!("Reflected on {} memories", items.len()),
            key_events: items.iter().take(3).cloned().collect(),
            sentiment: "neutral".to_string(),
            insights: String::new(),
        })
    }

    async fn generate_weekly_summary(
        &self,
        daily_reflections: &[String],
        _week: &str,
    ) -> Result<WeeklySummary, LlmError> {
        self.enter("generate_weekly_summary")?;
        Ok(WeeklySummary {
            summary: format!("Summarized {} days", daily_reflections.len()),
            ..WeeklySummary::default()
        })
    }

    async fn generate_monthly_summary(
        &self,
        weekly_summaries: &[String],
        _month: &str,
    ) -> Result<MonthlySummary, LlmError> {
        self.enter("generate_monthly_summary")?;
        Ok(MonthlySummary {
            summary: format!("Summarized {} weeks", weekly_summaries.len()),
            ..MonthlySummary::default()
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// One call received by [`RecordingMirror`]
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    Timeline(String),
    Item { id: Uuid, content: String },
    Reinforcement { id: Uuid, mention_count: u32 },
    Summary { path: String, summary: String },
    Profile { tier: ProfileTier, insights: Vec<String> },
    Backup,
}

/// In-memory [`Mirror`] that records calls, or rejects them all
#[derive(Default)]
pub struct RecordingMirror {
    events: Mutex<Vec<MirrorEvent>>,
    failing: bool,
}

impl RecordingMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mirror whose every call fails
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn events(&self) -> Vec<MirrorEvent> {
        locked(&self.events).clone()
    }

    pub fn timeline(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MirrorEvent::Timeline(entry) => Some(entry),
                _ => None,
            })
            .collect()
    }

    pub fn summaries(&self) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MirrorEvent::Summary { path, summary } => Some((path, summary)),
                _ => None,
            })
            .collect()
    }

    /// Insight texts written to one profile tier
    pub fn profile(&self, tier: ProfileTier) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MirrorEvent::Profile { tier: t, insights } if t == tier => Some(insights),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn record(&self, event: MirrorEvent) -> Result<(), MirrorError> {
        if self.failing {
            return Err(MirrorError::Unavailable("recording mirror set to fail".into()));
        }
        locked(&self.events).push(event);
        Ok(())
    }
}

#[async_trait]
impl Mirror for RecordingMirror {
    async fn append_timeline(&self, entry: &str) -> Result<(), MirrorError> {
        self.record(MirrorEvent::Timeline(entry.to_string()))
    }

    async fn append_item(&self, item: &MemoryItem) -> Result<(), MirrorError> {
        self.record(MirrorEvent::Item {
            id: item.id,
            content: item.content.clone(),
        })
    }

    async fn record_reinforcement(&self, item: &MemoryItem) -> Result<(), MirrorError> {
        self.record(MirrorEvent::Reinforcement {
            id: item.id,
            mention_count: item.mention_count,
        })
    }

    async fn write_category_summary(&self, path: &str, summary: &str) -> Result<(), MirrorError> {
        self.record(MirrorEvent::Summary {
            path: path.to_string(),
            summary: summary.to_string(),
        })
    }

    async fn append_profile_insights(
        &self,
        insights: &[ProfileInsight],
        tier: ProfileTier,
    ) -> Result<(), MirrorError> {
        self.record(MirrorEvent::Profile {
            tier,
            insights: insights.iter().map(|i| i.content.clone()).collect(),
        })
    }

    async fn backup(&self) -> Result<PathBuf, MirrorError> {
        self.record(MirrorEvent::Backup)?;
        Ok(PathBuf::from("memory://backup"))
    }
}
