//! Memorize pipeline
//!
//! Raw text becomes stored facts in five steps: record the resource,
//! extract facts, embed them in one batch, store each fact (dedup,
//! categorize, rate, persist, supersede), and note the result in the
//! timeline.
//!
//! Concurrent calls are not serialized. Two identical facts memorized at
//! the same moment may both be judged new before either is visible to the
//! other's duplicate search.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{FeatureFlags, MemorizeConfig};
use crate::error::{AdvisoryError, EternalError, Result};
use crate::llm::{LlmService, Relationship};
use crate::memory::triples::TripleExtractor;
use crate::memory::truncate_chars;
use crate::memory::types::{
    Category, MemoryItem, MemoryKind, Resource, ancestor_paths, normalize_category_path,
};
use crate::storage::{ItemFilter, LanceStore};
use crate::vault::Mirror;

/// Root categories every store starts with
pub const ROOT_CATEGORIES: &[&str] = &["knowledge", "personal", "projects", "preferences"];

const TIMELINE_SNIPPET: usize = 100;

/// One fact to store
#[derive(Debug, Clone)]
pub struct FactInput {
    pub content: String,
    pub kind: MemoryKind,
    /// Pinned importance; `None` lets the pipeline decide
    pub importance: Option<f32>,
    /// Pinned category; `None` triggers categorization
    pub category_path: Option<String>,
}

impl FactInput {
    pub fn new(content: &str, kind: MemoryKind) -> Self {
        Self {
            content: content.to_string(),
            kind,
            importance: None,
            category_path: None,
        }
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance.clamp(0.0, 1.0));
        self
    }

    pub fn in_category(mut self, path: &str) -> Self {
        self.category_path = Some(path.to_string());
        self
    }
}

/// What happened to a single fact
#[derive(Debug, Clone)]
pub enum StoreOutcome {
    Created(MemoryItem),
    /// A near-duplicate existed and was reinforced instead
    Reinforced(MemoryItem),
}

impl StoreOutcome {
    pub fn item(&self) -> &MemoryItem {
        match self {
            StoreOutcome::Created(item) | StoreOutcome::Reinforced(item) => item,
        }
    }
}

/// Result of a memorize call.
///
/// `advisories` lists best-effort steps that failed; the items were stored
/// regardless.
#[derive(Debug, Clone, Default)]
pub struct MemorizeReport {
    pub items: Vec<MemoryItem>,
    pub created: usize,
    pub reinforced: usize,
    pub advisories: Vec<AdvisoryError>,
}

impl MemorizeReport {
    fn record(&mut self, outcome: StoreOutcome, advisories: Vec<AdvisoryError>) {
        match outcome {
            StoreOutcome::Created(item) => {
                self.created += 1;
                self.items.push(item);
            }
            StoreOutcome::Reinforced(item) => {
                self.reinforced += 1;
                self.items.push(item);
            }
        }
        self.advisories.extend(advisories);
    }
}

pub struct MemorizePipeline {
    store: Arc<LanceStore>,
    llm: Arc<dyn LlmService>,
    mirror: Arc<dyn Mirror>,
    config: MemorizeConfig,
    features: FeatureFlags,
    triples: TripleExtractor,
}

impl MemorizePipeline {
    pub fn new(
        store: Arc<LanceStore>,
        llm: Arc<dyn LlmService>,
        mirror: Arc<dyn Mirror>,
        config: MemorizeConfig,
        features: FeatureFlags,
    ) -> Self {
        let triples = TripleExtractor::new(store.clone(), llm.clone());
        Self {
            store,
            llm,
            mirror,
            config,
            features,
            triples,
        }
    }

    /// Extract facts from `text` and store each of them.
    ///
    /// `metadata` is kept on the resource; `uri` and `modality` keys
    /// override the defaults. Nothing worth storing yields an empty report.
    pub async fn memorize(&self, text: &str, metadata: serde_json::Value) -> Result<MemorizeReport> {
        let mut report = MemorizeReport::default();

        let uri = metadata
            .get("uri")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("conversation/{}", chrono::Utc::now().to_rfc3339()));
        let modality = metadata
            .get("modality")
            .and_then(|v| v.as_str())
            .unwrap_or("conversation")
            .to_string();
        let resource = Resource::new(&uri, &modality, text, metadata);
        self.store.insert_resource(&resource).await?;

        let facts = match self.llm.extract_facts(text).await {
            Ok(facts) => facts,
            Err(e) => {
                warn!("Fact extraction failed, storing nothing: {}", e);
                Vec::new()
            }
        };
        let facts: Vec<_> = facts
            .into_iter()
            .filter(|f| !f.content.trim().is_empty())
            .collect();

        if facts.is_empty() {
            debug!("No facts extracted from input");
            self.timeline(
                &format!("Nothing to store from: {}", truncate_chars(text, TIMELINE_SNIPPET)),
                &mut report.advisories,
            )
            .await;
            return Ok(report);
        }

        let inputs: Vec<FactInput> = facts
            .into_iter()
            .map(|fact| {
                let mut input = FactInput::new(&fact.content, fact.kind);
                input.importance = fact.importance;
                input
            })
            .collect();
        self.store_batch(inputs, Some(resource.id), &mut report).await?;

        self.timeline(
            &format!(
                "Stored {} memories ({} new, {} reinforced) from: {}",
                report.items.len(),
                report.created,
                report.reinforced,
                truncate_chars(text, TIMELINE_SNIPPET)
            ),
            &mut report.advisories,
        )
        .await;

        info!(
            created = report.created,
            reinforced = report.reinforced,
            advisories = report.advisories.len(),
            "Memorized input"
        );
        Ok(report)
    }

    /// Store one fact directly, skipping extraction
    pub async fn save_fact(&self, fact: FactInput) -> Result<MemorizeReport> {
        let resource = Resource::new(
            &format!("direct/{}", chrono::Utc::now().to_rfc3339()),
            "direct",
            &fact.content,
            serde_json::json!({}),
        );
        let snippet = truncate_chars(&fact.content, TIMELINE_SNIPPET);
        let report = self.store_facts(vec![fact], resource).await?;
        if report.items.is_empty() {
            return Err(EternalError::Memory(format!("Fact was not stored: {snippet}")));
        }
        Ok(report)
    }

    /// Store already-extracted facts under one resource.
    ///
    /// All facts are embedded in a single batch call.
    pub async fn store_facts(
        &self,
        facts: Vec<FactInput>,
        resource: Resource,
    ) -> Result<MemorizeReport> {
        let mut report = MemorizeReport::default();
        self.store.insert_resource(&resource).await?;

        let facts: Vec<FactInput> = facts
            .into_iter()
            .filter(|f| !f.content.trim().is_empty())
            .collect();
        if facts.is_empty() {
            return Ok(report);
        }

        let count = facts.len();
        let snippet = truncate_chars(&facts[0].content, TIMELINE_SNIPPET);
        self.store_batch(facts, Some(resource.id), &mut report).await?;

        let entry = if count == 1 {
            format!("Stored memory: {snippet}")
        } else {
            format!(
                "Stored {} memories ({} new, {} reinforced) from {}",
                report.items.len(),
                report.created,
                report.reinforced,
                resource.modality
            )
        };
        self.timeline(&entry, &mut report.advisories).await;
        Ok(report)
    }

    /// Embed `facts` in one call and store each of them.
    ///
    /// A model failure while storing one fact skips only that fact; store
    /// errors abort the batch.
    async fn store_batch(
        &self,
        facts: Vec<FactInput>,
        resource_id: Option<Uuid>,
        report: &mut MemorizeReport,
    ) -> Result<()> {
        let contents: Vec<String> = facts.iter().map(|f| f.content.clone()).collect();
        let embeddings = self.llm.batch_embed(&contents).await.map_err(|e| {
            warn!("Embedding {} facts failed: {}", contents.len(), e);
            EternalError::from(e)
        })?;
        if embeddings.len() != contents.len() {
            return Err(EternalError::Memory(format!(
                "Embedding count mismatch: {} facts, {} embeddings",
                contents.len(),
                embeddings.len()
            )));
        }

        for (fact, embedding) in facts.into_iter().zip(embeddings) {
            match self.store_single_memory(fact, embedding, resource_id).await {
                Ok((outcome, advisories)) => report.record(outcome, advisories),
                Err(EternalError::Llm(e)) => {
                    warn!("Skipping fact after model failure: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Store one fact with a precomputed embedding.
    ///
    /// Steps run strictly in order: duplicate check, categorization,
    /// importance refinement, persist, supersession check.
    pub async fn store_single_memory(
        &self,
        fact: FactInput,
        embedding: Vec<f32>,
        resource_id: Option<Uuid>,
    ) -> Result<(StoreOutcome, Vec<AdvisoryError>)> {
        let mut advisories = Vec::new();

        if let Some(existing) = self.find_duplicate(&embedding).await? {
            let reinforced = self.reinforce(existing, &mut advisories).await?;
            return Ok((StoreOutcome::Reinforced(reinforced), advisories));
        }

        let path = match &fact.category_path {
            Some(path) => normalize_category_path(path)
                .unwrap_or_else(|| self.config.fallback_category.clone()),
            None => self.categorize(&fact.content, &embedding).await?,
        };
        let category = self.ensure_category(&path).await?;

        let importance = match fact.importance {
            Some(importance) => importance,
            None => self.rate(&fact.content).await,
        };

        let mut item = MemoryItem::new(fact.content, embedding, fact.kind, path)
            .with_importance(importance)
            .with_category(&category);
        if let Some(resource_id) = resource_id {
            item = item.with_resource(resource_id);
        }
        item.triples_pending = self.features.semantic_triples && self.features.lazy_triple_extraction;

        self.store.insert_item(&item).await?;
        debug!(id = %item.id, category = %item.category_path, "Stored memory item");

        if let Err(e) = self.mirror.append_item(&item).await {
            warn!("Mirror append failed for {}: {}", item.id, e);
            advisories.push(e.into());
        }

        if self.features.semantic_triples && !self.features.lazy_triple_extraction {
            if let Err(e) = self.triples.extract_for_item(&item).await {
                warn!("Triple extraction failed for {}: {}", item.id, e);
                advisories.push(AdvisoryError::Triples(e.to_string()));
            }
        }

        if self.features.memory_supersede {
            self.supersede_older(&item, &mut advisories).await;
        }

        Ok((StoreOutcome::Created(item), advisories))
    }

    async fn find_duplicate(&self, embedding: &[f32]) -> Result<Option<MemoryItem>> {
        let nearest = self
            .store
            .search_items(embedding, &ItemFilter::active(), 1)
            .await?;
        Ok(nearest
            .into_iter()
            .find(|(_, similarity)| *similarity >= self.config.duplicate_threshold)
            .map(|(item, _)| item))
    }

    async fn reinforce(
        &self,
        mut item: MemoryItem,
        advisories: &mut Vec<AdvisoryError>,
    ) -> Result<MemoryItem> {
        item.reinforce(self.config.reinforcement_step);
        self.store.reinforce_item(&item).await?;
        info!(
            id = %item.id,
            importance = item.importance,
            mentions = item.mention_count,
            "Reinforced existing memory"
        );

        if let Err(e) = self.mirror.record_reinforcement(&item).await {
            warn!("Mirror reinforcement sync failed for {}: {}", item.id, e);
            advisories.push(e.into());
        }
        Ok(item)
    }

    /// Pick a category path from semantically close candidates.
    ///
    /// A failing model call falls back to the best candidate, then to the
    /// configured fallback path.
    async fn categorize(&self, content: &str, embedding: &[f32]) -> Result<String> {
        let candidates: Vec<String> = self
            .store
            .search_categories(embedding, self.config.category_candidates)
            .await?
            .into_iter()
            .filter(|(_, similarity)| *similarity >= self.config.category_threshold)
            .map(|(category, _)| category.path)
            .collect();

        let suggested = match self.llm.suggest_category(content, &candidates).await {
            Ok(path) => normalize_category_path(&path),
            Err(e) => {
                warn!("Category suggestion failed: {}", e);
                None
            }
        };

        Ok(suggested
            .or_else(|| candidates.into_iter().next())
            .unwrap_or_else(|| self.config.fallback_category.clone()))
    }

    /// Make sure `path` and all its ancestors exist.
    ///
    /// Missing nodes are embedded by name in one batch call and inserted
    /// together, parents first.
    pub async fn ensure_category(&self, path: &str) -> Result<Category> {
        if let Some(existing) = self.store.get_category_by_path(path).await? {
            return Ok(existing);
        }

        let mut parent_id = None;
        let mut missing = Vec::new();
        for ancestor in ancestor_paths(path) {
            if missing.is_empty() {
                if let Some(existing) = self.store.get_category_by_path(&ancestor).await? {
                    parent_id = Some(existing.id);
                    continue;
                }
            }
            missing.push(ancestor);
        }

        if missing.is_empty() {
            return self
                .store
                .get_category_by_path(path)
                .await?
                .ok_or_else(|| EternalError::Memory(format!("Invalid category path: {path}")));
        }

        let names: Vec<String> = missing
            .iter()
            .map(|p| p.rsplit('/').next().unwrap_or(p).to_string())
            .collect();
        let embeddings = self.llm.batch_embed(&names).await?;

        let mut created = Vec::with_capacity(missing.len());
        for (ancestor, embedding) in missing.iter().zip(embeddings) {
            let category = Category::new(ancestor, parent_id, embedding);
            parent_id = Some(category.id);
            created.push(category);
        }
        self.store.insert_categories(&created).await?;
        debug!(path, created = created.len(), "Created category chain");

        created
            .pop()
            .ok_or_else(|| EternalError::Memory(format!("Invalid category path: {path}")))
    }

    /// Create any missing standard root category, embedding all of them in
    /// one call. Returns how many were created.
    pub async fn seed_root_categories(&self) -> Result<usize> {
        let mut missing = Vec::new();
        for root in ROOT_CATEGORIES {
            if self.store.get_category_by_path(root).await?.is_none() {
                missing.push(root.to_string());
            }
        }
        if missing.is_empty() {
            return Ok(0);
        }

        let embeddings = self.llm.batch_embed(&missing).await?;
        let roots: Vec<Category> = missing
            .iter()
            .zip(embeddings)
            .map(|(path, embedding)| Category::new(path, None, embedding))
            .collect();
        self.store.insert_categories(&roots).await?;
        info!("Seeded {} root categories", roots.len());
        Ok(roots.len())
    }

    /// Importance from the model when rating is enabled, else the default.
    /// Never fails.
    async fn rate(&self, content: &str) -> f32 {
        if !self.features.importance_rating {
            return self.config.default_importance;
        }
        match self.llm.rate_importance(content).await {
            Ok(importance) => importance.clamp(0.0, 1.0),
            Err(e) => {
                warn!("Importance rating failed, using default: {}", e);
                self.config.default_importance
            }
        }
    }

    /// Mark older items that the new one updates as superseded.
    ///
    /// Only candidates in the band between the supersede and duplicate
    /// thresholds are classified. Failures become advisories.
    async fn supersede_older(&self, item: &MemoryItem, advisories: &mut Vec<AdvisoryError>) {
        let candidates = match self
            .store
            .search_items(
                &item.embedding,
                &ItemFilter::active().excluding(item.id),
                self.config.supersede_candidates,
            )
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Supersession search failed: {}", e);
                advisories.push(AdvisoryError::Supersession(e.to_string()));
                return;
            }
        };

        for (old, similarity) in candidates {
            if similarity < self.config.supersede_threshold
                || similarity >= self.config.duplicate_threshold
            {
                continue;
            }

            let verdict = match self
                .llm
                .is_update_or_correction(&item.content, &old.content)
                .await
            {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!("Relationship check failed for {}: {}", old.id, e);
                    advisories.push(AdvisoryError::Supersession(e.to_string()));
                    continue;
                }
            };

            if verdict != Relationship::Update {
                continue;
            }

            match self.store.supersede_item(old.id, item.id).await {
                Ok(true) => info!(old = %old.id, new = %item.id, "Superseded memory"),
                Ok(false) => debug!(old = %old.id, "Already superseded"),
                Err(e) => {
                    warn!("Supersession of {} failed: {}", old.id, e);
                    advisories.push(AdvisoryError::Supersession(e.to_string()));
                }
            }
        }
    }

    async fn timeline(&self, entry: &str, advisories: &mut Vec<AdvisoryError>) {
        if let Err(e) = self.mirror.append_timeline(entry).await {
            warn!("Timeline append failed: {}", e);
            advisories.push(e.into());
        }
    }
}
