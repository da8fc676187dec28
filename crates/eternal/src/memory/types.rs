//! Memory types for the Eternal store
//!
//! Defines the persisted entities: memory items, categories, semantic
//! triples, raw resources and scheduled tasks.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::memory::triples::canonicalize_predicate;

/// A single durable fact stored in the Eternal system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique identifier for this item
    pub id: Uuid,
    /// The fact itself
    pub content: String,
    /// Owning category, if resolved
    pub category_id: Option<Uuid>,
    /// Full slash-delimited category path (e.g. `knowledge/coding/python`)
    pub category_path: String,
    /// Raw input this fact was extracted from
    pub resource_id: Option<Uuid>,
    /// What kind of fact this is
    pub kind: MemoryKind,
    /// Confidence in the fact, 0.0-1.0
    pub confidence: f32,
    /// Importance, 0.0-1.0, raised by reinforcement
    pub importance: f32,
    /// How many times this fact has been stated
    pub mention_count: u32,
    /// False once superseded; inactive items are terminal
    pub is_active: bool,
    /// The item that replaced this one
    pub superseded_by: Option<Uuid>,
    /// Waiting for lazy triple extraction
    pub triples_pending: bool,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Vector embedding of `content`
    pub embedding: Vec<f32>,
}

impl MemoryItem {
    /// Create a new active item with default confidence (1.0) and importance (0.5)
    pub fn new(content: String, embedding: Vec<f32>, kind: MemoryKind, category_path: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content,
            category_id: None,
            category_path,
            resource_id: None,
            kind,
            confidence: 1.0,
            importance: 0.5,
            mention_count: 1,
            is_active: true,
            superseded_by: None,
            triples_pending: false,
            created_at: now,
            last_accessed: now,
            embedding,
        }
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_category(mut self, category: &Category) -> Self {
        self.category_id = Some(category.id);
        self.category_path = category.path.clone();
        self
    }

    pub fn with_resource(mut self, resource_id: Uuid) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    /// Apply a reinforcement: bump importance (saturating at 1.0), count the
    /// mention and refresh the access time.
    pub fn reinforce(&mut self, step: f32) {
        self.importance = (self.importance + step).min(1.0);
        self.mention_count += 1;
        self.last_accessed = Utc::now();
    }

    /// Hours elapsed since last access, never negative
    pub fn hours_since_access(&self, now: DateTime<Utc>) -> f32 {
        let secs = (now - self.last_accessed).num_seconds().max(0);
        secs as f32 / 3600.0
    }
}

/// Classification of stored facts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    #[default]
    Fact,
    Preference,
    Event,
    Plan,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Fact => "fact",
            MemoryKind::Preference => "preference",
            MemoryKind::Event => "event",
            MemoryKind::Plan => "plan",
        }
    }

    /// Lenient parse used for model output; unknown kinds become `Fact`
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fact" => Ok(MemoryKind::Fact),
            "preference" => Ok(MemoryKind::Preference),
            "event" => Ok(MemoryKind::Event),
            "plan" => Ok(MemoryKind::Plan),
            other => Err(format!("Unknown memory kind: {other}")),
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in the category hierarchy, addressed by its full path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    /// Last path segment
    pub name: String,
    /// Full path, globally unique
    pub path: String,
    pub parent_id: Option<Uuid>,
    pub summary: Option<String>,
    /// Set by consolidation when the category grows past the item ceiling
    pub needs_reorganization: bool,
    pub last_accessed: DateTime<Utc>,
    /// Embedding over the category name
    pub embedding: Vec<f32>,
}

impl Category {
    pub fn new(path: &str, parent_id: Option<Uuid>, embedding: Vec<f32>) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Self {
            id: Uuid::new_v4(),
            name,
            path: path.to_string(),
            parent_id,
            summary: None,
            needs_reorganization: false,
            last_accessed: Utc::now(),
            embedding,
        }
    }

    /// Path of the parent node, `None` for roots
    pub fn parent_path(&self) -> Option<&str> {
        self.path.rsplit_once('/').map(|(parent, _)| parent)
    }
}

/// Normalize a category path: lowercase, trimmed segments, no empty segments.
///
/// Returns `None` when nothing usable is left.
pub fn normalize_category_path(raw: &str) -> Option<String> {
    let segments: Vec<String> = raw
        .trim()
        .trim_matches('"')
        .split('/')
        .map(|s| s.trim().to_lowercase().replace(' ', "_"))
        .filter(|s| !s.is_empty())
        .collect();

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Every prefix of a path, root first: `a/b/c` yields `a`, `a/b`, `a/b/c`
pub fn ancestor_paths(path: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(segment);
        paths.push(current.clone());
    }
    paths
}

/// An atomic subject-predicate-object fact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticTriple {
    pub id: Uuid,
    /// Item this triple was extracted from
    pub memory_item_id: Option<Uuid>,
    pub subject: String,
    /// Canonical predicate (see [`canonicalize_predicate`])
    pub predicate: String,
    pub object: String,
    pub context: Option<String>,
    pub importance: f32,
    pub confidence: f32,
    pub is_active: bool,
    pub superseded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub subject_embedding: Vec<f32>,
    pub object_embedding: Vec<f32>,
}

impl SemanticTriple {
    /// Create an active triple; the predicate is canonicalized here so every
    /// stored triple is comparable.
    pub fn new(subject: &str, predicate: &str, object: &str, context: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            memory_item_id: None,
            subject: subject.trim().to_string(),
            predicate: canonicalize_predicate(predicate),
            object: object.trim().to_string(),
            context: context.filter(|c| !c.trim().is_empty()),
            importance: 0.5,
            confidence: 1.0,
            is_active: true,
            superseded_by: None,
            created_at: now,
            last_accessed: now,
            subject_embedding: Vec::new(),
            object_embedding: Vec::new(),
        }
    }

    /// Render as a sentence: `user likes coffee (in the morning)`
    pub fn to_natural_language(&self) -> String {
        let mut text = format!(
            "{} {} {}",
            self.subject,
            self.predicate.replace('_', " "),
            self.object
        );
        if let Some(context) = &self.context {
            text.push_str(&format!(" ({context})"));
        }
        text
    }

    /// Key used to deduplicate rendered triples
    pub fn spo_key(&self) -> (String, String, String) {
        (
            self.subject.to_lowercase(),
            self.predicate.clone(),
            self.object.to_lowercase(),
        )
    }
}

/// Immutable record of a raw input kept for traceability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub uri: String,
    /// e.g. "conversation", "file", "reflection"
    pub modality: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Resource {
    pub fn new(uri: &str, modality: &str, content: &str, metadata: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            uri: uri.to_string(),
            modality: modality.to_string(),
            content: content.to_string(),
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// Job kinds the scheduler knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Maintenance,
    DailyReflection,
    WeeklySummary,
    MonthlySummary,
    ProfileReflection,
    VaultBackup,
    StatsSnapshot,
    LazyTripleExtraction,
    /// Jobs registered in code whose body is supplied by the caller
    Custom,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Maintenance => "maintenance",
            JobType::DailyReflection => "daily_reflection",
            JobType::WeeklySummary => "weekly_summary",
            JobType::MonthlySummary => "monthly_summary",
            JobType::ProfileReflection => "profile_reflection",
            JobType::VaultBackup => "vault_backup",
            JobType::StatsSnapshot => "stats_snapshot",
            JobType::LazyTripleExtraction => "lazy_triple_extraction",
            JobType::Custom => "custom",
        }
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "maintenance" => Ok(JobType::Maintenance),
            "daily_reflection" => Ok(JobType::DailyReflection),
            "weekly_summary" => Ok(JobType::WeeklySummary),
            "monthly_summary" => Ok(JobType::MonthlySummary),
            "profile_reflection" => Ok(JobType::ProfileReflection),
            "vault_backup" => Ok(JobType::VaultBackup),
            "stats_snapshot" => Ok(JobType::StatsSnapshot),
            "lazy_triple_extraction" => Ok(JobType::LazyTripleExtraction),
            "custom" => Ok(JobType::Custom),
            other => Err(format!("Unknown job type: {other}")),
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted description of a scheduled job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    /// Unique job name
    pub name: String,
    pub job_type: JobType,
    pub interval_seconds: u64,
    pub enabled: bool,
    /// System jobs cannot be removed
    pub is_system: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    pub fn new(name: &str, job_type: JobType, interval_seconds: u64, is_system: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            job_type,
            interval_seconds,
            enabled: true,
            is_system,
            last_run: None,
            next_run: None,
        }
    }

    /// The interval as a duration, `None` when it does not fit a timestamp
    /// offset
    pub fn interval(&self) -> Option<TimeDelta> {
        let seconds = i64::try_from(self.interval_seconds).ok()?;
        let interval = TimeDelta::try_seconds(seconds)?;
        Utc::now().checked_add_signed(interval)?;
        Some(interval)
    }

    /// A job that has never run is due immediately. An unrepresentable
    /// interval is never due again.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match (self.last_run, self.interval()) {
            (None, _) => true,
            (Some(last), Some(interval)) => now - last >= interval,
            (Some(_), None) => false,
        }
    }

    /// Record a completed run
    pub fn mark_run(&mut self, at: DateTime<Utc>) {
        self.last_run = Some(at);
        self.next_run = self
            .interval()
            .and_then(|interval| at.checked_add_signed(interval));
    }
}
