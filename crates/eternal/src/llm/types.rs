//! Typed inputs and outputs of the language model capability
//!
//! Every response the core consumes from the model is parsed into one of
//! these types by the adapter, so pipelines never deal with prompt text.

use serde::{Deserialize, Deserializer, Serialize};

use crate::memory::types::MemoryKind;

/// A fact extracted from raw input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub content: String,
    #[serde(default, rename = "type", alias = "kind", deserialize_with = "lenient_kind")]
    pub kind: MemoryKind,
    /// Model-estimated importance; `None` means "use the default"
    #[serde(default)]
    pub importance: Option<f32>,
}

impl ExtractedFact {
    pub fn new(content: &str, kind: MemoryKind) -> Self {
        Self {
            content: content.to_string(),
            kind,
            importance: None,
        }
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance.clamp(0.0, 1.0));
        self
    }
}

/// How a new fact relates to an older, similar one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relationship {
    /// The new fact replaces the old one
    Update,
    /// Both facts stand
    Add,
    Unrelated,
}

impl Relationship {
    /// Parse a model verdict; anything unrecognized is treated as `Add`
    pub fn parse_verdict(text: &str) -> Self {
        let upper = text.trim().to_uppercase();
        if upper.starts_with("UPDATE") {
            Relationship::Update
        } else if upper.starts_with("UNRELATED") {
            Relationship::Unrelated
        } else {
            Relationship::Add
        }
    }
}

/// A subject-predicate-object fact as returned by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    #[serde(default)]
    pub context: Option<String>,
}

impl ExtractedTriple {
    pub fn new(subject: &str, predicate: &str, object: &str) -> Self {
        Self {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            context: None,
        }
    }
}

/// A long-term observation about the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileInsight {
    pub content: String,
    #[serde(default)]
    pub confidence: f32,
    /// Number of independent observations supporting the insight
    #[serde(default)]
    pub evidence_count: u32,
}

impl ProfileInsight {
    pub fn new(content: &str, confidence: f32, evidence_count: u32) -> Self {
        Self {
            content: content.to_string(),
            confidence,
            evidence_count,
        }
    }

    pub fn meets(&self, min_confidence: f32, min_evidence: u32) -> bool {
        self.confidence >= min_confidence && self.evidence_count >= min_evidence
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyReflection {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_events: Vec<String>,
    #[serde(default = "neutral")]
    pub sentiment: String,
    #[serde(default)]
    pub insights: String,
}

impl DailyReflection {
    /// Render as the content of a reflection memory item
    pub fn to_content(&self, date: &str) -> String {
        let mut text = format!("Daily reflection ({date}): {}", self.summary);
        if !self.key_events.is_empty() {
            text.push_str(&format!(" Key events: {}.", self.key_events.join("; ")));
        }
        if !self.insights.is_empty() {
            text.push_str(&format!(" Insights: {}", self.insights));
        }
        text.push_str(&format!(" Sentiment: {}.", self.sentiment));
        text
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeeklySummary {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub patterns: String,
    #[serde(default)]
    pub achievements: Vec<String>,
    #[serde(default)]
    pub advice: String,
}

impl WeeklySummary {
    pub fn to_content(&self, week: &str) -> String {
        let mut text = format!("Weekly summary ({week}): {}", self.summary);
        if !self.themes.is_empty() {
            text.push_str(&format!(" Themes: {}.", self.themes.join(", ")));
        }
        if !self.patterns.is_empty() {
            text.push_str(&format!(" Patterns: {}", self.patterns));
        }
        if !self.achievements.is_empty() {
            text.push_str(&format!(" Achievements: {}.", self.achievements.join("; ")));
        }
        if !self.advice.is_empty() {
            text.push_str(&format!(" Advice: {}", self.advice));
        }
        text
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthlySummary {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub trends: String,
    #[serde(default)]
    pub growth: String,
    #[serde(default)]
    pub goals: Vec<String>,
}

impl MonthlySummary {
    pub fn to_content(&self, month: &str) -> String {
        let mut text = format!("Monthly summary ({month}): {}", self.summary);
        if !self.keywords.is_empty() {
            text.push_str(&format!(" Keywords: {}.", self.keywords.join(", ")));
        }
        if !self.trends.is_empty() {
            text.push_str(&format!(" Trends: {}", self.trends));
        }
        if !self.growth.is_empty() {
            text.push_str(&format!(" Growth: {}", self.growth));
        }
        if !self.goals.is_empty() {
            text.push_str(&format!(" Goals: {}.", self.goals.join("; ")));
        }
        text
    }
}

fn lenient_kind<'de, D: Deserializer<'de>>(deserializer: D) -> Result<MemoryKind, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.map(|s| MemoryKind::parse_lenient(&s)).unwrap_or_default())
}

fn neutral() -> String {
    "neutral".to_string()
}

/// Language model provider errors
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Empty response")]
    EmptyResponse,
}
