//! Language model capability trait
//!
//! Defines the LlmService trait the pipelines call for extraction,
//! embedding, classification and summarization. Prompts and transport are
//! the adapter's business.

use async_trait::async_trait;

use crate::llm::types::{
    DailyReflection, ExtractedFact, ExtractedTriple, LlmError, MonthlySummary, ProfileInsight,
    Relationship, WeeklySummary,
};

/// Capability interface over a language model and embedding provider
///
/// Every call may fail. Callers decide which failures are fatal: fact
/// extraction and embedding abort the fact being processed, everything else
/// falls back to a safe default.
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Split input into independent facts
    async fn extract_facts(&self, text: &str) -> Result<Vec<ExtractedFact>, LlmError>;

    /// Embed many texts in one round-trip, preserving order
    async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Embed one text (a batch of one)
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.batch_embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)
    }

    /// Rewrite a possibly vague query into a concrete search query
    async fn evolve_query(&self, query: &str, context: &str) -> Result<String, LlmError>;

    /// Deep mode: synthesize an answer from retrieved memories
    async fn reason_from_context(
        &self,
        query: &str,
        items: &[String],
        summaries: &[String],
    ) -> Result<String, LlmError>;

    /// Pick or extend a category path for a fact from nearby candidates
    async fn suggest_category(&self, fact: &str, candidates: &[String])
    -> Result<String, LlmError>;

    /// Summarize a category from its member facts
    async fn summarize_category(&self, path: &str, items: &[String]) -> Result<String, LlmError>;

    /// Importance normalized to 0.0-1.0
    async fn rate_importance(&self, content: &str) -> Result<f32, LlmError>;

    /// Classify how `new_content` relates to `old_content`
    async fn is_update_or_correction(
        &self,
        new_content: &str,
        old_content: &str,
    ) -> Result<Relationship, LlmError>;

    async fn extract_triples(&self, text: &str) -> Result<Vec<ExtractedTriple>, LlmError>;

    /// Short proactive context string from the current situation
    async fn predict_next_intent(
        &self,
        context: &serde_json::Value,
        patterns: &[String],
    ) -> Result<String, LlmError>;

    /// Enduring facts from a transcript as raw text: one fact per line, or
    /// the literal `NONE` when nothing is worth keeping
    async fn extract_enduring_facts(&self, transcript: &str) -> Result<String, LlmError>;

    /// Candidate user-profile insights with confidence and evidence counts
    async fn extract_profile_insights(&self, text: &str)
    -> Result<Vec<ProfileInsight>, LlmError>;

    async fn generate_daily_reflection(
        &self,
        items: &[String],
        date: &str,
    ) -> Result<DailyReflection, LlmError>;

    async fn generate_weekly_summary(
        &self,
        daily_reflections: &[String],
        week: &str,
    ) -> Result<WeeklySummary, LlmError>;

    async fn generate_monthly_summary(
        &self,
        weekly_summaries: &[String],
        month: &str,
    ) -> Result<MonthlySummary, LlmError>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}
