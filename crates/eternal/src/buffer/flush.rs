//! Buffer flush: conversation to long-term memory
//!
//! The flusher snapshots the buffer, asks the model for enduring facts,
//! stores them through the memorize pipeline and captures provisional
//! profile insights. Only after the facts are stored are the flushed
//! entries removed; any failure before that leaves the log intact for the
//! next attempt.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::buffer::{BufferEntry, ConversationBuffer, transcript};
use crate::config::ProfileConfig;
use crate::error::{AdvisoryError, Result};
use crate::llm::{LlmService, ProfileInsight};
use crate::memory::types::{MemoryItem, MemoryKind, Resource};
use crate::memory::{FactInput, MemorizePipeline};
use crate::vault::{Mirror, ProfileTier};

const NOTHING_MARKER: &str = "NONE";

/// Outcome of a flush
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    /// Buffer entries committed and removed
    pub flushed_messages: usize,
    pub items: Vec<MemoryItem>,
    /// Insights that passed the flush-time bar
    pub insights: Vec<ProfileInsight>,
    pub advisories: Vec<AdvisoryError>,
}

/// Parse the model's enduring-facts answer: one fact per line, optional
/// `- ` bullets, or the literal `NONE`.
pub fn parse_enduring_facts(response: &str) -> Vec<String> {
    if response.trim().eq_ignore_ascii_case(NOTHING_MARKER) {
        return Vec::new();
    }
    response
        .lines()
        .map(str::trim)
        .map(|line| line.strip_prefix("- ").unwrap_or(line).trim())
        .filter(|line| {
            !line.is_empty() && *line != "-" && !line.eq_ignore_ascii_case(NOTHING_MARKER)
        })
        .map(str::to_string)
        .collect()
}

pub struct BufferFlusher {
    buffer: Arc<Mutex<ConversationBuffer>>,
    memorize: Arc<MemorizePipeline>,
    llm: Arc<dyn LlmService>,
    mirror: Arc<dyn Mirror>,
    profile: ProfileConfig,
    flush_lock: Mutex<()>,
}

impl BufferFlusher {
    pub fn new(
        buffer: Arc<Mutex<ConversationBuffer>>,
        memorize: Arc<MemorizePipeline>,
        llm: Arc<dyn LlmService>,
        mirror: Arc<dyn Mirror>,
        profile: ProfileConfig,
    ) -> Self {
        Self {
            buffer,
            memorize,
            llm,
            mirror,
            profile,
            flush_lock: Mutex::new(()),
        }
    }

    /// Flush if the buffer has reached its token threshold
    pub async fn check_and_flush(&self) -> Result<Option<FlushReport>> {
        if !self.buffer.lock().await.should_flush() {
            return Ok(None);
        }
        self.flush().await.map(Some)
    }

    /// Commit the current buffer contents to long-term memory.
    ///
    /// Entries appended while the flush runs stay buffered. Flushes never
    /// overlap.
    pub async fn flush(&self) -> Result<FlushReport> {
        let _guard = self.flush_lock.lock().await;

        let snapshot: Vec<BufferEntry> = self.buffer.lock().await.entries().to_vec();
        if snapshot.is_empty() {
            return Ok(FlushReport::default());
        }
        info!("Flushing conversation buffer ({} messages)", snapshot.len());

        let text = transcript(&snapshot);
        let response = self.llm.extract_enduring_facts(&text).await?;
        let facts = parse_enduring_facts(&response);
        debug!(facts = facts.len(), "Enduring facts extracted");

        let mut report = FlushReport {
            flushed_messages: snapshot.len(),
            ..FlushReport::default()
        };

        if !facts.is_empty() {
            let resource = Resource::new(
                &format!("buffer/{}", chrono::Utc::now().to_rfc3339()),
                "buffer_flush",
                &text,
                serde_json::json!({ "messages": snapshot.len() }),
            );
            let inputs = facts
                .iter()
                .map(|fact| FactInput::new(fact, MemoryKind::Fact))
                .collect();
            let stored = self.memorize.store_facts(inputs, resource).await?;
            report.items = stored.items;
            report.advisories = stored.advisories;
        }

        self.capture_insights(&text, &mut report).await;

        self.buffer.lock().await.drain_front(snapshot.len()).await?;
        info!(
            messages = report.flushed_messages,
            items = report.items.len(),
            "Buffer flushed"
        );
        Ok(report)
    }

    /// Capture-now profile insights with the low flush-time bar
    async fn capture_insights(&self, text: &str, report: &mut FlushReport) {
        let insights = match self.llm.extract_profile_insights(text).await {
            Ok(insights) => insights,
            Err(e) => {
                warn!("Profile insight extraction failed: {}", e);
                report.advisories.push(AdvisoryError::Profile(e.to_string()));
                return;
            }
        };

        let accepted: Vec<ProfileInsight> = insights
            .into_iter()
            .filter(|i| i.meets(self.profile.flush_min_confidence, self.profile.flush_min_evidence))
            .collect();
        if accepted.is_empty() {
            return;
        }

        if let Err(e) = self
            .mirror
            .append_profile_insights(&accepted, ProfileTier::Provisional)
            .await
        {
            warn!("Recording profile insights failed: {}", e);
            report.advisories.push(e.into());
        }
        report.insights = accepted;
    }
}
