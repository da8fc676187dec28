//! Proactive context prediction
//!
//! Looks at the most recently touched memories and the caller's current
//! situation, asks the model what the user will need next, and renders a
//! context block for system prompt injection.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Local, Timelike};
use tracing::{debug, warn};

use crate::error::Result;
use crate::llm::LlmService;
use crate::memory::truncate_chars;
use crate::memory::types::{Category, MemoryItem};
use crate::storage::{ItemFilter, LanceStore};

const RECENT_ITEMS: usize = 10;
const ACTIVE_CATEGORIES: usize = 3;
const ITEMS_PER_CATEGORY: usize = 3;
const MAX_MEMORY_LINES: usize = 5;
const MEMORY_LINE_CHARS: usize = 100;

/// Behavioural hints derived from recent items and the caller's context
pub fn extract_patterns(
    recent: &[MemoryItem],
    context: &serde_json::Value,
    hour: u32,
) -> Vec<String> {
    let mut patterns = vec![
        match hour {
            6..=11 => "Morning work session",
            12..=17 => "Afternoon work session",
            18..=21 => "Evening session",
            _ => "Late night session",
        }
        .to_string(),
    ];

    if let Some(root) = dominant(recent.iter().map(|item| {
        item.category_path
            .split('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("other")
            .to_string()
    })) {
        patterns.push(format!("Currently focused on: {root}"));
    }

    if let Some(kind) = dominant(recent.iter().map(|item| item.kind.to_string())) {
        patterns.push(format!("Recent activity type: {kind}"));
    }

    if let Some(apps) = context.get("open_apps") {
        let apps = apps.to_string().to_lowercase();
        if apps.contains("code") || apps.contains("vscode") {
            patterns.push("User appears to be coding".to_string());
        }
        if apps.contains("browser") {
            patterns.push("User is browsing".to_string());
        }
    }

    patterns
}

/// Most frequent value; the earliest seen wins ties
fn dominant(values: impl Iterator<Item = String>) -> Option<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, value) in values.enumerate() {
        counts.entry(value).or_insert((0, position)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.0.cmp(&b.1.0).then(b.1.1.cmp(&a.1.1)))
        .map(|(value, _)| value)
}

/// Render the injection block
pub fn format_injection(
    prediction: &str,
    memories: &[String],
    summaries: &[(String, String)],
    now: DateTime<Local>,
) -> String {
    let mut lines = vec![
        format!("[Predicted Intent] {prediction}"),
        format!("[Current Time] {}", now.format("%Y-%m-%d %H:%M")),
    ];

    if !memories.is_empty() {
        lines.push("[Relevant Memories]".to_string());
        for memory in memories.iter().take(MAX_MEMORY_LINES) {
            if memory.chars().count() > MEMORY_LINE_CHARS {
                lines.push(format!("  - {}...", truncate_chars(memory, MEMORY_LINE_CHARS)));
            } else {
                lines.push(format!("  - {memory}"));
            }
        }
    }

    if !summaries.is_empty() {
        lines.push("[Category Summaries]".to_string());
        for (path, summary) in summaries {
            lines.push(format!("  - {path}: {summary}"));
        }
    }

    lines.join("\n")
}

pub struct PredictPipeline {
    store: Arc<LanceStore>,
    llm: Arc<dyn LlmService>,
}

impl PredictPipeline {
    pub fn new(store: Arc<LanceStore>, llm: Arc<dyn LlmService>) -> Self {
        Self { store, llm }
    }

    /// Build a proactive context block.
    ///
    /// `context` describes the caller's situation, e.g.
    /// `{"open_apps": ["vscode"], "location": "office"}`.
    pub async fn predict(&self, context: &serde_json::Value) -> Result<String> {
        let now = Local::now();
        let recent = self
            .store
            .recent_items(&ItemFilter::active(), RECENT_ITEMS)
            .await?;
        let patterns = extract_patterns(&recent, context, now.hour());

        let mut active_paths: Vec<&str> = Vec::new();
        for item in &recent {
            if !active_paths.contains(&item.category_path.as_str()) {
                active_paths.push(&item.category_path);
            }
        }
        active_paths.truncate(ACTIVE_CATEGORIES);

        let mut memories = Vec::new();
        let mut summaries = Vec::new();
        for path in &active_paths {
            let items = self
                .store
                .recent_items(&ItemFilter::active().in_category(path), ITEMS_PER_CATEGORY)
                .await?;
            memories.extend(items.into_iter().map(|item| item.content));

            if let Some(Category {
                summary: Some(summary),
                ..
            }) = self.store.get_category_by_path(path).await?
            {
                summaries.push((path.to_string(), summary));
            }
        }

        let prediction = match self.llm.predict_next_intent(context, &patterns).await {
            Ok(prediction) => prediction,
            Err(e) => {
                warn!("Intent prediction failed: {}", e);
                "No prediction available".to_string()
            }
        };
        debug!(patterns = patterns.len(), memories = memories.len(), "Predicted context");

        Ok(format_injection(&prediction, &memories, &summaries, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryKind;
    use chrono::TimeZone;

    fn item(path: &str, kind: MemoryKind) -> MemoryItem {
        MemoryItem::new("x".to_string(), vec![], kind, path.to_string())
    }

    #[test]
    fn test_time_of_day_patterns() {
        let ctx = serde_json::json!({});
        assert_eq!(extract_patterns(&[], &ctx, 9)[0], "Morning work session");
        assert_eq!(extract_patterns(&[], &ctx, 12)[0], "Afternoon work session");
        assert_eq!(extract_patterns(&[], &ctx, 21)[0], "Evening session");
        assert_eq!(extract_patterns(&[], &ctx, 3)[0], "Late night session");
        assert_eq!(extract_patterns(&[], &ctx, 22)[0], "Late night session");
    }

    #[test]
    fn test_focus_and_app_patterns() {
        let recent = vec![
            item("projects/eternal", MemoryKind::Plan),
            item("projects/website", MemoryKind::Plan),
            item("personal/health", MemoryKind::Fact),
        ];
        let ctx = serde_json::json!({"open_apps": ["VSCode", "Browser"]});
        let patterns = extract_patterns(&recent, &ctx, 10);

        assert!(patterns.contains(&"Currently focused on: projects".to_string()));
        assert!(patterns.contains(&"Recent activity type: plan".to_string()));
        assert!(patterns.contains(&"User appears to be coding".to_string()));
        assert!(patterns.contains(&"User is browsing".to_string()));
    }

    #[test]
    fn test_format_injection() {
        let now = Local.with_ymd_and_hms(2026, 1, 31, 9, 5, 0).unwrap();
        let long = "a".repeat(150);
        let memories: Vec<String> = vec![long, "short".to_string()]
            .into_iter()
            .chain((0..10).map(|i| format!("m{i}")))
            .collect();

        let text = format_injection("Reviewing PRs", &memories, &[], now);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "[Predicted Intent] Reviewing PRs");
        assert_eq!(lines[1], "[Current Time] 2026-01-31 09:05");
        assert_eq!(lines[2], "[Relevant Memories]");
        assert_eq!(lines[3], format!("  - {}...", "a".repeat(100)));
        assert_eq!(lines[4], "  - short");
        assert_eq!(lines.len(), 8);
    }

    #[test]
    fn test_format_without_memories() {
        let now = Local.with_ymd_and_hms(2026, 1, 31, 23, 0, 0).unwrap();
        let text = format_injection("Winding down", &[], &[], now);
        assert_eq!(text.lines().count(), 2);
    }
}
