//! Consolidation pipeline
//!
//! Periodic maintenance of the store: regenerate category summaries, flag
//! oversized categories for reorganization, and run datastore housekeeping.
//! Archival of stale, unimportant items exists but is off unless
//! `consolidation.archive_enabled` is set; the store is otherwise additive.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ConsolidationConfig;
use crate::error::{AdvisoryError, Result};
use crate::llm::LlmService;
use crate::memory::types::MemoryItem;
use crate::storage::{ItemFilter, LanceStore};
use crate::vault::Mirror;

/// Minimum stale items in one category before they are archived together
const ARCHIVE_GROUP_MIN: usize = 5;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidationReport {
    pub updated_summaries: usize,
    pub flagged_categories: usize,
    pub archived_items: usize,
    pub optimized: bool,
    #[serde(skip)]
    pub advisories: Vec<AdvisoryError>,
}

pub struct ConsolidationPipeline {
    store: Arc<LanceStore>,
    llm: Arc<dyn LlmService>,
    mirror: Arc<dyn Mirror>,
    config: ConsolidationConfig,
}

impl ConsolidationPipeline {
    pub fn new(
        store: Arc<LanceStore>,
        llm: Arc<dyn LlmService>,
        mirror: Arc<dyn Mirror>,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            store,
            llm,
            mirror,
            config,
        }
    }

    pub async fn run(&self) -> Result<ConsolidationReport> {
        let mut report = ConsolidationReport::default();

        if self.config.archive_enabled {
            report.archived_items = self.archive_stale(&mut report.advisories).await?;
        }

        report.updated_summaries = self.update_summaries(&mut report.advisories).await?;
        report.flagged_categories = self.flag_large_categories().await?;

        match self.store.optimize().await {
            Ok(()) => report.optimized = true,
            Err(e) => {
                warn!("Store optimization failed: {}", e);
                report
                    .advisories
                    .push(AdvisoryError::Maintenance(e.to_string()));
            }
        }

        info!(
            summaries = report.updated_summaries,
            flagged = report.flagged_categories,
            archived = report.archived_items,
            optimized = report.optimized,
            "Consolidation finished"
        );
        Ok(report)
    }

    /// Resummarize every non-empty category from its most recent items
    async fn update_summaries(&self, advisories: &mut Vec<AdvisoryError>) -> Result<usize> {
        let mut updated = 0;

        for category in self.store.list_categories().await? {
            let items = self
                .store
                .recent_items(
                    &ItemFilter::active().in_category(&category.path),
                    self.config.summary_item_limit,
                )
                .await?;
            if items.is_empty() {
                continue;
            }

            let contents: Vec<String> = items.into_iter().map(|i| i.content).collect();
            let summary = match self.llm.summarize_category(&category.path, &contents).await {
                Ok(summary) if !summary.trim().is_empty() => summary,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Summarizing {} failed: {}", category.path, e);
                    advisories.push(AdvisoryError::Maintenance(format!(
                        "summary of {}: {e}",
                        category.path
                    )));
                    continue;
                }
            };

            self.store
                .update_category_summary(category.id, &summary)
                .await?;
            if let Err(e) = self
                .mirror
                .write_category_summary(&category.path, &summary)
                .await
            {
                warn!("Mirror summary write failed for {}: {}", category.path, e);
                advisories.push(e.into());
            }
            debug!(category = %category.path, items = contents.len(), "Updated summary");
            updated += 1;
        }

        Ok(updated)
    }

    /// Flag categories above the item ceiling; clear the flag once they
    /// drop back under it.
    async fn flag_large_categories(&self) -> Result<usize> {
        let mut flagged = 0;

        for category in self.store.list_categories().await? {
            let count = self
                .store
                .count_items(&ItemFilter::active().in_category(&category.path))
                .await?;
            let oversized = count > self.config.max_category_items;

            if oversized {
                flagged += 1;
                if !category.needs_reorganization {
                    info!(
                        "Category {} has {} items, flagging for reorganization",
                        category.path, count
                    );
                }
            }
            if oversized != category.needs_reorganization {
                self.store
                    .set_category_reorganization(category.id, oversized)
                    .await?;
            }
        }

        Ok(flagged)
    }

    /// Summarize and delete stale, low-importance items.
    ///
    /// Items are grouped by category; a group is archived only when it has
    /// at least a handful of members and its summary reached the mirror.
    async fn archive_stale(&self, advisories: &mut Vec<AdvisoryError>) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(self.config.stale_days);
        let mut stale: Vec<MemoryItem> = self
            .store
            .list_items(&ItemFilter::active())
            .await?
            .into_iter()
            .filter(|i| {
                i.last_accessed < cutoff && i.importance < self.config.archive_importance_threshold
            })
            .collect();
        stale.sort_by(|a, b| a.last_accessed.cmp(&b.last_accessed));
        stale.truncate(self.config.archive_batch_limit);

        let mut groups: BTreeMap<String, Vec<MemoryItem>> = BTreeMap::new();
        for item in stale {
            groups.entry(item.category_path.clone()).or_default().push(item);
        }

        let mut archived = 0;
        for (path, items) in groups {
            if items.len() < ARCHIVE_GROUP_MIN {
                continue;
            }

            let contents: Vec<String> = items.iter().map(|i| i.content.clone()).collect();
            let archive_path = format!("archived/{path}");
            let summary = match self.llm.summarize_category(&archive_path, &contents).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!("Archive summary for {} failed: {}", path, e);
                    advisories.push(AdvisoryError::Maintenance(e.to_string()));
                    continue;
                }
            };
            if let Err(e) = self.mirror.write_category_summary(&archive_path, &summary).await {
                warn!("Archive summary for {} not written, keeping items: {}", path, e);
                advisories.push(e.into());
                continue;
            }

            let ids: Vec<Uuid> = items.iter().map(|i| i.id).collect();
            archived += self.store.delete_items(&ids).await?;
            info!("Archived {} stale items from {}", ids.len(), path);
        }

        Ok(archived)
    }
}
