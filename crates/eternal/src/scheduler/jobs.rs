//! Built-in job bodies
//!
//! Reflections feed back into the store as ordinary memory items under
//! `reflections/{daily,weekly,monthly}`, so later retrievals and roll-ups see
//! them like any other fact.

use std::sync::Arc;

use chrono::{Duration, Local, Utc};
use futures::FutureExt;
use tracing::{debug, info};

use crate::config::{Config, ProfileConfig};
use crate::consolidate::ConsolidationPipeline;
use crate::error::{EternalError, Result};
use crate::llm::LlmService;
use crate::llm::prompts::bullet_list;
use crate::memory::types::{JobType, MemoryItem, MemoryKind, Resource, ScheduledTask};
use crate::memory::{FactInput, MemorizePipeline, TripleExtractor};
use crate::scheduler::JobHandler;
use crate::storage::{ItemFilter, LanceStore};
use crate::vault::{Mirror, ProfileTier};

pub const DAILY_REFLECTIONS: &str = "reflections/daily";
pub const WEEKLY_SUMMARIES: &str = "reflections/weekly";
pub const MONTHLY_SUMMARIES: &str = "reflections/monthly";

const REFLECTION_IMPORTANCE: f32 = 0.6;
const REFLECTION_ITEM_LIMIT: usize = 50;

/// Everything the built-in jobs need, shared by every handler
pub struct JobContext {
    pub store: Arc<LanceStore>,
    pub llm: Arc<dyn LlmService>,
    pub mirror: Arc<dyn Mirror>,
    pub memorize: Arc<MemorizePipeline>,
    pub consolidation: Arc<ConsolidationPipeline>,
    pub triples: Arc<TripleExtractor>,
    pub profile: ProfileConfig,
    pub lazy_triple_batch: usize,
}

/// The system jobs with their configured intervals
pub fn builtin_tasks(config: &Config) -> Vec<ScheduledTask> {
    let intervals = &config.scheduler;
    let mut tasks = vec![
        ScheduledTask::new("maintenance", JobType::Maintenance, intervals.maintenance_interval, true),
        ScheduledTask::new(
            "daily_reflection",
            JobType::DailyReflection,
            intervals.daily_reflection_interval,
            true,
        ),
        ScheduledTask::new(
            "weekly_summary",
            JobType::WeeklySummary,
            intervals.weekly_summary_interval,
            true,
        ),
        ScheduledTask::new(
            "monthly_summary",
            JobType::MonthlySummary,
            intervals.monthly_summary_interval,
            true,
        ),
        ScheduledTask::new(
            "profile_reflection",
            JobType::ProfileReflection,
            intervals.profile_reflection_interval,
            true,
        ),
        ScheduledTask::new("vault_backup", JobType::VaultBackup, intervals.vault_backup_interval, true),
        ScheduledTask::new(
            "stats_snapshot",
            JobType::StatsSnapshot,
            intervals.stats_snapshot_interval,
            true,
        ),
    ];

    if config.features.semantic_triples && config.features.lazy_triple_extraction {
        tasks.push(ScheduledTask::new(
            "lazy_triple_extraction",
            JobType::LazyTripleExtraction,
            intervals.lazy_triple_interval,
            true,
        ));
    }
    tasks
}

/// Handler for a known job type; `None` for `Custom`, whose body the caller
/// supplies
pub fn handler_for(job_type: JobType, ctx: Arc<JobContext>) -> Option<JobHandler> {
    let handler: JobHandler = match job_type {
        JobType::Maintenance => Arc::new(move || {
            let ctx = ctx.clone();
            async move { ctx.consolidation.run().await.map(|_| ()) }.boxed()
        }),
        JobType::DailyReflection => Arc::new(move || daily_reflection(ctx.clone()).boxed()),
        JobType::WeeklySummary => Arc::new(move || weekly_summary(ctx.clone()).boxed()),
        JobType::MonthlySummary => Arc::new(move || monthly_summary(ctx.clone()).boxed()),
        JobType::ProfileReflection => Arc::new(move || profile_reflection(ctx.clone()).boxed()),
        JobType::VaultBackup => Arc::new(move || vault_backup(ctx.clone()).boxed()),
        JobType::StatsSnapshot => Arc::new(move || stats_snapshot(ctx.clone()).boxed()),
        JobType::LazyTripleExtraction => Arc::new(move || {
            let ctx = ctx.clone();
            async move {
                ctx.triples
                    .process_pending(ctx.lazy_triple_batch)
                    .await
                    .map(|_| ())
            }
            .boxed()
        }),
        JobType::Custom => return None,
    };
    Some(handler)
}

fn is_reflection(item: &MemoryItem) -> bool {
    item.category_path == "reflections" || item.category_path.starts_with("reflections/")
}

/// Active non-reflection items created within the window
async fn recent_memories(ctx: &JobContext, window: Duration) -> Result<Vec<String>> {
    let since = Utc::now() - window;
    let items: Vec<MemoryItem> = ctx
        .store
        .list_items(&ItemFilter::active().since(since))
        .await?
        .into_iter()
        .filter(|item| !is_reflection(item))
        .collect();
    Ok(newest_in_order(items, REFLECTION_ITEM_LIMIT))
}

/// The `limit` newest items, returned oldest first
fn newest_in_order(mut items: Vec<MemoryItem>, limit: usize) -> Vec<String> {
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    items.truncate(limit);
    items.reverse();
    items.into_iter().map(|item| item.content).collect()
}

/// Active reflection items of one level created within the window, oldest first
async fn reflections_in(ctx: &JobContext, path: &str, window: Duration) -> Result<Vec<String>> {
    let since = Utc::now() - window;
    let mut items = ctx
        .store
        .list_items(&ItemFilter::active().in_category(path).since(since))
        .await?;
    items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(items.into_iter().map(|item| item.content).collect())
}

async fn store_reflection(ctx: &JobContext, path: &str, label: &str, content: String) -> Result<()> {
    let resource = Resource::new(
        &format!("{path}/{label}"),
        "reflection",
        &content,
        serde_json::json!({ "period": label }),
    );
    let fact = FactInput::new(&content, MemoryKind::Event)
        .with_importance(REFLECTION_IMPORTANCE)
        .in_category(path);
    let report = ctx.memorize.store_facts(vec![fact], resource).await?;
    if report.items.is_empty() {
        return Err(EternalError::Memory(format!("Reflection {label} was not stored")));
    }
    info!("Stored reflection {} in {}", label, path);
    Ok(())
}

async fn daily_reflection(ctx: Arc<JobContext>) -> Result<()> {
    let memories = recent_memories(&ctx, Duration::hours(24)).await?;
    if memories.is_empty() {
        info!("No memories from the last day to reflect on");
        return Ok(());
    }

    let date = Local::now().format("%Y-%m-%d").to_string();
    let reflection = ctx.llm.generate_daily_reflection(&memories, &date).await?;
    store_reflection(&ctx, DAILY_REFLECTIONS, &date, reflection.to_content(&date)).await
}

async fn weekly_summary(ctx: Arc<JobContext>) -> Result<()> {
    let dailies = reflections_in(&ctx, DAILY_REFLECTIONS, Duration::days(7)).await?;
    if dailies.is_empty() {
        info!("No daily reflections to summarize this week");
        return Ok(());
    }

    let week = Local::now().format("%G-W%V").to_string();
    let summary = ctx.llm.generate_weekly_summary(&dailies, &week).await?;
    store_reflection(&ctx, WEEKLY_SUMMARIES, &week, summary.to_content(&week)).await
}

async fn monthly_summary(ctx: Arc<JobContext>) -> Result<()> {
    let weeklies = reflections_in(&ctx, WEEKLY_SUMMARIES, Duration::days(30)).await?;
    if weeklies.is_empty() {
        info!("No weekly summaries to roll up this month");
        return Ok(());
    }

    let month = Local::now().format("%Y-%m").to_string();
    let summary = ctx.llm.generate_monthly_summary(&weeklies, &month).await?;
    store_reflection(&ctx, MONTHLY_SUMMARIES, &month, summary.to_content(&month)).await
}

/// Promote only well-evidenced insights from the last week into the curated
/// profile
async fn profile_reflection(ctx: Arc<JobContext>) -> Result<()> {
    let memories = recent_memories(&ctx, Duration::days(7)).await?;
    if memories.is_empty() {
        return Ok(());
    }

    let insights = ctx
        .llm
        .extract_profile_insights(&bullet_list(&memories, "(none)"))
        .await?;
    let total = insights.len();
    let accepted: Vec<_> = insights
        .into_iter()
        .filter(|i| {
            i.meets(
                ctx.profile.reflection_min_confidence,
                ctx.profile.reflection_min_evidence,
            )
        })
        .collect();
    debug!(total, accepted = accepted.len(), "Profile insights screened");
    if accepted.is_empty() {
        return Ok(());
    }

    ctx.mirror
        .append_profile_insights(&accepted, ProfileTier::Curated)
        .await
        .map_err(|e| EternalError::General(format!("Failed to write profile: {e}")))?;
    info!("Curated {} profile insights", accepted.len());
    Ok(())
}

async fn vault_backup(ctx: Arc<JobContext>) -> Result<()> {
    let path = ctx
        .mirror
        .backup()
        .await
        .map_err(|e| EternalError::General(format!("Vault backup failed: {e}")))?;
    info!("Vault backed up to {}", path.display());
    Ok(())
}

async fn stats_snapshot(ctx: Arc<JobContext>) -> Result<()> {
    let stats = ctx.store.stats().await?;
    info!(
        resources = stats.resources,
        categories = stats.categories,
        items = stats.items,
        active_items = stats.active_items,
        superseded_items = stats.superseded_items,
        triples = stats.triples,
        pending_triples = stats.pending_triple_items,
        "Store statistics"
    );
    Ok(())
}
