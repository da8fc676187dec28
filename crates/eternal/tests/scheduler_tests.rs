//! Integration tests for scheduled jobs running against a full memory system

use std::sync::Arc;

use eternal_memory::EternalMemory;
use eternal_memory::config::Config;
use eternal_memory::error::EternalError;
use eternal_memory::llm::ProfileInsight;
use eternal_memory::memory::types::{JobType, MemoryKind};
use eternal_memory::scheduler::{DAILY_REFLECTIONS, MONTHLY_SUMMARIES, WEEKLY_SUMMARIES};
use eternal_memory::storage::ItemFilter;
use eternal_memory::testing::{MOCK_DIMENSION, MirrorEvent, MockLlm, RecordingMirror};
use eternal_memory::vault::ProfileTier;
use serde_json::json;
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().join("data");
    config.storage.embedding_dimension = MOCK_DIMENSION;
    config.scheduler.tick_millis = 20;
    config
}

async fn open_memory(config: &Config, llm: &Arc<MockLlm>, mirror: &Arc<RecordingMirror>) -> EternalMemory {
    EternalMemory::open(config.clone(), llm.clone(), mirror.clone())
        .await
        .unwrap()
}

mod registry_tests {
    use super::*;

    #[tokio::test]
    async fn test_builtin_jobs_are_registered() {
        let dir = TempDir::new().unwrap();
        let memory = open_memory(
            &test_config(&dir),
            &Arc::new(MockLlm::new()),
            &Arc::new(RecordingMirror::new()),
        )
        .await;

        let names: Vec<String> = memory.scheduler().jobs().into_iter().map(|j| j.name).collect();
        assert_eq!(
            names,
            vec![
                "daily_reflection",
                "maintenance",
                "monthly_summary",
                "profile_reflection",
                "stats_snapshot",
                "vault_backup",
                "weekly_summary",
            ]
        );
        assert!(memory.scheduler().jobs().iter().all(|j| j.is_system && j.enabled));
    }

    #[tokio::test]
    async fn test_lazy_triple_job_when_triples_enabled() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.features.semantic_triples = true;
        let memory = open_memory(
            &config,
            &Arc::new(MockLlm::new()),
            &Arc::new(RecordingMirror::new()),
        )
        .await;

        let job = memory.scheduler().job("lazy_triple_extraction").unwrap();
        assert_eq!(job.job_type, JobType::LazyTripleExtraction);
        assert_eq!(job.interval_seconds, config.scheduler.lazy_triple_interval);
    }

    #[tokio::test]
    async fn test_custom_job_survives_restart() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let llm = Arc::new(MockLlm::new());
        let mirror = Arc::new(RecordingMirror::new());

        {
            let memory = open_memory(&config, &llm, &mirror).await;
            memory
                .add_job("hourly_backup", JobType::VaultBackup, 3600)
                .await
                .unwrap();
            memory.scheduler().set_enabled("stats_snapshot", false).await.unwrap();
        }

        let memory = open_memory(&config, &llm, &mirror).await;
        let custom = memory.scheduler().job("hourly_backup").unwrap();
        assert!(!custom.is_system);
        assert_eq!(custom.interval_seconds, 3600);
        assert!(!memory.scheduler().job("stats_snapshot").unwrap().enabled);

        memory.scheduler().trigger("hourly_backup").await.unwrap();
        assert!(mirror.events().contains(&MirrorEvent::Backup));
    }

    #[tokio::test]
    async fn test_custom_type_needs_a_body() {
        let dir = TempDir::new().unwrap();
        let memory = open_memory(
            &test_config(&dir),
            &Arc::new(MockLlm::new()),
            &Arc::new(RecordingMirror::new()),
        )
        .await;

        let result = memory.add_job("mystery", JobType::Custom, 60).await;
        assert!(matches!(result, Err(EternalError::Scheduler(_))));
        assert!(memory.scheduler().job("mystery").is_none());
    }

    #[tokio::test]
    async fn test_custom_job_cannot_replace_system_job() {
        let dir = TempDir::new().unwrap();
        let memory = open_memory(
            &test_config(&dir),
            &Arc::new(MockLlm::new()),
            &Arc::new(RecordingMirror::new()),
        )
        .await;

        let result = memory.add_job("maintenance", JobType::VaultBackup, 60).await;
        assert!(matches!(result, Err(EternalError::Scheduler(_))));

        let job = memory.scheduler().job("maintenance").unwrap();
        assert!(job.is_system);
        assert_eq!(job.job_type, JobType::Maintenance);
        assert!(memory.scheduler().remove("maintenance").await.is_err());
    }

    #[tokio::test]
    async fn test_huge_interval_is_rejected() {
        let dir = TempDir::new().unwrap();
        let memory = open_memory(
            &test_config(&dir),
            &Arc::new(MockLlm::new()),
            &Arc::new(RecordingMirror::new()),
        )
        .await;

        let result = memory.add_job("rare", JobType::StatsSnapshot, 1 << 62).await;
        assert!(matches!(result, Err(EternalError::Scheduler(_))));
        assert!(memory.scheduler().job("rare").is_none());
    }

    #[tokio::test]
    async fn test_only_custom_jobs_can_be_removed() {
        let dir = TempDir::new().unwrap();
        let memory = open_memory(
            &test_config(&dir),
            &Arc::new(MockLlm::new()),
            &Arc::new(RecordingMirror::new()),
        )
        .await;
        memory
            .add_job("extra_stats", JobType::StatsSnapshot, 60)
            .await
            .unwrap();

        assert!(memory.scheduler().remove("maintenance").await.is_err());
        assert!(memory.scheduler().remove("extra_stats").await.unwrap());
        assert!(!memory.scheduler().remove("extra_stats").await.unwrap());
        assert!(memory.store().get_task("extra_stats").await.unwrap().is_none());
    }
}

mod reflection_tests {
    use super::*;

    #[tokio::test]
    async fn test_daily_reflection_becomes_a_memory() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(MockLlm::new());
        let mirror = Arc::new(RecordingMirror::new());
        let memory = open_memory(&test_config(&dir), &llm, &mirror).await;
        memory.memorize("User lives in Seoul", json!({})).await.unwrap();
        memory.memorize("User loves coffee", json!({})).await.unwrap();

        memory.scheduler().trigger("daily_reflection").await.unwrap();

        let reflections = memory
            .store()
            .list_items(&ItemFilter::active().in_category(DAILY_REFLECTIONS))
            .await
            .unwrap();
        assert_eq!(reflections.len(), 1);
        assert_eq!(reflections[0].kind, MemoryKind::Event);
        assert!((reflections[0].importance - 0.6).abs() < 1e-6);
        assert!(reflections[0].content.contains("Reflected on 2 memories"));

        let job = memory.scheduler().job("daily_reflection").unwrap();
        assert!(job.last_run.is_some());
        assert!(job.next_run.is_some());
    }

    #[tokio::test]
    async fn test_reflections_roll_up() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(MockLlm::new());
        let mirror = Arc::new(RecordingMirror::new());
        let memory = open_memory(&test_config(&dir), &llm, &mirror).await;
        memory.memorize("User lives in Seoul", json!({})).await.unwrap();

        memory.scheduler().trigger("daily_reflection").await.unwrap();
        memory.scheduler().trigger("weekly_summary").await.unwrap();
        memory.scheduler().trigger("monthly_summary").await.unwrap();

        let weekly = memory
            .store()
            .list_items(&ItemFilter::active().in_category(WEEKLY_SUMMARIES))
            .await
            .unwrap();
        assert_eq!(weekly.len(), 1);
        assert!(weekly[0].content.contains("Summarized 1 days"));

        let monthly = memory
            .store()
            .list_items(&ItemFilter::active().in_category(MONTHLY_SUMMARIES))
            .await
            .unwrap();
        assert_eq!(monthly.len(), 1);
        assert!(monthly[0].content.contains("Summarized 1 weeks"));
    }

    #[tokio::test]
    async fn test_daily_reflection_with_nothing_new() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(MockLlm::new());
        let memory = open_memory(&test_config(&dir), &llm, &Arc::new(RecordingMirror::new())).await;

        memory.scheduler().trigger("daily_reflection").await.unwrap();
        assert_eq!(llm.calls("generate_daily_reflection"), 0);
    }

    #[tokio::test]
    async fn test_failed_job_is_still_recorded() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(MockLlm::new().fail_on("generate_daily_reflection"));
        let memory = open_memory(&test_config(&dir), &llm, &Arc::new(RecordingMirror::new())).await;
        memory.memorize("User lives in Seoul", json!({})).await.unwrap();

        let result = memory.scheduler().trigger("daily_reflection").await;
        assert!(matches!(result, Err(EternalError::Llm(_))));
        assert!(memory.scheduler().job("daily_reflection").unwrap().last_run.is_some());
    }
}

mod profile_tests {
    use super::*;

    #[tokio::test]
    async fn test_profile_reflection_applies_strict_bar() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(MockLlm::new().with_insights(vec![
            ProfileInsight::new("Prefers tea over coffee", 0.9, 3),
            ProfileInsight::new("Might be a runner", 0.6, 1),
            ProfileInsight::new("Works late", 0.95, 1),
        ]));
        let mirror = Arc::new(RecordingMirror::new());
        let memory = open_memory(&test_config(&dir), &llm, &mirror).await;
        memory.memorize("User ordered green tea again", json!({})).await.unwrap();

        memory.scheduler().trigger("profile_reflection").await.unwrap();

        assert_eq!(
            mirror.profile(ProfileTier::Curated),
            vec!["Prefers tea over coffee".to_string()]
        );
        assert!(mirror.profile(ProfileTier::Provisional).is_empty());
    }
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = TempDir::new().unwrap();
        let mirror = Arc::new(RecordingMirror::new());
        let memory = open_memory(&test_config(&dir), &Arc::new(MockLlm::new()), &mirror).await;

        memory.start_scheduler().await;
        assert!(memory.scheduler().is_running().await);

        // Every job is due on first start
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        memory.shutdown().await.unwrap();
        assert!(!memory.scheduler().is_running().await);

        assert!(mirror.events().contains(&MirrorEvent::Backup));
        assert!(memory.scheduler().job("stats_snapshot").unwrap().last_run.is_some());
    }

    #[tokio::test]
    async fn test_disabled_scheduler_does_not_start() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.scheduler.enabled = false;
        let memory = open_memory(
            &config,
            &Arc::new(MockLlm::new()),
            &Arc::new(RecordingMirror::new()),
        )
        .await;

        memory.start_scheduler().await;
        assert!(!memory.scheduler().is_running().await);
    }
}
