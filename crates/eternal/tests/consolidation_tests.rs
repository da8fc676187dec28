//! Integration tests for the consolidation pipeline

use std::sync::Arc;

use chrono::{Duration, Utc};
use eternal_memory::config::{ConsolidationConfig, FeatureFlags, MemorizeConfig};
use eternal_memory::consolidate::ConsolidationPipeline;
use eternal_memory::error::AdvisoryError;
use eternal_memory::memory::types::{MemoryItem, MemoryKind};
use eternal_memory::memory::{FactInput, MemorizePipeline};
use eternal_memory::storage::{ItemFilter, LanceStore};
use eternal_memory::testing::{MOCK_DIMENSION, MockLlm, RecordingMirror, mock_embedding};
use tempfile::TempDir;

/// Test helper: Create a store in a temporary directory
async fn create_test_store() -> (Arc<LanceStore>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = LanceStore::open(dir.path(), MOCK_DIMENSION).await.unwrap();
    (Arc::new(store), dir)
}

async fn remember(store: &Arc<LanceStore>, llm: &Arc<MockLlm>, facts: &[(&str, &str)]) {
    let pipeline = MemorizePipeline::new(
        store.clone(),
        llm.clone(),
        Arc::new(RecordingMirror::new()),
        MemorizeConfig::default(),
        FeatureFlags::default(),
    );
    for (content, path) in facts {
        pipeline
            .save_fact(FactInput::new(content, MemoryKind::Fact).in_category(path))
            .await
            .unwrap();
    }
}

/// Insert an item last touched `days` ago, bypassing the pipeline
async fn insert_stale(store: &LanceStore, content: &str, path: &str, days: i64, importance: f32) {
    let mut item = MemoryItem::new(
        content.to_string(),
        mock_embedding(content),
        MemoryKind::Fact,
        path.to_string(),
    )
    .with_importance(importance);
    item.last_accessed = Utc::now() - Duration::days(days);
    item.created_at = item.last_accessed;
    store.insert_item(&item).await.unwrap();
}

mod summary_tests {
    use super::*;

    #[tokio::test]
    async fn test_summaries_reach_store_and_mirror() {
        let (store, _dir) = create_test_store().await;
        let llm = Arc::new(MockLlm::new());
        remember(
            &store,
            &llm,
            &[
                ("User lives in Seoul", "personal/home"),
                ("User rents an apartment", "personal/home"),
            ],
        )
        .await;

        let mirror = Arc::new(RecordingMirror::new());
        let pipeline = ConsolidationPipeline::new(
            store.clone(),
            llm.clone(),
            mirror.clone(),
            ConsolidationConfig::default(),
        );
        let report = pipeline.run().await.unwrap();

        // The empty "personal" parent is skipped
        assert_eq!(report.updated_summaries, 1);
        assert!(report.optimized);
        assert!(report.advisories.is_empty());

        let category = store
            .get_category_by_path("personal/home")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(category.summary.as_deref(), Some("personal/home: 2 memories"));
        assert_eq!(
            mirror.summaries(),
            vec![(
                "personal/home".to_string(),
                "personal/home: 2 memories".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_summary_failure_is_advisory() {
        let (store, _dir) = create_test_store().await;
        let llm = Arc::new(MockLlm::new());
        remember(&store, &llm, &[("User lives in Seoul", "personal/home")]).await;
        llm.set_failing("summarize_category", true);

        let pipeline = ConsolidationPipeline::new(
            store.clone(),
            llm.clone(),
            Arc::new(RecordingMirror::new()),
            ConsolidationConfig::default(),
        );
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.updated_summaries, 0);
        assert!(
            report
                .advisories
                .iter()
                .any(|a| matches!(a, AdvisoryError::Maintenance(_)))
        );
    }

    #[tokio::test]
    async fn test_mirror_failure_keeps_stored_summary() {
        let (store, _dir) = create_test_store().await;
        let llm = Arc::new(MockLlm::new());
        remember(&store, &llm, &[("User lives in Seoul", "personal/home")]).await;

        let pipeline = ConsolidationPipeline::new(
            store.clone(),
            llm.clone(),
            Arc::new(RecordingMirror::failing()),
            ConsolidationConfig::default(),
        );
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.updated_summaries, 1);
        assert!(
            report
                .advisories
                .iter()
                .any(|a| matches!(a, AdvisoryError::Mirror(_)))
        );
        let category = store
            .get_category_by_path("personal/home")
            .await
            .unwrap()
            .unwrap();
        assert!(category.summary.is_some());
    }
}

mod reorganization_tests {
    use super::*;

    #[tokio::test]
    async fn test_oversized_category_is_flagged_then_cleared() {
        let (store, _dir) = create_test_store().await;
        let llm = Arc::new(MockLlm::new());
        remember(
            &store,
            &llm,
            &[
                ("Ship the beta release", "projects/work"),
                ("Review the quarterly roadmap", "projects/work"),
                ("Hire two backend engineers", "projects/work"),
            ],
        )
        .await;

        let strict = ConsolidationPipeline::new(
            store.clone(),
            llm.clone(),
            Arc::new(RecordingMirror::new()),
            ConsolidationConfig {
                max_category_items: 2,
                ..ConsolidationConfig::default()
            },
        );
        let report = strict.run().await.unwrap();
        assert_eq!(report.flagged_categories, 1);
        let work = store
            .get_category_by_path("projects/work")
            .await
            .unwrap()
            .unwrap();
        assert!(work.needs_reorganization);

        let relaxed = ConsolidationPipeline::new(
            store.clone(),
            llm.clone(),
            Arc::new(RecordingMirror::new()),
            ConsolidationConfig::default(),
        );
        let report = relaxed.run().await.unwrap();
        assert_eq!(report.flagged_categories, 0);
        let work = store
            .get_category_by_path("projects/work")
            .await
            .unwrap()
            .unwrap();
        assert!(!work.needs_reorganization);
    }
}

mod archive_tests {
    use super::*;

    fn archiving() -> ConsolidationConfig {
        ConsolidationConfig {
            archive_enabled: true,
            ..ConsolidationConfig::default()
        }
    }

    async fn seed_stale(store: &LanceStore) {
        for n in 0..5 {
            insert_stale(store, &format!("Old trivia number {n}"), "knowledge/trivia", 60, 0.1).await;
        }
        insert_stale(store, "Old note about hats", "knowledge/misc", 60, 0.1).await;
        insert_stale(store, "Important old contract", "knowledge/trivia", 60, 0.9).await;
        insert_stale(store, "Fresh low note", "knowledge/trivia", 1, 0.1).await;
    }

    #[tokio::test]
    async fn test_archival_is_off_by_default() {
        let (store, _dir) = create_test_store().await;
        seed_stale(&store).await;

        let pipeline = ConsolidationPipeline::new(
            store.clone(),
            Arc::new(MockLlm::new()),
            Arc::new(RecordingMirror::new()),
            ConsolidationConfig::default(),
        );
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.archived_items, 0);
        assert_eq!(store.count_items(&ItemFilter::new()).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_stale_groups_are_summarized_then_deleted() {
        let (store, _dir) = create_test_store().await;
        seed_stale(&store).await;

        let mirror = Arc::new(RecordingMirror::new());
        let pipeline = ConsolidationPipeline::new(
            store.clone(),
            Arc::new(MockLlm::new()),
            mirror.clone(),
            archiving(),
        );
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.archived_items, 5);
        let remaining: Vec<String> = store
            .list_items(&ItemFilter::new())
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.content)
            .collect();
        assert_eq!(remaining.len(), 3);
        assert!(remaining.contains(&"Old note about hats".to_string()));
        assert!(remaining.contains(&"Important old contract".to_string()));
        assert!(remaining.contains(&"Fresh low note".to_string()));

        assert!(
            mirror
                .summaries()
                .iter()
                .any(|(path, _)| path == "archived/knowledge/trivia")
        );
    }

    #[tokio::test]
    async fn test_unmirrored_archive_keeps_items() {
        let (store, _dir) = create_test_store().await;
        seed_stale(&store).await;

        let pipeline = ConsolidationPipeline::new(
            store.clone(),
            Arc::new(MockLlm::new()),
            Arc::new(RecordingMirror::failing()),
            archiving(),
        );
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.archived_items, 0);
        assert_eq!(store.count_items(&ItemFilter::new()).await.unwrap(), 8);
    }
}
