//! Integration tests for the conversation buffer and its flush into
//! long-term memory

use std::sync::Arc;

use eternal_memory::EternalMemory;
use eternal_memory::config::Config;
use eternal_memory::error::AdvisoryError;
use eternal_memory::llm::ProfileInsight;
use eternal_memory::storage::ItemFilter;
use eternal_memory::testing::{MOCK_DIMENSION, MockLlm, RecordingMirror};
use eternal_memory::vault::ProfileTier;
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().join("data");
    config.storage.embedding_dimension = MOCK_DIMENSION;
    config.scheduler.tick_millis = 20;
    config
}

async fn open_memory(
    config: &Config,
    llm: &Arc<MockLlm>,
    mirror: &Arc<RecordingMirror>,
) -> EternalMemory {
    EternalMemory::open(config.clone(), llm.clone(), mirror.clone())
        .await
        .unwrap()
}

async fn fill_buffer(memory: &EternalMemory) {
    memory.add_to_buffer("user", "I just moved to Seoul").await.unwrap();
    memory
        .add_to_buffer("assistant", "Welcome! How are you finding it?")
        .await
        .unwrap();
    memory
        .add_to_buffer("user", "Great, and the coffee here is amazing")
        .await
        .unwrap();
}

mod recovery_tests {
    use super::*;

    #[tokio::test]
    async fn test_unflushed_entries_survive_restart() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let llm = Arc::new(MockLlm::new());
        let mirror = Arc::new(RecordingMirror::new());

        {
            let memory = open_memory(&config, &llm, &mirror).await;
            fill_buffer(&memory).await;
            // Dropped without shutdown
        }

        let memory = open_memory(&config, &llm, &mirror).await;
        let status = memory.buffer_status().await;
        assert_eq!(status.message_count, 3);
        assert!(status.estimated_tokens > 0);
    }
}

mod flush_tests {
    use super::*;

    fn scripted_llm() -> MockLlm {
        MockLlm::new()
            .with_enduring_facts("- User lives in Seoul\n- User loves coffee")
            .with_insights(vec![
                ProfileInsight::new("Recently relocated", 0.6, 1),
                ProfileInsight::new("Might enjoy cafes", 0.3, 1),
            ])
    }

    #[tokio::test]
    async fn test_flush_commits_facts_and_clears_log() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let llm = Arc::new(scripted_llm());
        let mirror = Arc::new(RecordingMirror::new());
        let memory = open_memory(&config, &llm, &mirror).await;
        fill_buffer(&memory).await;
        assert!(config.buffer_log_path().exists());

        let report = memory.flush_buffer().await.unwrap();
        assert_eq!(report.flushed_messages, 3);
        assert_eq!(report.items.len(), 2);
        assert_eq!(report.insights.len(), 1);

        let stored: Vec<String> = memory
            .store()
            .list_items(&ItemFilter::active())
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.content)
            .collect();
        assert!(stored.contains(&"User lives in Seoul".to_string()));
        assert!(stored.contains(&"User loves coffee".to_string()));

        assert_eq!(
            mirror.profile(ProfileTier::Provisional),
            vec!["Recently relocated".to_string()]
        );
        assert!(mirror.profile(ProfileTier::Curated).is_empty());

        assert_eq!(memory.buffer_status().await.message_count, 0);
        assert!(!config.buffer_log_path().exists());
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_buffer() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let llm = Arc::new(scripted_llm().fail_on("extract_enduring_facts"));
        let mirror = Arc::new(RecordingMirror::new());
        let memory = open_memory(&config, &llm, &mirror).await;
        fill_buffer(&memory).await;

        assert!(memory.flush_buffer().await.is_err());
        assert_eq!(memory.buffer_status().await.message_count, 3);
        assert!(config.buffer_log_path().exists());

        // Retrying once the model recovers commits everything
        llm.set_failing("extract_enduring_facts", false);
        let report = memory.flush_buffer().await.unwrap();
        assert_eq!(report.flushed_messages, 3);
        assert_eq!(memory.buffer_status().await.message_count, 0);
    }

    #[tokio::test]
    async fn test_nothing_enduring_still_drains() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let llm = Arc::new(MockLlm::new());
        let mirror = Arc::new(RecordingMirror::new());
        let memory = open_memory(&config, &llm, &mirror).await;
        memory.add_to_buffer("user", "ok thanks").await.unwrap();

        let report = memory.flush_buffer().await.unwrap();
        assert_eq!(report.flushed_messages, 1);
        assert!(report.items.is_empty());
        assert_eq!(memory.buffer_status().await.message_count, 0);
    }

    #[tokio::test]
    async fn test_insight_failure_is_advisory() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let llm = Arc::new(scripted_llm().fail_on("extract_profile_insights"));
        let mirror = Arc::new(RecordingMirror::new());
        let memory = open_memory(&config, &llm, &mirror).await;
        fill_buffer(&memory).await;

        let report = memory.flush_buffer().await.unwrap();
        assert_eq!(report.items.len(), 2);
        assert!(
            report
                .advisories
                .iter()
                .any(|a| matches!(a, AdvisoryError::Profile(_)))
        );
        assert_eq!(memory.buffer_status().await.message_count, 0);
    }

    #[tokio::test]
    async fn test_flush_on_empty_buffer_is_noop() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let llm = Arc::new(MockLlm::new());
        let mirror = Arc::new(RecordingMirror::new());
        let memory = open_memory(&config, &llm, &mirror).await;

        let report = memory.flush_buffer().await.unwrap();
        assert_eq!(report.flushed_messages, 0);
        assert_eq!(llm.calls("extract_enduring_facts"), 0);
    }
}

mod threshold_tests {
    use super::*;

    #[tokio::test]
    async fn test_check_and_flush_waits_for_threshold() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.buffer.flush_threshold_tokens = 20;
        let llm = Arc::new(MockLlm::new().with_enduring_facts("User lives in Seoul"));
        let mirror = Arc::new(RecordingMirror::new());
        let memory = open_memory(&config, &llm, &mirror).await;

        memory.add_to_buffer("user", "short").await.unwrap();
        assert!(memory.check_and_flush().await.unwrap().is_none());

        memory
            .add_to_buffer("user", "I live in Seoul these days, it is lovely")
            .await
            .unwrap();
        let report = memory.check_and_flush().await.unwrap().unwrap();
        assert_eq!(report.flushed_messages, 2);
        assert_eq!(report.items.len(), 1);
    }
}

mod shutdown_tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_flushes_buffer() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let llm = Arc::new(MockLlm::new().with_enduring_facts("User lives in Seoul"));
        let mirror = Arc::new(RecordingMirror::new());

        {
            let memory = open_memory(&config, &llm, &mirror).await;
            fill_buffer(&memory).await;
            memory.shutdown().await.unwrap();
        }

        let memory = open_memory(&config, &llm, &mirror).await;
        assert_eq!(memory.buffer_status().await.message_count, 0);
        let items = memory.store().list_items(&ItemFilter::active()).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "User lives in Seoul");
    }

    #[tokio::test]
    async fn test_failed_shutdown_flush_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let llm = Arc::new(MockLlm::new().fail_on("extract_enduring_facts"));
        let mirror = Arc::new(RecordingMirror::new());

        {
            let memory = open_memory(&config, &llm, &mirror).await;
            fill_buffer(&memory).await;
            assert!(memory.shutdown().await.is_err());
        }

        let memory = open_memory(&config, &llm, &mirror).await;
        assert_eq!(memory.buffer_status().await.message_count, 3);
    }
}
