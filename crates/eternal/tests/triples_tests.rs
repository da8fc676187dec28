//! Integration tests for semantic triples: extraction, conflict resolution,
//! the lazy backlog and their effect on retrieval

use std::sync::Arc;

use eternal_memory::config::{FeatureFlags, MemorizeConfig, ScoringConfig};
use eternal_memory::llm::ExtractedTriple;
use eternal_memory::memory::{MemorizePipeline, RetrievalEngine, RetrievalMode, TripleExtractor};
use eternal_memory::storage::{ItemFilter, LanceStore};
use eternal_memory::testing::{MOCK_DIMENSION, MockLlm, RecordingMirror};
use serde_json::json;
use tempfile::TempDir;

/// Test helper: Create a store in a temporary directory
async fn create_test_store() -> (Arc<LanceStore>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = LanceStore::open(dir.path(), MOCK_DIMENSION).await.unwrap();
    (Arc::new(store), dir)
}

fn residence_llm() -> MockLlm {
    MockLlm::new()
        .with_triples(
            "User lives in Seoul",
            vec![ExtractedTriple::new("user", "lives in", "Seoul")],
        )
        .with_triples(
            "User lives in Busan",
            vec![ExtractedTriple::new("user", "lives_in", "Busan")],
        )
}

fn pipeline(store: &Arc<LanceStore>, llm: &Arc<MockLlm>, lazy: bool) -> MemorizePipeline {
    MemorizePipeline::new(
        store.clone(),
        llm.clone(),
        Arc::new(RecordingMirror::new()),
        MemorizeConfig::default(),
        FeatureFlags {
            semantic_triples: true,
            lazy_triple_extraction: lazy,
            ..FeatureFlags::default()
        },
    )
}

mod extraction_tests {
    use super::*;

    #[tokio::test]
    async fn test_eager_extraction_canonicalizes() {
        let (store, _dir) = create_test_store().await;
        let llm = Arc::new(residence_llm());
        let pipeline = pipeline(&store, &llm, false);

        pipeline.memorize("User lives in Seoul", json!({})).await.unwrap();

        let triples = store.active_triples_for_subject("USER").await.unwrap();
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].predicate, "resides_in");
        assert_eq!(triples[0].object, "Seoul");
        assert!(triples[0].memory_item_id.is_some());
        assert_eq!(store.stats().await.unwrap().pending_triple_items, 0);
    }

    #[tokio::test]
    async fn test_conflicting_triple_supersedes_older() {
        let (store, _dir) = create_test_store().await;
        let llm = Arc::new(residence_llm());
        let pipeline = pipeline(&store, &llm, false);

        pipeline.memorize("User lives in Seoul", json!({})).await.unwrap();
        pipeline.memorize("User lives in Busan", json!({})).await.unwrap();

        let active = store.active_triples_for_subject("user").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].object, "Busan");

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.triples, 2);
        assert_eq!(stats.active_triples, 1);
        // Items themselves stay active; only the triple was superseded
        assert_eq!(stats.active_items, 2);
    }

    #[tokio::test]
    async fn test_identical_triple_is_not_duplicated() {
        let (store, _dir) = create_test_store().await;
        let llm = Arc::new(MockLlm::new().with_triples(
            "User likes jazz a lot",
            vec![
                ExtractedTriple::new("user", "loves", "jazz"),
                ExtractedTriple::new("User", "likes", "Jazz"),
            ],
        ));
        let pipeline = pipeline(&store, &llm, false);

        pipeline.memorize("User likes jazz a lot", json!({})).await.unwrap();

        assert_eq!(store.stats().await.unwrap().triples, 1);
    }
}

mod lazy_tests {
    use super::*;

    #[tokio::test]
    async fn test_backlog_is_processed_later() {
        let (store, _dir) = create_test_store().await;
        let llm = Arc::new(residence_llm());
        let pipeline = pipeline(&store, &llm, true);

        let report = pipeline.memorize("User lives in Seoul", json!({})).await.unwrap();
        assert!(report.items[0].triples_pending);
        assert_eq!(llm.calls("extract_triples"), 0);
        assert_eq!(store.stats().await.unwrap().pending_triple_items, 1);

        let extractor = TripleExtractor::new(store.clone(), llm.clone());
        assert_eq!(extractor.process_pending(10).await.unwrap(), 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending_triple_items, 0);
        assert_eq!(stats.active_triples, 1);
        assert_eq!(extractor.process_pending(10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_items_stay_pending() {
        let (store, _dir) = create_test_store().await;
        let llm = Arc::new(residence_llm());
        let pipeline = pipeline(&store, &llm, true);
        pipeline.memorize("User lives in Seoul", json!({})).await.unwrap();

        llm.set_failing("extract_triples", true);
        let extractor = TripleExtractor::new(store.clone(), llm.clone());
        assert_eq!(extractor.process_pending(10).await.unwrap(), 0);

        let pending = store
            .list_items(&ItemFilter::active().pending_triples())
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }
}

mod retrieval_tests {
    use super::*;

    fn engine(store: &Arc<LanceStore>, llm: &Arc<MockLlm>) -> RetrievalEngine {
        RetrievalEngine::new(store.clone(), llm.clone(), ScoringConfig::default(), true)
    }

    #[tokio::test]
    async fn test_triple_context_is_prepended() {
        let (store, _dir) = create_test_store().await;
        let llm = Arc::new(residence_llm());
        pipeline(&store, &llm, false)
            .memorize("User lives in Seoul", json!({}))
            .await
            .unwrap();

        let result = engine(&store, &llm)
            .retrieve("Where does the user live?", RetrievalMode::Fast, "")
            .await
            .unwrap();

        assert!(
            result
                .suggested_context
                .starts_with("[Precise facts] user resides in Seoul")
        );
        assert_eq!(result.contents(), vec!["User lives in Seoul"]);
    }

    #[tokio::test]
    async fn test_items_with_only_superseded_triples_are_dropped() {
        let (store, _dir) = create_test_store().await;
        let llm = Arc::new(residence_llm());
        let pipeline = pipeline(&store, &llm, false);
        pipeline.memorize("User lives in Seoul", json!({})).await.unwrap();
        pipeline.memorize("User lives in Busan", json!({})).await.unwrap();

        let result = engine(&store, &llm)
            .retrieve("Where does the user live?", RetrievalMode::Fast, "")
            .await
            .unwrap();

        assert_eq!(result.contents(), vec!["User lives in Busan"]);
        assert!(result.suggested_context.contains("user resides in Busan"));
        assert!(!result.suggested_context.contains("resides in Seoul"));
    }

    #[tokio::test]
    async fn test_deep_mode_confidence_with_triples() {
        let (store, _dir) = create_test_store().await;
        let llm = Arc::new(residence_llm());
        pipeline(&store, &llm, false)
            .memorize("User lives in Seoul", json!({}))
            .await
            .unwrap();

        let result = engine(&store, &llm)
            .retrieve("Where does the user live?", RetrievalMode::Deep, "")
            .await
            .unwrap();
        assert_eq!(result.confidence, 0.85);
    }
}
