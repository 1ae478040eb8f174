use std::sync::Arc;

use muster_core::MusterError;
use muster_llm::mock::MockEmbedding;
use muster_llm::EmbeddingProvider;
use muster_memory::MemoryService;

const DIMS: usize = 64;

fn service() -> (MemoryService, Arc<MockEmbedding>) {
    let embedder = Arc::new(MockEmbedding::new(DIMS));
    let svc = MemoryService::open_in_memory(DIMS, embedder.clone()).unwrap();
    (svc, embedder)
}

#[tokio::test]
async fn store_then_search_exact_match_ranks_first() {
    let (svc, _) = service();
    svc.store("a1", "the deploy pipeline uses blue green", serde_json::json!({}))
        .await
        .unwrap();
    svc.store("a1", "lunch is at noon on fridays", serde_json::json!({}))
        .await
        .unwrap();

    let hits = svc
        .search(Some("a1"), "the deploy pipeline uses blue green", Some(1))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content, "the deploy pipeline uses blue green");
    assert!((hits[0].similarity - 1.0).abs() < 1e-4);
}

#[tokio::test]
async fn search_is_scoped_by_agent() {
    let (svc, _) = service();
    svc.store("a1", "alpha", serde_json::json!({})).await.unwrap();
    svc.store("a2", "beta", serde_json::json!({})).await.unwrap();

    let hits = svc
        .search(Some("a1"), "alpha or beta", Some(5))
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.agent_id == "a1"));

    let all = svc.search(None, "alpha or beta", Some(5)).await.unwrap();
    let agents: std::collections::HashSet<_> =
        all.iter().map(|h| h.agent_id.as_str()).collect();
    assert!(agents.contains("a1") && agents.contains("a2"));
}

#[tokio::test]
async fn cross_agent_query_ranks_closer_content_higher() {
    let (svc, _) = service();
    svc.store("a1", "alpha alpha alpha", serde_json::json!({}))
        .await
        .unwrap();
    svc.store("a2", "beta unrelated words entirely", serde_json::json!({}))
        .await
        .unwrap();

    let all = svc
        .search(None, "alpha alpha alpha", Some(5))
        .await
        .unwrap();
    assert_eq!(all[0].agent_id, "a1");
    assert!(all[0].similarity > all[1].similarity);
}

#[tokio::test]
async fn metadata_roundtrips_unchanged() {
    let (svc, _) = service();
    let meta = serde_json::json!({
        "channel_id": "c1",
        "thread_id": "t7",
        "message_id": "m42",
        "role": "user"
    });
    svc.store("a1", "remember this", meta.clone()).await.unwrap();
    let hits = svc.search(Some("a1"), "remember this", None).await.unwrap();
    assert_eq!(hits[0].metadata, meta);
}

#[tokio::test]
async fn k_defaults_to_five_and_caps_at_one_hundred() {
    let (svc, _) = service();
    for i in 0..8 {
        svc.store("a1", &format!("note number {i}"), serde_json::json!({}))
            .await
            .unwrap();
    }
    let hits = svc.search(Some("a1"), "note number", None).await.unwrap();
    assert_eq!(hits.len(), 5);

    let hits = svc
        .search(Some("a1"), "note number", Some(5000))
        .await
        .unwrap();
    assert_eq!(hits.len(), 8);
}

#[tokio::test]
async fn empty_content_and_missing_agent_are_config_errors() {
    let (svc, _) = service();
    let err = svc.store("a1", "", serde_json::json!({})).await.unwrap_err();
    assert!(matches!(err, MusterError::Config(_)));
    let err = svc
        .store("", "content", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, MusterError::Config(_)));
}

#[tokio::test]
async fn dimension_mismatch_is_rejected_at_open() {
    let embedder = Arc::new(MockEmbedding::new(32));
    let err = MemoryService::open_in_memory(DIMS, embedder).unwrap_err();
    assert!(matches!(err, MusterError::Config(_)));
}

#[tokio::test]
async fn embedding_outage_is_distinct_from_store_failure() {
    let (svc, embedder) = service();
    embedder.set_failing(true);
    let err = svc
        .store("a1", "content", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, MusterError::EmbeddingUnavailable(_)));
    assert_eq!(err.kind(), "embedding_unavailable");

    // The store itself is still healthy.
    svc.health().unwrap();
}

#[tokio::test]
async fn recent_returns_newest_first() {
    let (svc, _) = service();
    svc.store("a1", "first", serde_json::json!({})).await.unwrap();
    svc.store("a1", "second", serde_json::json!({})).await.unwrap();
    svc.store("a1", "third", serde_json::json!({})).await.unwrap();

    let recent = svc.recent(Some("a1"), 2).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].content, "third");
    assert_eq!(recent[1].content, "second");
}

#[tokio::test]
async fn delete_and_clear_agent() {
    let (svc, _) = service();
    let id = svc.store("a1", "ephemeral", serde_json::json!({})).await.unwrap();
    svc.store("a1", "keep me around", serde_json::json!({}))
        .await
        .unwrap();
    svc.store("a2", "other agent", serde_json::json!({}))
        .await
        .unwrap();

    assert!(svc.delete(id).unwrap());
    assert!(!svc.delete(id).unwrap());
    assert_eq!(svc.clear_agent("a1").unwrap(), 1);
    assert_eq!(svc.count().unwrap(), 1);
}

#[tokio::test]
async fn persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.db");
    let embedder = Arc::new(MockEmbedding::new(DIMS));
    {
        let svc = MemoryService::open(&path, DIMS, embedder.clone()).unwrap();
        svc.store("a1", "durable fact", serde_json::json!({}))
            .await
            .unwrap();
    }
    let svc = MemoryService::open(&path, DIMS, embedder).unwrap();
    assert_eq!(svc.count().unwrap(), 1);
    let hits = svc.search(Some("a1"), "durable fact", None).await.unwrap();
    assert_eq!(hits[0].content, "durable fact");
    assert_eq!(svc.dims(), DIMS);
    let _ = MockEmbedding::new(4).dimensions();
}
