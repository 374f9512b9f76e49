mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use common::{tracker, MockSysMeta};
use resmap_resolver::config::TrackerConfig;
use resmap_resolver::store::{KeyValueStore, MemoryStore, SqliteStore};
use resmap_resolver::sysmeta::SysMeta;
use resmap_resolver::tracker::ChainEvent;
use resmap_resolver::ResolverError;

const CHAIN: [&str; 5] = ["v1", "v2", "v3", "v4", "v5"];

async fn chain_service() -> Arc<MockSysMeta> {
    let service = Arc::new(MockSysMeta::new());
    service.chain(&CHAIN).await;
    service
}

#[tokio::test]
async fn test_offset_symmetry() {
    let service = chain_service().await;
    let tracker = tracker(service, Arc::new(MemoryStore::new()), TrackerConfig::default());

    for a in CHAIN {
        if let Some(b) = tracker.get_nth(a, 1, false).await.unwrap() {
            assert_eq!(tracker.get_nth(&b, -1, false).await.unwrap().as_deref(), Some(a));
        }
    }
    assert_eq!(tracker.get_nth("v5", 1, false).await.unwrap(), None);
}

#[tokio::test]
async fn test_bounded_walk_makes_no_calls() {
    let service = chain_service().await;
    let config = TrackerConfig {
        max_chain_hops: 3,
        ..TrackerConfig::default()
    };
    let tracker = tracker(service.clone(), Arc::new(MemoryStore::new()), config);

    for offset in [4, -4, 100] {
        let err = tracker.get_nth("v1", offset, false).await.unwrap_err();
        assert!(matches!(err, ResolverError::InvalidArgument(_)));
    }
    assert_eq!(service.calls(), 0);
    assert_eq!(tracker.get_nth("v1", 3, false).await.unwrap().as_deref(), Some("v4"));
}

#[tokio::test]
async fn test_full_chain_terminates() {
    let service = chain_service().await;
    let tracker = tracker(service, Arc::new(MemoryStore::new()), TrackerConfig::default());

    let head = tracker.get_full_chain("v1", false).await.unwrap();
    assert_eq!(head.next, vec!["v2", "v3", "v4", "v5"]);
    assert!(head.end_next);
    assert!(head.end_prev);
    assert!(head.prev.is_empty());

    let tail = tracker.get_full_chain("v5", false).await.unwrap();
    assert_eq!(tail.prev, vec!["v4", "v3", "v2", "v1"]);
    assert!(tail.end_prev);
    assert!(tail.end_next);
}

#[tokio::test]
async fn test_concurrent_fills_from_same_start_walk_once() {
    let service = Arc::new(MockSysMeta::with_delay(Duration::from_millis(20)));
    service.chain(&CHAIN).await;
    let tracker = tracker(service.clone(), Arc::new(MemoryStore::new()), TrackerConfig::default());

    let (a, b) = tokio::join!(tracker.get_nth("v1", 4, false), tracker.get_nth("v1", 4, false));
    assert_eq!(a.unwrap().as_deref(), Some("v5"));
    assert_eq!(b.unwrap().as_deref(), Some("v5"));
    assert_eq!(service.calls(), 4);
}

#[tokio::test]
async fn test_failed_hop_keeps_partial_chain() {
    let service = chain_service().await;
    service.fail("v3", 500).await;
    let tracker = tracker(service, Arc::new(MemoryStore::new()), TrackerConfig::default());

    assert_eq!(tracker.get_nth("v1", 4, false).await.unwrap(), None);
    let record = tracker.record("v1").await;
    assert_eq!(record.next, vec!["v2", "v3"]);
    assert!(!record.end_next);
    assert_eq!(record.errors.len(), 1);
    assert_eq!(record.errors[0].pid, "v3");
    assert_eq!(record.errors[0].error_code, "500");
    assert!(!record.is_unauthorized());
}

#[tokio::test]
async fn test_ignore_end_rechecks_the_tip() {
    let service = Arc::new(MockSysMeta::new());
    service.insert(SysMeta::new("v1")).await;
    let tracker = tracker(service.clone(), Arc::new(MemoryStore::new()), TrackerConfig::default());

    assert_eq!(tracker.get_nth("v1", 1, false).await.unwrap(), None);
    assert!(tracker.record("v1").await.end_next);

    // A new revision appears upstream
    service.chain(&["v1", "v2"]).await;
    assert_eq!(tracker.get_nth("v1", 1, false).await.unwrap(), None);
    assert_eq!(tracker.get_nth("v1", 1, true).await.unwrap().as_deref(), Some("v2"));
}

#[tokio::test]
async fn test_add_version_requires_tip_and_isolated_pid() {
    let service = Arc::new(MockSysMeta::new());
    service.chain(&["v1", "v2", "v3"]).await;
    service.chain(&["w1", "w2"]).await;
    let tracker = tracker(service, Arc::new(MemoryStore::new()), TrackerConfig::default());

    // v2 already has a newer revision
    let err = tracker.add_version("v2", "new", Some(SysMeta::new("new"))).await.unwrap_err();
    assert!(matches!(err, ResolverError::InvalidState(msg) if msg.contains("v2")));

    // w2 already has an older revision
    let err = tracker.add_version("v3", "w2", None).await.unwrap_err();
    assert!(matches!(err, ResolverError::InvalidState(msg) if msg.contains("w2")));

    // Nothing was linked by the failed calls
    assert!(tracker.record("v3").await.next.is_empty());
    assert_eq!(tracker.record("w2").await.prev, vec!["w1"]);
}

#[tokio::test]
async fn test_add_version_links_without_fetching_new() {
    let service = chain_service().await;
    let tracker = tracker(service.clone(), Arc::new(MemoryStore::new()), TrackerConfig::default());
    tracker.get_full_chain("v5", false).await.unwrap();
    let mut updates = tracker.subscribe_pid("v6");

    tracker
        .add_version("v5", "v6", Some(SysMeta::new("v6").with_obsoletes("v5")))
        .await
        .unwrap();
    let calls = service.calls();

    let v6 = tracker.record("v6").await;
    assert_eq!(v6.prev, vec!["v5", "v4", "v3", "v2", "v1"]);
    assert!(v6.end_prev);
    assert!(v6.end_next);
    assert!(matches!(updates.recv().await, Some(ChainEvent::Updated { pid, .. }) if pid == "v6"));

    assert_eq!(tracker.get_nth("v5", 1, false).await.unwrap().as_deref(), Some("v6"));
    assert_eq!(tracker.get_nth("v6", -5, false).await.unwrap().as_deref(), Some("v1"));
    assert_eq!(tracker.get_nth("v4", 2, false).await.unwrap().as_deref(), Some("v6"));
    assert_eq!(service.calls(), calls);

    // The new revision is now a tip itself
    let err = tracker.add_version("v5", "v7", Some(SysMeta::new("v7"))).await.unwrap_err();
    assert!(matches!(err, ResolverError::InvalidState(_)));
}

#[tokio::test]
async fn test_expired_records_are_purged() {
    let store = Arc::new(MemoryStore::new());
    let day = Duration::from_secs(24 * 60 * 60);
    let now = Utc::now().timestamp_millis();

    store
        .set_item("old", json!({"next": ["old.2"], "endNext": true, "sysMeta": null, "ts": now - 2 * 86_400_000}))
        .await
        .unwrap();
    store
        .set_item("fresh", json!({"next": ["fresh.2"], "endNext": true, "sysMeta": {"formatId": "text/csv"}, "ts": now - 1000}))
        .await
        .unwrap();

    let service = Arc::new(MockSysMeta::new());
    let config = TrackerConfig {
        ttl: day,
        ..TrackerConfig::default()
    };
    let tracker = tracker(service.clone(), store.clone(), config);

    let old = tracker.record("old").await;
    assert!(old.next.is_empty());
    assert!(!old.end_next);
    assert!(store.get_item("old").await.unwrap().is_none());

    let fresh = tracker.record("fresh").await;
    assert_eq!(fresh.next, vec!["fresh.2"]);
    assert!(fresh.end_next);
    assert!(fresh.sys_meta.is_none());
    assert_eq!(fresh.descriptive.and_then(|d| d.format_id).as_deref(), Some("text/csv"));
    assert_eq!(tracker.get_nth("fresh", 1, false).await.unwrap().as_deref(), Some("fresh.2"));
    assert_eq!(service.calls(), 0);
}

#[tokio::test]
async fn test_chain_survives_restart_in_sqlite() {
    let db = tempfile::NamedTempFile::new().unwrap();
    let service = chain_service().await;

    let store = SqliteStore::new(db.path(), "vt_test").await.unwrap();
    let first = tracker(service.clone(), Arc::new(store), TrackerConfig::default());
    first.get_full_chain("v1", false).await.unwrap();

    let fresh_service = chain_service().await;
    let store = SqliteStore::new(db.path(), "vt_test").await.unwrap();
    let second = tracker(fresh_service.clone(), Arc::new(store), TrackerConfig::default());
    assert_eq!(second.get_nth("v1", 4, false).await.unwrap().as_deref(), Some("v5"));
    // Back-links written during the first walk were persisted too
    assert_eq!(second.get_nth("v3", -2, false).await.unwrap().as_deref(), Some("v1"));
    assert_eq!(fresh_service.calls(), 0);
}

#[tokio::test]
async fn test_refresh_and_clear() {
    let service = chain_service().await;
    let store = Arc::new(MemoryStore::new());
    let tracker = tracker(service.clone(), store.clone(), TrackerConfig::default());

    tracker.get_full_chain("v3", false).await.unwrap();
    let refreshed = tracker.refresh("v3").await.unwrap();
    assert_eq!(refreshed.prev, vec!["v2", "v1"]);
    assert_eq!(refreshed.next, vec!["v4", "v5"]);

    tracker.clear().await.unwrap();
    assert!(store.is_empty().await);
    assert_eq!(tracker.cached_records().await, 0);
}

#[tokio::test]
async fn test_memory_tier_is_bounded() {
    let service = chain_service().await;
    let config = TrackerConfig {
        max_cache_records: 2,
        ..TrackerConfig::default()
    };
    let tracker = tracker(service, Arc::new(MemoryStore::new()), config);

    assert_eq!(tracker.get_nth("v1", 4, false).await.unwrap().as_deref(), Some("v5"));
    assert!(tracker.cached_records().await <= 2);
    // Evicted records come back from the durable tier
    assert_eq!(tracker.record("v1").await.next.len(), 4);
}

#[tokio::test]
async fn test_memory_tier_evicts_least_recently_used() {
    let service = Arc::new(MockSysMeta::new());
    let config = TrackerConfig {
        max_cache_records: 2,
        ..TrackerConfig::default()
    };
    let tracker = tracker(service, Arc::new(MemoryStore::new()), config);

    tracker.record("a").await;
    tracker.record("b").await;
    tracker.record("a").await;
    tracker.record("c").await;

    assert!(tracker.is_cached("a").await);
    assert!(!tracker.is_cached("b").await);
    assert!(tracker.is_cached("c").await);
}

#[tokio::test]
async fn test_cycles_stop_the_walk() {
    let service = Arc::new(MockSysMeta::new());
    service.insert(SysMeta::new("a").with_obsoleted_by("b")).await;
    service.insert(SysMeta::new("b").with_obsoleted_by("a")).await;
    let tracker = tracker(service, Arc::new(MemoryStore::new()), TrackerConfig::default());

    let chain = tracker.get_full_chain("a", false).await.unwrap();
    assert_eq!(chain.next, vec!["b"]);
    assert!(chain.errors.iter().any(|e| e.error_code == "CYCLE"));
}

#[tokio::test]
async fn test_adjacent() {
    let service = chain_service().await;
    let tracker = tracker(service, Arc::new(MemoryStore::new()), TrackerConfig::default());

    let adjacent = tracker.get_adjacent("v3").await.unwrap();
    assert_eq!(adjacent.prev.as_deref(), Some("v2"));
    assert_eq!(adjacent.next.as_deref(), Some("v4"));

    let head = tracker.get_adjacent("v1").await.unwrap();
    assert_eq!(head.prev, None);
}
