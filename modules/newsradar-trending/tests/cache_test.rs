//! Trending Cache concurrency and consistency tests.
//!
//! These run against the in-memory interaction store, which counts scans and
//! can be slowed down to hold a recompute in flight.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use newsradar_common::{
    CellId, EventKind, GeoPoint, InteractionEvent, NewInteraction, TrendingSettings,
};
use newsradar_events::{InteractionStore, MemoryInteractionStore};
use newsradar_trending::{
    recompute, CellRanking, DecayPolicy, EventDisposition, LookupSource, TrendingCache,
};

const CELL: &str = "9q8yy";

fn settings() -> TrendingSettings {
    TrendingSettings::default()
}

fn build(store: &Arc<MemoryInteractionStore>, settings: &TrendingSettings) -> Arc<TrendingCache> {
    let policy = Arc::new(DecayPolicy::from_settings(settings).unwrap());
    Arc::new(TrendingCache::new(store.clone(), policy, settings))
}

fn located(article: Uuid, kind: EventKind) -> NewInteraction {
    NewInteraction::new(article, kind).located(
        GeoPoint {
            lat: 37.7749,
            lon: -122.4194,
        },
        CellId::new(CELL),
    )
}

fn raw_event(seq: i64, article: Uuid, kind: EventKind, at: DateTime<Utc>) -> InteractionEvent {
    InteractionEvent {
        seq,
        id: Uuid::new_v4(),
        article_id: Some(article),
        user_id: None,
        kind,
        point: None,
        cell: Some(CellId::new(CELL)),
        created_at: at,
    }
}

// =========================================================================
// Single-flight
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cold_gets_share_one_scan() {
    let store = Arc::new(MemoryInteractionStore::new());
    store.append(located(Uuid::new_v4(), EventKind::Click)).await.unwrap();
    store.set_scan_delay(Duration::from_millis(150));
    let cache = build(&store, &settings());

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get(&CellId::new(CELL)).await })
        })
        .collect();

    let mut rankings = Vec::new();
    for handle in handles {
        let lookup = handle.await.unwrap().unwrap();
        assert_eq!(lookup.source, LookupSource::Recomputed);
        rankings.push(lookup.ranking);
    }

    assert_eq!(store.scans(), 1);
    assert!(rankings.iter().all(|r| Arc::ptr_eq(r, &rankings[0])));
    assert_eq!(cache.stats().scans, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recompute_survives_dropped_waiters() {
    let store = Arc::new(MemoryInteractionStore::new());
    store.append(located(Uuid::new_v4(), EventKind::Share)).await.unwrap();
    store.set_scan_delay(Duration::from_millis(100));
    let cache = build(&store, &settings());

    let waiter = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get(&CellId::new(CELL)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    waiter.abort();

    tokio::time::sleep(Duration::from_millis(250)).await;
    let lookup = cache.get(&CellId::new(CELL)).await.unwrap();
    assert_eq!(lookup.source, LookupSource::Hit);
    assert_eq!(store.scans(), 1);
}

// =========================================================================
// Events arriving during a recompute
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn events_queued_during_recompute_count_exactly_once() {
    let store = Arc::new(MemoryInteractionStore::new());
    let article = Uuid::new_v4();
    store.append(located(article, EventKind::View)).await.unwrap();
    store.set_scan_delay(Duration::from_millis(200));
    let cache = build(&store, &settings());

    let reader = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get(&CellId::new(CELL)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Stored before the scan reads: the recompute sees it, the replay must not.
    let scanned = store.append(located(article, EventKind::Share)).await.unwrap();
    assert_eq!(cache.apply_event(&scanned), EventDisposition::Queued);

    // Committed after the scan: only the replay can count it.
    let late = raw_event(1_000, article, EventKind::Click, Utc::now());
    assert_eq!(cache.apply_event(&late), EventDisposition::Queued);

    let lookup = reader.await.unwrap().unwrap();
    let score = lookup.ranking.score_of(article).unwrap();
    assert!((score - 9.0).abs() < 1e-3, "expected 1 + 5 + 3, got {score}");
    assert_eq!(lookup.ranking.latest_seq(), 1_000);

    // Replaying the same event again is a no-op.
    assert_eq!(cache.apply_event(&late), EventDisposition::Skipped);
}

#[tokio::test]
async fn events_applied_out_of_seq_order_are_all_counted() {
    let store = Arc::new(MemoryInteractionStore::new());
    let cache = build(&store, &settings());
    let cell = CellId::new(CELL);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    assert!(cache.get(&cell).await.unwrap().ranking.is_empty());

    // Two concurrent ingests: appended in one order, applied in the other.
    let first = store.append(located(a, EventKind::Share)).await.unwrap();
    let second = store.append(located(b, EventKind::View)).await.unwrap();
    assert!(first.seq < second.seq);
    assert_eq!(cache.apply_event(&second), EventDisposition::Applied);
    assert_eq!(cache.apply_event(&first), EventDisposition::Applied);
    assert_eq!(cache.apply_event(&first), EventDisposition::Skipped);

    let lookup = cache.get(&cell).await.unwrap();
    assert_eq!(lookup.source, LookupSource::Hit);
    assert_eq!(lookup.ranking.len(), 2);
    assert_eq!(lookup.ranking.entries[0].article_id, a);
    assert_eq!(store.scans(), 1);
}

// =========================================================================
// Incremental vs full recompute
// =========================================================================

#[tokio::test]
async fn incremental_updates_converge_with_recompute() {
    let store = Arc::new(MemoryInteractionStore::new());
    let settings = settings();
    let cache = build(&store, &settings);
    let cell = CellId::new(CELL);
    let mut rng = StdRng::seed_from_u64(99);
    let articles: Vec<Uuid> = (0..12).map(|_| Uuid::new_v4()).collect();

    // Warm the (empty) cell so later events are folded in place.
    assert!(cache.get(&cell).await.unwrap().ranking.is_empty());

    let now = Utc::now();
    for _ in 0..300 {
        let article = articles[rng.random_range(0..articles.len())];
        let kind = EventKind::ALL[rng.random_range(0..3)];
        let age = TimeDelta::minutes(rng.random_range(0..600));
        let stored = store.append(located(article, kind).at(now - age)).await.unwrap();
        assert_eq!(cache.apply_event(&stored), EventDisposition::Applied);
    }

    let incremental = cache.get(&cell).await.unwrap();
    assert_eq!(incremental.source, LookupSource::Hit);

    let full = recompute(store.as_ref(), &cell, cache.policy(), Utc::now()).await.unwrap();
    assert_eq!(full.watermark, incremental.ranking.latest_seq());
    assert_eq!(full.len(), incremental.ranking.len());
    for entry in &full.entries {
        let got = incremental.ranking.score_of(entry.article_id).unwrap();
        assert!(
            (got - entry.score).abs() <= entry.score * 1e-4,
            "article {} drifted: {got} vs {}",
            entry.article_id,
            entry.score
        );
    }
}

#[test]
fn recompute_is_independent_of_arrival_order() {
    let policy = DecayPolicy::from_settings(&settings()).unwrap();
    let now = Utc::now();
    let mut rng = StdRng::seed_from_u64(1);
    let articles: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();

    let mut events: Vec<InteractionEvent> = (1..=200)
        .map(|seq| {
            let article = articles[rng.random_range(0..articles.len())];
            let kind = EventKind::ALL[rng.random_range(0..3)];
            raw_event(seq, article, kind, now - TimeDelta::minutes(rng.random_range(0..2000)))
        })
        .collect();

    let ordered = CellRanking::from_events(CellId::new(CELL), &events, &policy, now);
    events.shuffle(&mut rng);
    let shuffled = CellRanking::from_events(CellId::new(CELL), &events, &policy, now);

    assert_eq!(ordered.watermark, shuffled.watermark);
    assert_eq!(ordered.len(), shuffled.len());
    for (a, b) in ordered.entries.iter().zip(&shuffled.entries) {
        assert_eq!(a.article_id, b.article_id);
        assert!((a.score - b.score).abs() < 1e-9);
    }
}

// =========================================================================
// Failure handling
// =========================================================================

#[tokio::test(start_paused = true)]
async fn expired_ranking_is_served_stale_when_store_fails() {
    let store = Arc::new(MemoryInteractionStore::new());
    let article = Uuid::new_v4();
    store.append(located(article, EventKind::Share)).await.unwrap();
    let settings = TrendingSettings {
        cache_ttl_secs: 1,
        ..settings()
    };
    let cache = build(&store, &settings);
    let cell = CellId::new(CELL);

    let warm = tokio_test::assert_ok!(cache.get(&cell).await);
    tokio::time::advance(Duration::from_secs(2)).await;
    store.set_unavailable(true);

    let lookup = tokio_test::assert_ok!(cache.get(&cell).await);
    assert!(lookup.stale);
    assert_eq!(lookup.source, LookupSource::Stale);
    assert_eq!(lookup.ranking.entries, warm.ranking.entries);
    assert_eq!(cache.stats().stale_serves, 1);

    // Recovery: the next access recomputes fresh.
    store.set_unavailable(false);
    let fresh = tokio_test::assert_ok!(cache.get(&cell).await);
    assert!(!fresh.stale);
    assert_eq!(fresh.source, LookupSource::Recomputed);
}

#[tokio::test(start_paused = true)]
async fn slow_scan_times_out_and_serves_stale() {
    let store = Arc::new(MemoryInteractionStore::new());
    store.append(located(Uuid::new_v4(), EventKind::View)).await.unwrap();
    let settings = TrendingSettings {
        cache_ttl_secs: 1,
        scan_timeout_ms: 50,
        ..settings()
    };
    let cache = build(&store, &settings);
    let cell = CellId::new(CELL);

    tokio_test::assert_ok!(cache.get(&cell).await);
    tokio::time::advance(Duration::from_secs(2)).await;
    store.set_scan_delay(Duration::from_secs(5));

    let lookup = tokio_test::assert_ok!(cache.get(&cell).await);
    assert!(lookup.stale);
    assert_eq!(store.scans(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_first_scan_is_degraded() {
    let store = Arc::new(MemoryInteractionStore::new());
    store.set_scan_delay(Duration::from_secs(5));
    let settings = TrendingSettings {
        scan_timeout_ms: 50,
        ..settings()
    };
    let cache = build(&store, &settings);

    let err = tokio_test::assert_err!(cache.get(&CellId::new(CELL)).await);
    assert!(matches!(err, newsradar_common::TrendingError::Degraded { .. }));
}

#[tokio::test(start_paused = true)]
async fn expired_slots_are_swept_after_stale_retention() {
    let store = Arc::new(MemoryInteractionStore::new());
    let settings = TrendingSettings {
        cache_ttl_secs: 1,
        stale_retention_secs: 10,
        ..settings()
    };
    let cache = build(&store, &settings);
    tokio_test::assert_ok!(cache.get(&CellId::new(CELL)).await);

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(cache.sweep(), 0);

    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(cache.sweep(), 1);
    assert_eq!(cache.stats().cells, 0);
}
