use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use newsradar_common::{CellId, InteractionEvent, TrendingError, TrendingSettings};
use newsradar_events::InteractionStore;

use crate::decay::DecayPolicy;
use crate::ranking::{recompute, CellRanking};

/// Where a cell ranking handed out by [`TrendingCache::get`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    Hit,
    Recomputed,
    /// Recompute failed; the previous ranking was served past its TTL.
    Stale,
}

#[derive(Debug, Clone)]
pub struct CellLookup {
    pub ranking: Arc<CellRanking>,
    pub stale: bool,
    pub source: LookupSource,
}

/// What [`TrendingCache::apply_event`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// Folded into a fresh ranking.
    Applied,
    /// Held until the in-flight recompute for its cell completes.
    Queued,
    /// Nothing cached for the cell, entry expired, or already counted.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub cells: usize,
    pub scans: u64,
    pub hits: u64,
    pub stale_serves: u64,
}

#[derive(Default)]
struct Counters {
    scans: AtomicU64,
    hits: AtomicU64,
    stale_serves: AtomicU64,
}

/// Result of one recompute, broadcast to every caller waiting on the cell.
#[derive(Clone)]
enum Outcome {
    Ready(Arc<CellRanking>),
    Failed(String),
}

#[derive(Default)]
struct SlotState {
    ranking: Option<Arc<CellRanking>>,
    expires_at: Option<Instant>,
    inflight: Option<watch::Receiver<Option<Outcome>>>,
    /// Events observed while a recompute was in flight.
    pending: Vec<InteractionEvent>,
}

impl SlotState {
    fn fresh(&self, now: Instant) -> Option<&Arc<CellRanking>> {
        match (&self.ranking, self.expires_at) {
            (Some(ranking), Some(expires_at)) if now < expires_at => Some(ranking),
            _ => None,
        }
    }

    fn evictable(&self, now: Instant, stale_retention: Duration) -> bool {
        if self.inflight.is_some() {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at + stale_retention <= now,
            None => true,
        }
    }
}

#[derive(Default)]
struct CellSlot {
    state: Mutex<SlotState>,
}

impl CellSlot {
    // The guarded section never awaits, so a poisoned lock still holds
    // consistent state.
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a finished recompute and replay the events that arrived meanwhile.
    fn complete(
        &self,
        result: Result<CellRanking, TrendingError>,
        policy: &DecayPolicy,
        ttl: Duration,
    ) -> Outcome {
        let mut state = self.lock();
        state.inflight = None;
        let pending = std::mem::take(&mut state.pending);

        match result {
            Ok(mut ranking) => {
                let now = Utc::now();
                let replayed = pending
                    .iter()
                    .filter(|event| ranking.fold(event, policy, now))
                    .count();
                if replayed > 0 {
                    debug!(cell = %ranking.cell, replayed, "Replayed events observed during recompute");
                }
                let ranking = Arc::new(ranking);
                state.ranking = Some(Arc::clone(&ranking));
                state.expires_at = Some(Instant::now() + ttl);
                Outcome::Ready(ranking)
            }
            // Pending events are already in the store; the next recompute picks them up.
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }
}

/// TTL-bounded per-cell rankings with single-flight recomputation.
///
/// One slot per active cell in a sharded map. Each slot has its own mutex,
/// held only for short synchronous sections, so cells never contend with
/// each other and readers only wait on a recompute of their own cell.
pub struct TrendingCache {
    store: Arc<dyn InteractionStore>,
    policy: Arc<DecayPolicy>,
    ttl: Duration,
    scan_timeout: Duration,
    stale_retention: Duration,
    slots: DashMap<CellId, Arc<CellSlot>>,
    counters: Counters,
}

impl TrendingCache {
    pub fn new(
        store: Arc<dyn InteractionStore>,
        policy: Arc<DecayPolicy>,
        settings: &TrendingSettings,
    ) -> Self {
        Self {
            store,
            policy,
            ttl: settings.cache_ttl(),
            scan_timeout: settings.scan_timeout(),
            stale_retention: settings.stale_retention(),
            slots: DashMap::new(),
            counters: Counters::default(),
        }
    }

    pub fn policy(&self) -> &DecayPolicy {
        &self.policy
    }

    /// Ranking for `cell`: cached if fresh, otherwise from a single shared recompute.
    pub async fn get(&self, cell: &CellId) -> Result<CellLookup, TrendingError> {
        let slot = self.slot(cell);

        let mut rx = {
            let mut state = slot.lock();
            if let Some(ranking) = state.fresh(Instant::now()) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(CellLookup {
                    ranking: Arc::clone(ranking),
                    stale: false,
                    source: LookupSource::Hit,
                });
            }
            match state.inflight.clone() {
                Some(rx) => rx,
                None => self.start_recompute(cell, &slot, &mut state),
            }
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };

        let reason = match outcome {
            Some(Outcome::Ready(ranking)) => {
                return Ok(CellLookup {
                    ranking,
                    stale: false,
                    source: LookupSource::Recomputed,
                })
            }
            Some(Outcome::Failed(reason)) => reason,
            None => "recompute task ended without a result".to_string(),
        };

        let previous = slot.lock().ranking.clone();
        match previous {
            Some(ranking) => {
                self.counters.stale_serves.fetch_add(1, Ordering::Relaxed);
                warn!(cell = %cell, reason = %reason, "Serving stale cell ranking");
                Ok(CellLookup {
                    ranking,
                    stale: true,
                    source: LookupSource::Stale,
                })
            }
            None => Err(TrendingError::Degraded {
                cell: cell.clone(),
                reason,
            }),
        }
    }

    /// Fold a freshly stored event into its cell's cached ranking, if any.
    pub fn apply_event(&self, event: &InteractionEvent) -> EventDisposition {
        let Some(cell) = &event.cell else {
            return EventDisposition::Skipped;
        };
        let Some(slot) = self.slots.get(cell).map(|s| Arc::clone(s.value())) else {
            return EventDisposition::Skipped;
        };

        let mut state = slot.lock();
        if state.inflight.is_some() {
            state.pending.push(event.clone());
            return EventDisposition::Queued;
        }
        if state.fresh(Instant::now()).is_none() {
            return EventDisposition::Skipped;
        }

        let Some(ranking) = state.ranking.as_mut() else {
            return EventDisposition::Skipped;
        };
        if Arc::make_mut(ranking).fold(event, &self.policy, Utc::now()) {
            EventDisposition::Applied
        } else {
            EventDisposition::Skipped
        }
    }

    /// Drop slots that have been expired for longer than the stale retention
    /// window and have no recompute in flight. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.slots.retain(|_, slot| {
            let keep = !slot.lock().evictable(now, self.stale_retention);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Periodically sweep expired slots in the background.
    pub fn spawn_sweep_loop(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let removed = cache.sweep();
                if removed > 0 {
                    let stats = cache.stats();
                    info!(
                        removed,
                        cells = stats.cells,
                        scans = stats.scans,
                        hits = stats.hits,
                        stale_serves = stats.stale_serves,
                        "Trending cache swept"
                    );
                }
            }
        });

        info!(interval_secs = interval.as_secs(), "Trending cache sweep loop started");
        handle
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cells: self.slots.len(),
            scans: self.counters.scans.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            stale_serves: self.counters.stale_serves.load(Ordering::Relaxed),
        }
    }

    fn slot(&self, cell: &CellId) -> Arc<CellSlot> {
        if let Some(slot) = self.slots.get(cell) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.slots.entry(cell.clone()).or_default().value())
    }

    /// Spawn the one recompute for `cell`. Runs to completion even if every
    /// waiter is dropped.
    fn start_recompute(
        &self,
        cell: &CellId,
        slot: &Arc<CellSlot>,
        state: &mut SlotState,
    ) -> watch::Receiver<Option<Outcome>> {
        let (tx, rx) = watch::channel(None);
        state.inflight = Some(rx.clone());
        self.counters.scans.fetch_add(1, Ordering::Relaxed);

        let store = Arc::clone(&self.store);
        let policy = Arc::clone(&self.policy);
        let slot = Arc::clone(slot);
        let cell = cell.clone();
        let (ttl, scan_timeout) = (self.ttl, self.scan_timeout);

        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let scan = recompute(store.as_ref(), &cell, &policy, Utc::now());
            let result = match tokio::time::timeout(scan_timeout, scan).await {
                Ok(result) => result,
                Err(_) => Err(TrendingError::Upstream(format!(
                    "scan of cell {cell} timed out after {}ms",
                    scan_timeout.as_millis()
                ))),
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            if let Ok(ranking) = &result {
                info!(
                    cell = %cell,
                    articles = ranking.len(),
                    watermark = ranking.watermark,
                    elapsed_ms,
                    "Cell ranking recomputed"
                );
            }

            let outcome = slot.complete(result, &policy, ttl);
            if let Outcome::Failed(reason) = &outcome {
                if slot.lock().ranking.is_some() {
                    warn!(cell = %cell, error = %reason, elapsed_ms, "Cell recompute failed, stale ranking kept");
                } else {
                    error!(cell = %cell, error = %reason, elapsed_ms, "Cell recompute failed with no ranking to fall back on");
                }
            }
            tx.send_replace(Some(outcome));
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use newsradar_common::{EventKind, GeoPoint, NewInteraction};
    use newsradar_events::MemoryInteractionStore;
    use uuid::Uuid;

    use super::*;

    fn cache_over(store: Arc<MemoryInteractionStore>, settings: &TrendingSettings) -> TrendingCache {
        let policy = Arc::new(DecayPolicy::from_settings(settings).unwrap());
        TrendingCache::new(store, policy, settings)
    }

    fn located(article: Uuid, kind: EventKind) -> NewInteraction {
        NewInteraction::new(article, kind).located(GeoPoint { lat: 0.0, lon: 0.0 }, CellId::new("s0000"))
    }

    #[tokio::test]
    async fn warm_get_is_a_hit() {
        let store = Arc::new(MemoryInteractionStore::new());
        store.append(located(Uuid::new_v4(), EventKind::Click)).await.unwrap();
        let cache = cache_over(store.clone(), &TrendingSettings::default());
        let cell = CellId::new("s0000");

        let first = cache.get(&cell).await.unwrap();
        let second = cache.get(&cell).await.unwrap();

        assert_eq!(first.source, LookupSource::Recomputed);
        assert_eq!(second.source, LookupSource::Hit);
        assert_eq!(first.ranking.entries, second.ranking.entries);
        assert_eq!(store.scans(), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn apply_event_folds_into_fresh_ranking() {
        let store = Arc::new(MemoryInteractionStore::new());
        let cache = cache_over(store.clone(), &TrendingSettings::default());
        let cell = CellId::new("s0000");
        let article = Uuid::new_v4();

        assert!(cache.get(&cell).await.unwrap().ranking.is_empty());

        let stored = store.append(located(article, EventKind::Share)).await.unwrap();
        assert_eq!(cache.apply_event(&stored), EventDisposition::Applied);
        assert_eq!(cache.apply_event(&stored), EventDisposition::Skipped);

        let lookup = cache.get(&cell).await.unwrap();
        assert_eq!(lookup.source, LookupSource::Hit);
        assert_eq!(lookup.ranking.entries[0].article_id, article);
        assert_eq!(store.scans(), 1);
    }

    #[tokio::test]
    async fn events_for_uncached_cells_are_skipped() {
        let store = Arc::new(MemoryInteractionStore::new());
        let cache = cache_over(store.clone(), &TrendingSettings::default());
        let stored = store.append(located(Uuid::new_v4(), EventKind::View)).await.unwrap();
        assert_eq!(cache.apply_event(&stored), EventDisposition::Skipped);

        let unlocated = store
            .append(NewInteraction::new(Uuid::new_v4(), EventKind::View))
            .await
            .unwrap();
        assert_eq!(cache.apply_event(&unlocated), EventDisposition::Skipped);
    }

    #[tokio::test]
    async fn failed_first_recompute_is_degraded() {
        let store = Arc::new(MemoryInteractionStore::new());
        store.set_unavailable(true);
        let cache = cache_over(store.clone(), &TrendingSettings::default());

        let err = cache.get(&CellId::new("s0000")).await.unwrap_err();
        assert!(matches!(err, TrendingError::Degraded { .. }));
    }

    #[tokio::test]
    async fn sweep_drops_failed_and_long_expired_slots() {
        let store = Arc::new(MemoryInteractionStore::new());
        store.set_unavailable(true);
        let settings = TrendingSettings {
            stale_retention_secs: 0,
            ..TrendingSettings::default()
        };
        let cache = cache_over(store.clone(), &settings);

        let _ = cache.get(&CellId::new("s0000")).await;
        assert_eq!(cache.stats().cells, 1);
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.stats().cells, 0);
    }
}
