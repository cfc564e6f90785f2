//! In-memory InteractionStore for tests and local runs (no database required).

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use newsradar_common::{CellId, InteractionEvent, NewInteraction};

use crate::store::InteractionStore;

/// Thread-safe in-memory event log with incrementing sequence numbers.
///
/// Counts cell scans and can be told to fail or stall, which is how tests
/// reach the engine's upstream-unavailable and timeout paths.
pub struct MemoryInteractionStore {
    next_seq: AtomicI64,
    events: Mutex<Vec<InteractionEvent>>,
    scans: AtomicUsize,
    unavailable: AtomicBool,
    scan_delay_ms: AtomicU64,
}

impl MemoryInteractionStore {
    pub fn new() -> Self {
        Self {
            next_seq: AtomicI64::new(1),
            events: Mutex::new(Vec::new()),
            scans: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
            scan_delay_ms: AtomicU64::new(0),
        }
    }

    /// Number of `scan_cell` calls served so far (including failed ones).
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// All stored events, in sequence order.
    pub fn events(&self) -> Result<Vec<InteractionEvent>> {
        Ok(self.lock()?.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Simulate the store becoming unreachable (or reachable again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every scan sleep this long before answering.
    pub fn set_scan_delay(&self, delay: Duration) {
        self.scan_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Cascade of an article deletion: events stay, but lose their article reference.
    pub fn detach_article(&self, article_id: Uuid) -> Result<usize> {
        let mut events = self.lock()?;
        let mut detached = 0;
        for ev in events.iter_mut().filter(|e| e.article_id == Some(article_id)) {
            ev.article_id = None;
            detached += 1;
        }
        Ok(detached)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<InteractionEvent>>> {
        self.events
            .lock()
            .map_err(|_| anyhow!("memory interaction store poisoned"))
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("interaction store unavailable");
        }
        Ok(())
    }
}

impl Default for MemoryInteractionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InteractionStore for MemoryInteractionStore {
    async fn append(&self, event: NewInteraction) -> Result<InteractionEvent> {
        self.check_available()?;

        let mut events = self.lock()?;
        // Sequence assignment and push happen under the same lock so that
        // seq order is commit order.
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let stored = InteractionEvent {
            seq,
            id: Uuid::new_v4(),
            article_id: event.article_id,
            user_id: event.user_id,
            kind: event.kind,
            point: event.point,
            cell: event.cell,
            created_at: event.created_at.unwrap_or_else(Utc::now),
        };
        events.push(stored.clone());
        Ok(stored)
    }

    async fn scan_cell(&self, cell: &CellId, since: DateTime<Utc>) -> Result<Vec<InteractionEvent>> {
        self.scans.fetch_add(1, Ordering::SeqCst);

        let delay = self.scan_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check_available()?;

        let events = self.lock()?;
        Ok(events
            .iter()
            .filter(|e| e.cell.as_ref() == Some(cell) && e.created_at >= since)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsradar_common::{EventKind, GeoPoint};

    fn located(article: Uuid, cell: &str) -> NewInteraction {
        NewInteraction::new(article, EventKind::View)
            .located(GeoPoint { lat: 1.0, lon: 1.0 }, CellId::new(cell))
    }

    #[tokio::test]
    async fn seq_is_monotonic_from_one() {
        let store = MemoryInteractionStore::new();
        let a = store.append(located(Uuid::new_v4(), "s0000")).await.unwrap();
        let b = store.append(located(Uuid::new_v4(), "s0000")).await.unwrap();
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
    }

    #[tokio::test]
    async fn scan_filters_by_cell_and_cutoff() {
        let store = MemoryInteractionStore::new();
        let now = Utc::now();
        let article = Uuid::new_v4();

        store.append(located(article, "s0000")).await.unwrap();
        store
            .append(located(article, "s0000").at(now - chrono::Duration::hours(72)))
            .await
            .unwrap();
        store.append(located(article, "s0001")).await.unwrap();
        store
            .append(NewInteraction::new(article, EventKind::Share))
            .await
            .unwrap();

        let hits = store
            .scan_cell(&CellId::new("s0000"), now - chrono::Duration::hours(48))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(store.scans(), 1);
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn unavailable_store_fails_appends_and_scans() {
        let store = MemoryInteractionStore::new();
        store.set_unavailable(true);
        assert!(store.append(located(Uuid::new_v4(), "s0000")).await.is_err());
        assert!(store
            .scan_cell(&CellId::new("s0000"), Utc::now())
            .await
            .is_err());
        store.set_unavailable(false);
        assert!(store.append(located(Uuid::new_v4(), "s0000")).await.is_ok());
    }

    #[tokio::test]
    async fn detach_article_keeps_events() {
        let store = MemoryInteractionStore::new();
        let article = Uuid::new_v4();
        store.append(located(article, "s0000")).await.unwrap();
        store.append(located(article, "s0000")).await.unwrap();

        assert_eq!(store.detach_article(article).unwrap(), 2);
        let events = store.events().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.article_id.is_none()));
    }
}
