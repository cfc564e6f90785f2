//! Article Store adapter. The engine only needs existence checks (to drop
//! dangling references at serve time) and a sample of ids for event simulation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// The subset of `ids` that still exist.
    async fn existing(&self, ids: &[Uuid]) -> Result<HashSet<Uuid>>;

    /// Up to `limit` article ids, in store order.
    async fn sample_ids(&self, limit: usize) -> Result<Vec<Uuid>>;
}

#[async_trait]
impl<S: ArticleStore + ?Sized> ArticleStore for Arc<S> {
    async fn existing(&self, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        (**self).existing(ids).await
    }

    async fn sample_ids(&self, limit: usize) -> Result<Vec<Uuid>> {
        (**self).sample_ids(limit).await
    }
}

// --- Postgres ---

#[derive(Clone)]
pub struct PgArticleStore {
    pool: PgPool,
}

impl PgArticleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArticleStore for PgArticleStore {
    async fn existing(&self, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM articles WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn sample_ids(&self, limit: usize) -> Result<Vec<Uuid>> {
        let rows: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM articles LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

// --- In-memory ---

/// In-memory article ids for tests and local runs.
#[derive(Default)]
pub struct MemoryArticleStore {
    ids: RwLock<Vec<Uuid>>,
    unavailable: AtomicBool,
}

impl MemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            ids: RwLock::new(ids.into_iter().collect()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn insert(&self, id: Uuid) -> Result<()> {
        let mut ids = self.ids.write().map_err(|_| anyhow!("article store poisoned"))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
        Ok(())
    }

    pub fn remove(&self, id: Uuid) -> Result<bool> {
        let mut ids = self.ids.write().map_err(|_| anyhow!("article store poisoned"))?;
        let before = ids.len();
        ids.retain(|x| *x != id);
        Ok(ids.len() != before)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("article store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn existing(&self, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        self.check_available()?;
        let known = self.ids.read().map_err(|_| anyhow!("article store poisoned"))?;
        Ok(ids.iter().copied().filter(|id| known.contains(id)).collect())
    }

    async fn sample_ids(&self, limit: usize) -> Result<Vec<Uuid>> {
        self.check_available()?;
        let known = self.ids.read().map_err(|_| anyhow!("article store poisoned"))?;
        Ok(known.iter().take(limit).copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn existing_returns_known_subset() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let store = MemoryArticleStore::with_ids([a]);
        let found = store.existing(&[a, b]).await.unwrap();
        assert!(found.contains(&a));
        assert!(!found.contains(&b));

        store.remove(a).unwrap();
        assert!(store.existing(&[a]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sample_respects_limit_and_order() {
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let store = MemoryArticleStore::with_ids(ids.clone());
        assert_eq!(store.sample_ids(3).await.unwrap(), ids[..3].to_vec());
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let store = MemoryArticleStore::new();
        store.set_unavailable(true);
        assert!(store.existing(&[Uuid::new_v4()]).await.is_err());
    }
}
