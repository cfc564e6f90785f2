//! Query Resolver: merges the rankings of every covering cell into one result.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use newsradar_common::{RankedArticle, TrendingError};

use crate::articles::ArticleStore;
use crate::cache::TrendingCache;
use crate::geo::GeoBucketer;
use crate::ranking::{rank_order, CellRanking};

/// Smallest batch sent to the Article Store soft filter.
const FILTER_BATCH: usize = 16;

#[derive(Debug, Clone, Serialize)]
pub struct TrendingResult {
    pub articles: Vec<RankedArticle>,
    /// True if any cell was served past its TTL or skipped after a failure.
    pub stale: bool,
    /// Number of covering cells consulted.
    pub cells: usize,
}

pub struct QueryResolver {
    bucketer: GeoBucketer,
    cache: Arc<TrendingCache>,
    articles: Arc<dyn ArticleStore>,
}

impl QueryResolver {
    pub fn new(bucketer: GeoBucketer, cache: Arc<TrendingCache>, articles: Arc<dyn ArticleStore>) -> Self {
        Self {
            bucketer,
            cache,
            articles,
        }
    }

    pub async fn trending(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<TrendingResult, TrendingError> {
        let cells = self.bucketer.covering_cells(lat, lon, radius_km)?;
        if limit == 0 {
            return Ok(TrendingResult {
                articles: Vec::new(),
                stale: false,
                cells: cells.len(),
            });
        }

        let lookups = join_all(cells.iter().map(|cell| self.cache.get(cell))).await;

        let mut rankings = Vec::with_capacity(lookups.len());
        let mut stale = false;
        let mut first_error = None;
        for lookup in lookups {
            match lookup {
                Ok(lookup) => {
                    stale |= lookup.stale;
                    rankings.push(lookup.ranking);
                }
                Err(e) => {
                    stale = true;
                    first_error.get_or_insert(e);
                }
            }
        }

        if rankings.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        } else if let Some(e) = &first_error {
            warn!(error = %e, "Trending served without some covering cells");
        }

        let articles = self.filter_existing(merge_unique(&rankings), limit).await;
        debug!(
            cells = cells.len(),
            articles = articles.len(),
            stale,
            "Trending query resolved"
        );

        Ok(TrendingResult {
            articles,
            stale,
            cells: cells.len(),
        })
    }

    /// Drop articles the Article Store no longer has, checking in batches until
    /// `limit` survivors are found. If the store fails, serve unfiltered.
    async fn filter_existing<'a>(
        &self,
        mut merged: impl Iterator<Item = &'a RankedArticle> + Send,
        limit: usize,
    ) -> Vec<RankedArticle> {
        let mut out = Vec::with_capacity(limit);
        let mut filtering = true;

        while out.len() < limit {
            let want = if filtering {
                (limit - out.len()).max(FILTER_BATCH)
            } else {
                limit - out.len()
            };
            let batch: Vec<RankedArticle> = merged.by_ref().take(want).cloned().collect();
            if batch.is_empty() {
                break;
            }
            if !filtering {
                out.extend(batch);
                continue;
            }

            let ids: Vec<Uuid> = batch.iter().map(|a| a.article_id).collect();
            match self.articles.existing(&ids).await {
                Ok(present) => {
                    out.extend(batch.into_iter().filter(|a| present.contains(&a.article_id)));
                }
                Err(e) => {
                    warn!(error = %e, "Article store unavailable, serving trending unfiltered");
                    filtering = false;
                    out.extend(batch);
                }
            }
        }

        out.truncate(limit);
        out
    }
}

/// Head of one cell's ranking during the k-way merge.
struct Cursor<'a> {
    entries: &'a [RankedArticle],
    pos: usize,
}

impl Cursor<'_> {
    fn head(&self) -> &RankedArticle {
        &self.entries[self.pos]
    }
}

impl PartialEq for Cursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cursor<'_> {}

impl PartialOrd for Cursor<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cursor<'_> {
    // BinaryHeap is a max-heap; the best-ranked head must compare greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        rank_order(other.head(), self.head())
    }
}

/// Lazily merge sorted per-cell rankings, keeping only the first (highest)
/// occurrence of each article.
pub fn merge_unique(rankings: &[Arc<CellRanking>]) -> impl Iterator<Item = &RankedArticle> + Send {
    let mut heap: BinaryHeap<Cursor<'_>> = rankings
        .iter()
        .filter(|r| !r.entries.is_empty())
        .map(|r| Cursor {
            entries: &r.entries,
            pos: 0,
        })
        .collect();
    let mut seen = HashSet::new();

    std::iter::from_fn(move || loop {
        let mut cursor = heap.pop()?;
        let entries = cursor.entries;
        let item = &entries[cursor.pos];
        cursor.pos += 1;
        if cursor.pos < entries.len() {
            heap.push(cursor);
        }
        if seen.insert(item.article_id) {
            return Some(item);
        }
    })
}
