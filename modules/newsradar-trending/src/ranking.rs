//! Bucket Aggregator: per-cell rankings, full recompute and incremental update.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use newsradar_common::{CellId, InteractionEvent, RankedArticle, TrendingError};
use newsradar_events::InteractionStore;

use crate::decay::DecayPolicy;

/// Ranking order: score desc, then most recent event, then article id asc.
pub fn rank_order(a: &RankedArticle, b: &RankedArticle) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.last_event_at.cmp(&a.last_event_at))
        .then_with(|| a.article_id.cmp(&b.article_id))
}

/// Article ranking for one spatial cell.
#[derive(Debug, Clone)]
pub struct CellRanking {
    pub cell: CellId,
    /// Sorted by [`rank_order`]. No article appears twice.
    pub entries: Vec<RankedArticle>,
    pub computed_at: DateTime<Utc>,
    /// Highest event `seq` covered by the scan this ranking was built from.
    /// Fixed until the next recompute.
    pub watermark: i64,
    /// Seqs above the watermark folded in since the scan. Events can be
    /// folded out of seq order, so this is tracked per seq rather than as a
    /// running maximum.
    folded: HashSet<i64>,
}

impl CellRanking {
    pub fn empty(cell: CellId, computed_at: DateTime<Utc>) -> Self {
        Self {
            cell,
            entries: Vec::new(),
            computed_at,
            watermark: 0,
            folded: HashSet::new(),
        }
    }

    /// Build a ranking from a full scan of the cell's events.
    pub fn from_events(
        cell: CellId,
        events: &[InteractionEvent],
        policy: &DecayPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let mut totals: HashMap<Uuid, (f64, DateTime<Utc>)> = HashMap::new();
        let mut watermark = 0;

        for event in events {
            watermark = watermark.max(event.seq);
            let Some(article_id) = event.article_id else {
                continue;
            };
            let contribution = policy.contribution(event.kind, event.created_at, now);
            let entry = totals.entry(article_id).or_insert((0.0, event.created_at));
            entry.0 += contribution;
            entry.1 = entry.1.max(event.created_at);
        }

        let mut entries: Vec<RankedArticle> = totals
            .into_iter()
            .filter(|(_, (score, _))| *score > 0.0)
            .map(|(article_id, (score, last_event_at))| RankedArticle {
                article_id,
                score,
                last_event_at,
            })
            .collect();
        entries.sort_by(rank_order);

        Self {
            cell,
            entries,
            computed_at: now,
            watermark,
            folded: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest seq reflected in this ranking, from the scan or folded since.
    pub fn latest_seq(&self) -> i64 {
        self.folded.iter().copied().fold(self.watermark, i64::max)
    }

    pub fn score_of(&self, article_id: Uuid) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.article_id == article_id)
            .map(|e| e.score)
    }

    /// Add `contribution` to an article's score (appending it if absent) and move
    /// it forward until ordering holds again. Only that one entry moves, and
    /// contributions are non-negative, so a local bubble is enough.
    pub fn apply(&mut self, article_id: Uuid, contribution: f64, event_at: DateTime<Utc>) {
        if contribution <= 0.0 || !contribution.is_finite() {
            return;
        }

        let mut i = match self.entries.iter().position(|e| e.article_id == article_id) {
            Some(i) => {
                let entry = &mut self.entries[i];
                entry.score += contribution;
                entry.last_event_at = entry.last_event_at.max(event_at);
                i
            }
            None => {
                self.entries.push(RankedArticle {
                    article_id,
                    score: contribution,
                    last_event_at: event_at,
                });
                self.entries.len() - 1
            }
        };

        while i > 0 && rank_order(&self.entries[i], &self.entries[i - 1]) == Ordering::Less {
            self.entries.swap(i, i - 1);
            i -= 1;
        }
    }

    /// Fold a newly observed event into the ranking. Events at or below the
    /// watermark were counted by the scan, and events already folded are
    /// counted once. Returns true if the event was new to this ranking.
    pub fn fold(&mut self, event: &InteractionEvent, policy: &DecayPolicy, now: DateTime<Utc>) -> bool {
        if event.seq <= self.watermark || !self.folded.insert(event.seq) {
            return false;
        }
        if let Some(article_id) = event.article_id {
            let contribution = policy.contribution(event.kind, event.created_at, now);
            self.apply(article_id, contribution, event.created_at);
        }
        true
    }
}

/// Full recompute of one cell from the Event Store.
pub async fn recompute<S>(
    store: &S,
    cell: &CellId,
    policy: &DecayPolicy,
    now: DateTime<Utc>,
) -> Result<CellRanking, TrendingError>
where
    S: InteractionStore + ?Sized,
{
    let events = store
        .scan_cell(cell, policy.cutoff(now))
        .await
        .map_err(|e| TrendingError::Upstream(format!("scan of cell {cell} failed: {e}")))?;

    Ok(CellRanking::from_events(cell.clone(), &events, policy, now))
}
