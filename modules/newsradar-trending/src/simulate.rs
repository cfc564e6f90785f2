//! Synthetic engagement for demos and load checks.

use std::ops::RangeInclusive;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use newsradar_common::{EventKind, GeoPoint, NewInteraction, TrendingError};

use crate::geo::GeoBucketer;

pub const NUM_EVENTS_RANGE: RangeInclusive<usize> = 100..=5000;
pub const DEFAULT_NUM_EVENTS: usize = 500;
/// Only the first this-many articles receive simulated engagement.
pub const SAMPLE_ARTICLES: usize = 100;

/// Share of events placed near one of [`CITY_CENTERS`]; the rest are uniform.
const CITY_SHARE: f64 = 0.7;
/// Max offset from a city center, in degrees (roughly 50 km).
const CITY_NOISE_DEG: f64 = 0.5;

pub const CITY_CENTERS: [(&str, f64, f64); 6] = [
    ("San Francisco", 37.7749, -122.4194),
    ("New York", 40.7128, -74.0060),
    ("Los Angeles", 34.0522, -118.2437),
    ("London", 51.5074, -0.1278),
    ("Mumbai", 19.0760, 72.8777),
    ("Delhi", 28.7041, 77.1025),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimulationSummary {
    pub generated: usize,
    pub articles: usize,
    pub views: usize,
    pub clicks: usize,
    pub shares: usize,
}

impl SimulationSummary {
    pub fn of(events: &[NewInteraction], articles: usize) -> Self {
        let mut summary = Self {
            generated: events.len(),
            articles,
            ..Self::default()
        };
        for event in events {
            match event.kind {
                EventKind::View => summary.views += 1,
                EventKind::Click => summary.clicks += 1,
                EventKind::Share => summary.shares += 1,
            }
        }
        summary
    }
}

/// 70% views, 25% clicks, 5% shares.
fn pick_kind<R: Rng + ?Sized>(rng: &mut R) -> EventKind {
    let roll: f64 = rng.random();
    if roll < 0.70 {
        EventKind::View
    } else if roll < 0.95 {
        EventKind::Click
    } else {
        EventKind::Share
    }
}

fn pick_point<R: Rng + ?Sized>(rng: &mut R) -> GeoPoint {
    if rng.random_bool(CITY_SHARE) {
        let (_, lat, lon) = CITY_CENTERS[rng.random_range(0..CITY_CENTERS.len())];
        GeoPoint {
            lat: (lat + rng.random_range(-CITY_NOISE_DEG..=CITY_NOISE_DEG)).clamp(-90.0, 90.0),
            lon: (lon + rng.random_range(-CITY_NOISE_DEG..=CITY_NOISE_DEG)).clamp(-180.0, 180.0),
        }
    } else {
        GeoPoint {
            lat: rng.random_range(-90.0..=90.0),
            lon: rng.random_range(-180.0..=180.0),
        }
    }
}

/// Build `num_events` located interactions over `article_ids`, timestamped
/// uniformly within `spread` before `now`.
pub fn generate_events<R: Rng + ?Sized>(
    rng: &mut R,
    bucketer: &GeoBucketer,
    article_ids: &[Uuid],
    num_events: usize,
    now: DateTime<Utc>,
    spread: Duration,
) -> Result<Vec<NewInteraction>, TrendingError> {
    if !NUM_EVENTS_RANGE.contains(&num_events) {
        return Err(TrendingError::Validation(format!(
            "num_events must be in {}..={}, got {num_events}",
            NUM_EVENTS_RANGE.start(),
            NUM_EVENTS_RANGE.end()
        )));
    }
    let pool = &article_ids[..article_ids.len().min(SAMPLE_ARTICLES)];
    if pool.is_empty() {
        return Err(TrendingError::validation("no articles to simulate events for"));
    }

    let spread_ms = spread.as_millis().min(i64::MAX as u128) as i64;
    let mut events = Vec::with_capacity(num_events);
    for _ in 0..num_events {
        let Some(&article_id) = pool.choose(rng) else {
            break;
        };
        let point = pick_point(rng);
        let cell = bucketer.cell_of(point.lat, point.lon)?;
        let age = if spread_ms > 0 {
            TimeDelta::milliseconds(rng.random_range(0..spread_ms))
        } else {
            TimeDelta::zero()
        };

        events.push(
            NewInteraction::new(article_id, pick_kind(rng))
                .located(point, cell)
                .at(now - age),
        );
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn articles(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn generates_located_backdated_events() {
        let mut rng = StdRng::seed_from_u64(7);
        let now = Utc::now();
        let ids = articles(150);
        let events = generate_events(
            &mut rng,
            &GeoBucketer::new(5, 100.0),
            &ids,
            1000,
            now,
            Duration::from_secs(48 * 3600),
        )
        .unwrap();

        assert_eq!(events.len(), 1000);
        for e in &events {
            assert!(e.cell.is_some() && e.point.is_some());
            let at = e.created_at.unwrap();
            assert!(at <= now && at >= now - TimeDelta::hours(48));
            assert!(ids[..SAMPLE_ARTICLES].contains(&e.article_id.unwrap()));
        }

        let summary = SimulationSummary::of(&events, SAMPLE_ARTICLES);
        assert_eq!(summary.views + summary.clicks + summary.shares, 1000);
        assert!(summary.views > summary.clicks && summary.clicks > summary.shares);
    }

    #[test]
    fn rejects_out_of_range_counts() {
        let mut rng = StdRng::seed_from_u64(1);
        let b = GeoBucketer::new(5, 100.0);
        let ids = articles(3);
        let now = Utc::now();
        let spread = Duration::from_secs(60);
        assert!(generate_events(&mut rng, &b, &ids, 99, now, spread).is_err());
        assert!(generate_events(&mut rng, &b, &ids, 5001, now, spread).is_err());
        assert!(generate_events(&mut rng, &b, &[], 500, now, spread).is_err());
    }
}
