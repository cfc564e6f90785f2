//! Event Weigher: per-kind weights and exponential time decay.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use newsradar_common::{EventKind, EventWeights, TrendingError, TrendingSettings};

/// Half-life, per-kind weights and retention window. Read-only after startup.
#[derive(Debug, Clone)]
pub struct DecayPolicy {
    half_life: Duration,
    weights: EventWeights,
    retention: Duration,
}

impl DecayPolicy {
    pub fn new(
        half_life: Duration,
        weights: EventWeights,
        retention: Duration,
    ) -> Result<Self, TrendingError> {
        if half_life.is_zero() {
            return Err(TrendingError::validation("half-life must be positive"));
        }
        if !(weights.share > weights.click && weights.click > weights.view && weights.view > 0.0) {
            return Err(TrendingError::Validation(format!(
                "weights must satisfy share > click > view > 0, got {}/{}/{}",
                weights.share, weights.click, weights.view
            )));
        }
        Ok(Self {
            half_life,
            weights,
            retention,
        })
    }

    pub fn from_settings(settings: &TrendingSettings) -> Result<Self, TrendingError> {
        Self::new(settings.half_life(), settings.weights, settings.retention())
    }

    pub fn weight(&self, kind: EventKind) -> f64 {
        match kind {
            EventKind::View => self.weights.view,
            EventKind::Click => self.weights.click,
            EventKind::Share => self.weights.share,
        }
    }

    pub fn half_life(&self) -> Duration {
        self.half_life
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Oldest event timestamp that can still contribute at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.retention)
            .ok()
            .and_then(|r| now.checked_sub_signed(r))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Decayed contribution of one event of `kind` at `event_time`, seen from `now`.
    /// Zero once the event is older than the retention window.
    pub fn contribution(&self, kind: EventKind, event_time: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        if event_time < self.cutoff(now) {
            return 0.0;
        }
        decayed_contribution(self.weight(kind), event_time, now, self.half_life)
    }
}

/// `w · 2^(-(now - event_time) / half_life)`. Future timestamps count as age 0.
pub fn decayed_contribution(
    weight: f64,
    event_time: DateTime<Utc>,
    now: DateTime<Utc>,
    half_life: Duration,
) -> f64 {
    let age_ms = (now - event_time).num_milliseconds().max(0) as f64;
    let half_life_ms = half_life.as_secs_f64() * 1000.0;
    weight * (-age_ms / half_life_ms).exp2()
}
