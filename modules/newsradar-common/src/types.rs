use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TrendingError;

// --- Geo Types ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Build a point, rejecting anything outside ±90 / ±180. Never clamps.
    pub fn new(lat: f64, lon: f64) -> Result<Self, TrendingError> {
        validate_coordinates(lat, lon)?;
        Ok(Self { lat, lon })
    }

    /// Build a point from an optional lat/lon pair. Both or neither must be present.
    pub fn from_optional(lat: Option<f64>, lon: Option<f64>) -> Result<Option<Self>, TrendingError> {
        match (lat, lon) {
            (Some(lat), Some(lon)) => Self::new(lat, lon).map(Some),
            (None, None) => Ok(None),
            _ => Err(TrendingError::validation(
                "lat and lon must be provided together",
            )),
        }
    }

    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(self.lat, self.lon, other.lat, other.lon)
    }
}

pub fn validate_coordinates(lat: f64, lon: f64) -> Result<(), TrendingError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(TrendingError::Validation(format!(
            "latitude {lat} outside [-90, 90]"
        )));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(TrendingError::Validation(format!(
            "longitude {lon} outside [-180, 180]"
        )));
    }
    Ok(())
}

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine great-circle distance between two lat/lon points in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_KM * c
}

/// A spatial cell: geohash of a point at the engine's fixed precision.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    View,
    Click,
    Share,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::View, EventKind::Click, EventKind::Share];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::View => "view",
            EventKind::Click => "click",
            EventKind::Share => "share",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = TrendingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" => Ok(EventKind::View),
            "click" => Ok(EventKind::Click),
            "share" => Ok(EventKind::Share),
            other => Err(TrendingError::Validation(format!(
                "unknown event kind '{other}'"
            ))),
        }
    }
}

// --- Interaction events ---

/// A persisted user interaction. Returned by all Event Store reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    /// Store-assigned, monotonically increasing sequence number.
    pub seq: i64,
    pub id: Uuid,
    /// `None` once the article has been deleted. The event stays but contributes nothing.
    pub article_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub kind: EventKind,
    pub point: Option<GeoPoint>,
    /// Present iff `point` is present.
    pub cell: Option<CellId>,
    pub created_at: DateTime<Utc>,
}

/// An interaction to be appended. The store assigns seq, id and (if absent) the timestamp.
#[derive(Debug, Clone)]
pub struct NewInteraction {
    pub article_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub kind: EventKind,
    pub point: Option<GeoPoint>,
    pub cell: Option<CellId>,
    pub created_at: Option<DateTime<Utc>>,
}

impl NewInteraction {
    pub fn new(article_id: Uuid, kind: EventKind) -> Self {
        Self {
            article_id: Some(article_id),
            user_id: None,
            kind,
            point: None,
            cell: None,
            created_at: None,
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn located(mut self, point: GeoPoint, cell: CellId) -> Self {
        self.point = Some(point);
        self.cell = Some(cell);
        self
    }

    /// Backdate the event (simulation, replays). Defaults to "now" in the store.
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// One article's position in a cell ranking or a merged trending result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedArticle {
    pub article_id: Uuid,
    pub score: f64,
    pub last_event_at: DateTime<Utc>,
}
