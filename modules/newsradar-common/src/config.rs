use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::TrendingError;

/// Application configuration loaded from environment variables.
/// Trending tunables come from the optional TOML file at `TRENDING_CONFIG_PATH`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres URL. When unset the engine runs on in-memory stores.
    pub database_url: Option<String>,

    // Web server
    pub api_host: String,
    pub api_port: u16,

    pub trending: TrendingSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, TrendingError> {
        dotenvy::dotenv().ok();

        let api_port = env::var("API_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| TrendingError::Config("API_PORT must be a number".into()))?;

        let trending = match env::var("TRENDING_CONFIG_PATH").ok() {
            Some(path) => load_settings(&PathBuf::from(path))?,
            None => TrendingSettings::default(),
        };
        trending.validate()?;

        let config = Self {
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port,
            trending,
        };

        config.log_summary();
        Ok(config)
    }

    fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  DATABASE_URL: {}",
            if self.database_url.is_some() { "<set>" } else { "<not set, in-memory stores>" }
        );
        tracing::info!(
            precision = self.trending.cell_precision,
            half_life_secs = self.trending.half_life_secs,
            retention_secs = self.trending.retention_secs,
            cache_ttl_secs = self.trending.cache_ttl_secs,
            "  trending settings"
        );
    }
}

/// Per-kind event weights. Must satisfy share > click > view > 0.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventWeights {
    pub view: f64,
    pub click: f64,
    pub share: f64,
}

impl Default for EventWeights {
    fn default() -> Self {
        Self {
            view: 1.0,
            click: 3.0,
            share: 5.0,
        }
    }
}

/// Trending Engine tunables. Read-only after startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrendingSettings {
    /// Geohash precision of a spatial cell (5 ≈ 4.9 km × 4.9 km).
    pub cell_precision: usize,
    pub half_life_secs: u64,
    /// Events older than this contribute zero and are skipped by recompute scans.
    pub retention_secs: u64,
    pub weights: EventWeights,
    pub cache_ttl_secs: u64,
    pub scan_timeout_ms: u64,
    pub sweep_interval_secs: u64,
    /// How long an expired ranking is kept around as a stale fallback.
    pub stale_retention_secs: u64,
    pub default_radius_km: f64,
    pub max_radius_km: f64,
    pub max_limit: usize,
}

impl Default for TrendingSettings {
    fn default() -> Self {
        Self {
            cell_precision: 5,
            half_life_secs: 6 * 3600,
            retention_secs: 48 * 3600,
            weights: EventWeights::default(),
            cache_ttl_secs: 300,
            scan_timeout_ms: 2_000,
            sweep_interval_secs: 60,
            stale_retention_secs: 30 * 60,
            default_radius_km: 50.0,
            max_radius_km: 100.0,
            max_limit: 50,
        }
    }
}

impl TrendingSettings {
    pub fn validate(&self) -> Result<(), TrendingError> {
        if !(1..=12).contains(&self.cell_precision) {
            return Err(TrendingError::Config(format!(
                "cell_precision must be in 1..=12, got {}",
                self.cell_precision
            )));
        }
        if self.half_life_secs == 0 {
            return Err(TrendingError::Config("half_life_secs must be > 0".into()));
        }
        if self.retention_secs < self.half_life_secs {
            return Err(TrendingError::Config(
                "retention_secs must be at least one half-life".into(),
            ));
        }
        let w = &self.weights;
        if !(w.share > w.click && w.click > w.view && w.view > 0.0) {
            return Err(TrendingError::Config(format!(
                "weights must satisfy share > click > view > 0, got {}/{}/{}",
                w.share, w.click, w.view
            )));
        }
        if self.cache_ttl_secs == 0 || self.scan_timeout_ms == 0 {
            return Err(TrendingError::Config(
                "cache_ttl_secs and scan_timeout_ms must be > 0".into(),
            ));
        }
        if !(self.max_radius_km > 0.0 && self.default_radius_km > 0.0)
            || self.default_radius_km > self.max_radius_km
        {
            return Err(TrendingError::Config(
                "radius bounds must satisfy 0 < default_radius_km <= max_radius_km".into(),
            ));
        }
        if self.max_limit == 0 {
            return Err(TrendingError::Config("max_limit must be > 0".into()));
        }
        Ok(())
    }

    pub fn half_life(&self) -> Duration {
        Duration::from_secs(self.half_life_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_retention(&self) -> Duration {
        Duration::from_secs(self.stale_retention_secs)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    trending: TrendingSettings,
}

/// Load trending settings from the `[trending]` table of a TOML file.
pub fn load_settings(path: &Path) -> Result<TrendingSettings, TrendingError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        TrendingError::Config(format!("Failed to read config file {}: {e}", path.display()))
    })?;
    parse_settings(&content)
        .map_err(|e| TrendingError::Config(format!("{}: {e}", path.display())))
}

fn parse_settings(content: &str) -> Result<TrendingSettings, TrendingError> {
    let file: FileConfig = toml::from_str(content)
        .map_err(|e| TrendingError::Config(format!("Failed to parse config: {e}")))?;
    Ok(file.trending)
}
