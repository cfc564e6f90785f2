use thiserror::Error;

use crate::types::CellId;

#[derive(Error, Debug)]
pub enum TrendingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error("Trending degraded for cell {cell}: {reason}")]
    Degraded { cell: CellId, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl TrendingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        TrendingError::Validation(msg.into())
    }

    /// True for failures the caller caused (bad input), as opposed to
    /// failures of the stores behind the engine.
    pub fn is_validation(&self) -> bool {
        matches!(self, TrendingError::Validation(_))
    }
}
