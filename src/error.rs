//! Errors surfaced by the prediction core.

use thiserror::Error;

use crate::ml::model::TrainingError;
use crate::ml::persistence::PersistenceError;

/// Errors returned by model providers, the prediction service and the
/// forecast engine. Every variant is a per-request failure; none of them
/// should terminate the process.
#[derive(Debug, Clone, Error)]
pub enum PredictionError {
    /// The city has too little history to train on. Retry once more data exists.
    #[error("Insufficient data for {city}: {rows} rows, at least {required} required")]
    InsufficientData {
        city: String,
        rows: usize,
        required: usize,
    },
    /// No model exists (or can be built) for the city.
    #[error("No model available for {city}")]
    ModelUnavailable { city: String },
    /// Malformed input, or a model output that violates an invariant.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Fitting failed. Not cached, so the same call will retry training.
    #[error("Training failed: {0}")]
    Training(#[from] TrainingError),
    /// A stored model could not be read or written.
    #[error("Model storage error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl PredictionError {
    pub fn insufficient(city: &str, rows: usize, required: usize) -> Self {
        Self::InsufficientData {
            city: city.to_string(),
            rows,
            required,
        }
    }

    pub fn unavailable(city: &str) -> Self {
        Self::ModelUnavailable {
            city: city.to_string(),
        }
    }

    /// Whether the caller may reasonably retry later with more data.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InsufficientData { .. } | Self::Training(_))
    }
}
