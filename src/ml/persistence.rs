//! Model persistence - save and load trained models

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::error::PredictionError;

use super::cache::ModelProvider;
use super::model::{FittedPair, FittedTrend, TrainedModelPair, TrendModel};

/// Versioned envelope around a fitted model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedModel<T> {
    /// Version for backward compatibility
    pub version: u32,
    /// When the file was written
    pub created_at: DateTime<Utc>,
    /// City the model was trained for
    pub city: String,
    pub model: T,
}

impl<T> PersistedModel<T> {
    /// Current version number. Version 1 stored an unpenalised pair regressor
    /// and is no longer readable.
    pub const CURRENT_VERSION: u32 = 2;

    pub fn new(city: &str, model: T) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            created_at: Utc::now(),
            city: city.to_string(),
            model,
        }
    }
}

impl<T: Serialize> PersistedModel<T> {
    /// Save to a file using bincode
    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::IoError(e.to_string()))?;
        }

        let bytes =
            bincode::serialize(self).map_err(|e| PersistenceError::SerializeError(e.to_string()))?;

        fs::write(path, bytes).map_err(|e| PersistenceError::IoError(e.to_string()))?;

        Ok(())
    }
}

impl<T: DeserializeOwned> PersistedModel<T> {
    /// Load from a file
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        if !path.exists() {
            return Err(PersistenceError::FileNotFound(
                path.to_string_lossy().to_string(),
            ));
        }

        let bytes = fs::read(path).map_err(|e| PersistenceError::IoError(e.to_string()))?;

        let model: Self = bincode::deserialize(&bytes)
            .map_err(|e| PersistenceError::DeserializeError(e.to_string()))?;

        if model.version != Self::CURRENT_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: Self::CURRENT_VERSION,
                found: model.version,
            });
        }

        Ok(model)
    }
}

/// Directory-backed model storage: `<model_dir>/<city>_pair.bin` and
/// `<forecast_model_dir>/<city>_trend.bin`.
#[derive(Debug, Clone)]
pub struct ModelStore {
    model_dir: PathBuf,
    forecast_model_dir: PathBuf,
}

impl ModelStore {
    pub fn new(model_dir: impl Into<PathBuf>, forecast_model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            forecast_model_dir: forecast_model_dir.into(),
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(&config.model_dir, &config.forecast_model_dir)
    }

    pub fn pair_path(&self, city: &str) -> Result<PathBuf, PredictionError> {
        Ok(self.model_dir.join(format!("{}_pair.bin", file_stem(city)?)))
    }

    pub fn trend_path(&self, city: &str) -> Result<PathBuf, PredictionError> {
        Ok(self
            .forecast_model_dir
            .join(format!("{}_trend.bin", file_stem(city)?)))
    }

    pub fn save_pair(&self, city: &str, fitted: &FittedPair) -> Result<PathBuf, PredictionError> {
        let path = self.pair_path(city)?;
        PersistedModel::new(city, fitted).save(&path)?;
        tracing::info!("Saved model pair for {} to {}", city, path.display());
        Ok(path)
    }

    pub fn save_trend(&self, city: &str, fitted: &FittedTrend) -> Result<PathBuf, PredictionError> {
        let path = self.trend_path(city)?;
        PersistedModel::new(city, fitted).save(&path)?;
        tracing::info!("Saved trend model for {} to {}", city, path.display());
        Ok(path)
    }

    pub fn load_pair(&self, city: &str) -> Result<FittedPair, PredictionError> {
        load_for_city(city, &self.pair_path(city)?)
    }

    pub fn load_trend(&self, city: &str) -> Result<FittedTrend, PredictionError> {
        load_for_city(city, &self.trend_path(city)?)
    }
}

/// City names become file names, so path separators are rejected.
fn file_stem(city: &str) -> Result<&str, PredictionError> {
    let city = city.trim();
    if city.is_empty() || city.contains(['/', '\\']) || city == "." || city == ".." {
        return Err(PredictionError::InvalidInput(format!(
            "invalid city name: {:?}",
            city
        )));
    }
    Ok(city)
}

fn load_for_city<T: DeserializeOwned>(city: &str, path: &Path) -> Result<T, PredictionError> {
    match PersistedModel::<T>::load(path) {
        Ok(persisted) => {
            if persisted.city != city {
                tracing::warn!(
                    "Model file {} was written for {}, serving it for {}",
                    path.display(),
                    persisted.city,
                    city
                );
            }
            tracing::debug!(
                "Loaded model v{} for {} (created {})",
                persisted.version,
                city,
                persisted.created_at.format("%Y-%m-%d %H:%M UTC")
            );
            Ok(persisted.model)
        }
        Err(PersistenceError::FileNotFound(_)) => Err(PredictionError::unavailable(city)),
        Err(e) => Err(e.into()),
    }
}

impl ModelProvider<TrainedModelPair> for ModelStore {
    fn provide(&self, city: &str) -> Result<TrainedModelPair, PredictionError> {
        self.load_pair(city).map(FittedPair::into_model_pair)
    }

    fn name(&self) -> &'static str {
        "model store"
    }
}

impl ModelProvider<TrendModel> for ModelStore {
    fn provide(&self, city: &str) -> Result<TrendModel, PredictionError> {
        self.load_trend(city).map(FittedTrend::into_trend_model)
    }

    fn name(&self) -> &'static str {
        "model store"
    }
}

/// Errors that can occur during model persistence
#[derive(Debug, Clone)]
pub enum PersistenceError {
    /// File not found
    FileNotFound(String),
    /// IO error
    IoError(String),
    /// Serialization error
    SerializeError(String),
    /// Deserialization error
    DeserializeError(String),
    /// Version mismatch
    VersionMismatch { expected: u32, found: u32 },
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::FileNotFound(path) => write!(f, "Model file not found: {}", path),
            PersistenceError::IoError(e) => write!(f, "IO error: {}", e),
            PersistenceError::SerializeError(e) => write!(f, "Serialization error: {}", e),
            PersistenceError::DeserializeError(e) => write!(f, "Deserialization error: {}", e),
            PersistenceError::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Model version mismatch: expected v{}, found v{}",
                    expected, found
                )
            }
        }
    }
}

impl std::error::Error for PersistenceError {}
