//! Machine learning core for city AQI prediction
//!
//! Each city gets a regression/classification pair trained on its pollutant
//! history, plus an optional AQI-trend regressor for history-only forecasts.
//! Models are built once per city and served from a [`ModelCache`].

pub mod cache;
pub mod features;
pub mod forecast;
pub mod model;
pub mod persistence;
pub mod predict;
pub mod training;

use std::sync::Arc;

use crate::config::{ModelConfig, ModelSource};
use crate::data::HistoricalDataset;

pub use cache::{ModelCache, ModelProvider};
pub use features::{
    FeatureBuilder, FeatureRow, FeatureVector, LagState, PollutantSnapshot, TrainingSet,
    TrendFeatureBuilder, TrendFeatures,
};
pub use forecast::{ForecastEngine, ForecastHorizon, ForecastPoint, RollingAqiWindow};
pub use model::{ModelBuilder, ModelMetrics, TrainedModelPair, TrainingError, TrendModel};
pub use persistence::{ModelStore, PersistenceError};
pub use predict::{LivePrediction, Prediction, PredictionService};
pub use training::OnDemandTrainer;

/// Cache of regression/classification pairs backed by the configured source.
pub fn model_pair_cache(
    config: &ModelConfig,
    dataset: Arc<HistoricalDataset>,
) -> ModelCache<TrainedModelPair> {
    match config.source {
        ModelSource::Train => ModelCache::new(OnDemandTrainer::new(dataset, config.clone())),
        ModelSource::Stored => ModelCache::new(ModelStore::from_config(config)),
    }
}

/// Cache of AQI-trend models backed by the configured source.
pub fn trend_model_cache(
    config: &ModelConfig,
    dataset: Arc<HistoricalDataset>,
    trend_window: usize,
) -> ModelCache<TrendModel> {
    match config.source {
        ModelSource::Train => ModelCache::new(
            OnDemandTrainer::new(dataset, config.clone()).with_trend_window(trend_window),
        ),
        ModelSource::Stored => ModelCache::new(ModelStore::from_config(config)),
    }
}
