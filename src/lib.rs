//! AQI Forecast Library
//!
//! Per-city air-quality prediction: feature construction from historical
//! station data, train-once model caching, point predictions and multi-day
//! forecasts.

pub mod aqi;
pub mod config;
pub mod data;
pub mod error;
pub mod ml;
pub mod traits;

// Re-export commonly used types
pub use aqi::AqiBucket;
pub use config::{AppConfig, ForecastConfig, ModelConfig, ModelSource};
pub use data::{HistoricalDataset, Observation};
pub use error::PredictionError;
pub use ml::{
    FeatureBuilder, FeatureVector, ForecastEngine, ForecastHorizon, ForecastPoint, LagState,
    LivePrediction, ModelCache, ModelProvider, ModelStore, OnDemandTrainer, PollutantSnapshot,
    Prediction, PredictionService, TrainedModelPair, TrendModel, model_pair_cache,
    trend_model_cache,
};
pub use traits::{Clock, LiveSnapshot, LiveSnapshotSource, MockClock, MockLiveSource, SystemClock};
