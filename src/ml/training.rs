//! Train-on-demand model provider

use std::sync::Arc;

use crate::config::ModelConfig;
use crate::data::HistoricalDataset;
use crate::error::PredictionError;

use super::cache::ModelProvider;
use super::features::{FeatureBuilder, TREND_LOOKBACK, TrendFeatureBuilder};
use super::model::{
    FittedPair, FittedTrend, ModelBuilder, TrainedModelPair, TrainingError, TrendModel,
};

/// Fits city models from the in-memory historical dataset.
#[derive(Debug, Clone)]
pub struct OnDemandTrainer {
    dataset: Arc<HistoricalDataset>,
    config: ModelConfig,
    trend_window: usize,
}

impl OnDemandTrainer {
    pub fn new(dataset: Arc<HistoricalDataset>, config: ModelConfig) -> Self {
        Self {
            dataset,
            config,
            trend_window: TREND_LOOKBACK,
        }
    }

    /// Rolling window length recorded on trend models (never below the lookback).
    pub fn with_trend_window(mut self, window: usize) -> Self {
        self.trend_window = window.max(TREND_LOOKBACK);
        self
    }

    fn builder(&self) -> ModelBuilder {
        ModelBuilder::new().max_depth(self.config.classifier_max_depth)
    }

    fn to_prediction_error(&self, city: &str, err: TrainingError) -> PredictionError {
        match err {
            TrainingError::InsufficientData(rows) => {
                PredictionError::insufficient(city, rows, self.config.min_city_rows)
            }
            other => PredictionError::Training(other),
        }
    }

    /// Fit the regression/classification pair for a city.
    pub fn fit_pair(&self, city: &str) -> Result<FittedPair, PredictionError> {
        let observations = self.dataset.city_observations(city);
        if observations.len() < self.config.min_city_rows {
            return Err(PredictionError::insufficient(
                city,
                observations.len(),
                self.config.min_city_rows,
            ));
        }

        let set = FeatureBuilder::default()
            .build(&observations)
            .map_err(|e| self.to_prediction_error(city, e))?;

        let fitted = self
            .builder()
            .train_pair(&set, self.config.train_fraction)
            .map_err(|e| self.to_prediction_error(city, e))?;

        tracing::info!(
            "Trained model pair for {} ({})",
            city,
            fitted.metrics.summary()
        );
        Ok(fitted)
    }

    /// Fit the AQI-trend regressor for a city.
    pub fn fit_trend(&self, city: &str) -> Result<FittedTrend, PredictionError> {
        let history = self.dataset.city_history(city);
        if history.len() < self.config.min_city_rows {
            return Err(PredictionError::insufficient(
                city,
                history.len(),
                self.config.min_city_rows,
            ));
        }

        let set = TrendFeatureBuilder::default()
            .build(&history)
            .map_err(|e| self.to_prediction_error(city, e))?;

        let fitted = self
            .builder()
            .train_trend(&set, self.config.train_fraction, self.trend_window)
            .map_err(|e| self.to_prediction_error(city, e))?;

        tracing::info!(
            "Trained trend model for {} ({})",
            city,
            fitted.metrics.summary()
        );
        Ok(fitted)
    }
}

impl ModelProvider<TrainedModelPair> for OnDemandTrainer {
    fn provide(&self, city: &str) -> Result<TrainedModelPair, PredictionError> {
        self.fit_pair(city).map(FittedPair::into_model_pair)
    }

    fn name(&self) -> &'static str {
        "on-demand training"
    }
}

impl ModelProvider<TrendModel> for OnDemandTrainer {
    fn provide(&self, city: &str) -> Result<TrendModel, PredictionError> {
        self.fit_trend(city).map(FittedTrend::into_trend_model)
    }

    fn name(&self) -> &'static str {
        "on-demand training"
    }
}
