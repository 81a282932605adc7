//! Multi-day autoregressive AQI forecasts
//!
//! Two modes share the same init/step/done loop:
//! - pollutant mode drives the city's regression model with the last observed
//!   pollutant readings held constant and the calendar advancing one day per step
//! - trend mode drives the AQI-trend model with a fixed-length rolling window
//!   of AQI values, feeding each prediction back in as the newest value

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::ForecastConfig;
use crate::data::HistoricalDataset;
use crate::error::PredictionError;

use super::cache::ModelCache;
use super::features::{FeatureVector, LagState, PollutantSnapshot, TrendFeatures};
use super::model::{TrainedModelPair, TrendModel};

/// Predicted AQI for one future day
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub aqi: f64,
}

/// Number of days to forecast, validated against the configured bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastHorizon(u32);

impl ForecastHorizon {
    pub fn new(days: u32, config: &ForecastConfig) -> Result<Self, PredictionError> {
        if days < config.min_days || days > config.max_days {
            return Err(PredictionError::InvalidInput(format!(
                "forecast horizon must be between {} and {} days, got {}",
                config.min_days, config.max_days, days
            )));
        }
        Ok(Self(days))
    }

    /// The configured default horizon, clamped into range.
    pub fn default_from(config: &ForecastConfig) -> Self {
        let max = config.max_days.max(config.min_days);
        Self(config.default_days.clamp(config.min_days, max))
    }

    pub fn days(self) -> u32 {
        self.0
    }
}

/// Fixed-length AQI series; every push drops the oldest value.
#[derive(Debug, Clone)]
pub struct RollingAqiWindow {
    values: VecDeque<f64>,
}

impl RollingAqiWindow {
    /// Keep the last `len` values of `history`. `None` if it is shorter.
    pub fn from_history(history: &[f64], len: usize) -> Option<Self> {
        if len == 0 || history.len() < len {
            return None;
        }
        Some(Self {
            values: history[history.len() - len..].iter().copied().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// Trend row predicting `date` from the current window.
    pub fn features_for(&mut self, date: NaiveDate) -> Option<TrendFeatures> {
        TrendFeatures::from_history(self.values.make_contiguous(), date)
    }

    pub fn push(&mut self, value: f64) {
        self.values.push_back(value);
        self.values.pop_front();
    }
}

/// Loop state of the pollutant-mode forecast.
#[derive(Debug, Clone, Copy)]
struct PollutantState {
    /// Held constant for the whole horizon.
    pollutants: PollutantSnapshot,
    lag: LagState,
    anchor: NaiveDate,
}

impl PollutantState {
    fn next_features(&self) -> Option<(NaiveDate, FeatureVector)> {
        let next_date = self.anchor.succ_opt()?;
        Some((
            next_date,
            FeatureVector::for_date(&self.pollutants, next_date, self.lag),
        ))
    }

    fn advance(&mut self, date: NaiveDate) {
        self.anchor = date;
        self.lag = LagState::following(&self.pollutants);
    }
}

/// Produces N-day forecasts from the cached city models.
pub struct ForecastEngine {
    dataset: Arc<HistoricalDataset>,
    pairs: Arc<ModelCache<TrainedModelPair>>,
    trends: Arc<ModelCache<TrendModel>>,
}

impl ForecastEngine {
    pub fn new(
        dataset: Arc<HistoricalDataset>,
        pairs: Arc<ModelCache<TrainedModelPair>>,
        trends: Arc<ModelCache<TrendModel>>,
    ) -> Self {
        Self {
            dataset,
            pairs,
            trends,
        }
    }

    /// Forecast `horizon` days after the city's last observation using the
    /// pollutant regressor. Returns exactly `horizon` points or an error.
    pub fn forecast(
        &self,
        city: &str,
        horizon: ForecastHorizon,
    ) -> Result<Vec<ForecastPoint>, PredictionError> {
        let model = self
            .pairs
            .get_or_train(city)
            .map_err(|e| model_unavailable(city, e))?;
        let last = self
            .dataset
            .last_observation(city)
            .ok_or_else(|| PredictionError::unavailable(city))?;

        let pollutants = PollutantSnapshot::from(last);
        let mut state = PollutantState {
            pollutants,
            lag: LagState::following(&pollutants),
            anchor: last.date,
        };

        let mut points = Vec::with_capacity(horizon.days() as usize);
        for _ in 0..horizon.days() {
            let (date, features) = state
                .next_features()
                .ok_or_else(|| date_overflow(state.anchor))?;
            let aqi = model.predict_aqi(&features).ok_or_else(|| {
                PredictionError::InvalidInput(format!("regressor for {} rejected the row", city))
            })?;
            points.push(ForecastPoint { date, aqi });
            state.advance(date);
        }

        tracing::debug!("Forecast {} days for {} from {}", points.len(), city, last.date);
        Ok(points)
    }

    /// Forecast `horizon` days from AQI history alone with the trend model.
    pub fn forecast_trend(
        &self,
        city: &str,
        horizon: ForecastHorizon,
    ) -> Result<Vec<ForecastPoint>, PredictionError> {
        let model = self
            .trends
            .get_or_train(city)
            .map_err(|e| model_unavailable(city, e))?;

        let history = self.dataset.city_history(city);
        let Some(&(last_date, _)) = history.last() else {
            return Err(PredictionError::unavailable(city));
        };
        let values: Vec<f64> = history.iter().map(|(_, aqi)| *aqi).collect();
        let mut window = RollingAqiWindow::from_history(&values, model.window()).ok_or_else(|| {
            tracing::warn!(
                "{} has {} AQI values, trend window needs {}",
                city,
                values.len(),
                model.window()
            );
            PredictionError::unavailable(city)
        })?;
        let window_len = window.len();

        let mut anchor = last_date;
        let mut points = Vec::with_capacity(horizon.days() as usize);
        for _ in 0..horizon.days() {
            let date = anchor.succ_opt().ok_or_else(|| date_overflow(anchor))?;
            let features = window
                .features_for(date)
                .ok_or_else(|| PredictionError::unavailable(city))?;
            let aqi = model.predict(&features).ok_or_else(|| {
                PredictionError::InvalidInput(format!("trend model for {} rejected the row", city))
            })?;
            points.push(ForecastPoint { date, aqi });
            window.push(aqi);
            debug_assert_eq!(window.len(), window_len);
            anchor = date;
        }

        tracing::debug!("Trend forecast {} days for {} from {}", points.len(), city, last_date);
        Ok(points)
    }
}

impl std::fmt::Debug for ForecastEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastEngine")
            .field("pairs", &self.pairs)
            .field("trends", &self.trends)
            .finish_non_exhaustive()
    }
}

/// A city that cannot get a model has no forecast; other failures pass through.
fn model_unavailable(city: &str, err: PredictionError) -> PredictionError {
    match err {
        PredictionError::InsufficientData { .. } => {
            tracing::warn!("No forecast model for {}: {}", city, err);
            PredictionError::unavailable(city)
        }
        other => other,
    }
}

fn date_overflow(anchor: NaiveDate) -> PredictionError {
    PredictionError::InvalidInput(format!("no calendar day after {}", anchor))
}
