//! Feature construction for the city models
//!
//! Converts a city's chronological observations into supervised-learning rows:
//! pollutant features for the regression/classification pair, and lagged AQI
//! features for the trend forecaster.

use chrono::{Datelike, NaiveDate};

use crate::aqi::AqiBucket;
use crate::data::Observation;
use crate::error::PredictionError;

use super::model::{ModelBuilder, TrainingError};

/// A fixed-width numeric row a model can consume.
pub trait FeatureRow {
    /// Number of features in every row
    const NUM_FEATURES: usize;

    /// Flatten into the model's column order
    fn to_vec(&self) -> Vec<f64>;
}

/// Month (1..=12) and day of week (Monday = 0) of a date.
fn calendar(date: NaiveDate) -> (f64, f64) {
    (
        date.month() as f64,
        date.weekday().num_days_from_monday() as f64,
    )
}

/// The six pollutant concentrations of one day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollutantSnapshot {
    pub pm25: f64,
    pub pm10: f64,
    pub no2: f64,
    pub so2: f64,
    pub co: f64,
    pub o3: f64,
}

impl From<&Observation> for PollutantSnapshot {
    fn from(obs: &Observation) -> Self {
        Self {
            pm25: obs.pm25,
            pm10: obs.pm10,
            no2: obs.no2,
            so2: obs.so2,
            co: obs.co,
            o3: obs.o3,
        }
    }
}

/// Previous-day PM2.5 and PM10.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LagState {
    pub pm25: f64,
    pub pm10: f64,
}

impl LagState {
    /// The lag values implied by today's readings for tomorrow's row.
    pub fn following(pollutants: &PollutantSnapshot) -> Self {
        Self {
            pm25: pollutants.pm25,
            pm10: pollutants.pm10,
        }
    }
}

/// Input row for the regression/classification pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub pm25: f64,
    pub pm10: f64,
    pub no2: f64,
    pub so2: f64,
    pub co: f64,
    pub o3: f64,
    pub month: f64,
    pub day_of_week: f64,
    pub pm25_lag1: f64,
    pub pm10_lag1: f64,
}

impl FeatureVector {
    /// Build the row for `date` from its pollutant readings and the previous day's lag values.
    pub fn for_date(pollutants: &PollutantSnapshot, date: NaiveDate, lag: LagState) -> Self {
        let (month, day_of_week) = calendar(date);
        Self {
            pm25: pollutants.pm25,
            pm10: pollutants.pm10,
            no2: pollutants.no2,
            so2: pollutants.so2,
            co: pollutants.co,
            o3: pollutants.o3,
            month,
            day_of_week,
            pm25_lag1: lag.pm25,
            pm10_lag1: lag.pm10,
        }
    }

    /// Parse a raw row in model column order.
    pub fn from_slice(values: &[f64]) -> Result<Self, PredictionError> {
        let &[pm25, pm10, no2, so2, co, o3, month, day_of_week, pm25_lag1, pm10_lag1] = values
        else {
            return Err(PredictionError::InvalidInput(format!(
                "expected {} feature values, got {}",
                Self::NUM_FEATURES,
                values.len()
            )));
        };

        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(PredictionError::InvalidInput(format!(
                "feature {} is not a finite number",
                Self::feature_names()[pos]
            )));
        }

        Ok(Self {
            pm25,
            pm10,
            no2,
            so2,
            co,
            o3,
            month,
            day_of_week,
            pm25_lag1,
            pm10_lag1,
        })
    }

    /// Feature names for debugging/logging
    pub fn feature_names() -> Vec<&'static str> {
        vec![
            "PM2.5",
            "PM10",
            "NO2",
            "SO2",
            "CO",
            "O3",
            "month",
            "dayofweek",
            "PM2.5_lag1",
            "PM10_lag1",
        ]
    }
}

impl FeatureRow for FeatureVector {
    const NUM_FEATURES: usize = 10;

    fn to_vec(&self) -> Vec<f64> {
        vec![
            self.pm25,
            self.pm10,
            self.no2,
            self.so2,
            self.co,
            self.o3,
            self.month,
            self.day_of_week,
            self.pm25_lag1,
            self.pm10_lag1,
        ]
    }
}

/// Feature matrix and both label vectors for one city, in date order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrainingSet {
    pub dates: Vec<NaiveDate>,
    pub features: Vec<FeatureVector>,
    pub aqi: Vec<f64>,
    pub buckets: Vec<AqiBucket>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Bucket labels as classifier class indices
    pub fn bucket_indices(&self) -> Vec<usize> {
        self.buckets.iter().map(|b| b.index()).collect()
    }
}

/// Turns a city's observations into a supervised-learning set.
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    min_rows: usize,
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN_ROWS)
    }
}

impl FeatureBuilder {
    /// Below this many rows no train/test split is attempted.
    pub const DEFAULT_MIN_ROWS: usize = ModelBuilder::MIN_SPLIT_ROWS;

    pub fn new(min_rows: usize) -> Self {
        Self { min_rows }
    }

    /// Sort by date, derive calendar and one-day lag features, and drop the
    /// first row (it has no predecessor).
    pub fn build(&self, observations: &[Observation]) -> Result<TrainingSet, TrainingError> {
        let mut sorted: Vec<&Observation> = observations.iter().collect();
        sorted.sort_by_key(|o| o.date);

        let mut set = TrainingSet::default();
        for pair in sorted.windows(2) {
            let (prev, current) = (pair[0], pair[1]);
            let pollutants = PollutantSnapshot::from(current);
            let lag = LagState {
                pm25: prev.pm25,
                pm10: prev.pm10,
            };

            set.dates.push(current.date);
            set.features
                .push(FeatureVector::for_date(&pollutants, current.date, lag));
            set.aqi.push(current.aqi);
            set.buckets.push(current.bucket);
        }

        if set.len() < self.min_rows {
            return Err(TrainingError::InsufficientData(set.len()));
        }

        Ok(set)
    }
}

// ==================== Trend Features ====================

/// Trailing AQI values needed to build one trend row.
pub const TREND_LOOKBACK: usize = 7;

/// Input row for the AQI-trend forecaster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendFeatures {
    pub lag1: f64,
    pub lag2: f64,
    pub lag3: f64,
    pub roll3: f64,
    pub roll7: f64,
    pub day_of_month: f64,
    pub month: f64,
    pub day_of_week: f64,
}

impl TrendFeatures {
    /// Build the row predicting `target_date` from the AQI values before it
    /// (oldest first). Needs at least [`TREND_LOOKBACK`] values.
    pub fn from_history(recent: &[f64], target_date: NaiveDate) -> Option<Self> {
        if recent.len() < TREND_LOOKBACK {
            return None;
        }

        let n = recent.len();
        let mean = |values: &[f64]| values.iter().sum::<f64>() / values.len() as f64;
        let (month, day_of_week) = calendar(target_date);

        Some(Self {
            lag1: recent[n - 1],
            lag2: recent[n - 2],
            lag3: recent[n - 3],
            roll3: mean(&recent[n - 3..]),
            roll7: mean(&recent[n - TREND_LOOKBACK..]),
            day_of_month: target_date.day() as f64,
            month,
            day_of_week,
        })
    }

    pub fn feature_names() -> Vec<&'static str> {
        vec![
            "lag1", "lag2", "lag3", "roll3", "roll7", "day", "month", "dayofweek",
        ]
    }
}

impl FeatureRow for TrendFeatures {
    const NUM_FEATURES: usize = 8;

    fn to_vec(&self) -> Vec<f64> {
        vec![
            self.lag1,
            self.lag2,
            self.lag3,
            self.roll3,
            self.roll7,
            self.day_of_month,
            self.month,
            self.day_of_week,
        ]
    }
}

/// Trend rows and their AQI targets, in date order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrendSet {
    pub dates: Vec<NaiveDate>,
    pub features: Vec<TrendFeatures>,
    pub targets: Vec<f64>,
}

impl TrendSet {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Builds lagged/rolling AQI rows from a city's AQI history.
#[derive(Debug, Clone)]
pub struct TrendFeatureBuilder {
    min_rows: usize,
}

impl Default for TrendFeatureBuilder {
    fn default() -> Self {
        Self::new(FeatureBuilder::DEFAULT_MIN_ROWS)
    }
}

impl TrendFeatureBuilder {
    pub fn new(min_rows: usize) -> Self {
        Self { min_rows }
    }

    /// Rows with fewer than [`TREND_LOOKBACK`] predecessors are dropped.
    pub fn build(&self, history: &[(NaiveDate, f64)]) -> Result<TrendSet, TrainingError> {
        let mut sorted = history.to_vec();
        sorted.sort_by_key(|(date, _)| *date);
        let values: Vec<f64> = sorted.iter().map(|(_, aqi)| *aqi).collect();

        let mut set = TrendSet::default();
        for (t, (date, aqi)) in sorted.iter().enumerate().skip(TREND_LOOKBACK) {
            if let Some(row) = TrendFeatures::from_history(&values[..t], *date) {
                set.dates.push(*date);
                set.features.push(row);
                set.targets.push(*aqi);
            }
        }

        if set.len() < self.min_rows {
            return Err(TrainingError::InsufficientData(set.len()));
        }

        Ok(set)
    }
}
