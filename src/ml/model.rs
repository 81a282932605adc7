//! Model wrappers for the AQI regressor and bucket classifier

use std::fmt;

use chrono::{DateTime, Utc};
use linfa::prelude::*;
use linfa_elasticnet::ElasticNet;
use linfa_trees::DecisionTree;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::aqi::AqiBucket;

use super::features::{FeatureRow, FeatureVector, TrainingSet, TrendFeatures, TrendSet};

/// Maps a feature row to a continuous AQI value.
pub trait AqiRegressor: Send + Sync + fmt::Debug {
    /// `None` when the row has the wrong width for this model.
    fn predict_row(&self, row: &[f64]) -> Option<f64>;
}

/// Maps a feature row to a bucket class index.
pub trait BucketClassifier: Send + Sync + fmt::Debug {
    /// `None` when the row has the wrong width for this model.
    fn classify_row(&self, row: &[f64]) -> Option<usize>;
}

/// L2-penalised linear regressor.
///
/// Columns are centred on their training means before fitting, so a column
/// that never varies carries no weight instead of making the fit singular.
/// Collinear columns (the trend features include a rolling mean of their own
/// lags) are handled by the penalty.
#[derive(Debug, Serialize, Deserialize)]
pub struct RidgeModel {
    model: ElasticNet<f64>,
    feature_means: Vec<f64>,
    pub penalty: f64,
    /// Training mean squared error
    pub training_mse: f64,
    /// Number of samples used for training
    pub training_samples: usize,
    /// Timestamp when model was created
    pub created_at: DateTime<Utc>,
}

impl RidgeModel {
    /// Get model information as a string
    pub fn info(&self) -> String {
        format!(
            "RidgeModel(features={}, samples={}, penalty={}, train_mse={:.2}, created={})",
            self.feature_means.len(),
            self.training_samples,
            self.penalty,
            self.training_mse,
            self.created_at.format("%Y-%m-%d %H:%M")
        )
    }

    pub fn coefficients(&self) -> &Array1<f64> {
        self.model.hyperplane()
    }

    /// Intercept on the original (uncentred) feature scale
    pub fn intercept(&self) -> f64 {
        let shift: f64 = self
            .coefficients()
            .iter()
            .zip(&self.feature_means)
            .map(|(w, m)| w * m)
            .sum();
        self.model.intercept() - shift
    }

    fn predict_matrix(&self, mut array: Array2<f64>) -> Array1<f64> {
        center_columns(&mut array, &self.feature_means);
        self.model.predict(&array)
    }

    pub fn predict_batch<R: FeatureRow>(&self, rows: &[R]) -> Vec<f64> {
        if rows.is_empty() || R::NUM_FEATURES != self.feature_means.len() {
            return Vec::new();
        }

        match to_matrix(rows) {
            Ok(array) => self.predict_matrix(array).to_vec(),
            Err(_) => Vec::new(),
        }
    }
}

impl AqiRegressor for RidgeModel {
    fn predict_row(&self, row: &[f64]) -> Option<f64> {
        if row.len() != self.feature_means.len() {
            return None;
        }
        let array = Array2::from_shape_vec((1, row.len()), row.to_vec()).ok()?;

        let predictions = self.predict_matrix(array);
        predictions.first().copied()
    }
}

/// Decision tree over bucket indices, fitted with balanced class weights
#[derive(Debug, Serialize, Deserialize)]
pub struct TreeClassifier {
    model: DecisionTree<f64, usize>,
    n_features: usize,
    /// Number of samples used for training
    pub training_samples: usize,
}

impl TreeClassifier {
    pub fn predict_batch<R: FeatureRow>(&self, rows: &[R]) -> Vec<usize> {
        if rows.is_empty() || R::NUM_FEATURES != self.n_features {
            return Vec::new();
        }

        match to_matrix(rows) {
            Ok(array) => self.model.predict(&array).to_vec(),
            Err(_) => Vec::new(),
        }
    }
}

impl BucketClassifier for TreeClassifier {
    fn classify_row(&self, row: &[f64]) -> Option<usize> {
        if row.len() != self.n_features {
            return None;
        }
        let array = Array2::from_shape_vec((1, row.len()), row.to_vec()).ok()?;

        let predictions = self.model.predict(&array);
        predictions.first().copied()
    }
}

/// Hold-out evaluation of a trained model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub training_samples: usize,
    pub test_samples: usize,
    pub train_mse: f64,
    pub test_mse: Option<f64>,
    pub test_mae: Option<f64>,
    /// Classifier accuracy on the test slice (pair models only)
    pub test_accuracy: Option<f64>,
}

impl ModelMetrics {
    pub fn summary(&self) -> String {
        let fmt_opt = |v: Option<f64>| {
            v.map(|v| format!("{:.2}", v))
                .unwrap_or_else(|| "N/A".to_string())
        };
        format!(
            "train={} test={} train_mse={:.2} test_mse={} test_mae={} accuracy={}",
            self.training_samples,
            self.test_samples,
            self.train_mse,
            fmt_opt(self.test_mse),
            fmt_opt(self.test_mae),
            fmt_opt(self.test_accuracy)
        )
    }
}

/// Concrete output of pair training, kept so it can be persisted.
#[derive(Debug, Serialize, Deserialize)]
pub struct FittedPair {
    pub regressor: RidgeModel,
    pub classifier: TreeClassifier,
    pub metrics: ModelMetrics,
}

impl FittedPair {
    pub fn into_model_pair(self) -> TrainedModelPair {
        TrainedModelPair::new(self.regressor, self.classifier, self.metrics)
    }
}

/// Concrete output of trend training, kept so it can be persisted.
#[derive(Debug, Serialize, Deserialize)]
pub struct FittedTrend {
    pub regressor: RidgeModel,
    pub window: usize,
    pub metrics: ModelMetrics,
}

impl FittedTrend {
    pub fn into_trend_model(self) -> TrendModel {
        TrendModel::new(self.regressor, self.window, self.metrics)
    }
}

/// A city's regression and classification models. Immutable once built.
#[derive(Debug)]
pub struct TrainedModelPair {
    regressor: Box<dyn AqiRegressor>,
    classifier: Box<dyn BucketClassifier>,
    metrics: ModelMetrics,
}

impl TrainedModelPair {
    pub fn new(
        regressor: impl AqiRegressor + 'static,
        classifier: impl BucketClassifier + 'static,
        metrics: ModelMetrics,
    ) -> Self {
        Self {
            regressor: Box::new(regressor),
            classifier: Box::new(classifier),
            metrics,
        }
    }

    /// Continuous AQI for a feature vector
    pub fn predict_aqi(&self, features: &FeatureVector) -> Option<f64> {
        self.regressor.predict_row(&features.to_vec())
    }

    /// Raw classifier output; not yet validated against the bucket range
    pub fn predict_bucket_index(&self, features: &FeatureVector) -> Option<usize> {
        self.classifier.classify_row(&features.to_vec())
    }

    pub fn metrics(&self) -> &ModelMetrics {
        &self.metrics
    }
}

/// A city's AQI-trend regressor for rolling forecasts.
#[derive(Debug)]
pub struct TrendModel {
    regressor: Box<dyn AqiRegressor>,
    window: usize,
    metrics: ModelMetrics,
}

impl TrendModel {
    pub fn new(regressor: impl AqiRegressor + 'static, window: usize, metrics: ModelMetrics) -> Self {
        Self {
            regressor: Box::new(regressor),
            window,
            metrics,
        }
    }

    pub fn predict(&self, features: &TrendFeatures) -> Option<f64> {
        self.regressor.predict_row(&features.to_vec())
    }

    /// Length of the rolling AQI window this model is driven with
    pub fn window(&self) -> usize {
        self.window
    }

    pub fn metrics(&self) -> &ModelMetrics {
        &self.metrics
    }
}

/// Builder for training models
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    fit_intercept: bool,
    max_depth: Option<usize>,
    min_weight_leaf: f32,
    ridge_penalty: f64,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self {
            fit_intercept: true,
            max_depth: Some(12),
            min_weight_leaf: 1.0,
            ridge_penalty: 0.1,
        }
    }
}

impl ModelBuilder {
    /// Fewer rows than this are never split into train and test slices.
    pub const MIN_SPLIT_ROWS: usize = 10;

    /// Create a new model builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether the regressor fits an intercept
    pub fn fit_intercept(mut self, fit: bool) -> Self {
        self.fit_intercept = fit;
        self
    }

    /// Maximum depth of the classification tree
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Minimum total sample weight in a classifier leaf
    pub fn min_weight_leaf(mut self, weight: f32) -> Self {
        self.min_weight_leaf = weight;
        self
    }

    /// L2 penalty strength of the regressors
    pub fn ridge_penalty(mut self, penalty: f64) -> Self {
        self.ridge_penalty = penalty;
        self
    }

    /// Fit a ridge regressor (elastic net with a pure L2 penalty)
    pub fn fit_ridge<R: FeatureRow>(
        &self,
        rows: &[R],
        targets: &[f64],
    ) -> Result<RidgeModel, TrainingError> {
        check_lengths(rows.len(), targets.len())?;

        let mut x = to_matrix(rows)?;
        let feature_means = if self.fit_intercept {
            x.mean_axis(Axis(0))
                .map(|m| m.to_vec())
                .ok_or(TrainingError::InsufficientData(0))?
        } else {
            vec![0.0; R::NUM_FEATURES]
        };
        center_columns(&mut x, &feature_means);
        let y = Array1::from_vec(targets.to_vec());
        let dataset = Dataset::new(x, y);

        let model = ElasticNet::<f64>::params()
            .penalty(self.ridge_penalty)
            .l1_ratio(0.0)
            .with_intercept(self.fit_intercept)
            .fit(&dataset)
            .map_err(|e: linfa_elasticnet::ElasticNetError| {
                TrainingError::FitError(e.to_string())
            })?;

        let predictions = model.predict(dataset.records());
        let mse = calculate_mse(&predictions.to_vec(), targets);

        Ok(RidgeModel {
            model,
            feature_means,
            penalty: self.ridge_penalty,
            training_mse: mse,
            training_samples: rows.len(),
            created_at: Utc::now(),
        })
    }

    /// Fit a decision tree classifier, weighting samples inversely to class frequency
    pub fn fit_classifier<R: FeatureRow>(
        &self,
        rows: &[R],
        labels: &[usize],
    ) -> Result<TreeClassifier, TrainingError> {
        check_lengths(rows.len(), labels.len())?;

        let x = to_matrix(rows)?;
        let y = Array1::from_vec(labels.to_vec());
        let weights = Array1::from_vec(balanced_weights(labels));
        let dataset = Dataset::new(x, y).with_weights(weights);

        let model = DecisionTree::<f64, usize>::params()
            .max_depth(self.max_depth)
            .min_weight_leaf(self.min_weight_leaf)
            .fit(&dataset)
            .map_err(|e: linfa::error::Error| TrainingError::FitError(e.to_string()))?;

        Ok(TreeClassifier {
            model,
            n_features: R::NUM_FEATURES,
            training_samples: rows.len(),
        })
    }

    /// Fit the regressor/classifier pair on the leading `train_fraction` of
    /// the (date-ordered) rows and evaluate on the remainder.
    pub fn train_pair(
        &self,
        set: &TrainingSet,
        train_fraction: f64,
    ) -> Result<FittedPair, TrainingError> {
        let split_idx = chronological_split(set.len(), train_fraction)?;
        let labels = set.bucket_indices();

        let (train_x, test_x) = set.features.split_at(split_idx);
        let (train_aqi, test_aqi) = set.aqi.split_at(split_idx);
        let (train_labels, test_labels) = labels.split_at(split_idx);

        let regressor = self.fit_ridge(train_x, train_aqi)?;
        let classifier = self.fit_classifier(train_x, train_labels)?;

        let mut metrics = regression_metrics(
            regressor.training_samples,
            regressor.training_mse,
            &regressor.predict_batch(test_x),
            test_aqi,
        );
        if !test_x.is_empty() {
            let predicted = classifier.predict_batch(test_x);
            metrics.test_accuracy = Some(calculate_accuracy(&predicted, test_labels));
        }

        Ok(FittedPair {
            regressor,
            classifier,
            metrics,
        })
    }

    /// Fit the trend regressor with the same chronological split.
    pub fn train_trend(
        &self,
        set: &TrendSet,
        train_fraction: f64,
        window: usize,
    ) -> Result<FittedTrend, TrainingError> {
        let split_idx = chronological_split(set.len(), train_fraction)?;

        let (train_x, test_x) = set.features.split_at(split_idx);
        let (train_y, test_y) = set.targets.split_at(split_idx);

        let regressor = self.fit_ridge(train_x, train_y)?;
        let metrics = regression_metrics(
            regressor.training_samples,
            regressor.training_mse,
            &regressor.predict_batch(test_x),
            test_y,
        );

        Ok(FittedTrend {
            regressor,
            window,
            metrics,
        })
    }
}

fn regression_metrics(
    training_samples: usize,
    train_mse: f64,
    test_predictions: &[f64],
    test_targets: &[f64],
) -> ModelMetrics {
    let (test_mse, test_mae) = if test_targets.is_empty() {
        (None, None)
    } else {
        (
            Some(calculate_mse(test_predictions, test_targets)),
            Some(calculate_mae(test_predictions, test_targets)),
        )
    };

    ModelMetrics {
        training_samples,
        test_samples: test_targets.len(),
        train_mse,
        test_mse,
        test_mae,
        test_accuracy: None,
    }
}

/// Index separating the training prefix from the test suffix.
fn chronological_split(len: usize, train_fraction: f64) -> Result<usize, TrainingError> {
    if len < ModelBuilder::MIN_SPLIT_ROWS {
        return Err(TrainingError::InsufficientData(len));
    }
    let split_idx = (train_fraction.clamp(0.0, 1.0) * len as f64) as usize;
    Ok(split_idx.clamp(1, len))
}

/// Subtract each column's mean in place.
fn center_columns(array: &mut Array2<f64>, means: &[f64]) {
    for (mut column, mean) in array.columns_mut().into_iter().zip(means) {
        column -= *mean;
    }
}

fn check_lengths(features: usize, targets: usize) -> Result<(), TrainingError> {
    if features == 0 || targets == 0 {
        return Err(TrainingError::InsufficientData(0));
    }
    if features != targets {
        return Err(TrainingError::MismatchedLengths { features, targets });
    }
    Ok(())
}

fn to_matrix<R: FeatureRow>(rows: &[R]) -> Result<Array2<f64>, TrainingError> {
    let flat: Vec<f64> = rows.iter().flat_map(|r| r.to_vec()).collect();
    Array2::from_shape_vec((rows.len(), R::NUM_FEATURES), flat)
        .map_err(|e| TrainingError::ArrayError(e.to_string()))
}

/// Per-sample weights `n / (k * n_c)` so every present class carries equal total weight.
fn balanced_weights(labels: &[usize]) -> Vec<f32> {
    let mut counts = [0usize; AqiBucket::COUNT];
    for &label in labels {
        if let Some(count) = counts.get_mut(label) {
            *count += 1;
        }
    }
    let present = counts.iter().filter(|&&c| c > 0).count().max(1);
    let n = labels.len() as f64;

    labels
        .iter()
        .map(|&label| match counts.get(label) {
            Some(&c) if c > 0 => (n / (present as f64 * c as f64)) as f32,
            _ => 1.0,
        })
        .collect()
}

/// Calculate mean squared error
fn calculate_mse(predictions: &[f64], targets: &[f64]) -> f64 {
    if predictions.is_empty() || predictions.len() != targets.len() {
        return f64::MAX;
    }

    let sum_sq_error: f64 = predictions
        .iter()
        .zip(targets.iter())
        .map(|(p, t)| (p - t).powi(2))
        .sum();

    sum_sq_error / predictions.len() as f64
}

fn calculate_mae(predictions: &[f64], targets: &[f64]) -> f64 {
    if predictions.is_empty() || predictions.len() != targets.len() {
        return f64::MAX;
    }

    predictions
        .iter()
        .zip(targets.iter())
        .map(|(p, t)| (p - t).abs())
        .sum::<f64>()
        / predictions.len() as f64
}

fn calculate_accuracy(predictions: &[usize], targets: &[usize]) -> f64 {
    if predictions.is_empty() || predictions.len() != targets.len() {
        return 0.0;
    }

    let correct = predictions
        .iter()
        .zip(targets.iter())
        .filter(|(p, t)| p == t)
        .count();
    correct as f64 / predictions.len() as f64
}

/// Errors that can occur during model training
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingError {
    /// Not enough data to train
    InsufficientData(usize),
    /// Feature and target arrays have different lengths
    MismatchedLengths { features: usize, targets: usize },
    /// Error creating array
    ArrayError(String),
    /// Error fitting model
    FitError(String),
}

impl std::fmt::Display for TrainingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainingError::InsufficientData(n) => {
                write!(f, "Insufficient data for training: {} samples", n)
            }
            TrainingError::MismatchedLengths { features, targets } => {
                write!(
                    f,
                    "Feature and target lengths mismatch: {} vs {}",
                    features, targets
                )
            }
            TrainingError::ArrayError(e) => write!(f, "Array error: {}", e),
            TrainingError::FitError(e) => write!(f, "Model fitting error: {}", e),
        }
    }
}

impl std::error::Error for TrainingError {}
