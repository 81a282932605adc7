//! Single-shot AQI prediction against cached city models

use std::sync::Arc;

use serde::Serialize;

use crate::aqi::AqiBucket;
use crate::error::PredictionError;
use crate::traits::{Clock, LiveSnapshot, LiveSnapshotSource};

use super::cache::ModelCache;
use super::features::{FeatureRow, FeatureVector, LagState, PollutantSnapshot};
use super::model::TrainedModelPair;

/// Rounded AQI and severity bucket for one feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub aqi: f64,
    pub bucket: AqiBucket,
}

impl Prediction {
    pub fn label(&self) -> &'static str {
        self.bucket.label()
    }
}

/// Model output for the live readings, next to what the feed itself reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivePrediction {
    pub live_aqi: Option<f64>,
    pub live_bucket: Option<AqiBucket>,
    pub dominant_pollutant: Option<String>,
    pub predicted: Prediction,
}

/// Round to `decimals` places (half away from zero).
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Answers point predictions. Holds no per-request state; only the
/// trained models (inside the cache) are reused between calls.
pub struct PredictionService {
    models: Arc<ModelCache<TrainedModelPair>>,
    clock: Arc<dyn Clock>,
}

impl PredictionService {
    /// Decimal places of the reported AQI.
    pub const AQI_DECIMALS: i32 = 2;

    pub fn new(models: Arc<ModelCache<TrainedModelPair>>, clock: Arc<dyn Clock>) -> Self {
        Self { models, clock }
    }

    pub fn models(&self) -> &Arc<ModelCache<TrainedModelPair>> {
        &self.models
    }

    /// Predict AQI and bucket for `city`, training its models on first use.
    pub fn predict(
        &self,
        city: &str,
        features: &FeatureVector,
    ) -> Result<Prediction, PredictionError> {
        if let Some(pos) = features.to_vec().iter().position(|v| !v.is_finite()) {
            return Err(PredictionError::InvalidInput(format!(
                "feature {} is not a finite number",
                FeatureVector::feature_names()[pos]
            )));
        }

        let pair = self.models.get_or_train(city)?;

        let aqi = pair.predict_aqi(features).ok_or_else(|| {
            PredictionError::InvalidInput(format!("regressor for {} rejected the row", city))
        })?;
        let class = pair.predict_bucket_index(features).ok_or_else(|| {
            PredictionError::InvalidInput(format!("classifier for {} rejected the row", city))
        })?;
        let Some(bucket) = AqiBucket::from_index(class) else {
            tracing::error!("Classifier for {} returned unknown bucket index {}", city, class);
            return Err(PredictionError::InvalidInput(format!(
                "classifier returned bucket index {} outside 0..{}",
                class,
                AqiBucket::COUNT
            )));
        };

        let prediction = Prediction {
            aqi: round_to(aqi, Self::AQI_DECIMALS),
            bucket,
        };
        tracing::debug!(
            "Predicted {} for {} ({})",
            prediction.aqi,
            city,
            prediction.label()
        );
        Ok(prediction)
    }

    /// Predict from a raw row in model column order.
    pub fn predict_values(&self, city: &str, values: &[f64]) -> Result<Prediction, PredictionError> {
        let features = FeatureVector::from_slice(values)?;
        self.predict(city, &features)
    }

    /// Feature vector for readings taken today. Without explicit lag values
    /// the current PM2.5/PM10 stand in for yesterday's.
    pub fn manual_features(
        &self,
        pollutants: &PollutantSnapshot,
        lag: Option<LagState>,
    ) -> FeatureVector {
        let lag = lag.unwrap_or_else(|| LagState::following(pollutants));
        FeatureVector::for_date(pollutants, self.clock.today(), lag)
    }

    /// Predict from the live feed's current readings.
    ///
    /// `Ok(None)` means the feed had nothing for the city; that is not a
    /// prediction failure.
    pub fn predict_live(
        &self,
        city: &str,
        source: &dyn LiveSnapshotSource,
    ) -> Result<Option<LivePrediction>, PredictionError> {
        let Some(snapshot) = source.fetch(city) else {
            tracing::info!("No live data for {}", city);
            return Ok(None);
        };

        let pollutants = live_pollutants(city, &snapshot)?;
        let features = self.manual_features(&pollutants, None);
        let predicted = self.predict(city, &features)?;

        Ok(Some(LivePrediction {
            live_aqi: snapshot.aqi,
            live_bucket: snapshot.aqi.map(AqiBucket::from_aqi),
            dominant_pollutant: snapshot.dominant_pollutant,
            predicted,
        }))
    }
}

impl std::fmt::Debug for PredictionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionService")
            .field("models", &self.models)
            .finish_non_exhaustive()
    }
}

fn live_pollutants(city: &str, snapshot: &LiveSnapshot) -> Result<PollutantSnapshot, PredictionError> {
    let require = |value: Option<f64>, name: &str| {
        value.ok_or_else(|| {
            PredictionError::InvalidInput(format!("live snapshot for {} has no {} reading", city, name))
        })
    };

    Ok(PollutantSnapshot {
        pm25: require(snapshot.pm25, "PM2.5")?,
        pm10: require(snapshot.pm10, "PM10")?,
        no2: require(snapshot.no2, "NO2")?,
        so2: require(snapshot.so2, "SO2")?,
        co: require(snapshot.co, "CO")?,
        o3: require(snapshot.o3, "O3")?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::ml::cache::ModelProvider;
    use crate::ml::model::{AqiRegressor, BucketClassifier, ModelMetrics};
    use crate::traits::{MockClock, MockLiveSource};

    #[derive(Debug)]
    struct FixedRegressor(f64);

    impl AqiRegressor for FixedRegressor {
        fn predict_row(&self, row: &[f64]) -> Option<f64> {
            (row.len() == FeatureVector::NUM_FEATURES).then_some(self.0)
        }
    }

    #[derive(Debug)]
    struct FixedClassifier(usize);

    impl BucketClassifier for FixedClassifier {
        fn classify_row(&self, _row: &[f64]) -> Option<usize> {
            Some(self.0)
        }
    }

    struct StubProvider {
        aqi: f64,
        class: usize,
        builds: Arc<AtomicUsize>,
    }

    impl ModelProvider<TrainedModelPair> for StubProvider {
        fn provide(&self, city: &str) -> Result<TrainedModelPair, PredictionError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            if city == "Aizawl" {
                return Err(PredictionError::insufficient(city, 42, 300));
            }
            Ok(TrainedModelPair::new(
                FixedRegressor(self.aqi),
                FixedClassifier(self.class),
                ModelMetrics::default(),
            ))
        }

        fn name(&self) -> &'static str {
            "stub"
        }
    }

    fn service(aqi: f64, class: usize) -> (PredictionService, Arc<AtomicUsize>) {
        let builds = Arc::new(AtomicUsize::new(0));
        let provider = StubProvider {
            aqi,
            class,
            builds: Arc::clone(&builds),
        };
        // 2024-06-15 was a Saturday
        let clock = MockClock::new(Utc.with_ymd_and_hms(2024, 6, 15, 9, 0, 0).unwrap());
        let service = PredictionService::new(Arc::new(ModelCache::new(provider)), Arc::new(clock));
        (service, builds)
    }

    fn pollutants() -> PollutantSnapshot {
        PollutantSnapshot {
            pm25: 60.0,
            pm10: 110.0,
            no2: 35.0,
            so2: 8.0,
            co: 0.9,
            o3: 40.0,
        }
    }

    #[test]
    fn test_round_to() {
        assert_relative_eq!(round_to(42.567, 2), 42.57, epsilon = 1e-12);
        assert_relative_eq!(round_to(42.564, 2), 42.56, epsilon = 1e-12);
        assert_relative_eq!(round_to(-1.005, 0), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_predict_rounds_and_labels() {
        let (service, _) = service(42.567, 2);
        let fv = service.manual_features(&pollutants(), None);

        let prediction = service.predict("Delhi", &fv).unwrap();

        assert_relative_eq!(prediction.aqi, 42.57, epsilon = 1e-12);
        assert_eq!(prediction.bucket, AqiBucket::Moderate);
        assert_eq!(prediction.label(), "Moderate");
    }

    #[test]
    fn test_predict_values_rounds_raw_row() {
        let (service, _) = service(42.567, 0);
        let row = [50.0, 80.0, 40.0, 10.0, 1.0, 30.0, 6.0, 2.0, 45.0, 75.0];

        let prediction = service.predict_values("Delhi", &row).unwrap();

        assert_relative_eq!(prediction.aqi, 42.57, epsilon = 1e-12);
        assert_eq!(prediction.bucket, AqiBucket::Good);
    }

    #[test]
    fn test_predict_trains_once_per_city() {
        let (service, builds) = service(100.0, 1);
        let fv = service.manual_features(&pollutants(), None);

        service.predict("Delhi", &fv).unwrap();
        service.predict("Delhi", &fv).unwrap();
        service.predict("Pune", &fv).unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_predict_insufficient_data() {
        let (service, _) = service(100.0, 1);
        let fv = service.manual_features(&pollutants(), None);

        let result = service.predict("Aizawl", &fv);

        assert!(matches!(result, Err(PredictionError::InsufficientData { rows: 42, .. })));
        assert!(service.models().cached("Aizawl").is_none());
    }

    #[test]
    fn test_predict_rejects_unknown_bucket_index() {
        let (service, _) = service(100.0, 9);
        let fv = service.manual_features(&pollutants(), None);

        let result = service.predict("Delhi", &fv);

        assert!(matches!(result, Err(PredictionError::InvalidInput(_))));
    }

    #[test]
    fn test_predict_rejects_non_finite_features() {
        let (service, builds) = service(100.0, 1);
        let mut fv = service.manual_features(&pollutants(), None);
        fv.no2 = f64::INFINITY;

        let err = service.predict("Delhi", &fv).unwrap_err();

        assert!(err.to_string().contains("NO2"));
        assert_eq!(builds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_predict_values_validates_width() {
        let (service, _) = service(100.0, 1);

        assert!(matches!(
            service.predict_values("Delhi", &[1.0; 9]),
            Err(PredictionError::InvalidInput(_))
        ));
        assert!(service.predict_values("Delhi", &[1.0; 10]).is_ok());
    }

    #[test]
    fn test_manual_features_use_clock_and_default_lags() {
        let (service, _) = service(100.0, 1);

        let fv = service.manual_features(&pollutants(), None);
        assert_eq!(fv.month, 6.0);
        assert_eq!(fv.day_of_week, 5.0);
        assert_eq!(fv.pm25_lag1, 60.0);
        assert_eq!(fv.pm10_lag1, 110.0);

        let fv = service.manual_features(
            &pollutants(),
            Some(LagState {
                pm25: 1.0,
                pm10: 2.0,
            }),
        );
        assert_eq!(fv.pm25_lag1, 1.0);
        assert_eq!(fv.pm10_lag1, 2.0);
    }

    #[test]
    fn test_predict_live_without_snapshot() {
        let (service, builds) = service(100.0, 1);
        let source = MockLiveSource::new();

        let result = service.predict_live("Delhi", &source).unwrap();

        assert!(result.is_none());
        assert_eq!(builds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_predict_live_with_snapshot() {
        let (service, _) = service(155.556, 3);
        let source = MockLiveSource::new();
        source.insert(
            "Delhi",
            LiveSnapshot {
                aqi: Some(212.0),
                pm25: Some(60.0),
                pm10: Some(110.0),
                no2: Some(35.0),
                so2: Some(8.0),
                co: Some(0.9),
                o3: Some(40.0),
                dominant_pollutant: Some("pm25".to_string()),
            },
        );

        let live = service.predict_live("Delhi", &source).unwrap().unwrap();

        assert_eq!(live.live_aqi, Some(212.0));
        assert_eq!(live.live_bucket, Some(AqiBucket::Poor));
        assert_eq!(live.dominant_pollutant.as_deref(), Some("pm25"));
        assert_relative_eq!(live.predicted.aqi, 155.56, epsilon = 1e-12);
        assert_eq!(live.predicted.bucket, AqiBucket::Poor);
    }

    #[test]
    fn test_predict_live_missing_pollutant() {
        let (service, _) = service(100.0, 1);
        let source = MockLiveSource::new();
        source.insert(
            "Delhi",
            LiveSnapshot {
                aqi: Some(90.0),
                pm25: Some(40.0),
                ..Default::default()
            },
        );

        let err = service.predict_live("Delhi", &source).unwrap_err();

        assert!(err.to_string().contains("PM10"));
    }
}
