//! Integration tests for train-once model caching.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use aqi_forecast::{
    HistoricalDataset, ModelConfig, ModelSource, ModelStore, OnDemandTrainer, PredictionError,
    model_pair_cache, trend_model_cache,
};
use common::{date, synthetic_city, two_city_dataset};
use proptest::prelude::*;
use tempfile::tempdir;

#[test]
fn test_city_with_enough_rows_is_trained_once() {
    let cache = model_pair_cache(&ModelConfig::default(), Arc::new(two_city_dataset()));

    let first = cache.get_or_train("Delhi").unwrap();
    let second = cache.get_or_train("Delhi").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.cached_cities(), vec!["Delhi".to_string()]);
}

#[test]
fn test_city_with_too_few_rows_is_never_cached() {
    let cache = model_pair_cache(&ModelConfig::default(), Arc::new(two_city_dataset()));

    for _ in 0..3 {
        let result = cache.get_or_train("Shillong");
        assert!(matches!(
            result,
            Err(PredictionError::InsufficientData { rows: 120, required: 300, .. })
        ));
    }
    assert!(cache.cached("Shillong").is_none());
}

#[test]
fn test_exactly_min_rows_trains() {
    let dataset = HistoricalDataset::new(synthetic_city("Patna", date(2022, 6, 30), 300));
    let cache = model_pair_cache(&ModelConfig::default(), Arc::new(dataset));

    let pair = cache.get_or_train("Patna").unwrap();

    assert_eq!(pair.metrics().training_samples + pair.metrics().test_samples, 299);
}

#[test]
fn test_city_with_constant_pollutant_trains() {
    let mut rows = synthetic_city("Delhi", date(2023, 1, 10), 400);
    for row in &mut rows {
        row.so2 = 0.0;
        row.co = 1.0;
    }
    let cache = model_pair_cache(&ModelConfig::default(), Arc::new(HistoricalDataset::new(rows)));

    let pair = cache.get_or_train("Delhi").unwrap();

    assert_eq!(pair.metrics().test_samples, 80);
    assert!(pair.metrics().test_mae.unwrap().is_finite());
    assert!(cache.cached("Delhi").is_some());
}

#[test]
fn test_concurrent_requests_share_one_model() {
    let cache = Arc::new(model_pair_cache(
        &ModelConfig::default(),
        Arc::new(two_city_dataset()),
    ));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get_or_train("Delhi").unwrap())
        })
        .collect();
    let models: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(models.iter().all(|m| Arc::ptr_eq(m, &models[0])));
}

#[test]
fn test_stored_models_are_served_from_disk() {
    let dir = tempdir().unwrap();
    let config = ModelConfig {
        model_dir: dir.path().join("models"),
        forecast_model_dir: dir.path().join("models_forecast"),
        ..ModelConfig::default()
    };
    let dataset = Arc::new(two_city_dataset());

    let trainer = OnDemandTrainer::new(Arc::clone(&dataset), config.clone());
    let store = ModelStore::from_config(&config);
    let fitted = trainer.fit_pair("Delhi").unwrap();
    store.save_pair("Delhi", &fitted).unwrap();
    store.save_trend("Delhi", &trainer.fit_trend("Delhi").unwrap()).unwrap();

    let stored = ModelConfig {
        source: ModelSource::Stored,
        ..config
    };
    // An empty dataset proves nothing is retrained.
    let empty = Arc::new(HistoricalDataset::default());
    let pairs = model_pair_cache(&stored, Arc::clone(&empty));
    let trends = trend_model_cache(&stored, empty, 7);

    let pair = pairs.get_or_train("Delhi").unwrap();
    assert_eq!(pair.metrics(), &fitted.metrics);
    assert_eq!(trends.get_or_train("Delhi").unwrap().window(), 7);
    assert!(matches!(
        pairs.get_or_train("Shillong"),
        Err(PredictionError::ModelUnavailable { .. })
    ));
}

#[test]
fn test_stored_source_with_missing_directory() {
    let config = ModelConfig {
        source: ModelSource::Stored,
        model_dir: PathBuf::from("/nonexistent/aqi/models"),
        ..ModelConfig::default()
    };
    let cache = model_pair_cache(&config, Arc::new(HistoricalDataset::default()));

    assert!(matches!(
        cache.get_or_train("Delhi"),
        Err(PredictionError::ModelUnavailable { .. })
    ));
    assert!(cache.is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn short_histories_never_populate_the_cache(rows in 0usize..300) {
        let dataset = HistoricalDataset::new(synthetic_city("Imphal", date(2021, 12, 31), rows));
        let cache = model_pair_cache(&ModelConfig::default(), Arc::new(dataset));

        let result = cache.get_or_train("Imphal");

        let is_insufficient = matches!(result, Err(PredictionError::InsufficientData { .. }));
        prop_assert!(is_insufficient);
        prop_assert!(cache.is_empty());
    }
}
