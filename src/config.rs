use std::path::PathBuf;

use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub data: DataConfig,
    pub models: ModelConfig,
    pub forecast: ForecastConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    pub dataset_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("data/cleaned_station_day_with_station_info.csv"),
        }
    }
}

/// Where city models come from.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    /// Fit on first request from the loaded dataset.
    Train,
    /// Load previously saved model files.
    Stored,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub source: ModelSource,
    pub model_dir: PathBuf,
    pub forecast_model_dir: PathBuf,
    /// Minimum rows a city needs before training is attempted
    pub min_city_rows: usize,
    /// Leading fraction of chronologically ordered rows used for fitting
    pub train_fraction: f64,
    pub classifier_max_depth: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            source: ModelSource::Train,
            model_dir: PathBuf::from("models"),
            forecast_model_dir: PathBuf::from("models_forecast"),
            min_city_rows: 300,
            train_fraction: 0.8,
            classifier_max_depth: 12,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForecastConfig {
    pub default_days: u32,
    pub min_days: u32,
    pub max_days: u32,
    /// Length of the rolling AQI window used by trend forecasts
    pub trend_window: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            default_days: 7,
            min_days: 3,
            max_days: 14,
            trend_window: 7,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        // Load .env file (silently ignore if not present)
        let _ = dotenvy::dotenv();

        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("aqi-forecast");

        let builder = Config::builder()
            // 1. Default values
            .set_default(
                "data.dataset_path",
                "data/cleaned_station_day_with_station_info.csv",
            )?
            .set_default("models.source", "train")?
            .set_default("models.model_dir", "models")?
            .set_default("models.forecast_model_dir", "models_forecast")?
            .set_default("models.min_city_rows", 300)?
            .set_default("models.train_fraction", 0.8)?
            .set_default("models.classifier_max_depth", 12)?
            .set_default("forecast.default_days", 7)?
            .set_default("forecast.min_days", 3)?
            .set_default("forecast.max_days", 14)?
            .set_default("forecast.trend_window", 7)?
            // 2. Local config file (optional, lowest priority)
            .add_source(File::from(PathBuf::from("config.toml")).required(false))
            // 3. User config directory (optional, overrides local)
            .add_source(File::from(config_dir.join("config.toml")).required(false))
            // 4. Environment variables (AQI__MODELS__SOURCE=stored)
            .add_source(Environment::with_prefix("AQI").separator("__"));

        let s = builder.build()?;
        Ok(s.try_deserialize()?)
    }
}
