use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use aqi_forecast::{
    AppConfig, ForecastEngine, ForecastHorizon, ForecastPoint, HistoricalDataset, LagState,
    ModelStore, OnDemandTrainer, PollutantSnapshot, PredictionService, SystemClock,
    model_pair_cache, trend_model_cache,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "aqi-forecast")]
#[command(about = "City AQI prediction and multi-day forecasts")]
struct Args {
    /// Historical dataset CSV (overrides configuration)
    #[arg(long, global = true)]
    dataset: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List cities in the dataset with their row counts
    Cities,
    /// Predict AQI and bucket from today's pollutant readings
    Predict(PredictArgs),
    /// Forecast AQI with pollutants held at their last observed values
    Forecast {
        #[arg(long)]
        city: String,
        /// Days to forecast (defaults to forecast.default_days)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Forecast AQI from its own recent history
    Trend {
        #[arg(long)]
        city: String,
        #[arg(long)]
        days: Option<u32>,
    },
    /// Fit both models for a city and save them to the model directories
    Train {
        #[arg(long)]
        city: String,
    },
}

#[derive(clap::Args, Debug)]
struct PredictArgs {
    #[arg(long)]
    city: String,
    #[arg(long)]
    pm25: f64,
    #[arg(long)]
    pm10: f64,
    #[arg(long)]
    no2: f64,
    #[arg(long)]
    so2: f64,
    #[arg(long)]
    co: f64,
    #[arg(long)]
    o3: f64,
    /// Yesterday's PM2.5 (defaults to today's)
    #[arg(long)]
    pm25_lag: Option<f64>,
    /// Yesterday's PM10 (defaults to today's)
    #[arg(long)]
    pm10_lag: Option<f64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .parse_lossy("aqi_forecast=debug,linfa=warn");

    // stdout is reserved for command output
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let dataset_path = args
        .dataset
        .clone()
        .unwrap_or_else(|| config.data.dataset_path.clone());

    tracing::info!("Loading dataset from {}", dataset_path.display());
    let dataset = HistoricalDataset::from_csv(&dataset_path)
        .with_context(|| format!("Failed to load dataset {}", dataset_path.display()))?;
    tracing::info!(
        "Loaded {} rows for {} cities",
        dataset.len(),
        dataset.cities().len()
    );
    let dataset = Arc::new(dataset);

    match args.command {
        Command::Cities => run_cities(&dataset, args.json),
        Command::Predict(predict) => run_predict(&config, dataset, predict, args.json),
        Command::Forecast { city, days } => {
            let engine = forecast_engine(&config, dataset);
            let horizon = horizon(&config, days)?;
            let points = engine.forecast(&city, horizon)?;
            print_forecast(&city, &points, args.json)
        }
        Command::Trend { city, days } => {
            let engine = forecast_engine(&config, dataset);
            let horizon = horizon(&config, days)?;
            let points = engine.forecast_trend(&city, horizon)?;
            print_forecast(&city, &points, args.json)
        }
        Command::Train { city } => run_train(&config, dataset, &city, args.json),
    }
}

fn horizon(config: &AppConfig, days: Option<u32>) -> Result<ForecastHorizon> {
    Ok(match days {
        Some(days) => ForecastHorizon::new(days, &config.forecast)?,
        None => ForecastHorizon::default_from(&config.forecast),
    })
}

fn forecast_engine(config: &AppConfig, dataset: Arc<HistoricalDataset>) -> ForecastEngine {
    let pairs = model_pair_cache(&config.models, Arc::clone(&dataset));
    let trends = trend_model_cache(
        &config.models,
        Arc::clone(&dataset),
        config.forecast.trend_window,
    );
    ForecastEngine::new(dataset, Arc::new(pairs), Arc::new(trends))
}

fn run_cities(dataset: &HistoricalDataset, json: bool) -> Result<()> {
    let cities: Vec<(String, usize)> = dataset
        .cities()
        .into_iter()
        .map(|city| {
            let rows = dataset.city_len(&city);
            (city, rows)
        })
        .collect();

    if json {
        let value: Vec<_> = cities
            .iter()
            .map(|(city, rows)| serde_json::json!({ "city": city, "rows": rows }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        for (city, rows) in &cities {
            println!("{:<20} {:>6}", city, rows);
        }
    }
    Ok(())
}

fn run_predict(
    config: &AppConfig,
    dataset: Arc<HistoricalDataset>,
    args: PredictArgs,
    json: bool,
) -> Result<()> {
    let models = Arc::new(model_pair_cache(&config.models, dataset));
    let service = PredictionService::new(models, Arc::new(SystemClock));

    let pollutants = PollutantSnapshot {
        pm25: args.pm25,
        pm10: args.pm10,
        no2: args.no2,
        so2: args.so2,
        co: args.co,
        o3: args.o3,
    };
    let lag = match (args.pm25_lag, args.pm10_lag) {
        (None, None) => None,
        (pm25, pm10) => Some(LagState {
            pm25: pm25.unwrap_or(args.pm25),
            pm10: pm10.unwrap_or(args.pm10),
        }),
    };

    let features = service.manual_features(&pollutants, lag);
    let prediction = service.predict(&args.city, &features)?;

    if json {
        let value = serde_json::json!({
            "city": args.city,
            "aqi": prediction.aqi,
            "bucket": prediction.label(),
            "advice": prediction.bucket.health_advice(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}: AQI {:.2} ({})", args.city, prediction.aqi, prediction.label());
        println!("{}", prediction.bucket.health_advice());
    }
    Ok(())
}

fn print_forecast(city: &str, points: &[ForecastPoint], json: bool) -> Result<()> {
    if json {
        let value = serde_json::json!({ "city": city, "forecast": points });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("AQI forecast for {}", city);
        for point in points {
            println!("  {}  {:>7.2}", point.date, point.aqi);
        }
    }
    Ok(())
}

fn run_train(
    config: &AppConfig,
    dataset: Arc<HistoricalDataset>,
    city: &str,
    json: bool,
) -> Result<()> {
    let trainer = OnDemandTrainer::new(dataset, config.models.clone())
        .with_trend_window(config.forecast.trend_window);
    let store = ModelStore::from_config(&config.models);

    let pair = trainer.fit_pair(city)?;
    let pair_path = store.save_pair(city, &pair)?;
    let trend = trainer.fit_trend(city)?;
    let trend_path = store.save_trend(city, &trend)?;

    if json {
        let value = serde_json::json!({
            "city": city,
            "pair": { "path": pair_path, "metrics": pair.metrics },
            "trend": { "path": trend_path, "metrics": trend.metrics },
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{} model pair -> {}", city, pair_path.display());
        println!("  {}", pair.metrics.summary());
        println!("{} trend model -> {}", city, trend_path.display());
        println!("  {}", trend.metrics.summary());
    }
    Ok(())
}
