//! Historical station-day observations
//!
//! Loads the cleaned CSV export into memory and serves per-city, date-ordered
//! views of it. Incomplete or non-finite rows are skipped at load time.

use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::aqi::AqiBucket;

/// One city-day record from the historical dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub city: String,
    pub date: NaiveDate,
    pub pm25: f64,
    pub pm10: f64,
    pub no2: f64,
    pub so2: f64,
    pub co: f64,
    pub o3: f64,
    pub aqi: f64,
    pub bucket: AqiBucket,
}

/// Raw CSV row. Every measurement is optional because the cleaned export still
/// contains blanks for some stations.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "City")]
    city: String,
    #[serde(rename = "PM2.5")]
    pm25: Option<f64>,
    #[serde(rename = "PM10")]
    pm10: Option<f64>,
    #[serde(rename = "NO2")]
    no2: Option<f64>,
    #[serde(rename = "SO2")]
    so2: Option<f64>,
    #[serde(rename = "CO")]
    co: Option<f64>,
    #[serde(rename = "O3")]
    o3: Option<f64>,
    #[serde(rename = "AQI")]
    aqi: Option<f64>,
    #[serde(rename = "AQI_Bucket")]
    bucket: Option<String>,
}

impl CsvRow {
    fn into_observation(self) -> Option<Observation> {
        // Timestamps like "2019-01-01 00:00:00" keep only the date part.
        let date_part = self.date.split_whitespace().next()?;
        let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
        let aqi = finite(self.aqi)?;
        let bucket = self
            .bucket
            .as_deref()
            .and_then(|b| b.parse().ok())
            .unwrap_or_else(|| AqiBucket::from_aqi(aqi));

        Some(Observation {
            city: self.city,
            date,
            pm25: finite(self.pm25)?,
            pm10: finite(self.pm10)?,
            no2: finite(self.no2)?,
            so2: finite(self.so2)?,
            co: finite(self.co)?,
            o3: finite(self.o3)?,
            aqi,
            bucket,
        })
    }
}

/// A measurement that is present and finite ("NaN" and "inf" parse as floats).
fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Read-only, in-memory historical dataset indexed by city.
#[derive(Debug, Clone, Default)]
pub struct HistoricalDataset {
    rows: Vec<Observation>,
    by_city: HashMap<String, Vec<usize>>,
}

impl HistoricalDataset {
    pub fn new(rows: Vec<Observation>) -> Self {
        let mut by_city: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, row) in rows.iter().enumerate() {
            by_city.entry(row.city.clone()).or_default().push(idx);
        }
        Self { rows, by_city }
    }

    /// Load the cleaned station-day CSV export.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open dataset {}", path.display()))?;
        Self::from_reader(file)
            .with_context(|| format!("Failed to parse dataset {}", path.display()))
    }

    /// Parse CSV from any reader. Rows with a missing or
    /// non-finite measurement are skipped.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut rows = Vec::new();
        let mut skipped = 0usize;

        for record in csv_reader.deserialize::<CsvRow>() {
            let record = record.context("Malformed CSV record")?;
            match record.into_observation() {
                Some(obs) => rows.push(obs),
                None => skipped += 1,
            }
        }

        tracing::info!(
            "Loaded {} observations ({} incomplete rows skipped)",
            rows.len(),
            skipped
        );
        Ok(Self::new(rows))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sorted list of distinct cities.
    pub fn cities(&self) -> Vec<String> {
        self.by_city
            .keys()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Number of rows for a city.
    pub fn city_len(&self, city: &str) -> usize {
        self.by_city.get(city).map_or(0, Vec::len)
    }

    /// All observations for a city in ascending date order.
    pub fn city_observations(&self, city: &str) -> Vec<Observation> {
        let mut rows: Vec<Observation> = self
            .by_city
            .get(city)
            .map(|idxs| idxs.iter().map(|&i| self.rows[i].clone()).collect())
            .unwrap_or_default();
        rows.sort_by_key(|o| o.date);
        rows
    }

    /// `(date, AQI)` pairs for a city in ascending date order.
    pub fn city_history(&self, city: &str) -> Vec<(NaiveDate, f64)> {
        self.city_observations(city)
            .into_iter()
            .map(|o| (o.date, o.aqi))
            .collect()
    }

    /// Most recent observation for a city.
    pub fn last_observation(&self, city: &str) -> Option<&Observation> {
        self.by_city
            .get(city)?
            .iter()
            .map(|&i| &self.rows[i])
            .max_by_key(|o| o.date)
    }
}
