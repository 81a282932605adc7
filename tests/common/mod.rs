//! Shared synthetic data for integration tests.
#![allow(dead_code)]

use std::fmt::Write as _;

use aqi_forecast::{AqiBucket, HistoricalDataset, Observation};
use chrono::{Duration, NaiveDate};

/// Deterministic pseudo-random value in [0, 1).
pub fn noise(i: usize, salt: f64) -> f64 {
    ((i as f64 * 12.9898 + salt * 78.233).sin() * 43758.5453)
        .fract()
        .abs()
}

/// `n` consecutive days for `city`, ending on `end`. AQI is roughly linear in
/// the particulate readings so the fitted models track it.
pub fn synthetic_city(city: &str, end: NaiveDate, n: usize) -> Vec<Observation> {
    let start = end - Duration::days(n as i64 - 1);
    (0..n)
        .map(|i| {
            let salt = city.len() as f64;
            let pm25 = 15.0 + 170.0 * noise(i, 1.0 + salt);
            let pm10 = 30.0 + 230.0 * noise(i, 2.0 + salt);
            let no2 = 8.0 + 55.0 * noise(i, 3.0 + salt);
            let aqi = 1.1 * pm25 + 0.45 * pm10 + 0.3 * no2 + 8.0 * noise(i, 4.0 + salt);
            Observation {
                city: city.to_string(),
                date: start + Duration::days(i as i64),
                pm25,
                pm10,
                no2,
                so2: 2.0 + 18.0 * noise(i, 5.0 + salt),
                co: 0.2 + 2.5 * noise(i, 6.0 + salt),
                o3: 12.0 + 45.0 * noise(i, 7.0 + salt),
                aqi,
                bucket: AqiBucket::from_aqi(aqi),
            }
        })
        .collect()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Delhi with 400 days ending 2023-01-10 (AQI 120 on the last day) and
/// Shillong with only 120 days.
pub fn two_city_dataset() -> HistoricalDataset {
    let mut rows = synthetic_city("Delhi", date(2023, 1, 10), 400);
    if let Some(last) = rows.last_mut() {
        last.aqi = 120.0;
        last.bucket = AqiBucket::from_aqi(120.0);
    }
    rows.extend(synthetic_city("Shillong", date(2023, 1, 10), 120));
    HistoricalDataset::new(rows)
}

/// Render observations in the station-day CSV layout.
pub fn to_csv(rows: &[Observation]) -> String {
    let mut out = String::from("City,Date,PM2.5,PM10,NO2,SO2,CO,O3,AQI,AQI_Bucket\n");
    for r in rows {
        writeln!(
            out,
            "{},{} 00:00:00,{},{},{},{},{},{},{},{}",
            r.city,
            r.date,
            r.pm25,
            r.pm10,
            r.no2,
            r.so2,
            r.co,
            r.o3,
            r.aqi,
            r.bucket.label()
        )
        .unwrap();
    }
    out
}
