//! Abstractions for time and external collaborators to enable testing.
//!
//! This module provides traits for:
//! - `Clock`: Abstracting time access for deterministic testing
//! - `LiveSnapshotSource`: The live air-quality feed consulted for ad-hoc predictions

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lock, recovering the data from a poisoned mutex.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ==================== Clock Trait ====================

/// Trait for abstracting time access.
pub trait Clock: Send + Sync {
    /// Get the current time in UTC.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Get the current time in the local timezone.
    fn now_local(&self) -> DateTime<Local>;

    /// Today's date in the local timezone.
    fn today(&self) -> NaiveDate {
        self.now_local().date_naive()
    }
}

/// System clock implementation using real time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_local(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Mock clock for testing with controllable time.
#[derive(Debug, Clone)]
pub struct MockClock {
    utc_time: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    /// Create a new mock clock set to the given UTC time.
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            utc_time: Arc::new(Mutex::new(time)),
        }
    }

    /// Set the mock clock to a new time.
    pub fn set_time(&self, time: DateTime<Utc>) {
        *lock(&self.utc_time) = time;
    }
}

impl Clock for MockClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *lock(&self.utc_time)
    }

    fn now_local(&self) -> DateTime<Local> {
        self.now_utc().with_timezone(&Local)
    }

    fn today(&self) -> NaiveDate {
        self.now_utc().date_naive()
    }
}

// ==================== Live Snapshot ====================

/// Current readings for a city as reported by the live feed.
/// Any individual field may be missing from the upstream response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveSnapshot {
    pub aqi: Option<f64>,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub no2: Option<f64>,
    pub so2: Option<f64>,
    pub co: Option<f64>,
    pub o3: Option<f64>,
    pub dominant_pollutant: Option<String>,
}

/// Source of live readings. Transport failures are reported as `None`,
/// never as an error, so callers can tell "no live data" apart from a
/// failed prediction.
pub trait LiveSnapshotSource: Send + Sync {
    fn fetch(&self, city: &str) -> Option<LiveSnapshot>;
}

/// Mock live source for testing that serves canned snapshots.
#[derive(Debug, Clone, Default)]
pub struct MockLiveSource {
    snapshots: Arc<Mutex<HashMap<String, LiveSnapshot>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockLiveSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the snapshot returned for `city`.
    pub fn insert(&self, city: &str, snapshot: LiveSnapshot) {
        lock(&self.snapshots).insert(city.to_string(), snapshot);
    }

    /// Cities requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }
}

impl LiveSnapshotSource for MockLiveSource {
    fn fetch(&self, city: &str) -> Option<LiveSnapshot> {
        lock(&self.requests).push(city.to_string());
        lock(&self.snapshots).get(city).cloned()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_system_clock_returns_current_time() {
        let clock = SystemClock;
        let before = Utc::now();
        let clock_time = clock.now_utc();
        let after = Utc::now();

        assert!(clock_time >= before);
        assert!(clock_time <= after);
    }

    #[test]
    fn test_mock_clock_returns_set_time() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 6, 15, 14, 30, 0).unwrap();
        let clock = MockClock::new(fixed_time);

        assert_eq!(clock.now_utc(), fixed_time);
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 6, 15).unwrap());
    }

    #[test]
    fn test_mock_clock_can_be_updated() {
        let time1 = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let time2 = Utc.with_ymd_and_hms(2024, 7, 1, 10, 0, 0).unwrap();

        let clock = MockClock::new(time1);
        clock.set_time(time2);

        assert_eq!(clock.now_utc(), time2);
    }

    #[test]
    fn test_mock_live_source_returns_registered_snapshot() {
        let source = MockLiveSource::new();
        source.insert(
            "Delhi",
            LiveSnapshot {
                aqi: Some(180.0),
                pm25: Some(90.0),
                ..Default::default()
            },
        );

        let snapshot = source.fetch("Delhi").unwrap();
        assert_eq!(snapshot.aqi, Some(180.0));
        assert!(source.fetch("Mumbai").is_none());
        assert_eq!(source.requests(), vec!["Delhi".to_string(), "Mumbai".to_string()]);
    }
}
