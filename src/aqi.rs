//! AQI severity buckets.
//!
//! The six categories are ordered by severity and carry an explicit ordinal,
//! which is also the label a classifier is trained on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the six ordered AQI severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AqiBucket {
    Good = 0,
    Satisfactory = 1,
    Moderate = 2,
    Poor = 3,
    VeryPoor = 4,
    Severe = 5,
}

impl AqiBucket {
    /// All buckets in ascending severity.
    pub const ALL: [AqiBucket; 6] = [
        AqiBucket::Good,
        AqiBucket::Satisfactory,
        AqiBucket::Moderate,
        AqiBucket::Poor,
        AqiBucket::VeryPoor,
        AqiBucket::Severe,
    ];

    /// Number of buckets (and classifier classes).
    pub const COUNT: usize = 6;

    /// Map a classifier output to a bucket. Anything outside 0..=5 is rejected.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Ordinal of the bucket (0 = Good, 5 = Severe).
    pub fn index(self) -> usize {
        self as usize
    }

    /// Display label as used in the historical dataset.
    pub fn label(self) -> &'static str {
        match self {
            AqiBucket::Good => "Good",
            AqiBucket::Satisfactory => "Satisfactory",
            AqiBucket::Moderate => "Moderate",
            AqiBucket::Poor => "Poor",
            AqiBucket::VeryPoor => "Very Poor",
            AqiBucket::Severe => "Severe",
        }
    }

    /// Bucket for a continuous AQI value (upper bounds are inclusive).
    pub fn from_aqi(aqi: f64) -> Self {
        if aqi <= 50.0 {
            AqiBucket::Good
        } else if aqi <= 100.0 {
            AqiBucket::Satisfactory
        } else if aqi <= 200.0 {
            AqiBucket::Moderate
        } else if aqi <= 300.0 {
            AqiBucket::Poor
        } else if aqi <= 400.0 {
            AqiBucket::VeryPoor
        } else {
            AqiBucket::Severe
        }
    }

    /// Short health advice for the category.
    pub fn health_advice(self) -> &'static str {
        match self {
            AqiBucket::Good => "Air quality is excellent. Enjoy your day!",
            AqiBucket::Satisfactory => "Air quality is acceptable.",
            AqiBucket::Moderate => "Sensitive individuals should reduce outdoor activity.",
            AqiBucket::Poor => "Avoid prolonged outdoor exposure.",
            AqiBucket::VeryPoor => "Stay indoors. Wear a mask if necessary.",
            AqiBucket::Severe => "Health emergency. Avoid all outdoor activity!",
        }
    }
}

impl fmt::Display for AqiBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when a bucket label is not one of the six known labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBucket(pub String);

impl fmt::Display for UnknownBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown AQI bucket label: {:?}", self.0)
    }
}

impl std::error::Error for UnknownBucket {}

impl FromStr for AqiBucket {
    type Err = UnknownBucket;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|b| b.label().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownBucket(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_index_maps_all_six() {
        assert_eq!(AqiBucket::from_index(0), Some(AqiBucket::Good));
        assert_eq!(AqiBucket::from_index(1), Some(AqiBucket::Satisfactory));
        assert_eq!(AqiBucket::from_index(2), Some(AqiBucket::Moderate));
        assert_eq!(AqiBucket::from_index(3), Some(AqiBucket::Poor));
        assert_eq!(AqiBucket::from_index(4), Some(AqiBucket::VeryPoor));
        assert_eq!(AqiBucket::from_index(5), Some(AqiBucket::Severe));
    }

    #[test]
    fn test_from_index_rejects_out_of_range() {
        assert_eq!(AqiBucket::from_index(6), None);
        assert_eq!(AqiBucket::from_index(usize::MAX), None);
    }

    #[test]
    fn test_labels() {
        assert_eq!(AqiBucket::VeryPoor.label(), "Very Poor");
        assert_eq!(AqiBucket::Good.to_string(), "Good");
    }

    #[test]
    fn test_parse_labels() {
        assert_eq!("Very Poor".parse::<AqiBucket>(), Ok(AqiBucket::VeryPoor));
        assert_eq!(" severe ".parse::<AqiBucket>(), Ok(AqiBucket::Severe));
        assert!("Hazardous".parse::<AqiBucket>().is_err());
    }

    #[test]
    fn test_from_aqi_boundaries() {
        assert_eq!(AqiBucket::from_aqi(0.0), AqiBucket::Good);
        assert_eq!(AqiBucket::from_aqi(50.0), AqiBucket::Good);
        assert_eq!(AqiBucket::from_aqi(50.1), AqiBucket::Satisfactory);
        assert_eq!(AqiBucket::from_aqi(100.0), AqiBucket::Satisfactory);
        assert_eq!(AqiBucket::from_aqi(200.0), AqiBucket::Moderate);
        assert_eq!(AqiBucket::from_aqi(300.0), AqiBucket::Poor);
        assert_eq!(AqiBucket::from_aqi(400.0), AqiBucket::VeryPoor);
        assert_eq!(AqiBucket::from_aqi(400.5), AqiBucket::Severe);
    }

    #[test]
    fn test_health_advice_nonempty() {
        for bucket in AqiBucket::ALL {
            assert!(!bucket.health_advice().is_empty());
        }
    }

    // ==================== Property-Based Tests ====================

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn index_round_trips(index in 0usize..6) {
                let bucket = AqiBucket::from_index(index).unwrap();
                prop_assert_eq!(bucket.index(), index);
            }

            #[test]
            fn from_index_is_order_preserving(a in 0usize..6, b in 0usize..6) {
                let ba = AqiBucket::from_index(a).unwrap();
                let bb = AqiBucket::from_index(b).unwrap();
                prop_assert_eq!(a.cmp(&b), ba.cmp(&bb));
            }

            #[test]
            fn out_of_range_never_clamped(index in 6usize..10_000) {
                prop_assert!(AqiBucket::from_index(index).is_none());
            }

            #[test]
            fn from_aqi_is_monotonic(a in 0.0f64..1000.0, b in 0.0f64..1000.0) {
                if a <= b {
                    prop_assert!(AqiBucket::from_aqi(a) <= AqiBucket::from_aqi(b));
                }
            }
        }
    }
}
