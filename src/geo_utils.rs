//! Geographic utilities: distances, centroids and threshold conversion shared by
//! the detectors.
//!
//! Locations are `geo::Point`s with `x` = longitude (or easting) and
//! `y` = latitude (or northing).

use chrono::Duration;
use geo::{Centroid, MultiPoint, Point};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::error::{describe_value, Result, TrackSegError};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Meters per degree of latitude (approximately constant).
pub const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Great-circle distance in meters between two lon/lat points.
pub fn haversine_distance(a: &Point, b: &Point) -> f64 {
    let lat1 = a.y().to_radians();
    let lat2 = b.y().to_radians();
    let dlat = (b.y() - a.y()).to_radians();
    let dlng = (b.x() - a.x()).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// Planar distance in coordinate units, for projected reference frames.
pub fn euclidean_distance(a: &Point, b: &Point) -> f64 {
    (b.x() - a.x()).hypot(b.y() - a.y())
}

/// Convert meters to degrees of latitude.
pub fn meters_to_deg_lat(meters: f64) -> f64 {
    meters / METERS_PER_DEG_LAT
}

/// Convert meters to degrees of longitude at a given latitude.
pub fn meters_to_deg_lng(meters: f64, latitude: f64) -> f64 {
    let meters_per_deg_lng = METERS_PER_DEG_LAT * latitude.to_radians().cos();
    if meters_per_deg_lng.abs() < 1e-10 {
        return 0.0;
    }
    meters / meters_per_deg_lng
}

/// Distance function used by the staypoint detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "Value")]
pub enum DistanceMetric {
    /// Great-circle distance in meters on lon/lat coordinates.
    #[default]
    Haversine,
    /// Straight-line distance in the units of a projected reference frame.
    Euclidean,
}

impl DistanceMetric {
    const SUPPORTED: &'static str = "'haversine', 'euclidean'";

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Haversine => "haversine",
            DistanceMetric::Euclidean => "euclidean",
        }
    }

    /// Distance between two locations under this metric.
    pub fn distance(&self, a: &Point, b: &Point) -> f64 {
        match self {
            DistanceMetric::Haversine => haversine_distance(a, b),
            DistanceMetric::Euclidean => euclidean_distance(a, b),
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = TrackSegError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "haversine" => Ok(DistanceMetric::Haversine),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            other => Err(TrackSegError::unsupported_metric(
                format!("'{}'", other),
                Self::SUPPORTED,
            )),
        }
    }
}

impl TryFrom<Value> for DistanceMetric {
    type Error = TrackSegError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(s) => s.parse(),
            other => Err(TrackSegError::unsupported_metric(
                describe_value(&other),
                Self::SUPPORTED,
            )),
        }
    }
}

/// Arithmetic mean of a set of points. Returns `None` for an empty set.
pub fn centroid(points: impl IntoIterator<Item = Point>) -> Option<Point> {
    MultiPoint::from(points.into_iter().collect::<Vec<Point>>()).centroid()
}

/// Median of a set of values. Returns `None` for an empty set.
pub fn median(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut values: Vec<f64> = values.into_iter().collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// True if the points contain at least two different coordinates.
pub fn has_distinct_coordinates(points: &[Point]) -> bool {
    match points.first() {
        Some(first) => points.iter().any(|p| p != first),
        None => false,
    }
}

/// Convert a threshold given in minutes into a `Duration` with nanosecond
/// precision. Thresholds beyond the representable range saturate at
/// `Duration::MAX`, so infinity is never reached by a real gap or dwell.
pub fn minutes_to_duration(minutes: f64) -> Duration {
    let seconds = minutes * 60.0;
    let whole = seconds.trunc();
    if !(whole < i64::MAX as f64) {
        return Duration::MAX;
    }
    let nanos = Duration::nanoseconds(((seconds - whole) * 1e9) as i64);
    Duration::try_seconds(whole as i64)
        .and_then(|d| d.checked_add(&nanos))
        .unwrap_or(Duration::MAX)
}
