//! Unified error handling for trackseg.
//!
//! Only configuration and input-validation problems are errors. Data-quality
//! issues found while segmenting (duplicate fixes, degenerate triplegs) are
//! reported as [`Diagnostic`](crate::Diagnostic)s alongside the results.

use serde_json::Value;
use thiserror::Error;

use crate::FixId;

/// Errors that abort a staypoint or tripleg generation call before any
/// per-user work starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackSegError {
    /// The requested segmentation method does not exist.
    #[error("Method unknown: we only support {supported}, you passed {method}")]
    UnsupportedMethod {
        method: String,
        supported: &'static str,
    },

    /// The requested distance metric does not exist.
    #[error("Distance metric unknown: we only support {supported}, you passed {metric}")]
    UnsupportedDistanceMetric {
        metric: String,
        supported: &'static str,
    },

    /// A numeric threshold is negative or NaN.
    #[error("Invalid parameter {name} = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    /// A positionfix location has non-finite coordinates.
    #[error("Positionfix {id} has an invalid location ({x}, {y})")]
    InvalidLocation { id: FixId, x: f64, y: f64 },
}

/// Result type alias for trackseg operations.
pub type Result<T> = std::result::Result<T, TrackSegError>;

impl TrackSegError {
    pub(crate) fn unsupported_method(method: impl Into<String>, supported: &'static str) -> Self {
        TrackSegError::UnsupportedMethod {
            method: method.into(),
            supported,
        }
    }

    pub(crate) fn unsupported_metric(metric: impl Into<String>, supported: &'static str) -> Self {
        TrackSegError::UnsupportedDistanceMetric {
            metric: metric.into(),
            supported,
        }
    }
}

/// Render a configuration value the way the caller wrote it, so that
/// `"random"` and `12345` stay distinguishable in error messages.
pub(crate) fn describe_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s),
        other => other.to_string(),
    }
}

/// Reject negative and NaN thresholds. Infinity is accepted and means
/// "never reached".
pub(crate) fn check_threshold(name: &'static str, value: f64) -> Result<()> {
    if value.is_nan() {
        return Err(TrackSegError::InvalidParameter {
            name,
            value,
            reason: "must be a number",
        });
    }
    if value < 0.0 {
        return Err(TrackSegError::InvalidParameter {
            name,
            value,
            reason: "must not be negative",
        });
    }
    Ok(())
}
