//! # trackseg
//!
//! Movement segmentation for per-user GPS positionfixes.
//!
//! This library provides:
//! - Staypoint detection with a sliding distance/time/gap window
//! - Tripleg segmentation of the movement between staypoints
//! - Deterministic, zero-based episode ids with back-links on every fix
//! - Data-quality diagnostics (duplicate fixes, degenerate triplegs)
//! - Parallel per-user processing
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel per-user processing with rayon (default)
//! - **`cli`** - Build the `trackseg-cli` GPX debugging tool
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use geo::Point;
//! use trackseg::{
//!     generate_staypoints, generate_triplegs, Positionfix, Positionfixes, StaypointConfig,
//!     TriplegConfig,
//! };
//!
//! let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
//! let fixes = (0..30)
//!     .map(|i| {
//!         let at = t0 + chrono::Duration::minutes(i);
//!         // Ten minutes at home, ten minutes walking north, ten minutes at work
//!         let lat = 47.37 + 0.002 * (i.clamp(10, 20) - 10) as f64;
//!         Positionfix::new(i, 1, at, Point::new(8.54, lat))
//!     })
//!     .collect();
//! let pfs = Positionfixes::new(fixes).unwrap();
//!
//! let config = StaypointConfig { include_last: true, ..StaypointConfig::default() };
//! let stps = generate_staypoints(&pfs, &config).unwrap();
//! assert_eq!(stps.staypoints.len(), 2);
//!
//! let tpls = generate_triplegs(&stps.positionfixes, None, &TriplegConfig::default()).unwrap();
//! assert_eq!(tpls.triplegs.len(), 1);
//! ```

use chrono::{DateTime, Duration, Utc};
use geo::{LineString, Point};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{Result, TrackSegError};

// Geographic utilities (distance metrics, centroids, time arithmetic)
pub mod geo_utils;
pub use geo_utils::DistanceMetric;

// Data-quality warnings surfaced with the results
pub mod diagnostics;
pub use diagnostics::{Diagnostic, Diagnostics};

// Validation, deduplication and per-user chronological views
pub mod normalize;
pub use normalize::{drop_duplicates, partition_by_user, UserTrack};

// Global id assignment and foreign-key write-back
pub mod linkage;

// Progress reporting for per-user passes
pub mod progress;
pub use progress::{AtomicProgressTracker, LogProgress, NoopProgress, Phase, ProgressCallback};

// Staypoint detection (sliding window)
pub mod staypoints;
pub use staypoints::{
    generate_staypoints, generate_staypoints_with_progress, StaypointConfig, StaypointMethod,
    StaypointOutput,
};

// Tripleg segmentation (between staypoints)
pub mod triplegs;
pub use triplegs::{
    generate_triplegs, generate_triplegs_with_progress, TriplegConfig, TriplegMethod,
    TriplegOutput,
};

// Synthetic dwell/travel traces for tests and benchmarks
pub mod synthetic;

// ============================================================================
// Core Types
// ============================================================================

/// Caller-assigned positionfix identifier. Need not be contiguous or sorted.
pub type FixId = i64;

/// User identifier.
pub type UserId = i64;

/// Generated staypoint/tripleg identifier: zero-based and contiguous.
pub type EpisodeId = usize;

/// Name of the staypoint link column.
pub const STAYPOINT_ID: &str = "staypoint_id";

/// Name of the tripleg link column.
pub const TRIPLEG_ID: &str = "tripleg_id";

/// A single timestamped location sample of one user.
///
/// # Example
/// ```
/// use chrono::{TimeZone, Utc};
/// use geo::Point;
/// use trackseg::Positionfix;
///
/// let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
/// let fix = Positionfix::new(7, 1, at, Point::new(8.54, 47.37)).with_elevation(408.0);
/// assert!(fix.staypoint_id.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Positionfix {
    pub id: FixId,
    pub user_id: UserId,
    pub tracked_at: DateTime<Utc>,
    /// x = longitude (or easting), y = latitude (or northing)
    pub location: Point,
    /// Elevation in meters (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
    /// Staypoint this fix belongs to, if any
    #[serde(default)]
    pub staypoint_id: Option<EpisodeId>,
    /// Tripleg this fix belongs to, if any
    #[serde(default)]
    pub tripleg_id: Option<EpisodeId>,
}

impl Positionfix {
    /// Create an unlinked positionfix without elevation.
    pub fn new(id: FixId, user_id: UserId, tracked_at: DateTime<Utc>, location: Point) -> Self {
        Self {
            id,
            user_id,
            tracked_at,
            location,
            elevation: None,
            staypoint_id: None,
            tripleg_id: None,
        }
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    pub fn with_staypoint_id(mut self, staypoint_id: Option<EpisodeId>) -> Self {
        self.staypoint_id = staypoint_id;
        self
    }

    pub fn with_tripleg_id(mut self, tripleg_id: Option<EpisodeId>) -> Self {
        self.tripleg_id = tripleg_id;
        self
    }

    /// Check that both coordinates are finite.
    pub fn has_valid_location(&self) -> bool {
        self.location.x().is_finite() && self.location.y().is_finite()
    }
}

/// A table of positionfixes.
///
/// Besides the rows, the table records which link columns exist. A column can
/// be present while every value in it is null (e.g. after a staypoint run that
/// found nothing); tripleg generation treats "column present" and "column
/// absent" differently.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Positionfixes {
    rows: Vec<Positionfix>,
    has_staypoint_ids: bool,
    has_tripleg_ids: bool,
}

impl Positionfixes {
    /// Build a table from rows in any order.
    ///
    /// A link column is considered present if at least one row carries a
    /// value for it. Use [`with_staypoint_column`](Self::with_staypoint_column)
    /// or [`with_tripleg_column`](Self::with_tripleg_column) for all-null columns.
    pub fn new(rows: Vec<Positionfix>) -> Result<Self> {
        if let Some(fix) = rows.iter().find(|f| !f.has_valid_location()) {
            return Err(TrackSegError::InvalidLocation {
                id: fix.id,
                x: fix.location.x(),
                y: fix.location.y(),
            });
        }
        let has_staypoint_ids = rows.iter().any(|f| f.staypoint_id.is_some());
        let has_tripleg_ids = rows.iter().any(|f| f.tripleg_id.is_some());
        Ok(Self {
            rows,
            has_staypoint_ids,
            has_tripleg_ids,
        })
    }

    pub(crate) fn from_parts(
        rows: Vec<Positionfix>,
        has_staypoint_ids: bool,
        has_tripleg_ids: bool,
    ) -> Self {
        Self {
            rows,
            has_staypoint_ids,
            has_tripleg_ids,
        }
    }

    pub fn rows(&self) -> &[Positionfix] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Positionfix> {
        self.rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &Positionfix> + Clone {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First row with the given id.
    pub fn get(&self, id: FixId) -> Option<&Positionfix> {
        self.rows.iter().find(|f| f.id == id)
    }

    pub fn has_staypoint_ids(&self) -> bool {
        self.has_staypoint_ids
    }

    pub fn has_tripleg_ids(&self) -> bool {
        self.has_tripleg_ids
    }

    /// Names of all columns present in the table.
    pub fn columns(&self) -> Vec<&'static str> {
        let mut columns = vec!["id", "user_id", "tracked_at", "location"];
        if self.rows.iter().any(|f| f.elevation.is_some()) {
            columns.push("elevation");
        }
        if self.has_staypoint_ids {
            columns.push(STAYPOINT_ID);
        }
        if self.has_tripleg_ids {
            columns.push(TRIPLEG_ID);
        }
        columns
    }

    /// Declare the staypoint link column present even if every value is null.
    ///
    /// Tripleg generation then treats all fixes as free instead of deriving
    /// staypoints on its own.
    pub fn with_staypoint_column(mut self) -> Self {
        self.has_staypoint_ids = true;
        self
    }

    /// Declare the tripleg link column present even if every value is null.
    pub fn with_tripleg_column(mut self) -> Self {
        self.has_tripleg_ids = true;
        self
    }

    /// Copy of the table with the staypoint link column removed.
    pub fn without_staypoint_ids(&self) -> Self {
        let rows = self
            .rows
            .iter()
            .cloned()
            .map(|f| f.with_staypoint_id(None))
            .collect();
        Self::from_parts(rows, false, self.has_tripleg_ids)
    }

    /// Copy of the table with the tripleg link column removed.
    pub fn without_tripleg_ids(&self) -> Self {
        let rows = self
            .rows
            .iter()
            .cloned()
            .map(|f| f.with_tripleg_id(None))
            .collect();
        Self::from_parts(rows, self.has_staypoint_ids, false)
    }

    /// Copy of the table keeping only matching rows. The column set is kept.
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&Positionfix) -> bool,
    {
        let rows = self.rows.iter().filter(|f| predicate(f)).cloned().collect();
        Self::from_parts(rows, self.has_staypoint_ids, self.has_tripleg_ids)
    }

    /// Distinct user ids in ascending order.
    pub fn users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.rows.iter().map(|f| f.user_id).collect();
        users.sort_unstable();
        users.dedup();
        users
    }
}

/// A dwell episode: the user stayed within the distance threshold for at
/// least the time threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Staypoint {
    pub id: EpisodeId,
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Centroid of the member fixes
    pub location: Point,
    /// Median elevation of the member fixes that carry one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
}

impl Staypoint {
    pub fn duration(&self) -> Duration {
        self.finished_at - self.started_at
    }

    /// True if `at` falls inside `[started_at, finished_at]`.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.started_at <= at && at <= self.finished_at
    }
}

/// A movement episode: the path of consecutive fixes between staypoints or
/// tracking gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tripleg {
    pub id: EpisodeId,
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Polyline through the member fix locations, in time order
    pub geometry: LineString,
}

impl Tripleg {
    pub fn duration(&self) -> Duration {
        self.finished_at - self.started_at
    }

    /// Number of member fixes.
    pub fn fix_count(&self) -> usize {
        self.geometry.0.len()
    }
}
