//! # Staypoint Detection
//!
//! Finds the places where a user dwelled, using a sliding window over each
//! user's chronologically sorted positionfixes.
//!
//! ## Algorithm
//! 1. Drop exact duplicate fixes (optional, on by default)
//! 2. Sort each user's fixes by time
//! 3. Grow a window `[i, j)` from the anchor fix `i` while fix `j` stays
//!    closer than `dist_threshold` to the anchor and follows its predecessor
//!    within `gap_threshold`
//! 4. When fix `j` breaks the window, keep `[i, j)` as a staypoint if it
//!    lasted at least `time_threshold`, then restart the window at `j`
//! 5. At the end of the track, evaluate the open window only if
//!    `include_last` is set
//! 6. Number all staypoints by `(user_id, started_at)` and link their fixes
//!
//! The window never rewinds, so each user is a single linear pass.

use chrono::Duration;
use geo::Point;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{check_threshold, describe_value, Result, TrackSegError};
use crate::geo_utils::{self, minutes_to_duration, DistanceMetric};
use crate::linkage::{self, Candidate, LinkColumn};
use crate::normalize::{self, UserTrack};
use crate::progress::{LogProgress, NoopProgress, Phase, ProgressCallback};
use crate::{Positionfix, Positionfixes, Staypoint};

/// Staypoint detection method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "Value")]
pub enum StaypointMethod {
    /// Sliding window after Li et al. (2008)
    #[default]
    Sliding,
}

impl StaypointMethod {
    const SUPPORTED: &'static str = "'sliding'";

    pub fn as_str(&self) -> &'static str {
        match self {
            StaypointMethod::Sliding => "sliding",
        }
    }
}

impl std::fmt::Display for StaypointMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StaypointMethod {
    type Err = TrackSegError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sliding" => Ok(StaypointMethod::Sliding),
            other => Err(TrackSegError::unsupported_method(
                format!("'{}'", other),
                Self::SUPPORTED,
            )),
        }
    }
}

impl TryFrom<Value> for StaypointMethod {
    type Error = TrackSegError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(s) => s.parse(),
            other => Err(TrackSegError::unsupported_method(
                describe_value(&other),
                Self::SUPPORTED,
            )),
        }
    }
}

/// Configuration for staypoint detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaypointConfig {
    /// Detection method. Default: sliding
    pub method: StaypointMethod,

    /// Distance function for the anchor test. Default: haversine (meters)
    pub distance_metric: DistanceMetric,

    /// A fix at this distance from the anchor or further breaks the window.
    /// Units follow `distance_metric`. Default: 100.0
    pub dist_threshold: f64,

    /// Minimum dwell duration in minutes. Default: 5.0
    pub time_threshold: f64,

    /// Largest tolerated time gap between consecutive fixes inside a
    /// staypoint, in minutes. A larger gap closes the window. Default: 15.0
    pub gap_threshold: f64,

    /// Also evaluate the window still open at the end of each user's track.
    /// Default: false
    pub include_last: bool,

    /// Log per-user progress. Does not change results. Default: false
    pub print_progress: bool,

    /// Drop exact duplicate fixes before detection. Default: true
    pub exclude_duplicates: bool,
}

impl Default for StaypointConfig {
    fn default() -> Self {
        Self {
            method: StaypointMethod::Sliding,
            distance_metric: DistanceMetric::Haversine,
            dist_threshold: 100.0,
            time_threshold: 5.0,
            gap_threshold: 15.0,
            include_last: false,
            print_progress: false,
            exclude_duplicates: true,
        }
    }
}

impl StaypointConfig {
    /// Check all thresholds. Called before any data is touched.
    pub fn validate(&self) -> Result<()> {
        check_threshold("dist_threshold", self.dist_threshold)?;
        check_threshold("time_threshold", self.time_threshold)?;
        check_threshold("gap_threshold", self.gap_threshold)?;
        Ok(())
    }
}

/// Result of staypoint generation.
#[derive(Debug, Clone)]
pub struct StaypointOutput {
    /// Input fixes (deduplicated) with a fresh `staypoint_id` column, ordered by fix id
    pub positionfixes: Positionfixes,
    /// Staypoints ordered by id
    pub staypoints: Vec<Staypoint>,
    /// Data-quality warnings raised on the way
    pub diagnostics: Vec<Diagnostic>,
}

/// Location summary of a staypoint candidate.
#[derive(Debug, Clone, PartialEq)]
struct Dwell {
    location: Point,
    elevation: Option<f64>,
}

/// Generate staypoints from positionfixes.
///
/// Returns the fixes with a `staypoint_id` column (any previous values are
/// replaced; an existing `tripleg_id` column is carried over) and the
/// staypoint table.
///
/// # Example
/// ```
/// use chrono::{Duration, TimeZone, Utc};
/// use geo::Point;
/// use trackseg::{generate_staypoints, Positionfix, Positionfixes, StaypointConfig};
///
/// let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
/// let fixes = (0..10)
///     .map(|i| Positionfix::new(i, 1, t0 + Duration::minutes(i), Point::new(8.54, 47.37)))
///     .collect();
/// let pfs = Positionfixes::new(fixes).unwrap();
///
/// let config = StaypointConfig { include_last: true, ..StaypointConfig::default() };
/// let out = generate_staypoints(&pfs, &config).unwrap();
/// assert_eq!(out.staypoints.len(), 1);
/// assert_eq!(out.staypoints[0].duration(), Duration::minutes(9));
/// ```
pub fn generate_staypoints(pfs: &Positionfixes, config: &StaypointConfig) -> Result<StaypointOutput> {
    if config.print_progress {
        generate_staypoints_with_progress(pfs, config, &LogProgress::new())
    } else {
        generate_staypoints_with_progress(pfs, config, &NoopProgress)
    }
}

/// [`generate_staypoints`] reporting one progress tick per user.
pub fn generate_staypoints_with_progress(
    pfs: &Positionfixes,
    config: &StaypointConfig,
    progress: &dyn ProgressCallback,
) -> Result<StaypointOutput> {
    config.validate()?;

    let mut diagnostics = Diagnostics::new();
    let fixes = if config.exclude_duplicates {
        let (deduplicated, dropped) = normalize::drop_duplicates(pfs);
        diagnostics.extend(dropped);
        deduplicated
    } else {
        pfs.clone()
    };
    let has_tripleg_ids = fixes.has_tripleg_ids();
    let mut rows = fixes.into_rows();

    let tracks = normalize::partition_by_user(&rows);
    progress.on_phase(Phase::Staypoints, tracks.len() as u32);

    let per_user = normalize::map_users(&tracks, |track| {
        let found = detect_user(&rows, track, config);
        progress.on_progress();
        found
    });

    let assigned = linkage::assign_ids(per_user.into_iter().flatten().collect());
    linkage::write_links(&mut rows, &assigned, LinkColumn::Staypoint);

    let staypoints: Vec<Staypoint> = assigned
        .into_iter()
        .map(|(id, candidate)| Staypoint {
            id,
            user_id: candidate.user_id,
            started_at: candidate.started_at,
            finished_at: candidate.finished_at,
            location: candidate.shape.location,
            elevation: candidate.shape.elevation,
        })
        .collect();

    info!(
        "Generated {} staypoints from {} positionfixes of {} users",
        staypoints.len(),
        rows.len(),
        tracks.len()
    );

    Ok(StaypointOutput {
        positionfixes: Positionfixes::from_parts(
            linkage::restore_order(rows),
            true,
            has_tripleg_ids,
        ),
        staypoints,
        diagnostics: diagnostics.into_vec(),
    })
}

/// Sliding-window pass over one user's sorted fixes.
fn detect_user(
    rows: &[Positionfix],
    track: &UserTrack,
    config: &StaypointConfig,
) -> Vec<Candidate<Dwell>> {
    let order = &track.positions;
    let max_gap = minutes_to_duration(config.gap_threshold);
    let min_dwell = minutes_to_duration(config.time_threshold);

    let mut found = Vec::new();
    let mut start = 0;

    for curr in 1..order.len() {
        let anchor = &rows[order[start]];
        let previous = &rows[order[curr - 1]];
        let fix = &rows[order[curr]];

        let moved = config
            .distance_metric
            .distance(&anchor.location, &fix.location)
            >= config.dist_threshold;
        let gap = fix.tracked_at - previous.tracked_at > max_gap;

        if moved || gap {
            found.extend(close_window(rows, &order[start..curr], min_dwell));
            start = curr;
        }
    }

    if config.include_last && !order.is_empty() {
        found.extend(close_window(rows, &order[start..], min_dwell));
    }

    debug!(
        "User {}: {} positionfixes, {} staypoints",
        track.user_id,
        order.len(),
        found.len()
    );
    found
}

/// Turn a closed window into a staypoint candidate if it lasted long enough.
fn close_window(
    rows: &[Positionfix],
    members: &[usize],
    min_dwell: Duration,
) -> Option<Candidate<Dwell>> {
    let first = &rows[*members.first()?];
    let last = &rows[*members.last()?];

    if last.tracked_at - first.tracked_at < min_dwell {
        return None;
    }

    let location = geo_utils::centroid(members.iter().map(|&p| rows[p].location))?;
    let elevation = geo_utils::median(members.iter().filter_map(|&p| rows[p].elevation));

    Some(Candidate {
        user_id: first.user_id,
        started_at: first.tracked_at,
        finished_at: last.tracked_at,
        first_fix_id: first.id,
        members: members.to_vec(),
        shape: Dwell {
            location,
            elevation,
        },
    })
}
