//! # Tripleg Segmentation
//!
//! Cuts each user's movement between staypoints into triplegs.
//!
//! ## Staypoint signal
//! - The fixes carry a `staypoint_id` column: a fix is free iff its
//!   `staypoint_id` is null.
//! - No column, but a staypoint table: a fix is taken by a staypoint iff its
//!   timestamp lies in `[started_at, finished_at]` of one of the user's
//!   staypoints, and the first fix after each staypoint starts a new run even
//!   when the staypoint's own fixes are missing. Overlapping staypoints are
//!   merged first.
//! - Neither: staypoints are derived with `StaypointConfig::default()`.
//!
//! ## Runs
//! A run of free fixes ends at a staypoint fix, before a fix following a gap
//! longer than `gap_threshold`, or at the end of the track. Runs with fewer
//! than two distinct coordinates cannot form a line and are reported.

use chrono::{DateTime, Duration, Utc};
use geo::{LineString, Point};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{check_threshold, describe_value, Result, TrackSegError};
use crate::geo_utils::{has_distinct_coordinates, minutes_to_duration};
use crate::linkage::{self, Candidate, LinkColumn};
use crate::normalize::{self, UserTrack};
use crate::progress::{NoopProgress, Phase, ProgressCallback};
use crate::staypoints::{generate_staypoints, StaypointConfig};
use crate::{FixId, Positionfix, Positionfixes, Staypoint, Tripleg, UserId};

/// Tripleg segmentation method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "Value")]
pub enum TriplegMethod {
    /// Everything between two staypoints, split at tracking gaps
    #[default]
    BetweenStaypoints,
}

impl TriplegMethod {
    const SUPPORTED: &'static str = "'between_staypoints'";

    pub fn as_str(&self) -> &'static str {
        match self {
            TriplegMethod::BetweenStaypoints => "between_staypoints",
        }
    }
}

impl std::fmt::Display for TriplegMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriplegMethod {
    type Err = TrackSegError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "between_staypoints" => Ok(TriplegMethod::BetweenStaypoints),
            other => Err(TrackSegError::unsupported_method(
                format!("'{}'", other),
                Self::SUPPORTED,
            )),
        }
    }
}

impl TryFrom<Value> for TriplegMethod {
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

/// Configuration for tripleg segmentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriplegConfig {
    /// Segmentation method. Default: between_staypoints
    pub method: TriplegMethod,

    /// Tracking gaps longer than this (minutes) split a tripleg. Default: 15.0
    pub gap_threshold: f64,
}

impl Default for TriplegConfig {
    fn default() -> Self {
        Self {
            method: TriplegMethod::BetweenStaypoints,
            gap_threshold: 15.0,
        }
    }
}

impl TriplegConfig {
    pub fn validate(&self) -> Result<()> {
        check_threshold("gap_threshold", self.gap_threshold)
    }
}

/// Result of tripleg generation.
#[derive(Debug, Clone)]
pub struct TriplegOutput {
    /// Input fixes with a fresh `tripleg_id` column, ordered by fix id
    pub positionfixes: Positionfixes,
    /// Triplegs ordered by id
    pub triplegs: Vec<Tripleg>,
    /// Data-quality warnings raised on the way
    pub diagnostics: Vec<Diagnostic>,
}

/// Where the "this fix belongs to a staypoint" information comes from.
enum StaypointSignal {
    /// `staypoint_id` values on the fixes
    Linked,
    /// Staypoint intervals per user, sorted by start
    Intervals(HashMap<UserId, Vec<(DateTime<Utc>, DateTime<Utc>)>>),
}

/// Per-user segmentation result.
#[derive(Default)]
struct UserSegments {
    triplegs: Vec<Candidate<LineString>>,
    invalid: Vec<FixId>,
}

/// Generate triplegs from positionfixes.
///
/// `staypoints` is only consulted when the fixes have no `staypoint_id`
/// column. If neither is available, staypoints are derived with default
/// thresholds; pass them explicitly when the pipeline uses other settings.
pub fn generate_triplegs(
    pfs: &Positionfixes,
    staypoints: Option<&[Staypoint]>,
    config: &TriplegConfig,
) -> Result<TriplegOutput> {
    generate_triplegs_with_progress(pfs, staypoints, config, &NoopProgress)
}

/// [`generate_triplegs`] reporting one progress tick per user.
pub fn generate_triplegs_with_progress(
    pfs: &Positionfixes,
    staypoints: Option<&[Staypoint]>,
    config: &TriplegConfig,
    progress: &dyn ProgressCallback,
) -> Result<TriplegOutput> {
    config.validate()?;

    let mut diagnostics = Diagnostics::new();
    let keep_staypoint_ids = pfs.has_staypoint_ids();

    let (signal, mut rows) = match staypoints {
        _ if keep_staypoint_ids => (StaypointSignal::Linked, pfs.rows().to_vec()),
        Some(staypoints) => (
            StaypointSignal::Intervals(index_intervals(staypoints)),
            pfs.rows().to_vec(),
        ),
        None => {
            warn!(
                "No staypoints given; deriving them with default thresholds. \
                 Pass staypoints explicitly if they were generated with other settings."
            );
            let derived = generate_staypoints(pfs, &StaypointConfig::default())?;
            diagnostics.absorb(derived.diagnostics);
            (StaypointSignal::Linked, derived.positionfixes.into_rows())
        }
    };

    let max_gap = minutes_to_duration(config.gap_threshold);
    let tracks = normalize::partition_by_user(&rows);
    progress.on_phase(Phase::Triplegs, tracks.len() as u32);

    let per_user = normalize::map_users(&tracks, |track| {
        let segments = segment_user(&rows, track, &signal, max_gap);
        progress.on_progress();
        segments
    });

    let mut candidates = Vec::new();
    let mut invalid = Vec::new();
    for segments in per_user {
        candidates.extend(segments.triplegs);
        invalid.extend(segments.invalid);
    }
    if !invalid.is_empty() {
        invalid.sort_unstable();
        diagnostics.push(Diagnostic::InvalidTriplegs { fix_ids: invalid });
    }

    let assigned = linkage::assign_ids(candidates);
    linkage::write_links(&mut rows, &assigned, LinkColumn::Tripleg);
    if !keep_staypoint_ids {
        for fix in rows.iter_mut() {
            fix.staypoint_id = None;
        }
    }

    let triplegs: Vec<Tripleg> = assigned
        .into_iter()
        .map(|(id, candidate)| Tripleg {
            id,
            user_id: candidate.user_id,
            started_at: candidate.started_at,
            finished_at: candidate.finished_at,
            geometry: candidate.shape,
        })
        .collect();

    info!(
        "Generated {} triplegs from {} positionfixes of {} users",
        triplegs.len(),
        rows.len(),
        tracks.len()
    );

    Ok(TriplegOutput {
        positionfixes: Positionfixes::from_parts(
            linkage::restore_order(rows),
            keep_staypoint_ids,
            true,
        ),
        triplegs,
        diagnostics: diagnostics.into_vec(),
    })
}

fn index_intervals(
    staypoints: &[Staypoint],
) -> HashMap<UserId, Vec<(DateTime<Utc>, DateTime<Utc>)>> {
    let mut intervals: HashMap<UserId, Vec<(DateTime<Utc>, DateTime<Utc>)>> = HashMap::new();
    for stp in staypoints {
        intervals
            .entry(stp.user_id)
            .or_default()
            .push((stp.started_at, stp.finished_at));
    }
    for user_intervals in intervals.values_mut() {
        user_intervals.sort();
        *user_intervals = merge_overlapping(user_intervals);
    }
    intervals
}

/// Collapse sorted closed intervals that overlap or touch into one.
fn merge_overlapping(
    sorted: &[(DateTime<Utc>, DateTime<Utc>)],
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut merged: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::with_capacity(sorted.len());
    for &(start, finish) in sorted {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(finish),
            _ => merged.push((start, finish)),
        }
    }
    merged
}

/// Mark which of the user's sorted fixes belong to a staypoint, and at which
/// positions a new run must start regardless of gaps.
fn staypoint_membership(
    rows: &[Positionfix],
    order: &[usize],
    user_id: UserId,
    signal: &StaypointSignal,
) -> (Vec<bool>, BTreeSet<usize>) {
    match signal {
        StaypointSignal::Linked => (
            order.iter().map(|&p| rows[p].staypoint_id.is_some()).collect(),
            BTreeSet::new(),
        ),
        StaypointSignal::Intervals(by_user) => {
            let Some(intervals) = by_user.get(&user_id) else {
                return (vec![false; order.len()], BTreeSet::new());
            };
            let times: Vec<DateTime<Utc>> = order.iter().map(|&p| rows[p].tracked_at).collect();

            let linked = times
                .iter()
                .map(|t| {
                    let idx = intervals.partition_point(|(start, _)| start <= t);
                    idx > 0 && *t <= intervals[idx - 1].1
                })
                .collect();

            // First fix strictly after each staypoint
            let boundaries = intervals
                .iter()
                .map(|(_, finish)| times.partition_point(|t| t <= finish))
                .filter(|&k| k < times.len())
                .collect();

            (linked, boundaries)
        }
    }
}

/// Split one user's sorted fixes into tripleg candidates.
fn segment_user(
    rows: &[Positionfix],
    track: &UserTrack,
    signal: &StaypointSignal,
    max_gap: Duration,
) -> UserSegments {
    let order = &track.positions;
    let (linked, boundaries) = staypoint_membership(rows, order, track.user_id, signal);

    let mut segments = UserSegments::default();
    let mut run: Vec<usize> = Vec::new();

    for (k, &position) in order.iter().enumerate() {
        if linked[k] {
            flush_run(rows, &mut run, &mut segments);
            continue;
        }
        if !run.is_empty() {
            let gap = rows[position].tracked_at - rows[order[k - 1]].tracked_at;
            if gap > max_gap || boundaries.contains(&k) {
                flush_run(rows, &mut run, &mut segments);
            }
        }
        run.push(position);
    }
    flush_run(rows, &mut run, &mut segments);

    debug!(
        "User {}: {} positionfixes, {} triplegs, {} positionfixes in invalid runs",
        track.user_id,
        order.len(),
        segments.triplegs.len(),
        segments.invalid.len()
    );
    segments
}

/// Emit the current run as a tripleg candidate, or record its fixes as
/// invalid if it cannot form a line. Leaves `run` empty.
fn flush_run(rows: &[Positionfix], run: &mut Vec<usize>, segments: &mut UserSegments) {
    if run.is_empty() {
        return;
    }
    let members = std::mem::take(run);
    let points: Vec<Point> = members.iter().map(|&p| rows[p].location).collect();

    if members.len() < 2 || !has_distinct_coordinates(&points) {
        segments
            .invalid
            .extend(members.iter().map(|&p| rows[p].id));
        return;
    }

    let first = &rows[members[0]];
    let last = &rows[members[members.len() - 1]];
    segments.triplegs.push(Candidate {
        user_id: first.user_id,
        started_at: first.tracked_at,
        finished_at: last.tracked_at,
        first_fix_id: first.id,
        shape: LineString::from(points),
        members,
    });
}
