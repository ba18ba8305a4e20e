//! Positionfix normalization: duplicate removal and per-user chronological
//! views.
//!
//! Nothing here reorders or mutates the caller's table. Sorting happens on
//! row positions, so fixes keep their identity for the later foreign-key
//! write-back.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::diagnostics::Diagnostic;
use crate::{Positionfix, Positionfixes, UserId};

/// Chronologically sorted row positions of one user's fixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTrack {
    pub user_id: UserId,
    /// Positions into the row slice the track was built from, ordered by
    /// `tracked_at`, then fix id, then position.
    pub positions: Vec<usize>,
}

impl UserTrack {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Identity of a fix for duplicate detection. Coordinates compare by value,
/// with `-0.0` folded onto `0.0`.
type DuplicateKey = (UserId, DateTime<Utc>, u64, u64);

fn coordinate_bits(value: f64) -> u64 {
    if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}

fn duplicate_key(fix: &Positionfix) -> DuplicateKey {
    (
        fix.user_id,
        fix.tracked_at,
        coordinate_bits(fix.location.x()),
        coordinate_bits(fix.location.y()),
    )
}

/// Remove exact duplicate fixes (same user, timestamp and location).
///
/// The first occurrence in row order is kept. Returns the filtered copy and,
/// if anything was dropped, a [`Diagnostic::DuplicatesDropped`].
pub fn drop_duplicates(pfs: &Positionfixes) -> (Positionfixes, Option<Diagnostic>) {
    let mut seen: HashSet<DuplicateKey> = HashSet::with_capacity(pfs.len());
    let kept: Vec<Positionfix> = pfs
        .iter()
        .filter(|fix| seen.insert(duplicate_key(fix)))
        .cloned()
        .collect();

    let dropped = pfs.len() - kept.len();
    let diagnostic = (dropped > 0).then_some(Diagnostic::DuplicatesDropped { count: dropped });

    (
        Positionfixes::from_parts(kept, pfs.has_staypoint_ids(), pfs.has_tripleg_ids()),
        diagnostic,
    )
}

/// Group row positions by user and sort each group chronologically.
///
/// Users come out in ascending id order. Equal timestamps are ordered by fix
/// id and then by row position, so the result does not depend on the input
/// row order.
pub fn partition_by_user(rows: &[Positionfix]) -> Vec<UserTrack> {
    let mut by_user: BTreeMap<UserId, Vec<usize>> = BTreeMap::new();
    for (position, fix) in rows.iter().enumerate() {
        by_user.entry(fix.user_id).or_default().push(position);
    }

    by_user
        .into_iter()
        .map(|(user_id, mut positions)| {
            positions.sort_by(|&a, &b| {
                rows[a]
                    .tracked_at
                    .cmp(&rows[b].tracked_at)
                    .then(rows[a].id.cmp(&rows[b].id))
                    .then(a.cmp(&b))
            });
            UserTrack { user_id, positions }
        })
        .collect()
}

/// Run `f` on every user track, in parallel when the `parallel` feature is
/// enabled. Results keep the order of `tracks`.
#[cfg(feature = "parallel")]
pub(crate) fn map_users<T, F>(tracks: &[UserTrack], f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&UserTrack) -> T + Sync + Send,
{
    use rayon::prelude::*;

    tracks.par_iter().map(f).collect()
}

#[cfg(not(feature = "parallel"))]
pub(crate) fn map_users<T, F>(tracks: &[UserTrack], f: F) -> Vec<T>
where
    F: Fn(&UserTrack) -> T,
{
    tracks.iter().map(f).collect()
}
