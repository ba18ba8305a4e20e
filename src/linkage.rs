//! Global episode id assignment and foreign-key write-back.
//!
//! The per-user passes only produce [`Candidate`]s. Ids are handed out here,
//! once, after every user is done: candidates are sorted by
//! `(user_id, started_at)` and numbered from zero. This keeps ids independent
//! of input row order and of the order in which users finished.

use chrono::{DateTime, Utc};

use crate::{EpisodeId, FixId, Positionfix, UserId, STAYPOINT_ID, TRIPLEG_ID};

/// Which foreign-key column on the positionfixes to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkColumn {
    Staypoint,
    Tripleg,
}

impl LinkColumn {
    pub fn name(&self) -> &'static str {
        match self {
            LinkColumn::Staypoint => STAYPOINT_ID,
            LinkColumn::Tripleg => TRIPLEG_ID,
        }
    }

    fn set(&self, fix: &mut Positionfix, id: Option<EpisodeId>) {
        match self {
            LinkColumn::Staypoint => fix.staypoint_id = id,
            LinkColumn::Tripleg => fix.tripleg_id = id,
        }
    }
}

/// An episode found by a per-user pass, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<T> {
    pub user_id: UserId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Id of the chronologically first member fix (final tie-breaker)
    pub first_fix_id: FixId,
    /// Row positions of the member fixes
    pub members: Vec<usize>,
    /// Episode-specific geometry
    pub shape: T,
}

/// Sort candidates by `(user_id, started_at, finished_at, first_fix_id)` and
/// number them `0..n`.
pub fn assign_ids<T>(mut candidates: Vec<Candidate<T>>) -> Vec<(EpisodeId, Candidate<T>)> {
    candidates.sort_by(|a, b| {
        a.user_id
            .cmp(&b.user_id)
            .then(a.started_at.cmp(&b.started_at))
            .then(a.finished_at.cmp(&b.finished_at))
            .then(a.first_fix_id.cmp(&b.first_fix_id))
    });
    candidates.into_iter().enumerate().collect()
}

/// Write the link column: member rows get their episode id, every other row
/// gets `None`. Previous values in the column are discarded.
pub fn write_links<T>(
    rows: &mut [Positionfix],
    assigned: &[(EpisodeId, Candidate<T>)],
    column: LinkColumn,
) {
    for fix in rows.iter_mut() {
        column.set(fix, None);
    }
    for (id, candidate) in assigned {
        for &position in &candidate.members {
            if let Some(fix) = rows.get_mut(position) {
                column.set(fix, Some(*id));
            }
        }
    }
}

/// Order output rows by fix id. The sort is stable, so rows sharing an id
/// keep their input order.
pub fn restore_order(mut rows: Vec<Positionfix>) -> Vec<Positionfix> {
    rows.sort_by_key(|fix| fix.id);
    rows
}
