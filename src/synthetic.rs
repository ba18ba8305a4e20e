//! Synthetic positionfix generator for tests and benchmarking.
//!
//! Generates per-user traces that alternate between dwelling at a place and
//! travelling to the next one, with known ground truth for the number and
//! timing of dwells.
//!
//! # Example
//!
//! ```rust
//! use trackseg::synthetic::TraceScenario;
//!
//! let scenario = TraceScenario {
//!     user_count: 3,
//!     dwells_per_user: 4,
//!     ..TraceScenario::default()
//! };
//!
//! let trace = scenario.generate();
//! assert_eq!(trace.dwells.len(), 12);
//! assert_eq!(trace.positionfixes.users(), vec![0, 1, 2]);
//! ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use geo::Point;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

use crate::geo_utils::{meters_to_deg_lat, meters_to_deg_lng};
use crate::{FixId, Positionfix, Positionfixes, UserId};

// ============================================================================
// Types
// ============================================================================

/// Scenario configuration for generating synthetic traces.
#[derive(Debug, Clone)]
pub struct TraceScenario {
    /// Home location of user 0 (lon/lat). Other users are shifted east.
    pub origin: Point,
    /// Number of users.
    pub user_count: usize,
    /// Dwells per user. Every trace starts and ends with a dwell.
    pub dwells_per_user: usize,
    /// Duration of each dwell in minutes.
    pub dwell_minutes: i64,
    /// Sampling interval in seconds, for dwells and trips alike.
    pub fix_interval_seconds: i64,
    /// Distance covered between two trip fixes in meters.
    pub trip_step_meters: f64,
    /// Number of fixes on each trip between two dwells.
    pub trip_fixes: usize,
    /// GPS noise standard deviation in meters.
    pub gps_noise_sigma_meters: f64,
    /// Attach elevations to the fixes.
    pub with_elevation: bool,
    /// Timestamp of the first fix of every user.
    pub start: DateTime<Utc>,
    /// RNG seed for deterministic reproduction.
    pub seed: u64,
}

impl Default for TraceScenario {
    fn default() -> Self {
        Self {
            origin: Point::new(116.3186, 39.9846),
            user_count: 2,
            dwells_per_user: 3,
            dwell_minutes: 20,
            fix_interval_seconds: 60,
            trip_step_meters: 600.0,
            trip_fixes: 5,
            gps_noise_sigma_meters: 3.0,
            with_elevation: false,
            start: Utc
                .with_ymd_and_hms(2008, 10, 23, 2, 53, 4)
                .single()
                .unwrap_or_default(),
            seed: 42,
        }
    }
}

/// A dwell the generator placed in a trace.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedDwell {
    pub user_id: UserId,
    /// Noise-free dwell location.
    pub center: Point,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// A complete synthetic trace set with ground truth.
#[derive(Debug, Clone)]
pub struct SyntheticTrace {
    /// Fixes of all users, ids `0..n` in generation order.
    pub positionfixes: Positionfixes,
    /// Ground-truth dwells ordered by user, then time.
    pub dwells: Vec<ExpectedDwell>,
}

// ============================================================================
// Generation
// ============================================================================

/// Move a point by `meters` along `heading` (radians, 0 = east).
fn advance(point: &Point, heading: f64, meters: f64) -> Point {
    let dlat = meters_to_deg_lat(meters * heading.sin());
    let dlng = meters_to_deg_lng(meters * heading.cos(), point.y());
    Point::new(point.x() + dlng, point.y() + dlat)
}

/// Add Gaussian GPS noise to a point (Box-Muller).
fn add_gps_noise(point: &Point, sigma_meters: f64, rng: &mut StdRng) -> Point {
    if sigma_meters <= 0.0 {
        return *point;
    }
    let u1: f64 = rng.gen_range(0.0001..1.0);
    let u2: f64 = rng.gen();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    let z1 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).sin();

    Point::new(
        point.x() + meters_to_deg_lng(z1 * sigma_meters, point.y()),
        point.y() + meters_to_deg_lat(z0 * sigma_meters),
    )
}

impl TraceScenario {
    /// Number of fixes in one dwell.
    pub fn fixes_per_dwell(&self) -> usize {
        (self.dwell_minutes * 60 / self.fix_interval_seconds.max(1)) as usize + 1
    }

    /// Generate all users' traces.
    pub fn generate(&self) -> SyntheticTrace {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let interval = Duration::seconds(self.fix_interval_seconds.max(1));

        let mut rows: Vec<Positionfix> = Vec::new();
        let mut dwells: Vec<ExpectedDwell> = Vec::new();
        let mut next_id: FixId = 0;

        for user_index in 0..self.user_count {
            let user_id = user_index as UserId;
            let mut at = self.start;
            let mut place = advance(&self.origin, 0.0, 5_000.0 * user_index as f64);

            for dwell_index in 0..self.dwells_per_user {
                if dwell_index > 0 {
                    // Travel to the next place
                    let heading: f64 = rng.gen_range(0.0..(2.0 * PI));
                    for _ in 0..self.trip_fixes {
                        place = advance(&place, heading, self.trip_step_meters);
                        rows.push(self.fix(next_id, user_id, at, place, &mut rng));
                        next_id += 1;
                        at += interval;
                    }
                    place = advance(&place, heading, self.trip_step_meters);
                }

                let started_at = at;
                for k in 0..self.fixes_per_dwell() {
                    if k > 0 {
                        at += interval;
                    }
                    let noisy = add_gps_noise(&place, self.gps_noise_sigma_meters, &mut rng);
                    rows.push(self.fix(next_id, user_id, at, noisy, &mut rng));
                    next_id += 1;
                }
                dwells.push(ExpectedDwell {
                    user_id,
                    center: place,
                    started_at,
                    finished_at: at,
                });
                at += interval;
            }
        }

        SyntheticTrace {
            positionfixes: Positionfixes::from_parts(rows, false, false),
            dwells,
        }
    }

    fn fix(
        &self,
        id: FixId,
        user_id: UserId,
        at: DateTime<Utc>,
        location: Point,
        rng: &mut StdRng,
    ) -> Positionfix {
        let fix = Positionfix::new(id, user_id, at, location);
        if self.with_elevation {
            fix.with_elevation(400.0 + rng.gen_range(-2.0..2.0))
        } else {
            fix
        }
    }
}
