//! Tests for tripleg segmentation

use chrono::{DateTime, Duration, TimeZone, Utc};
use geo::Point;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::json;
use std::sync::atomic::Ordering;
use trackseg::synthetic::TraceScenario;
use trackseg::*;

const P1: (f64, f64) = (8.5067847, 47.4);
const P2: (f64, f64) = (8.5067847, 47.5);
const P3: (f64, f64) = (8.5067847, 47.6);

const NO_STAYPOINTS: &[Staypoint] = &[];

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1971, 1, day, hour, minute, 0).unwrap()
}

fn t(minutes: i64) -> DateTime<Utc> {
    at(1, 0, 0) + Duration::minutes(minutes)
}

fn fix(id: i64, user_id: i64, tracked_at: DateTime<Utc>, p: (f64, f64), stp: Option<usize>) -> Positionfix {
    Positionfix::new(id, user_id, tracked_at, Point::new(p.0, p.1)).with_staypoint_id(stp)
}

/// User 0 moves between two staypoints but only reports one location in between,
/// user 1 moves properly, user 2 has a single free fix.
fn create_isolated_fixes() -> Vec<Positionfix> {
    let t1 = at(1, 0, 0);
    let t2 = at(2, 1, 1);
    let t3 = at(2, 1, 2);
    let t4 = at(3, 3, 0);

    vec![
        fix(0, 0, t1, P1, Some(0)),
        fix(1, 0, t2, P2, None),
        fix(2, 0, t3, P2, None),
        fix(3, 0, t4, P3, Some(1)),
        fix(4, 1, t1, P1, Some(2)),
        fix(5, 1, t2, P2, None),
        fix(6, 1, t3, P3, None),
        fix(7, 1, t4, P3, Some(3)),
        fix(8, 2, t1, P1, Some(4)),
        fix(9, 2, t2, P2, None),
        fix(10, 2, t4, P3, Some(5)),
    ]
}

/// Synthetic trace with staypoints generated by the default detector.
fn create_linked_trace() -> (Positionfixes, Vec<Staypoint>) {
    let trace = TraceScenario {
        user_count: 3,
        dwells_per_user: 4,
        ..TraceScenario::default()
    }
    .generate();
    let out = generate_staypoints(&trace.positionfixes, &StaypointConfig::default()).unwrap();
    (out.positionfixes, out.staypoints)
}

/// A walk northwards, one fix per minute, for the given minutes.
fn create_walk(user_id: i64, minutes: &[i64]) -> Vec<Positionfix> {
    minutes
        .iter()
        .enumerate()
        .map(|(i, &m)| {
            Positionfix::new(i as i64, user_id, t(m), Point::new(8.54, 47.37 + 0.001 * i as f64))
        })
        .collect()
}

#[test]
fn test_invalid_isolates() {
    let pfs = Positionfixes::new(create_isolated_fixes()).unwrap();

    let out = generate_triplegs(&pfs, None, &TriplegConfig::default()).unwrap();

    // User 0 only has two identical points, user 2 a single point
    assert_eq!(out.triplegs.len(), 1);
    assert_eq!(out.triplegs[0].user_id, 1);
    assert_eq!(out.triplegs[0].id, 0);
    assert_eq!(out.triplegs[0].fix_count(), 2);

    assert_eq!(
        out.diagnostics,
        vec![Diagnostic::InvalidTriplegs {
            fix_ids: vec![1, 2, 9]
        }]
    );
    assert!(out.diagnostics[0]
        .to_string()
        .contains("lead to invalid tripleg geometries"));

    let links: Vec<Option<usize>> = out.positionfixes.iter().map(|f| f.tripleg_id).collect();
    assert_eq!(
        links,
        vec![None, None, None, None, None, Some(0), Some(0), None, None, None, None]
    );
}

#[test]
fn test_noncontinuous_unordered_index() {
    let mut rows: Vec<Positionfix> = create_isolated_fixes()
        .into_iter()
        .map(|mut f| {
            f.id *= 2;
            f
        })
        .collect();
    rows.shuffle(&mut StdRng::seed_from_u64(0));
    let pfs = Positionfixes::new(rows).unwrap();

    let out = generate_triplegs(&pfs, None, &TriplegConfig::default()).unwrap();

    let ids: Vec<i64> = out.positionfixes.iter().map(|f| f.id).collect();
    assert_eq!(ids, (0..22).step_by(2).collect::<Vec<i64>>());

    assert_eq!(out.triplegs.len(), 1);
    assert_eq!(out.triplegs[0].user_id, 1);
    assert_eq!(
        out.diagnostics,
        vec![Diagnostic::InvalidTriplegs {
            fix_ids: vec![2, 4, 18]
        }]
    );
}

#[test]
fn test_stability() {
    let (pfs, stps) = create_linked_trace();

    // Case 1: staypoint links on the fixes
    let case1 = generate_triplegs(&pfs, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();
    let case1_wo = generate_triplegs(&pfs, None, &TriplegConfig::default()).unwrap();

    // Case 2: only the staypoint table
    let unlinked = pfs.without_staypoint_ids();
    let case2 = generate_triplegs(&unlinked, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();

    // Case 3: neither, staypoints are derived with default settings
    let case3 = generate_triplegs(&unlinked, None, &TriplegConfig::default()).unwrap();

    assert!(!case1.triplegs.is_empty());
    assert_eq!(case1.triplegs, case1_wo.triplegs);
    assert_eq!(case1.triplegs, case2.triplegs);
    assert_eq!(case1.triplegs, case3.triplegs);

    assert_eq!(case1.positionfixes, case1_wo.positionfixes);
    assert_eq!(case1.positionfixes.without_staypoint_ids(), case2.positionfixes);
    assert_eq!(case2.positionfixes, case3.positionfixes);
    assert!(!case2.positionfixes.columns().contains(&STAYPOINT_ID));
}

#[test]
fn test_pfs_without_stps() {
    let (pfs, stps) = create_linked_trace();

    let case1 = generate_triplegs(&pfs, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();

    // Keep only the fixes that are not part of a staypoint
    let free = pfs
        .filter(|f| f.staypoint_id.is_none())
        .without_staypoint_ids();
    let case2 = generate_triplegs(&free, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();

    assert_eq!(case1.triplegs, case2.triplegs);
}

#[test]
fn test_staypoint_boundary_splits_without_gap() {
    // Free fixes right before and after a staypoint whose own fixes are missing
    let rows = create_walk(0, &[0, 1, 2, 3, 10, 11, 12, 13]);
    let pfs = Positionfixes::new(rows).unwrap();
    let stps = vec![Staypoint {
        id: 0,
        user_id: 0,
        started_at: t(4),
        finished_at: t(9),
        location: Point::new(8.54, 47.37),
        elevation: None,
    }];

    let out = generate_triplegs(&pfs, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();
    assert_eq!(out.triplegs.len(), 2);
    assert_eq!(out.triplegs[0].finished_at, t(3));
    assert_eq!(out.triplegs[1].started_at, t(10));
}

#[test]
fn test_staypoint_interval_is_closed() {
    let rows = create_walk(0, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    let pfs = Positionfixes::new(rows).unwrap();
    let stps = vec![Staypoint {
        id: 0,
        user_id: 0,
        started_at: t(3),
        finished_at: t(5),
        location: Point::new(8.54, 47.37),
        elevation: None,
    }];

    let out = generate_triplegs(&pfs, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();
    let links: Vec<Option<usize>> = out.positionfixes.iter().map(|f| f.tripleg_id).collect();
    assert_eq!(
        links,
        vec![
            Some(0),
            Some(0),
            Some(0),
            None,
            None,
            None,
            Some(1),
            Some(1),
            Some(1),
            Some(1)
        ]
    );
}

#[test]
fn test_user_without_stps() {
    let (pfs, stps) = create_linked_trace();

    // The first fix moves to a user without any staypoint
    let mut rows = pfs.rows().to_vec();
    rows[0].user_id = 5000;
    let moved = Positionfixes::new(rows).unwrap();
    let rest = moved.filter(|f| f.id != 0);

    // Case 1
    let tpls_1 = generate_triplegs(&moved, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();
    let tpls_2 = generate_triplegs(&rest, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();
    assert_eq!(tpls_1.triplegs, tpls_2.triplegs);

    // Case 2
    let moved = moved.without_staypoint_ids();
    let rest = rest.without_staypoint_ids();
    let tpls_1 = generate_triplegs(&moved, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();
    let tpls_2 = generate_triplegs(&rest, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();
    assert_eq!(tpls_1.triplegs, tpls_2.triplegs);
    // The lonely fix cannot form a line
    assert_eq!(
        tpls_1.diagnostics,
        vec![Diagnostic::InvalidTriplegs { fix_ids: vec![0] }]
    );
}

#[test]
fn test_random_order() {
    let (pfs, stps) = create_linked_trace();
    let original = generate_triplegs(&pfs, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();

    let mut rows = pfs.rows().to_vec();
    rows.shuffle(&mut StdRng::seed_from_u64(0));
    let shuffled = Positionfixes::new(rows).unwrap();
    let shuffled = generate_triplegs(&shuffled, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();

    assert_eq!(original.positionfixes, shuffled.positionfixes);
    assert_eq!(original.triplegs, shuffled.triplegs);
}

#[test]
fn test_duplicate_columns() {
    let (pfs, stps) = create_linked_trace();

    let run_1 = generate_triplegs(&pfs, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();
    let run_2 =
        generate_triplegs(&run_1.positionfixes, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();

    assert_eq!(run_1.positionfixes.columns(), run_2.positionfixes.columns());
    assert_eq!(run_1.triplegs, run_2.triplegs);
}

#[test]
fn test_missing_link() {
    let (pfs, stps) = create_linked_trace();
    let out = generate_triplegs(&pfs, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();

    assert!(out.positionfixes.iter().any(|f| f.tripleg_id.is_none()));
    // A fix is never part of both a staypoint and a tripleg
    assert!(out
        .positionfixes
        .iter()
        .all(|f| f.staypoint_id.is_none() || f.tripleg_id.is_none()));
}

#[test]
fn test_index_start() {
    let (pfs, stps) = create_linked_trace();

    let case1 = generate_triplegs(&pfs, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();
    let case2 =
        generate_triplegs(&pfs.without_staypoint_ids(), Some(stps.as_slice()), &TriplegConfig::default())
            .unwrap();

    for out in [case1, case2] {
        for (i, tpl) in out.triplegs.iter().enumerate() {
            assert_eq!(tpl.id, i);
        }
    }
}

#[test]
fn test_one_tripleg_per_trip() {
    let (pfs, stps) = create_linked_trace();
    let out = generate_triplegs(&pfs, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();

    // 3 users with 4 dwells each: 3 trips per user. Without include_last the
    // last trip and the final dwell form a single tripleg.
    assert_eq!(out.triplegs.len(), 9);
    assert!(out.diagnostics.is_empty());
}

#[test]
fn test_stps_tpls_overlap() {
    let (pfs, stps) = create_linked_trace();
    let out = generate_triplegs(&pfs, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();

    for tpl in &out.triplegs {
        for stp in stps.iter().filter(|s| s.user_id == tpl.user_id) {
            assert!(tpl.finished_at < stp.started_at || tpl.started_at > stp.finished_at);
        }
    }
}

#[test]
fn test_geometry_follows_time() {
    let mut rows = create_walk(0, &[0, 1, 2, 3, 4]);
    rows.reverse();
    let pfs = Positionfixes::new(rows).unwrap();

    let out = generate_triplegs(&pfs, Some(NO_STAYPOINTS), &TriplegConfig::default()).unwrap();
    assert_eq!(out.triplegs.len(), 1);

    let lats: Vec<f64> = out.triplegs[0].geometry.points().map(|p| p.y()).collect();
    assert!(lats.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(out.triplegs[0].started_at, t(0));
    assert_eq!(out.triplegs[0].finished_at, t(4));
}

#[test]
fn test_temporal() {
    let rows = create_walk(1, &[0, 1, 2, 3, 4, 6, 7, 8, 20, 21, 22]);
    let pfs = Positionfixes::new(rows).unwrap();

    for (gap_threshold, expected) in [(0.5, 0), (1.0, 3), (1.5, 3), (2.0, 2), (5.0, 2), (12.0, 1)] {
        let config = TriplegConfig {
            gap_threshold,
            ..TriplegConfig::default()
        };
        let out = generate_triplegs(&pfs, Some(NO_STAYPOINTS), &config).unwrap();
        assert_eq!(out.triplegs.len(), expected, "gap_threshold {}", gap_threshold);

        // Consecutive triplegs of the user are only split at gaps above the threshold
        for pair in out.triplegs.windows(2) {
            let gap = pair[1].started_at - pair[0].finished_at;
            assert!(gap.num_seconds() as f64 > gap_threshold * 60.0);
        }
    }
}

#[test]
fn test_invalid_inputs() {
    let err = serde_json::from_value::<TriplegConfig>(json!({ "method": "random" })).unwrap_err();
    assert!(err.to_string().contains("Method unknown"));

    let err = serde_json::from_value::<TriplegConfig>(json!({ "method": 12345 })).unwrap_err();
    assert!(err.to_string().contains("Method unknown"));

    let (pfs, stps) = create_linked_trace();
    let config = TriplegConfig {
        gap_threshold: -1.0,
        ..TriplegConfig::default()
    };
    assert!(matches!(
        generate_triplegs(&pfs, Some(stps.as_slice()), &config),
        Err(TrackSegError::InvalidParameter { .. })
    ));
}

#[test]
fn test_derived_staypoint_diagnostics_are_returned() {
    let mut rows = create_walk(0, &[0, 1, 2]);
    rows.push(rows[2].clone());
    let pfs = Positionfixes::new(rows).unwrap();

    let out = generate_triplegs(&pfs, None, &TriplegConfig::default()).unwrap();
    assert_eq!(out.triplegs.len(), 1);
    assert_eq!(out.positionfixes.len(), 3);
    assert_eq!(
        out.diagnostics,
        vec![Diagnostic::DuplicatesDropped { count: 1 }]
    );
}

#[test]
fn test_progress_callback() {
    let (pfs, stps) = create_linked_trace();
    let tracker = AtomicProgressTracker::new();

    generate_triplegs_with_progress(&pfs, Some(stps.as_slice()), &TriplegConfig::default(), &tracker).unwrap();

    assert_eq!(tracker.total.load(Ordering::SeqCst), 3);
    assert_eq!(tracker.completed.load(Ordering::SeqCst), 3);
    assert_eq!(*tracker.phase.lock().unwrap(), "triplegs");
}

#[test]
fn test_empty_input() {
    let pfs = Positionfixes::new(Vec::new()).unwrap();
    let out = generate_triplegs(&pfs, Some(NO_STAYPOINTS), &TriplegConfig::default()).unwrap();
    assert!(out.triplegs.is_empty());
    assert!(out.diagnostics.is_empty());
    assert!(out.positionfixes.columns().contains(&TRIPLEG_ID));
}

#[test]
fn test_gap_just_above_threshold_splits() {
    let late = Duration::microseconds(500);
    let rows = vec![
        Positionfix::new(0, 0, t(0), Point::new(8.54, 47.370)),
        Positionfix::new(1, 0, t(1), Point::new(8.54, 47.371)),
        Positionfix::new(2, 0, t(16) + late, Point::new(8.54, 47.372)),
        Positionfix::new(3, 0, t(17) + late, Point::new(8.54, 47.373)),
    ];
    let pfs = Positionfixes::new(rows).unwrap();

    let out = generate_triplegs(&pfs, Some(NO_STAYPOINTS), &TriplegConfig::default()).unwrap();
    assert_eq!(out.triplegs.len(), 2);
    assert_eq!(out.triplegs[0].finished_at, t(1));
    assert_eq!(out.triplegs[1].started_at, t(16) + late);

    // Exactly the threshold does not split
    let on_time = Positionfixes::new(create_walk(0, &[0, 1, 16, 17])).unwrap();
    let out = generate_triplegs(&on_time, Some(NO_STAYPOINTS), &TriplegConfig::default()).unwrap();
    assert_eq!(out.triplegs.len(), 1);
}

#[test]
fn test_empty_staypoint_column_means_all_free() {
    // Ten minutes at one place, then a walk
    let mut rows: Vec<Positionfix> = (0..10)
        .map(|i| Positionfix::new(i, 0, t(i), Point::new(8.54, 47.37)))
        .collect();
    rows.extend((10..15).map(|i| {
        Positionfix::new(i, 0, t(i), Point::new(8.54, 47.37 + 0.002 * (i - 9) as f64))
    }));

    let declared = Positionfixes::new(rows.clone()).unwrap().with_staypoint_column();
    assert!(declared.has_staypoint_ids());
    let out = generate_triplegs(&declared, None, &TriplegConfig::default()).unwrap();
    assert_eq!(out.triplegs.len(), 1);
    assert_eq!(out.triplegs[0].fix_count(), 15);
    assert!(out.positionfixes.columns().contains(&STAYPOINT_ID));

    // Without the column the dwell is detected and left out
    let bare = Positionfixes::new(rows).unwrap();
    let out = generate_triplegs(&bare, None, &TriplegConfig::default()).unwrap();
    assert_eq!(out.triplegs.len(), 1);
    assert_eq!(out.triplegs[0].fix_count(), 5);
}

#[test]
fn test_overlapping_staypoints_are_merged() {
    let pfs = Positionfixes::new(create_walk(0, &(0..=15).collect::<Vec<i64>>())).unwrap();
    let stps: Vec<Staypoint> = [(0, 10), (2, 3)]
        .iter()
        .enumerate()
        .map(|(id, &(start, finish))| Staypoint {
            id,
            user_id: 0,
            started_at: t(start),
            finished_at: t(finish),
            location: Point::new(8.54, 47.37),
            elevation: None,
        })
        .collect();

    let out = generate_triplegs(&pfs, Some(stps.as_slice()), &TriplegConfig::default()).unwrap();
    assert_eq!(out.triplegs.len(), 1);
    assert_eq!(out.triplegs[0].started_at, t(11));
    assert_eq!(out.triplegs[0].fix_count(), 5);
    assert!(out
        .positionfixes
        .iter()
        .filter(|f| f.tracked_at <= t(10))
        .all(|f| f.tripleg_id.is_none()));
    assert!(out.diagnostics.is_empty());
}
