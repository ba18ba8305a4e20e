//! Order-independence and consistency checks over synthetic traces

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use trackseg::synthetic::TraceScenario;
use trackseg::*;

fn create_scenarios() -> Vec<TraceScenario> {
    (0..4)
        .map(|seed| TraceScenario {
            user_count: 3,
            dwells_per_user: 2 + seed as usize,
            with_elevation: seed % 2 == 0,
            seed,
            ..TraceScenario::default()
        })
        .collect()
}

fn shuffled(pfs: &Positionfixes, seed: u64) -> Positionfixes {
    let mut rows = pfs.rows().to_vec();
    rows.shuffle(&mut StdRng::seed_from_u64(seed));
    Positionfixes::new(rows).unwrap()
}

#[test]
fn test_staypoints_ignore_row_order() {
    let config = StaypointConfig {
        include_last: true,
        ..StaypointConfig::default()
    };
    for scenario in create_scenarios() {
        let pfs = scenario.generate().positionfixes;
        let reference = generate_staypoints(&pfs, &config).unwrap();

        for seed in 0..3 {
            let out = generate_staypoints(&shuffled(&pfs, seed), &config).unwrap();
            assert_eq!(out.positionfixes, reference.positionfixes);
            assert_eq!(out.staypoints, reference.staypoints);
        }
    }
}

#[test]
fn test_pipeline_ignores_row_order() {
    for scenario in create_scenarios() {
        let pfs = scenario.generate().positionfixes;
        let stps = generate_staypoints(&pfs, &StaypointConfig::default()).unwrap();
        let reference = generate_triplegs(
            &stps.positionfixes,
            Some(stps.staypoints.as_slice()),
            &TriplegConfig::default(),
        )
        .unwrap();

        let out = generate_triplegs(
            &shuffled(&stps.positionfixes, 11),
            Some(stps.staypoints.as_slice()),
            &TriplegConfig::default(),
        )
        .unwrap();
        assert_eq!(out.positionfixes, reference.positionfixes);
        assert_eq!(out.triplegs, reference.triplegs);
    }
}

#[test]
fn test_every_fix_has_at_most_one_episode() {
    for scenario in create_scenarios() {
        let pfs = scenario.generate().positionfixes;
        let stps = generate_staypoints(&pfs, &StaypointConfig::default()).unwrap();
        let tpls = generate_triplegs(&stps.positionfixes, None, &TriplegConfig::default()).unwrap();

        assert_eq!(tpls.positionfixes.len(), pfs.len());
        for fix in tpls.positionfixes.iter() {
            assert!(fix.staypoint_id.is_none() || fix.tripleg_id.is_none());
        }
    }
}

#[test]
fn test_links_match_episode_tables() {
    for scenario in create_scenarios() {
        let pfs = scenario.generate().positionfixes;
        let stps = generate_staypoints(&pfs, &StaypointConfig::default()).unwrap();
        let tpls = generate_triplegs(&stps.positionfixes, None, &TriplegConfig::default()).unwrap();

        for (id, tpl) in tpls.triplegs.iter().enumerate() {
            let members: Vec<&Positionfix> = tpls
                .positionfixes
                .iter()
                .filter(|f| f.tripleg_id == Some(id))
                .collect();
            assert_eq!(members.len(), tpl.fix_count());
            assert!(members.iter().all(|f| f.user_id == tpl.user_id));
            assert_eq!(members.iter().map(|f| f.tracked_at).min(), Some(tpl.started_at));
            assert_eq!(members.iter().map(|f| f.tracked_at).max(), Some(tpl.finished_at));
        }

        for (id, stp) in stps.staypoints.iter().enumerate() {
            let members = stps
                .positionfixes
                .iter()
                .filter(|f| f.staypoint_id == Some(id));
            assert!(members.clone().all(|f| f.user_id == stp.user_id));
            assert_eq!(members.map(|f| f.tracked_at).min(), Some(stp.started_at));
        }
    }
}
