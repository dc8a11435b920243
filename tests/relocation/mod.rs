use crate::fixtures::{
    cardinal_stations, consistent_picks, mislabeled_core_pick, model, origin_epoch,
};
use approx::assert_relative_eq;
use hifitime::Duration;
use quakeloc::bayes::{DepthPrior, DepthSource};
use quakeloc::config::EngineConfig;
use quakeloc::cosmic::pick::{AuthorType, Pick, Station};
use quakeloc::cosmic::{AuditTag, Hypocenter};
use quakeloc::errors::{ExitCode, IterStatus};
use quakeloc::solver::driver::{Event, LocatorEngine};
use quakeloc::DEG2KM;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use rstest::rstest;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn horizontal_error_km(hypo: &Hypocenter) -> f64 {
    // Against a truth epicenter at (0, 0).
    let lat_km = hypo.latitude_deg * DEG2KM;
    let lon_km = hypo.longitude_deg * DEG2KM;
    (lat_km.powi(2) + lon_km.powi(2)).sqrt()
}

#[rstest]
fn held_location_four_picks() {
    let _ = pretty_env_logger::try_init();
    let truth = Hypocenter::new(origin_epoch(), 0.0, 0.0, 10.0);
    let stations = cardinal_stations();
    let tt_model = model();
    let picks = consistent_picks(&truth, &stations, &tt_model);

    let mut event = Event::new(truth, stations, picks).unwrap();
    event.is_location_held = true;

    let mut engine = LocatorEngine::new(EngineConfig::default(), tt_model);
    let summary = engine.locate(&mut event);

    assert_eq!(summary.exit, ExitCode::SuccessfulLocation);
    assert_eq!(summary.status, IterStatus::Success);
    // Initial plus exactly one held snapshot.
    assert_eq!(event.audit.len(), 2);
    assert_eq!(event.audit[0].tag, AuditTag::Initial);
    assert_eq!(event.audit[1].tag, AuditTag::Held);
    assert_eq!(event.hypo.step_len_km, 0.0);
    assert_relative_eq!(event.hypo.latitude_deg, 0.0, epsilon = 1e-9);
    assert_relative_eq!(event.hypo.longitude_deg, 0.0, epsilon = 1e-9);
    assert_relative_eq!(event.hypo.depth_km, 10.0, epsilon = 1e-9);
    assert!(summary.rsum.dispersion.abs() < 1e-9);
    // A perfectly consistent set leaves zero residuals on every pick.
    for pick in &event.picks {
        assert!(pick.residual_s.abs() < 1e-9);
    }
}

#[rstest]
#[case(true)]
#[case(false)]
fn pure_origin_time_shift(#[case] use_svd: bool) {
    let _ = pretty_env_logger::try_init();
    let truth = Hypocenter::new(origin_epoch(), 0.0, 0.0, 10.0);
    let stations = cardinal_stations();
    let tt_model = model();
    let picks = consistent_picks(&truth, &stations, &tt_model);

    // Same geometry, origin five seconds early: every residual is +5 s.
    let start = Hypocenter::new(
        origin_epoch() - Duration::from_seconds(5.0),
        0.0,
        0.0,
        10.0,
    );
    let mut event = Event::new(start, stations, picks).unwrap();
    event.decorrelate = use_svd;

    let mut engine = LocatorEngine::new(EngineConfig::default(), tt_model);
    let summary = engine.locate(&mut event);

    assert_eq!(summary.exit, ExitCode::SuccessfulLocation);
    let recovered_shift = (event.hypo.origin_time - origin_epoch()).to_seconds() + 5.0;
    assert_relative_eq!(recovered_shift, 5.0, epsilon = 1e-6);
    // The epicenter must not move.
    assert!(horizontal_error_km(&event.hypo) < 1e-6);
    assert_relative_eq!(event.hypo.depth_km, 10.0, epsilon = 1e-6);
    assert!(event.hypo.dispersion.abs() < 1e-9);
    assert_eq!(event.audit.last().unwrap().tag, AuditTag::Final);
}

#[rstest]
#[case(true)]
#[case(false)]
fn colocated_picks_are_singular(#[case] use_svd: bool) {
    let _ = pretty_env_logger::try_init();
    let truth = Hypocenter::new(origin_epoch(), 0.0, 0.0, 10.0);
    let stations = vec![Station::new("ONE", "QK", "00", 12.0, 15.0, 0.0)];
    let tt_model = model();

    // Three picks of the same station: the derivative rows are identical and
    // the normal matrix has no invertible block.
    let base = consistent_picks(&truth, &stations, &tt_model).remove(0);
    let picks: Vec<Pick> = (0..3)
        .map(|i| {
            let mut p = base.clone();
            p.id = format!("c{i}");
            p.arrival += Duration::from_seconds(i as f64);
            p
        })
        .collect();

    let mut event = Event::new(truth, stations, picks).unwrap();
    event.is_depth_held = true;
    event.decorrelate = use_svd;

    let mut engine = LocatorEngine::new(EngineConfig::default(), tt_model);
    let summary = engine.locate(&mut event);

    assert_eq!(summary.exit, ExitCode::LocationFailed);
    assert_eq!(summary.status, IterStatus::SingularMatrix);
    // The audit is finalized even on failure.
    assert_eq!(event.audit.last().unwrap().tag, AuditTag::Final);
}

#[rstest]
fn phase_reid_restart_converges() {
    let _ = pretty_env_logger::try_init();
    let truth = Hypocenter::new(origin_epoch(), 0.0, 0.0, 10.0);
    let stations = cardinal_stations();
    let tt_model = model();
    let mut picks = consistent_picks(&truth, &stations, &tt_model);
    // A core-reflected arrival carrying a direct-P label.
    picks.push(mislabeled_core_pick("pcp", &truth, 1, &stations, &tt_model));

    // Start about fifty kilometers off and one second late.
    let start = Hypocenter::new(
        origin_epoch() + Duration::from_seconds(1.0),
        0.35,
        0.25,
        25.0,
    );
    let mut event = Event::new(start, stations, picks).unwrap();

    let mut engine = LocatorEngine::new(EngineConfig::default(), tt_model);
    let summary = engine.locate(&mut event);

    assert_eq!(summary.exit, ExitCode::SuccessfulLocation);
    // The interlock must have recovered the core-reflected label.
    assert_eq!(event.picks[4].phase, "PcP");
    assert!(horizontal_error_km(&event.hypo) < 5.0);
    assert!((event.hypo.depth_km - 10.0).abs() < 10.0);
    assert!(
        (event.hypo.origin_time - origin_epoch())
            .to_seconds()
            .abs()
            < 1.0
    );
    assert!(summary.iterations <= 50);
}

#[rstest]
#[case(10.0)]
#[case(150.0)]
#[case(300.0)]
fn bayesian_depth_dominates_weak_resolution(#[case] start_depth_km: f64) {
    let _ = pretty_env_logger::try_init();
    let truth = Hypocenter::new(origin_epoch(), 0.0, 0.0, 100.0);
    let stations = cardinal_stations();
    let tt_model = model();
    let picks = consistent_picks(&truth, &stations, &tt_model);

    let mut start = Hypocenter::new(origin_epoch(), 0.2, -0.1, start_depth_km);
    start.set_bayes(&DepthPrior {
        mean_km: 100.0,
        spread_km: 10.0,
        source: DepthSource::Requested,
    });
    let mut event = Event::new(start, stations, picks).unwrap();

    let mut engine = LocatorEngine::new(EngineConfig::default(), tt_model);
    let summary = engine.locate(&mut event);

    assert_eq!(summary.exit, ExitCode::SuccessfulLocation);
    assert!(
        (event.hypo.depth_km - 100.0).abs() <= 15.0,
        "depth {} strayed from the prior",
        event.hypo.depth_km
    );
}

#[rstest]
fn too_few_picks_is_not_enough_data() {
    let _ = pretty_env_logger::try_init();
    let truth = Hypocenter::new(origin_epoch(), 0.0, 0.0, 10.0);
    let stations = cardinal_stations();
    let tt_model = model();
    let mut picks = consistent_picks(&truth, &stations, &tt_model);
    picks.truncate(2);

    let mut event = Event::new(truth, stations, picks).unwrap();
    let mut engine = LocatorEngine::new(EngineConfig::default(), tt_model);
    let summary = engine.locate(&mut event);

    assert_eq!(summary.exit, ExitCode::NotEnoughUseableData);
    assert_eq!(event.audit.last().unwrap().tag, AuditTag::Final);
}

#[rstest]
fn cancellation_finalizes_the_audit() {
    let _ = pretty_env_logger::try_init();
    let truth = Hypocenter::new(origin_epoch(), 0.0, 0.0, 10.0);
    let stations = cardinal_stations();
    let tt_model = model();
    let picks = consistent_picks(&truth, &stations, &tt_model);

    let start = Hypocenter::new(origin_epoch(), 1.0, 1.0, 50.0);
    let mut event = Event::new(start, stations, picks).unwrap();

    let flag = Arc::new(AtomicBool::new(true));
    let mut engine =
        LocatorEngine::new(EngineConfig::default(), tt_model).with_cancel(flag.clone());
    let summary = engine.locate(&mut event);

    assert_eq!(summary.exit, ExitCode::LocationFailed);
    assert_eq!(summary.status, IterStatus::Cancelled);
    assert_eq!(event.audit.first().unwrap().tag, AuditTag::Initial);
    assert_eq!(event.audit.last().unwrap().tag, AuditTag::Final);
}

#[rstest]
fn random_steps_preserve_spherical_invariants() {
    let mut rng = Pcg64Mcg::seed_from_u64(0x0C0FFEE);
    let mut hypo = Hypocenter::new(origin_epoch(), 37.0, -122.0, 50.0);
    for _ in 0..2000 {
        let mut dir = [
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        ];
        let norm = (dir.iter().map(|x| x * x).sum::<f64>()).sqrt().max(1e-9);
        dir.iter_mut().for_each(|x| *x /= norm);
        hypo.step(rng.gen_range(0.0..500.0), &dir);

        assert!((0.0..=180.0).contains(&hypo.colat_deg));
        assert!(hypo.longitude_deg > -180.0 && hypo.longitude_deg <= 180.0);
        assert!((0.0..=750.0).contains(&hypo.depth_km));
        assert!(hypo.latitude_deg.abs() <= 90.0);
    }
}

/// Both residual paths must settle on essentially the same hypocenter for a
/// clean teleseismic set.
#[rstest]
fn decorrelated_and_joint_paths_agree() {
    let _ = pretty_env_logger::try_init();
    let truth = Hypocenter::new(origin_epoch(), 0.0, 0.0, 10.0);
    let stations = cardinal_stations();
    let tt_model = model();

    let mut results = Vec::new();
    for use_svd in [true, false] {
        let picks = consistent_picks(&truth, &stations, &tt_model);
        let start = Hypocenter::new(origin_epoch(), 0.3, -0.2, 30.0);
        let mut event = Event::new(start, stations.clone(), picks).unwrap();
        event.decorrelate = use_svd;
        let mut engine = LocatorEngine::new(EngineConfig::default(), tt_model.clone());
        let summary = engine.locate(&mut event);
        assert_eq!(summary.exit, ExitCode::SuccessfulLocation);
        results.push((
            event.hypo.latitude_deg,
            event.hypo.longitude_deg,
            event.hypo.depth_km,
        ));
    }

    let (a, b) = (results[0], results[1]);
    assert!(((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt() * DEG2KM < 2.0);
    assert!((a.2 - b.2).abs() < 5.0);
}

#[rstest]
fn author_types_parse_from_the_wire() {
    // Spot check that the wire names match the enum.
    let json = r#""ContributedHuman""#;
    let author: AuthorType = serde_json::from_str(json).unwrap();
    assert_eq!(author, AuthorType::ContributedHuman);
}
