use quakeloc::config::EngineConfig;
use quakeloc::decorr::{CovarianceModel, Decorrelator, ObsGeometry};
use quakeloc::estimator::WeightedResidual;
use rstest::rstest;

/// Two-block kernel: picks of the clustered phase correlate at 0.99 among
/// themselves, everything else sits at a 0.1 floor.
struct BlockKernel;

impl CovarianceModel for BlockKernel {
    fn covariance(&self, a: &ObsGeometry, b: &ObsGeometry) -> f64 {
        if a.phase == "Pcluster" && b.phase == "Pcluster" {
            0.99
        } else {
            0.1
        }
    }
}

fn synthetic_set(total: usize, clustered: usize) -> (Vec<WeightedResidual>, Vec<ObsGeometry>) {
    let mut raws = Vec::with_capacity(total);
    let mut geometry = Vec::with_capacity(total);
    for i in 0..total {
        let az = (0.43 * i as f64).to_radians();
        raws.push(WeightedResidual::new(
            (0.37 * i as f64).sin(),
            1.0,
            [0.08 * az.cos(), -0.08 * az.sin(), 0.01],
            i,
        ));
        geometry.push(ObsGeometry {
            phase: if i < clustered {
                "Pcluster".to_string()
            } else {
                "Pother".to_string()
            },
            delta_deg: 25.0 + 0.01 * i as f64,
            azimuth_deg: (0.43 * i as f64) % 360.0,
        });
    }
    (raws, geometry)
}

/// 800 picks against a 450-row bound: the 350 evictions must all come from
/// the tightly correlated block, leaving every uncorrelated pick in place.
#[rstest]
fn triage_evicts_only_the_correlated_block() {
    let _ = pretty_env_logger::try_init();
    let (raws, geometry) = synthetic_set(800, 500);
    let cfg = EngineConfig::default();

    let mut decorr = Decorrelator::new();
    let outcome = decorr.decompose(&raws, &geometry, &BlockKernel, &cfg);

    assert_eq!(outcome.evicted.len(), 350);
    assert!(outcome.evicted.iter().all(|&i| i < 500));
    // The 300 picks outside the cluster all survived.
    let evicted: std::collections::BTreeSet<usize> = outcome.evicted.iter().copied().collect();
    for i in 500..800 {
        assert!(!evicted.contains(&i));
    }
}

/// Triage must be a pure function of the pick set.
#[rstest]
fn triage_is_idempotent_across_runs() {
    let (raws, geometry) = synthetic_set(600, 480);
    let cfg = EngineConfig::builder().max_picks_to_decorrelate(450).build();

    let mut first = Decorrelator::new();
    let mut second = Decorrelator::new();
    let out_a = first.decompose(&raws, &geometry, &BlockKernel, &cfg);
    let out_b = second.decompose(&raws, &geometry, &BlockKernel, &cfg);

    assert_eq!(out_a.evicted, out_b.evicted);
    assert_eq!(out_a.virtual_count, out_b.virtual_count);
}

/// The projection must hand the stepper a zero-residual set when the raw
/// residuals are zero, and scale linearly otherwise.
#[rstest]
fn projection_is_linear_in_the_residuals() {
    let (mut raws, geometry) = synthetic_set(40, 20);
    let cfg = EngineConfig::default();
    let mut decorr = Decorrelator::new();
    decorr.decompose(&raws, &geometry, &BlockKernel, &cfg);

    let virtuals = decorr.project(&raws, false);
    for raw in raws.iter_mut() {
        raw.residual *= 2.0;
    }
    let doubled = decorr.project(&raws, false);
    for (a, b) in virtuals.iter().zip(doubled.iter()) {
        assert!((2.0 * a.residual - b.residual).abs() < 1e-12);
        // Derivatives do not depend on the residuals.
        for j in 0..3 {
            assert!((a.derivs[j] - b.derivs[j]).abs() < 1e-12);
        }
    }
}
