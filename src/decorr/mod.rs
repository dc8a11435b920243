/*
    Quakeloc, robust seismic event relocation
    Copyright (C) 2026 Quakeloc Developers

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use crate::config::EngineConfig;
use crate::estimator::WeightedResidual;
use crate::linalg::{DMatrix, SymmetricEigen};
use rayon::prelude::*;

/// Contributing eigenvector elements below this magnitude are ignored by the
/// sign check.
const DTOL: f64 = 0.01;

/// Geometry of one observation as seen from the source, the inputs to the
/// covariance kernel.
#[derive(Clone, Debug)]
pub struct ObsGeometry {
    pub phase: String,
    pub delta_deg: f64,
    pub azimuth_deg: f64,
}

impl ObsGeometry {
    /// Angular separation of the two receivers, with the source as pole.
    pub fn separation_deg(&self, other: &ObsGeometry) -> f64 {
        let (sa, ca) = self.delta_deg.to_radians().sin_cos();
        let (sb, cb) = other.delta_deg.to_radians().sin_cos();
        let daz = (self.azimuth_deg - other.azimuth_deg).to_radians();
        (ca * cb + sa * sb * daz.cos()).clamp(-1.0, 1.0).acos().to_degrees()
    }
}

/// Covariance kernel over pairs of picks. Implementations must be symmetric
/// and produce a positive-semidefinite matrix for well-behaved sets; the
/// diagonal is pinned to exactly one by the decorrelator.
pub trait CovarianceModel: Sync {
    fn covariance(&self, a: &ObsGeometry, b: &ObsGeometry) -> f64;
}

/// Gaussian decay of correlation with receiver separation; picks of
/// different phases do not correlate.
#[derive(Clone, Debug)]
pub struct DistanceDecayKernel {
    pub corr_len_deg: f64,
}

impl Default for DistanceDecayKernel {
    fn default() -> Self {
        Self { corr_len_deg: 10.0 }
    }
}

impl CovarianceModel for DistanceDecayKernel {
    fn covariance(&self, a: &ObsGeometry, b: &ObsGeometry) -> f64 {
        if a.phase != b.phase {
            return 0.0;
        }
        let sep = a.separation_deg(b);
        (-0.5 * (sep / self.corr_len_deg).powi(2)).exp()
    }
}

/// Outcome of a decomposition: which raw observations were evicted by
/// triage, and how many virtual observations the projection will produce.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecorrOutcome {
    pub evicted: Vec<usize>,
    pub virtual_count: usize,
}

/// Eigendecomposition-based decorrelator. The decomposition is kept across
/// iterations and reused for projection until the driver invalidates it
/// after a phase re-identification; the covariance matrix itself is released
/// as soon as the decomposition is done.
#[derive(Clone, Debug, Default)]
pub struct Decorrelator {
    eig_values: Vec<f64>,
    /// Eigenvector columns, sorted ascending by eigenvalue.
    eig_vectors: Option<DMatrix<f64>>,
    /// First retained eigenvalue index.
    keep_from: usize,
    /// Row count the decomposition was built for.
    n_rows: usize,
}

impl Decorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the stored decomposition still matches an observation set of
    /// `n` rows.
    pub fn is_valid_for(&self, n: usize) -> bool {
        self.eig_vectors.is_some() && self.n_rows == n
    }

    /// Discards the stored decomposition; the next call to [`Self::decompose`]
    /// rebuilds it.
    pub fn invalidate(&mut self) {
        self.eig_vectors = None;
        self.eig_values.clear();
        self.n_rows = 0;
        self.keep_from = 0;
    }

    /// Number of virtual observations the projection produces.
    pub fn virtual_count(&self) -> usize {
        self.eig_values[self.keep_from..]
            .iter()
            .filter(|&&lambda| lambda > 0.0)
            .count()
    }

    /// Builds the covariance matrix over the non-Bayesian observations in
    /// `raws`, triages it down to the configured bound, decomposes it and
    /// applies the eigenvalue truncation rule.
    ///
    /// Returns the indices (into `raws`) evicted by triage; the caller marks
    /// the corresponding picks so they stay out for the rest of the run.
    pub fn decompose(
        &mut self,
        raws: &[WeightedResidual],
        geometry: &[ObsGeometry],
        model: &dyn CovarianceModel,
        cfg: &EngineConfig,
    ) -> DecorrOutcome {
        debug_assert_eq!(raws.len(), geometry.len());
        let n = raws.len();
        let mut cov = covariance_matrix(geometry, model);

        let evicted = if n > cfg.max_picks_to_decorrelate {
            let evicted = triage(&mut cov, n - cfg.max_picks_to_decorrelate);
            info!(
                "triage evicted {} of {} correlated picks",
                evicted.len(),
                n
            );
            evicted
        } else {
            Vec::new()
        };

        let m = cov.nrows();
        let eig = SymmetricEigen::new(cov);

        // Ascending eigenvalue order; negative eigenvalues are clamped to
        // zero and their directions dropped by the truncation walk.
        let mut order: Vec<usize> = (0..m).collect();
        order.sort_unstable_by(|&a, &b| {
            eig.eigenvalues[a]
                .partial_cmp(&eig.eigenvalues[b])
                .unwrap()
        });
        let values: Vec<f64> = order
            .iter()
            .map(|&i| eig.eigenvalues[i].max(0.0))
            .collect();
        let mut vectors = DMatrix::zeros(m, m);
        for (col, &i) in order.iter().enumerate() {
            vectors.set_column(col, &eig.eigenvectors.column(i));
        }

        self.keep_from = truncate(&values, cfg);
        self.eig_values = values;
        self.eig_vectors = Some(vectors);
        self.n_rows = m;

        debug!(
            "decorrelation keeps {} of {} eigenvalues",
            self.n_rows - self.keep_from,
            self.n_rows
        );

        DecorrOutcome {
            evicted,
            virtual_count: self.virtual_count(),
        }
    }

    /// Projects the raw observations onto the retained eigenvectors,
    /// producing one virtual observation per eigenvector with weight
    /// `1/sqrt(lambda)`. When `canonicalize` is set (after a phase change),
    /// the eigenvector signs are re-checked against the raw derivatives and
    /// flipped in place where the physics demands it.
    pub fn project(
        &mut self,
        raws: &[WeightedResidual],
        canonicalize: bool,
    ) -> Vec<WeightedResidual> {
        let vectors = self
            .eig_vectors
            .as_mut()
            .expect("projection requested without a decomposition");
        let n = self.n_rows;
        debug_assert_eq!(raws.len(), n);

        let mut virtuals = Vec::with_capacity(n - self.keep_from);
        for (col, &lambda) in self.eig_values.iter().enumerate().skip(self.keep_from) {
            if lambda <= 0.0 {
                continue;
            }
            let mut virt = WeightedResidual {
                weight: 1.0 / lambda.sqrt(),
                ..Default::default()
            };
            for j in 0..n {
                let elem = vectors[(j, col)];
                virt.project(&raws[j], elem);
                virt.project_linear(&raws[j], elem);
            }

            if canonicalize && flip_required(&virt, raws, vectors, col) {
                virt.change_sign();
                for j in 0..n {
                    vectors[(j, col)] = -vectors[(j, col)];
                }
            }

            virtuals.push(virt);
        }
        virtuals
    }
}

fn covariance_matrix(geometry: &[ObsGeometry], model: &dyn CovarianceModel) -> DMatrix<f64> {
    let n = geometry.len();
    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            (i..n)
                .map(|j| {
                    if i == j {
                        1.0
                    } else {
                        model.covariance(&geometry[i], &geometry[j])
                    }
                })
                .collect()
        })
        .collect();

    let mut cov = DMatrix::zeros(n, n);
    for (i, row) in rows.iter().enumerate() {
        for (off, &value) in row.iter().enumerate() {
            let j = i + off;
            cov[(i, j)] = value;
            // Exact symmetry by copying across the diagonal.
            cov[(j, i)] = value;
        }
    }
    cov
}

/// Evicts the `count` most-correlated rows of `cov`, decrementing the
/// surviving row sums after each eviction, and shrinks the matrix to the
/// retained rows and columns. Returns the evicted row indices.
fn triage(cov: &mut DMatrix<f64>, count: usize) -> Vec<usize> {
    let n = cov.nrows();
    let mut sums: Vec<f64> = (0..n)
        .map(|i| cov.row(i).sum() - cov[(i, i)])
        .collect();
    let mut alive = vec![true; n];
    let mut evicted = Vec::with_capacity(count);

    for _ in 0..count {
        // Maximal row sum; ties go to the earliest original index.
        let mut best = usize::MAX;
        for i in 0..n {
            if alive[i] && (best == usize::MAX || sums[i] > sums[best]) {
                best = i;
            }
        }
        alive[best] = false;
        evicted.push(best);
        for l in 0..n {
            if alive[l] {
                sums[l] -= cov[(l, best)];
            }
        }
    }

    let retained: Vec<usize> = (0..n).filter(|&i| alive[i]).collect();
    let mut reduced = DMatrix::zeros(retained.len(), retained.len());
    for (ri, &i) in retained.iter().enumerate() {
        for (rj, &j) in retained.iter().enumerate() {
            reduced[(ri, rj)] = cov[(i, j)];
        }
    }
    *cov = reduced;
    evicted.sort_unstable();
    evicted
}

/// The eigenvalue truncation walk: accumulate from the largest eigenvalue
/// down and stop at the smallest index whose running sum exceeds the
/// configured fraction of the trace while the eigenvalue itself has fallen
/// under the top-threshold fraction of the largest.
fn truncate(values: &[f64], cfg: &EngineConfig) -> usize {
    let total: f64 = values.iter().sum();
    let largest = *values.last().unwrap_or(&0.0);
    if total <= 0.0 || largest <= 0.0 {
        return 0;
    }
    let mut acc = 0.0;
    for k in (0..values.len()).rev() {
        acc += values[k];
        if acc > cfg.eigenvalue_sum_limit * total
            && values[k] <= cfg.eigenvalue_top_threshold * largest
        {
            return k;
        }
    }
    0
}

/// The multi-way sign check. Eigenvector signs are mathematically arbitrary;
/// the physical convention is that a virtual observation correlates
/// positively with the cluster of raw observations that build it, with the
/// summed depth derivative as the arbiter when the correlations disagree.
fn flip_required(
    virt: &WeightedResidual,
    raws: &[WeightedResidual],
    vectors: &DMatrix<f64>,
    col: usize,
) -> bool {
    let mut c_max = f64::NEG_INFINITY;
    let mut c_min = f64::INFINITY;
    let mut d_sum = 0.0;
    let mut contributors = 0usize;
    for (j, raw) in raws.iter().enumerate() {
        if vectors[(j, col)].abs() > DTOL {
            let c = virt.correlate(raw);
            c_max = c_max.max(c);
            c_min = c_min.min(c);
            d_sum += raw.derivs[2];
            contributors += 1;
        }
    }
    if contributors == 0 {
        return false;
    }

    let v_depth = virt.derivs[2];
    let depth_disagree = d_sum * v_depth < 0.0;

    if c_max * c_min >= 0.0 {
        // One-sided cluster: the depth derivative decides outright.
        depth_disagree
    } else if c_max > -c_min {
        // Mostly positive correlations: keep, unless the depth derivatives
        // object; ambiguous clusters defer to a meaningful depth signal.
        if !depth_disagree {
            false
        } else if (c_max + c_min).abs() < 0.05 {
            v_depth.abs() > 1e-4
        } else {
            true
        }
    } else {
        // Mostly negative correlations, the mirrored case.
        if depth_disagree {
            true
        } else if (c_max + c_min).abs() < 0.05 {
            v_depth.abs() <= 1e-4
        } else {
            true
        }
    }
}

#[cfg(test)]
mod ut_decorr {
    use super::*;
    use approx::assert_relative_eq;

    fn geometry(n: usize) -> Vec<ObsGeometry> {
        (0..n)
            .map(|i| ObsGeometry {
                phase: "P".to_string(),
                delta_deg: 20.0 + 3.0 * i as f64,
                azimuth_deg: (47.0 * i as f64) % 360.0,
            })
            .collect()
    }

    fn residuals(n: usize) -> Vec<WeightedResidual> {
        (0..n)
            .map(|i| {
                WeightedResidual::new(
                    (i as f64 * 0.73).sin(),
                    1.0,
                    [0.05 * (i as f64).cos(), 0.05 * (i as f64).sin(), 0.02],
                    i,
                )
            })
            .collect()
    }

    #[test]
    fn kernel_is_symmetric_with_unit_diagonal() {
        let kernel = DistanceDecayKernel::default();
        let geoms = geometry(6);
        for a in &geoms {
            assert_relative_eq!(kernel.covariance(a, a), 1.0, epsilon = 1e-12);
            for b in &geoms {
                assert_relative_eq!(
                    kernel.covariance(a, b),
                    kernel.covariance(b, a),
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn cross_phase_picks_do_not_correlate() {
        let kernel = DistanceDecayKernel::default();
        let p = ObsGeometry {
            phase: "P".to_string(),
            delta_deg: 30.0,
            azimuth_deg: 10.0,
        };
        let pcp = ObsGeometry {
            phase: "PcP".to_string(),
            delta_deg: 30.0,
            azimuth_deg: 10.0,
        };
        assert_eq!(kernel.covariance(&p, &pcp), 0.0);
    }

    #[test]
    fn eigenvalues_sum_to_the_trace() {
        let kernel = DistanceDecayKernel::default();
        let geoms = geometry(12);
        let raws = residuals(12);
        let mut decorr = Decorrelator::new();
        let cfg = EngineConfig::default();
        decorr.decompose(&raws, &geoms, &kernel, &cfg);
        let sum: f64 = decorr.eig_values.iter().sum();
        // Unit diagonal, so the trace equals the row count.
        assert_relative_eq!(sum, 12.0, epsilon = 1e-10 * 12.0);
    }

    #[test]
    fn projection_diagonalizes_the_covariance() {
        let kernel = DistanceDecayKernel { corr_len_deg: 25.0 };
        let geoms = geometry(10);
        let raws = residuals(10);
        let cov = covariance_matrix(&geoms, &kernel);

        let mut decorr = Decorrelator::new();
        let cfg = EngineConfig::builder()
            .eigenvalue_sum_limit(1.1)
            .eigenvalue_top_threshold(0.0)
            .build();
        decorr.decompose(&raws, &geoms, &kernel, &cfg);
        let vectors = decorr.eig_vectors.as_ref().unwrap();

        // v_i' C v_j must vanish off the diagonal and equal lambda_i on it.
        let rotated = vectors.transpose() * &cov * vectors;
        let scale = decorr.eig_values.last().unwrap();
        for i in 0..10 {
            assert_relative_eq!(rotated[(i, i)], decorr.eig_values[i], epsilon = 1e-8);
            for j in 0..10 {
                if i != j {
                    assert!(rotated[(i, j)].abs() <= 1e-8 * scale);
                }
            }
        }
    }

    #[test]
    fn truncation_walk_defaults() {
        let cfg = EngineConfig::default();
        // One dominant block, tiny remainder: the walk passes the sum limit
        // inside the block and stops at the first small eigenvalue.
        let values = vec![1e-6, 1e-5, 1e-4, 2.0, 8.0];
        let keep = truncate(&values, &cfg);
        assert_eq!(keep, 2);

        // No eigenvalue is small relative to the top: keep all.
        let values = vec![0.5, 0.7, 0.9, 1.1];
        assert_eq!(truncate(&values, &cfg), 0);
    }

    #[test]
    fn triage_is_idempotent_and_stable() {
        let kernel = DistanceDecayKernel { corr_len_deg: 4.0 };
        let geoms = geometry(20);
        let raws = residuals(20);
        let cfg = EngineConfig::builder().max_picks_to_decorrelate(12).build();

        let mut first = Decorrelator::new();
        let out_a = first.decompose(&raws, &geoms, &kernel, &cfg);
        let mut second = Decorrelator::new();
        let out_b = second.decompose(&raws, &geoms, &kernel, &cfg);

        assert_eq!(out_a.evicted, out_b.evicted);
        assert_eq!(out_a.evicted.len(), 8);
        assert_eq!(first.n_rows, 12);
    }

    #[test]
    fn projected_weights_whiten_the_spectrum() {
        let kernel = DistanceDecayKernel::default();
        let geoms = geometry(8);
        let raws = residuals(8);
        let mut decorr = Decorrelator::new();
        let cfg = EngineConfig::default();
        decorr.decompose(&raws, &geoms, &kernel, &cfg);
        let virtuals = decorr.project(&raws, false);
        assert_eq!(virtuals.len(), decorr.virtual_count());
        for (virt, &lambda) in virtuals
            .iter()
            .zip(decorr.eig_values[decorr.keep_from..].iter())
        {
            assert_relative_eq!(virt.weight, 1.0 / lambda.sqrt(), epsilon = 1e-12);
        }
    }
}
