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
use crate::errors::{IterStatus, LocError};
use crate::estimator::{self, WeightedResidual};
use crate::linalg::{Cholesky, DMatrix, DVector, SymmetricEigen};
use std::sync::atomic::{AtomicBool, Ordering};

/// Scale factors from one-sigma to 90% confidence, per degrees of freedom.
const CHI2_90_2D: f64 = 4.605;
const CHI2_90_3D: f64 = 6.251;

/// An accepted (possibly damped) step, or the verdict that no trial length
/// could reduce the dispersion.
#[derive(Clone, Debug)]
pub struct StepOutcome {
    pub status: IterStatus,
    /// Accepted step length, in km.
    pub step_len_km: f64,
    /// Unit step direction of `ndof` components.
    pub dir: Vec<f64>,
    /// Origin-time shift from the joint solve; zero in projected mode.
    pub delta_time_s: f64,
    /// Dispersion at the accepted trial length.
    pub dispersion: f64,
    /// Step halvings spent.
    pub dampings: usize,
}

/// One semi-axis of the 90% confidence ellipsoid.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EllipsoidAxis {
    pub semi_len_km: f64,
    /// Azimuth of the axis, clockwise from north, in degrees.
    pub azimuth_deg: f64,
    /// Dip below horizontal, in degrees.
    pub plunge_deg: f64,
}

/// Medians of the three derivative components across the non-Bayesian
/// observations.
fn deriv_medians(wresids: &[WeightedResidual]) -> [f64; 3] {
    let mut medians = [0.0; 3];
    let mut scratch: Vec<f64> = Vec::with_capacity(wresids.len());
    for (j, median) in medians.iter_mut().enumerate() {
        scratch.clear();
        scratch.extend(
            wresids
                .iter()
                .filter(|wr| !wr.is_bayes_depth)
                .map(|wr| wr.derivs[j]),
        );
        if scratch.is_empty() {
            continue;
        }
        scratch.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
        let n = scratch.len();
        *median = if n % 2 == 1 {
            scratch[n / 2]
        } else {
            0.5 * (scratch[n / 2 - 1] + scratch[n / 2])
        };
    }
    medians
}

/// Forms and solves the weighted normal equations, then walks the damped
/// line search until a trial length reduces the dispersion.
///
/// In projected mode the derivatives are demedianed so the origin-time shift
/// cancels out of the normal equations and the system is `ndof`-dimensional.
/// Otherwise an extra leading column jointly solves for the origin-time
/// shift.
pub fn compute_step(
    wresids: &mut [WeightedResidual],
    ndof: usize,
    projected: bool,
    pre_dispersion: f64,
    cfg: &EngineConfig,
    cancel: Option<&AtomicBool>,
) -> Result<StepOutcome, LocError> {
    let dims = if projected { ndof } else { ndof + 1 };
    let medians = if projected {
        deriv_medians(wresids)
    } else {
        [0.0; 3]
    };

    let mut normal = DMatrix::<f64>::zeros(dims, dims);
    let mut rhs = DVector::<f64>::zeros(dims);
    for wr in wresids.iter() {
        let derivs = wr.de_median_derivs(medians);
        let mut row = DVector::<f64>::zeros(dims);
        let offset = if projected {
            0
        } else {
            // Column zero is the origin-time shift; the depth constraint has
            // no time dependence.
            row[0] = if wr.is_bayes_depth { 0.0 } else { 1.0 };
            1
        };
        for j in 0..ndof {
            row[offset + j] = derivs[j];
        }
        let w2 = wr.weight * wr.weight;
        normal.ger(w2, &row, &row, 1.0);
        rhs.axpy(w2 * wr.residual, &row, 1.0);
    }

    let chol = Cholesky::new(normal).ok_or(LocError::SingularMatrix)?;
    let solution = chol.solve(&rhs);

    let (delta_time_s, spatial) = if projected {
        (0.0, solution.as_slice().to_vec())
    } else {
        (solution[0], solution.as_slice()[1..].to_vec())
    };

    let raw_len: f64 = spatial.iter().map(|x| x * x).sum::<f64>().sqrt();
    if raw_len < 1e-9 {
        // Nothing to search along; the solution is already stationary.
        return Ok(StepOutcome {
            status: IterStatus::Success,
            step_len_km: 0.0,
            dir: vec![0.0; ndof],
            delta_time_s,
            dispersion: pre_dispersion,
            dampings: 0,
        });
    }
    let dir: Vec<f64> = spatial.iter().map(|x| x / raw_len).collect();

    debug!(
        "trial step {:.3} km along {:?}, dT {:.3} s",
        raw_len, dir, delta_time_s
    );

    // Damped line search: L, L/2, L/4, ... until the dispersion drops.
    let mut trial_len = raw_len;
    for damping in 0..cfg.damp_limit {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(LocError::Cancelled);
            }
        }
        let scale = trial_len / raw_len;
        let step: Vec<f64> = dir.iter().map(|u| u * trial_len).collect();
        for wr in wresids.iter_mut() {
            wr.update_linear_estimate(delta_time_s * scale, &step);
            wr.update_linear_weight(&step);
        }
        let median = if projected {
            0.0
        } else {
            estimator::lin_est_median(wresids)
        };
        let dispersion = estimator::trial_dispersion(wresids, median);
        if dispersion < pre_dispersion {
            return Ok(StepOutcome {
                status: if damping == 0 {
                    IterStatus::Success
                } else {
                    IterStatus::DampStepLength
                },
                step_len_km: trial_len,
                dir,
                delta_time_s: delta_time_s * scale,
                dispersion,
                dampings: damping,
            });
        }
        debug!(
            "damping step to {:.3} km: dispersion {:.4} >= {:.4}",
            0.5 * trial_len,
            dispersion,
            pre_dispersion
        );
        trial_len *= 0.5;
    }

    Ok(StepOutcome {
        status: IterStatus::UnstableSolution,
        step_len_km: 0.0,
        dir,
        delta_time_s: 0.0,
        dispersion: pre_dispersion,
        dampings: cfg.damp_limit,
    })
}

/// Data importance of each observation: the diagonal of the resolution
/// operator, `w^2 d' N^-1 d`. The importances of a clean set sum to the
/// number of degrees of freedom.
pub fn importances(wresids: &[WeightedResidual], ndof: usize) -> Option<Vec<f64>> {
    let mut normal = DMatrix::<f64>::zeros(ndof, ndof);
    for wr in wresids {
        let row = DVector::from_iterator(ndof, wr.derivs[..ndof].iter().copied());
        normal.ger(wr.weight * wr.weight, &row, &row, 1.0);
    }
    let inverse = Cholesky::new(normal)?.inverse();

    Some(
        wresids
            .iter()
            .map(|wr| {
                let row = DVector::from_iterator(ndof, wr.derivs[..ndof].iter().copied());
                wr.weight * wr.weight * (&inverse * &row).dot(&row)
            })
            .collect(),
    )
}

/// Companion routine: the 90% confidence ellipsoid from the inverse normal
/// matrix at the final hypocenter. Failure is non-fatal and maps to
/// ERRORS_NOT_COMPUTED at the driver boundary.
pub fn error_ellipsoid(
    wresids: &[WeightedResidual],
    ndof: usize,
) -> Result<Vec<EllipsoidAxis>, LocError> {
    let mut normal = DMatrix::<f64>::zeros(ndof, ndof);
    for wr in wresids {
        let row = DVector::from_iterator(ndof, wr.derivs[..ndof].iter().copied());
        normal.ger(wr.weight * wr.weight, &row, &row, 1.0);
    }
    let covariance = Cholesky::new(normal)
        .ok_or(LocError::SingularMatrix)?
        .inverse();

    let chi2 = if ndof > 2 { CHI2_90_3D } else { CHI2_90_2D };
    let eig = SymmetricEigen::new(covariance);
    let mut axes = Vec::with_capacity(ndof);
    for i in 0..ndof {
        let lambda = eig.eigenvalues[i];
        if !lambda.is_finite() || lambda < 0.0 {
            return Err(LocError::SingularMatrix);
        }
        let v = eig.eigenvectors.column(i);
        let horizontal = (v[0].powi(2) + v[1].powi(2)).sqrt();
        // Coordinates are (south, east, down): north is -v[0].
        let mut azimuth = v[1].atan2(-v[0]).to_degrees();
        if azimuth < 0.0 {
            azimuth += 360.0;
        }
        let plunge = if ndof > 2 {
            v[2].atan2(horizontal).to_degrees()
        } else {
            0.0
        };
        axes.push(EllipsoidAxis {
            semi_len_km: (chi2 * lambda).sqrt(),
            azimuth_deg: azimuth,
            plunge_deg: plunge,
        });
    }
    axes.sort_unstable_by(|a, b| b.semi_len_km.partial_cmp(&a.semi_len_km).unwrap());
    Ok(axes)
}
