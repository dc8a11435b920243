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

/// How the sort key of a [`WeightedResidual`] is derived before a sort.
///
/// The Bayesian-depth entry is pushed to the tail under the pure-residual
/// modes so it never contaminates the median and spread of the travel-time
/// residuals; under the dispersion modes it is weighted like any other
/// observation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SortMode {
    /// Raw residual.
    Residual,
    /// `|residual - median|`.
    AbsResidual(f64),
    /// `(residual - median) * weight`, the dispersion key.
    Dispersion(f64),
    /// Linearly estimated residual along a trial step.
    LinEst,
    /// `(linEstResidual - median) * linEstWeight`.
    LinEstDispersion(f64),
}

/// One observation of the relocation problem: a weighted travel-time
/// residual with its spatial derivatives, or the synthetic Bayesian-depth
/// constraint, or a decorrelated virtual combination of either.
#[derive(Clone, Debug, Default)]
pub struct WeightedResidual {
    pub residual: f64,
    pub weight: f64,
    /// Travel-time partials in s/km along (south, east, down).
    pub derivs: [f64; 3],
    /// Spread partials matching `derivs`.
    pub spread_derivs: [f64; 3],
    /// Residual linearly projected along a trial step.
    pub lin_est_residual: f64,
    /// Weight linearly projected along a trial step.
    pub lin_est_weight: f64,
    /// Scratch key for the current sort mode.
    pub sort_key: f64,
    /// Index of the originating pick; `None` for virtual observations.
    pub pick: Option<usize>,
    /// Marks the Bayesian-depth entry.
    pub is_bayes_depth: bool,
}

impl WeightedResidual {
    pub fn new(residual: f64, weight: f64, derivs: [f64; 3], pick: usize) -> Self {
        Self {
            residual,
            weight,
            derivs,
            lin_est_residual: residual,
            lin_est_weight: weight,
            pick: Some(pick),
            ..Default::default()
        }
    }

    /// The synthetic depth observation: residual in km, unit depth
    /// derivative, weight of three over the prior spread.
    pub fn bayes_depth(residual_km: f64, weight: f64) -> Self {
        Self {
            residual: residual_km,
            weight,
            derivs: [0.0, 0.0, 1.0],
            lin_est_residual: residual_km,
            lin_est_weight: weight,
            is_bayes_depth: true,
            ..Default::default()
        }
    }

    /// Removes the median from the residual. The Bayesian-depth entry is a
    /// depth constraint, not a time, and is left alone.
    pub fn de_median_residual(&mut self, median: f64) {
        if !self.is_bayes_depth {
            self.residual -= median;
        }
    }

    /// Demedianed copy of the derivatives; the raw derivatives are kept.
    pub fn de_median_derivs(&self, medians: [f64; 3]) -> [f64; 3] {
        if self.is_bayes_depth {
            self.derivs
        } else {
            [
                self.derivs[0] - medians[0],
                self.derivs[1] - medians[1],
                self.derivs[2] - medians[2],
            ]
        }
    }

    /// Projects the residual along a trial step: origin-time shift `dt`
    /// (skipped for the depth entry) plus the spatial components of `step`.
    pub fn update_linear_estimate(&mut self, dt: f64, step: &[f64]) {
        let mut est = self.residual;
        if !self.is_bayes_depth {
            est -= dt;
        }
        for (j, component) in step.iter().enumerate() {
            est -= component * self.derivs[j];
        }
        self.lin_est_residual = est;
    }

    /// Projects the weight along a trial step through the spread partials.
    pub fn update_linear_weight(&mut self, step: &[f64]) {
        let mut inv = 1.0 / self.weight;
        for (j, component) in step.iter().enumerate() {
            inv += component * self.spread_derivs[j];
        }
        self.lin_est_weight = 1.0 / inv;
    }

    /// Derives the sort key for `mode`.
    pub fn set_sort_key(&mut self, mode: SortMode) {
        self.sort_key = match mode {
            SortMode::Residual => {
                if self.is_bayes_depth {
                    f64::INFINITY
                } else {
                    self.residual
                }
            }
            SortMode::AbsResidual(median) => {
                if self.is_bayes_depth {
                    f64::INFINITY
                } else {
                    (self.residual - median).abs()
                }
            }
            SortMode::Dispersion(median) => {
                if self.is_bayes_depth {
                    self.residual * self.weight
                } else {
                    (self.residual - median) * self.weight
                }
            }
            SortMode::LinEst => {
                if self.is_bayes_depth {
                    f64::INFINITY
                } else {
                    self.lin_est_residual
                }
            }
            SortMode::LinEstDispersion(median) => {
                if self.is_bayes_depth {
                    self.lin_est_residual * self.lin_est_weight
                } else {
                    (self.lin_est_residual - median) * self.lin_est_weight
                }
            }
        };
    }

    /// Folds `other` into this virtual observation with the eigenvector
    /// element `elem`.
    pub fn project(&mut self, other: &WeightedResidual, elem: f64) {
        self.residual += elem * other.residual;
        for j in 0..3 {
            self.derivs[j] += elem * other.derivs[j];
            self.spread_derivs[j] += elem * other.spread_derivs[j];
        }
    }

    /// Folds only the linear estimate of `other` into this observation.
    pub fn project_linear(&mut self, other: &WeightedResidual, elem: f64) {
        self.lin_est_residual += elem * other.lin_est_residual;
    }

    /// Flips the sign of the residual and of every derivative component.
    pub fn change_sign(&mut self) {
        self.residual = -self.residual;
        self.lin_est_residual = -self.lin_est_residual;
        for j in 0..3 {
            self.derivs[j] = -self.derivs[j];
            self.spread_derivs[j] = -self.spread_derivs[j];
        }
    }

    /// Euclidean norm of the horizontal derivative components.
    pub fn two_norm(&self) -> f64 {
        (self.derivs[0].powi(2) + self.derivs[1].powi(2)).sqrt()
    }

    /// Cosine similarity of the horizontal derivative vectors.
    pub fn correlate(&self, other: &WeightedResidual) -> f64 {
        let norms = self.two_norm() * other.two_norm();
        if norms < 1e-30 {
            return 0.0;
        }
        (self.derivs[0] * other.derivs[0] + self.derivs[1] * other.derivs[1]) / norms
    }
}
