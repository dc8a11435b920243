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

use std::cmp::Ordering;

pub mod wresid;

pub use wresid::{SortMode, WeightedResidual};

/// Rank-to-score knots tabulated at 5% steps of the rank fraction.
/// Antisymmetric about the middle and saturating at +/-1 in the outer tails,
/// so extreme residuals contribute a bounded 1-norm penalty.
const SCORE_KNOTS: [f64; 21] = [
    -1.0, -1.0, -0.92, -0.81, -0.69, -0.56, -0.44, -0.32, -0.21, -0.10, 0.0, 0.10, 0.21, 0.32,
    0.44, 0.56, 0.69, 0.81, 0.92, 1.0, 1.0,
];

/// Piecewise-linear rank-sum score for a rank fraction in `[0, 1]`.
pub fn rank_score(fraction: f64) -> f64 {
    let p = fraction.clamp(0.0, 1.0) * 20.0;
    let lo = (p.floor() as usize).min(19);
    let frac = p - lo as f64;
    SCORE_KNOTS[lo] * (1.0 - frac) + SCORE_KNOTS[lo + 1] * frac
}

/// Robust summary of a weighted-residual set.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RSumResult {
    /// Trial step length this evaluation belongs to, in km (zero at rest).
    pub step_len_km: f64,
    pub median: f64,
    /// 90th-percentile absolute deviation, in seconds.
    pub spread: f64,
    /// Rank-sum weighted 1-norm penalty.
    pub dispersion: f64,
}

fn sort_by_key(wresids: &mut [WeightedResidual]) {
    wresids.sort_unstable_by(|a, b| {
        a.sort_key
            .partial_cmp(&b.sort_key)
            .unwrap_or(Ordering::Equal)
    });
}

fn pick_count(wresids: &[WeightedResidual]) -> usize {
    wresids.iter().filter(|wr| !wr.is_bayes_depth).count()
}

/// Median of the residuals. The Bayesian-depth entry sorts to the tail and
/// never participates.
pub fn median(wresids: &mut [WeightedResidual]) -> f64 {
    let n = pick_count(wresids);
    if n == 0 {
        return 0.0;
    }
    for wr in wresids.iter_mut() {
        wr.set_sort_key(SortMode::Residual);
    }
    sort_by_key(wresids);
    if n % 2 == 1 {
        wresids[n / 2].sort_key
    } else {
        0.5 * (wresids[n / 2 - 1].sort_key + wresids[n / 2].sort_key)
    }
}

/// Median of the linearly estimated residuals along a trial step.
pub fn lin_est_median(wresids: &mut [WeightedResidual]) -> f64 {
    let n = pick_count(wresids);
    if n == 0 {
        return 0.0;
    }
    for wr in wresids.iter_mut() {
        wr.set_sort_key(SortMode::LinEst);
    }
    sort_by_key(wresids);
    if n % 2 == 1 {
        wresids[n / 2].sort_key
    } else {
        0.5 * (wresids[n / 2 - 1].sort_key + wresids[n / 2].sort_key)
    }
}

/// 90th-percentile absolute deviation from the median, linearly interpolated
/// between order statistics.
pub fn spread(wresids: &mut [WeightedResidual], median: f64) -> f64 {
    let n = pick_count(wresids);
    if n == 0 {
        return 0.0;
    }
    for wr in wresids.iter_mut() {
        wr.set_sort_key(SortMode::AbsResidual(median));
    }
    sort_by_key(wresids);
    percentile_90(&wresids[..n])
}

fn percentile_90(sorted: &[WeightedResidual]) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0].sort_key;
    }
    let pos = 0.9 * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let frac = pos - lo as f64;
    if lo + 1 < n {
        sorted[lo].sort_key * (1.0 - frac) + sorted[lo + 1].sort_key * frac
    } else {
        sorted[n - 1].sort_key
    }
}

/// Rank-sum dispersion of the demedianed weighted residuals. The
/// Bayesian-depth entry is weighted like any other observation here.
pub fn dispersion(wresids: &mut [WeightedResidual], median: f64) -> f64 {
    for wr in wresids.iter_mut() {
        wr.set_sort_key(SortMode::Dispersion(median));
    }
    sort_by_key(wresids);
    rank_weighted_sum(wresids)
}

/// Rank-sum dispersion of the linearly estimated residuals along a trial
/// step; the line search probes the objective through this.
pub fn trial_dispersion(wresids: &mut [WeightedResidual], median: f64) -> f64 {
    for wr in wresids.iter_mut() {
        wr.set_sort_key(SortMode::LinEstDispersion(median));
    }
    sort_by_key(wresids);
    rank_weighted_sum(wresids)
}

fn rank_weighted_sum(sorted: &[WeightedResidual]) -> f64 {
    let n = sorted.len();
    sorted
        .iter()
        .enumerate()
        .map(|(k, wr)| rank_score((k as f64 + 0.5) / n as f64) * wr.sort_key)
        .sum()
}

/// Full evaluation at the current hypocenter. Decorrelated residual sets are
/// zero-mean by construction, so `projected` forces the median to zero.
pub fn evaluate(wresids: &mut [WeightedResidual], projected: bool) -> RSumResult {
    let med = if projected { 0.0 } else { median(wresids) };
    let spr = spread(wresids, med);
    let disp = dispersion(wresids, med);
    RSumResult {
        step_len_km: 0.0,
        median: med,
        spread: spr,
        dispersion: disp,
    }
}
