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

use crate::bayes::DepthPrior;
use crate::geodesy::{self, SphericalTrig};
use crate::{DEG2KM, DEPTH_MAX_KM, DEPTH_MIN_KM};
use hifitime::{Duration, Epoch};
use serde_derive::{Deserialize, Serialize};
use std::fmt;

pub mod pick;

/// Bayesian depth constraint attached to the hypocenter. The residual is kept
/// in sync with the depth on every write.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BayesDepth {
    pub mean_km: f64,
    /// 90th-percentile half-width of the prior, in km.
    pub spread_km: f64,
    /// `mean - depth`, in km.
    pub residual_km: f64,
    /// `3 / spread`.
    pub weight: f64,
}

/// The four-parameter hypocenter plus the derived spherical state and the
/// per-iteration stepping scratch the driver and stepper share.
#[derive(Clone, Debug)]
pub struct Hypocenter {
    pub origin_time: Epoch,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub depth_km: f64,
    /// Geocentric colatitude derived from the latitude.
    pub colat_deg: f64,
    pub trig: SphericalTrig,
    pub bayes: Option<BayesDepth>,
    /// Accepted step length of the last iteration, in km.
    pub step_len_km: f64,
    pub horizontal_step_km: f64,
    pub vertical_step_km: f64,
    /// Last linear origin-time shift, in seconds.
    pub delta_time_s: f64,
    /// Rank-sum dispersion at the current hypocenter.
    pub dispersion: f64,
    /// 90th-percentile residual spread at the current hypocenter.
    pub spread_s: f64,
    /// Step halvings spent by the last line search.
    pub num_dampings: usize,
    /// Unit step direction, two components when the depth is held.
    pub step_dir: Vec<f64>,
}

impl Hypocenter {
    pub fn new(origin_time: Epoch, latitude_deg: f64, longitude_deg: f64, depth_km: f64) -> Self {
        let colat_deg = geodesy::geocentric_colatitude_deg(latitude_deg);
        let mut hypo = Self {
            origin_time,
            latitude_deg,
            longitude_deg,
            depth_km: depth_km.clamp(DEPTH_MIN_KM, DEPTH_MAX_KM),
            colat_deg,
            trig: SphericalTrig::new(colat_deg, longitude_deg),
            bayes: None,
            step_len_km: 0.0,
            horizontal_step_km: 0.0,
            vertical_step_km: 0.0,
            delta_time_s: 0.0,
            dispersion: 0.0,
            spread_s: 0.0,
            num_dampings: 0,
            step_dir: Vec::new(),
        };
        hypo.wrap();
        hypo
    }

    /// Attaches a Bayesian depth prior. The prior weight is three over the
    /// spread since the spread is a 90th-percentile half-width.
    pub fn set_bayes(&mut self, prior: &DepthPrior) {
        self.bayes = Some(BayesDepth {
            mean_km: prior.mean_km,
            spread_km: prior.spread_km,
            residual_km: prior.mean_km - self.depth_km,
            weight: 3.0 / prior.spread_km,
        });
    }

    /// Clamped depth write, keeping the Bayesian residual in sync.
    pub fn set_depth(&mut self, depth_km: f64) {
        self.depth_km = depth_km.clamp(DEPTH_MIN_KM, DEPTH_MAX_KM);
        if let Some(bayes) = self.bayes.as_mut() {
            bayes.residual_km = bayes.mean_km - self.depth_km;
        }
    }

    /// Applies the linear origin-time shift.
    pub fn shift_origin(&mut self, delta_time_s: f64) {
        self.origin_time += Duration::from_seconds(delta_time_s);
        self.delta_time_s = delta_time_s;
    }

    /// Applies an accepted step of length `len_km` along the unit direction
    /// `dir` (south, east and optionally down, in km per km of step).
    ///
    /// The tangential components are composed in Cartesian km and divided by
    /// `DEG2KM` (and by the pre-step `sin(colat)` for longitude); colatitude
    /// and longitude are then renormalized to `[0, 180]` and `(-180, 180]`.
    pub fn step(&mut self, len_km: f64, dir: &[f64]) {
        let sin_before = self.trig.sin_colat.max(1e-10);
        self.horizontal_step_km = len_km * (dir[0].powi(2) + dir[1].powi(2)).sqrt();
        self.colat_deg += len_km * dir[0] / DEG2KM;
        self.longitude_deg += len_km * dir[1] / (DEG2KM * sin_before);

        if dir.len() > 2 {
            let before = self.depth_km;
            self.set_depth(self.depth_km + len_km * dir[2]);
            self.vertical_step_km = self.depth_km - before;
        } else {
            self.vertical_step_km = 0.0;
        }

        self.wrap();
        self.step_len_km = len_km;
        self.step_dir = dir.to_vec();
    }

    /// Renormalizes the spherical coordinates after an update and refreshes
    /// the derived latitude and trig cache.
    fn wrap(&mut self) {
        if self.colat_deg < 0.0 {
            self.colat_deg = -self.colat_deg;
            self.longitude_deg += 180.0;
        }
        if self.colat_deg > 180.0 {
            self.colat_deg = 360.0 - self.colat_deg;
            self.longitude_deg += 180.0;
        }
        while self.longitude_deg <= -180.0 {
            self.longitude_deg += 360.0;
        }
        while self.longitude_deg > 180.0 {
            self.longitude_deg -= 360.0;
        }
        self.latitude_deg = geodesy::geographic_latitude_deg(self.colat_deg);
        self.trig = SphericalTrig::new(self.colat_deg, self.longitude_deg);
        if let Some(bayes) = self.bayes.as_mut() {
            bayes.residual_km = bayes.mean_km - self.depth_km;
        }
    }
}

impl fmt::Display for Hypocenter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} ({:.4}, {:.4}) z={:.1} km",
            self.origin_time, self.latitude_deg, self.longitude_deg, self.depth_km
        )
    }
}

/// Why an audit snapshot was taken.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditTag {
    /// The hypocenter as received.
    Initial,
    /// End of a stage, before the thresholds tighten.
    Intermediate,
    /// A held location that was never iterated on.
    Held,
    /// The hypocenter reported to the caller.
    Final,
}

/// One immutable hypocenter snapshot in the audit trail.
#[derive(Clone, Debug, PartialEq)]
pub struct HypoAudit {
    pub tag: AuditTag,
    pub stage: usize,
    pub iteration: usize,
    pub origin_time: Epoch,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub depth_km: f64,
    pub step_len_km: f64,
    pub delta_time_s: f64,
    pub dispersion: f64,
    pub spread_s: f64,
}

impl HypoAudit {
    pub fn snapshot(hypo: &Hypocenter, tag: AuditTag, stage: usize, iteration: usize) -> Self {
        Self {
            tag,
            stage,
            iteration,
            origin_time: hypo.origin_time,
            latitude_deg: hypo.latitude_deg,
            longitude_deg: hypo.longitude_deg,
            depth_km: hypo.depth_km,
            step_len_km: hypo.step_len_km,
            delta_time_s: hypo.delta_time_s,
            dispersion: hypo.dispersion,
            spread_s: hypo.spread_s,
        }
    }
}

impl fmt::Display for HypoAudit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?} s{} i{}: ({:.4}, {:.4}) z={:.1} km step={:.2} km disp={:.3}",
            self.tag,
            self.stage,
            self.iteration,
            self.latitude_deg,
            self.longitude_deg,
            self.depth_km,
            self.step_len_km,
            self.dispersion
        )
    }
}
