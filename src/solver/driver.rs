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
use crate::cosmic::pick::{Pick, PickGroup, Station};
use crate::cosmic::{AuditTag, HypoAudit, Hypocenter};
use crate::decorr::{CovarianceModel, Decorrelator, DistanceDecayKernel, ObsGeometry};
use crate::errors::{ExitCode, IterStatus, LocError, LocStatus};
use crate::estimator::{self, RSumResult, WeightedResidual};
use crate::solver::phase_id;
use crate::solver::stepper::{self, EllipsoidAxis};
use crate::ttime::TravelTimeModel;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Everything mutable about one location request: the station/pick arenas,
/// the pick groups, the hypocenter and the audit trail. An event is owned by
/// exactly one engine for the lifetime of the request.
#[derive(Clone, Debug)]
pub struct Event {
    pub stations: Vec<Station>,
    pub picks: Vec<Pick>,
    pub groups: Vec<PickGroup>,
    pub hypo: Hypocenter,
    pub audit: Vec<HypoAudit>,
    pub is_location_held: bool,
    pub is_depth_held: bool,
    /// Route the residuals through the decorrelation projection.
    pub decorrelate: bool,
}

impl Event {
    /// Builds the pick groups from the arenas: one group per station, picks
    /// in arrival-time order.
    pub fn new(hypo: Hypocenter, stations: Vec<Station>, picks: Vec<Pick>) -> Result<Self, LocError> {
        for pick in &picks {
            if pick.station >= stations.len() {
                return Err(LocError::BadPick {
                    details: format!("pick {} references station {}", pick.id, pick.station),
                });
            }
        }

        let mut by_station: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (pi, pick) in picks.iter().enumerate() {
            by_station.entry(pick.station).or_default().push(pi);
        }
        let groups = by_station
            .into_iter()
            .map(|(station, mut indices)| {
                indices.sort_by(|&a, &b| picks[a].arrival.cmp(&picks[b].arrival));
                let mut group = PickGroup::new(station);
                group.picks = indices;
                group
            })
            .collect();

        Ok(Self {
            stations,
            picks,
            groups,
            hypo,
            audit: Vec::new(),
            is_location_held: false,
            is_depth_held: false,
            decorrelate: true,
        })
    }

    /// Degrees of freedom for this request.
    pub fn ndof(&self) -> usize {
        if self.is_location_held {
            0
        } else if self.is_depth_held {
            2
        } else {
            3
        }
    }

    pub fn usable_picks(&self) -> usize {
        self.picks.iter().filter(|p| p.contributes()).count()
    }

    /// Recomputes every group's distance and azimuth from the current
    /// hypocenter.
    pub fn update_geometry(&mut self) {
        let trig = self.hypo.trig;
        for group in self.groups.iter_mut() {
            let station = &self.stations[group.station];
            group.update_geometry(&trig, station);
        }
    }

    /// Assembles the weighted-residual set over the contributing picks,
    /// with the kernel geometry and the raw-to-pick index map alongside.
    pub fn assemble(&self) -> (Vec<WeightedResidual>, Vec<ObsGeometry>, Vec<usize>) {
        let mut raws = Vec::new();
        let mut geometry = Vec::new();
        let mut map = Vec::new();
        for group in &self.groups {
            for &pi in &group.picks {
                let pick = &self.picks[pi];
                if !pick.contributes() {
                    continue;
                }
                let mut wr =
                    WeightedResidual::new(pick.residual_s, pick.weight, pick.derivs, pi);
                wr.spread_derivs = pick.spread_derivs;
                raws.push(wr);
                geometry.push(ObsGeometry {
                    phase: pick.phase.clone(),
                    delta_deg: group.delta_deg,
                    azimuth_deg: group.azimuth_deg,
                });
                map.push(pi);
            }
        }
        (raws, geometry, map)
    }

    /// The synthetic depth observation, present whenever a prior is set.
    pub fn bayes_sentinel(&self) -> Option<WeightedResidual> {
        self.hypo
            .bayes
            .map(|b| WeightedResidual::bayes_depth(b.residual_km, b.weight))
    }
}

/// What the engine hands back besides the mutated event.
#[derive(Clone, Debug)]
pub struct LocatorSummary {
    pub exit: ExitCode,
    pub status: IterStatus,
    pub iterations: usize,
    /// Final fit diagnostics over the raw residual set.
    pub rsum: RSumResult,
    pub ellipsoid: Option<Vec<EllipsoidAxis>>,
}

/// The iteration driver. Owns the travel-time session, the covariance model
/// and the decorrelator state; drives one event at a time to a terminal
/// status.
pub struct LocatorEngine<T: TravelTimeModel, C: CovarianceModel = DistanceDecayKernel> {
    pub cfg: EngineConfig,
    ttime: T,
    cov_model: C,
    decorr: Decorrelator,
    cancel: Option<Arc<AtomicBool>>,
}

fn min_picks(ndof: usize) -> usize {
    if ndof <= 2 {
        3
    } else {
        4
    }
}

impl<T: TravelTimeModel> LocatorEngine<T> {
    pub fn new(cfg: EngineConfig, ttime: T) -> Self {
        Self::with_covariance(cfg, ttime, DistanceDecayKernel::default())
    }
}

impl<T: TravelTimeModel, C: CovarianceModel> LocatorEngine<T, C> {
    pub fn with_covariance(cfg: EngineConfig, ttime: T, cov_model: C) -> Self {
        Self {
            cfg,
            ttime,
            cov_model,
            decorr: Decorrelator::new(),
            cancel: None,
        }
    }

    /// Installs a cooperative cancellation flag, checked once per outer
    /// iteration and once per damping probe.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|f| f.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Runs the full relocation. Every exit, successful or not, leaves the
    /// audit trail finalized and the per-pick diagnostics as current as they
    /// could be made.
    pub fn locate(&mut self, event: &mut Event) -> LocatorSummary {
        self.decorr.invalidate();
        event.audit.clear();
        event
            .audit
            .push(HypoAudit::snapshot(&event.hypo, AuditTag::Initial, 0, 0));

        match self.run(event) {
            Ok(summary) => summary,
            Err(err) => {
                let exit = ExitCode::from(&err);
                error!("location failed: {err}");
                event
                    .audit
                    .push(HypoAudit::snapshot(&event.hypo, AuditTag::Final, 0, 0));
                LocatorSummary {
                    exit,
                    status: match err {
                        LocError::SingularMatrix => IterStatus::SingularMatrix,
                        LocError::InsufficientData { .. } => IterStatus::InsufficientData,
                        LocError::Cancelled => IterStatus::Cancelled,
                        _ => IterStatus::SingularMatrix,
                    },
                    iterations: 0,
                    rsum: RSumResult::default(),
                    ellipsoid: None,
                }
            }
        }
    }

    fn run(&mut self, event: &mut Event) -> Result<LocatorSummary, LocError> {
        let ndof = event.ndof();
        event.update_geometry();
        phase_id::identify_phases(
            &mut event.picks,
            &event.groups,
            &event.stations,
            &event.hypo,
            &self.ttime,
        )?;

        if event.is_location_held {
            return self.hold_location(event);
        }

        let usable = event.usable_picks();
        if usable < min_picks(ndof) {
            return Err(LocError::InsufficientData { used: usable, ndof });
        }

        // The first projection canonicalizes the eigenvector signs.
        let mut phase_changed = true;
        let mut total_iterations = 0;
        let mut total_step_km = 0.0;
        let mut total_shift_s = 0.0;
        let mut consecutive_unstable = 0;
        let mut last_step_km = f64::INFINITY;
        let mut final_status = IterStatus::FullIterations;
        let last_stage = self.cfg.stages.len() - 1;

        for stage in 0..self.cfg.stages.len() {
            let limits = self.cfg.stages[stage];
            let mut reids_this_stage = 0;
            let mut iteration = 0;
            let mut stage_converged = false;

            while iteration < limits.iter_cap {
                if self.cancelled() {
                    return Err(LocError::Cancelled);
                }
                iteration += 1;
                total_iterations += 1;

                let (mut raws, geometry, mut map) = event.assemble();
                if raws.len() < min_picks(ndof) {
                    return Err(LocError::InsufficientData {
                        used: raws.len(),
                        ndof,
                    });
                }

                // Robust statistics of the raw residuals; the median is the
                // linear origin-time shift.
                let mut scratch = raws.clone();
                if let Some(sentinel) = event.bayes_sentinel() {
                    scratch.push(sentinel);
                }
                let raw_sum = estimator::evaluate(&mut scratch, false);
                event.hypo.spread_s = raw_sum.spread;

                let (pre_dispersion, outcome) = if event.decorrelate {
                    // Fold the median into the origin time so the projected
                    // set is zero-mean.
                    if raw_sum.median.abs() > 1e-12 {
                        event.hypo.shift_origin(raw_sum.median);
                        total_shift_s += raw_sum.median;
                        for raw in raws.iter_mut() {
                            raw.de_median_residual(raw_sum.median);
                        }
                        for &pi in &map {
                            event.picks[pi].residual_s -= raw_sum.median;
                        }
                    }

                    if !self.decorr.is_valid_for(raws.len()) {
                        let out =
                            self.decorr
                                .decompose(&raws, &geometry, &self.cov_model, &self.cfg);
                        if !out.evicted.is_empty() {
                            for &ei in &out.evicted {
                                event.picks[map[ei]].is_triaged = true;
                            }
                            // Rebuild the residual set over the survivors and
                            // decompose their covariance.
                            let (r, g, m) = event.assemble();
                            raws = r;
                            map = m;
                            self.decorr.decompose(&raws, &g, &self.cov_model, &self.cfg);
                        }
                    }

                    let mut virtuals = self.decorr.project(&raws, phase_changed);
                    if let Some(sentinel) = event.bayes_sentinel() {
                        virtuals.push(sentinel);
                    }
                    let mut vscratch = virtuals.clone();
                    let pre = estimator::evaluate(&mut vscratch, true).dispersion;
                    let outcome = stepper::compute_step(
                        &mut virtuals,
                        ndof,
                        true,
                        pre,
                        &self.cfg,
                        self.cancel.as_deref(),
                    )?;
                    (pre, outcome)
                } else {
                    if let Some(sentinel) = event.bayes_sentinel() {
                        raws.push(sentinel);
                    }
                    let pre = raw_sum.dispersion;
                    let outcome = stepper::compute_step(
                        &mut raws,
                        ndof,
                        false,
                        pre,
                        &self.cfg,
                        self.cancel.as_deref(),
                    )?;
                    (pre, outcome)
                };
                phase_changed = false;

                if outcome.status == IterStatus::UnstableSolution {
                    consecutive_unstable += 1;
                    warn!(
                        "stage {stage} iteration {iteration}: no trial step reduced the dispersion"
                    );
                    if consecutive_unstable >= 2 {
                        final_status = IterStatus::UnstableSolution;
                        return self.finish(event, ndof, final_status, total_iterations);
                    }
                    // Fallback: let the interlock reshuffle the labels and
                    // try once more.
                    let reid = phase_id::identify_phases(
                        &mut event.picks,
                        &event.groups,
                        &event.stations,
                        &event.hypo,
                        &self.ttime,
                    )?;
                    if reid.changed {
                        self.decorr.invalidate();
                        phase_changed = true;
                    }
                    continue;
                }
                consecutive_unstable = 0;

                // Accepted step: update the hypocenter.
                event.hypo.step(outcome.step_len_km, &outcome.dir);
                if !event.decorrelate && outcome.delta_time_s.abs() > 0.0 {
                    event.hypo.shift_origin(outcome.delta_time_s);
                    total_shift_s += outcome.delta_time_s;
                }
                event.hypo.num_dampings = outcome.dampings;
                let d_dispersion = (pre_dispersion - outcome.dispersion).abs();
                event.hypo.dispersion = outcome.dispersion;
                total_step_km += outcome.step_len_km;
                last_step_km = outcome.step_len_km;

                if self.cfg.debug > 0 {
                    info!(
                        "stage {stage} iteration {iteration}: step {:.3} km, dispersion {:.4} -> {:.4}, dampings {}",
                        outcome.step_len_km, pre_dispersion, outcome.dispersion, outcome.dampings
                    );
                } else {
                    debug!(
                        "stage {stage} iteration {iteration}: step {:.3} km, dispersion {:.4} -> {:.4}",
                        outcome.step_len_km, pre_dispersion, outcome.dispersion
                    );
                }

                event.update_geometry();
                let reid = phase_id::identify_phases(
                    &mut event.picks,
                    &event.groups,
                    &event.stations,
                    &event.hypo,
                    &self.ttime,
                )?;
                if reid.changed {
                    self.decorr.invalidate();
                    phase_changed = true;
                    reids_this_stage += 1;
                    if reids_this_stage <= self.cfg.reid_limit {
                        debug!("iteration discarded by phase re-identification");
                        continue;
                    }
                    warn!("phase re-identification limit reached, accepting labels");
                }

                if outcome.step_len_km <= limits.step_km && d_dispersion <= limits.dispersion_s {
                    stage_converged = true;
                    break;
                }
            }

            info!(
                "stage {stage} {} after {iteration} iterations, dispersion {:.4}",
                if stage_converged { "converged" } else { "exhausted" },
                event.hypo.dispersion
            );

            if stage < last_stage {
                event.audit.push(HypoAudit::snapshot(
                    &event.hypo,
                    AuditTag::Intermediate,
                    stage,
                    iteration,
                ));
            } else {
                final_status = if stage_converged {
                    IterStatus::Success
                } else if last_step_km < 2.0 * limits.step_km {
                    IterStatus::NearlyConverged
                } else {
                    IterStatus::FullIterations
                };
            }
        }

        if total_step_km < 1e-3 && total_shift_s.abs() < 1e-3 {
            final_status = IterStatus::DidNotMove;
        }

        self.finish(event, ndof, final_status, total_iterations)
    }

    /// Held location: a single audit pass with no stepping.
    fn hold_location(&mut self, event: &mut Event) -> Result<LocatorSummary, LocError> {
        let (raws, _, map) = event.assemble();
        let mut scratch = raws.clone();
        if let Some(sentinel) = event.bayes_sentinel() {
            scratch.push(sentinel);
        }
        let rsum = estimator::evaluate(&mut scratch, false);
        event.hypo.dispersion = rsum.dispersion;
        event.hypo.spread_s = rsum.spread;
        event.hypo.step_len_km = 0.0;

        if let Some(imps) = stepper::importances(&raws, 3) {
            for (k, imp) in imps.iter().enumerate() {
                event.picks[map[k]].importance = *imp;
            }
        }

        info!("held location audited: dispersion {:.4}", rsum.dispersion);
        event
            .audit
            .push(HypoAudit::snapshot(&event.hypo, AuditTag::Held, 0, 0));
        Ok(LocatorSummary {
            exit: ExitCode::SuccessfulLocation,
            status: IterStatus::Success,
            iterations: 0,
            rsum,
            ellipsoid: None,
        })
    }

    /// Terminal bookkeeping: final diagnostics, importances, the companion
    /// ellipsoid and the closing audit snapshot.
    fn finish(
        &mut self,
        event: &mut Event,
        ndof: usize,
        mut status: IterStatus,
        iterations: usize,
    ) -> Result<LocatorSummary, LocError> {
        let (raws, _, map) = event.assemble();
        let mut full = raws.clone();
        if let Some(sentinel) = event.bayes_sentinel() {
            full.push(sentinel);
        }
        let mut scratch = full.clone();
        let rsum = estimator::evaluate(&mut scratch, false);
        event.hypo.dispersion = rsum.dispersion;
        event.hypo.spread_s = rsum.spread;

        if let Some(imps) = stepper::importances(&full, ndof) {
            for (k, imp) in imps.iter().take(map.len()).enumerate() {
                event.picks[map[k]].importance = *imp;
            }
        }

        let ellipsoid = match stepper::error_ellipsoid(&full, ndof) {
            Ok(axes) => Some(axes),
            Err(err) => {
                warn!("error ellipsoid failed: {err}");
                if matches!(
                    status,
                    IterStatus::Success | IterStatus::NearlyConverged | IterStatus::DidNotMove
                ) {
                    status = IterStatus::EllipsoidFailed;
                }
                None
            }
        };

        event.audit.push(HypoAudit::snapshot(
            &event.hypo,
            AuditTag::Final,
            self.cfg.stages.len() - 1,
            iterations,
        ));

        let exit = LocStatus::Internal(status).to_exit();
        info!(
            "location finished {exit} after {iterations} iterations: {}",
            event.hypo
        );
        Ok(LocatorSummary {
            exit,
            status,
            iterations,
            rsum,
            ellipsoid,
        })
    }
}
