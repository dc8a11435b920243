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

use crate::cosmic::pick::{Pick, PickGroup, Station};
use crate::cosmic::Hypocenter;
use crate::errors::LocError;
use crate::ttime::TravelTimeModel;
use crate::DEG2KM;

/// What one interlock pass did to the pick set.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PhaseIdOutcome {
    /// At least one used pick changed its phase label, invalidating the
    /// current iteration.
    pub changed: bool,
    pub relabeled: usize,
    pub used: usize,
}

/// Re-identifies every used pick against the travel-time predictor and
/// refreshes travel times, residuals, weights and spatial derivatives.
///
/// Candidates are scored by their standardized misfit, biased by the
/// phase-level affinity and by the pick's analyst affinity when the
/// candidate matches the originally reported label, so a human "P" takes a
/// large misfit before it flips to a core phase.
pub fn identify_phases<T: TravelTimeModel>(
    picks: &mut [Pick],
    groups: &[PickGroup],
    stations: &[Station],
    hypo: &Hypocenter,
    model: &T,
) -> Result<PhaseIdOutcome, LocError> {
    let mut outcome = PhaseIdOutcome::default();

    for group in groups {
        let station = &stations[group.station];
        let predictions = model.predict(hypo.depth_km, group.delta_deg, station.elevation_m)?;
        if predictions.is_empty() {
            return Err(LocError::TravelTime(format!(
                "no candidate phases at delta {:.2} deg for {}",
                group.delta_deg,
                station.key()
            )));
        }

        for &pi in &group.picks {
            let pick = &mut picks[pi];
            if !pick.is_used {
                continue;
            }
            outcome.used += 1;

            let observed_tt = (pick.arrival - hypo.origin_time).to_seconds();

            let mut best = 0;
            let mut best_score = f64::INFINITY;
            for (c, pred) in predictions.iter().enumerate() {
                let mut score =
                    (observed_tt - pred.time_s).abs() / (pred.spread_s * pred.affinity_bias);
                if pred.phase == pick.phase_original {
                    score /= pick.phase_affinity();
                }
                if score < best_score {
                    best_score = score;
                    best = c;
                }
            }

            let chosen = &predictions[best];
            if chosen.phase != pick.phase {
                debug!(
                    "pick {} at {} relabeled {} -> {}",
                    pick.id,
                    station.key(),
                    pick.phase,
                    chosen.phase
                );
                pick.phase = chosen.phase.clone();
                outcome.changed = true;
                outcome.relabeled += 1;
            }

            pick.travel_time_s = chosen.time_s;
            pick.residual_s = observed_tt - chosen.time_s;
            let quality = if pick.quality > 0.0 { pick.quality } else { 1.0 };
            pick.weight = 1.0 / (chosen.spread_s * quality);

            // Resolve the tangential slowness along the source-to-receiver
            // azimuth into (south, east) km components.
            let az = group.azimuth_deg.to_radians();
            let tangential = chosen.d_tangential / DEG2KM;
            pick.derivs = [tangential * az.cos(), -tangential * az.sin(), chosen.d_depth];
        }
    }

    if outcome.changed {
        info!("phase re-identification relabeled {} picks", outcome.relabeled);
    }
    Ok(outcome)
}

#[cfg(test)]
mod ut_phase_id {
    use super::*;
    use crate::cosmic::pick::AuthorType;
    use crate::ttime::UniformModel;
    use hifitime::{Duration, Epoch};

    fn single_pick_event(arrival_offset_s: f64, affinity: f64) -> (Vec<Station>, Vec<Pick>, Vec<PickGroup>, Hypocenter) {
        let origin = Epoch::from_gregorian_utc_at_midnight(2026, 3, 1);
        let hypo = Hypocenter::new(origin, 0.0, 0.0, 10.0);
        let stations = vec![Station::new("STA", "XX", "00", 0.0, 30.0, 0.0)];
        let picks = vec![Pick::new(
            "p0",
            0,
            origin + Duration::from_seconds(arrival_offset_s),
            "P",
            AuthorType::LocalAutomatic,
            affinity,
            1.0,
            true,
        )];
        let mut group = PickGroup::new(0);
        group.picks.push(0);
        group.update_geometry(&hypo.trig, &stations[0]);
        (stations, picks, groups_of(group), hypo)
    }

    fn groups_of(group: PickGroup) -> Vec<PickGroup> {
        vec![group]
    }

    #[test]
    fn direct_arrival_keeps_its_label() {
        let model = UniformModel::default();
        let (stations, mut picks, groups, hypo) = single_pick_event(0.0, 1.0);
        // Arrival right at the predicted P time.
        let p_time = model.predict(10.0, groups[0].delta_deg, 0.0).unwrap()[0].time_s;
        picks[0].arrival = hypo.origin_time + Duration::from_seconds(p_time + 0.1);

        let outcome = identify_phases(&mut picks, &groups, &stations, &hypo, &model).unwrap();
        assert!(!outcome.changed);
        assert_eq!(picks[0].phase, "P");
        assert!((picks[0].residual_s - 0.1).abs() < 1e-9);
        assert!(picks[0].weight > 0.0);
        // The station lies due east, so the travel time decreases eastward
        // and is insensitive to north-south motion.
        assert!(picks[0].derivs[1] < 0.0);
        assert!(picks[0].derivs[0].abs() < 1e-9);
    }

    #[test]
    fn late_arrival_flips_to_the_reflected_branch() {
        let model = UniformModel::default();
        let (stations, mut picks, groups, hypo) = single_pick_event(0.0, 1.0);
        let pcp_time = model.predict(10.0, groups[0].delta_deg, 0.0).unwrap()[1].time_s;
        picks[0].arrival = hypo.origin_time + Duration::from_seconds(pcp_time - 0.2);

        let outcome = identify_phases(&mut picks, &groups, &stations, &hypo, &model).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.relabeled, 1);
        assert_eq!(picks[0].phase, "PcP");
        // Deepening shortens a core-reflected path.
        assert!(picks[0].derivs[2] < 0.0);
    }

    #[test]
    fn analyst_affinity_resists_relabeling() {
        let model = UniformModel::default();
        // A near-ambiguous arrival between P and PcP.
        let (stations, mut picks, groups, hypo) = single_pick_event(0.0, 1.0);
        let preds = model.predict(10.0, groups[0].delta_deg, 0.0).unwrap();
        let midpoint = 0.45 * preds[0].time_s + 0.55 * preds[1].time_s;
        picks[0].arrival = hypo.origin_time + Duration::from_seconds(midpoint);
        picks[0].author_type = AuthorType::LocalHuman;
        picks[0].affinity = 2.0;

        let outcome = identify_phases(&mut picks, &groups, &stations, &hypo, &model).unwrap();
        // The affinity-weighted score keeps the analyst's P.
        assert!(!outcome.changed);
        assert_eq!(picks[0].phase, "P");
    }

    #[test]
    fn unused_picks_are_ignored() {
        let model = UniformModel::default();
        let (stations, mut picks, groups, hypo) = single_pick_event(1000.0, 1.0);
        picks[0].is_used = false;
        let outcome = identify_phases(&mut picks, &groups, &stations, &hypo, &model).unwrap();
        assert_eq!(outcome.used, 0);
        assert!(!outcome.changed);
    }
}
