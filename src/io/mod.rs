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

use crate::bayes::{DepthPrior, DepthSource};
use crate::cosmic::pick::{AuthorType, Pick, Station};
use crate::cosmic::{AuditTag, Hypocenter};
use crate::errors::{ExitCode, LocError};
use crate::solver::driver::{Event, LocatorSummary};
use hifitime::Epoch;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod zone;

/// Station and channel naming of one pick on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteInput {
    pub station: String,
    #[serde(default)]
    pub channel: String,
    pub network: String,
    #[serde(default)]
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Elevation in meters.
    pub elevation: f64,
}

/// Provenance of one pick on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInput {
    #[serde(default)]
    pub agency: String,
    #[serde(default)]
    pub author: String,
    pub author_type: AuthorType,
}

/// One pick of a location request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickInput {
    pub id: String,
    pub site: SiteInput,
    pub source: SourceInput,
    /// Arrival time in UTC milliseconds.
    pub time: f64,
    pub affinity: f64,
    pub quality: f64,
    #[serde(rename = "use")]
    pub use_flag: bool,
    #[serde(default)]
    pub picked_phase: String,
    pub associated_phase: String,
}

/// A location request on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRequest {
    pub id: String,
    #[serde(rename = "type", default)]
    pub request_type: String,
    pub earth_model: String,
    pub source_lat: f64,
    pub source_lon: f64,
    /// Origin time in UTC milliseconds.
    pub source_origin_time: f64,
    /// Depth in km.
    pub source_depth: f64,
    #[serde(default)]
    pub is_location_new: bool,
    #[serde(default)]
    pub is_location_held: bool,
    #[serde(default)]
    pub is_depth_held: bool,
    #[serde(default)]
    pub is_bayesian_depth: bool,
    #[serde(default)]
    pub bayesian_depth: f64,
    #[serde(default)]
    pub bayesian_spread: f64,
    #[serde(rename = "useSVD", default)]
    pub use_svd: bool,
    pub input_data: Vec<PickInput>,
}

impl LocationRequest {
    pub fn from_json(json: &str) -> Result<Self, LocError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Builds the engine event from the request: deduplicated station arena,
    /// pick arena, pick groups, hypocenter, hold flags and the Bayesian
    /// prior.
    pub fn assemble(&self) -> Result<Event, LocError> {
        if self.source_lat.abs() > 90.0 || self.source_lon.abs() > 360.0 {
            return Err(LocError::BadEventInput {
                details: format!(
                    "hypocenter ({}, {}) is out of range",
                    self.source_lat, self.source_lon
                ),
            });
        }

        let mut stations: Vec<Station> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();
        let mut picks = Vec::with_capacity(self.input_data.len());

        for pin in &self.input_data {
            if !pin.site.latitude.is_finite()
                || !pin.site.longitude.is_finite()
                || pin.site.latitude.abs() > 90.0
            {
                return Err(LocError::BadPick {
                    details: format!("pick {} has no usable station coordinates", pin.id),
                });
            }
            let station = Station::new(
                &pin.site.station,
                &pin.site.network,
                &pin.site.location,
                pin.site.latitude,
                pin.site.longitude,
                pin.site.elevation,
            );
            let si = *by_key.entry(station.key()).or_insert_with(|| {
                stations.push(station);
                stations.len() - 1
            });

            // A fresh location trusts the picker's label; a relocation keeps
            // the association from the previous pass.
            let phase = if self.is_location_new && !pin.picked_phase.is_empty() {
                &pin.picked_phase
            } else if !pin.associated_phase.is_empty() {
                &pin.associated_phase
            } else {
                &pin.picked_phase
            };
            picks.push(Pick::new(
                &pin.id,
                si,
                Epoch::from_unix_seconds(pin.time / 1000.0),
                phase,
                pin.source.author_type,
                pin.affinity,
                pin.quality,
                pin.use_flag,
            ));
        }

        let mut hypo = Hypocenter::new(
            Epoch::from_unix_seconds(self.source_origin_time / 1000.0),
            self.source_lat,
            self.source_lon,
            self.source_depth,
        );
        if self.is_bayesian_depth {
            if self.bayesian_spread <= 0.0 {
                return Err(LocError::BadEventInput {
                    details: "Bayesian depth requested with a non-positive spread".to_string(),
                });
            }
            hypo.set_bayes(&DepthPrior {
                mean_km: self.bayesian_depth,
                spread_km: self.bayesian_spread,
                source: DepthSource::Requested,
            });
        }

        let mut event = Event::new(hypo, stations, picks)?;
        event.is_location_held = self.is_location_held;
        event.is_depth_held = self.is_depth_held;
        event.decorrelate = self.use_svd;
        Ok(event)
    }
}

/// One audit snapshot on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditOutput {
    pub tag: AuditTag,
    pub stage: usize,
    pub iteration: usize,
    /// Origin time in UTC milliseconds.
    pub origin_time: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub depth: f64,
    pub step_len_km: f64,
    pub delta_time_s: f64,
    pub dispersion: f64,
    pub spread: f64,
}

/// Per-pick diagnostics on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickOutput {
    pub id: String,
    pub phase: String,
    pub residual: f64,
    pub delta: f64,
    pub azimuth: f64,
    pub weight: f64,
    pub importance: f64,
    #[serde(rename = "use")]
    pub use_flag: bool,
    pub triaged: bool,
    pub error: Option<String>,
}

/// The relocated hypocenter on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HypocenterOutput {
    /// Origin time in UTC milliseconds.
    pub origin_time: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub depth: f64,
    pub dispersion: f64,
    pub spread: f64,
}

/// A location response on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationResponse {
    pub id: String,
    pub status: ExitCode,
    pub status_value: i32,
    pub hypocenter: HypocenterOutput,
    pub audit: Vec<AuditOutput>,
    pub picks: Vec<PickOutput>,
}

impl LocationResponse {
    /// Collects the relocated hypocenter, the audit trail and the per-pick
    /// diagnostics. Produced on every exit, successful or not.
    pub fn from_event(request_id: &str, event: &Event, summary: &LocatorSummary) -> Self {
        let audit = event
            .audit
            .iter()
            .map(|a| AuditOutput {
                tag: a.tag,
                stage: a.stage,
                iteration: a.iteration,
                origin_time: a.origin_time.to_unix_seconds() * 1000.0,
                latitude: a.latitude_deg,
                longitude: a.longitude_deg,
                depth: a.depth_km,
                step_len_km: a.step_len_km,
                delta_time_s: a.delta_time_s,
                dispersion: a.dispersion,
                spread: a.spread_s,
            })
            .collect();

        let mut group_of = vec![0usize; event.picks.len()];
        for (gi, group) in event.groups.iter().enumerate() {
            for &pi in &group.picks {
                group_of[pi] = gi;
            }
        }
        let picks = event
            .picks
            .iter()
            .enumerate()
            .map(|(pi, pick)| {
                let group = &event.groups[group_of[pi]];
                PickOutput {
                    id: pick.id.clone(),
                    phase: pick.phase.clone(),
                    residual: pick.residual_s,
                    delta: group.delta_deg,
                    azimuth: group.azimuth_deg,
                    weight: pick.weight,
                    importance: pick.importance,
                    use_flag: pick.contributes(),
                    triaged: pick.is_triaged,
                    error: None,
                }
            })
            .collect();

        Self {
            id: request_id.to_string(),
            status: summary.exit,
            status_value: summary.exit.value(),
            hypocenter: HypocenterOutput {
                origin_time: event.hypo.origin_time.to_unix_seconds() * 1000.0,
                latitude: event.hypo.latitude_deg,
                longitude: event.hypo.longitude_deg,
                depth: event.hypo.depth_km,
                dispersion: event.hypo.dispersion,
                spread: event.hypo.spread_s,
            },
            audit,
            picks,
        }
    }

    pub fn to_json(&self) -> Result<String, LocError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
