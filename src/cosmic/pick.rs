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

use crate::geodesy::{self, SphericalTrig};
use hifitime::Epoch;
use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// Who produced a pick. The author type sets the base affinity that biases
/// phase re-identification toward keeping an analyst's original label.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorType {
    ContributedAutomatic,
    LocalAutomatic,
    ContributedHuman,
    LocalHuman,
}

impl AuthorType {
    /// Base affinity for this author type. Human picks resist relabeling.
    pub fn base_affinity(self) -> f64 {
        match self {
            Self::ContributedAutomatic | Self::LocalAutomatic => 1.0,
            Self::ContributedHuman => 1.5,
            Self::LocalHuman => 3.0,
        }
    }
}

impl Default for AuthorType {
    fn default() -> Self {
        Self::LocalAutomatic
    }
}

/// A seismic station. Immutable after construction; the geocentric trig is
/// precomputed once here and reused on every hypocenter update.
#[derive(Clone, Debug, PartialEq)]
pub struct Station {
    pub code: String,
    pub network: String,
    pub location: String,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub elevation_m: f64,
    pub colat_deg: f64,
    pub trig: SphericalTrig,
}

impl Station {
    pub fn new(
        code: &str,
        network: &str,
        location: &str,
        latitude_deg: f64,
        longitude_deg: f64,
        elevation_m: f64,
    ) -> Self {
        let colat_deg = geodesy::geocentric_colatitude_deg(latitude_deg);
        Self {
            code: code.to_string(),
            network: network.to_string(),
            location: location.to_string(),
            latitude_deg,
            longitude_deg,
            elevation_m,
            colat_deg,
            trig: SphericalTrig::new(colat_deg, longitude_deg),
        }
    }

    /// Stations are keyed by code, network and location code.
    pub fn key(&self) -> String {
        format!("{}.{}.{}", self.network, self.code, self.location)
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} ({:.4}, {:.4}, {:.0} m)",
            self.key(),
            self.latitude_deg,
            self.longitude_deg,
            self.elevation_m
        )
    }
}

/// One phase arrival. Created at input parse, then mutated by phase
/// re-identification (phase, weight, derivatives), by the travel-time update
/// (residual) and by triage (the triage flag, permanently for the run).
#[derive(Clone, Debug)]
pub struct Pick {
    /// External identifier, echoed in the per-pick output.
    pub id: String,
    /// Index of the station in the event arena.
    pub station: usize,
    pub arrival: Epoch,
    /// Current phase label; starts as the associated phase.
    pub phase: String,
    /// Phase label as originally reported.
    pub phase_original: String,
    pub author_type: AuthorType,
    /// Caller's use flag; an unused pick never enters the residual set.
    pub is_used: bool,
    /// Analyst affinity multiplier on top of the author-type base.
    pub affinity: f64,
    /// Pick quality standard error, in seconds.
    pub quality: f64,
    /// Set by covariance triage; excluded for the remainder of the run.
    pub is_triaged: bool,
    /// Predicted travel time for the current phase, in seconds.
    pub travel_time_s: f64,
    /// Observed minus predicted arrival, in seconds.
    pub residual_s: f64,
    pub weight: f64,
    /// Travel-time partials in s/km along (south, east, down).
    pub derivs: [f64; 3],
    /// Spread partials matching `derivs`.
    pub spread_derivs: [f64; 3],
    /// Data importance from the final normal matrix.
    pub importance: f64,
}

impl Pick {
    pub fn new(
        id: &str,
        station: usize,
        arrival: Epoch,
        phase: &str,
        author_type: AuthorType,
        affinity: f64,
        quality: f64,
        is_used: bool,
    ) -> Self {
        Self {
            id: id.to_string(),
            station,
            arrival,
            phase: phase.to_string(),
            phase_original: phase.to_string(),
            author_type,
            is_used,
            affinity,
            quality,
            is_triaged: false,
            travel_time_s: 0.0,
            residual_s: 0.0,
            weight: 0.0,
            derivs: [0.0; 3],
            spread_derivs: [0.0; 3],
            importance: 0.0,
        }
    }

    /// Affinity used when scoring the originally reported phase label.
    pub fn phase_affinity(&self) -> f64 {
        self.affinity.max(1.0) * self.author_type.base_affinity()
    }

    /// Whether this pick participates in the residual set.
    pub fn contributes(&self) -> bool {
        self.is_used && !self.is_triaged
    }
}

/// All picks of one station in arrival-time order, sharing the station's
/// source-receiver distance and azimuth. Both are recomputed on every
/// hypocenter update.
#[derive(Clone, Debug)]
pub struct PickGroup {
    pub station: usize,
    /// Indices into the event pick arena, sorted by arrival time.
    pub picks: Vec<usize>,
    pub delta_deg: f64,
    pub azimuth_deg: f64,
}

impl PickGroup {
    pub fn new(station: usize) -> Self {
        Self {
            station,
            picks: Vec::new(),
            delta_deg: 0.0,
            azimuth_deg: 0.0,
        }
    }

    /// Refreshes the shared geometry from the source trig.
    pub fn update_geometry(&mut self, source: &SphericalTrig, station: &Station) {
        let (delta_deg, azimuth_deg) = geodesy::delta_azimuth(source, &station.trig);
        self.delta_deg = delta_deg;
        self.azimuth_deg = azimuth_deg;
    }
}
