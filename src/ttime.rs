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

use crate::errors::LocError;
use crate::DEG2KM;

/// One candidate phase returned by a travel-time predictor.
#[derive(Clone, Debug, PartialEq)]
pub struct PhasePrediction {
    pub phase: String,
    /// Predicted travel time, in seconds.
    pub time_s: f64,
    /// Statistical spread of the phase, in seconds.
    pub spread_s: f64,
    /// dT/d-distance, in s/deg.
    pub d_tangential: f64,
    /// dT/d-depth, in s/km.
    pub d_depth: f64,
    /// Phase-level bias applied during re-identification.
    pub affinity_bias: f64,
}

/// Travel-time prediction interface. A predictor is a pure function of its
/// inputs once a session is bound to an earth model; it is owned by one
/// engine and never shared across concurrent requests.
pub trait TravelTimeModel {
    /// Binds the predictor to an earth model.
    fn set_session(&mut self, earth_model: &str) -> Result<(), LocError>;

    /// Candidate phases for a source depth, a source-receiver distance and a
    /// receiver elevation.
    fn predict(
        &self,
        depth_km: f64,
        delta_deg: f64,
        elevation_m: f64,
    ) -> Result<Vec<PhasePrediction>, LocError>;
}

/// Straight-ray constant-velocity model with an analytic core-reflected
/// branch. Stands in for the production tau-p tables in the test suite and
/// as the CLI fallback; the geometry exercises every code path the real
/// predictor would.
#[derive(Clone, Debug)]
pub struct UniformModel {
    pub velocity_km_s: f64,
    /// Depth of the reflecting interface for the core branch, in km.
    pub reflector_depth_km: f64,
    session: Option<String>,
}

impl UniformModel {
    pub fn new(velocity_km_s: f64) -> Self {
        Self {
            velocity_km_s,
            reflector_depth_km: 2889.0,
            session: None,
        }
    }
}

impl Default for UniformModel {
    fn default() -> Self {
        Self::new(8.0)
    }
}

impl TravelTimeModel for UniformModel {
    fn set_session(&mut self, earth_model: &str) -> Result<(), LocError> {
        if earth_model.is_empty() {
            return Err(LocError::TravelTime("empty earth model name".to_string()));
        }
        self.session = Some(earth_model.to_string());
        Ok(())
    }

    fn predict(
        &self,
        depth_km: f64,
        delta_deg: f64,
        elevation_m: f64,
    ) -> Result<Vec<PhasePrediction>, LocError> {
        let v = self.velocity_km_s;
        let x = delta_deg * DEG2KM;
        let elev_s = elevation_m / 1000.0 / v;

        // Direct branch.
        let ray = (x.powi(2) + depth_km.powi(2)).sqrt();
        let direct = if ray < 1e-9 {
            PhasePrediction {
                phase: "P".to_string(),
                time_s: elev_s,
                spread_s: 0.65,
                d_tangential: 0.0,
                d_depth: 0.0,
                affinity_bias: 1.0,
            }
        } else {
            PhasePrediction {
                phase: "P".to_string(),
                time_s: ray / v + elev_s,
                spread_s: 0.65,
                d_tangential: DEG2KM * x / (v * ray),
                d_depth: depth_km / (v * ray),
                affinity_bias: 1.0,
            }
        };

        // Core-reflected branch: down to the reflector and back up.
        let h = self.reflector_depth_km;
        let half = 0.5 * x;
        let leg_down = (half.powi(2) + (h - depth_km).powi(2)).sqrt();
        let leg_up = (half.powi(2) + h.powi(2)).sqrt();
        let reflected = PhasePrediction {
            phase: "PcP".to_string(),
            time_s: (leg_down + leg_up) / v + elev_s,
            spread_s: 1.2,
            d_tangential: DEG2KM * x * (1.0 / leg_down + 1.0 / leg_up) / (4.0 * v),
            d_depth: -(h - depth_km) / (v * leg_down),
            affinity_bias: 0.75,
        };

        Ok(vec![direct, reflected])
    }
}
