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
use serde_derive::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use typed_builder::TypedBuilder;

/// Convergence thresholds for one stage of the iteration driver.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageLimits {
    /// Largest accepted step length that still counts as converged, in km.
    pub step_km: f64,
    /// Largest dispersion change that still counts as converged, in seconds.
    pub dispersion_s: f64,
    /// Iteration cap for the stage.
    pub iter_cap: usize,
}

/// Engine tuning knobs. `EngineConfig::default()` reproduces the operational
/// constants; individual deployments override them through the builder or a
/// YAML file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct EngineConfig {
    /// Debug chatter level, 0 silences the per-iteration diagnostics.
    #[builder(default = 0)]
    #[serde(default)]
    pub debug: u8,
    /// Trial step halvings allowed per line search.
    #[builder(default = 5)]
    pub damp_limit: usize,
    /// Phase re-identification restarts allowed per stage.
    #[builder(default = 3)]
    pub reid_limit: usize,
    /// Fraction of the eigenvalue sum that must be retained.
    #[builder(default = 0.95)]
    pub eigenvalue_sum_limit: f64,
    /// Eigenvalues below this fraction of the largest may be discarded.
    #[builder(default = 0.01)]
    pub eigenvalue_top_threshold: f64,
    /// Covariance matrix size cap; rows beyond it are triaged away.
    #[builder(default = 450)]
    pub max_picks_to_decorrelate: usize,
    /// Per-stage convergence schedule, loose to tight.
    #[builder(default = StageLimits::schedule())]
    #[serde(default = "StageLimits::schedule")]
    pub stages: [StageLimits; 3],
}

impl StageLimits {
    /// The default three-stage schedule: initial, refine, final.
    pub fn schedule() -> [StageLimits; 3] {
        [
            StageLimits {
                step_km: 1.0,
                dispersion_s: 0.5,
                iter_cap: 10,
            },
            StageLimits {
                step_km: 0.5,
                dispersion_s: 0.25,
                iter_cap: 20,
            },
            StageLimits {
                step_km: 0.2,
                dispersion_s: 0.1,
                iter_cap: 20,
            },
        ]
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl EngineConfig {
    /// Loads a configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, LocError> {
        let handle = File::open(path.as_ref()).map_err(|e| {
            LocError::AuxData(format!(
                "cannot open configuration {}: {e}",
                path.as_ref().display()
            ))
        })?;
        let cfg = serde_yaml::from_reader(handle)?;
        Ok(cfg)
    }
}
