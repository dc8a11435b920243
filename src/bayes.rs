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
use crate::geodesy;
use crate::io::zone::ZoneTable;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;

/// Where a depth prior came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepthSource {
    Shallow,
    SlabModel,
    SlabInterface,
    ZoneInterface,
    ZoneStats,
    /// Supplied directly on the location request.
    Requested,
}

/// A Bayesian prior on hypocenter depth, acting as a pseudo-observation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DepthPrior {
    pub mean_km: f64,
    /// 90th-percentile half-width, in km.
    pub spread_km: f64,
    pub source: DepthSource,
}

/// Supplies a depth prior for an epicenter, or `None` where no statistics
/// exist.
pub trait DepthOracle {
    fn depth_prior(&self, lat_deg: f64, lon_deg: f64) -> Option<DepthPrior>;
}

/// Depth oracle backed by the Marsden-square zone statistics files.
#[derive(Clone, Debug)]
pub struct ZoneStatsOracle {
    table: ZoneTable,
    /// Floor on the reported spread so a sharply peaked cell cannot lock the
    /// depth entirely, in km.
    pub min_spread_km: f64,
}

impl ZoneStatsOracle {
    pub fn new(table: ZoneTable) -> Self {
        Self {
            table,
            min_spread_km: 10.0,
        }
    }

    /// Loads the oracle from the zone-keys and zone-stats binary files.
    pub fn from_files<P: AsRef<Path>>(keys: P, stats: P) -> Result<Self, LocError> {
        Ok(Self::new(ZoneTable::from_files(keys, stats)?))
    }
}

impl DepthOracle for ZoneStatsOracle {
    fn depth_prior(&self, lat_deg: f64, lon_deg: f64) -> Option<DepthPrior> {
        let cell = geodesy::marsden_index(lat_deg, lon_deg);
        let stats = self.table.lookup(cell)?;
        let spread = (0.5 * (stats.max_km - stats.min_km)).max(self.min_spread_km);
        Some(DepthPrior {
            mean_km: stats.mean_km,
            spread_km: spread,
            source: DepthSource::ZoneStats,
        })
    }
}
