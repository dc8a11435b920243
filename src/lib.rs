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

//! Quakeloc relocates earthquake hypocenters from seismic phase picks.
//!
//! Given an initial hypocenter guess and a set of arrival-time picks, the
//! engine iteratively refines origin time, latitude, longitude and depth by
//! minimizing a rank-sum (R-estimator) dispersion of travel-time residuals.
//! Correlated observations are first transformed into nearly-independent
//! virtual observations through a symmetric eigendecomposition of the pick
//! covariance matrix, and ambiguous phase labels are re-identified after
//! every accepted step.
//!
//! The travel-time predictor and the Bayesian depth oracle are consumed
//! through the [`ttime::TravelTimeModel`] and [`bayes::DepthOracle`] traits
//! so that production earth models can be swapped in without touching the
//! solver.

#[macro_use]
extern crate log;

/// Re-exports the linear algebra types used throughout the engine.
pub mod linalg;

/// Engine errors and the location status taxonomy.
pub mod errors;

/// Engine configuration, convergence schedules and tuning constants.
pub mod config;

/// Spherical geometry, geocentric conversions and Marsden squares.
pub mod geodesy;

/// Hypocenter state, audit trail, stations, picks and pick groups.
pub mod cosmic;

/// Weighted residuals and the rank-sum estimator.
pub mod estimator;

/// Pick covariance modeling and the eigendecomposition decorrelator.
pub mod decorr;

/// The linearized stepper, phase re-identification and the iteration driver.
pub mod solver;

/// Travel-time prediction interface and the built-in uniform model.
pub mod ttime;

/// Bayesian depth priors from zone statistics.
pub mod bayes;

/// JSON wire types and auxiliary binary readers.
pub mod io;

/// Mean kilometers per degree of arc at the Earth's surface.
pub const DEG2KM: f64 = 111.194;

/// Shallowest permissible hypocenter depth, in km.
pub const DEPTH_MIN_KM: f64 = 0.0;

/// Deepest permissible hypocenter depth, in km.
pub const DEPTH_MAX_KM: f64 = 750.0;

pub mod prelude {
    pub use crate::bayes::{DepthOracle, DepthPrior, DepthSource};
    pub use crate::config::EngineConfig;
    pub use crate::cosmic::pick::{AuthorType, Pick, PickGroup, Station};
    pub use crate::cosmic::{AuditTag, HypoAudit, Hypocenter};
    pub use crate::decorr::{CovarianceModel, Decorrelator, DistanceDecayKernel};
    pub use crate::errors::{ExitCode, IterStatus, LocError, LocStatus};
    pub use crate::io::{LocationRequest, LocationResponse, PickInput, PickOutput};
    pub use crate::solver::driver::{Event, LocatorEngine, LocatorSummary};
    pub use crate::ttime::{PhasePrediction, TravelTimeModel, UniformModel};
    pub use crate::{DEG2KM, DEPTH_MAX_KM, DEPTH_MIN_KM};
}
