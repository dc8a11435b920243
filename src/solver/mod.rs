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

/// The outer iteration state machine.
pub mod driver;

/// Phase re-identification against the travel-time predictor.
pub mod phase_id;

/// Normal equations, damped line search, importances and the companion
/// error ellipsoid.
pub mod stepper;

pub use driver::{Event, LocatorEngine, LocatorSummary};
pub use phase_id::{identify_phases, PhaseIdOutcome};
pub use stepper::{compute_step, error_ellipsoid, importances, EllipsoidAxis, StepOutcome};
