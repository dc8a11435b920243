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

use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Errors raised by the engine and its collaborators.
#[derive(Error, Debug)]
pub enum LocError {
    #[error("malformed pick: {details}")]
    BadPick { details: String },
    #[error("event input is invalid: {details}")]
    BadEventInput { details: String },
    #[error("not enough useable data: {used} picks for {ndof} degrees of freedom")]
    InsufficientData { used: usize, ndof: usize },
    #[error("singular normal matrix in the stepper")]
    SingularMatrix,
    #[error("travel-time predictor failure: {0}")]
    TravelTime(String),
    #[error("auxiliary data failure: {0}")]
    AuxData(String),
    #[error("location request was cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(#[from] serde_yaml::Error),
}

/// Iteration-internal statuses. These never cross the wire: the driver maps
/// them to an [`ExitCode`] at its boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IterStatus {
    /// The stage convergence test passed.
    Success,
    /// The iteration cap was hit with the step just outside the limit.
    NearlyConverged,
    /// The solution never left the starting hypocenter.
    DidNotMove,
    /// The normal matrix could not be decomposed.
    SingularMatrix,
    /// Below the minimum usable pick count for the selected freedom.
    InsufficientData,
    /// The damped line search could not reduce the dispersion.
    UnstableSolution,
    /// Phase re-identification invalidated the iteration.
    PhaseIdChanged,
    /// The line search settled on a damped step.
    DampStepLength,
    /// The stage ran out of iterations.
    FullIterations,
    /// The companion error ellipsoid could not be computed.
    EllipsoidFailed,
    /// The cooperative cancellation flag was raised.
    Cancelled,
}

/// External exit codes, reported on the wire and as the process exit status.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ExitCode {
    SuccessfulLocation,
    DidNotConverge,
    ErrorsNotComputed,
    DidNotMove,
    LocationFailed,
    NotEnoughUseableData,
    BadEventInput,
    BadReadTTData,
    BadReadAuxData,
}

impl ExitCode {
    /// Numeric value used as the process exit status.
    pub fn value(self) -> i32 {
        match self {
            Self::SuccessfulLocation => 0,
            Self::DidNotConverge => 1,
            Self::ErrorsNotComputed => 2,
            Self::DidNotMove => 3,
            Self::LocationFailed => 4,
            Self::NotEnoughUseableData => 5,
            Self::BadEventInput => 6,
            Self::BadReadTTData => 7,
            Self::BadReadAuxData => 8,
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::SuccessfulLocation => "SuccessfulLocation",
            Self::DidNotConverge => "DidNotConverge",
            Self::ErrorsNotComputed => "ErrorsNotComputed",
            Self::DidNotMove => "DidNotMove",
            Self::LocationFailed => "LocationFailed",
            Self::NotEnoughUseableData => "NotEnoughUseableData",
            Self::BadEventInput => "BadEventInput",
            Self::BadReadTTData => "BadReadTTData",
            Self::BadReadAuxData => "BadReadAuxData",
        };
        write!(f, "{name}")
    }
}

/// Location status: either an iteration-internal state or an external exit
/// code. Only the external variant may be shown to a caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LocStatus {
    Internal(IterStatus),
    External(ExitCode),
}

impl LocStatus {
    /// Collapses this status to the external taxonomy.
    pub fn to_exit(self) -> ExitCode {
        match self {
            Self::External(code) => code,
            Self::Internal(status) => match status {
                IterStatus::Success | IterStatus::NearlyConverged => ExitCode::SuccessfulLocation,
                IterStatus::DidNotMove => ExitCode::DidNotMove,
                IterStatus::SingularMatrix => ExitCode::LocationFailed,
                IterStatus::InsufficientData => ExitCode::NotEnoughUseableData,
                IterStatus::UnstableSolution | IterStatus::FullIterations => {
                    ExitCode::DidNotConverge
                }
                IterStatus::EllipsoidFailed => ExitCode::ErrorsNotComputed,
                IterStatus::Cancelled => ExitCode::LocationFailed,
                // Interlock events are consumed by the driver and must not
                // leak; treat a leak as a failed location.
                IterStatus::PhaseIdChanged | IterStatus::DampStepLength => {
                    ExitCode::LocationFailed
                }
            },
        }
    }
}

impl From<&LocError> for ExitCode {
    fn from(err: &LocError) -> Self {
        match err {
            LocError::BadPick { .. } | LocError::BadEventInput { .. } => ExitCode::BadEventInput,
            LocError::InsufficientData { .. } => ExitCode::NotEnoughUseableData,
            LocError::SingularMatrix => ExitCode::LocationFailed,
            LocError::TravelTime(_) => ExitCode::BadReadTTData,
            // Configuration files are auxiliary data; a failed load is not a
            // malformed event.
            LocError::AuxData(_) | LocError::Config(_) => ExitCode::BadReadAuxData,
            LocError::Cancelled => ExitCode::LocationFailed,
            LocError::Io(_) | LocError::Json(_) => ExitCode::BadEventInput,
        }
    }
}
