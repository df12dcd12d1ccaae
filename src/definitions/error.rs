// Copyright (c) 2026 Decode Detroit
// Author: Patton Doyle
// Licence: GNU GPLv3
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! This module defines the error types reported by the supervisor.

// Import standard library features
use std::path::PathBuf;

// Import thiserror features
use thiserror::Error;

/// The errors which can stop an application from being supervised.
///
/// None of these errors are recovered automatically. A configuration error
/// prevents the descriptor file from loading, a launch error or a crash loop
/// leaves the instance in the failed state until the operator reloads.
///
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SupervisorError {
    /// The descriptor file is missing, malformed, or fails validation
    #[error("Invalid configuration in {}: {reason}", .path.display())]
    ConfigError { path: PathBuf, reason: String },

    /// The working directory, entrypoint, or interpreter could not be used
    #[error("Unable to launch {app}: {reason}")]
    LaunchError { app: String, reason: String },

    /// The process kept exiting before its minimum uptime
    #[error("{app} exited {restarts} times in a row before reaching {min_uptime} of uptime")]
    CrashLoopError {
        app: String,
        restarts: u32,
        min_uptime: String,
    },
}

// Implement helper constructors for the supervisor error
impl SupervisorError {
    /// A function to create a configuration error for the provided file
    ///
    pub fn config<P, S>(path: P, reason: S) -> SupervisorError
    where
        P: Into<PathBuf>,
        S: Into<String>,
    {
        SupervisorError::ConfigError {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// A function to create a launch error for the named application
    ///
    pub fn launch<S: Into<String>>(app: &str, reason: S) -> SupervisorError {
        SupervisorError::LaunchError {
            app: app.to_string(),
            reason: reason.into(),
        }
    }
}
