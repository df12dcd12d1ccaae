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

//! This module implements the lifecycle state of a supervised application.

// Import standard library features
use std::fmt;

/// The lifecycle of one supervised application.
///
/// Stopped → Launching → Running → Exited → (Restarting | Failed | Stopped)
/// and Restarting → Launching. Failed is terminal until the descriptor file
/// is reloaded.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcessState {
    Stopped,
    Launching,
    Running,
    Exited,
    Restarting,
    Failed,
}

// Implement key features of the process state
impl ProcessState {
    /// A method to indicate if no further launch will happen
    ///
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Failed)
    }
}

// Display the process state in lower case
impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Launching => "launching",
            ProcessState::Running => "running",
            ProcessState::Exited => "exited",
            ProcessState::Restarting => "restarting",
            ProcessState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// A snapshot of a supervised application
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceStatus {
    pub name: String,              // the application name
    pub state: ProcessState,       // the current lifecycle state
    pub pid: Option<u32>,          // the process id while the process is alive
    pub restarts: u32,             // relaunches performed since the instance started
    pub unstable_restarts: u32,    // the restart budget counter
    pub error: Option<String>,     // the error which ended supervision, if any
}

// Implement the constructor for the instance status
impl InstanceStatus {
    /// A function to create the status of an application that has not launched
    ///
    pub fn new(name: &str) -> InstanceStatus {
        InstanceStatus {
            name: name.to_string(),
            state: ProcessState::Stopped,
            pid: None,
            restarts: 0,
            unstable_restarts: 0,
            error: None,
        }
    }
}

// Display a one line summary of the status
impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.state)?;
        if let Some(pid) = self.pid {
            write!(f, " (pid {})", pid)?;
        }
        write!(f, ", {} restarts", self.restarts)?;
        if let Some(error) = &self.error {
            write!(f, ", {}", error)?;
        }
        Ok(())
    }
}
