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

//! A module to track the restart budget of one application.

// Import standard library features
use std::time::Duration;

/// The reasons a supervised process stopped running
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitCause {
    /// The process exited on its own
    Exited,

    /// The supervisor ended the process for exceeding its memory ceiling
    MemoryLimit,

    /// The supervisor ended the process because a watched file changed
    FileChange,
}

/// A structure to count qualifying crashes against the restart budget.
///
/// An exit before the minimum uptime is a qualifying crash and increments
/// the counter. An exit after the minimum uptime resets it. Memory restarts
/// always count, after the reset if the process survived. File changes leave
/// the counter alone. The budget is exhausted once the counter exceeds the
/// maximum number of restarts.
///
#[derive(Clone, Debug)]
pub struct RestartBudget {
    max_restarts: u32,    // the number of qualifying restarts allowed
    min_uptime: Duration, // the survival time which resets the counter
    count: u32,           // the current number of qualifying restarts
}

// Implement the budget arithmetic
impl RestartBudget {
    /// A function to create a new, unused budget
    ///
    pub fn new(max_restarts: u32, min_uptime: Duration) -> RestartBudget {
        RestartBudget {
            max_restarts,
            min_uptime,
            count: 0,
        }
    }

    /// A method to return the current counter
    ///
    pub fn count(&self) -> u32 {
        self.count
    }

    /// A method to indicate if no further restart is allowed
    ///
    pub fn is_exhausted(&self) -> bool {
        self.count > self.max_restarts
    }

    /// A method to record the end of a run and return true if another
    /// launch is allowed
    ///
    pub fn record(&mut self, cause: ExitCause, uptime: Duration) -> bool {
        let survived = uptime >= self.min_uptime;
        match cause {
            ExitCause::Exited => {
                if survived {
                    self.count = 0;
                } else {
                    self.count = self.count.saturating_add(1);
                }
            }
            ExitCause::MemoryLimit => {
                if survived {
                    self.count = 0;
                }
                self.count = self.count.saturating_add(1);
            }
            ExitCause::FileChange => (),
        }
        !self.is_exhausted()
    }
}
