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

//! A module to enforce the resident memory ceiling of an application.

// Import crate definitions
use crate::definitions::*;

// Import sysinfo features
use sysinfo::{Pid, PidExt, ProcessExt, ProcessRefreshKind, System, SystemExt};

/// A source of resident memory readings
///
pub trait MemorySampler: Send {
    /// A method to return the resident memory of a process in bytes, or None
    /// if the process could not be found
    ///
    fn resident_bytes(&mut self, pid: u32) -> Option<u64>;
}

/// The memory sampler backed by the operating system process table
///
pub struct SystemSampler {
    system: System,
}

// Implement the constructor for the system sampler
impl SystemSampler {
    /// A function to create a new system sampler
    ///
    pub fn new() -> SystemSampler {
        SystemSampler {
            system: System::new(),
        }
    }
}

// Read the process memory from sysinfo
impl MemorySampler for SystemSampler {
    fn resident_bytes(&mut self, pid: u32) -> Option<u64> {
        let pid = Pid::from_u32(pid);
        if !self
            .system
            .refresh_process_specifics(pid, ProcessRefreshKind::new())
        {
            return None;
        }
        self.system.process(pid).map(|process| process.memory())
    }
}

/// A structure to compare memory samples against the ceiling
///
pub struct MemoryGuard {
    limit: MemorySize,                // the resident memory ceiling
    sampler: Box<dyn MemorySampler>,  // the source of readings
}

// Implement the memory check
impl MemoryGuard {
    /// A function to create a memory guard reading from the process table
    ///
    pub fn new(limit: MemorySize) -> MemoryGuard {
        MemoryGuard::with_sampler(limit, Box::new(SystemSampler::new()))
    }

    /// A function to create a memory guard with the provided sampler
    ///
    pub fn with_sampler(limit: MemorySize, sampler: Box<dyn MemorySampler>) -> MemoryGuard {
        MemoryGuard { limit, sampler }
    }

    /// A method to return the ceiling
    ///
    pub fn limit(&self) -> MemorySize {
        self.limit
    }

    /// A method to sample the process and return the reading if it is above
    /// the ceiling
    ///
    pub fn check(&mut self, pid: u32) -> Option<MemorySize> {
        let resident = self.sampler.resident_bytes(pid).map(MemorySize)?;
        if resident > self.limit {
            Some(resident)
        } else {
            None
        }
    }
}

// Tests of the memory guard module
#[cfg(test)]
pub mod tests {
    use super::*;

    /// A sampler which always returns the same reading
    ///
    pub struct FixedSampler {
        pub bytes: u64,
    }

    impl FixedSampler {
        pub fn megabytes(megabytes: u64) -> FixedSampler {
            FixedSampler {
                bytes: megabytes * 1_000_000,
            }
        }
    }

    impl MemorySampler for FixedSampler {
        fn resident_bytes(&mut self, _pid: u32) -> Option<u64> {
            Some(self.bytes)
        }
    }

    // A 160MB reading breaches a 150M ceiling
    #[test]
    fn breach() {
        let limit = MemorySize::parse("150M").unwrap();
        let mut guard = MemoryGuard::with_sampler(limit, Box::new(FixedSampler::megabytes(160)));
        assert_eq!(guard.check(1), Some(MemorySize(160_000_000)));

        let mut guard = MemoryGuard::with_sampler(limit, Box::new(FixedSampler::megabytes(100)));
        assert_eq!(guard.check(1), None);
    }

    // The system sampler reads this test process
    #[test]
    fn sample_current_process() {
        let mut sampler = SystemSampler::new();
        let resident = sampler.resident_bytes(std::process::id()).unwrap();
        assert!(resident > 0);
        let mut guard = MemoryGuard::new(MemorySize(u64::MAX));
        assert_eq!(guard.check(std::process::id()), None);
    }
}
