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

//! This module implements the resolved application launch descriptor.
//!
//! Descriptors are produced by the config module once the descriptor file
//! has been parsed and validated. All paths held here are absolute and all
//! durations, sizes and formats have been parsed, so the supervisor never
//! needs to revisit the file.

// Import crate definitions
use crate::definitions::*;

// Import standard library features
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

// The default limits, matching the usual process manager defaults
pub const DEFAULT_MAX_RESTARTS: u32 = 16;
pub const DEFAULT_MIN_UPTIME: Duration = Duration::from_secs(1);
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_millis(1600);

/// The program used to run an entrypoint
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Interpreter {
    /// Execute the entrypoint itself
    Direct,

    /// Run this program with the entrypoint as its first argument. Absolute
    /// paths are used as is, bare names are looked up on PATH.
    Program(PathBuf),
}

// Implement helper features for the interpreter
impl Interpreter {
    /// A function to choose the interpreter from the entrypoint extension
    ///
    pub fn for_entrypoint(entrypoint: &Path) -> Interpreter {
        match entrypoint.extension().and_then(|extension| extension.to_str()) {
            Some("py") => Interpreter::Program("python3".into()),
            Some("js") | Some("mjs") | Some("cjs") => Interpreter::Program("node".into()),
            Some("sh") => Interpreter::Program("bash".into()),
            _ => Interpreter::Direct,
        }
    }
}

// Display the interpreter as it would be written in a descriptor
impl fmt::Display for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Interpreter::Direct => write!(f, "none"),
            Interpreter::Program(program) => write!(f, "{}", program.display()),
        }
    }
}

/// The files which trigger a restart when they change
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchPolicy {
    pub paths: Vec<PathBuf>,  // absolute files or directories to scan
    pub ignore: Vec<String>,  // names or relative paths excluded from the scan
    pub root: PathBuf,        // the directory relative ignore entries start from
    pub sinks: Vec<PathBuf>,  // the log files, which are always ignored
}

/// A struct to define how to launch and supervise one application
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppDescriptor {
    pub name: String,                          // unique name of the instance
    pub entrypoint: PathBuf,                   // the script or executable to run
    pub runtime_selector: Interpreter,         // the program which runs the entrypoint
    pub working_directory: PathBuf,            // the directory the process starts in
    pub args: Vec<String>,                     // arguments passed after the entrypoint
    pub env: Vec<(String, String)>,            // extra environment variables
    pub autorestart: bool,                     // restart after an unexpected exit
    pub watch: Option<WatchPolicy>,            // restart when watched files change
    pub max_restarts: u32,                     // the restart budget
    pub min_uptime: Duration,                  // survival time which resets the budget
    pub max_memory_restart: Option<MemorySize>, // resident memory ceiling
    pub restart_delay: Duration,               // pause before each relaunch
    pub kill_timeout: Duration,                // grace period between SIGTERM and SIGKILL
    pub log_date_format: Option<LogDateFormat>, // timestamp prefix for log lines
    pub error_file: PathBuf,                   // the stderr sink
    pub out_file: PathBuf,                     // the stdout sink
    pub log_file: Option<PathBuf>,             // the combined sink for merged logs
    pub merge_logs: bool,                      // write both streams to one sink
}

// Implement helper features for the descriptor
impl AppDescriptor {
    /// A method to return the sink used when both streams are merged
    ///
    pub fn merged_file(&self) -> &Path {
        self.log_file.as_deref().unwrap_or(&self.out_file)
    }

    /// A method to return every log file written for this application
    ///
    pub fn sink_files(&self) -> Vec<PathBuf> {
        if self.merge_logs {
            vec![self.merged_file().to_path_buf()]
        } else {
            vec![self.out_file.clone(), self.error_file.clone()]
        }
    }
}

// Display the resolved descriptor for the check command
impl fmt::Display for AppDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "  script:             {}", self.entrypoint.display())?;
        writeln!(f, "  interpreter:        {}", self.runtime_selector)?;
        writeln!(f, "  cwd:                {}", self.working_directory.display())?;
        if !self.args.is_empty() {
            writeln!(f, "  args:               {}", self.args.join(" "))?;
        }
        for (key, value) in self.env.iter() {
            writeln!(f, "  env:                {}={}", key, value)?;
        }
        writeln!(f, "  autorestart:        {}", self.autorestart)?;
        match &self.watch {
            Some(policy) => {
                for path in policy.paths.iter() {
                    writeln!(f, "  watch:              {}", path.display())?;
                }
            }
            None => writeln!(f, "  watch:              false")?,
        }
        writeln!(f, "  max_restarts:       {}", self.max_restarts)?;
        writeln!(f, "  min_uptime:         {}", format_duration(self.min_uptime))?;
        match &self.max_memory_restart {
            Some(size) => writeln!(f, "  max_memory_restart: {}", size)?,
            None => writeln!(f, "  max_memory_restart: none")?,
        }
        writeln!(f, "  restart_delay:      {}", format_duration(self.restart_delay))?;
        writeln!(f, "  kill_timeout:       {}", format_duration(self.kill_timeout))?;
        if let Some(format) = &self.log_date_format {
            writeln!(f, "  log_date_format:    {}", format)?;
        }
        if self.merge_logs {
            write!(f, "  merged log:         {}", self.merged_file().display())
        } else {
            writeln!(f, "  out_file:           {}", self.out_file.display())?;
            write!(f, "  error_file:         {}", self.error_file.display())
        }
    }
}

/// The validated set of applications from one descriptor file
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorSet {
    pub source: PathBuf,          // the file the set was loaded from
    pub apps: Vec<AppDescriptor>, // the applications, in file order
}

// Implement helper features for the descriptor set
impl DescriptorSet {
    /// A method to look up an application by name
    ///
    pub fn get(&self, name: &str) -> Option<&AppDescriptor> {
        self.apps.iter().find(|app| app.name == name)
    }

    /// A method to restrict the set to a single application
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no application has this name.
    ///
    pub fn only(self, name: &str) -> Result<DescriptorSet, SupervisorError> {
        let source = self.source;
        let apps: Vec<AppDescriptor> = self
            .apps
            .into_iter()
            .filter(|app| app.name == name)
            .collect();
        if apps.is_empty() {
            return Err(SupervisorError::config(
                source,
                format!("no application named '{}'", name),
            ));
        }
        Ok(DescriptorSet { source, apps })
    }
}
