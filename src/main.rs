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

//! The main module of the overseer program which pulls from the other modules.

// Import YAML processing libraries
#[macro_use]
extern crate serde;

// Define program modules
mod config;
mod definitions;
mod supervisor;

// Import crate definitions
use crate::definitions::*;

// Import other structures into this module
use self::supervisor::{InstanceOptions, Supervisor, SupervisorOptions};

// Import standard libary features
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

// Import anyhow features
use anyhow::{Context, Result, anyhow};

// Import clap features
use clap::{Parser, Subcommand};

// Import tracing features
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

// Import single instance features
use single_instance::SingleInstance;

// Define constants
pub const DEFAULT_LOGLEVEL: &str = "info";
pub const LOG_FOLDER: &str = "log/"; // the default log folder
pub const SUPERVISOR_LOG: &str = "overseer.log"; // the default log file prefix

/// The command line of the overseer program
///
#[derive(Debug, Parser)]
#[command(version, about = "Launch and supervise long-running applications")]
struct Arguments {
    /// The most verbose level to log (trace, debug, info, warn, error, off)
    #[arg(long, global = true, default_value = DEFAULT_LOGLEVEL)]
    log_level: String,

    /// The folder for the supervisor's own log files
    #[arg(long, global = true, default_value = LOG_FOLDER)]
    log_dir: PathBuf,

    #[command(subcommand)]
    action: Action,
}

/// The actions available on the command line
///
#[derive(Debug, Subcommand)]
enum Action {
    /// Supervise the applications of a descriptor file in the foreground
    Start {
        /// The descriptor file (YAML or JSON)
        file: PathBuf,

        /// Supervise only the application with this name
        #[arg(long)]
        only: Option<String>,

        /// The time between resident memory samples
        #[arg(long, value_parser = parse_duration, default_value = "30s")]
        memory_interval: Duration,

        /// The time between scans of watched files
        #[arg(long, value_parser = parse_duration, default_value = "1s")]
        watch_interval: Duration,
    },

    /// Load a descriptor file and print the resolved applications
    Check {
        /// The descriptor file (YAML or JSON)
        file: PathBuf,
    },
}

/// The Overseer structure to contain the program launching code.
///
struct Overseer;

// Implement the Overseer functionality
impl Overseer {
    /// A function to setup the logging configuration
    ///
    fn setup_logging(
        level: LevelFilter,
        log_dir: &Path,
    ) -> tracing_appender::non_blocking::WorkerGuard {
        // Create the stdout layer
        let stdout_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_filter(level);

        // Create the log file
        let file_appender = tracing_appender::rolling::daily(log_dir, SUPERVISOR_LOG);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

        // Create the log file layer
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(false)
            .with_filter(level);

        // Initialize tracing, with the tokio console if requested
        #[cfg(feature = "tokio_console")]
        tracing_subscriber::registry()
            .with(console_subscriber::spawn())
            .with(stdout_layer)
            .with(file_layer)
            .init();
        #[cfg(not(feature = "tokio_console"))]
        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(file_layer)
            .init();

        // Return the file guard
        file_guard
    }

    /// A function to run the requested action
    ///
    async fn run(arguments: Arguments) -> Result<bool> {
        // Initialize logging (guard is held until the end of run())
        let level = LevelFilter::from_str(&arguments.log_level)
            .map_err(|_| anyhow!("Invalid log level: {}", arguments.log_level))?;
        let _guard = Overseer::setup_logging(level, &arguments.log_dir);
        let supervisor_log = std::path::absolute(&arguments.log_dir)
            .unwrap_or_else(|_| arguments.log_dir.clone())
            .join(SUPERVISOR_LOG);

        match arguments.action {
            // Print the resolved descriptors
            Action::Check { file } => {
                let set = config::load(&file).await?;
                for app in set.apps.iter() {
                    println!("{}\n", app);
                }
                println!("{} application(s) in {}", set.apps.len(), set.source.display());
                Ok(true)
            }

            // Supervise in the foreground
            Action::Start {
                file,
                only,
                memory_interval,
                watch_interval,
            } => {
                // Check to ensure this file is not already supervised
                let canonical = file
                    .canonicalize()
                    .with_context(|| format!("Unable to find {}", file.display()))?;
                let instance = SingleInstance::new(&instance_key(&canonical))
                    .context("Unable to check for another supervisor")?;
                if !instance.is_single() {
                    return Err(anyhow!(
                        "{} is already supervised by another overseer",
                        canonical.display()
                    ));
                }

                // Run until every application finishes or a signal arrives
                let options = SupervisorOptions {
                    only,
                    instance: InstanceOptions {
                        memory_interval,
                        watch_interval,
                        supervisor_log: Some(supervisor_log),
                    },
                };
                info!(
                    "Supervising {} (memory every {}, watch every {}).",
                    canonical.display(),
                    format_duration(memory_interval),
                    format_duration(watch_interval)
                );
                let statuses = Supervisor::new(&canonical, options).run().await?;
                let mut clean = true;
                for status in statuses.iter() {
                    info!("{}", status);
                    if !status.state.is_terminal() || status.state == ProcessState::Failed {
                        clean = false;
                    }
                }
                Ok(clean)
            }
        }
    }
}

/// A helper function to name the lock for one descriptor file
///
fn instance_key(path: &Path) -> String {
    let name: String = path
        .to_string_lossy()
        .chars()
        .map(|character| if character.is_ascii_alphanumeric() { character } else { '_' })
        .collect();
    format!("overseer{}", name)
}

/// The main function of the program, simplified to as high a level as possible.
///
#[tokio::main]
async fn main() -> ExitCode {
    let arguments = Arguments::parse();
    match Overseer::run(arguments).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            error!("{:#}", error);
            eprintln!("overseer: {:#}", error);
            ExitCode::FAILURE
        }
    }
}
