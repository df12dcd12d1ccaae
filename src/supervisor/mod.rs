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

//! A module to supervise every application of a descriptor file.
//!
//! Each application runs in its own instance task. The supervisor stops all
//! of them on SIGINT or SIGTERM, reloads the descriptor file on SIGHUP, and
//! finishes once every instance has reached a terminal state.

// Define public submodules
pub mod budget;
pub mod instance;
pub mod launcher;
pub mod log_sink;
pub mod memory_guard;
pub mod watcher;

// Import crate definitions
use crate::config;
use crate::definitions::*;

// Import the relevant structures into the correct namespace
pub use self::instance::{Instance, InstanceAccess, InstanceOptions};

// Import standard library features
use std::future::Future;
use std::path::{Path, PathBuf};

// Import tokio features
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;

// Import tracing features
use tracing::{error, info};

// Import anyhow features
use anyhow::{Context, Result};

// Import FNV HashMap
use fnv::FnvHashMap;

/// The settings of the supervisor
///
#[derive(Clone, Debug, Default)]
pub struct SupervisorOptions {
    pub only: Option<String>,        // supervise only the application with this name
    pub instance: InstanceOptions,   // the settings of each instance
}

/// The instances started from one descriptor set
///
struct RunningSet {
    accesses: FnvHashMap<String, InstanceAccess>, // access points by application name
    tasks: JoinSet<InstanceStatus>,               // the instance tasks
}

/// The structure to supervise the applications of a descriptor file
///
pub struct Supervisor {
    source: PathBuf,            // the descriptor file
    options: SupervisorOptions, // the supervisor settings
}

// Implement the key features of the supervisor
impl Supervisor {
    /// A function to create a new supervisor for the descriptor file
    ///
    pub fn new(source: &Path, options: SupervisorOptions) -> Supervisor {
        Supervisor {
            source: source.to_path_buf(),
            options,
        }
    }

    /// A method to load the descriptor set, applying the name filter
    ///
    pub async fn load(&self) -> Result<DescriptorSet, SupervisorError> {
        let set = config::load(&self.source).await?;
        match &self.options.only {
            Some(name) => set.only(name),
            None => Ok(set),
        }
    }

    /// A method to supervise the applications until they all finish or the
    /// supervisor is told to stop
    ///
    /// Returns the final status of every application of the current set.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor file fails to load at startup or
    /// the signal handlers cannot be installed. A failed reload is logged and
    /// the running applications are kept.
    ///
    pub async fn run(&self) -> Result<Vec<InstanceStatus>> {
        // Load the descriptors before anything starts
        let set = self.load().await?;

        // Listen for the control signals
        let mut interrupt = signal(SignalKind::interrupt()).context("Unable to listen for SIGINT")?;
        let mut terminate = signal(SignalKind::terminate()).context("Unable to listen for SIGTERM")?;
        let mut hangup = signal(SignalKind::hangup()).context("Unable to listen for SIGHUP")?;

        // Start every application
        let mut running = self.start(set);
        let mut finished = Vec::new();
        loop {
            tokio::select! {
                // Stop everything when interrupted or terminated
                _ = interrupt.recv() => {
                    info!("Interrupted, stopping all applications ...");
                    finished.extend(stop(running).await);
                    break;
                }
                _ = terminate.recv() => {
                    info!("Terminated, stopping all applications ...");
                    finished.extend(stop(running).await);
                    break;
                }

                // Replace the applications when the file is reloaded
                _ = hangup.recv() => {
                    info!("Reloading {} ...", self.source.display());
                    match self.load().await {
                        Ok(set) => {
                            for (name, access) in running.accesses.iter() {
                                let state = access.status().state;
                                match set.get(name) {
                                    Some(_) => info!("Replacing {} (currently {}).", name, state),
                                    None => info!("Removing {} (currently {}).", name, state),
                                }
                            }
                            stop(running).await;
                            finished.clear();
                            running = self.start(set);
                        }
                        Err(error) => {
                            error!("Keeping the current applications: {}", error);
                        }
                    }
                }

                // Collect the instances as they finish
                joined = running.tasks.join_next() => match joined {
                    Some(Ok(status)) => {
                        info!("Finished {}.", status);
                        running.accesses.remove(&status.name);
                        finished.push(status);
                    }
                    Some(Err(error)) => {
                        error!("Supervision task ended abnormally: {}", error);
                    }
                    None => {
                        info!("All applications have finished.");
                        break;
                    }
                }
            }
        }

        // Return the final statuses
        Ok(finished)
    }

    /// A helper method to start an instance for every application
    ///
    fn start(&self, set: DescriptorSet) -> RunningSet {
        let mut running = RunningSet {
            accesses: FnvHashMap::default(),
            tasks: JoinSet::new(),
        };
        for app in set.apps {
            info!("Starting {} ...", app.name);
            let name = app.name.clone();
            let (instance, access) = Instance::new(app, self.options.instance.clone());
            running.tasks.spawn(supervise(name.clone(), instance.run()));
            running.accesses.insert(name, access);
        }
        running
    }
}

/// A helper function to stop every instance of a set and wait for them
///
async fn stop(mut running: RunningSet) -> Vec<InstanceStatus> {
    for access in running.accesses.values() {
        info!("Stopping {}.", access.status());
        access.stop();
    }
    let mut statuses = Vec::new();
    while let Some(joined) = running.tasks.join_next().await {
        match joined {
            Ok(status) => statuses.push(status),
            Err(error) => error!("Supervision task ended abnormally: {}", error),
        }
    }
    statuses
}

/// A helper function to run one instance in its own task
///
/// A panic inside the instance becomes a failed status, so the application
/// is still accounted for.
///
async fn supervise<F>(name: String, run: F) -> InstanceStatus
where
    F: Future<Output = InstanceStatus> + Send + 'static,
{
    match tokio::spawn(run).await {
        Ok(status) => status,
        Err(error) => {
            error!("Supervision of {} ended abnormally: {}", name, error);
            let mut status = InstanceStatus::new(&name);
            status.state = ProcessState::Failed;
            status.error = Some(format!("Supervision ended abnormally: {}", error));
            status
        }
    }
}

// Tests of the supervisor module
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    const PATIENCE: Duration = Duration::from_secs(15);

    // A descriptor with one clean application and one crash loop
    const TWO_APPS: &str = "
apps:
  - name: once
    script: once.sh
    interpreter: sh
    autorestart: false
  - name: crash
    script: crash.sh
    interpreter: sh
    max_restarts: 1
    min_uptime: 1m
";

    // A descriptor with a long running application
    const LONG_RUNNING: &str = "
apps:
  - name: long
    script: long.sh
    interpreter: sh
    merge_logs: true
";

    // A descriptor with two long running applications
    const TWO_LONG_RUNNING: &str = "
apps:
  - name: first
    script: long.sh
    interpreter: sh
    merge_logs: true
  - name: second
    script: long.sh
    interpreter: sh
    merge_logs: true
";

    // A descriptor with a replacement application
    const REPLACEMENT: &str = "
apps:
  - name: replacement
    script: once.sh
    interpreter: sh
    autorestart: false
";

    // A helper function to wait for a launch line in a log file
    async fn wait_for_launch(log: &Path) {
        timeout(PATIENCE, async {
            while !std::fs::read_to_string(log).unwrap_or_default().contains("Launched") {
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .unwrap();
    }

    // Run a descriptor file to completion, reload a running one, then
    // terminate one
    //
    // The scenarios share one test since signals reach the whole process.
    #[tokio::test]
    async fn supervise_descriptor_file() {
        let folder = tempfile::tempdir().unwrap();
        let root = folder.path();
        std::fs::write(root.join("once.sh"), "echo once\n").unwrap();
        std::fs::write(root.join("crash.sh"), "exit 1\n").unwrap();
        std::fs::write(root.join("long.sh"), "exec sleep 30\n").unwrap();
        let path = root.join("ecosystem.yaml");

        // Every application reaches a terminal state on its own
        std::fs::write(&path, TWO_APPS).unwrap();
        let supervisor = Supervisor::new(&path, SupervisorOptions::default());
        let mut statuses = timeout(PATIENCE, supervisor.run()).await.unwrap().unwrap();
        statuses.sort_by(|first, second| first.name.cmp(&second.name));
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].name, "crash");
        assert_eq!(statuses[0].state, ProcessState::Failed);
        assert_eq!(statuses[0].restarts, 1);
        assert_eq!(statuses[1].name, "once");
        assert_eq!(statuses[1].state, ProcessState::Stopped);

        // The name filter restricts the set
        let options = SupervisorOptions {
            only: Some("once".into()),
            ..SupervisorOptions::default()
        };
        let statuses = Supervisor::new(&path, options).run().await.unwrap();
        assert_eq!(statuses.len(), 1);
        let options = SupervisorOptions {
            only: Some("missing".into()),
            ..SupervisorOptions::default()
        };
        assert!(Supervisor::new(&path, options).run().await.is_err());

        // A reload replaces the running applications
        std::fs::write(&path, LONG_RUNNING).unwrap();
        let supervisor = Supervisor::new(&path, SupervisorOptions::default());
        let handle = tokio::spawn(async move { supervisor.run().await });
        wait_for_launch(&root.join("logs/long-out.log")).await;
        std::fs::write(&path, REPLACEMENT).unwrap();
        unsafe {
            libc::raise(libc::SIGHUP);
        }
        let statuses = timeout(PATIENCE, handle).await.unwrap().unwrap().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].name, "replacement");
        assert_eq!(statuses[0].state, ProcessState::Stopped);

        // SIGTERM stops every running application
        std::fs::write(&path, TWO_LONG_RUNNING).unwrap();
        let supervisor = Supervisor::new(&path, SupervisorOptions::default());
        let handle = tokio::spawn(async move { supervisor.run().await });
        wait_for_launch(&root.join("logs/first-out.log")).await;
        wait_for_launch(&root.join("logs/second-out.log")).await;
        unsafe {
            libc::raise(libc::SIGTERM);
        }
        let mut statuses = timeout(PATIENCE, handle).await.unwrap().unwrap().unwrap();
        statuses.sort_by(|first, second| first.name.cmp(&second.name));
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].name, "first");
        assert_eq!(statuses[1].name, "second");
        for status in statuses.iter() {
            assert_eq!(status.state, ProcessState::Stopped);
            assert_eq!(status.pid, None);
        }
    }

    // An instance run which panics
    async fn broken_run() -> InstanceStatus {
        panic!("sampler failed");
    }

    // A panic inside an instance still reports the application as failed
    #[tokio::test]
    async fn panicked_instance_fails() {
        let status = supervise("broken".into(), broken_run()).await;
        assert_eq!(status.name, "broken");
        assert_eq!(status.state, ProcessState::Failed);
        assert!(status.error.unwrap().starts_with("Supervision ended abnormally"));
    }
}
