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

//! A module to supervise one application.
//!
//! The instance launches the process, waits for it to exit, to exceed its
//! memory ceiling, to see a watched file change, or to be asked to stop, and
//! then applies the restart policy. The current status is published on a
//! watch channel for the supervisor and anyone else holding an access point.

// Import crate definitions
use crate::definitions::*;

// Import other structures into this module
use super::budget::{ExitCause, RestartBudget};
use super::launcher::{self, LaunchedProcess};
use super::log_sink::LogSink;
use super::memory_guard::MemoryGuard;
use super::watcher::Watcher;

// Import standard library features
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

// Import tokio features
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};

// Import tracing features
use tracing::{error, info, warn};

// Define module constants
pub const DEFAULT_MEMORY_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// The settings shared by every instance
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceOptions {
    pub memory_interval: Duration,       // time between resident memory samples
    pub watch_interval: Duration,        // time between scans of the watched files
    pub supervisor_log: Option<PathBuf>, // the supervisor log file, never watched
}

// Implement the default intervals
impl Default for InstanceOptions {
    fn default() -> InstanceOptions {
        InstanceOptions {
            memory_interval: DEFAULT_MEMORY_INTERVAL,
            watch_interval: DEFAULT_WATCH_INTERVAL,
            supervisor_log: None,
        }
    }
}

/// The reasons the monitoring of a process ended
///
#[derive(Clone, Copy, Debug)]
enum Outcome {
    Exited(Option<ExitStatus>),
    MemoryLimit(MemorySize),
    FileChange,
    StopRequested,
}

/// The access point to a running instance
///
#[derive(Clone, Debug)]
pub struct InstanceAccess {
    status_receive: watch::Receiver<InstanceStatus>, // the latest status of the instance
    stop_send: Arc<watch::Sender<bool>>,             // the line to request a stop
}

// Implement the key features of the instance access
impl InstanceAccess {
    /// A method to return the current status
    ///
    pub fn status(&self) -> InstanceStatus {
        self.status_receive.borrow().clone()
    }

    /// A method to ask the instance to stop its process and finish
    ///
    pub fn stop(&self) {
        self.stop_send.send_replace(true);
    }
}

/// A structure to supervise one application until it stops or fails
///
pub struct Instance {
    app: AppDescriptor,                            // the application descriptor
    options: InstanceOptions,                      // the sampling intervals
    budget: RestartBudget,                         // the restart budget
    memory_guard: Option<MemoryGuard>,             // the memory ceiling, if any
    status_send: watch::Sender<InstanceStatus>,    // the line to publish the status
    stop_receive: watch::Receiver<bool>,           // the line to receive stop requests
}

// Implement the key features of the instance
impl Instance {
    /// A function to create a new instance and its access point
    ///
    pub fn new(app: AppDescriptor, options: InstanceOptions) -> (Instance, InstanceAccess) {
        // Create the status and stop lines
        let (status_send, status_receive) = watch::channel(InstanceStatus::new(&app.name));
        let (stop_send, stop_receive) = watch::channel(false);

        // Create the instance
        let instance = Instance {
            budget: RestartBudget::new(app.max_restarts, app.min_uptime),
            memory_guard: app.max_memory_restart.map(MemoryGuard::new),
            app,
            options,
            status_send,
            stop_receive,
        };
        let access = InstanceAccess {
            status_receive,
            stop_send: Arc::new(stop_send),
        };
        (instance, access)
    }

    /// A method to supervise the application until it reaches a terminal
    /// state, returning the final status
    ///
    pub async fn run(mut self) -> InstanceStatus {
        // Open the log sink for the life of the instance
        let sink = match LogSink::open(&self.app).await {
            Ok(sink) => sink,
            Err(error) => {
                error!("{}", error);
                self.update(|status| {
                    status.state = ProcessState::Failed;
                    status.error = Some(error.to_string());
                });
                return self.status();
            }
        };

        // Take the first scan of the watched files
        let mut watcher = match &self.app.watch {
            Some(policy) => {
                Some(Watcher::new(policy, self.options.supervisor_log.as_deref()).await)
            }
            None => None,
        };

        // Launch and relaunch until the policy says otherwise
        let mut launches: u32 = 0;
        loop {
            // Honour a stop request made between runs
            if *self.stop_receive.borrow() {
                self.stopped(&sink, "Stopped by the supervisor.").await;
                break;
            }

            // Start the process
            self.update(|status| status.state = ProcessState::Launching);
            let mut process = match launcher::launch(&self.app) {
                Ok(process) => process,
                Err(error) => {
                    self.fail(&sink, error).await;
                    break;
                }
            };
            let readers = sink.attach(&mut process.child);
            let pid = process.pid;
            let is_restart = launches > 0;
            launches += 1;
            self.update(|status| {
                status.state = ProcessState::Running;
                status.pid = Some(pid);
                if is_restart {
                    status.restarts += 1;
                }
            });
            info!("Launched {} (pid {}).", self.app.name, pid);
            sink.supervisor(&format!("Launched pid {}.", pid)).await;

            // Wait for something to end the run
            let outcome = self.monitor(&mut process, watcher.as_mut()).await;
            let uptime = process.uptime();
            let exit_status = match outcome {
                Outcome::Exited(exit_status) => exit_status,
                _ => launcher::terminate(&mut process, self.app.kill_timeout).await,
            };
            readers.finish().await;
            self.update(|status| {
                status.state = ProcessState::Exited;
                status.pid = None;
            });

            // A stop request which arrived with the exit still ends supervision
            let outcome = match outcome {
                Outcome::Exited(_) if *self.stop_receive.borrow() => Outcome::StopRequested,
                outcome => outcome,
            };

            // Decide what the run counts as
            let description = describe_exit(exit_status);
            let cause = match outcome {
                Outcome::StopRequested => {
                    self.stopped(&sink, &format!("Stopped by the supervisor, {}.", description))
                        .await;
                    break;
                }
                Outcome::Exited(_) => {
                    let message = format!(
                        "Process {} after {}.",
                        description,
                        format_duration(truncate(uptime))
                    );
                    warn!("{}: {}", self.app.name, message);
                    sink.supervisor(&message).await;
                    ExitCause::Exited
                }
                Outcome::MemoryLimit(resident) => {
                    let message = format!(
                        "Resident memory {} is above the {} limit, restarting.",
                        resident,
                        self.memory_guard
                            .as_ref()
                            .map(|guard| guard.limit().to_string())
                            .unwrap_or_default()
                    );
                    warn!("{}: {}", self.app.name, message);
                    sink.supervisor(&message).await;
                    ExitCause::MemoryLimit
                }
                Outcome::FileChange => {
                    info!("{}: watched files changed, restarting.", self.app.name);
                    sink.supervisor("Watched files changed, restarting.").await;
                    ExitCause::FileChange
                }
            };

            // Stop here if the process is not meant to come back
            if cause == ExitCause::Exited && !self.app.autorestart {
                self.stopped(&sink, "Not restarting, autorestart is disabled.").await;
                break;
            }

            // Apply the restart budget
            let allowed = self.budget.record(cause, uptime);
            let count = self.budget.count();
            self.update(|status| status.unstable_restarts = count);
            if !allowed {
                let error = SupervisorError::CrashLoopError {
                    app: self.app.name.clone(),
                    restarts: count,
                    min_uptime: format_duration(self.app.min_uptime),
                };
                self.fail(&sink, error).await;
                break;
            }

            // Wait out the restart delay unless told to stop
            self.update(|status| status.state = ProcessState::Restarting);
            info!("Restarting {} ...", self.app.name);
            if !self.app.restart_delay.is_zero() {
                tokio::select! {
                    _ = sleep(self.app.restart_delay) => (),
                    _ = stop_requested(&mut self.stop_receive) => (),
                }
            }
        }

        // Write any remaining lines and return the final status
        sink.close().await;
        self.status()
    }

    /// A method to watch a running process until something ends the run
    ///
    async fn monitor(
        &mut self,
        process: &mut LaunchedProcess,
        mut watcher: Option<&mut Watcher>,
    ) -> Outcome {
        // Create the sampling tickers, starting one period from now
        let memory_interval = self.options.memory_interval;
        let watch_interval = self.options.watch_interval;
        let mut memory_ticker = interval_at(Instant::now() + memory_interval, memory_interval);
        memory_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watch_ticker = interval_at(Instant::now() + watch_interval, watch_interval);
        watch_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let pid = process.pid;

        // Wait for the first event that ends the run
        loop {
            tokio::select! {
                result = process.child.wait() => return Outcome::Exited(result.ok()),

                _ = stop_requested(&mut self.stop_receive) => return Outcome::StopRequested,

                _ = memory_ticker.tick(), if self.memory_guard.is_some() => {
                    if let Some(guard) = self.memory_guard.as_mut() {
                        if let Some(resident) = guard.check(pid) {
                            return Outcome::MemoryLimit(resident);
                        }
                    }
                }

                _ = watch_ticker.tick(), if watcher.is_some() => {
                    if let Some(watcher) = watcher.as_mut() {
                        if watcher.changed().await {
                            return Outcome::FileChange;
                        }
                    }
                }
            }
        }
    }

    /// A method to end supervision with an error
    ///
    async fn fail(&mut self, sink: &LogSink, error: SupervisorError) {
        error!("{}", error);
        sink.supervisor(&error.to_string()).await;
        self.update(|status| {
            status.state = ProcessState::Failed;
            status.pid = None;
            status.error = Some(error.to_string());
        });
    }

    /// A method to end supervision without an error
    ///
    async fn stopped(&mut self, sink: &LogSink, message: &str) {
        info!("{}: {}", self.app.name, message);
        sink.supervisor(message).await;
        self.update(|status| {
            status.state = ProcessState::Stopped;
            status.pid = None;
        });
    }

    /// A helper method to modify and publish the status
    ///
    fn update<F: FnOnce(&mut InstanceStatus)>(&self, modify: F) {
        self.status_send.send_modify(modify);
    }

    /// A helper method to return a copy of the status
    ///
    fn status(&self) -> InstanceStatus {
        self.status_send.borrow().clone()
    }
}

/// A helper function to resolve once a stop has been requested
///
/// Never resolves if every access point has been dropped without asking.
///
async fn stop_requested(stop_receive: &mut watch::Receiver<bool>) {
    loop {
        if *stop_receive.borrow_and_update() {
            return;
        }
        if stop_receive.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// A helper function to describe how a process ended
///
fn describe_exit(exit_status: Option<ExitStatus>) -> String {
    match exit_status {
        Some(exit_status) => match (exit_status.code(), exit_status.signal()) {
            (Some(code), _) => format!("exited with code {}", code),
            (None, Some(signal)) => format!("was killed by signal {}", signal),
            (None, None) => "exited".to_string(),
        },
        None => "exited with an unknown status".to_string(),
    }
}

/// A helper function to drop the sub-millisecond part of a duration
///
fn truncate(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
