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

//! A module to launch and stop supervised processes.

// Import crate definitions
use crate::definitions::*;

// Import standard library features
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

// Import tokio features
use tokio::process::{Child, Command};
use tokio::time::{Instant, timeout};

// Import tracing features
use tracing::{debug, warn};

/// A process started by the launcher
///
#[derive(Debug)]
pub struct LaunchedProcess {
    pub child: Child,          // the running child process
    pub pid: u32,              // the operating system process id
    pub launched_at: Instant,  // the moment the process was spawned
}

// Implement helper features for the launched process
impl LaunchedProcess {
    /// A method to return how long the process has been running
    ///
    pub fn uptime(&self) -> Duration {
        self.launched_at.elapsed()
    }
}

/// A function to return the program and arguments for an application
///
pub fn command_line(app: &AppDescriptor) -> (PathBuf, Vec<String>) {
    match &app.runtime_selector {
        Interpreter::Direct => (app.entrypoint.clone(), app.args.clone()),
        Interpreter::Program(program) => {
            let mut args = vec![app.entrypoint.to_string_lossy().into_owned()];
            args.extend(app.args.iter().cloned());
            (program.clone(), args)
        }
    }
}

/// A function to spawn the process for an application
///
/// The process starts in the working directory of the application with its
/// stdout and stderr piped, ready to be attached to a log sink.
///
/// # Errors
///
/// Returns a launch error if the working directory, the entrypoint, or an
/// interpreter given as a path does not exist, or if the spawn fails.
///
pub fn launch(app: &AppDescriptor) -> Result<LaunchedProcess, SupervisorError> {
    // Check the paths before trying to spawn
    if !app.working_directory.is_dir() {
        return Err(SupervisorError::launch(
            &app.name,
            format!("working directory {} not found", app.working_directory.display()),
        ));
    }
    if !app.entrypoint.is_file() {
        return Err(SupervisorError::launch(
            &app.name,
            format!("entrypoint {} not found", app.entrypoint.display()),
        ));
    }
    if let Interpreter::Program(program) = &app.runtime_selector {
        if program.is_absolute() && !program.is_file() {
            return Err(SupervisorError::launch(
                &app.name,
                format!("interpreter {} not found", program.display()),
            ));
        }
    }

    // Create the child process
    let (program, args) = command_line(app);
    debug!("Running {} {:?} in {}.", program.display(), args, app.working_directory.display());
    let child = Command::new(&program)
        .args(&args)
        .current_dir(&app.working_directory)
        .envs(app.env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
        .env("OVERSEER_APP_NAME", &app.name)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|error| {
            SupervisorError::launch(&app.name, format!("unable to run {}: {}", program.display(), error))
        })?;

    // A child which has not been waited on always has an id
    let pid = child
        .id()
        .ok_or_else(|| SupervisorError::launch(&app.name, "process exited before it was tracked"))?;
    Ok(LaunchedProcess {
        child,
        pid,
        launched_at: Instant::now(),
    })
}

/// A function to stop a process gracefully
///
/// Sends SIGTERM and waits up to the kill timeout for the process to exit
/// before sending SIGKILL.
///
pub async fn terminate(process: &mut LaunchedProcess, kill_timeout: Duration) -> Option<ExitStatus> {
    // Ask the process to stop, if it is still running
    if let Ok(None) = process.child.try_wait() {
        // The pid belongs to our unreaped child, so it cannot have been reused
        let result = unsafe { libc::kill(process.pid as libc::pid_t, libc::SIGTERM) };
        if result != 0 {
            warn!("Unable to send SIGTERM to process {}.", process.pid);
        }
    }

    // Wait for the process to exit, then force it
    match timeout(kill_timeout, process.child.wait()).await {
        Ok(result) => result.ok(),
        Err(_) => {
            warn!(
                "Process {} did not exit within {}, killing it.",
                process.pid,
                format_duration(kill_timeout)
            );
            if process.child.kill().await.is_err() {
                warn!("Unable to kill process {}.", process.pid);
            }
            process.child.try_wait().ok().flatten()
        }
    }
}

// Tests of the launcher module
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileFormat, parse};
    use std::path::Path;

    // A helper function to create a descriptor in the provided folder
    fn descriptor(folder: &Path, extra: &str) -> AppDescriptor {
        let text = format!(
            "name: test\nscript: run.sh\ninterpreter: sh\ncwd: {}\n{}",
            folder.display(),
            extra
        );
        parse(&text, FileFormat::Yaml, &folder.join("ecosystem.yaml"), folder)
            .unwrap()
            .apps
            .remove(0)
    }

    // Build the command lines for each interpreter choice
    #[test]
    fn command_lines() {
        let folder = Path::new("/srv/bot");
        let app = descriptor(folder, "args: [--fast]\n");
        assert_eq!(
            command_line(&app),
            (PathBuf::from("sh"), vec!["/srv/bot/run.sh".to_string(), "--fast".to_string()])
        );

        let mut app = app;
        app.runtime_selector = Interpreter::Direct;
        assert_eq!(
            command_line(&app),
            (PathBuf::from("/srv/bot/run.sh"), vec!["--fast".to_string()])
        );
    }

    // The process runs in the working directory of the descriptor
    #[tokio::test]
    async fn launch_in_working_directory() {
        let folder = tempfile::tempdir().unwrap();
        std::fs::write(folder.path().join("run.sh"), "pwd -P\necho \"$OVERSEER_APP_NAME\"\n").unwrap();
        let app = descriptor(folder.path(), "");
        let process = launch(&app).unwrap();
        let output = process.child.wait_with_output().await.unwrap();
        let text = String::from_utf8(output.stdout).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            PathBuf::from(lines.next().unwrap()),
            folder.path().canonicalize().unwrap()
        );
        assert_eq!(lines.next(), Some("test"));
    }

    // Missing paths are launch errors
    #[test]
    fn missing_paths() {
        let folder = tempfile::tempdir().unwrap();
        let app = descriptor(folder.path(), "");
        let error = launch(&app).unwrap_err();
        assert!(matches!(error, SupervisorError::LaunchError { .. }));
        assert!(error.to_string().contains("entrypoint"));

        std::fs::write(folder.path().join("run.sh"), "exit 0\n").unwrap();
        let mut app = app;
        app.runtime_selector = Interpreter::Program(folder.path().join(".venv/bin/python"));
        let error = launch(&app).unwrap_err();
        assert!(error.to_string().contains("interpreter"));

        app.working_directory = folder.path().join("missing");
        let error = launch(&app).unwrap_err();
        assert!(error.to_string().contains("working directory"));
    }

    // A process which ignores SIGTERM is killed after the timeout
    #[tokio::test]
    async fn terminate_stubborn_process() {
        let folder = tempfile::tempdir().unwrap();
        std::fs::write(folder.path().join("run.sh"), "trap '' TERM\nwhile true; do sleep 0.05; done\n").unwrap();
        let app = descriptor(folder.path(), "");
        let mut process = launch(&app).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = Instant::now();
        terminate(&mut process, Duration::from_millis(300)).await;
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(process.child.try_wait().unwrap().is_some());
    }
}
