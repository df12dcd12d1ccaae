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

//! A module to detect changes to the watched files of an application.
//!
//! The watched paths are scanned periodically and summarised by the sorted
//! list of files with their modification time and length. Any difference
//! between two scans counts as a change, including a rename.
//!
//! The log sinks of the application and the log folder of the supervisor
//! are never scanned, since every line written there would otherwise look
//! like a change.

// Import crate definitions
use crate::definitions::*;

// Import standard library features
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

// Import tracing features
use tracing::warn;

// Import walkdir features
use walkdir::{DirEntry, WalkDir};

// Folder names which are never watched
const ALWAYS_IGNORED: &[&str] = &[".git", "node_modules", "__pycache__", ".venv"];

/// A summary of the watched files at one moment
///
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fingerprint {
    entries: Vec<(PathBuf, Option<SystemTime>, u64)>, // path, modification time and length
}

// Implement the fingerprint features
impl Fingerprint {
    /// A method to return the number of files found
    ///
    pub fn files(&self) -> usize {
        self.entries.len()
    }
}

/// The paths which are excluded from every scan
///
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuietPaths {
    folders: Vec<PathBuf>,  // whole folders that are skipped
    prefixes: Vec<String>,  // file paths that are skipped, with any suffix
}

// Implement the quiet path features
impl QuietPaths {
    /// A function to collect the log locations which must not be watched
    ///
    /// The parent folder of each log file is skipped entirely, unless that
    /// folder contains a watched path (such as a log written beside the
    /// script). In that case only the log file and its rotated copies are
    /// skipped.
    ///
    pub fn new(policy: &WatchPolicy, supervisor_log: Option<&Path>) -> QuietPaths {
        let mut quiet = QuietPaths::default();
        for file in policy.sinks.iter().map(PathBuf::as_path).chain(supervisor_log) {
            quiet.prefixes.push(file.to_string_lossy().into_owned());
            if let Some(folder) = file.parent() {
                let holds_watched = policy.paths.iter().any(|path| path.starts_with(folder));
                if !holds_watched && !quiet.folders.iter().any(|known| known == folder) {
                    quiet.folders.push(folder.to_path_buf());
                }
            }
        }
        quiet
    }

    /// A method to check whether a path is one of the log locations
    ///
    pub fn contains(&self, path: &Path) -> bool {
        if self.folders.iter().any(|folder| path.starts_with(folder)) {
            return true;
        }
        let text = path.to_string_lossy();
        self.prefixes.iter().any(|prefix| text.starts_with(prefix.as_str()))
    }
}

/// A structure to scan the watched files and report changes
///
pub struct Watcher {
    policy: Arc<WatchPolicy>,   // the paths to scan
    quiet: Arc<QuietPaths>,     // the log locations to skip
    previous: Fingerprint,      // the result of the last scan
}

// Implement the key features of the watcher
impl Watcher {
    /// A function to create a watcher and take the first scan
    ///
    pub async fn new(policy: &WatchPolicy, supervisor_log: Option<&Path>) -> Watcher {
        let quiet = Arc::new(QuietPaths::new(policy, supervisor_log));
        let policy = Arc::new(policy.clone());
        let previous = scan_blocking(policy.clone(), quiet.clone()).await;
        Watcher { policy, quiet, previous }
    }

    /// A method to scan again and return true if anything changed
    ///
    pub async fn changed(&mut self) -> bool {
        let current = scan_blocking(self.policy.clone(), self.quiet.clone()).await;
        let changed = current != self.previous;
        self.previous = current;
        changed
    }
}

/// A helper function to run the scan away from the async workers
///
async fn scan_blocking(policy: Arc<WatchPolicy>, quiet: Arc<QuietPaths>) -> Fingerprint {
    match tokio::task::spawn_blocking(move || scan(&policy, &quiet)).await {
        Ok(fingerprint) => fingerprint,
        Err(error) => {
            warn!("Unable to scan watched files: {}.", error);
            Fingerprint::default()
        }
    }
}

/// A function to summarise the watched files
///
pub fn scan(policy: &WatchPolicy, quiet: &QuietPaths) -> Fingerprint {
    let mut entries = Vec::new();
    for path in policy.paths.iter() {
        let walker = WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !is_ignored(policy, quiet, entry));
        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = entry.metadata().ok();
            let modified = metadata.as_ref().and_then(|metadata| metadata.modified().ok());
            let length = metadata.map(|metadata| metadata.len()).unwrap_or_default();
            let relative = entry.path().strip_prefix(&policy.root).unwrap_or(entry.path());
            entries.push((relative.to_path_buf(), modified, length));
        }
    }
    entries.sort();
    entries.dedup();
    Fingerprint { entries }
}

/// A helper function to check an entry against the ignore rules
///
fn is_ignored(policy: &WatchPolicy, quiet: &QuietPaths, entry: &DirEntry) -> bool {
    let path = entry.path();

    // Never watch the log files, since writing them would restart the process
    if quiet.contains(path) {
        return true;
    }

    // Skip the usual tool folders
    let name = entry.file_name().to_string_lossy();
    if ALWAYS_IGNORED.iter().any(|ignored| name == *ignored) {
        return true;
    }

    // Match ignore entries by name or by path
    policy.ignore.iter().any(|ignored| {
        name == ignored.as_str() || path.starts_with(policy.root.join(Path::new(ignored)))
    })
}

// Tests of the watcher module
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    // A helper function to watch a whole folder
    fn policy(root: &Path, ignore: &[&str]) -> WatchPolicy {
        WatchPolicy {
            paths: vec![root.to_path_buf()],
            ignore: ignore.iter().map(|entry| entry.to_string()).collect(),
            root: root.to_path_buf(),
            sinks: vec![root.join("logs/out.log")],
        }
    }

    // A helper function to write a file and its folders
    fn write(root: &Path, path: &str, text: &str) {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, text).unwrap();
    }

    // Adding and removing files are changes
    #[tokio::test]
    async fn detect_changes() {
        let folder = tempfile::tempdir().unwrap();
        fs::write(folder.path().join("main.py"), "print('hi')\n").unwrap();
        let mut watcher = Watcher::new(&policy(folder.path(), &[]), None).await;
        assert!(!watcher.changed().await);

        fs::write(folder.path().join("extra.py"), "\n").unwrap();
        assert!(watcher.changed().await);
        assert!(!watcher.changed().await);

        fs::remove_file(folder.path().join("extra.py")).unwrap();
        assert!(watcher.changed().await);
    }

    // Renaming a file keeps the count and the times but is still a change
    #[tokio::test]
    async fn detect_rename() {
        let folder = tempfile::tempdir().unwrap();
        write(folder.path(), "main.py", "print('hi')\n");
        write(folder.path(), "old.py", "x = 1\n");
        let mut watcher = Watcher::new(&policy(folder.path(), &[]), None).await;
        fs::rename(folder.path().join("old.py"), folder.path().join("new.py")).unwrap();
        assert!(watcher.changed().await);
        assert!(!watcher.changed().await);
    }

    // Rewriting a file with a different length is a change
    #[tokio::test]
    async fn detect_rewrite() {
        let folder = tempfile::tempdir().unwrap();
        write(folder.path(), "settings.py", "DEBUG = True\n");
        let mut watcher = Watcher::new(&policy(folder.path(), &[]), None).await;
        write(folder.path(), "settings.py", "DEBUG = False\n");
        assert!(watcher.changed().await);
    }

    // Log files and ignored paths do not count
    #[test]
    fn ignored_paths() {
        let folder = tempfile::tempdir().unwrap();
        let root = folder.path();
        for path in ["main.py", "logs/out.log", "tmp/cache", ".git/HEAD", "data/skip/me"] {
            write(root, path, "x");
        }
        let policy = policy(root, &["tmp", "data/skip"]);
        let fingerprint = scan(&policy, &QuietPaths::new(&policy, None));
        assert_eq!(fingerprint.files(), 1);
    }

    // Writing the application logs or the supervisor log is never a change
    #[tokio::test]
    async fn log_folders_are_quiet() {
        let folder = tempfile::tempdir().unwrap();
        let root = folder.path();
        write(root, "main.py", "print('hi')\n");
        let supervisor_log = root.join("log/overseer.log");
        let mut watcher = Watcher::new(&policy(root, &[]), Some(&supervisor_log)).await;

        write(root, "logs/out.log", "Launched pid 10.\n");
        write(root, "logs/test-error.log", "Traceback\n");
        write(root, "log/overseer.log.2026-10-14", "INFO Launched test\n");
        assert!(!watcher.changed().await);

        write(root, "main.py", "print('hello')\n");
        assert!(watcher.changed().await);
    }

    // A log beside the watched script only hides the log itself
    #[tokio::test]
    async fn log_beside_script() {
        let folder = tempfile::tempdir().unwrap();
        let root = folder.path();
        write(root, "main.py", "print('hi')\n");
        let mut policy = policy(root, &[]);
        policy.sinks = vec![root.join("out.log")];
        let supervisor_log = root.join("overseer.log");
        let mut watcher = Watcher::new(&policy, Some(&supervisor_log)).await;

        write(root, "out.log", "hi\n");
        write(root, "overseer.log.2026-10-14", "INFO Launched test\n");
        assert!(!watcher.changed().await);

        write(root, "helper.py", "\n");
        assert!(watcher.changed().await);
    }
}
