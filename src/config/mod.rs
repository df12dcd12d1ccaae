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

//! A module to load the application descriptors from a file.
//!
//! The descriptor file is YAML or JSON. Its root is either an object with an
//! `apps` list, a list of applications, or a single application. Every
//! application is validated and resolved into an `AppDescriptor` before the
//! supervisor sees it, so any problem with the file is reported here as a
//! configuration error.

// Import crate definitions
use crate::definitions::*;

// Import standard library features
use std::path::{Path, PathBuf};
use std::time::Duration;

// Import tokio features
use tokio::fs;

// Import tracing features
use tracing::{debug, warn};

// Import FNV HashMap and HashSet
use fnv::{FnvHashMap, FnvHashSet};

// Import YAML processing library
use serde_yaml::Value;

/// The syntax of a descriptor file
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Json,
}

// Implement the format detection
impl FileFormat {
    /// A function to choose the format from the file extension
    ///
    pub fn for_path(path: &Path) -> FileFormat {
        match path.extension().and_then(|extension| extension.to_str()) {
            Some("json") => FileFormat::Json,
            _ => FileFormat::Yaml,
        }
    }
}

/// The watch field, which may be a flag or a list of paths
///
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum WatchSetting {
    Enabled(bool),
    Paths(Vec<String>),
    Path(String),
}

/// The args field, which may be a list or a single command line
///
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum ArgsSetting {
    List(Vec<String>),
    Line(String),
}

/// A special application struct that is designed to allow simple
/// deserialization of each entry of the descriptor file. Only used
/// internally.
///
#[derive(Debug, Deserialize)]
struct RawApp {
    name: Option<String>,
    script: Option<String>,
    interpreter: Option<String>,
    cwd: Option<PathBuf>,
    args: Option<ArgsSetting>,
    env: Option<FnvHashMap<String, Value>>,
    autorestart: Option<bool>,
    watch: Option<WatchSetting>,
    ignore_watch: Option<Vec<String>>,
    max_restarts: Option<u32>,
    min_uptime: Option<DurationSetting>,
    max_memory_restart: Option<SizeSetting>,
    restart_delay: Option<DurationSetting>,
    kill_timeout: Option<DurationSetting>,
    log_date_format: Option<String>,
    error_file: Option<PathBuf>,
    out_file: Option<PathBuf>,
    log_file: Option<PathBuf>,
    merge_logs: Option<bool>,
    #[serde(flatten)]
    unsupported: FnvHashMap<String, Value>, // any other process manager fields
} // Private struct to allow deserialization of the descriptor file

/// A function to load and validate a descriptor file
///
/// Relative paths in the file are resolved against the directory which
/// contains it.
///
/// # Errors
///
/// Returns a configuration error if the file cannot be read, cannot be
/// parsed, or contains an invalid application.
///
pub async fn load(path: &Path) -> Result<DescriptorSet, SupervisorError> {
    // Make the path absolute so that every derived path is absolute
    let source = std::path::absolute(path)
        .map_err(|error| SupervisorError::config(path, format!("invalid path: {}", error)))?;

    // Try to read from the descriptor file
    let text = fs::read_to_string(&source).await.map_err(|error| {
        SupervisorError::config(&source, format!("unable to read file: {}", error))
    })?;

    // Resolve everything against the folder of the file
    let base_dir = source
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    debug!("Loading descriptors from {}.", source.display());
    parse(&text, FileFormat::for_path(&source), &source, &base_dir)
}

/// A function to parse and validate the text of a descriptor file
///
pub fn parse(
    text: &str,
    format: FileFormat,
    source: &Path,
    base_dir: &Path,
) -> Result<DescriptorSet, SupervisorError> {
    // Parse either syntax into the same document tree
    let root: Value = match format {
        FileFormat::Yaml => serde_yaml::from_str(text)
            .map_err(|error| SupervisorError::config(source, error.to_string()))?,
        FileFormat::Json => serde_json::from_str(text)
            .map_err(|error| SupervisorError::config(source, error.to_string()))?,
    };

    // Find the list of applications
    let entries = match root {
        Value::Mapping(mut mapping) => match mapping.remove("apps") {
            Some(Value::Sequence(apps)) => apps,
            Some(_) => return Err(SupervisorError::config(source, "`apps` must be a list")),
            None => vec![Value::Mapping(mapping)],
        },
        Value::Sequence(apps) => apps,
        Value::Null => return Err(SupervisorError::config(source, "file is empty")),
        _ => {
            return Err(SupervisorError::config(
                source,
                "expected an object with an `apps` list",
            ));
        }
    };
    if entries.is_empty() {
        return Err(SupervisorError::config(source, "no applications defined"));
    }

    // Resolve each application and check the names are unique
    let mut names = FnvHashSet::default();
    let mut apps = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let raw: RawApp = serde_yaml::from_value(entry).map_err(|error| {
            SupervisorError::config(source, format!("application {}: {}", index + 1, error))
        })?;
        let app = resolve(raw, source, base_dir)?;
        if !names.insert(app.name.clone()) {
            return Err(SupervisorError::config(
                source,
                format!("application name '{}' is used more than once", app.name),
            ));
        }
        apps.push(app);
    }

    Ok(DescriptorSet {
        source: source.to_path_buf(),
        apps,
    })
}

/// A helper function to convert one raw application into a descriptor
///
fn resolve(raw: RawApp, source: &Path, base_dir: &Path) -> Result<AppDescriptor, SupervisorError> {
    // Check the required fields
    let name = match raw.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Err(SupervisorError::config(source, "missing required field `name`")),
    };
    let script = match raw.script.as_deref().map(str::trim) {
        Some(script) if !script.is_empty() => script.to_string(),
        _ => {
            return Err(field_error(source, &name, "script", "is required"));
        }
    };

    // Warn about fields that will have no effect
    let mut unsupported: Vec<&String> = raw.unsupported.keys().collect();
    unsupported.sort();
    for field in unsupported {
        warn!("Ignoring unsupported field `{}` for {}.", field, name);
    }

    // Resolve the paths
    let working_directory = match &raw.cwd {
        Some(cwd) => base_dir.join(cwd),
        None => base_dir.to_path_buf(),
    };
    let entrypoint = working_directory.join(&script);
    let runtime_selector = match raw.interpreter.as_deref().map(str::trim) {
        None | Some("") => Interpreter::for_entrypoint(&entrypoint),
        Some("none") => Interpreter::Direct,
        Some(program) if program.contains('/') => {
            Interpreter::Program(working_directory.join(program))
        }
        Some(program) => Interpreter::Program(PathBuf::from(program)),
    };
    let out_file = working_directory.join(
        raw.out_file
            .unwrap_or_else(|| PathBuf::from(format!("logs/{}-out.log", name))),
    );
    let error_file = working_directory.join(
        raw.error_file
            .unwrap_or_else(|| PathBuf::from(format!("logs/{}-error.log", name))),
    );
    let log_file = raw.log_file.map(|file| working_directory.join(file));

    // Convert the arguments and environment
    let args = match raw.args {
        Some(ArgsSetting::List(args)) => args,
        Some(ArgsSetting::Line(line)) => line.split_whitespace().map(String::from).collect(),
        None => Vec::new(),
    };
    let mut env = Vec::new();
    for (key, value) in raw.env.unwrap_or_default() {
        let value = match value {
            Value::String(text) => text,
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            Value::Null => String::new(),
            _ => {
                return Err(field_error(
                    source,
                    &name,
                    "env",
                    &format!("value for {} must be a string, number, or boolean", key),
                ));
            }
        };
        env.push((key, value));
    }
    env.sort();

    // Parse the durations, sizes and formats
    let min_uptime =
        duration_field(source, &name, "min_uptime", raw.min_uptime, DEFAULT_MIN_UPTIME)?;
    let restart_delay =
        duration_field(source, &name, "restart_delay", raw.restart_delay, Duration::ZERO)?;
    let kill_timeout =
        duration_field(source, &name, "kill_timeout", raw.kill_timeout, DEFAULT_KILL_TIMEOUT)?;
    let max_memory_restart = match raw.max_memory_restart {
        Some(setting) => Some(
            setting
                .to_size()
                .map_err(|reason| field_error(source, &name, "max_memory_restart", &reason))?,
        ),
        None => None,
    };
    let log_date_format = match raw.log_date_format {
        Some(pattern) => Some(
            LogDateFormat::parse(&pattern)
                .map_err(|reason| field_error(source, &name, "log_date_format", &reason))?,
        ),
        None => None,
    };

    // Build the watch policy, if requested
    let paths = match raw.watch {
        Some(WatchSetting::Enabled(true)) => vec![working_directory.clone()],
        Some(WatchSetting::Paths(paths)) => paths
            .iter()
            .map(|path| working_directory.join(path))
            .collect(),
        Some(WatchSetting::Path(path)) => vec![working_directory.join(path)],
        Some(WatchSetting::Enabled(false)) | None => Vec::new(),
    };
    let merge_logs = raw.merge_logs.unwrap_or(false);
    let mut app = AppDescriptor {
        name,
        entrypoint,
        runtime_selector,
        working_directory: working_directory.clone(),
        args,
        env,
        autorestart: raw.autorestart.unwrap_or(true),
        watch: None,
        max_restarts: raw.max_restarts.unwrap_or(DEFAULT_MAX_RESTARTS),
        min_uptime,
        max_memory_restart,
        restart_delay,
        kill_timeout,
        log_date_format,
        error_file,
        out_file,
        log_file,
        merge_logs,
    };
    if !paths.is_empty() {
        app.watch = Some(WatchPolicy {
            paths,
            ignore: raw.ignore_watch.unwrap_or_default(),
            root: working_directory,
            sinks: app.sink_files(),
        });
    }
    Ok(app)
}

/// A helper function to parse an optional duration field
///
fn duration_field(
    source: &Path,
    name: &str,
    field: &str,
    setting: Option<DurationSetting>,
    default: Duration,
) -> Result<Duration, SupervisorError> {
    match setting {
        Some(setting) => setting
            .to_duration()
            .map_err(|reason| field_error(source, name, field, &reason)),
        None => Ok(default),
    }
}

/// A helper function to describe a problem with one field of an application
///
fn field_error(source: &Path, name: &str, field: &str, reason: &str) -> SupervisorError {
    SupervisorError::config(source, format!("{}: `{}` {}", name, field, reason))
}

// Tests of the config module
#[cfg(test)]
mod tests {
    use super::*;

    // The descriptor of the telegram bot, in both syntaxes
    const ECOSYSTEM_YAML: &str = "
apps:
  - name: taveirabot-telegram
    script: main.py
    interpreter: .venv/bin/python
    cwd: /home/taveira/repositories/taveirabot-telegram
    autorestart: true
    watch: false
    max_restarts: 5
    min_uptime: 1m
    max_memory_restart: 150M
    log_date_format: YYYY-MM-DD HH:mm:ss
    error_file: logs/error.log
    out_file: logs/out.log
    merge_logs: true
";
    const ECOSYSTEM_JSON: &str = r#"{
  "apps": [{
    "name": "taveirabot-telegram",
    "script": "main.py",
    "interpreter": ".venv/bin/python",
    "cwd": "/home/taveira/repositories/taveirabot-telegram",
    "autorestart": true,
    "watch": false,
    "max_restarts": 5,
    "min_uptime": "1m",
    "max_memory_restart": "150M",
    "log_date_format": "YYYY-MM-DD HH:mm:ss",
    "error_file": "logs/error.log",
    "out_file": "logs/out.log",
    "merge_logs": true
  }]
}"#;

    // A helper function to parse yaml text from a fixed location
    fn parse_yaml(text: &str) -> Result<DescriptorSet, SupervisorError> {
        parse(
            text,
            FileFormat::Yaml,
            Path::new("/srv/ecosystem.yaml"),
            Path::new("/srv"),
        )
    }

    // Parse the bot descriptor
    #[test]
    fn bot_descriptor() {
        let set = parse_yaml(ECOSYSTEM_YAML).unwrap();
        assert_eq!(set.apps.len(), 1);
        let app = set.get("taveirabot-telegram").unwrap();
        let root = PathBuf::from("/home/taveira/repositories/taveirabot-telegram");
        assert_eq!(app.working_directory, root);
        assert_eq!(app.entrypoint, root.join("main.py"));
        assert_eq!(
            app.runtime_selector,
            Interpreter::Program(root.join(".venv/bin/python"))
        );
        assert!(app.autorestart);
        assert_eq!(app.watch, None);
        assert_eq!(app.max_restarts, 5);
        assert_eq!(app.min_uptime, Duration::from_secs(60));
        assert_eq!(app.max_memory_restart, Some(MemorySize(150 << 20)));
        assert_eq!(
            app.log_date_format.as_ref().map(|format| format.chrono_format()),
            Some("%Y-%m-%d %H:%M:%S")
        );
        assert_eq!(app.error_file, root.join("logs/error.log"));
        assert_eq!(app.out_file, root.join("logs/out.log"));
        assert!(app.merge_logs);
        assert_eq!(app.merged_file(), root.join("logs/out.log"));
    }

    // The JSON form gives the same descriptor
    #[test]
    fn json_matches_yaml() {
        let yaml = parse_yaml(ECOSYSTEM_YAML).unwrap();
        let json = parse(
            ECOSYSTEM_JSON,
            FileFormat::Json,
            Path::new("/srv/ecosystem.yaml"),
            Path::new("/srv"),
        )
        .unwrap();
        assert_eq!(yaml, json);
    }

    // Fill in the defaults for a minimal application
    #[test]
    fn defaults() {
        let set = parse_yaml("name: worker\nscript: bin/worker\n").unwrap();
        let app = &set.apps[0];
        assert_eq!(app.working_directory, PathBuf::from("/srv"));
        assert_eq!(app.entrypoint, PathBuf::from("/srv/bin/worker"));
        assert_eq!(app.runtime_selector, Interpreter::Direct);
        assert!(app.autorestart);
        assert_eq!(app.max_restarts, DEFAULT_MAX_RESTARTS);
        assert_eq!(app.min_uptime, DEFAULT_MIN_UPTIME);
        assert_eq!(app.kill_timeout, DEFAULT_KILL_TIMEOUT);
        assert_eq!(app.restart_delay, Duration::ZERO);
        assert_eq!(app.max_memory_restart, None);
        assert_eq!(app.log_date_format, None);
        assert_eq!(app.out_file, PathBuf::from("/srv/logs/worker-out.log"));
        assert_eq!(app.error_file, PathBuf::from("/srv/logs/worker-error.log"));
        assert!(!app.merge_logs);
    }

    // Accept a bare list of applications with the extra fields
    #[test]
    fn list_with_extras() {
        let set = parse_yaml(
            "
- name: api
  script: server.js
  cwd: api
  args: --port 8000 --verbose
  env:
    PORT: 8000
    MODE: production
  watch: [src, config.json]
  ignore_watch: [tmp]
  restart_delay: 2s
  kill_timeout: 5000
- name: job
  script: job.sh
  interpreter: none
  args: [\"--once\"]
",
        )
        .unwrap();
        let api = set.get("api").unwrap();
        assert_eq!(api.working_directory, PathBuf::from("/srv/api"));
        assert_eq!(api.runtime_selector, Interpreter::Program("node".into()));
        assert_eq!(api.args, vec!["--port", "8000", "--verbose"]);
        assert_eq!(
            api.env,
            vec![
                ("MODE".to_string(), "production".to_string()),
                ("PORT".to_string(), "8000".to_string())
            ]
        );
        assert_eq!(api.restart_delay, Duration::from_secs(2));
        assert_eq!(api.kill_timeout, Duration::from_secs(5));
        let watch = api.watch.as_ref().unwrap();
        assert_eq!(
            watch.paths,
            vec![PathBuf::from("/srv/api/src"), PathBuf::from("/srv/api/config.json")]
        );
        assert_eq!(watch.ignore, vec!["tmp"]);
        assert_eq!(watch.sinks, api.sink_files());

        let job = set.get("job").unwrap();
        assert_eq!(job.runtime_selector, Interpreter::Direct);
        assert_eq!(job.args, vec!["--once"]);
    }

    // Report missing and malformed fields
    #[test]
    fn invalid_descriptors() {
        let error = parse_yaml("apps:\n  - script: main.py\n").unwrap_err();
        assert!(error.to_string().contains("missing required field `name`"));

        let error = parse_yaml("apps:\n  - name: bot\n").unwrap_err();
        assert!(error.to_string().contains("bot: `script` is required"));

        let error = parse_yaml("apps:\n  - name: bot\n    script: a.py\n    min_uptime: soon\n")
            .unwrap_err();
        assert!(error.to_string().contains("`min_uptime`"));

        let error =
            parse_yaml("apps:\n  - name: bot\n    script: a.py\n    max_memory_restart: lots\n")
                .unwrap_err();
        assert!(error.to_string().contains("`max_memory_restart`"));

        let error = parse_yaml("apps:\n  - name: bot\n    script: a.py\n    max_restarts: many\n")
            .unwrap_err();
        assert!(matches!(error, SupervisorError::ConfigError { .. }));

        let error = parse_yaml("apps: []\n").unwrap_err();
        assert!(error.to_string().contains("no applications defined"));

        let error = parse_yaml("").unwrap_err();
        assert!(matches!(error, SupervisorError::ConfigError { .. }));

        let error = parse_yaml("apps: [: :\n").unwrap_err();
        assert!(matches!(error, SupervisorError::ConfigError { .. }));
    }

    // Names must be unique within the file
    #[test]
    fn duplicate_names() {
        let error = parse_yaml(
            "apps:\n  - name: bot\n    script: a.py\n  - name: bot\n    script: b.py\n",
        )
        .unwrap_err();
        assert!(error.to_string().contains("'bot' is used more than once"));
    }

    // Restrict a set to one application
    #[test]
    fn only_one_application() {
        let set = parse_yaml(
            "apps:\n  - name: a\n    script: a.py\n  - name: b\n    script: b.py\n",
        )
        .unwrap();
        let only = set.clone().only("b").unwrap();
        assert_eq!(only.apps.len(), 1);
        assert_eq!(only.apps[0].name, "b");
        assert!(set.only("c").is_err());
    }

    // Load a file from disk and resolve against its folder
    #[tokio::test]
    async fn load_from_file() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("ecosystem.json");
        std::fs::write(&path, r#"{"name": "bot", "script": "main.py", "cwd": "bot"}"#).unwrap();
        let set = load(&path).await.unwrap();
        assert_eq!(set.source, path);
        assert_eq!(set.apps[0].working_directory, directory.path().join("bot"));

        let error = load(&directory.path().join("missing.yaml")).await.unwrap_err();
        assert!(error.to_string().contains("unable to read file"));
    }
}
