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

//! A module to persist the output of supervised processes.
//!
//! Each instance owns one log sink for its whole life, so the sink files stay
//! open across restarts. Lines from stdout and stderr are read by one task per
//! stream and passed to a single writer task, which keeps merged output in
//! arrival order.

// Import crate definitions
use crate::definitions::*;

// Import standard library features
use std::path::Path;
use std::time::Duration;

// Import tokio features
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

// Import tracing features
use tracing::warn;

// Define module constants
const LINE_BUFFER: usize = 1024; // lines waiting to be written
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500); // time allowed to read the remaining output
const SUPERVISOR_TAG: &str = "[overseer]"; // marks lines written by the supervisor itself

/// The source of a log line
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Out,
    Err,
    Supervisor,
}

/// A single line of output waiting to be written
///
#[derive(Clone, Debug)]
struct LogLine {
    stream: Stream,
    text: String,
}

/// The open files of a sink
///
enum Targets {
    Merged(File),
    Split { out: File, err: File },
}

// Implement the file selection
impl Targets {
    /// A method to return the file for a stream
    ///
    fn file_for(&mut self, stream: Stream) -> &mut File {
        match self {
            Targets::Merged(file) => file,
            Targets::Split { out, .. } if stream == Stream::Out => out,
            Targets::Split { err, .. } => err,
        }
    }
}

/// The reader tasks attached to one process
///
pub struct StreamReaders {
    handles: Vec<JoinHandle<()>>,
}

// Implement the reader shutdown
impl StreamReaders {
    /// A method to wait for the remaining output of an exited process
    ///
    /// Readers still running after the drain timeout are aborted, which
    /// happens when a descendant of the process keeps the pipes open.
    ///
    pub async fn finish(self) {
        for handle in self.handles {
            let abort = handle.abort_handle();
            if timeout(DRAIN_TIMEOUT, handle).await.is_err() {
                abort.abort();
            }
        }
    }
}

/// A structure to write the output of one application to its sink files
///
pub struct LogSink {
    line_send: mpsc::Sender<LogLine>, // the line to pass output to the writer
    writer: JoinHandle<()>,           // the writer task
}

// Implement the key features of the log sink
impl LogSink {
    /// A function to open the sink files of an application
    ///
    /// # Errors
    ///
    /// Returns a launch error if a sink folder cannot be created or a sink
    /// file cannot be opened for appending.
    ///
    pub async fn open(app: &AppDescriptor) -> Result<LogSink, SupervisorError> {
        // Open the files in append mode
        let targets = if app.merge_logs {
            Targets::Merged(open_file(app, app.merged_file()).await?)
        } else {
            Targets::Split {
                out: open_file(app, &app.out_file).await?,
                err: open_file(app, &app.error_file).await?,
            }
        };

        // Spawn the writer
        let (line_send, line_receive) = mpsc::channel(LINE_BUFFER);
        let writer = tokio::spawn(write_lines(
            targets,
            app.log_date_format.clone(),
            line_receive,
        ));
        Ok(LogSink { line_send, writer })
    }

    /// A method to redirect the stdout and stderr of a child to the sink
    ///
    pub fn attach(&self, child: &mut Child) -> StreamReaders {
        let mut handles = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            handles.push(tokio::spawn(read_lines(stdout, Stream::Out, self.line_send.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            handles.push(tokio::spawn(read_lines(stderr, Stream::Err, self.line_send.clone())));
        }
        StreamReaders { handles }
    }

    /// A method to record a supervisor message in the sink
    ///
    pub async fn supervisor(&self, message: &str) {
        let line = LogLine {
            stream: Stream::Supervisor,
            text: format!("{} {}", SUPERVISOR_TAG, message),
        };
        if let Err(mpsc::error::SendError(line)) = self.line_send.send(line).await {
            warn!("Log writer has stopped, dropped line: {}", line.text);
        }
    }

    /// A method to write any remaining lines and close the files
    ///
    pub async fn close(self) {
        let LogSink { line_send, writer } = self;
        drop(line_send);
        let abort = writer.abort_handle();
        if timeout(DRAIN_TIMEOUT, writer).await.is_err() {
            warn!("Log writer did not finish in time.");
            abort.abort();
        }
    }
}

/// A helper function to open one sink file, creating its folder
///
async fn open_file(app: &AppDescriptor, path: &Path) -> Result<File, SupervisorError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|error| {
            SupervisorError::launch(
                &app.name,
                format!("unable to create log folder {}: {}", parent.display(), error),
            )
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|error| {
            SupervisorError::launch(
                &app.name,
                format!("unable to open log file {}: {}", path.display(), error),
            )
        })
}

/// A helper function to read the lines of one stream
///
async fn read_lines<R>(reader: R, stream: Stream, line_send: mpsc::Sender<LogLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            // The stream has closed
            Ok(0) | Err(_) => break,

            // Pass the line on without its line ending
            Ok(_) => {
                while matches!(buffer.last(), Some(b'\n') | Some(b'\r')) {
                    buffer.pop();
                }
                let text = String::from_utf8_lossy(&buffer).into_owned();
                if line_send.send(LogLine { stream, text }).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// A helper function to write lines until every sender is gone
///
async fn write_lines(
    mut targets: Targets,
    date_format: Option<LogDateFormat>,
    mut line_receive: mpsc::Receiver<LogLine>,
) {
    while let Some(line) = line_receive.recv().await {
        // Compose the line
        let mut text = String::new();
        if let Some(format) = &date_format {
            text.push_str(&format.now());
            text.push_str(": ");
        }
        text.push_str(&line.text);
        text.push('\n');

        // Write it straight through
        let file = targets.file_for(line.stream);
        if let Err(error) = file.write_all(text.as_bytes()).await {
            warn!("Unable to write to log file: {}.", error);
        } else if let Err(error) = file.flush().await {
            warn!("Unable to flush log file: {}.", error);
        }
    }
}
