//! Log files fed by transport reader threads.
//!
//! Both transports render device output through [`render_line`] so shell and
//! serial logs are interchangeable: CRLF becomes LF, stray carriage returns
//! are dropped, bytes that are not UTF-8 are written as lowercase hex, and
//! when timestamps are enabled every line after the first receives an
//! `[<unix-epoch-seconds>] ` prefix.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use super::errors::TransportError;

/// How the reader should open its log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LogPlan {
    path: PathBuf,
    save: bool,
    fresh: bool,
}

impl LogPlan {
    /// Scratch log appended across connections and deleted on disconnect.
    pub(crate) fn scratch(path: PathBuf) -> Self {
        Self {
            path,
            save: false,
            fresh: false,
        }
    }

    /// Operator-requested log: truncated, headed, and kept after disconnect.
    pub(crate) fn saved(path: PathBuf) -> Self {
        Self {
            path,
            save: true,
            fresh: true,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub(crate) fn save(&self) -> bool {
        self.save
    }

    /// Opens the sink described by this plan. A fresh plan truncates the file
    /// and writes `header`; later openings of the same plan append.
    pub(crate) fn open(&mut self, header: &str, echo: bool) -> Result<LogSink, TransportError> {
        let mut options = OpenOptions::new();
        options.create(true);
        if self.fresh {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let mut file = options
            .open(&self.path)
            .map_err(|source| TransportError::Log {
                path: self.path.clone(),
                source,
            })?;
        if self.fresh {
            writeln!(file, "{header}")
                .and_then(|()| file.flush())
                .map_err(|source| TransportError::Log {
                    path: self.path.clone(),
                    source,
                })?;
            self.fresh = false;
        }
        Ok(LogSink {
            file,
            first_line: true,
            echo,
        })
    }
}

/// Sink shared by a reader thread and operator notes.
pub(crate) type SharedSink = Arc<Mutex<LogSink>>;

/// Locks a shared sink. A panic in another writer leaves the file usable, so
/// poisoning is ignored.
pub(crate) fn lock_sink(sink: &SharedSink) -> MutexGuard<'_, LogSink> {
    sink.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Append-only log writer.
#[derive(Debug)]
pub(crate) struct LogSink {
    file: File,
    first_line: bool,
    echo: bool,
}

impl LogSink {
    /// Renders and appends one device line, flushing immediately so operators
    /// can tail the log while the device is talking.
    pub(crate) fn write_line(&mut self, raw: &[u8], timestamp: bool) -> io::Result<()> {
        let stamp = (timestamp && !self.first_line).then(SystemTime::now);
        let rendered = render_line(raw, stamp);
        self.first_line = false;
        self.file.write_all(rendered.as_bytes())?;
        self.file.flush()?;
        if self.echo {
            let mut stdout = io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            stdout.flush()?;
        }
        Ok(())
    }
}

/// Renders a raw device line in the shared log format.
pub(crate) fn render_line(raw: &[u8], stamp: Option<SystemTime>) -> String {
    let body = raw.strip_suffix(b"\n").unwrap_or(raw);
    let text = match std::str::from_utf8(body) {
        Ok(text) => text.replace("\r\n", "\n").replace('\r', ""),
        Err(_) => hex::encode(body),
    };
    let mut line = match stamp {
        Some(at) => format!("[{}] ", epoch_seconds(at)),
        None => String::new(),
    };
    line.push_str(&text);
    line.push('\n');
    line
}

/// Seconds since the epoch with at least one fractional digit, so whole
/// seconds read `1700000000.0` rather than `1700000000`.
fn epoch_seconds(at: SystemTime) -> String {
    let seconds = at
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        .to_string();
    if seconds.contains('.') {
        seconds
    } else {
        format!("{seconds}.0")
    }
}
