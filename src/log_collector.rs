//! Disk-backed logging pipeline for the panel.
//!
//! Every `log::*!` call and every log line streamed from the managed server
//! goes through one `LogCollector`:
//!
//! ```text
//! log::info!(..)          event channel `log` frames
//!       |                  (target: "server")
//!       +--------+---------+
//!                |
//!         [LogCollector]  crossbeam unbounded queue
//!                |
//!         background thread
//!          |           |
//!   logs/full/     logs/server/      (server lines only)
//!   <ts>_full.log  <ts>_server.log
//!          |
//!   console channel (try_send, may drop; disk never does)
//! ```

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Log target used for lines that originate from the managed server.
pub const SERVER_TARGET: &str = "server";

enum LogMessage {
    Line(LogLine),
    /// Flush marker; the sender is signalled once everything before it is on disk
    Flush(std::sync::mpsc::Sender<()>),
}

/// Which stream a line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    Panel,
    Server,
}

/// A log line with metadata
#[derive(Clone, Debug)]
pub struct LogLine {
    pub message: String,
    pub level: Level,
    pub source: LogSource,
    /// HH:MM:SS.mmm
    pub timestamp: String,
}

impl LogLine {
    pub fn new(message: impl Into<String>, level: Level, source: LogSource) -> Self {
        LogLine {
            message: message.into(),
            level,
            source,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    fn formatted(&self) -> String {
        format!("[{}] [{}] {}\n", self.timestamp, self.level, self.message)
    }
}

/// Map a level name from the server (`info`, `success`, `warning`, `error`) to a log level.
pub fn level_from_server(level: &str) -> Level {
    match level.trim().to_lowercase().as_str() {
        "error" | "critical" => Level::Error,
        "warning" | "warn" => Level::Warn,
        "debug" => Level::Debug,
        _ => Level::Info,
    }
}

/// Unified logger: disk persistence plus a best-effort console feed.
#[derive(Clone)]
pub struct LogCollector {
    tx: Sender<LogMessage>,
    full_log_path: PathBuf,
    server_log_path: PathBuf,
    max_level: LevelFilter,
}

impl LogCollector {
    /// Create the log directories and session files and start the writer thread.
    pub fn new(
        log_dir: &Path,
        console_tx: tokio::sync::mpsc::Sender<LogLine>,
        max_level: LevelFilter,
    ) -> Result<Self, String> {
        let full_dir = log_dir.join("full");
        let server_dir = log_dir.join("server");
        std::fs::create_dir_all(&full_dir).map_err(|e| format!("Failed to create full log dir: {}", e))?;
        std::fs::create_dir_all(&server_dir).map_err(|e| format!("Failed to create server log dir: {}", e))?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let full_log_path = full_dir.join(format!("{}_full.log", stamp));
        let server_log_path = server_dir.join(format!("{}_server.log", stamp));

        let mut full_file = open_append(&full_log_path)?;
        let mut server_file = open_append(&server_log_path)?;

        let (tx, rx) = unbounded::<LogMessage>();

        // OS thread, not a tokio task: logging must keep working outside the runtime
        std::thread::spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        let formatted = line.formatted();
                        let _ = full_file.write_all(formatted.as_bytes());
                        if line.source == LogSource::Server {
                            let _ = server_file.write_all(formatted.as_bytes());
                        }
                        // Console is bounded; disk has already been written
                        let _ = console_tx.try_send(line);
                    }
                    LogMessage::Flush(done) => {
                        let _ = full_file.flush();
                        let _ = server_file.flush();
                        let _ = full_file.sync_all();
                        let _ = server_file.sync_all();
                        let _ = done.send(());
                    }
                }
            }
        });

        Ok(LogCollector {
            tx,
            full_log_path,
            server_log_path,
            max_level,
        })
    }

    pub fn full_log_path(&self) -> &Path {
        &self.full_log_path
    }

    pub fn server_log_path(&self) -> &Path {
        &self.server_log_path
    }

    /// Queue a line. Never blocks.
    pub fn push(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    /// Wait until every line queued before this call is on disk.
    pub async fn wait_for_empty(&self) -> Result<(), String> {
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(done_tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;

        tokio::task::spawn_blocking(move || done_rx.recv())
            .await
            .map_err(|e| format!("Flush wait failed: {}", e))?
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }
}

fn open_append(path: &Path) -> Result<File, String> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))
}

/// Wires `log::info!()` and friends into the collector.
impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let source = if record.target() == SERVER_TARGET {
            LogSource::Server
        } else {
            LogSource::Panel
        };
        self.push(LogLine::new(record.args().to_string(), record.level(), source));
    }

    fn flush(&self) {}
}
