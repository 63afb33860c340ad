//! Run events and progress reporting
//!
//! Workers never touch the front end directly. Everything they want to show
//! (log lines, progress, results, the matting install prompt) is sent as a
//! [`RunEvent`] through a [`ProgressReporter`], which lets the CLI, tests and
//! any other front end handle the same stream.

use crate::pipeline::{AnimationReport, FolderReport};
use crate::queue::RunSummary;
use chrono::{DateTime, Local};
use std::sync::mpsc::{sync_channel, SyncSender};
use tokio::sync::mpsc::UnboundedSender;

/// Severity of a user-facing log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A timestamped user-facing log line
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn now<S: Into<String>>(level: LogLevel, message: S) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            message: message.into(),
        }
    }

    /// `[HH:MM:SS] message`
    #[must_use]
    pub fn format_line(&self) -> String {
        format!("[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Question sent to the front end when an optional dependency is missing
///
/// The worker blocks until [`InstallRequest::respond`] is called; dropping
/// the request unanswered counts as a decline.
pub struct InstallRequest {
    pub dependency: String,
    reply: SyncSender<bool>,
}

impl InstallRequest {
    pub fn respond(self, install: bool) {
        let _ = self.reply.send(install);
    }
}

impl std::fmt::Debug for InstallRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallRequest")
            .field("dependency", &self.dependency)
            .finish_non_exhaustive()
    }
}

/// Events emitted by a queue run
#[derive(Debug)]
pub enum RunEvent {
    Log(LogEntry),
    /// Coarse progress, sent before each folder and once with 100% at the end
    QueueProgress {
        index: usize,
        total: usize,
        percent: f64,
    },
    /// Fine progress inside the current folder
    FolderProgress { processed: usize, total: usize },
    FolderFinished(FolderReport),
    AnimationFinished(AnimationReport),
    InstallRequested(InstallRequest),
    /// A fatal error that aborted the remaining queue
    Failed(String),
    /// Sent exactly once when the worker is done
    Finished(RunSummary),
}

/// Receives run events from pipelines and workers
pub trait ProgressReporter: Send + Sync {
    /// Deliver an event
    fn report(&self, event: RunEvent);

    /// Emit a user-facing log line, mirrored to tracing
    fn log(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
        self.report(RunEvent::Log(LogEntry::now(level, message)));
    }

    fn info(&self, message: String) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: String) {
        self.log(LogLevel::Warn, message);
    }

    fn error(&self, message: String) {
        self.log(LogLevel::Error, message);
    }

    /// Ask whether `dependency` should be installed, blocking for the answer
    fn request_install(&self, dependency: &str) -> bool {
        let _ = dependency;
        false
    }
}

/// No-op progress reporter that discards all events and declines installs
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report(&self, _event: RunEvent) {
        // Intentionally empty - discards events
    }
}

/// Forwards events over an unbounded channel to a front end
#[derive(Debug, Clone)]
pub struct ChannelProgressReporter {
    sender: UnboundedSender<RunEvent>,
}

impl ChannelProgressReporter {
    #[must_use]
    pub fn new(sender: UnboundedSender<RunEvent>) -> Self {
        Self { sender }
    }
}

impl ProgressReporter for ChannelProgressReporter {
    fn report(&self, event: RunEvent) {
        // A closed receiver means nobody is listening any more
        let _ = self.sender.send(event);
    }

    fn request_install(&self, dependency: &str) -> bool {
        let (reply, answer) = sync_channel(1);
        let request = InstallRequest {
            dependency: dependency.to_string(),
            reply,
        };
        if self.sender.send(RunEvent::InstallRequested(request)).is_err() {
            return false;
        }
        answer.recv().unwrap_or(false)
    }
}
