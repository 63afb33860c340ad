//! Folder queue and the run orchestrator
//!
//! A [`FolderQueue`] is owned by the front end and survives runs. Starting a
//! run hands a snapshot of it to a single worker thread, which walks the
//! folders in order and talks back only through [`RunEvent`]s.

use crate::{
    config::{AnimationConfig, OutputLayout, ProcessingConfig},
    error::{BgBatchError, Result},
    inference::SessionFactory,
    pipeline::{AnimationPipeline, AnimationReport, FolderPipeline, FolderReport},
    processor::CutoutProcessor,
    services::{ChannelProgressReporter, ImageIOService, ProgressReporter, RunEvent},
};
use serde::Serialize;
use std::fs;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// Why a folder was not added to the queue
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("no supported images in {}", .0.display())]
    NoImages(PathBuf),
    #[error("already queued: {}", .0.display())]
    Duplicate(PathBuf),
}

/// Ordered list of source folders
#[derive(Debug, Clone, Default)]
pub struct FolderQueue {
    entries: Vec<PathBuf>,
}

impl FolderQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a folder, stored as an absolute path
    ///
    /// # Errors
    /// - The path is not a directory
    /// - The directory holds no supported image files
    /// - The folder is already queued
    pub fn add<P: AsRef<Path>>(&mut self, folder: P) -> std::result::Result<(), Rejection> {
        let folder = folder.as_ref();
        if !folder.is_dir() {
            return Err(Rejection::NotADirectory(folder.to_path_buf()));
        }
        let absolute = fs::canonicalize(folder).unwrap_or_else(|_| folder.to_path_buf());
        if self.entries.contains(&absolute) {
            return Err(Rejection::Duplicate(absolute));
        }
        if !ImageIOService::has_image_files(&absolute) {
            return Err(Rejection::NoImages(absolute));
        }
        tracing::debug!(folder = %absolute.display(), "folder queued");
        self.entries.push(absolute);
        Ok(())
    }

    /// Add several folders, returning the rejections
    pub fn add_all<I, P>(&mut self, folders: I) -> Vec<Rejection>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        folders
            .into_iter()
            .filter_map(|folder| self.add(folder).err())
            .collect()
    }

    /// Remove the entry at `index`, if any
    pub fn remove(&mut self, index: usize) -> Option<PathBuf> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Which pipeline a run drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Removal,
    Animation,
}

/// A folder that was reported and passed over without aborting the queue
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFolder {
    pub source: PathBuf,
    pub reason: String,
}

/// Outcome of a whole queue run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub kind: RunKind,
    pub total_folders: usize,
    pub folders: Vec<FolderReport>,
    pub animations: Vec<AnimationReport>,
    pub skipped: Vec<SkippedFolder>,
    /// Error that stopped the remaining queue
    pub aborted: Option<String>,
}

impl RunSummary {
    fn new(kind: RunKind, total_folders: usize) -> Self {
        Self {
            kind,
            total_folders,
            folders: Vec::new(),
            animations: Vec::new(),
            skipped: Vec::new(),
            aborted: None,
        }
    }

    /// Folders whose pipeline finished
    #[must_use]
    pub fn completed(&self) -> usize {
        self.folders.len() + self.animations.len()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.aborted.is_none()
    }
}

/// A started run
///
/// Drain [`RunHandle::events`] until it closes; the last event is always
/// [`RunEvent::Finished`]. A worker panic is reported as
/// [`RunEvent::Failed`] followed by an aborted summary.
pub struct RunHandle {
    pub events: UnboundedReceiver<RunEvent>,
    worker: JoinHandle<()>,
}

impl RunHandle {
    /// Wait for the worker thread to exit
    ///
    /// # Errors
    /// - The worker thread died outside the queue loop
    pub fn join(self) -> Result<()> {
        self.worker
            .join()
            .map_err(|_| BgBatchError::internal("run worker panicked"))
    }
}

/// Clears the run-state flag when the worker exits, however it exits
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum FolderOutcome {
    Removal(FolderReport),
    Animation(AnimationReport),
}

/// Starts queue runs on a worker thread, one at a time
///
/// Removal and animation runs share the same run-state flag.
pub struct BatchRunner {
    running: Arc<AtomicBool>,
    factory: Arc<dyn SessionFactory>,
    processor: Arc<CutoutProcessor>,
    layout: OutputLayout,
}

impl BatchRunner {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        processor: Arc<CutoutProcessor>,
        layout: OutputLayout,
    ) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            factory,
            processor,
            layout,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Remove backgrounds from every queued folder
    ///
    /// # Errors
    /// - Empty queue or invalid configuration
    /// - Another run is still active
    /// - The worker thread could not be spawned
    pub fn start_removal(&self, queue: &FolderQueue, config: ProcessingConfig) -> Result<RunHandle> {
        Self::check_queue(queue)?;
        config.validate()?;
        let factory = Arc::clone(&self.factory);
        let processor = Arc::clone(&self.processor);
        let layout = self.layout.clone();

        self.spawn(queue, RunKind::Removal, move |folder, reporter| {
            FolderPipeline::new(factory.as_ref(), &processor, &layout)
                .run(folder, &config, reporter)
                .map(FolderOutcome::Removal)
        })
    }

    /// Build one animation per queued folder
    ///
    /// # Errors
    /// - Empty queue or invalid configuration
    /// - Another run is still active
    /// - The worker thread could not be spawned
    pub fn start_animation(&self, queue: &FolderQueue, config: AnimationConfig) -> Result<RunHandle> {
        Self::check_queue(queue)?;
        config.validate()?;
        let layout = self.layout.clone();

        self.spawn(queue, RunKind::Animation, move |folder, reporter| {
            AnimationPipeline::new(&layout)
                .run(folder, &config, reporter)
                .map(FolderOutcome::Animation)
        })
    }

    fn check_queue(queue: &FolderQueue) -> Result<()> {
        if queue.is_empty() {
            return Err(BgBatchError::validation(
                "the folder queue is empty; add folders first",
            ));
        }
        Ok(())
    }

    fn spawn<F>(&self, queue: &FolderQueue, kind: RunKind, step: F) -> Result<RunHandle>
    where
        F: FnMut(&Path, &dyn ProgressReporter) -> Result<FolderOutcome> + Send + 'static,
    {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| BgBatchError::RunInProgress)?;
        let guard = RunGuard(Arc::clone(&self.running));

        let folders = queue.entries().to_vec();
        let (sender, events) = unbounded_channel();
        let reporter = ChannelProgressReporter::new(sender);

        let worker = std::thread::Builder::new()
            .name("bgbatch-worker".to_string())
            .spawn(move || {
                let _guard = guard;
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    drive_queue(&folders, kind, &reporter, step)
                }));
                let summary = outcome.unwrap_or_else(|payload| {
                    let message = format!("worker panicked: {}", panic_message(payload.as_ref()));
                    tracing::error!(error = %message, "queue aborted");
                    reporter.report(RunEvent::Failed(message.clone()));
                    let mut summary = RunSummary::new(kind, folders.len());
                    summary.aborted = Some(message);
                    summary
                });
                reporter.report(RunEvent::Finished(summary));
            })
            .map_err(|e| BgBatchError::internal(format!("failed to spawn worker thread: {e}")))?;

        Ok(RunHandle { events, worker })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Walk the folders in order, reporting coarse progress between them
fn drive_queue<F>(
    folders: &[PathBuf],
    kind: RunKind,
    reporter: &dyn ProgressReporter,
    mut step: F,
) -> RunSummary
where
    F: FnMut(&Path, &dyn ProgressReporter) -> Result<FolderOutcome>,
{
    let total = folders.len();
    let span = tracing::info_span!("run", kind = ?kind, folders = total);
    let _guard = span.enter();
    let mut summary = RunSummary::new(kind, total);
    reporter.info(format!("Starting queue of {total} folders"));

    for (index, folder) in folders.iter().enumerate() {
        let name = ImageIOService::folder_name(folder);
        reporter.info(format!("[{}/{total}] Processing: {name}", index + 1));
        reporter.report(RunEvent::QueueProgress {
            index,
            total,
            percent: index as f64 / total as f64 * 100.0,
        });

        match step(folder, reporter) {
            Ok(FolderOutcome::Removal(report)) => {
                summary.folders.push(report.clone());
                reporter.report(RunEvent::FolderFinished(report));
            },
            Ok(FolderOutcome::Animation(report)) => {
                summary.animations.push(report.clone());
                reporter.report(RunEvent::AnimationFinished(report));
            },
            Err(e) if kind == RunKind::Animation && e.is_validation() => {
                reporter.error(format!("[{}/{total}] Skipped {name}: {e}", index + 1));
                summary.skipped.push(SkippedFolder {
                    source: folder.clone(),
                    reason: e.to_string(),
                });
                continue;
            },
            Err(e) => {
                tracing::error!(folder = %folder.display(), error = %e, "queue aborted");
                let message = format!("{name}: {e}");
                summary.aborted = Some(message.clone());
                reporter.report(RunEvent::Failed(message));
                return summary;
            },
        }
        reporter.info(format!("[{}/{total}] Done: {name}", index + 1));
    }

    reporter.report(RunEvent::QueueProgress {
        index: total,
        total,
        percent: 100.0,
    });
    reporter.info(format!(
        "Queue finished: {} of {total} folders",
        summary.completed()
    ));
    summary
}
