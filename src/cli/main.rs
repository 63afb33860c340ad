//! Batch background removal CLI
//!
//! Queues the given folders, starts one run on the worker thread and renders
//! its event stream: `[HH:MM:SS]` log lines, a queue bar and a per-folder bar.

use super::config::CliConfigBuilder;
use crate::{
    config::DEFAULT_MODEL,
    error::BgBatchError,
    inference::SessionFactory,
    matting::default_matting_engine,
    models::{ModelStore, SegmentationModel},
    processor::CutoutProcessor,
    queue::{BatchRunner, FolderQueue, RunHandle, RunSummary},
    services::RunEvent,
    tracing_config::{init_cli_tracing, spans, TracingFormat},
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Instrument;

/// Exit status after a confirmed interrupt
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Batch background removal and frame animation for image folders
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgbatch")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (-v: INFO, -vv: DEBUG, -vvv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Parent folder of transparent/ and animation/ [default: next to the executable]
    #[arg(long, value_name = "DIR", global = true)]
    pub output_root: Option<PathBuf>,

    /// Print the run summary (or model list) as JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Diagnostic log format on stderr
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console, global = true)]
    pub log_format: CliLogFormat,
}

#[derive(Subcommand)]
pub enum Command {
    /// Remove backgrounds from every image in the given folders
    Remove(RemoveArgs),
    /// Build one looping animation per folder
    Animate(AnimateArgs),
    /// List segmentation models and whether they are downloaded
    Models,
    /// Download a model into the model directory
    Download {
        /// Model identifier, e.g. u2netp or isnet-general-use
        model: String,
    },
}

/// Arguments of `bgbatch remove`
#[derive(Args)]
#[allow(clippy::struct_excessive_bools)]
pub struct RemoveArgs {
    /// Folders to queue; non-folders and folders without images are skipped
    #[arg(value_name = "DIR", required = true)]
    pub folders: Vec<PathBuf>,

    /// Segmentation model identifier
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Refine edges with trimap-based alpha matting
    #[arg(long)]
    pub alpha_matting: bool,

    /// Matting foreground threshold on the 0-255 mask scale
    #[arg(long, default_value_t = 270, allow_negative_numbers = true)]
    pub foreground_threshold: i64,

    /// Matting background threshold on the 0-255 mask scale
    #[arg(long, default_value_t = 10, allow_negative_numbers = true)]
    pub background_threshold: i64,

    /// Matting erosion radius in pixels
    #[arg(long, default_value_t = 10, allow_negative_numbers = true)]
    pub erode_size: i64,

    /// Resize outputs to the given bounds
    #[arg(long)]
    pub resize: bool,

    /// Resize width bound
    #[arg(long, default_value_t = 1024)]
    pub width: u32,

    /// Resize height bound
    #[arg(long, default_value_t = 768)]
    pub height: u32,

    /// Stretch to exactly width x height instead of fitting inside
    #[arg(long)]
    pub no_keep_aspect: bool,

    /// ONNX Runtime execution provider
    #[arg(short, long, value_enum, default_value_t = CliExecutionProvider::Auto)]
    pub execution_provider: CliExecutionProvider,
}

/// Arguments of `bgbatch animate`
#[derive(Args)]
pub struct AnimateArgs {
    /// Folders of frames to queue
    #[arg(value_name = "DIR", required = true)]
    pub folders: Vec<PathBuf>,

    /// Animation container
    #[arg(short, long, value_enum, default_value_t = CliAnimationFormat::Webp)]
    pub format: CliAnimationFormat,

    /// Frame duration in milliseconds
    #[arg(short, long, default_value_t = 100)]
    pub duration: u32,

    /// Play once instead of looping forever
    #[arg(long)]
    pub no_loop: bool,

    /// Encoder quality (1-100)
    #[arg(short, long, default_value_t = 80)]
    pub quality: u8,

    /// Keep frames at their own size and let them stack
    #[arg(long)]
    pub no_ghost_prevention: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliAnimationFormat {
    Webp,
    Gif,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliExecutionProvider {
    Auto,
    Cpu,
    Cuda,
    Coreml,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

impl From<CliLogFormat> for TracingFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Console => Self::Console,
            CliLogFormat::Compact => Self::Compact,
            #[cfg(feature = "tracing-json")]
            CliLogFormat::Json => Self::Json,
        }
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let session_id = init_cli_tracing(cli.verbose, cli.log_format.into())
        .context("Failed to initialize tracing")?;
    let command_name = match &cli.command {
        Command::Remove(_) => "remove",
        Command::Animate(_) => "animate",
        Command::Models => "models",
        Command::Download { .. } => "download",
    };
    run_command(&cli)
        .instrument(spans::session(&session_id, command_name))
        .await
}

async fn run_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Remove(args) => {
            let config = CliConfigBuilder::processing(args)?;
            let queue = build_queue(&args.folders);
            let provider = CliConfigBuilder::execution_provider(args.execution_provider);
            let runner = build_runner(cli, provider)?;
            let handle = runner
                .start_removal(&queue, config)
                .context("Could not start background removal")?;
            finish_run(handle, cli.json).await
        },
        Command::Animate(args) => {
            let config = CliConfigBuilder::animation(args)?;
            let queue = build_queue(&args.folders);
            let runner = build_runner(cli, crate::config::ExecutionProvider::Auto)?;
            let handle = runner
                .start_animation(&queue, config)
                .context("Could not start animation run")?;
            finish_run(handle, cli.json).await
        },
        Command::Models => list_models(cli.json),
        Command::Download { model } => download_model(model).await,
    }
}

/// Queue every argument, reporting rejected ones without stopping
fn build_queue(folders: &[PathBuf]) -> FolderQueue {
    let mut queue = FolderQueue::new();
    for rejection in queue.add_all(folders) {
        eprintln!("Skipped: {rejection}");
    }
    queue
}

fn build_runner(
    cli: &Cli,
    execution_provider: crate::config::ExecutionProvider,
) -> Result<BatchRunner> {
    let factory = session_factory(execution_provider)?;
    let processor = Arc::new(CutoutProcessor::new(default_matting_engine()));
    let layout = CliConfigBuilder::output_layout(cli);
    tracing::debug!(root = %layout.root().display(), "output layout");
    Ok(BatchRunner::new(factory, processor, layout))
}

#[cfg(feature = "onnx")]
fn session_factory(
    execution_provider: crate::config::ExecutionProvider,
) -> Result<Arc<dyn SessionFactory>> {
    let store = ModelStore::from_env()?;
    Ok(Arc::new(crate::backends::OnnxSessionFactory::new(
        store,
        execution_provider,
    )))
}

#[cfg(not(feature = "onnx"))]
fn session_factory(
    _execution_provider: crate::config::ExecutionProvider,
) -> Result<Arc<dyn SessionFactory>> {
    struct NoBackend;

    impl SessionFactory for NoBackend {
        fn create_session(
            &self,
            _model: SegmentationModel,
        ) -> crate::error::Result<Box<dyn crate::inference::SegmentationSession>> {
            Err(BgBatchError::model(
                "built without an inference backend; rebuild with --features onnx",
            ))
        }
    }

    Ok(Arc::new(NoBackend))
}

/// Progress display for one run
struct RunDisplay {
    multi: MultiProgress,
    queue_bar: ProgressBar,
    folder_bar: ProgressBar,
}

impl RunDisplay {
    fn new(quiet: bool) -> Self {
        let multi = if quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        let queue_bar = multi.add(ProgressBar::new(0).with_style(style.clone()));
        queue_bar.set_message("folders");
        let folder_bar = multi.add(ProgressBar::new(0).with_style(style));
        folder_bar.set_message("files");
        Self {
            multi,
            queue_bar,
            folder_bar,
        }
    }

    fn print(&self, line: &str) {
        if self.multi.is_hidden() || self.multi.println(line).is_err() {
            eprintln!("{line}");
        }
    }

    /// Ask a yes/no question with the bars hidden; anything but y/yes is no
    fn confirm(&self, question: &str) -> bool {
        tokio::task::block_in_place(|| self.multi.suspend(|| prompt_yes_no(question)))
    }

    fn finish(&self) {
        self.folder_bar.finish_and_clear();
        self.queue_bar.finish_and_clear();
    }
}

fn prompt_yes_no(question: &str) -> bool {
    eprint!("{question} [y/N] ");
    let _ = io::stderr().flush();
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Render events until the worker finishes, then print the summary
async fn finish_run(mut handle: RunHandle, json: bool) -> Result<()> {
    let display = RunDisplay::new(json);
    let mut summary: Option<RunSummary> = None;

    loop {
        tokio::select! {
            event = handle.events.recv() => match event {
                Some(event) => handle_event(&display, event, &mut summary),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if display.confirm("A run is in progress. Quit anyway? Unfinished work is lost.") {
                    display.finish();
                    eprintln!("Interrupted");
                    std::process::exit(INTERRUPTED_EXIT_CODE);
                }
            }
        }
    }

    display.finish();
    tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("Worker join task failed")??;

    let summary = summary.context("Run ended without a summary")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    match &summary.aborted {
        Some(reason) => Err(anyhow::anyhow!("Queue aborted: {reason}")),
        None => Ok(()),
    }
}

fn handle_event(display: &RunDisplay, event: RunEvent, summary: &mut Option<RunSummary>) {
    match event {
        RunEvent::Log(entry) => display.print(&entry.format_line()),
        RunEvent::QueueProgress { index, total, .. } => {
            display.queue_bar.set_length(total as u64);
            display.queue_bar.set_position(index as u64);
            display.folder_bar.set_position(0);
        },
        RunEvent::FolderProgress { processed, total } => {
            display.folder_bar.set_length(total as u64);
            display.folder_bar.set_position(processed as u64);
        },
        RunEvent::FolderFinished(report) => {
            tracing::debug!(source = %report.source.display(), "folder report received");
        },
        RunEvent::AnimationFinished(report) => {
            tracing::debug!(output = %report.output.display(), "animation report received");
        },
        RunEvent::InstallRequested(request) => {
            let question = format!(
                "The '{}' engine is not available. Install it now?",
                request.dependency
            );
            let install = display.confirm(&question);
            request.respond(install);
        },
        RunEvent::Failed(message) => {
            display.print(&format!("Queue processing error: {message}"));
        },
        RunEvent::Finished(run_summary) => {
            *summary = Some(run_summary);
        },
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    for report in &summary.folders {
        match &report.output_dir {
            Some(dir) => println!(
                "{}: {} succeeded, {} failed -> {}",
                report.source.display(),
                report.succeeded,
                report.failed,
                dir.display()
            ),
            None => println!("{}: no images", report.source.display()),
        }
    }
    for report in &summary.animations {
        println!(
            "{}: {} frames ({}x{}) -> {}",
            report.source.display(),
            report.frames,
            report.canvas_width,
            report.canvas_height,
            report.output.display()
        );
    }
    for skipped in &summary.skipped {
        println!("{}: skipped ({})", skipped.source.display(), skipped.reason);
    }
    println!(
        "{} of {} folders completed",
        summary.completed(),
        summary.total_folders
    );
}

fn list_models(json: bool) -> Result<()> {
    let store = ModelStore::from_env()?;
    let models = store.list();

    if json {
        let entries: Vec<serde_json::Value> = models
            .iter()
            .map(|(model, cached)| {
                serde_json::json!({
                    "id": model.id(),
                    "description": model.description(),
                    "cached": cached,
                    "path": store.model_path(*model),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("Model directory: {}", store.dir().display());
    for (model, cached) in &models {
        let marker = if *cached { "cached" } else { "-" };
        let default = if model.id() == DEFAULT_MODEL {
            " (default)"
        } else {
            ""
        };
        println!("  {:<18} {:<8} {}{default}", model.id(), marker, model.description());
    }

    #[cfg(feature = "onnx")]
    {
        println!("\nExecution providers:");
        for (name, available, description) in crate::backends::list_providers() {
            let status = if available { "available" } else { "not available" };
            println!("  {name}: {status} - {description}");
        }
    }
    Ok(())
}

async fn download_model(identifier: &str) -> Result<()> {
    let model = SegmentationModel::from_identifier(identifier).ok_or_else(|| {
        let known: Vec<&str> = SegmentationModel::ALL.iter().map(|m| m.id()).collect();
        BgBatchError::invalid_config(format!(
            "unknown model '{identifier}'; known models: {}",
            known.join(", ")
        ))
    })?;
    let store = ModelStore::from_env()?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_message(format!("Downloading {model}..."));
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));

    let path = tokio::task::spawn_blocking(move || store.ensure(model))
        .await
        .context("Download task failed")?
        .with_context(|| format!("Failed to download {model}"))?;

    spinner.finish_and_clear();
    println!("{model}: {}", path.display());
    Ok(())
}
