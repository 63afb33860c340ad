#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # bgbatch
//!
//! Batch background removal for folders of images, plus a small animation
//! builder that turns a folder of frames into a looping WebP or GIF.
//!
//! A run takes an ordered queue of folders and processes them one at a time
//! on a worker thread. Each image goes through a segmentation model (U²-Net
//! family or IS-Net via ONNX Runtime), is optionally refined with trimap-based
//! alpha matting and resized, and lands as a transparent PNG in
//! `transparent/<folder>/`. Animation runs write `animation/<folder>.webp`
//! or `.gif`.
//!
//! ## Features
//!
//! - **Segmentation Models**: `u2net`, `u2netp`, `u2net_human_seg`, `silueta`,
//!   `isnet-general-use`, downloaded on first use into `$U2NET_HOME` or `~/.u2net`
//! - **Alpha Matting**: trimap construction with a percentile rescue and a
//!   guided-filter matting engine
//! - **Animation**: WebP and GIF with ghost prevention for frames of mixed sizes
//! - **Run Events**: progress, log lines and install prompts arrive over a
//!   channel, so any front end can drive a run
//! - **CLI Integration**: optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgbatch::{
//!     default_matting_engine, BatchRunner, CutoutProcessor, ExecutionProvider, FolderQueue,
//!     ModelStore, OnnxSessionFactory, OutputLayout, ProcessingConfig, RunEvent,
//! };
//! use std::sync::Arc;
//!
//! # fn example() -> anyhow::Result<()> {
//! let factory = OnnxSessionFactory::new(ModelStore::from_env()?, ExecutionProvider::Auto);
//! let processor = CutoutProcessor::new(default_matting_engine());
//! let runner = BatchRunner::new(Arc::new(factory), Arc::new(processor), OutputLayout::new("out"));
//!
//! let mut queue = FolderQueue::new();
//! queue.add("photos")?;
//!
//! let config = ProcessingConfig::builder()
//!     .model("u2net")
//!     .resize(1024, 768, true)
//!     .build()?;
//! let mut run = runner.start_removal(&queue, config)?;
//! while let Some(event) = run.events.blocking_recv() {
//!     match event {
//!         RunEvent::Log(entry) => println!("{}", entry.format_line()),
//!         RunEvent::InstallRequested(request) => request.respond(false),
//!         _ => {},
//!     }
//! }
//! run.join()?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with CUDA and `CoreML` support
//! - `alpha-matting` (default): built-in guided-filter matting engine
//! - `cli` (default): command-line interface and progress bars
//! - `tracing-json`: JSON diagnostic output for the CLI
//!
//! ### Library-Only Usage
//!
//! ```toml
//! [dependencies]
//! bgbatch = { version = "0.1", default-features = false, features = ["onnx", "alpha-matting"] }
//! ```

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod inference;
pub mod matting;
pub mod models;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod utils;

// Public API exports
#[cfg(feature = "onnx")]
pub use backends::*;
pub use config::{
    AnimationConfig, AnimationFormat, ExecutionProvider, MattingConfig, OutputLayout,
    ProcessingConfig, ResizeConfig,
};
pub use error::{BgBatchError, Result};
pub use inference::{SegmentationSession, SessionFactory};
pub use matting::{default_matting_engine, MattingEngine, Trimap};
pub use models::{ModelStore, SegmentationModel};
pub use pipeline::{AnimationPipeline, AnimationReport, FolderPipeline, FolderReport};
pub use processor::CutoutProcessor;
pub use queue::{BatchRunner, FolderQueue, Rejection, RunHandle, RunSummary};
pub use services::{
    ChannelProgressReporter, ImageIOService, LogEntry, NoOpProgressReporter, ProgressReporter,
    RunEvent,
};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, spans, TracingConfig, TracingFormat};
