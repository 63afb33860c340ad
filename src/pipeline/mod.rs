//! Per-folder pipelines
//!
//! Each pipeline handles exactly one source folder and returns a report. The
//! queue orchestrator in [`crate::queue`] decides what happens between
//! folders.

pub mod animation;
pub mod folder;

pub use animation::{normalize_frames, AnimationPipeline, AnimationReport, CanvasFrames};
pub use folder::{FolderPipeline, FolderReport};
