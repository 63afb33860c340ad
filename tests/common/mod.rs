//! Shared fixtures for integration tests
//!
//! A luma-based session stands in for the neural model, so no model file or
//! network access is needed.

#![allow(dead_code)]

use bgbatch::{
    matting::UnavailableMatting, BatchRunner, CutoutProcessor, OutputLayout, Result, RunEvent,
    RunHandle, RunSummary, SegmentationModel, SegmentationSession, SessionFactory,
};
use image::{DynamicImage, GrayImage, Rgb, RgbImage, Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Session whose mask is the luma of the input
pub(crate) struct LumaSession(SegmentationModel);

impl SegmentationSession for LumaSession {
    fn model(&self) -> SegmentationModel {
        self.0
    }

    fn predict_mask(&mut self, image: &DynamicImage) -> Result<GrayImage> {
        Ok(image.to_luma8())
    }
}

pub(crate) struct LumaFactory;

impl SessionFactory for LumaFactory {
    fn create_session(&self, model: SegmentationModel) -> Result<Box<dyn SegmentationSession>> {
        Ok(Box::new(LumaSession(model)))
    }
}

/// Runner writing into `out`, without a matting engine
pub(crate) fn runner(out: &Path) -> BatchRunner {
    BatchRunner::new(
        Arc::new(LumaFactory),
        Arc::new(CutoutProcessor::new(Arc::new(UnavailableMatting))),
        OutputLayout::new(out),
    )
}

/// Bright square on a dark background
pub(crate) fn subject_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let inside = x >= width / 4 && x < width * 3 / 4 && y >= height / 4 && y < height * 3 / 4;
        if inside {
            Rgb([240, 240, 240])
        } else {
            Rgb([10, 10, 10])
        }
    })
}

/// Create `parent/name` holding the given PNG frames
pub(crate) fn folder_of(parent: &Path, name: &str, frames: &[(&str, RgbaImage)]) -> PathBuf {
    let dir = parent.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    for (file, frame) in frames {
        frame.save(dir.join(file)).unwrap();
    }
    dir
}

pub(crate) fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(color))
}

/// Drain every event of a run and wait for the worker
pub(crate) fn drain(mut handle: RunHandle) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Some(event) = handle.events.blocking_recv() {
        events.push(event);
    }
    handle.join().unwrap();
    events
}

pub(crate) fn summary(events: &[RunEvent]) -> RunSummary {
    events
        .iter()
        .find_map(|event| match event {
            RunEvent::Finished(summary) => Some(summary.clone()),
            _ => None,
        })
        .expect("run finished without a summary")
}

pub(crate) fn log_lines(events: &[RunEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            RunEvent::Log(entry) => Some(entry.format_line()),
            _ => None,
        })
        .collect()
}
