//! Mock segmentation sessions for testing pipelines without model files

use crate::{
    error::{BgBatchError, Result},
    inference::{SegmentationSession, SessionFactory},
    matting::{MattingEngine, MattingParams, Trimap},
    models::SegmentationModel,
    services::{ProgressReporter, RunEvent},
};
use image::{DynamicImage, GrayImage, Rgba, RgbImage, RgbaImage};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Session whose mask is the luma of the input image
///
/// Bright pixels are foreground, dark pixels background, which keeps test
/// fixtures easy to reason about.
#[derive(Debug)]
pub struct LumaSession {
    model: SegmentationModel,
    fail_inference: bool,
}

impl LumaSession {
    #[must_use]
    pub fn new(model: SegmentationModel) -> Self {
        Self {
            model,
            fail_inference: false,
        }
    }

    #[must_use]
    pub fn failing(model: SegmentationModel) -> Self {
        Self {
            model,
            fail_inference: true,
        }
    }
}

impl SegmentationSession for LumaSession {
    fn model(&self) -> SegmentationModel {
        self.model
    }

    fn predict_mask(&mut self, image: &DynamicImage) -> Result<GrayImage> {
        if self.fail_inference {
            return Err(BgBatchError::inference("Mock inference failure"));
        }
        Ok(image.to_luma8())
    }
}

/// Factory handing out [`LumaSession`]s and recording every request
#[derive(Debug, Clone, Default)]
pub struct MockSessionFactory {
    failing_models: Vec<SegmentationModel>,
    created: Arc<Mutex<Vec<SegmentationModel>>>,
}

impl MockSessionFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Session creation for `model` will fail
    #[must_use]
    pub fn failing_for(mut self, model: SegmentationModel) -> Self {
        self.failing_models.push(model);
        self
    }

    /// Models requested so far, in order
    pub fn created(&self) -> Vec<SegmentationModel> {
        self.created.lock().unwrap().clone()
    }
}

impl SessionFactory for MockSessionFactory {
    fn create_session(&self, model: SegmentationModel) -> Result<Box<dyn SegmentationSession>> {
        self.created.lock().unwrap().push(model);
        if self.failing_models.contains(&model) {
            return Err(BgBatchError::model(format!("Mock load failure for {model}")));
        }
        Ok(Box::new(LumaSession::new(model)))
    }
}

/// Reporter that keeps every event and answers install prompts with a fixed reply
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<RunEvent>>,
    install_answer: bool,
    install_requests: Mutex<Vec<String>>,
}

impl RecordingReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept install prompts instead of declining them
    #[must_use]
    pub fn accepting_installs() -> Self {
        Self {
            install_answer: true,
            ..Self::default()
        }
    }

    pub fn install_requests(&self) -> Vec<String> {
        self.install_requests.lock().unwrap().clone()
    }

    pub fn log_messages(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                RunEvent::Log(entry) => Some(entry.message.clone()),
                _ => None,
            })
            .collect()
    }

    /// `(processed, total)` pairs of every folder progress event
    pub fn folder_progress(&self) -> Vec<(usize, usize)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                RunEvent::FolderProgress { processed, total } => {
                    Some((*processed, *total))
                },
                _ => None,
            })
            .collect()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, event: RunEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn request_install(&self, dependency: &str) -> bool {
        self.install_requests
            .lock()
            .unwrap()
            .push(dependency.to_string());
        self.install_answer
    }
}

/// Matting engine that starts unavailable and can be "installed"
///
/// Refinement copies the trimap into the alpha channel so results are easy
/// to tell apart from the plain cutout.
#[derive(Debug, Default)]
pub struct ToggleMatting {
    available: AtomicBool,
    install_succeeds: bool,
    install_calls: AtomicUsize,
    fail_refine: bool,
}

impl ToggleMatting {
    #[must_use]
    pub fn available() -> Self {
        Self {
            available: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Unavailable; `install` succeeds when `install_succeeds` is set
    #[must_use]
    pub fn unavailable(install_succeeds: bool) -> Self {
        Self {
            install_succeeds,
            ..Self::default()
        }
    }

    /// Available, but every refinement fails
    #[must_use]
    pub fn failing() -> Self {
        Self {
            available: AtomicBool::new(true),
            fail_refine: true,
            ..Self::default()
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn install_calls(&self) -> usize {
        self.install_calls.load(Ordering::SeqCst)
    }
}

impl MattingEngine for ToggleMatting {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn install(&self) -> Result<()> {
        self.install_calls.fetch_add(1, Ordering::SeqCst);
        if self.install_succeeds {
            self.set_available(true);
            Ok(())
        } else {
            Err(BgBatchError::dependency("alpha-matting", "mock install failure"))
        }
    }

    fn refine(&self, image: &RgbImage, trimap: &Trimap, _: &MattingParams) -> Result<RgbaImage> {
        if self.fail_refine {
            return Err(BgBatchError::processing("mock matting failure"));
        }
        Ok(RgbaImage::from_fn(image.width(), image.height(), |x, y| {
            let [r, g, b] = image.get_pixel(x, y).0;
            Rgba([r, g, b, trimap.as_image().get_pixel(x, y).0[0]])
        }))
    }
}
