//! Segmentation session abstraction
//!
//! Pipelines never talk to an inference runtime directly. They ask a
//! [`SessionFactory`] for one [`SegmentationSession`] per folder and reuse it
//! for every file in that folder.

use crate::{error::Result, models::SegmentationModel};
use image::{DynamicImage, GrayImage};

/// A loaded segmentation model
pub trait SegmentationSession: Send {
    /// Model this session was created for
    fn model(&self) -> SegmentationModel;

    /// Predict a foreground mask at the source image resolution
    ///
    /// 255 marks certain foreground, 0 certain background.
    ///
    /// # Errors
    /// - Tensor conversion failures
    /// - Inference runtime failures
    fn predict_mask(&mut self, image: &DynamicImage) -> Result<GrayImage>;
}

/// Creates segmentation sessions
///
/// Injected into the queue runner so tests can swap in a deterministic
/// session without model files.
pub trait SessionFactory: Send + Sync {
    /// Load `model` and return a ready session
    ///
    /// # Errors
    /// - Model file missing and not downloadable
    /// - Runtime initialization failures
    fn create_session(&self, model: SegmentationModel) -> Result<Box<dyn SegmentationSession>>;
}
