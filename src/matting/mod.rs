//! Alpha matting refinement
//!
//! Matting is an optional capability. The segmentation adapter asks the
//! engine whether it is available on every call, so an engine that becomes
//! usable mid-session (after [`MattingEngine::install`]) is picked up without
//! restarting.

#[cfg(feature = "alpha-matting")]
pub mod guided;
pub mod trimap;

use crate::error::{BgBatchError, Result};
use image::{RgbImage, RgbaImage};
use std::sync::Arc;

pub use trimap::{Trimap, TrimapCounts, TRIMAP_BACKGROUND, TRIMAP_FOREGROUND, TRIMAP_UNKNOWN};

/// Name under which the matting capability is reported and installed
pub const MATTING_DEPENDENCY: &str = "alpha-matting";

/// Normalized matting parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MattingParams {
    /// Foreground threshold divided by 255 (may exceed 1.0)
    pub foreground_threshold: f32,
    /// Background threshold divided by 255
    pub background_threshold: f32,
    /// Erosion radius in pixels
    pub erode_size: u32,
}

/// A trimap-driven matting routine
pub trait MattingEngine: Send + Sync {
    /// Dependency name shown in install prompts
    fn dependency_name(&self) -> &str {
        MATTING_DEPENDENCY
    }

    /// Whether [`MattingEngine::refine`] can currently run
    fn is_available(&self) -> bool;

    /// Try to make the engine available
    ///
    /// # Errors
    /// - The engine cannot be installed from within this process
    fn install(&self) -> Result<()>;

    /// Estimate a refined RGBA cutout from the source image and trimap
    ///
    /// # Errors
    /// - Engine unavailable
    /// - Image and trimap sizes differ
    fn refine(&self, image: &RgbImage, trimap: &Trimap, params: &MattingParams)
        -> Result<RgbaImage>;
}

/// Stand-in used when the crate is built without a matting engine
#[derive(Debug, Default)]
pub struct UnavailableMatting;

impl MattingEngine for UnavailableMatting {
    fn is_available(&self) -> bool {
        false
    }

    fn install(&self) -> Result<()> {
        Err(BgBatchError::dependency(
            MATTING_DEPENDENCY,
            "not compiled in; rebuild with --features alpha-matting",
        ))
    }

    fn refine(&self, _: &RgbImage, _: &Trimap, _: &MattingParams) -> Result<RgbaImage> {
        Err(BgBatchError::dependency(MATTING_DEPENDENCY, "engine unavailable"))
    }
}

/// Matting engine compiled into this build
#[must_use]
pub fn default_matting_engine() -> Arc<dyn MattingEngine> {
    #[cfg(feature = "alpha-matting")]
    {
        Arc::new(guided::GuidedFilterMatting::default())
    }
    #[cfg(not(feature = "alpha-matting"))]
    {
        Arc::new(UnavailableMatting)
    }
}
