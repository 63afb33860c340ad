//! Configuration types for removal and animation runs

use crate::error::{BgBatchError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Model identifier used when none is given
pub const DEFAULT_MODEL: &str = "u2netp";

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Trimap-based matting refinement settings
///
/// Thresholds are on the 0-255 mask scale and are intentionally unbounded:
/// a foreground threshold above 255 yields an empty foreground region, which
/// triggers the percentile rescue during trimap construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MattingConfig {
    pub enabled: bool,
    pub foreground_threshold: i64,
    pub background_threshold: i64,
    /// Erosion radius in pixels; negative values make matting fall back to
    /// the plain cutout
    pub erode_size: i64,
}

impl Default for MattingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            foreground_threshold: 270,
            background_threshold: 10,
            erode_size: 10,
        }
    }
}

/// Output resize settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    /// Shrink to fit within the bounds instead of forcing the exact size
    pub keep_aspect: bool,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            width: 1024,
            height: 768,
            keep_aspect: true,
        }
    }
}

/// Configuration for a background removal run
///
/// Passed by value into each folder pipeline so a run never observes
/// settings that change after it started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Segmentation model identifier (see [`crate::models::SegmentationModel`])
    pub model: String,
    pub matting: MattingConfig,
    pub resize: ResizeConfig,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            matting: MattingConfig::default(),
            resize: ResizeConfig::default(),
        }
    }
}

impl ProcessingConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> ProcessingConfigBuilder {
        ProcessingConfigBuilder::default()
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// - Empty model identifier
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(BgBatchError::invalid_config("model identifier is empty"));
        }
        Ok(())
    }
}

/// Builder for [`ProcessingConfig`]
#[derive(Debug, Default)]
pub struct ProcessingConfigBuilder {
    config: ProcessingConfig,
}

impl ProcessingConfigBuilder {
    #[must_use]
    pub fn model<S: Into<String>>(mut self, model: S) -> Self {
        self.config.model = model.into();
        self
    }

    /// Enable matting with the given thresholds and erosion radius
    #[must_use]
    pub fn matting(mut self, foreground: i64, background: i64, erode_size: i64) -> Self {
        self.config.matting = MattingConfig {
            enabled: true,
            foreground_threshold: foreground,
            background_threshold: background,
            erode_size,
        };
        self
    }

    #[must_use]
    pub fn matting_config(mut self, matting: MattingConfig) -> Self {
        self.config.matting = matting;
        self
    }

    /// Enable resizing to the given bounds
    #[must_use]
    pub fn resize(mut self, width: u32, height: u32, keep_aspect: bool) -> Self {
        self.config.resize = ResizeConfig {
            enabled: true,
            width,
            height,
            keep_aspect,
        };
        self
    }

    #[must_use]
    pub fn resize_config(mut self, resize: ResizeConfig) -> Self {
        self.config.resize = resize;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Validation errors from [`ProcessingConfig::validate`]
    pub fn build(self) -> Result<ProcessingConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Animation container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimationFormat {
    #[default]
    WebP,
    Gif,
}

impl AnimationFormat {
    /// File extension without the leading dot
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::WebP => "webp",
            Self::Gif => "gif",
        }
    }
}

impl std::fmt::Display for AnimationFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Configuration for an animation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationConfig {
    pub format: AnimationFormat,
    /// Display time of every frame in milliseconds
    pub frame_duration_ms: u32,
    /// Loop forever when set, play once otherwise
    pub looping: bool,
    /// Encoder quality, 1-100
    pub quality: u8,
    /// Center frames on a shared transparent canvas and clear the previous
    /// frame before drawing the next
    pub prevent_ghosting: bool,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            format: AnimationFormat::WebP,
            frame_duration_ms: 100,
            looping: true,
            quality: 80,
            prevent_ghosting: true,
        }
    }
}

impl AnimationConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> AnimationConfigBuilder {
        AnimationConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Quality outside 1-100
    /// - Zero frame duration
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.quality) {
            return Err(BgBatchError::config_value_error(
                "animation quality",
                self.quality,
                "1-100",
                Some(80),
            ));
        }
        if self.frame_duration_ms == 0 {
            return Err(BgBatchError::config_value_error(
                "frame duration (ms)",
                self.frame_duration_ms,
                "1 or more",
                Some(100),
            ));
        }
        Ok(())
    }
}

/// Builder for [`AnimationConfig`]
#[derive(Debug, Default)]
pub struct AnimationConfigBuilder {
    config: AnimationConfig,
}

impl AnimationConfigBuilder {
    #[must_use]
    pub fn format(mut self, format: AnimationFormat) -> Self {
        self.config.format = format;
        self
    }

    #[must_use]
    pub fn frame_duration_ms(mut self, duration: u32) -> Self {
        self.config.frame_duration_ms = duration;
        self
    }

    #[must_use]
    pub fn looping(mut self, looping: bool) -> Self {
        self.config.looping = looping;
        self
    }

    #[must_use]
    pub fn quality(mut self, quality: u8) -> Self {
        self.config.quality = quality;
        self
    }

    #[must_use]
    pub fn prevent_ghosting(mut self, enabled: bool) -> Self {
        self.config.prevent_ghosting = enabled;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Validation errors from [`AnimationConfig::validate`]
    pub fn build(self) -> Result<AnimationConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Where run outputs are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub const TRANSPARENT_DIR: &'static str = "transparent";
    pub const ANIMATION_DIR: &'static str = "animation";

    /// Use `root` as the parent of the `transparent/` and `animation/` folders
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Outputs next to the running executable, falling back to the working
    /// directory when the executable path cannot be resolved
    #[must_use]
    pub fn beside_executable() -> Self {
        let root = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn transparent_dir(&self) -> PathBuf {
        self.root.join(Self::TRANSPARENT_DIR)
    }

    #[must_use]
    pub fn animation_dir(&self) -> PathBuf {
        self.root.join(Self::ANIMATION_DIR)
    }
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self::beside_executable()
    }
}
