//! Segmentation model catalog and local model store
//!
//! Model files are plain `<id>.onnx` files kept in `$U2NET_HOME` (default
//! `~/.u2net`), the same location the u2net family of tools uses, so
//! previously downloaded models are reused.

use crate::error::{BgBatchError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Base URL for published model releases
const MODEL_RELEASE_URL: &str = "https://github.com/danielgatis/rembg/releases/download/v0.0.0";

/// Environment variable overriding the model directory
pub const MODEL_HOME_ENV: &str = "U2NET_HOME";

/// Identifiers accepted in the configuration that have no session of their
/// own and resolve to [`SegmentationModel::U2net`]
pub const UNSUPPORTED_MODEL_IDS: &[&str] = &["sam", "birefnet-general"];

/// Segmentation models a session can be created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentationModel {
    /// General purpose model
    U2net,
    /// Lightweight general purpose model
    U2netp,
    /// Human segmentation
    U2netHumanSeg,
    /// Reduced-size u2net
    Silueta,
    /// IS-Net general use
    IsnetGeneralUse,
}

/// Model preprocessing configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessingConfig {
    /// Square input size expected by the model
    pub target_size: u32,
    /// Per-channel normalization mean (RGB)
    pub normalization_mean: [f32; 3],
    /// Per-channel normalization standard deviation (RGB)
    pub normalization_std: [f32; 3],
}

impl SegmentationModel {
    /// Every model with a session implementation
    pub const ALL: [Self; 5] = [
        Self::U2net,
        Self::U2netHumanSeg,
        Self::U2netp,
        Self::Silueta,
        Self::IsnetGeneralUse,
    ];

    /// Configuration identifier, also the model file stem
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::U2net => "u2net",
            Self::U2netp => "u2netp",
            Self::U2netHumanSeg => "u2net_human_seg",
            Self::Silueta => "silueta",
            Self::IsnetGeneralUse => "isnet-general-use",
        }
    }

    /// Exact identifier lookup
    #[must_use]
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|model| model.id() == identifier.trim())
    }

    /// Identifier lookup with the `u2net` fallback for anything unknown
    #[must_use]
    pub fn resolve(identifier: &str) -> Self {
        if let Some(model) = Self::from_identifier(identifier) {
            return model;
        }
        if UNSUPPORTED_MODEL_IDS.contains(&identifier.trim()) {
            tracing::warn!(model = %identifier, "model has no session support, using u2net");
        } else {
            tracing::warn!(model = %identifier, "unknown model identifier, using u2net");
        }
        Self::U2net
    }

    /// Input geometry and normalization for this model
    #[must_use]
    pub fn preprocessing(self) -> PreprocessingConfig {
        match self {
            Self::IsnetGeneralUse => PreprocessingConfig {
                target_size: 1024,
                normalization_mean: [0.5, 0.5, 0.5],
                normalization_std: [1.0, 1.0, 1.0],
            },
            Self::U2net | Self::U2netp | Self::U2netHumanSeg | Self::Silueta => {
                PreprocessingConfig {
                    target_size: 320,
                    normalization_mean: [0.485, 0.456, 0.406],
                    normalization_std: [0.229, 0.224, 0.225],
                }
            },
        }
    }

    #[must_use]
    pub fn file_name(self) -> String {
        format!("{}.onnx", self.id())
    }

    #[must_use]
    pub fn download_url(self) -> String {
        format!("{MODEL_RELEASE_URL}/{}", self.file_name())
    }

    /// Short human readable description
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::U2net => "general purpose (176 MB)",
            Self::U2netp => "lightweight general purpose (4.7 MB)",
            Self::U2netHumanSeg => "human segmentation (176 MB)",
            Self::Silueta => "compact u2net variant (43 MB)",
            Self::IsnetGeneralUse => "IS-Net general use (179 MB)",
        }
    }
}

impl std::fmt::Display for SegmentationModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Local directory of downloaded model files
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Store at `$U2NET_HOME`, or `~/.u2net` when unset
    ///
    /// # Errors
    /// - The home directory cannot be determined
    pub fn from_env() -> Result<Self> {
        if let Some(dir) = std::env::var_os(MODEL_HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(dir));
        }
        dirs::home_dir()
            .map(|home| Self::new(home.join(".u2net")))
            .ok_or_else(|| {
                BgBatchError::model(format!(
                    "cannot determine home directory; set {MODEL_HOME_ENV}"
                ))
            })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn model_path(&self, model: SegmentationModel) -> PathBuf {
        self.dir.join(model.file_name())
    }

    #[must_use]
    pub fn is_cached(&self, model: SegmentationModel) -> bool {
        self.model_path(model).is_file()
    }

    /// Catalog with the cache status of every model
    #[must_use]
    pub fn list(&self) -> Vec<(SegmentationModel, bool)> {
        SegmentationModel::ALL
            .into_iter()
            .map(|model| (model, self.is_cached(model)))
            .collect()
    }

    /// Path of the model file, downloading it first if missing
    ///
    /// The body is streamed into `<file>.part` and renamed into place so an
    /// interrupted download never leaves a truncated model behind.
    ///
    /// # Errors
    /// - Directory creation or file write failures
    /// - Network or HTTP status errors
    pub fn ensure(&self, model: SegmentationModel) -> Result<PathBuf> {
        let path = self.model_path(model);
        if path.is_file() {
            tracing::debug!(model = %model, path = %path.display(), "model already cached");
            return Ok(path);
        }

        fs::create_dir_all(&self.dir)
            .map_err(|e| BgBatchError::file_io_error("create model directory", &self.dir, &e))?;

        let url = model.download_url();
        let span = tracing::info_span!("download", url = %url, destination = %path.display());
        let _guard = span.enter();
        tracing::info!(model = %model, "downloading model");

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30 * 60))
            .build()?;
        let mut response = client.get(&url).send()?.error_for_status()?;

        let part = path.with_extension("onnx.part");
        let mut file = fs::File::create(&part)
            .map_err(|e| BgBatchError::file_io_error("create", &part, &e))?;
        let bytes = match response.copy_to(&mut file) {
            Ok(bytes) => bytes,
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&part);
                return Err(e.into());
            },
        };
        drop(file);

        if bytes == 0 {
            let _ = fs::remove_file(&part);
            return Err(BgBatchError::model(format!("empty download from {url}")));
        }

        fs::rename(&part, &path).map_err(|e| BgBatchError::file_io_error("finalize", &path, &e))?;
        tracing::info!(model = %model, bytes, "model downloaded");
        Ok(path)
    }
}
