//! Image file discovery and output path operations
//!
//! This module separates file system concerns from the pipelines, making
//! them testable against temporary directories.

use crate::error::{BgBatchError, Result};
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};

/// File extensions accepted as input images (lowercase, without dot)
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

/// Service for image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Check whether a path has a supported image extension (case-insensitive)
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SUPPORTED_EXTENSIONS
                    .iter()
                    .any(|supported| ext.eq_ignore_ascii_case(supported))
            })
    }

    /// Supported image files directly inside `dir`, sorted by path
    ///
    /// Subdirectories are not descended into.
    ///
    /// # Errors
    /// - Directory missing or unreadable
    pub fn list_image_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        let entries =
            fs::read_dir(dir).map_err(|e| BgBatchError::file_io_error("read directory", dir, &e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BgBatchError::file_io_error("read directory", dir, &e))?;
            let path = entry.path();
            if path.is_file() && Self::is_supported_format(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Whether `dir` is a directory holding at least one supported image
    pub fn has_image_files<P: AsRef<Path>>(dir: P) -> bool {
        Self::list_image_files(dir).is_ok_and(|files| !files.is_empty())
    }

    /// First free `parent/name`, `parent/name_2`, `parent/name_3`, ...
    ///
    /// The whole name is treated as a stem, so dotted folder names keep
    /// their dots in front of the suffix.
    #[must_use]
    pub fn unique_dir_path(parent: &Path, name: &str) -> PathBuf {
        Self::first_free(parent, name, "")
    }

    /// First free `dir/stem.ext`, `dir/stem_2.ext`, `dir/stem_3.ext`, ...
    #[must_use]
    pub fn unique_file_path(dir: &Path, file_name: &str) -> PathBuf {
        let as_path = Path::new(file_name);
        let stem = as_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name);
        let suffix = as_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        Self::first_free(dir, stem, &suffix)
    }

    fn first_free(dir: &Path, stem: &str, suffix: &str) -> PathBuf {
        let candidate = dir.join(format!("{stem}{suffix}"));
        if !candidate.exists() {
            return candidate;
        }
        (2u64..)
            .map(|counter| dir.join(format!("{stem}_{counter}{suffix}")))
            .find(|candidate| !candidate.exists())
            .unwrap_or(candidate)
    }

    /// Final component of a folder path as UTF-8, lossy
    #[must_use]
    pub fn folder_name(path: &Path) -> String {
        path.file_name()
            .map_or_else(|| "output".to_string(), |n| n.to_string_lossy().into_owned())
    }

    /// Load an image, retrying with content sniffing when the extension lies
    ///
    /// # Errors
    /// - File unreadable
    /// - Data not decodable by any enabled codec
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();
        match image::open(path_ref) {
            Ok(img) => Ok(img),
            Err(e) => {
                log::debug!(
                    "Extension-based loading failed for {}: {}. Attempting content-based detection.",
                    path_ref.display(),
                    e
                );
                let data = fs::read(path_ref)
                    .map_err(|io_err| BgBatchError::file_io_error("read image", path_ref, &io_err))?;
                image::load_from_memory(&data).map_err(BgBatchError::Image)
            },
        }
    }
}
