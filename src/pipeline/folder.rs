//! Folder batch pipeline for background removal

use crate::{
    config::{OutputLayout, ProcessingConfig},
    error::{BgBatchError, Result},
    inference::{SegmentationSession, SessionFactory},
    models::SegmentationModel,
    processor::CutoutProcessor,
    services::{apply_resize, ImageIOService, ProgressReporter, RunEvent},
};
use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of one folder run
#[derive(Debug, Clone, Serialize)]
pub struct FolderReport {
    pub source: PathBuf,
    /// `None` when the folder held no supported images and nothing was created
    pub output_dir: Option<PathBuf>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Model that actually processed the folder
    pub model: Option<SegmentationModel>,
    pub config: ProcessingConfig,
}

impl FolderReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// Removes the background from every supported image in a folder
///
/// Outputs go to `transparent/<folder-name[_N]>/<stem[_N]>.png`.
pub struct FolderPipeline<'a> {
    factory: &'a dyn SessionFactory,
    processor: &'a CutoutProcessor,
    layout: &'a OutputLayout,
}

impl<'a> FolderPipeline<'a> {
    pub fn new(
        factory: &'a dyn SessionFactory,
        processor: &'a CutoutProcessor,
        layout: &'a OutputLayout,
    ) -> Self {
        Self {
            factory,
            processor,
            layout,
        }
    }

    /// Process one folder
    ///
    /// Per-file failures are counted and logged; they never fail the folder.
    ///
    /// # Errors
    /// - Source folder missing or unreadable
    /// - Output folder cannot be created
    /// - No segmentation session could be created, even for `u2net`
    pub fn run(
        &self,
        folder: &Path,
        config: &ProcessingConfig,
        reporter: &dyn ProgressReporter,
    ) -> Result<FolderReport> {
        let folder_name = ImageIOService::folder_name(folder);
        let span = tracing::info_span!("folder", folder = %folder_name);
        let _guard = span.enter();

        let output_dir =
            ImageIOService::unique_dir_path(&self.layout.transparent_dir(), &folder_name);
        let files = ImageIOService::list_image_files(folder)?;

        let mut report = FolderReport {
            source: folder.to_path_buf(),
            output_dir: None,
            total: files.len(),
            succeeded: 0,
            failed: 0,
            model: None,
            config: config.clone(),
        };

        if files.is_empty() {
            reporter.warn("No image files to process".to_string());
            return Ok(report);
        }

        fs::create_dir_all(&output_dir)
            .map_err(|e| BgBatchError::file_io_error("create output folder", &output_dir, &e))?;
        if output_dir
            .file_name()
            .is_some_and(|n| n == folder_name.as_str())
        {
            reporter.info(format!("Output folder: {}", output_dir.display()));
        } else {
            reporter.info(format!(
                "Output folder (renamed to avoid a clash): {}",
                output_dir.display()
            ));
        }
        report.output_dir = Some(output_dir.clone());

        let mut session = self.open_session(&config.model, reporter)?;
        report.model = Some(session.model());

        reporter.info(format!("Processing {} files", report.total));
        self.log_settings(session.model(), config, reporter);

        for (index, path) in files.iter().enumerate() {
            let file_name = path
                .file_name()
                .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
            reporter.info(format!("Processing: {file_name}"));

            match self.process_file(path, session.as_mut(), config, &output_dir, reporter) {
                Ok(saved) => {
                    report.succeeded += 1;
                    let saved_name = saved
                        .file_name()
                        .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
                    reporter.info(format!("  Saved: {saved_name}"));
                },
                Err(e) => {
                    report.failed += 1;
                    reporter.error(format!("  Error ({file_name}): {e}"));
                },
            }

            reporter.report(RunEvent::FolderProgress {
                processed: index + 1,
                total: report.total,
            });
        }

        reporter.info(format!(
            "Done: {} succeeded, {} failed",
            report.succeeded, report.failed
        ));
        self.log_settings(session.model(), config, reporter);
        reporter.info(format!("Results: {}", output_dir.display()));
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "folder finished"
        );

        Ok(report)
    }

    /// Session for `requested`, falling back to `u2net` when the identifier
    /// is unknown or the requested model fails to load
    fn open_session(
        &self,
        requested: &str,
        reporter: &dyn ProgressReporter,
    ) -> Result<Box<dyn SegmentationSession>> {
        let model = SegmentationModel::resolve(requested);
        if model.id() != requested.trim() {
            reporter.warn(format!("Model '{requested}' is not supported, using {model}"));
        }
        reporter.info(format!("Loading model: {}", model.description()));

        match self.factory.create_session(model) {
            Ok(session) => Ok(session),
            Err(e) if model != SegmentationModel::U2net => {
                reporter.error(format!("Model loading failed: {e}. Retrying with u2net"));
                self.factory.create_session(SegmentationModel::U2net)
            },
            Err(e) => Err(e),
        }
    }

    fn process_file(
        &self,
        path: &Path,
        session: &mut dyn SegmentationSession,
        config: &ProcessingConfig,
        output_dir: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Result<PathBuf> {
        let image = ImageIOService::load_image(path)?;
        let cutout = self
            .processor
            .process_image(&image, session, &config.matting, reporter)?;
        let mut output = DynamicImage::ImageRgba8(cutout);

        if config.resize.enabled {
            reporter.info(format!("  Original size: {}x{}", output.width(), output.height()));
            output = apply_resize(output, &config.resize);
            reporter.info(format!("  Resized: {}x{}", output.width(), output.height()));
        }

        let stem = path
            .file_stem()
            .map_or_else(|| "image".to_string(), |s| s.to_string_lossy().into_owned());
        let output_path = ImageIOService::unique_file_path(output_dir, &format!("{stem}.png"));
        output.save_with_format(&output_path, ImageFormat::Png)?;
        tracing::debug!(output = %output_path.display(), "cutout written");
        Ok(output_path)
    }

    fn log_settings(
        &self,
        model: SegmentationModel,
        config: &ProcessingConfig,
        reporter: &dyn ProgressReporter,
    ) {
        reporter.info(format!("Model: {}", model.description()));
        if config.matting.enabled {
            let state = if self.processor.matting_available() {
                "enabled"
            } else {
                "enabled (engine unavailable, using basic removal)"
            };
            reporter.info(format!("Alpha matting: {state}"));
        }
        if config.resize.enabled {
            let mode = if config.resize.keep_aspect {
                "keep aspect"
            } else {
                "exact"
            };
            reporter.info(format!(
                "Resize: {}x{} ({mode})",
                config.resize.width, config.resize.height
            ));
        }
    }
}
