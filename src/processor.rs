//! Segmentation adapter
//!
//! Turns one image into a transparent cutout using a segmentation session,
//! optionally refining the edges with trimap-based matting. Matting problems
//! never fail an image: the plain cutout, which is always computed first, is
//! returned instead.

use crate::{
    config::MattingConfig,
    error::{BgBatchError, Result},
    inference::SegmentationSession,
    matting::{MattingEngine, MattingParams, Trimap},
    services::ProgressReporter,
};
use image::{imageops::FilterType, DynamicImage, GrayImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Background removal for single images
///
/// One processor lives for the whole application session so that a declined
/// matting install is never asked about again.
pub struct CutoutProcessor {
    matting: Arc<dyn MattingEngine>,
    install_declined: AtomicBool,
}

impl CutoutProcessor {
    #[must_use]
    pub fn new(matting: Arc<dyn MattingEngine>) -> Self {
        Self {
            matting,
            install_declined: AtomicBool::new(false),
        }
    }

    /// Whether the matting engine can run right now
    #[must_use]
    pub fn matting_available(&self) -> bool {
        self.matting.is_available()
    }

    /// Whether the user declined (or failed) the matting install this session
    #[must_use]
    pub fn install_declined(&self) -> bool {
        self.install_declined.load(Ordering::SeqCst)
    }

    /// Remove the background from encoded image bytes, returning PNG bytes
    ///
    /// # Errors
    /// - Undecodable input
    /// - Segmentation failures
    /// - PNG encoding failures
    pub fn process(
        &self,
        image_bytes: &[u8],
        session: &mut dyn SegmentationSession,
        matting: &MattingConfig,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<u8>> {
        let image = image::load_from_memory(image_bytes)?;
        let cutout = self.process_image(&image, session, matting, reporter)?;
        encode_png(&cutout)
    }

    /// Remove the background from a decoded image
    ///
    /// # Errors
    /// - Segmentation failures
    pub fn process_image(
        &self,
        image: &DynamicImage,
        session: &mut dyn SegmentationSession,
        matting: &MattingConfig,
        reporter: &dyn ProgressReporter,
    ) -> Result<RgbaImage> {
        let mask = session.predict_mask(image)?;
        let base = naive_cutout(image, &mask);

        if !matting.enabled {
            return Ok(base);
        }

        match self.refine_with_matting(image, &base, matting, reporter) {
            Ok(Some(refined)) => Ok(refined),
            Ok(None) => Ok(base),
            Err(e) => {
                reporter.warn(format!("  Alpha matting failed: {e}. Using basic removal"));
                Ok(base)
            },
        }
    }

    fn refine_with_matting(
        &self,
        image: &DynamicImage,
        base: &RgbaImage,
        matting: &MattingConfig,
        reporter: &dyn ProgressReporter,
    ) -> Result<Option<RgbaImage>> {
        if !self.ensure_matting(reporter) {
            return Ok(None);
        }

        let erode_size = u32::try_from(matting.erode_size).map_err(|_| {
            BgBatchError::config_value_error("erode size", matting.erode_size, "0 or more", Some(10))
        })?;

        reporter.info(format!(
            "  Alpha matting (FG:{}, BG:{}, Erode:{})",
            matting.foreground_threshold, matting.background_threshold, matting.erode_size
        ));

        let alpha = alpha_channel(base);
        let trimap = Trimap::from_mask(
            &alpha,
            matting.foreground_threshold,
            matting.background_threshold,
        );
        let counts = trimap.counts();
        tracing::debug!(
            foreground = counts.foreground,
            background = counts.background,
            unknown = counts.unknown,
            "trimap built"
        );

        let params = MattingParams {
            foreground_threshold: matting.foreground_threshold as f32 / 255.0,
            background_threshold: matting.background_threshold as f32 / 255.0,
            erode_size,
        };
        self.matting
            .refine(&image.to_rgb8(), &trimap, &params)
            .map(Some)
    }

    /// Check availability, offering an install the first time it is missing
    fn ensure_matting(&self, reporter: &dyn ProgressReporter) -> bool {
        if self.matting.is_available() {
            return true;
        }
        if self.install_declined() {
            return false;
        }

        let dependency = self.matting.dependency_name().to_string();
        reporter.warn(format!("  Alpha matting engine '{dependency}' is not available"));

        if !reporter.request_install(&dependency) {
            self.install_declined.store(true, Ordering::SeqCst);
            reporter.info("  Alpha matting install declined. Using basic removal".to_string());
            return false;
        }

        match self.matting.install() {
            Ok(()) if self.matting.is_available() => {
                reporter.info("  Alpha matting installed and enabled".to_string());
                true
            },
            Ok(()) => {
                self.install_declined.store(true, Ordering::SeqCst);
                reporter.warn("  Alpha matting still unavailable after install".to_string());
                false
            },
            Err(e) => {
                self.install_declined.store(true, Ordering::SeqCst);
                reporter.warn(format!("  Alpha matting install failed: {e}. Using basic removal"));
                false
            },
        }
    }
}

/// Apply `mask` as the alpha channel; fully transparent pixels are zeroed
#[must_use]
pub fn naive_cutout(image: &DynamicImage, mask: &GrayImage) -> RgbaImage {
    let mut rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let resized;
    let mask = if mask.dimensions() == (width, height) {
        mask
    } else {
        resized = image::imageops::resize(mask, width, height, FilterType::Lanczos3);
        &resized
    };

    for (pixel, m) in rgba.pixels_mut().zip(mask.pixels()) {
        let alpha = m.0[0];
        *pixel = if alpha == 0 {
            Rgba([0, 0, 0, 0])
        } else {
            let [r, g, b, _] = pixel.0;
            Rgba([r, g, b, alpha])
        };
    }
    rgba
}

fn alpha_channel(image: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        image::Luma([image.get_pixel(x, y).0[3]])
    })
}

/// Encode an RGBA image as PNG bytes
///
/// # Errors
/// - PNG encoder failures
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{LumaSession, RecordingReporter, ToggleMatting};
    use crate::matting::UnavailableMatting;
    use crate::models::SegmentationModel;
    use image::{Rgb, RgbImage};

    /// Left half white, right half black
    fn split_image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(8, 4, |x, _| {
            if x < 4 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        }))
    }

    fn matting_on() -> MattingConfig {
        MattingConfig {
            enabled: true,
            ..MattingConfig::default()
        }
    }

    #[test]
    fn test_base_cutout_applies_mask() {
        let processor = CutoutProcessor::new(Arc::new(UnavailableMatting));
        let mut session = LumaSession::new(SegmentationModel::U2netp);
        let out = processor
            .process_image(
                &split_image(),
                &mut session,
                &MattingConfig::default(),
                &RecordingReporter::new(),
            )
            .unwrap();

        assert_eq!(out.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(out.get_pixel(7, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_process_returns_png_bytes() {
        let processor = CutoutProcessor::new(Arc::new(UnavailableMatting));
        let mut session = LumaSession::new(SegmentationModel::U2netp);
        let input = encode_png(&split_image().to_rgba8()).unwrap();

        let output = processor
            .process(
                &input,
                &mut session,
                &MattingConfig::default(),
                &RecordingReporter::new(),
            )
            .unwrap();

        assert_eq!(image::guess_format(&output).unwrap(), ImageFormat::Png);
        let decoded = image::load_from_memory(&output).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (8, 4));
        assert_eq!(decoded.get_pixel(7, 3).0[3], 0);
    }

    #[test]
    fn test_inference_failure_propagates() {
        let processor = CutoutProcessor::new(Arc::new(UnavailableMatting));
        let mut session = LumaSession::failing(SegmentationModel::U2netp);
        let result = processor.process_image(
            &split_image(),
            &mut session,
            &MattingConfig::default(),
            &RecordingReporter::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_matting_refines_when_available() {
        let processor = CutoutProcessor::new(Arc::new(ToggleMatting::available()));
        let mut session = LumaSession::new(SegmentationModel::U2netp);
        let out = processor
            .process_image(
                &split_image(),
                &mut session,
                &matting_on(),
                &RecordingReporter::new(),
            )
            .unwrap();

        // fg 270 is unreachable, so the percentile rescue marks the white half
        assert_eq!(out.get_pixel(0, 0).0[3], 255);
        assert_eq!(out.get_pixel(7, 0).0[3], 0);
    }

    #[test]
    fn test_decline_is_sticky() {
        let engine = Arc::new(ToggleMatting::unavailable(true));
        let processor = CutoutProcessor::new(engine.clone());
        let reporter = RecordingReporter::new();
        let mut session = LumaSession::new(SegmentationModel::U2netp);

        for _ in 0..3 {
            let out = processor
                .process_image(&split_image(), &mut session, &matting_on(), &reporter)
                .unwrap();
            assert_eq!(out.get_pixel(0, 0).0[3], 255);
        }

        assert_eq!(reporter.install_requests().len(), 1);
        assert_eq!(engine.install_calls(), 0);
        assert!(processor.install_declined());
    }

    #[test]
    fn test_accepted_install_enables_matting_without_restart() {
        let engine = Arc::new(ToggleMatting::unavailable(true));
        let processor = CutoutProcessor::new(engine.clone());
        let reporter = RecordingReporter::accepting_installs();
        let mut session = LumaSession::new(SegmentationModel::U2netp);

        processor
            .process_image(&split_image(), &mut session, &matting_on(), &reporter)
            .unwrap();

        assert_eq!(engine.install_calls(), 1);
        assert!(processor.matting_available());
        assert!(!processor.install_declined());
    }

    #[test]
    fn test_failed_install_degrades_silently() {
        let engine = Arc::new(ToggleMatting::unavailable(false));
        let processor = CutoutProcessor::new(engine.clone());
        let reporter = RecordingReporter::accepting_installs();
        let mut session = LumaSession::new(SegmentationModel::U2netp);

        for _ in 0..2 {
            processor
                .process_image(&split_image(), &mut session, &matting_on(), &reporter)
                .unwrap();
        }

        assert_eq!(engine.install_calls(), 1);
        assert_eq!(reporter.install_requests().len(), 1);
        assert!(processor.install_declined());
    }

    #[test]
    fn test_engine_available_later_is_used() {
        let engine = Arc::new(ToggleMatting::unavailable(false));
        let processor = CutoutProcessor::new(engine.clone());
        let reporter = RecordingReporter::new();
        let mut session = LumaSession::new(SegmentationModel::U2netp);

        processor
            .process_image(&split_image(), &mut session, &matting_on(), &reporter)
            .unwrap();
        assert!(processor.install_declined());

        engine.set_available(true);
        processor
            .process_image(&split_image(), &mut session, &matting_on(), &reporter)
            .unwrap();
        assert!(reporter
            .log_messages()
            .iter()
            .any(|m| m.contains("Alpha matting (FG:270")));
    }

    #[test]
    fn test_matting_errors_fall_back_to_base() {
        let processor = CutoutProcessor::new(Arc::new(ToggleMatting::failing()));
        let reporter = RecordingReporter::new();
        let mut session = LumaSession::new(SegmentationModel::U2netp);

        let out = processor
            .process_image(&split_image(), &mut session, &matting_on(), &reporter)
            .unwrap();
        assert_eq!(out.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert!(reporter
            .log_messages()
            .iter()
            .any(|m| m.contains("Alpha matting failed")));
    }

    #[test]
    fn test_negative_erode_falls_back_to_base() {
        let processor = CutoutProcessor::new(Arc::new(ToggleMatting::available()));
        let reporter = RecordingReporter::new();
        let mut session = LumaSession::new(SegmentationModel::U2netp);
        let config = MattingConfig {
            erode_size: -1,
            ..matting_on()
        };

        let out = processor
            .process_image(&split_image(), &mut session, &config, &reporter)
            .unwrap();
        assert_eq!(out.get_pixel(0, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_mask_is_resized_to_image() {
        let image = split_image();
        let mask = GrayImage::from_pixel(2, 2, image::Luma([255]));
        let out = naive_cutout(&image, &mask);
        assert_eq!(out.dimensions(), (8, 4));
        assert!(out.pixels().all(|p| p.0[3] > 0));
    }
}
