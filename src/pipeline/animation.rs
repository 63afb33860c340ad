//! Animation batch pipeline
//!
//! Turns a folder of frames into one looping WebP or GIF. Frames of different
//! sizes share a canvas as large as the largest frame; with ghost prevention
//! every frame is centered on a transparent canvas and the previous frame is
//! cleared before the next one is drawn.

use crate::{
    config::{AnimationConfig, AnimationFormat, OutputLayout},
    error::{BgBatchError, Result},
    services::{ImageIOService, ProgressReporter, RunEvent},
};
use image::{imageops, RgbaImage};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Smallest number of supported files an animation folder must hold
pub const MIN_FRAMES: usize = 2;

/// Outcome of one animation run
#[derive(Debug, Clone, Serialize)]
pub struct AnimationReport {
    pub source: PathBuf,
    pub output: PathBuf,
    pub format: AnimationFormat,
    /// Frames written to the animation
    pub frames: usize,
    /// Files that could not be decoded
    pub skipped: usize,
    pub canvas_width: u32,
    pub canvas_height: u32,
}

/// Frames prepared for encoding onto a shared canvas
#[derive(Debug, Clone)]
pub struct CanvasFrames {
    pub width: u32,
    pub height: u32,
    /// Canvas-sized frames when ghost prevention is on, the source frames
    /// otherwise
    pub frames: Vec<RgbaImage>,
}

/// Compute the shared canvas and, with `prevent_ghosting`, center every
/// frame on a transparent canvas at `floor((max - size) / 2)`
#[must_use]
pub fn normalize_frames(frames: Vec<RgbaImage>, prevent_ghosting: bool) -> CanvasFrames {
    let width = frames.iter().map(RgbaImage::width).max().unwrap_or(0);
    let height = frames.iter().map(RgbaImage::height).max().unwrap_or(0);

    let frames = if prevent_ghosting {
        frames
            .into_iter()
            .map(|frame| {
                let left = (width - frame.width()) / 2;
                let top = (height - frame.height()) / 2;
                place_on_canvas(&frame, width, height, left, top)
            })
            .collect()
    } else {
        frames
    };

    CanvasFrames {
        width,
        height,
        frames,
    }
}

/// Copy `frame` onto a transparent `width x height` canvas at `(left, top)`
fn place_on_canvas(frame: &RgbaImage, width: u32, height: u32, left: u32, top: u32) -> RgbaImage {
    if frame.dimensions() == (width, height) {
        return frame.clone();
    }
    let mut canvas = RgbaImage::new(width, height);
    imageops::replace(&mut canvas, frame, i64::from(left), i64::from(top));
    canvas
}

/// Builds one animation per folder under `animation/`
pub struct AnimationPipeline<'a> {
    layout: &'a OutputLayout,
}

impl<'a> AnimationPipeline<'a> {
    pub fn new(layout: &'a OutputLayout) -> Self {
        Self { layout }
    }

    /// Build the animation for one folder
    ///
    /// # Errors
    /// - Validation: fewer than two supported files, or none decodable
    /// - Source folder unreadable
    /// - Encoder failures or output write failures
    pub fn run(
        &self,
        folder: &Path,
        config: &AnimationConfig,
        reporter: &dyn ProgressReporter,
    ) -> Result<AnimationReport> {
        let folder_name = ImageIOService::folder_name(folder);
        let span = tracing::info_span!("animation", folder = %folder_name, format = %config.format);
        let _guard = span.enter();

        let files = ImageIOService::list_image_files(folder)?;
        if files.len() < MIN_FRAMES {
            return Err(BgBatchError::validation(format!(
                "need at least {MIN_FRAMES} images to build an animation, found {} in {}",
                files.len(),
                folder.display()
            )));
        }

        reporter.info(format!(
            "Building {} animation from {} images",
            config.format.extension().to_uppercase(),
            files.len()
        ));

        let mut frames = Vec::with_capacity(files.len());
        let mut skipped = 0;
        for (index, path) in files.iter().enumerate() {
            match ImageIOService::load_image(path) {
                Ok(image) => {
                    let frame = image.to_rgba8();
                    tracing::debug!(
                        file = %path.display(),
                        width = frame.width(),
                        height = frame.height(),
                        "frame loaded"
                    );
                    frames.push(frame);
                },
                Err(e) => {
                    skipped += 1;
                    reporter.warn(format!("  Skipping frame {}: {e}", path.display()));
                },
            }
            reporter.report(RunEvent::FolderProgress {
                processed: index + 1,
                total: files.len(),
            });
        }

        if frames.is_empty() {
            return Err(BgBatchError::validation(format!(
                "no frame in {} could be loaded",
                folder.display()
            )));
        }

        let canvas = normalize_frames(frames, config.prevent_ghosting);
        reporter.info(format!("  Canvas: {}x{}", canvas.width, canvas.height));
        if config.prevent_ghosting {
            reporter.info("  Ghost prevention: frames centered, background restored".to_string());
        }

        let bytes = match config.format {
            AnimationFormat::WebP => encode_webp(&canvas, config)?,
            AnimationFormat::Gif => encode_gif(&canvas, config)?,
        };

        let animation_dir = self.layout.animation_dir();
        fs::create_dir_all(&animation_dir).map_err(|e| {
            BgBatchError::file_io_error("create animation folder", &animation_dir, &e)
        })?;
        let output = ImageIOService::unique_file_path(
            &animation_dir,
            &format!("{folder_name}.{}", config.format.extension()),
        );
        fs::write(&output, &bytes)
            .map_err(|e| BgBatchError::file_io_error("write animation", &output, &e))?;

        reporter.info(format!(
            "Animation saved: {} ({} frames, {} ms per frame, {})",
            output.display(),
            canvas.frames.len(),
            config.frame_duration_ms,
            if config.looping { "looping" } else { "play once" }
        ));
        tracing::info!(bytes = bytes.len(), frames = canvas.frames.len(), "animation written");

        Ok(AnimationReport {
            source: folder.to_path_buf(),
            output,
            format: config.format,
            frames: canvas.frames.len(),
            skipped,
            canvas_width: canvas.width,
            canvas_height: canvas.height,
        })
    }
}

/// Lossy animated WebP, method 4
///
/// libwebp needs every frame at canvas size, so frames that were not
/// centered are anchored top-left on a transparent canvas.
fn encode_webp(canvas: &CanvasFrames, config: &AnimationConfig) -> Result<Vec<u8>> {
    let mut webp_config = webp::WebPConfig::new()
        .map_err(|()| BgBatchError::encoding("failed to initialize WebP encoder config"))?;
    webp_config.lossless = 0;
    webp_config.quality = f32::from(config.quality);
    webp_config.method = 4;

    let padded: Vec<RgbaImage> = canvas
        .frames
        .iter()
        .map(|frame| place_on_canvas(frame, canvas.width, canvas.height, 0, 0))
        .collect();

    let mut encoder = webp::AnimEncoder::new(canvas.width, canvas.height, &webp_config);
    encoder.set_bgcolor([0, 0, 0, 0]);
    encoder.set_loop_count(if config.looping { 0 } else { 1 });

    let duration = i32::try_from(config.frame_duration_ms).unwrap_or(i32::MAX);
    for (index, frame) in padded.iter().enumerate() {
        let timestamp = duration.saturating_mul(i32::try_from(index).unwrap_or(i32::MAX));
        encoder.add_frame(webp::AnimFrame::from_rgba(
            frame.as_raw(),
            canvas.width,
            canvas.height,
            timestamp,
        ));
    }

    let data = encoder
        .try_encode()
        .map_err(|e| BgBatchError::encoding(format!("WebP animation encoding failed: {e:?}")))?;
    Ok(data.to_vec())
}

/// Quantizer speed for a 1-100 quality: 100 gives the slowest, best palette
fn gif_speed(quality: u8) -> i32 {
    let quality = i32::from(quality.clamp(1, 100));
    30 - (quality - 1) * 29 / 99
}

/// Palette GIF
///
/// Frames are quantized individually. Ghost prevention restores the
/// background after every frame and gives every frame a transparent index;
/// otherwise frames stack on each other and only frames with fully
/// transparent pixels carry one.
fn encode_gif(canvas: &CanvasFrames, config: &AnimationConfig) -> Result<Vec<u8>> {
    let to_u16 = |value: u32, what: &str| {
        u16::try_from(value).map_err(|_| {
            BgBatchError::encoding(format!("{what} {value} exceeds the GIF limit of 65535"))
        })
    };
    let width = to_u16(canvas.width, "canvas width")?;
    let height = to_u16(canvas.height, "canvas height")?;
    let speed = gif_speed(config.quality);
    let delay = u16::try_from(config.frame_duration_ms / 10).unwrap_or(u16::MAX);
    let dispose = if config.prevent_ghosting {
        gif::DisposalMethod::Background
    } else {
        gif::DisposalMethod::Keep
    };

    let mut buffer = Vec::new();
    {
        let mut encoder = gif::Encoder::new(&mut buffer, width, height, &[])
            .map_err(|e| BgBatchError::encoding(format!("GIF header: {e}")))?;
        // No loop extension at all means a single play-through
        if config.looping {
            encoder
                .set_repeat(gif::Repeat::Infinite)
                .map_err(|e| BgBatchError::encoding(format!("GIF loop extension: {e}")))?;
        }

        for frame in &canvas.frames {
            let mut pixels = frame.as_raw().clone();
            let mut gif_frame = gif::Frame::from_rgba_speed(
                to_u16(frame.width(), "frame width")?,
                to_u16(frame.height(), "frame height")?,
                &mut pixels,
                speed,
            );
            if config.prevent_ghosting {
                reserve_transparent_index(&mut gif_frame);
            }
            gif_frame.delay = delay;
            gif_frame.dispose = dispose;
            encoder
                .write_frame(&gif_frame)
                .map_err(|e| BgBatchError::encoding(format!("GIF frame: {e}")))?;
        }
    }
    Ok(buffer)
}

/// Make sure an opaque frame still has a transparent palette slot
///
/// A spare slot is appended when the palette has room. A full palette gives
/// up its entry closest to another entry, whose pixels are remapped first.
fn reserve_transparent_index(frame: &mut gif::Frame<'_>) {
    if frame.transparent.is_some() {
        return;
    }
    let Some(palette) = frame.palette.as_mut() else {
        return;
    };

    let entries = palette.len() / 3;
    if entries < 256 {
        palette.extend_from_slice(&[0, 0, 0]);
        frame.transparent = u8::try_from(entries).ok();
        return;
    }

    let colors: Vec<[i32; 3]> = palette
        .chunks_exact(3)
        .map(|c| [i32::from(c[0]), i32::from(c[1]), i32::from(c[2])])
        .collect();
    let mut closest = (i32::MAX, 0u8, 0u8);
    for (i, a) in colors.iter().enumerate() {
        for (j, b) in colors.iter().enumerate().skip(i + 1) {
            let distance: i32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
            if distance < closest.0 {
                closest = (distance, j as u8, i as u8);
            }
        }
    }

    let (_, freed, kept) = closest;
    for index in frame.buffer.to_mut().iter_mut() {
        if *index == freed {
            *index = kept;
        }
    }
    frame.transparent = Some(freed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::RecordingReporter;
    use image::{Rgba, RgbImage};
    use tempfile::tempdir;

    fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(color))
    }

    #[test]
    fn test_normalize_centers_on_max_canvas() {
        let frames = vec![solid(100, 100, [255, 0, 0, 255]), solid(200, 150, [0, 0, 255, 255])];
        let canvas = normalize_frames(frames, true);

        assert_eq!((canvas.width, canvas.height), (200, 150));
        assert!(canvas.frames.iter().all(|f| f.dimensions() == (200, 150)));
        let first = &canvas.frames[0];
        assert_eq!(first.get_pixel(49, 25).0[3], 0);
        assert_eq!(first.get_pixel(50, 24).0[3], 0);
        assert_eq!(first.get_pixel(50, 25).0, [255, 0, 0, 255]);
        assert_eq!(first.get_pixel(149, 124).0, [255, 0, 0, 255]);
        assert_eq!(first.get_pixel(150, 125).0[3], 0);
    }

    #[test]
    fn test_normalize_odd_difference_rounds_down() {
        let frames = vec![solid(3, 3, [1, 2, 3, 255]), solid(6, 6, [0, 0, 0, 255])];
        let canvas = normalize_frames(frames, true);
        // (6 - 3) / 2 = 1
        assert_eq!(canvas.frames[0].get_pixel(0, 0).0[3], 0);
        assert_eq!(canvas.frames[0].get_pixel(1, 1).0, [1, 2, 3, 255]);
        assert_eq!(canvas.frames[0].get_pixel(4, 4).0[3], 0);
    }

    #[test]
    fn test_normalize_without_ghosting_keeps_frames() {
        let frames = vec![solid(10, 10, [0, 0, 0, 255]), solid(20, 5, [0, 0, 0, 255])];
        let canvas = normalize_frames(frames, false);
        assert_eq!((canvas.width, canvas.height), (20, 10));
        assert_eq!(canvas.frames[0].dimensions(), (10, 10));
        assert_eq!(canvas.frames[1].dimensions(), (20, 5));
    }

    #[test]
    fn test_gif_speed_range() {
        assert_eq!(gif_speed(100), 1);
        assert_eq!(gif_speed(1), 30);
        assert!((1..=30).contains(&gif_speed(80)));
    }

    #[test]
    fn test_single_image_is_rejected_without_output() {
        let source = tempdir().unwrap();
        let out = tempdir().unwrap();
        RgbImage::new(4, 4).save(source.path().join("only.png")).unwrap();

        let layout = OutputLayout::new(out.path());
        let result = AnimationPipeline::new(&layout).run(
            source.path(),
            &AnimationConfig::default(),
            &RecordingReporter::new(),
        );

        let err = result.unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("need at least 2 images"));
        assert!(!layout.animation_dir().exists());
    }

    #[test]
    fn test_unreadable_frames_are_skipped() {
        let source = tempdir().unwrap();
        let out = tempdir().unwrap();
        solid(8, 8, [255, 0, 0, 255]).save(source.path().join("a.png")).unwrap();
        solid(8, 8, [0, 255, 0, 255]).save(source.path().join("b.png")).unwrap();
        fs::write(source.path().join("c.png"), b"garbage").unwrap();

        let layout = OutputLayout::new(out.path());
        let config = AnimationConfig::builder()
            .format(AnimationFormat::Gif)
            .build()
            .unwrap();
        let reporter = RecordingReporter::new();
        let report = AnimationPipeline::new(&layout)
            .run(source.path(), &config, &reporter)
            .unwrap();

        assert_eq!((report.frames, report.skipped), (2, 1));
        assert_eq!(reporter.folder_progress().last(), Some(&(3, 3)));
        assert!(report.output.is_file());
    }

    #[test]
    fn test_all_frames_unreadable_is_a_validation_error() {
        let source = tempdir().unwrap();
        let out = tempdir().unwrap();
        fs::write(source.path().join("a.png"), b"x").unwrap();
        fs::write(source.path().join("b.png"), b"y").unwrap();

        let layout = OutputLayout::new(out.path());
        let err = AnimationPipeline::new(&layout)
            .run(source.path(), &AnimationConfig::default(), &RecordingReporter::new())
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_webp_output_is_named_after_folder_and_uniquified() {
        let root = tempdir().unwrap();
        let source = root.path().join("walk");
        fs::create_dir(&source).unwrap();
        solid(6, 6, [255, 0, 0, 255]).save(source.join("1.png")).unwrap();
        solid(4, 8, [0, 0, 255, 128]).save(source.join("2.png")).unwrap();

        let out = tempdir().unwrap();
        let layout = OutputLayout::new(out.path());
        let pipeline = AnimationPipeline::new(&layout);
        let config = AnimationConfig::default();

        let first = pipeline
            .run(&source, &config, &RecordingReporter::new())
            .unwrap();
        let second = pipeline
            .run(&source, &config, &RecordingReporter::new())
            .unwrap();

        assert_eq!(first.output, layout.animation_dir().join("walk.webp"));
        assert_eq!(second.output, layout.animation_dir().join("walk_2.webp"));
        assert_eq!((first.canvas_width, first.canvas_height), (6, 8));
        let bytes = fs::read(&first.output).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WEBP");
    }

    #[test]
    fn test_gif_play_once_has_no_loop_extension() {
        let canvas = normalize_frames(
            vec![solid(4, 4, [255, 0, 0, 255]), solid(4, 4, [0, 0, 0, 0])],
            true,
        );
        let config = AnimationConfig {
            format: AnimationFormat::Gif,
            looping: false,
            ..AnimationConfig::default()
        };
        let once = encode_gif(&canvas, &config).unwrap();
        let looping = encode_gif(
            &canvas,
            &AnimationConfig {
                looping: true,
                ..config
            },
        )
        .unwrap();

        let has_netscape = |bytes: &[u8]| bytes.windows(8).any(|w| w == b"NETSCAPE");
        assert!(!has_netscape(&once));
        assert!(has_netscape(&looping));
    }

    /// Transparent index and RGBA pixels of every decoded frame
    fn decode_gif(bytes: &[u8]) -> Vec<(Option<u8>, Vec<u8>)> {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::RGBA);
        let mut decoder = options.read_info(bytes).unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = decoder.read_next_frame().unwrap() {
            frames.push((frame.transparent, frame.buffer.to_vec()));
        }
        frames
    }

    #[test]
    fn test_ghost_prevention_gives_opaque_frames_a_transparent_index() {
        let canvas = normalize_frames(
            vec![solid(6, 6, [255, 0, 0, 255]), solid(6, 6, [0, 0, 255, 255])],
            true,
        );
        let config = AnimationConfig {
            format: AnimationFormat::Gif,
            ..AnimationConfig::default()
        };

        let frames = decode_gif(&encode_gif(&canvas, &config).unwrap());
        assert_eq!(frames.len(), 2);
        for (transparent, pixels) in &frames {
            assert!(transparent.is_some());
            assert!(pixels.chunks_exact(4).all(|p| p[3] == 255));
        }

        let stacked = AnimationConfig {
            prevent_ghosting: false,
            ..config
        };
        let frames = decode_gif(&encode_gif(&canvas, &stacked).unwrap());
        assert!(frames.iter().all(|(transparent, _)| transparent.is_none()));
    }

    #[test]
    fn test_full_palette_frees_a_slot_for_transparency() {
        let busy = RgbaImage::from_fn(32, 32, |x, y| {
            Rgba([(x * 8) as u8, (y * 8) as u8, ((x + y) * 4) as u8, 255])
        });
        let mut pixels = busy.as_raw().clone();
        let mut frame = gif::Frame::from_rgba_speed(32, 32, &mut pixels, 10);
        assert_eq!(frame.palette.as_ref().map(|p| p.len() / 3), Some(256));
        assert!(frame.transparent.is_none());

        reserve_transparent_index(&mut frame);
        let freed = frame.transparent.unwrap();
        assert!(frame.buffer.iter().all(|&index| index != freed));
    }

    #[test]
    fn test_small_palette_gets_a_spare_slot() {
        let mut pixels = solid(4, 4, [10, 20, 30, 255]).into_raw();
        let mut frame = gif::Frame::from_rgba_speed(4, 4, &mut pixels, 10);
        let entries = frame.palette.as_ref().map_or(0, |p| p.len() / 3);

        reserve_transparent_index(&mut frame);
        assert_eq!(frame.transparent, Some(entries as u8));
        assert_eq!(frame.palette.as_ref().map(|p| p.len() / 3), Some(entries + 1));
    }
}
