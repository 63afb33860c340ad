//! Output resize post-processing

use crate::config::ResizeConfig;
use image::{imageops::FilterType, DynamicImage};

/// Target dimensions for `(width, height)` under `config`
///
/// Returns `None` when the image should be left unchanged: resizing is
/// disabled, a bound is zero, or a keep-aspect image already fits.
#[must_use]
pub fn target_dimensions(width: u32, height: u32, config: &ResizeConfig) -> Option<(u32, u32)> {
    if !config.enabled || config.width == 0 || config.height == 0 {
        return None;
    }

    if !config.keep_aspect {
        return Some((config.width, config.height));
    }

    if width <= config.width && height <= config.height {
        return None;
    }

    let scale = (f64::from(config.width) / f64::from(width))
        .min(f64::from(config.height) / f64::from(height));
    let new_width = ((f64::from(width) * scale).round() as u32).clamp(1, config.width);
    let new_height = ((f64::from(height) * scale).round() as u32).clamp(1, config.height);
    Some((new_width, new_height))
}

/// Apply the resize configuration to a processed image
///
/// Keep-aspect mode only ever shrinks; the exact mode stretches to the
/// configured size. Zero bounds are logged and ignored.
#[must_use]
pub fn apply_resize(image: DynamicImage, config: &ResizeConfig) -> DynamicImage {
    if config.enabled && (config.width == 0 || config.height == 0) {
        tracing::warn!(
            width = config.width,
            height = config.height,
            "resize bounds must be positive, keeping original size"
        );
        return image;
    }

    match target_dimensions(image.width(), image.height(), config) {
        Some((width, height)) => {
            tracing::debug!(
                from_width = image.width(),
                from_height = image.height(),
                width,
                height,
                "resizing output"
            );
            image.resize_exact(width, height, FilterType::Lanczos3)
        },
        None => image,
    }
}
