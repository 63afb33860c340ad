//! Tensor conversion shared by segmentation backends

use crate::{
    error::{BgBatchError, Result},
    models::PreprocessingConfig,
};
use image::{imageops::FilterType, DynamicImage, GrayImage, Luma};
use ndarray::{Array4, ArrayView2};

/// Image to NCHW tensor conversion and mask postprocessing
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Preprocess image for model inference
    ///
    /// The image is stretched to the square model input, scaled by its
    /// brightest channel value and normalized per channel.
    ///
    /// # Errors
    /// - Zero-sized input image
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<Array4<f32>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(BgBatchError::processing("cannot segment an empty image"));
        }

        let size = preprocessing_config.target_size;
        let resized = image::imageops::resize(&image.to_rgb8(), size, size, FilterType::Lanczos3);

        let max_value = resized
            .as_raw()
            .iter()
            .copied()
            .max()
            .map_or(0.0, f32::from)
            .max(1e-6);

        let side = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                let value = f32::from(pixel.0[channel]) / max_value;
                tensor[[0, channel, y as usize, x as usize]] = (value
                    - preprocessing_config.normalization_mean[channel])
                    / preprocessing_config.normalization_std[channel];
            }
        }

        Ok(tensor)
    }

    /// Convert a raw prediction plane into a mask at the original size
    ///
    /// Predictions are min-max normalized before quantizing to 8 bits, so a
    /// constant prediction yields an all-zero mask.
    #[must_use]
    pub fn prediction_to_mask(prediction: ArrayView2<'_, f32>, width: u32, height: u32) -> GrayImage {
        let (rows, cols) = prediction.dim();
        let (min, max) = prediction
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;

        let small = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
            let value = prediction[[y as usize, x as usize]];
            let normalized = if range > f32::EPSILON {
                (value - min) / range
            } else {
                0.0
            };
            Luma([(normalized * 255.0).round().clamp(0.0, 255.0) as u8])
        });

        if small.dimensions() == (width, height) {
            small
        } else {
            image::imageops::resize(&small, width, height, FilterType::Lanczos3)
        }
    }
}
