//! Guided-filter matting engine
//!
//! Certain regions of the trimap are eroded and the remaining band is seeded
//! with 0.5. The seed is then smoothed with a gray guided filter steered by
//! the source image luminance, so alpha edges follow image edges. Window
//! means come from the `imageops-ai` box filter.

use super::{MattingEngine, MattingParams, Trimap, TRIMAP_BACKGROUND, TRIMAP_FOREGROUND};
use crate::error::{BgBatchError, Result};
use image::{GrayImage, ImageBuffer, Luma, Rgba, RgbImage, RgbaImage};
use imageops_ai::BoxFilter;
use imageproc::distance_transform::Norm;
use imageproc::morphology::erode;

/// Matting engine built on a gray guided filter
#[derive(Debug, Clone)]
pub struct GuidedFilterMatting {
    /// Regularization; smaller values follow guidance edges more closely
    pub epsilon: f32,
    /// Lower bound for the filter window radius
    pub min_radius: u32,
    /// Upper bound for the filter window radius
    pub max_radius: u32,
}

impl Default for GuidedFilterMatting {
    fn default() -> Self {
        Self {
            epsilon: 1e-3,
            min_radius: 4,
            max_radius: 64,
        }
    }
}

impl GuidedFilterMatting {
    fn radius_for(&self, erode_size: u32) -> u32 {
        erode_size.saturating_mul(2).clamp(self.min_radius, self.max_radius)
    }
}

impl MattingEngine for GuidedFilterMatting {
    fn is_available(&self) -> bool {
        true
    }

    fn install(&self) -> Result<()> {
        Ok(())
    }

    fn refine(
        &self,
        image: &RgbImage,
        trimap: &Trimap,
        params: &MattingParams,
    ) -> Result<RgbaImage> {
        if image.dimensions() != trimap.dimensions() {
            return Err(BgBatchError::processing(format!(
                "trimap size {:?} does not match image size {:?}",
                trimap.dimensions(),
                image.dimensions()
            )));
        }
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(BgBatchError::processing("cannot matte an empty image"));
        }

        let (foreground, background) = certain_regions(trimap.as_image(), params.erode_size);

        let guidance = LumaF32::from_fn(width, height, |x, y| {
            let [r, g, b] = image.get_pixel(x, y).0;
            Luma([(0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b)) / 255.0])
        });
        let seed = LumaF32::from_fn(width, height, |x, y| {
            let value = if foreground.get_pixel(x, y).0[0] > 0 {
                1.0
            } else if background.get_pixel(x, y).0[0] > 0 {
                0.0
            } else {
                0.5
            };
            Luma([value])
        });

        let radius = self.radius_for(params.erode_size);
        let filtered = guided_filter(&guidance, &seed, radius, self.epsilon)?;

        let mut output = RgbaImage::new(width, height);
        for (((out, src), (fg, bg)), value) in output
            .pixels_mut()
            .zip(image.pixels())
            .zip(foreground.pixels().zip(background.pixels()))
            .zip(filtered.pixels())
        {
            let mut alpha = if fg.0[0] > 0 {
                1.0
            } else if bg.0[0] > 0 {
                0.0
            } else {
                value.0[0].clamp(0.0, 1.0)
            };
            if alpha < params.background_threshold {
                alpha = 0.0;
            } else if params.foreground_threshold < 1.0 && alpha > params.foreground_threshold {
                alpha = 1.0;
            }

            let alpha = (alpha * 255.0).round() as u8;
            *out = if alpha == 0 {
                Rgba([0, 0, 0, 0])
            } else {
                let [r, g, b] = src.0;
                Rgba([r, g, b, alpha])
            };
        }

        Ok(output)
    }
}

/// Eroded foreground and background masks (255 = certain)
fn certain_regions(trimap: &GrayImage, erode_size: u32) -> (GrayImage, GrayImage) {
    let select = |class: u8| {
        GrayImage::from_fn(trimap.width(), trimap.height(), |x, y| {
            Luma([if trimap.get_pixel(x, y).0[0] == class { 255 } else { 0 }])
        })
    };
    let foreground = select(TRIMAP_FOREGROUND);
    let background = select(TRIMAP_BACKGROUND);

    if erode_size == 0 {
        return (foreground, background);
    }
    let k = erode_size.min(u32::from(u8::MAX)) as u8;
    (
        erode(&foreground, Norm::LInf, k),
        erode(&background, Norm::LInf, k),
    )
}

type LumaF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Window mean through the summed-area box filter of `imageops-ai`
///
/// The radius is clamped per axis because the filter rejects windows wider
/// than the image.
fn box_mean(src: &LumaF32, radius: u32) -> Result<LumaF32> {
    let x_radius = radius.min(src.width().saturating_sub(1));
    let y_radius = radius.min(src.height().saturating_sub(1));
    src.box_filter(x_radius, y_radius)
        .map_err(|e| BgBatchError::processing(format!("box filter failed: {e}")))
}

fn zip_map(a: &LumaF32, b: &LumaF32, f: impl Fn(f32, f32) -> f32) -> LumaF32 {
    LumaF32::from_fn(a.width(), a.height(), |x, y| {
        Luma([f(a.get_pixel(x, y).0[0], b.get_pixel(x, y).0[0])])
    })
}

/// Gray guided filter of `input` steered by `guidance`
fn guided_filter(
    guidance: &LumaF32,
    input: &LumaF32,
    radius: u32,
    epsilon: f32,
) -> Result<LumaF32> {
    let mean_i = box_mean(guidance, radius)?;
    let mean_p = box_mean(input, radius)?;
    let mean_ii = box_mean(&zip_map(guidance, guidance, |i, j| i * j), radius)?;
    let mean_ip = box_mean(&zip_map(guidance, input, |i, p| i * p), radius)?;

    let (width, height) = guidance.dimensions();
    let mut a = LumaF32::new(width, height);
    let mut b = LumaF32::new(width, height);
    for (x, y, a_px) in a.enumerate_pixels_mut() {
        let mi = mean_i.get_pixel(x, y).0[0];
        let mp = mean_p.get_pixel(x, y).0[0];
        let var = mi.mul_add(-mi, mean_ii.get_pixel(x, y).0[0]);
        let cov = mi.mul_add(-mp, mean_ip.get_pixel(x, y).0[0]);
        let a_val = cov / (var + epsilon);
        a_px.0[0] = a_val;
        b.put_pixel(x, y, Luma([a_val.mul_add(-mi, mp)]));
    }

    let mean_a = box_mean(&a, radius)?;
    let mean_b = box_mean(&b, radius)?;
    Ok(LumaF32::from_fn(width, height, |x, y| {
        let i = guidance.get_pixel(x, y).0[0];
        Luma([mean_a.get_pixel(x, y).0[0].mul_add(i, mean_b.get_pixel(x, y).0[0])])
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn params(erode_size: u32) -> MattingParams {
        MattingParams {
            foreground_threshold: 270.0 / 255.0,
            background_threshold: 10.0 / 255.0,
            erode_size,
        }
    }

    /// White square on black with a matching trimap and a one pixel unknown band
    fn square_fixture() -> (RgbImage, Trimap) {
        let image = RgbImage::from_fn(20, 20, |x, y| {
            if (5..15).contains(&x) && (5..15).contains(&y) {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let mask = GrayImage::from_fn(20, 20, |x, y| {
            if (6..14).contains(&x) && (6..14).contains(&y) {
                Luma([255])
            } else if (4..16).contains(&x) && (4..16).contains(&y) {
                Luma([128])
            } else {
                Luma([0])
            }
        });
        (image, Trimap::from_mask(&mask, 200, 10))
    }

    #[test]
    fn test_box_mean_interior_and_clamped_radius() {
        let ramp = LumaF32::from_fn(5, 3, |x, _| Luma([x as f32]));
        let out = box_mean(&ramp, 1).unwrap();
        assert!((out.get_pixel(2, 1).0[0] - 2.0).abs() < 1e-6);

        // A radius wider than the image is clamped instead of rejected
        let narrow = LumaF32::from_pixel(2, 40, Luma([3.0]));
        let out = box_mean(&narrow, 16).unwrap();
        assert_eq!(out.dimensions(), (2, 40));
        assert!((out.get_pixel(1, 20).0[0] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_guided_filter_keeps_flat_input() {
        let guidance = LumaF32::from_fn(12, 12, |x, _| Luma([if x < 6 { 0.0 } else { 1.0 }]));
        let input = LumaF32::from_pixel(12, 12, Luma([0.5]));
        let out = guided_filter(&guidance, &input, 2, 1e-3).unwrap();
        assert!((out.get_pixel(6, 6).0[0] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_tiny_image_is_refined() {
        let image = RgbImage::from_pixel(1, 1, Rgb([200, 200, 200]));
        let trimap = Trimap::from_mask(&GrayImage::from_pixel(1, 1, Luma([128])), 200, 10);
        let engine = GuidedFilterMatting::default();
        let out = engine.refine(&image, &trimap, &params(10)).unwrap();
        assert_eq!(out.dimensions(), (1, 1));
    }

    #[test]
    fn test_certain_regions_are_kept() {
        let (image, trimap) = square_fixture();
        let engine = GuidedFilterMatting::default();
        let out = engine.refine(&image, &trimap, &params(0)).unwrap();

        assert_eq!(out.dimensions(), (20, 20));
        assert_eq!(out.get_pixel(10, 10).0, [255, 255, 255, 255]);
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_erosion_widens_unknown_band() {
        let (image, trimap) = square_fixture();
        let (fg, bg) = certain_regions(trimap.as_image(), 1);
        assert_eq!(fg.get_pixel(6, 6).0[0], 0);
        assert_eq!(fg.get_pixel(10, 10).0[0], 255);
        assert_eq!(bg.get_pixel(3, 10).0[0], 0);
        assert_eq!(bg.get_pixel(0, 0).0[0], 255);

        let engine = GuidedFilterMatting::default();
        let out = engine.refine(&image, &trimap, &params(1)).unwrap();
        assert_eq!(out.get_pixel(10, 10).0[3], 255);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let (_, trimap) = square_fixture();
        let image = RgbImage::new(10, 10);
        let engine = GuidedFilterMatting::default();
        assert!(engine.refine(&image, &trimap, &params(0)).is_err());
    }
}
