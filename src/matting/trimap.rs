//! Trimap construction from a segmentation mask

use image::{GrayImage, Luma};

/// Certain background
pub const TRIMAP_BACKGROUND: u8 = 0;
/// Undecided, left to the matting engine
pub const TRIMAP_UNKNOWN: u8 = 128;
/// Certain foreground
pub const TRIMAP_FOREGROUND: u8 = 255;

/// Percentile of non-zero mask values used when thresholding finds no
/// foreground at all
pub const RESCUE_PERCENTILE: f64 = 80.0;

/// Pixel counts per trimap class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrimapCounts {
    pub foreground: usize,
    pub background: usize,
    pub unknown: usize,
}

/// Single-channel map holding only 0, 128 and 255
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trimap(GrayImage);

impl Trimap {
    /// Classify every mask pixel against the 0-255 thresholds
    ///
    /// Values below `background_threshold` are background, values above
    /// `foreground_threshold` are foreground; background wins when both
    /// hold. If no pixel lands in the foreground, the foreground threshold is
    /// replaced by the 80th percentile of the non-zero mask values and every
    /// pixel at or above it becomes foreground.
    #[must_use]
    pub fn from_mask(mask: &GrayImage, foreground_threshold: i64, background_threshold: i64) -> Self {
        let classify = |value: u8| {
            let value = i64::from(value);
            if value < background_threshold {
                TRIMAP_BACKGROUND
            } else if value > foreground_threshold {
                TRIMAP_FOREGROUND
            } else {
                TRIMAP_UNKNOWN
            }
        };

        let mut trimap = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
            Luma([classify(mask.get_pixel(x, y).0[0])])
        });

        let has_foreground = trimap.pixels().any(|p| p.0[0] == TRIMAP_FOREGROUND);
        if !has_foreground {
            let mut nonzero: Vec<u8> = mask.as_raw().iter().copied().filter(|&v| v > 0).collect();
            if let Some(threshold) = percentile(&mut nonzero, RESCUE_PERCENTILE) {
                tracing::debug!(threshold, "no foreground in trimap, using percentile rescue");
                for (out, value) in trimap.pixels_mut().zip(mask.pixels()) {
                    if f64::from(value.0[0]) >= threshold {
                        out.0[0] = TRIMAP_FOREGROUND;
                    }
                }
            }
        }

        Self(trimap)
    }

    #[must_use]
    pub fn counts(&self) -> TrimapCounts {
        self.0
            .pixels()
            .fold(TrimapCounts::default(), |mut counts, p| {
                match p.0[0] {
                    TRIMAP_FOREGROUND => counts.foreground += 1,
                    TRIMAP_BACKGROUND => counts.background += 1,
                    _ => counts.unknown += 1,
                }
                counts
            })
    }

    #[must_use]
    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }
}

/// Linearly interpolated percentile, `None` for an empty slice
fn percentile(values: &mut [u8], percent: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let rank = percent / 100.0 * (values.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let low = f64::from(*values.get(lower)?);
    let high = f64::from(*values.get(upper)?);
    Some((high - low).mul_add(rank - lower as f64, low))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mask_from(values: &[u8], width: u32) -> GrayImage {
        GrayImage::from_raw(width, values.len() as u32 / width, values.to_vec()).unwrap()
    }

    #[test]
    fn test_threshold_classes() {
        let mask = mask_from(&[0, 5, 10, 100, 240, 241, 255, 9], 4);
        let trimap = Trimap::from_mask(&mask, 240, 10);
        assert_eq!(
            trimap.as_image().as_raw(),
            &vec![0, 0, 128, 128, 128, 255, 255, 0]
        );
        assert_eq!(
            trimap.counts(),
            TrimapCounts {
                foreground: 2,
                background: 3,
                unknown: 3
            }
        );
    }

    #[test]
    fn test_background_wins_on_overlap() {
        // fg 50 < bg 100: values in (50, 100) satisfy both rules
        let mask = mask_from(&[75, 150], 2);
        let trimap = Trimap::from_mask(&mask, 50, 100);
        assert_eq!(trimap.as_image().as_raw(), &vec![0, 255]);
    }

    #[test]
    fn test_rescue_with_unreachable_foreground_threshold() {
        // 270 can never be exceeded by an 8-bit mask
        let values: Vec<u8> = (1..=10).map(|v| v * 20).collect();
        let mask = mask_from(&values, 10);
        let trimap = Trimap::from_mask(&mask, 270, 10);

        // 80th percentile of 20..=200 is 164, so 180 and 200 become foreground
        let raw = trimap.as_image().as_raw();
        assert_eq!(raw[8], TRIMAP_FOREGROUND);
        assert_eq!(raw[9], TRIMAP_FOREGROUND);
        assert_eq!(raw[7], TRIMAP_UNKNOWN);
        assert_eq!(trimap.counts().foreground, 2);
    }

    #[test]
    fn test_rescue_on_uniform_mask_keeps_foreground() {
        let mask = mask_from(&[200; 6], 3);
        let trimap = Trimap::from_mask(&mask, 270, 10);
        assert_eq!(trimap.counts().foreground, 6);
    }

    #[test]
    fn test_all_zero_mask_stays_background() {
        let mask = mask_from(&[0; 4], 2);
        let trimap = Trimap::from_mask(&mask, 270, 10);
        assert_eq!(trimap.counts().background, 4);
    }

    #[test]
    fn test_percentile_interpolation() {
        assert_eq!(percentile(&mut [], 80.0), None);
        assert_eq!(percentile(&mut [7], 80.0), Some(7.0));
        let value = percentile(&mut [10, 20, 30, 40, 50], 80.0).unwrap();
        assert!((value - 42.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn trimap_holds_only_three_values(
            values in proptest::collection::vec(any::<u8>(), 1..64),
            fg in -10i64..300,
            bg in -10i64..300,
        ) {
            let width = values.len() as u32;
            let mask = mask_from(&values, width);
            let trimap = Trimap::from_mask(&mask, fg, bg);
            prop_assert!(trimap
                .as_image()
                .pixels()
                .all(|p| matches!(p.0[0], TRIMAP_BACKGROUND | TRIMAP_UNKNOWN | TRIMAP_FOREGROUND)));

            if values.iter().any(|&v| v > 0) {
                prop_assert!(trimap.counts().foreground > 0);
            }
        }
    }
}
