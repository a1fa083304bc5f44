//! Entropy-based saliency cropping.

use std::borrow::Cow;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};

use placetime_core::ImageCropper;

/// Longest the overflowing axis may be after scaling, in target lengths.
/// Sources with a more extreme aspect ratio are trimmed around their centre
/// first.
const MAX_SPAN: u64 = 8;

/// Crops to the most detailed region of an image.
///
/// The image is scaled so it covers the target size, then a target-sized
/// window slides along whichever axis overflows. The window whose luma
/// histogram has the highest Shannon entropy is kept; ties go to the
/// earliest window.
#[derive(Debug, Clone)]
pub struct SalienceCropper {
    step: u32,
}

impl Default for SalienceCropper {
    fn default() -> Self {
        Self { step: 4 }
    }
}

impl SalienceCropper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Distance in pixels between candidate windows. Values below one are
    /// raised to one.
    pub fn with_step(mut self, step: u32) -> Self {
        self.step = step.max(1);
        self
    }

    fn best_offset(&self, luma: &GrayImage, width: u32, height: u32) -> (u32, u32) {
        let overflow_x = luma.width() - width;
        let overflow_y = luma.height() - height;
        let horizontal = overflow_x > 0;
        let span = if horizontal { overflow_x } else { overflow_y };
        if span == 0 {
            return (0, 0);
        }

        let mut offsets: Vec<u32> = (0..=span).step_by(self.step as usize).collect();
        if offsets.last() != Some(&span) {
            offsets.push(span);
        }

        let mut best = (0, f64::MIN);
        for offset in offsets {
            let (x, y) = if horizontal { (offset, 0) } else { (0, offset) };
            let score = window_entropy(luma, x, y, width, height);
            if score > best.1 {
                best = (offset, score);
            }
        }

        if horizontal {
            (best.0, 0)
        } else {
            (0, best.0)
        }
    }
}

impl ImageCropper for SalienceCropper {
    fn crop(&self, image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
        let width = width.max(1);
        let height = height.max(1);
        let image = limit_aspect(image, width, height);
        let (src_w, src_h) = (image.width().max(1), image.height().max(1));

        // Scale so both sides cover the target, preserving aspect ratio.
        let scale_w = f64::from(width) / f64::from(src_w);
        let scale_h = f64::from(height) / f64::from(src_h);
        let (scaled_w, scaled_h) = if scale_w >= scale_h {
            let h = (f64::from(src_h) * scale_w).round() as u32;
            (width, h.max(height))
        } else {
            let w = (f64::from(src_w) * scale_h).round() as u32;
            (w.max(width), height)
        };
        let scaled = image.resize_exact(scaled_w, scaled_h, FilterType::Triangle);

        let luma = scaled.to_luma8();
        let (x, y) = self.best_offset(&luma, width, height);
        scaled.crop_imm(x, y, width, height)
    }
}

/// Centre-trim the long axis so cover-scaling stays within [`MAX_SPAN`]
/// target lengths.
fn limit_aspect(image: &DynamicImage, width: u32, height: u32) -> Cow<'_, DynamicImage> {
    let (src_w, src_h) = (u64::from(image.width()), u64::from(image.height()));
    let (width, height) = (u64::from(width), u64::from(height));
    if src_w == 0 || src_h == 0 {
        return Cow::Borrowed(image);
    }

    if src_h * width > src_w * height {
        // Taller than the target: scaled by width / src_w.
        let max_h = (height * MAX_SPAN * src_w / width).max(1);
        if src_h > max_h {
            let y = (src_h - max_h) / 2;
            return Cow::Owned(image.crop_imm(0, y as u32, src_w as u32, max_h as u32));
        }
    } else {
        // Wider than the target: scaled by height / src_h.
        let max_w = (width * MAX_SPAN * src_h / height).max(1);
        if src_w > max_w {
            let x = (src_w - max_w) / 2;
            return Cow::Owned(image.crop_imm(x as u32, 0, max_w as u32, src_h as u32));
        }
    }
    Cow::Borrowed(image)
}

/// Shannon entropy, in bits, of the luma histogram of one window.
fn window_entropy(luma: &GrayImage, x: u32, y: u32, width: u32, height: u32) -> f64 {
    let mut histogram = [0u32; 256];
    for row in y..y + height {
        for col in x..x + width {
            histogram[luma.get_pixel(col, row).0[0] as usize] += 1;
        }
    }

    let total = f64::from(width * height);
    histogram
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = f64::from(count) / total;
            -p * p.log2()
        })
        .sum()
}
