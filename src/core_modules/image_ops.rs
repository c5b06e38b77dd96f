// THEORY:
// `image_ops` is the leaf layer of the tracker: a thin set of whole-image primitives
// that the calibrator and the ROI tracker compose into their algorithms. Pixel
// buffers come from the `image` crate and the mask primitives (threshold,
// morphology, labelling) from `imageproc`. The rest are simple per-pixel loops.
//
// Conventions:
// - Color frames are `RgbImage`. HSV images reuse the same 3-byte buffer type with
//   channels holding (hue, saturation, value) in the 8-bit layout from `pixel`.
// - Masks are `GrayImage` holding 0 (background) or 255 (foreground).
// - "Opening" is an erosion followed by a dilation with a square structuring
//   element of side `2 * radius + 1`. It removes specks smaller than the element
//   while leaving larger regions essentially untouched.
// - Blob extraction uses 8-connectivity; the returned label image lets callers
//   compute moments or masks restricted to a single blob.
//
// Every function that writes into a caller-provided buffer expects that buffer to
// already have the right dimensions. This is what lets the ROI pyramid own its
// scratch images and reuse them every frame without reallocating.

use crate::core_modules::blob::{BoundingBox, Blob};
use crate::core_modules::pixel::pixel::{luma, rgb_to_hsv_bytes, HsvWindow};
use image::{GrayImage, ImageBuffer, Luma, RgbImage};

/// 3-channel image whose channels are (hue, saturation, value).
pub type HsvImage = RgbImage;
/// Per-pixel blob labels; 0 is background.
pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

pub mod image_ops {
    use super::*;
    use imageproc::contrast::{self, ThresholdType};
    use imageproc::distance_transform::Norm;
    use imageproc::morphology::{dilate_mut, erode_mut};
    use imageproc::region_labelling::{connected_components, Connectivity};

    /// Grayscale (Rec. 601 luma) copy of a color frame.
    pub fn to_gray(frame: &RgbImage) -> GrayImage {
        GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
            Luma([luma(frame.get_pixel(x, y))])
        })
    }

    /// HSV copy of a whole color frame.
    pub fn to_hsv(frame: &RgbImage) -> HsvImage {
        let mut hsv = HsvImage::new(frame.width(), frame.height());
        to_hsv_window(frame, 0, 0, &mut hsv);
        hsv
    }

    /// Converts the window of `frame` starting at (`origin_x`, `origin_y`) into `dst`.
    /// The window size is the size of `dst`.
    pub fn to_hsv_window(frame: &RgbImage, origin_x: u32, origin_y: u32, dst: &mut HsvImage) {
        debug_assert!(origin_x + dst.width() <= frame.width());
        debug_assert!(origin_y + dst.height() <= frame.height());
        for (x, y, pixel) in dst.enumerate_pixels_mut() {
            pixel.0 = rgb_to_hsv_bytes(frame.get_pixel(origin_x + x, origin_y + y));
        }
    }

    /// Pixel-wise `|a - b|`.
    pub fn abs_diff(a: &GrayImage, b: &GrayImage) -> GrayImage {
        debug_assert_eq!(a.dimensions(), b.dimensions());
        let mut diff = GrayImage::new(a.width(), a.height());
        for ((out, pa), pb) in diff.pixels_mut().zip(a.pixels()).zip(b.pixels()) {
            out.0[0] = pa.0[0].abs_diff(pb.0[0]);
        }
        diff
    }

    /// Binary threshold in place: values strictly above `level` become foreground.
    pub fn threshold_mut(image: &mut GrayImage, level: u8) {
        contrast::threshold_mut(image, level, ThresholdType::Binary);
    }

    /// Pixel-wise AND of two masks, stored in `dst`.
    pub fn and_mut(dst: &mut GrayImage, other: &GrayImage) {
        debug_assert_eq!(dst.dimensions(), other.dimensions());
        for (out, pixel) in dst.pixels_mut().zip(other.pixels()) {
            out.0[0] &= pixel.0[0];
        }
    }

    /// Range filter: foreground where the HSV pixel lies inside `window`.
    pub fn in_range(hsv: &HsvImage, window: &HsvWindow, mask: &mut GrayImage) {
        debug_assert_eq!(hsv.dimensions(), mask.dimensions());
        for (out, pixel) in mask.pixels_mut().zip(hsv.pixels()) {
            out.0[0] = if window.contains(pixel.0) { FOREGROUND } else { BACKGROUND };
        }
    }

    /// Morphological opening with a square element of side `2 * radius + 1`.
    pub fn open_mut(mask: &mut GrayImage, radius: u8) {
        if radius == 0 {
            return;
        }
        erode_mut(mask, Norm::LInf, radius);
        dilate_mut(mask, Norm::LInf, radius);
    }

    pub fn count_nonzero(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p.0[0] != BACKGROUND).count()
    }

    /// Labels the connected foreground regions of `mask` and summarises each one.
    /// Blobs are returned in label order.
    pub fn find_blobs(mask: &GrayImage) -> (LabelImage, Vec<Blob>) {
        let labels = connected_components(mask, Connectivity::Eight, Luma([BACKGROUND]));

        // (area, min_x, min_y, max_x, max_y) per label
        let mut extents: Vec<(u32, u32, u32, u32, u32)> = Vec::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label.0[0];
            if label == 0 {
                continue;
            }
            let index = (label - 1) as usize;
            if index >= extents.len() {
                extents.resize(index + 1, (0, u32::MAX, u32::MAX, 0, 0));
            }
            let entry = &mut extents[index];
            entry.0 += 1;
            entry.1 = entry.1.min(x);
            entry.2 = entry.2.min(y);
            entry.3 = entry.3.max(x);
            entry.4 = entry.4.max(y);
        }

        let blobs = extents
            .into_iter()
            .enumerate()
            .filter(|(_, extent)| extent.0 > 0)
            .map(|(index, (area, min_x, min_y, max_x, max_y))| Blob {
                label: index as u32 + 1,
                area,
                bounding_box: BoundingBox {
                    x: min_x,
                    y: min_y,
                    width: max_x - min_x + 1,
                    height: max_y - min_y + 1,
                },
            })
            .collect();

        (labels, blobs)
    }

    /// Center of mass of one blob from its zeroth and first order moments.
    /// Only the blob's bounding box is scanned.
    pub fn centroid(labels: &LabelImage, blob: &Blob) -> (f32, f32) {
        let bounding_box = &blob.bounding_box;
        let (mut m00, mut m10, mut m01) = (0u64, 0u64, 0u64);
        for y in bounding_box.y..bounding_box.bottom() {
            for x in bounding_box.x..bounding_box.right() {
                if labels.get_pixel(x, y).0[0] == blob.label {
                    m00 += 1;
                    m10 += x as u64;
                    m01 += y as u64;
                }
            }
        }
        if m00 == 0 {
            return (bounding_box.x as f32, bounding_box.y as f32);
        }
        (m10 as f32 / m00 as f32, m01 as f32 / m00 as f32)
    }

    /// Writes a mask containing only the pixels of `blob` into `dst`.
    pub fn blob_mask(labels: &LabelImage, blob: &Blob, dst: &mut GrayImage) {
        debug_assert_eq!(labels.dimensions(), dst.dimensions());
        for (out, label) in dst.pixels_mut().zip(labels.pixels()) {
            out.0[0] = if label.0[0] == blob.label { FOREGROUND } else { BACKGROUND };
        }
    }

    /// Per-channel mean of `frame` over the foreground of `mask`.
    /// Returns `None` when the mask is empty.
    pub fn mean_color(frame: &RgbImage, mask: &GrayImage) -> Option<[f64; 3]> {
        debug_assert_eq!(frame.dimensions(), mask.dimensions());
        let mut sums = [0u64; 3];
        let mut count = 0u64;
        for (pixel, selected) in frame.pixels().zip(mask.pixels()) {
            if selected.0[0] == BACKGROUND {
                continue;
            }
            sums[0] += pixel.0[0] as u64;
            sums[1] += pixel.0[1] as u64;
            sums[2] += pixel.0[2] as u64;
            count += 1;
        }
        if count == 0 {
            return None;
        }
        let count = count as f64;
        Some([
            sums[0] as f64 / count,
            sums[1] as f64 / count,
            sums[2] as f64 / count,
        ])
    }

    /// Mean over every channel of every pixel: the frame's average energy.
    pub fn mean_luminance(frame: &RgbImage) -> f64 {
        let samples = frame.as_raw();
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().map(|&v| v as u64).sum::<u64>() as f64 / samples.len() as f64
    }
}
