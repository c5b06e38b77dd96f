// THEORY:
// The `RoiPyramid` is the per-frame localization engine. Searching the whole frame
// for every controller every frame would make the cost proportional to the frame
// size; searching a window around the last known position makes it proportional to
// the sphere's apparent size instead.
//
// The pyramid is an ordered list of window sizes:
//   level 0           the full frame
//   level i (i >= 1)  a square whose side is `shrink_factor` times the width of
//                     level i - 1, clipped to the frame.
//
// Per controller, per frame, the search is a small state machine:
// 1.  **Search**: crop the window at the controller's level and origin, convert to
//     HSV, keep the pixels inside the controller's acceptance window, open the mask
//     to drop specks, and label the remaining blobs. The largest blob wins.
// 2.  **Found**: the blob's centroid (moments over its bounding box only) becomes
//     the new position. The next frame starts at the smallest level whose window
//     still holds a square of twice the blob's larger side, centred on the new
//     position and clamped into the frame.
// 3.  **Widen**: nothing found below level 0, so step one level up, keep the window
//     centre, clamp, and search again. A sphere that leaves the small window is
//     looked for in progressively larger areas around where it was.
// 4.  **Lost**: nothing found at level 0. The position stays as it was.
//
// Every level owns a color and a mask scratch buffer of its own size. They are
// shared by all controllers and reused every frame, which is why `locate` takes
// `&mut self`: one localization runs to completion before the next can start.

use crate::core_modules::blob::largest;
use crate::core_modules::image_ops::{image_ops, HsvImage};
use crate::core_modules::tracked_controller::{SpherePosition, TrackedController};
use image::{GrayImage, RgbImage};

/// Shape of the window pyramid.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RoiConfig {
    /// Number of window sizes, including the full frame.
    pub levels: usize,
    /// Side of each level relative to the width of the previous one.
    pub shrink_factor: f64,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            levels: 5,
            shrink_factor: 0.6,
        }
    }
}

/// One window size with its scratch buffers.
struct RoiLevel {
    width: u32,
    height: u32,
    hsv: HsvImage,
    mask: GrayImage,
}

impl RoiLevel {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            hsv: HsvImage::new(width, height),
            mask: GrayImage::new(width, height),
        }
    }
}

pub struct RoiPyramid {
    frame_width: u32,
    frame_height: u32,
    levels: Vec<RoiLevel>,
    /// Radius of the square opening element used on every search mask.
    kernel_radius: u8,
}

impl RoiPyramid {
    pub fn new(frame_width: u32, frame_height: u32, config: &RoiConfig, kernel_radius: u8) -> Self {
        let mut levels: Vec<RoiLevel> = Vec::with_capacity(config.levels.max(1));
        levels.push(RoiLevel::new(frame_width, frame_height));
        for _ in 1..config.levels {
            let previous_width = levels[levels.len() - 1].width;
            let side = ((previous_width as f64 * config.shrink_factor) as u32).max(1);
            levels.push(RoiLevel::new(side.min(frame_width), side.min(frame_height)));
        }
        Self {
            frame_width,
            frame_height,
            levels,
            kernel_radius,
        }
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn level_size(&self, level: usize) -> (u32, u32) {
        let level = &self.levels[level.min(self.levels.len() - 1)];
        (level.width, level.height)
    }

    /// Clamps a (possibly negative) window origin so the window lies inside the frame.
    pub fn clamp_origin(&self, level: usize, x: i64, y: i64) -> (u32, u32) {
        let (width, height) = self.level_size(level);
        let max_x = (self.frame_width - width) as i64;
        let max_y = (self.frame_height - height) as i64;
        (x.clamp(0, max_x) as u32, y.clamp(0, max_y) as u32)
    }

    /// Origin of the window at `level` centred on (`center_x`, `center_y`), clamped.
    pub fn centered_origin(&self, level: usize, center_x: i64, center_y: i64) -> (u32, u32) {
        let (width, height) = self.level_size(level);
        self.clamp_origin(level, center_x - (width / 2) as i64, center_y - (height / 2) as i64)
    }

    /// Smallest level whose window still holds a square of side `side`.
    pub fn level_for_side(&self, side: u32) -> usize {
        let mut chosen = 0;
        for (index, level) in self.levels.iter().enumerate() {
            if side > level.width && side > level.height {
                break;
            }
            chosen = index;
        }
        chosen
    }

    /// Searches `frame` for the controller's sphere, widening the window as needed.
    /// Updates the controller's search state and returns whether the sphere was found.
    /// A frame of another size than the pyramid's is not searched.
    pub fn locate(&mut self, frame: &RgbImage, controller: &mut TrackedController) -> bool {
        if frame.dimensions() != self.frame_size() {
            log::warn!(
                "{:?}: frame is {:?}, pyramid expects {:?}",
                controller.handle,
                frame.dimensions(),
                self.frame_size()
            );
            return false;
        }
        if controller.roi_level >= self.levels.len() {
            controller.roi_level = 0;
        }
        let (x, y) = self.clamp_origin(controller.roi_level, controller.roi_x as i64, controller.roi_y as i64);
        controller.roi_x = x;
        controller.roi_y = y;

        loop {
            let level_index = controller.roi_level;
            let (origin_x, origin_y) = (controller.roi_x, controller.roi_y);

            let level = &mut self.levels[level_index];
            image_ops::to_hsv_window(frame, origin_x, origin_y, &mut level.hsv);
            image_ops::in_range(&level.hsv, &controller.window, &mut level.mask);
            image_ops::open_mut(&mut level.mask, self.kernel_radius);
            let (labels, blobs) = image_ops::find_blobs(&level.mask);

            if let Some(best) = largest(&blobs) {
                let (local_x, local_y) = image_ops::centroid(&labels, best);
                let position = SpherePosition {
                    x: local_x + origin_x as f32,
                    y: local_y + origin_y as f32,
                    radius: best.equivalent_radius(),
                };
                controller.found_at(position);

                let next_level = self.level_for_side(best.bounding_box.squared_side());
                let (next_x, next_y) =
                    self.centered_origin(next_level, position.x as i64, position.y as i64);
                controller.roi_level = next_level;
                controller.roi_x = next_x;
                controller.roi_y = next_y;
                log::trace!(
                    "{:?} found at ({:.1}, {:.1}), next level {}",
                    controller.handle,
                    position.x,
                    position.y,
                    next_level
                );
                return true;
            }

            if level_index == 0 {
                controller.lost();
                log::trace!("{:?} not found in full frame", controller.handle);
                return false;
            }

            let (width, height) = self.level_size(level_index);
            let center_x = origin_x as i64 + (width / 2) as i64;
            let center_y = origin_y as i64 + (height / 2) as i64;
            let wider = level_index - 1;
            let (wider_x, wider_y) = self.centered_origin(wider, center_x, center_y);
            controller.roi_level = wider;
            controller.roi_x = wider_x;
            controller.roi_y = wider_y;
            log::debug!("{:?} not in level {}, widening to level {}", controller.handle, level_index, wider);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::pixel::pixel::{Hsv, HsvTolerance, HsvWindow};
    use crate::hardware::ControllerHandle;
    use image::Rgb;

    const MAGENTA: Rgb<u8> = Rgb([255, 0, 255]);
    const BACKDROP: Rgb<u8> = Rgb([30, 30, 30]);

    fn frame_with_disk(width: u32, height: u32, cx: i64, cy: i64, radius: i64) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let (dx, dy) = (x as i64 - cx, y as i64 - cy);
            if dx * dx + dy * dy <= radius * radius { MAGENTA } else { BACKDROP }
        })
    }

    fn controller() -> TrackedController {
        let hsv = Hsv::from_rgb(MAGENTA);
        TrackedController::new(
            ControllerHandle(7),
            None,
            MAGENTA,
            MAGENTA,
            hsv,
            HsvWindow::around(hsv, &HsvTolerance::default()),
        )
    }

    fn pyramid() -> RoiPyramid {
        RoiPyramid::new(320, 240, &RoiConfig::default(), 1)
    }

    #[test]
    fn levels_shrink_from_full_frame() {
        let pyramid = pyramid();
        assert_eq!(pyramid.level_count(), 5);
        let sizes: Vec<_> = (0..5).map(|level| pyramid.level_size(level)).collect();
        assert_eq!(sizes, vec![(320, 240), (192, 192), (115, 115), (69, 69), (41, 41)]);
    }

    #[test]
    fn wide_frames_clip_square_levels_to_height() {
        let pyramid = RoiPyramid::new(1280, 240, &RoiConfig::default(), 1);
        assert_eq!(pyramid.level_size(1), (768, 240));
        assert_eq!(pyramid.level_size(2), (460, 240));
    }

    #[test]
    fn level_choice_follows_blob_size() {
        let pyramid = pyramid();
        assert_eq!(pyramid.level_for_side(20), 4);
        assert_eq!(pyramid.level_for_side(41), 4);
        assert_eq!(pyramid.level_for_side(50), 3);
        assert_eq!(pyramid.level_for_side(200), 0);
        assert_eq!(pyramid.level_for_side(1000), 0);
    }

    #[test]
    fn origins_stay_inside_frame_at_every_level() {
        let pyramid = pyramid();
        for level in 0..pyramid.level_count() {
            let (width, height) = pyramid.level_size(level);
            for &(cx, cy) in &[(0, 0), (-50, 400), (319, 239), (500, -3), (160, 120)] {
                let (x, y) = pyramid.centered_origin(level, cx, cy);
                assert!(x + width <= 320, "level {level} x {x}");
                assert!(y + height <= 240, "level {level} y {y}");
            }
        }
    }

    #[test]
    fn finds_disk_from_full_frame_and_narrows_window() {
        let mut pyramid = pyramid();
        let mut tracked = controller();
        let frame = frame_with_disk(320, 240, 200, 90, 12);

        assert!(pyramid.locate(&frame, &mut tracked));
        let position = tracked.position.unwrap();
        assert!((position.x - 200.0).abs() < 0.5);
        assert!((position.y - 90.0).abs() < 0.5);
        assert!((position.radius - 12.0).abs() < 1.0);

        // 25 px blob -> 50 px square -> level 3 (69 px)
        assert_eq!(tracked.roi_level, 3);
        assert_eq!((tracked.roi_x, tracked.roi_y), (200 - 34, 90 - 34));
    }

    #[test]
    fn widens_until_the_sphere_is_reacquired() {
        let mut pyramid = pyramid();
        let mut tracked = controller();
        assert!(pyramid.locate(&frame_with_disk(320, 240, 60, 60, 12), &mut tracked));
        assert_eq!(tracked.roi_level, 3);

        let jumped = frame_with_disk(320, 240, 270, 190, 12);
        assert!(pyramid.locate(&jumped, &mut tracked));
        let position = tracked.position.unwrap();
        assert!((position.x - 270.0).abs() < 0.5);
        assert!((position.y - 190.0).abs() < 0.5);
        assert_eq!(tracked.frames_since_seen, 0);
    }

    #[test]
    fn lost_sphere_keeps_stale_position() {
        let mut pyramid = pyramid();
        let mut tracked = controller();
        assert!(pyramid.locate(&frame_with_disk(320, 240, 100, 100, 12), &mut tracked));
        let before = tracked.position;

        let empty = RgbImage::from_pixel(320, 240, BACKDROP);
        assert!(!pyramid.locate(&empty, &mut tracked));
        assert_eq!(tracked.position, before);
        assert_eq!(tracked.roi_level, 0);
        assert_eq!(tracked.frames_since_seen, 1);
    }

    #[test]
    fn largest_blob_wins() {
        let mut pyramid = pyramid();
        let mut tracked = controller();
        let mut frame = frame_with_disk(320, 240, 250, 60, 15);
        for (x, y, pixel) in frame_with_disk(320, 240, 60, 180, 6).enumerate_pixels() {
            if *pixel == MAGENTA {
                frame.put_pixel(x, y, MAGENTA);
            }
        }
        assert!(pyramid.locate(&frame, &mut tracked));
        let position = tracked.position.unwrap();
        assert!((position.x - 250.0).abs() < 0.5);
        assert!((position.y - 60.0).abs() < 0.5);
    }

    #[test]
    fn frame_of_another_size_is_not_searched() {
        let mut pyramid = pyramid();
        let mut tracked = controller();
        assert!(pyramid.locate(&frame_with_disk(320, 240, 100, 100, 12), &mut tracked));
        let before = tracked.clone();

        assert!(!pyramid.locate(&frame_with_disk(160, 120, 50, 50, 12), &mut tracked));
        assert_eq!(tracked.position, before.position);
        assert_eq!(tracked.frames_since_seen, before.frames_since_seen);
        assert_eq!(
            (tracked.roi_level, tracked.roi_x, tracked.roi_y),
            (before.roi_level, before.roi_x, before.roi_y)
        );
    }

    #[test]
    fn sphere_at_corner_clamps_window() {
        let mut pyramid = pyramid();
        let mut tracked = controller();
        assert!(pyramid.locate(&frame_with_disk(320, 240, 316, 236, 10), &mut tracked));
        let (width, height) = pyramid.level_size(tracked.roi_level);
        assert!(tracked.roi_x + width <= 320);
        assert!(tracked.roi_y + height <= 240);
        assert_eq!(tracked.roi_x, 320 - width);
        assert_eq!(tracked.roi_y, 240 - height);
    }
}
