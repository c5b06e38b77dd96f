// THEORY:
// A `TrackedController` is the tracker's memory of one physical controller. It is
// born when calibration succeeds, updated every frame by the ROI pyramid, and dropped
// when the controller is disabled.
//
// It holds two kinds of state:
// 1.  **Calibration Results** (fixed after birth): the LED color being driven, the
//     color the camera actually sees when the sphere is lit, and the HSV acceptance
//     window derived from it.
// 2.  **Search State** (mutated every frame): the pyramid level and window origin
//     where the next search starts, the last known position, and how many frames
//     have passed since the sphere was last seen. A failed search never clears the
//     position; callers decide how stale is too stale.

use crate::core_modules::color_slots::SlotId;
use crate::core_modules::pixel::pixel::{Hsv, HsvWindow};
use crate::hardware::ControllerHandle;
use image::Rgb;

/// Location of a sphere in full-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpherePosition {
    pub x: f32,
    pub y: f32,
    /// Radius of a disk with the sphere's apparent area.
    pub radius: f32,
}

/// Tracking state for a single calibrated controller.
#[derive(Debug, Clone)]
pub struct TrackedController {
    /// The host's handle for this controller.
    pub handle: ControllerHandle,
    /// The palette slot this controller occupies, if its color came from the palette.
    pub slot: Option<SlotId>,
    /// The color driven on the LED while tracking.
    pub assigned_color: Rgb<u8>,
    /// The camera-observed color of the lit sphere.
    pub estimated_color: Rgb<u8>,
    /// `estimated_color` in HSV, without byte rounding.
    pub estimated_hsv: Hsv,
    /// Acceptance window used to segment the sphere.
    pub window: HsvWindow,
    /// Pyramid level where the next search starts (0 = full frame).
    pub roi_level: usize,
    /// Top-left corner of the next search window, in frame coordinates.
    pub roi_x: u32,
    pub roi_y: u32,
    /// Last position where the sphere was found.
    pub position: Option<SpherePosition>,
    /// Frames searched since the sphere was last found.
    pub frames_since_seen: u32,
}

impl TrackedController {
    pub fn new(
        handle: ControllerHandle,
        slot: Option<SlotId>,
        assigned_color: Rgb<u8>,
        estimated_color: Rgb<u8>,
        estimated_hsv: Hsv,
        window: HsvWindow,
    ) -> Self {
        Self {
            handle,
            slot,
            assigned_color,
            estimated_color,
            estimated_hsv,
            window,
            roi_level: 0,
            roi_x: 0,
            roi_y: 0,
            position: None,
            frames_since_seen: 0,
        }
    }

    /// Records a successful search.
    pub(crate) fn found_at(&mut self, position: SpherePosition) {
        self.position = Some(position);
        self.frames_since_seen = 0;
    }

    /// Records a search that exhausted the pyramid.
    pub(crate) fn lost(&mut self) {
        self.frames_since_seen = self.frames_since_seen.saturating_add(1);
    }
}
