// THEORY:
// `core_modules` holds the layered building blocks of the tracker, leaf first:
//
//   pixel, blob        single-pixel color math and blob summaries
//   image_ops          whole-image primitives built on `image` and `imageproc`
//   color_slots        the fixed tracking palette
//   exposure           camera exposure search
//   calibration        blink experiment and color estimation
//   tracked_controller per-controller tracking state
//   roi_pyramid        per-frame localization
//
// Nothing in here owns hardware. The `session` module wires these together.

pub mod blob;
pub mod calibration;
pub mod color_slots;
pub mod exposure;
pub mod image_ops;
pub mod pixel;
pub mod roi_pyramid;
pub mod tracked_controller;
