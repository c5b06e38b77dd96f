// THEORY:
// This file is the entry point for the `move_tracker` library crate. It exposes the
// `TrackerSession` and its configuration as the high-level interface for tracking
// glowing controller spheres in a camera feed, together with the two collaborator
// traits a host implements (`FrameSource`, `LedActuator`).
//
// The algorithms live in `core_modules` and stay public so that hosts can run a
// single stage (exposure search, calibration, ROI localization) against their own
// frames, but most users only need the re-exports below.

pub mod core_modules;
pub mod error;
pub mod hardware;
pub mod session;
pub mod trace;

pub use crate::core_modules::calibration::{
    BlinkVerdict, CalibrationConfig, CalibrationFailure, CalibrationOutcome, ColorEstimate,
};
pub use crate::core_modules::color_slots::{ColorSlot, ColorSlotRegistry, SlotId};
pub use crate::core_modules::exposure::ExposureConfig;
pub use crate::core_modules::pixel::pixel::{Hsv, HsvTolerance, HsvWindow};
pub use crate::core_modules::roi_pyramid::RoiConfig;
pub use crate::core_modules::tracked_controller::{SpherePosition, TrackedController};
pub use crate::error::{Result, TrackerError};
pub use crate::hardware::{ControllerHandle, FrameSource, LedActuator};
pub use crate::session::{TrackerConfig, TrackerSession, TrackerStatus};
pub use crate::trace::{RecordingTrace, TraceEntry, TraceSink};
