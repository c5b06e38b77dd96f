// THEORY:
// The `session` module is the top-level API of the tracker. A `TrackerSession`
// owns the camera, the LED actuator, the palette and every tracked controller,
// and it sequences the components in `core_modules` into the host-facing calls:
//
//   new          pick an exposure, grab a first frame, size the ROI pyramid
//   enable       pick a palette color, run the blink calibration, start tracking
//   update_image pull the frame that the next `update` will search
//   update       localize one or all controllers in that frame
//   position     read back the last known position (stale on a miss)
//
// Ownership mirrors the data flow. The session holds one `RoiPyramid` whose
// scratch buffers every controller shares, so `update` takes `&mut self` and
// controllers are localized strictly one after another. Calibration runs on the
// same frame source with the controller's LED, which is why the session (and not
// the calibrator) owns both collaborators.
//
// Failures are layered: hardware problems are `TrackerError`s, a calibration
// that did not converge is a `TrackerStatus::CalibrationError`, and a sphere not
// found in a frame is a found-count of zero.

use crate::core_modules::calibration::{CalibrationConfig, CalibrationFailure, CalibrationOutcome, ColorCalibrator};
use crate::core_modules::color_slots::{dimmed, ColorSlotRegistry, SlotId, DEFAULT_COLORS};
use crate::core_modules::exposure::{ExposureAdapter, ExposureConfig};
use crate::core_modules::roi_pyramid::{RoiConfig, RoiPyramid};
use crate::core_modules::tracked_controller::{SpherePosition, TrackedController};
use crate::error::{Result, TrackerError};
use crate::hardware::{query_frame_retrying, ControllerHandle, FrameSource, LedActuator};
use crate::trace::{TraceSink, Tracer};
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for a `TrackerSession`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrackerConfig {
    pub exposure: ExposureConfig,
    pub calibration: CalibrationConfig,
    pub roi: RoiConfig,
    /// The tracking palette, in slot order.
    pub colors: Vec<[u8; 3]>,
    /// Attempts to obtain the first frame before the camera is declared unavailable.
    pub first_frame_retries: usize,
    /// Pause before each first-frame attempt, in milliseconds.
    pub first_frame_delay_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            exposure: ExposureConfig::default(),
            calibration: CalibrationConfig::default(),
            roi: RoiConfig::default(),
            colors: DEFAULT_COLORS.to_vec(),
            first_frame_retries: 100,
            first_frame_delay_ms: 10,
        }
    }
}

impl TrackerConfig {
    pub fn first_frame_delay(&self) -> Duration {
        Duration::from_millis(self.first_frame_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Err(TrackerError::InvalidConfig(message.to_string()));
        if self.roi.levels == 0 {
            return invalid("roi.levels must be at least 1");
        }
        if !(self.roi.shrink_factor > 0.0 && self.roi.shrink_factor < 1.0) {
            return invalid("roi.shrink_factor must lie in (0, 1)");
        }
        if self.calibration.blinks == 0 {
            return invalid("calibration.blinks must be at least 1");
        }
        if self.calibration.size_std_ratio <= 0.0 {
            return invalid("calibration.size_std_ratio must be positive");
        }
        if self.colors.is_empty() {
            return invalid("colors must not be empty");
        }
        if self.exposure.exp_min > self.exposure.exp_max {
            return invalid("exposure.exp_min must not exceed exposure.exp_max");
        }
        Ok(())
    }
}

/// Tracking state of a controller as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerStatus {
    /// Never enabled, or disabled since.
    Uncalibrated,
    /// The last enable attempt did not calibrate.
    CalibrationError,
    /// Calibrated and being tracked.
    Calibrated,
}

pub struct TrackerSession<F: FrameSource, L: LedActuator> {
    source: F,
    leds: L,
    config: TrackerConfig,
    calibrator: ColorCalibrator,
    exposure: u32,
    frame_size: (u32, u32),
    frame: Option<RgbImage>,
    pyramid: RoiPyramid,
    slots: ColorSlotRegistry,
    controllers: HashMap<ControllerHandle, TrackedController>,
    failures: HashMap<ControllerHandle, CalibrationFailure>,
    trace: Option<Box<dyn TraceSink>>,
}

impl<F: FrameSource, L: LedActuator> TrackerSession<F, L> {
    /// Adapts the exposure, grabs a first frame and sizes the ROI pyramid to it.
    pub fn new(mut source: F, leds: L, config: TrackerConfig) -> Result<Self> {
        config.validate()?;

        let exposure = ExposureAdapter::new(&config.exposure).adapt(
            &mut source,
            config.exposure.lum_min,
            config.exposure.exp_min,
            config.exposure.exp_max,
        )?;

        let frame = query_frame_retrying(&mut source, config.first_frame_retries, config.first_frame_delay())?;
        let frame_size = frame.dimensions();
        let pyramid = RoiPyramid::new(
            frame_size.0,
            frame_size.1,
            &config.roi,
            config.calibration.track_kernel_radius,
        );
        log::info!(
            "tracker session started: {}x{} frames, exposure {exposure}, {} ROI levels",
            frame_size.0,
            frame_size.1,
            pyramid.level_count()
        );

        Ok(Self {
            source,
            leds,
            calibrator: ColorCalibrator::new(&config.calibration),
            slots: ColorSlotRegistry::new(&config.colors),
            config,
            exposure,
            frame_size,
            frame: Some(frame),
            pyramid,
            controllers: HashMap::new(),
            failures: HashMap::new(),
            trace: None,
        })
    }

    /// Installs a trace sink for subsequent calibrations.
    pub fn with_trace(mut self, sink: Box<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn set_trace(&mut self, sink: Option<Box<dyn TraceSink>>) {
        self.trace = sink;
    }

    /// Starts tracking `handle` with the next free palette color.
    /// Already tracked controllers are left as they are.
    pub fn enable(&mut self, handle: ControllerHandle) -> Result<TrackerStatus> {
        if self.controllers.contains_key(&handle) {
            return Ok(TrackerStatus::Calibrated);
        }
        let Some(slot) = self.slots.allocate() else {
            return Ok(self.reject(handle, CalibrationFailure::NoFreeColor));
        };
        let Some(palette_color) = self.slots.slot(slot).map(|slot| slot.rgb) else {
            return Ok(self.reject(handle, CalibrationFailure::NoFreeColor));
        };
        let color = dimmed(palette_color, self.exposure);
        self.calibrate(handle, Some(slot), color)
    }

    /// Starts tracking `handle` with a caller-chosen LED color. The color is
    /// driven as given. A palette color already taken, or a color another
    /// controller is using, is refused.
    pub fn enable_with_color(&mut self, handle: ControllerHandle, color: Rgb<u8>) -> Result<TrackerStatus> {
        if self.controllers.contains_key(&handle) {
            return Ok(TrackerStatus::Calibrated);
        }
        let slot = self.slots.find(color);
        if let Some(id) = slot {
            if !self.slots.claim(id) {
                return Ok(self.reject(handle, CalibrationFailure::ColorInUse));
            }
        }
        self.calibrate(handle, slot, color)
    }

    /// Stops tracking `handle` and frees its palette slot. The LED is left as it is.
    /// Returns whether the controller was being tracked.
    pub fn disable(&mut self, handle: ControllerHandle) -> bool {
        self.failures.remove(&handle);
        let Some(controller) = self.controllers.remove(&handle) else {
            return false;
        };
        if let Some(slot) = controller.slot {
            self.slots.release(slot);
        }
        log::info!("{handle:?} disabled");
        true
    }

    pub fn status(&self, handle: ControllerHandle) -> TrackerStatus {
        if self.controllers.contains_key(&handle) {
            TrackerStatus::Calibrated
        } else if self.failures.contains_key(&handle) {
            TrackerStatus::CalibrationError
        } else {
            TrackerStatus::Uncalibrated
        }
    }

    /// Why the last enable attempt for `handle` failed, if it did.
    pub fn calibration_failure(&self, handle: ControllerHandle) -> Option<&CalibrationFailure> {
        self.failures.get(&handle)
    }

    /// Pulls a fresh frame for the next `update`. Returns `false` when the source
    /// had none; `update` then finds nothing until a frame arrives.
    pub fn update_image(&mut self) -> Result<bool> {
        let Some(frame) = self.source.query_frame() else {
            self.frame = None;
            return Ok(false);
        };
        if frame.dimensions() != self.frame_size {
            self.frame = None;
            return Err(TrackerError::FrameSizeMismatch {
                expected: self.frame_size,
                actual: frame.dimensions(),
            });
        }
        self.frame = Some(frame);
        Ok(true)
    }

    /// Localizes `handle` (or every tracked controller when `None`) in the current
    /// frame. Returns how many were found.
    pub fn update(&mut self, handle: Option<ControllerHandle>) -> usize {
        let Some(frame) = self.frame.as_ref() else {
            return 0;
        };
        match handle {
            Some(handle) => self
                .controllers
                .get_mut(&handle)
                .map_or(0, |controller| self.pyramid.locate(frame, controller) as usize),
            None => self
                .controllers
                .values_mut()
                .map(|controller| self.pyramid.locate(frame, controller) as usize)
                .sum(),
        }
    }

    /// Last known sphere position. Stays available (stale) when a frame misses.
    pub fn position(&self, handle: ControllerHandle) -> Option<SpherePosition> {
        self.controllers.get(&handle)?.position
    }

    /// The LED color driven for `handle` while tracking.
    pub fn color(&self, handle: ControllerHandle) -> Option<Rgb<u8>> {
        self.controllers.get(&handle).map(|controller| controller.assigned_color)
    }

    pub fn controller(&self, handle: ControllerHandle) -> Option<&TrackedController> {
        self.controllers.get(&handle)
    }

    pub fn tracked(&self) -> impl Iterator<Item = &TrackedController> {
        self.controllers.values()
    }

    /// The frame the last `update` searched.
    pub fn frame(&self) -> Option<&RgbImage> {
        self.frame.as_ref()
    }

    pub fn exposure(&self) -> u32 {
        self.exposure
    }

    pub fn slots(&self) -> &ColorSlotRegistry {
        &self.slots
    }

    pub fn pyramid(&self) -> &RoiPyramid {
        &self.pyramid
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Runs the blink calibration for `handle` with `color`. `slot` is already
    /// marked in use and is released again unless the controller ends up tracked.
    fn calibrate(&mut self, handle: ControllerHandle, slot: Option<SlotId>, color: Rgb<u8>) -> Result<TrackerStatus> {
        // dimmed palette colors can coincide with a caller-chosen one
        if self.controllers.values().any(|controller| controller.assigned_color == color) {
            self.release(slot);
            return Ok(self.reject(handle, CalibrationFailure::ColorInUse));
        }

        let result = self.calibrator.calibrate(
            &mut self.source,
            &mut self.leds,
            handle,
            color,
            self.frame_size,
            &mut tracer(&mut self.trace),
        );

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                self.release(slot);
                return Err(err);
            }
        };

        match outcome {
            CalibrationOutcome::Calibrated(estimate) => {
                if let Err(err) = self.leds.show(handle, color) {
                    self.release(slot);
                    return Err(err);
                }
                let controller = TrackedController::new(
                    handle,
                    slot,
                    color,
                    estimate.estimated_color,
                    estimate.hsv,
                    estimate.window,
                );
                self.controllers.insert(handle, controller);
                self.failures.remove(&handle);
                Ok(TrackerStatus::Calibrated)
            }
            CalibrationOutcome::Failed(failure) => {
                self.release(slot);
                self.failures.insert(handle, failure);
                Ok(TrackerStatus::CalibrationError)
            }
        }
    }

    fn reject(&mut self, handle: ControllerHandle, failure: CalibrationFailure) -> TrackerStatus {
        log::warn!("{handle:?} not enabled: {failure}");
        self.failures.insert(handle, failure);
        TrackerStatus::CalibrationError
    }

    fn release(&mut self, slot: Option<SlotId>) {
        if let Some(slot) = slot {
            self.slots.release(slot);
        }
    }
}

fn tracer(trace: &mut Option<Box<dyn TraceSink>>) -> Tracer<'_> {
    match trace {
        Some(sink) => Tracer::new(Some(&mut **sink)),
        None => Tracer::disabled(),
    }
}
