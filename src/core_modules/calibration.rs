// THEORY:
// The `ColorCalibrator` answers one question per controller: "what color does the
// camera actually see when this sphere is lit?". The LED drive color is a poor
// answer. Camera white balance, exposure and the diffuser all shift it, so the
// tracker measures the color instead.
//
// The measurement is a blink experiment:
// 1.  **Blink**: light the LED, let it settle, capture; turn it black, settle,
//     capture. The only thing that changed between the two frames is the sphere,
//     so the grayscale difference highlights it.
// 2.  **Clean**: threshold each difference and open it with a large element. Noise
//     and small movements in the scene do not survive the opening.
// 3.  **Combine**: AND every blink's mask. A pixel belongs to the sphere only if it
//     changed in every blink. The largest remaining blob is the sphere.
// 4.  **Estimate**: average the first lit frame under that blob. The HSV acceptance
//     window is built around this estimate.
// 5.  **Verify**: segment every lit frame with the new window, exactly as tracking
//     will. Each must show exactly one blob above the minimum size, and the blob
//     sizes must agree with each other. A second blob means something else in the
//     scene has the sphere's color; varying sizes mean the estimate is unstable.
//
// A failed calibration is a normal outcome, not an error. It is reported as a
// `CalibrationOutcome::Failed` carrying the reason. Only hardware problems (no
// frames, LED writes failing, frame size changing) become `TrackerError`s.

use crate::core_modules::blob::largest;
use crate::core_modules::image_ops::image_ops;
use crate::core_modules::pixel::pixel::{Hsv, HsvTolerance, HsvWindow};
use crate::error::{Result, TrackerError};
use crate::hardware::{query_frame_retrying, ControllerHandle, FrameSource, LedActuator};
use crate::trace::Tracer;
use image::{GrayImage, Rgb, RgbImage};
use std::thread;
use std::time::Duration;

const LED_OFF: Rgb<u8> = Rgb([0, 0, 0]);

/// Tuning for the blink experiment and the segmentation it calibrates.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CalibrationConfig {
    /// Number of lit/unlit pairs captured.
    pub blinks: usize,
    /// Wait after each LED change before capturing, in milliseconds.
    pub blink_delay_ms: u64,
    /// Frames queried per capture; the last one is kept.
    pub frames_per_capture: usize,
    /// Attempts allowed when a capture yields no frame at all.
    pub max_missing_frames: usize,
    /// Grayscale difference above which a pixel counts as changed.
    pub diff_threshold: u8,
    /// Opening radius for the blink difference masks (11x11 element).
    pub calib_kernel_radius: u8,
    /// Opening radius for color masks during verification and tracking (3x3 element).
    pub track_kernel_radius: u8,
    /// A verified blob must be strictly larger than this, in pixels.
    pub min_size: f64,
    /// Blob sizes must have a standard deviation below `mean / size_std_ratio`.
    pub size_std_ratio: f64,
    pub hsv_tolerance: HsvTolerance,
    /// Hue deviation between drive and estimated color that triggers a warning.
    pub hue_warning_degrees: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            blinks: 4,
            blink_delay_ms: 250,
            frames_per_capture: 2,
            max_missing_frames: 100,
            diff_threshold: 20,
            calib_kernel_radius: 5,
            track_kernel_radius: 1,
            min_size: 100.0,
            size_std_ratio: 10.0,
            hsv_tolerance: HsvTolerance::default(),
            hue_warning_degrees: 10.0,
        }
    }
}

impl CalibrationConfig {
    pub fn blink_delay(&self) -> Duration {
        Duration::from_millis(self.blink_delay_ms)
    }
}

/// Result of segmenting one lit frame with the estimated window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkVerdict {
    Ok,
    NoContour,
    MultipleContours,
    TooSmall,
}

/// Why a calibration did not produce a usable color.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationFailure {
    #[error("color is already assigned to another controller")]
    ColorInUse,
    #[error("no free tracking color")]
    NoFreeColor,
    #[error("no blob changed consistently across blinks")]
    NoDifferenceBlob,
    #[error("sphere not isolated in every blink: {verdicts:?}")]
    BlinkRejected { verdicts: Vec<BlinkVerdict> },
    #[error("blob sizes vary too much (std {std_dev:.1}, mean {mean:.1})")]
    InconsistentSizes { std_dev: f64, mean: f64 },
}

/// What a successful calibration measured.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorEstimate {
    /// Observed color of the lit sphere, rounded to bytes.
    pub estimated_color: Rgb<u8>,
    pub hsv: Hsv,
    pub window: HsvWindow,
    /// Verified blob area in each lit frame.
    pub areas: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationOutcome {
    Calibrated(ColorEstimate),
    Failed(CalibrationFailure),
}

impl CalibrationOutcome {
    pub fn is_calibrated(&self) -> bool {
        matches!(self, CalibrationOutcome::Calibrated(_))
    }
}

pub struct ColorCalibrator {
    config: CalibrationConfig,
}

impl ColorCalibrator {
    pub fn new(config: &CalibrationConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Runs the blink experiment for `handle` driven with `color` and estimates the
    /// observed sphere color. The LED is left off afterwards.
    pub fn calibrate<F, L>(
        &self,
        source: &mut F,
        leds: &mut L,
        handle: ControllerHandle,
        color: Rgb<u8>,
        frame_size: (u32, u32),
        tracer: &mut Tracer<'_>,
    ) -> Result<CalibrationOutcome>
    where
        F: FrameSource + ?Sized,
        L: LedActuator + ?Sized,
    {
        let blinks = self.config.blinks.max(1);
        tracer.clear();
        tracer.text("Starting calibration ...");
        log::debug!("calibrating {handle:?} with {:?} over {blinks} blinks", color.0);

        let mut lit_frames: Vec<RgbImage> = Vec::with_capacity(blinks);
        let mut combined: Option<GrayImage> = None;
        for blink in 0..blinks {
            let (lit, mut diff) = self.blink(source, leds, handle, color, frame_size)?;
            tracer.color_image("original image", blink, &lit);
            tracer.mask_image("raw diff", blink, &diff);

            image_ops::threshold_mut(&mut diff, self.config.diff_threshold);
            tracer.mask_image("thresh diff", blink, &diff);

            image_ops::open_mut(&mut diff, self.config.calib_kernel_radius);
            tracer.mask_image("cleaned diff", blink, &diff);

            match combined.as_mut() {
                Some(mask) => image_ops::and_mut(mask, &diff),
                None => combined = Some(diff),
            }
            lit_frames.push(lit);
        }

        let Some(combined) = combined else {
            return Ok(self.fail(handle, CalibrationFailure::NoDifferenceBlob, tracer));
        };
        tracer.text("Final diff image:");
        tracer.mask_image("final diff", blinks, &combined);
        let pixels = image_ops::count_nonzero(&combined);
        tracer.text(&format!("{pixels} pixels changed in every blink"));

        let (labels, blobs) = image_ops::find_blobs(&combined);
        let Some(sphere) = largest(&blobs) else {
            return Ok(self.fail(handle, CalibrationFailure::NoDifferenceBlob, tracer));
        };
        let mut sphere_mask = GrayImage::new(combined.width(), combined.height());
        image_ops::blob_mask(&labels, sphere, &mut sphere_mask);

        let Some([red, green, blue]) = image_ops::mean_color(&lit_frames[0], &sphere_mask) else {
            return Ok(self.fail(handle, CalibrationFailure::NoDifferenceBlob, tracer));
        };
        let estimated_color = Rgb([red, green, blue].map(|channel| channel.round().clamp(0.0, 255.0) as u8));
        let hsv = Hsv::from_rgb_f64(red, green, blue);
        tracer.text("LED color:");
        tracer.color("LED color", color);
        tracer.text("Estimated color:");
        tracer.color("estimated color", estimated_color);

        let deviation = Hsv::from_rgb(color).hue_distance_degrees(&hsv);
        if deviation > self.config.hue_warning_degrees {
            log::warn!(
                "{handle:?}: observed hue differs from LED hue by {deviation:.1} degrees"
            );
        }

        let window = HsvWindow::around(hsv, &self.config.hsv_tolerance);
        tracer.text("Trying to find the sphere by color ...");
        let (verdicts, areas) = self.verify(&lit_frames, &window, tracer);

        if verdicts.iter().any(|verdict| *verdict != BlinkVerdict::Ok) {
            return Ok(self.fail(handle, CalibrationFailure::BlinkRejected { verdicts }, tracer));
        }

        let (mean, std_dev) = mean_and_sample_std(&areas);
        if std_dev >= mean / self.config.size_std_ratio {
            return Ok(self.fail(handle, CalibrationFailure::InconsistentSizes { std_dev, mean }, tracer));
        }

        tracer.text("Calibration OK");
        log::info!(
            "{handle:?} calibrated: observed color {:?}, mean area {mean:.0}",
            estimated_color.0
        );
        Ok(CalibrationOutcome::Calibrated(ColorEstimate {
            estimated_color,
            hsv,
            window,
            areas,
        }))
    }

    /// One lit/unlit pair. Returns the lit frame and the raw grayscale difference.
    fn blink<F, L>(
        &self,
        source: &mut F,
        leds: &mut L,
        handle: ControllerHandle,
        color: Rgb<u8>,
        frame_size: (u32, u32),
    ) -> Result<(RgbImage, GrayImage)>
    where
        F: FrameSource + ?Sized,
        L: LedActuator + ?Sized,
    {
        leds.show(handle, color)?;
        let lit = match self.capture(source, frame_size) {
            Ok(lit) => lit,
            Err(err) => {
                if let Err(led_err) = leds.show(handle, LED_OFF) {
                    log::warn!("{handle:?}: could not switch the LED off: {led_err}");
                }
                return Err(err);
            }
        };
        leds.show(handle, LED_OFF)?;
        let unlit = self.capture(source, frame_size)?;

        let diff = image_ops::abs_diff(&image_ops::to_gray(&lit), &image_ops::to_gray(&unlit));
        Ok((lit, diff))
    }

    /// Waits for the LED to settle, then keeps the last of `frames_per_capture` frames.
    fn capture<F: FrameSource + ?Sized>(&self, source: &mut F, frame_size: (u32, u32)) -> Result<RgbImage> {
        let delay = self.config.blink_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let mut frame = None;
        for _ in 0..self.config.frames_per_capture.max(1) {
            if let Some(next) = source.query_frame() {
                frame = Some(next);
            }
        }
        let frame = match frame {
            Some(frame) => frame,
            None => query_frame_retrying(source, self.config.max_missing_frames, Duration::ZERO)?,
        };

        if frame.dimensions() != frame_size {
            return Err(TrackerError::FrameSizeMismatch {
                expected: frame_size,
                actual: frame.dimensions(),
            });
        }
        Ok(frame)
    }

    /// Segments every lit frame with `window` the way tracking will.
    fn verify(&self, lit_frames: &[RgbImage], window: &HsvWindow, tracer: &mut Tracer<'_>) -> (Vec<BlinkVerdict>, Vec<u32>) {
        let mut verdicts = Vec::with_capacity(lit_frames.len());
        let mut areas = Vec::with_capacity(lit_frames.len());

        for (blink, lit) in lit_frames.iter().enumerate() {
            let hsv = image_ops::to_hsv(lit);
            let mut mask = GrayImage::new(lit.width(), lit.height());
            image_ops::in_range(&hsv, window, &mut mask);
            image_ops::open_mut(&mut mask, self.config.track_kernel_radius);
            tracer.mask_image("filtered", blink, &mask);

            let (_, blobs) = image_ops::find_blobs(&mask);
            let area = largest(&blobs).map_or(0, |blob| blob.area);
            let verdict = match blobs.len() {
                0 => BlinkVerdict::NoContour,
                1 if area as f64 > self.config.min_size => BlinkVerdict::Ok,
                1 => BlinkVerdict::TooSmall,
                _ => BlinkVerdict::MultipleContours,
            };

            log::debug!("blink {blink}: {verdict:?} ({} blobs, largest {area} px)", blobs.len());
            tracer.text(&format!("blink {blink}: {verdict:?}"));
            verdicts.push(verdict);
            areas.push(area);
        }

        (verdicts, areas)
    }

    fn fail(&self, handle: ControllerHandle, failure: CalibrationFailure, tracer: &mut Tracer<'_>) -> CalibrationOutcome {
        log::warn!("{handle:?} calibration failed: {failure}");
        tracer.text(&format!("ERROR: {failure}"));
        CalibrationOutcome::Failed(failure)
    }
}

/// Mean and sample (n - 1) standard deviation. A single sample has no spread.
fn mean_and_sample_std(values: &[u32]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let count = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / count;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / (count - 1.0);
    (mean, variance.sqrt())
}
