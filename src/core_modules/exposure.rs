// THEORY:
// The `ExposureAdapter` brings the camera into a usable operating point before any
// calibration happens. Too short an exposure and the unlit scene is black, so the
// lit/unlit difference is dominated by noise; too long and the lit sphere clips to
// white and loses its hue.
//
// The search is a simple monotone climb:
//   start at the minimum exposure, sample the average energy of a settled frame,
//   step the exposure up while the frame is too dark, and stop as soon as a step
//   leaves the exposure unchanged (target reached, or clamped at the maximum).
//
// Two practicalities shape the loop:
// 1.  **Settling**: cameras need a few frames before a new exposure shows up in the
//     image, so every sample is taken after `settle_frames` queries spaced by
//     `settle_delay`, and only the last one is measured.
// 2.  **Blank Frames**: some drivers return missing or all-black frames right after
//     reconfiguration. Those samples are discarded and re-taken instead of being
//     read as "too dark". A budget of consecutive invalid samples keeps a dead
//     camera from hanging the loop.

use crate::core_modules::image_ops::image_ops;
use crate::error::{Result, TrackerError};
use crate::hardware::FrameSource;
use std::thread;
use std::time::Duration;

/// Tuning for the exposure search.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ExposureConfig {
    /// Minimal average frame energy to reach (0..255).
    pub lum_min: f64,
    /// First exposure value tried.
    pub exp_min: u32,
    /// Largest exposure value allowed.
    pub exp_max: u32,
    /// Pause before each settling query, in milliseconds.
    pub settle_delay_ms: u64,
    /// Frames queried per sample; the last one is measured.
    pub settle_frames: usize,
    /// Consecutive missing or black samples tolerated before giving up.
    pub max_invalid_samples: usize,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            lum_min: 25.0,
            exp_min: 0x10,
            exp_max: 0x40,
            settle_delay_ms: 10,
            settle_frames: 10,
            max_invalid_samples: 100,
        }
    }
}

impl ExposureConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

pub struct ExposureAdapter {
    settle_delay: Duration,
    settle_frames: usize,
    max_invalid_samples: usize,
}

impl ExposureAdapter {
    pub fn new(config: &ExposureConfig) -> Self {
        Self {
            settle_delay: config.settle_delay(),
            settle_frames: config.settle_frames.max(1),
            max_invalid_samples: config.max_invalid_samples,
        }
    }

    /// Step size so that the full range is crossed in about ten steps.
    pub fn step(exp_min: u32, exp_max: u32) -> u32 {
        (exp_max.saturating_sub(exp_min) / 10).max(1)
    }

    /// Finds the smallest exposure on the `exp_min + k * step` ladder whose frames
    /// reach `lum_min`, or `exp_max` if none does. Leaves the source configured
    /// with the returned exposure.
    pub fn adapt<F: FrameSource + ?Sized>(
        &self,
        source: &mut F,
        lum_min: f64,
        exp_min: u32,
        exp_max: u32,
    ) -> Result<u32> {
        if exp_min > exp_max {
            return Err(TrackerError::InvalidConfig(format!(
                "exposure range is empty: {exp_min} > {exp_max}"
            )));
        }

        let step = Self::step(exp_min, exp_max);
        let mut exposure = exp_min;
        Self::apply(source, exposure)?;

        let mut invalid_samples = 0usize;
        loop {
            let Some(average) = self.sample(source) else {
                invalid_samples += 1;
                if invalid_samples > self.max_invalid_samples {
                    return Err(TrackerError::CameraUnavailable {
                        attempts: invalid_samples,
                    });
                }
                continue;
            };
            invalid_samples = 0;
            log::debug!("exposure {exposure}: average luminance {average:.2}");

            let mut next = exposure;
            if average < lum_min {
                next = exposure.saturating_add(step);
            }
            let next = next.clamp(exp_min, exp_max);

            if next == exposure {
                break;
            }
            exposure = next;
            Self::apply(source, exposure)?;
        }

        log::info!("exposure set to {exposure} (0x{exposure:x})");
        Ok(exposure)
    }

    fn apply<F: FrameSource + ?Sized>(source: &mut F, exposure: u32) -> Result<()> {
        source.configure_exposure(exposure)?;
        source.reopen()
    }

    /// Average energy of a settled frame; `None` for missing or black frames.
    fn sample<F: FrameSource + ?Sized>(&self, source: &mut F) -> Option<f64> {
        let mut frame = None;
        for _ in 0..self.settle_frames {
            if !self.settle_delay.is_zero() {
                thread::sleep(self.settle_delay);
            }
            frame = source.query_frame();
        }
        let average = image_ops::mean_luminance(&frame?);
        (average > 0.0).then_some(average)
    }
}
