// THEORY:
// The tracker never talks to a camera driver or to a controller's radio link
// directly. It is handed two collaborators:
//
// - a `FrameSource`, which yields full color frames and accepts exposure changes,
// - an `LedActuator`, which drives a controller's sphere LED.
//
// Both are traits so that the session can run against real hardware, recorded
// footage, or a synthetic scene in tests. Controllers are identified by an opaque,
// copyable `ControllerHandle` that the host application assigns; the tracker never
// owns the controller itself.

use crate::error::{Result, TrackerError};
use image::{Rgb, RgbImage};
use std::thread;
use std::time::Duration;

/// Opaque identity of a physical controller, chosen by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerHandle(pub u32);

/// Source of camera frames.
pub trait FrameSource {
    /// Returns the next frame, or `None` if none is available right now.
    /// Frames are 3-channel RGB and have the same size for the whole session.
    fn query_frame(&mut self) -> Option<RgbImage>;

    /// Applies a new exposure value. May only take effect after `reopen`.
    fn configure_exposure(&mut self, exposure: u32) -> Result<()>;

    /// Reopens the device if the backend needs that for settings to apply.
    /// Backends that apply settings live should make this a no-op.
    fn reopen(&mut self) -> Result<()>;
}

/// Drives a controller's sphere LED. Writes are two-step: `set_color` stages the
/// color, `flush_color` pushes it to the hardware.
pub trait LedActuator {
    fn set_color(&mut self, handle: ControllerHandle, color: Rgb<u8>) -> Result<()>;
    fn flush_color(&mut self, handle: ControllerHandle) -> Result<()>;

    /// Stages and pushes a color in one call.
    fn show(&mut self, handle: ControllerHandle, color: Rgb<u8>) -> Result<()> {
        self.set_color(handle, color)?;
        self.flush_color(handle)
    }
}

impl<T: FrameSource + ?Sized> FrameSource for &mut T {
    fn query_frame(&mut self) -> Option<RgbImage> {
        (**self).query_frame()
    }

    fn configure_exposure(&mut self, exposure: u32) -> Result<()> {
        (**self).configure_exposure(exposure)
    }

    fn reopen(&mut self) -> Result<()> {
        (**self).reopen()
    }
}

impl<T: LedActuator + ?Sized> LedActuator for &mut T {
    fn set_color(&mut self, handle: ControllerHandle, color: Rgb<u8>) -> Result<()> {
        (**self).set_color(handle, color)
    }

    fn flush_color(&mut self, handle: ControllerHandle) -> Result<()> {
        (**self).flush_color(handle)
    }
}

/// Queries frames until one arrives, sleeping `delay` before each attempt.
/// Missing frames are transient; running out of `attempts` means the camera is gone.
pub fn query_frame_retrying<F: FrameSource + ?Sized>(
    source: &mut F,
    attempts: usize,
    delay: Duration,
) -> Result<RgbImage> {
    for attempt in 0..attempts.max(1) {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if let Some(frame) = source.query_frame() {
            return Ok(frame);
        }
        log::debug!("no frame available (attempt {})", attempt + 1);
    }
    Err(TrackerError::CameraUnavailable {
        attempts: attempts.max(1),
    })
}
