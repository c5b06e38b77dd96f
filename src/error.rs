use thiserror::Error;

/// Failures that stop an operation. Calibration and localization misses are not
/// errors; they are reported as `TrackerStatus::CalibrationError` and a found-count
/// of zero respectively.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("camera unavailable: no usable frame after {attempts} attempts")]
    CameraUnavailable { attempts: usize },
    /// Raised by `FrameSource` implementations when the device rejects a setting.
    #[error("camera error: {0}")]
    Camera(String),
    /// Raised by `LedActuator` implementations.
    #[error("LED actuator error: {0}")]
    Led(String),
    #[error("frame size changed from {expected:?} to {actual:?}")]
    FrameSizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
