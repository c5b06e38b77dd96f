use image::{Rgb, RgbImage};
use move_tracker::core_modules::calibration::CalibrationConfig;
use move_tracker::core_modules::exposure::ExposureConfig;
use move_tracker::{ControllerHandle, FrameSource, LedActuator, Result, TrackerConfig, TrackerError};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::rc::Rc;

pub const BACKDROP: Rgb<u8> = Rgb([30, 30, 30]);
pub const DARK_BACKDROP: Rgb<u8> = Rgb([5, 5, 5]);
pub const UNLIT_SPHERE: Rgb<u8> = Rgb([50, 50, 50]);
pub const OFF: Rgb<u8> = Rgb([0, 0, 0]);

/// A controller sphere. It glows in its flushed LED color and is dull gray when off.
pub struct Sphere {
    pub center: (f32, f32),
    pub radius: f32,
    /// Radius used for the n-th lit frame; the last entry repeats.
    pub lit_radii: Vec<f32>,
    pub pending: Rgb<u8>,
    pub led: Rgb<u8>,
    lit_frames: usize,
}

/// A static disk that does not react to any LED.
pub struct Decoy {
    pub center: (f32, f32),
    pub radius: f32,
    pub color: Rgb<u8>,
}

pub struct Scene {
    pub width: u32,
    pub height: u32,
    pub spheres: BTreeMap<ControllerHandle, Sphere>,
    pub decoys: Vec<Decoy>,
    /// Exposures below this render the backdrop almost black.
    pub dark_below: u32,
    pub exposure: u32,
    pub exposures: Vec<u32>,
    pub reopens: usize,
    /// Upcoming queries that return no frame.
    pub missing_frames: usize,
    pub frames_served: usize,
    pub led_writes: usize,
    /// Flushes that succeed before every further flush fails.
    pub flushes_before_failure: Option<usize>,
}

impl Scene {
    fn render(&mut self) -> RgbImage {
        let backdrop = if self.exposure < self.dark_below { DARK_BACKDROP } else { BACKDROP };
        let mut frame = RgbImage::from_pixel(self.width, self.height, backdrop);

        for decoy in &self.decoys {
            paint_disk(&mut frame, decoy.center, decoy.radius, decoy.color);
        }
        for sphere in self.spheres.values_mut() {
            let (radius, color) = if sphere.led == OFF {
                (sphere.radius, UNLIT_SPHERE)
            } else {
                let radius = if sphere.lit_radii.is_empty() {
                    sphere.radius
                } else {
                    sphere.lit_radii[sphere.lit_frames.min(sphere.lit_radii.len() - 1)]
                };
                sphere.lit_frames += 1;
                (radius, sphere.led)
            };
            paint_disk(&mut frame, sphere.center, radius, color);
        }
        frame
    }
}

fn paint_disk(frame: &mut RgbImage, center: (f32, f32), radius: f32, color: Rgb<u8>) {
    for (x, y, pixel) in frame.enumerate_pixels_mut() {
        let (dx, dy) = (x as f32 - center.0, y as f32 - center.1);
        if dx * dx + dy * dy <= radius * radius {
            *pixel = color;
        }
    }
}

/// Shared handle to a synthetic scene; clone it to get both the camera and the LEDs.
#[derive(Clone)]
pub struct Rig(Rc<RefCell<Scene>>);

impl Rig {
    pub fn new(width: u32, height: u32) -> Self {
        Self(Rc::new(RefCell::new(Scene {
            width,
            height,
            spheres: BTreeMap::new(),
            decoys: Vec::new(),
            dark_below: 0,
            exposure: 0,
            exposures: Vec::new(),
            reopens: 0,
            missing_frames: 0,
            frames_served: 0,
            led_writes: 0,
            flushes_before_failure: None,
        })))
    }

    pub fn add_sphere(&self, handle: ControllerHandle, center: (f32, f32), radius: f32) {
        self.scene_mut().spheres.insert(
            handle,
            Sphere {
                center,
                radius,
                lit_radii: Vec::new(),
                pending: OFF,
                led: OFF,
                lit_frames: 0,
            },
        );
    }

    pub fn move_sphere(&self, handle: ControllerHandle, center: (f32, f32)) {
        if let Some(sphere) = self.scene_mut().spheres.get_mut(&handle) {
            sphere.center = center;
        }
    }

    pub fn set_lit_radii(&self, handle: ControllerHandle, radii: &[f32]) {
        if let Some(sphere) = self.scene_mut().spheres.get_mut(&handle) {
            sphere.lit_radii = radii.to_vec();
        }
    }

    pub fn add_decoy(&self, center: (f32, f32), radius: f32, color: Rgb<u8>) {
        self.scene_mut().decoys.push(Decoy { center, radius, color });
    }

    pub fn led(&self, handle: ControllerHandle) -> Rgb<u8> {
        self.scene().spheres.get(&handle).map_or(OFF, |sphere| sphere.led)
    }

    pub fn scene(&self) -> Ref<'_, Scene> {
        self.0.borrow()
    }

    pub fn scene_mut(&self) -> RefMut<'_, Scene> {
        self.0.borrow_mut()
    }
}

impl FrameSource for Rig {
    fn query_frame(&mut self) -> Option<RgbImage> {
        let mut scene = self.scene_mut();
        if scene.missing_frames > 0 {
            scene.missing_frames -= 1;
            return None;
        }
        scene.frames_served += 1;
        Some(scene.render())
    }

    fn configure_exposure(&mut self, exposure: u32) -> Result<()> {
        let mut scene = self.scene_mut();
        scene.exposure = exposure;
        scene.exposures.push(exposure);
        Ok(())
    }

    fn reopen(&mut self) -> Result<()> {
        self.scene_mut().reopens += 1;
        Ok(())
    }
}

impl LedActuator for Rig {
    fn set_color(&mut self, handle: ControllerHandle, color: Rgb<u8>) -> Result<()> {
        let mut scene = self.scene_mut();
        scene.led_writes += 1;
        if let Some(sphere) = scene.spheres.get_mut(&handle) {
            sphere.pending = color;
        }
        Ok(())
    }

    fn flush_color(&mut self, handle: ControllerHandle) -> Result<()> {
        let mut scene = self.scene_mut();
        match scene.flushes_before_failure {
            Some(0) => return Err(TrackerError::Led("radio down".to_string())),
            Some(left) => scene.flushes_before_failure = Some(left - 1),
            None => {}
        }
        if let Some(sphere) = scene.spheres.get_mut(&handle) {
            sphere.led = sphere.pending;
        }
        Ok(())
    }
}

/// Default tracker tuning with every wait removed and one frame per capture.
pub fn fast_config() -> TrackerConfig {
    TrackerConfig {
        exposure: ExposureConfig {
            settle_delay_ms: 0,
            settle_frames: 1,
            max_invalid_samples: 5,
            ..ExposureConfig::default()
        },
        calibration: CalibrationConfig {
            blink_delay_ms: 0,
            frames_per_capture: 1,
            max_missing_frames: 5,
            ..CalibrationConfig::default()
        },
        first_frame_retries: 5,
        first_frame_delay_ms: 0,
        ..TrackerConfig::default()
    }
}
