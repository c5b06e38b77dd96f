// THEORY (Sphere Color Heuristics):
// The `pixel` module is the color-math foundation of the tracker. Everything the
// tracker knows about a sphere is ultimately a statement about color: the lit
// sphere differs from the unlit one in brightness, and once calibrated, the sphere
// is recognised purely by where its pixels fall in HSV space.
//
// What lives here:
// - Single-pixel transforms: Rec. 601 luma (for grayscale differencing) and the
//   8-bit HSV layout used by every mask in the crate.
// - `Hsv`: a floating point HSV color, used for averaged (estimated) colors where
//   byte rounding would throw away precision.
// - `HsvWindow`: the acceptance window `[estimate - tolerance, estimate + tolerance]`
//   that turns a color estimate into a per-pixel foreground test.
//
// The 8-bit HSV layout:
//   hue        in half-degrees [0, 180)  (so that a full circle fits in a byte)
//   saturation in [0, 255]
//   value      in [0, 255]
// Tolerances and windows are expressed in the same units.
//
// Key principles:
// 1) Single-pixel scope: nothing here looks at neighbours, that is `image_ops`' job.
// 2) The hue axis is circular. A window around red wraps across 0/180 instead of
//    being cut off at the ends of the byte range.

pub mod pixel {
    use image::Rgb;

    pub type Channel = u8;
    pub type Luma = u8;
    pub type HueDegrees = f32;

    /// Number of hue steps in the 8-bit HSV layout (one step is two degrees).
    pub const HUE_RANGE: f32 = 180.0;
    /// Upper bound of the saturation and value channels.
    pub const CHANNEL_MAX: f32 = 255.0;

    /// Rec. 601 luma of a single RGB pixel, rounded to a byte.
    #[inline]
    pub fn luma(pixel: &Rgb<Channel>) -> Luma {
        let [red, green, blue] = pixel.0;
        let luminance = 0.299_f32 * red as f32 + 0.587_f32 * green as f32 + 0.114_f32 * blue as f32;
        luminance.round().min(CHANNEL_MAX) as Luma
    }

    /// Converts one RGB pixel to the 8-bit HSV layout.
    #[inline]
    pub fn rgb_to_hsv_bytes(pixel: &Rgb<Channel>) -> [u8; 3] {
        let [red, green, blue] = pixel.0;
        Hsv::from_rgb_f64(red as f64, green as f64, blue as f64).to_bytes()
    }

    /// A color in the 8-bit HSV layout, kept in floating point.
    #[derive(Debug, Clone, Copy, PartialEq)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Hsv {
        /// Hue in half-degrees, [0, 180).
        pub hue: f32,
        /// Saturation, [0, 255].
        pub saturation: f32,
        /// Value (max channel), [0, 255].
        pub value: f32,
    }

    impl Hsv {
        pub fn new(hue: f32, saturation: f32, value: f32) -> Self {
            Self {
                hue,
                saturation,
                value,
            }
        }

        pub fn from_rgb(color: Rgb<Channel>) -> Self {
            let [red, green, blue] = color.0;
            Self::from_rgb_f64(red as f64, green as f64, blue as f64)
        }

        /// Converts channel averages (0..255 each) without rounding them first.
        pub fn from_rgb_f64(red: f64, green: f64, blue: f64) -> Self {
            let maximum_channel = red.max(green.max(blue));
            let minimum_channel = red.min(green.min(blue));
            let chroma = maximum_channel - minimum_channel;

            let saturation = if maximum_channel <= f64::EPSILON {
                0.0
            } else {
                chroma * CHANNEL_MAX as f64 / maximum_channel
            };

            let hue_degrees = if chroma <= 1e-9 {
                0.0
            } else if maximum_channel == red {
                60.0 * (green - blue) / chroma
            } else if maximum_channel == green {
                120.0 + 60.0 * (blue - red) / chroma
            } else {
                240.0 + 60.0 * (red - green) / chroma
            };
            let hue_degrees = if hue_degrees < 0.0 {
                hue_degrees + 360.0
            } else {
                hue_degrees
            };

            Self {
                hue: (hue_degrees / 2.0) as f32 % HUE_RANGE,
                saturation: saturation as f32,
                value: maximum_channel as f32,
            }
        }

        /// Rounds to the byte layout used by HSV images.
        pub fn to_bytes(&self) -> [u8; 3] {
            let hue = self.hue.round();
            let hue = if hue >= HUE_RANGE { hue - HUE_RANGE } else { hue };
            [
                hue.clamp(0.0, HUE_RANGE - 1.0) as u8,
                self.saturation.round().clamp(0.0, CHANNEL_MAX) as u8,
                self.value.round().clamp(0.0, CHANNEL_MAX) as u8,
            ]
        }

        pub fn hue_degrees(&self) -> HueDegrees {
            self.hue * 2.0
        }

        /// Shortest angular distance between two hues, in degrees [0, 180].
        pub fn hue_distance_degrees(&self, other: &Hsv) -> HueDegrees {
            let difference = (self.hue_degrees() - other.hue_degrees()).abs() % 360.0;
            difference.min(360.0 - difference)
        }
    }

    /// Half-widths of an acceptance window, in 8-bit HSV units.
    #[derive(Debug, Clone, Copy, PartialEq)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct HsvTolerance {
        pub hue: f32,
        pub saturation: f32,
        pub value: f32,
    }

    impl Default for HsvTolerance {
        fn default() -> Self {
            Self {
                hue: 10.0,
                saturation: 85.0,
                value: 85.0,
            }
        }
    }

    /// Inclusive HSV range used to segment a calibrated sphere.
    ///
    /// `lower` and `upper` are stored unclamped; the hue bounds may leave [0, 180),
    /// in which case the window wraps around the hue circle.
    #[derive(Debug, Clone, Copy, PartialEq)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct HsvWindow {
        pub lower: Hsv,
        pub upper: Hsv,
    }

    impl HsvWindow {
        pub fn around(center: Hsv, tolerance: &HsvTolerance) -> Self {
            Self {
                lower: Hsv::new(
                    center.hue - tolerance.hue,
                    center.saturation - tolerance.saturation,
                    center.value - tolerance.value,
                ),
                upper: Hsv::new(
                    center.hue + tolerance.hue,
                    center.saturation + tolerance.saturation,
                    center.value + tolerance.value,
                ),
            }
        }

        /// Foreground test for one pixel in the 8-bit HSV layout.
        #[inline]
        pub fn contains(&self, hsv: [u8; 3]) -> bool {
            let saturation = hsv[1] as f32;
            let value = hsv[2] as f32;
            if saturation < self.lower.saturation || saturation > self.upper.saturation {
                return false;
            }
            if value < self.lower.value || value > self.upper.value {
                return false;
            }
            self.contains_hue(hsv[0] as f32)
        }

        fn contains_hue(&self, hue: f32) -> bool {
            if self.upper.hue - self.lower.hue >= HUE_RANGE {
                return true;
            }
            if self.lower.hue < 0.0 {
                hue <= self.upper.hue || hue >= self.lower.hue + HUE_RANGE
            } else if self.upper.hue >= HUE_RANGE {
                hue >= self.lower.hue || hue <= self.upper.hue - HUE_RANGE
            } else {
                hue >= self.lower.hue && hue <= self.upper.hue
            }
        }
    }
}
