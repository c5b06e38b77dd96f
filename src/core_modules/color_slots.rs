// THEORY:
// Several controllers can be tracked by the same camera only if their spheres glow
// in colors that the HSV segmentation can tell apart. The `ColorSlotRegistry` owns
// the small, fixed palette of such colors and records which ones are taken.
//
// Key architectural principles:
// 1.  **Fixed Palette**: The palette is chosen when the session is built and never
//     grows. Two slots (cyan, magenta) are the default; a deployment may configure
//     others, but the set stays fixed for the lifetime of the registry.
// 2.  **Slots, Not Colors**: Controllers hold a `SlotId`, not a color, so a slot
//     can be released even when the color actually driven on the LED was dimmed
//     for the current exposure.
// 3.  **Linear Scan**: The palette is tiny; every lookup is a scan in palette order.

use image::Rgb;

/// Index of a slot inside its registry.
pub type SlotId = usize;

/// Default palette: cyan and magenta.
pub const DEFAULT_COLORS: [[u8; 3]; 2] = [[0x00, 0xff, 0xff], [0xff, 0x00, 0xff]];

/// One pre-defined tracking color and whether a controller currently owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorSlot {
    pub rgb: Rgb<u8>,
    pub in_use: bool,
}

#[derive(Debug, Clone)]
pub struct ColorSlotRegistry {
    slots: Vec<ColorSlot>,
}

impl ColorSlotRegistry {
    pub fn new(colors: &[[u8; 3]]) -> Self {
        Self {
            slots: colors
                .iter()
                .map(|&rgb| ColorSlot {
                    rgb: Rgb(rgb),
                    in_use: false,
                })
                .collect(),
        }
    }

    /// Takes the first free slot and marks it in use.
    pub fn allocate(&mut self) -> Option<SlotId> {
        let id = self.slots.iter().position(|slot| !slot.in_use)?;
        self.slots[id].in_use = true;
        Some(id)
    }

    /// Marks a specific slot in use. Returns `false` if it was already taken.
    pub fn claim(&mut self, id: SlotId) -> bool {
        match self.slots.get_mut(id) {
            Some(slot) if !slot.in_use => {
                slot.in_use = true;
                true
            }
            _ => false,
        }
    }

    pub fn release(&mut self, id: SlotId) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.in_use = false;
        }
    }

    /// Finds the slot whose palette color is exactly `rgb`.
    pub fn find(&self, rgb: Rgb<u8>) -> Option<SlotId> {
        self.slots.iter().position(|slot| slot.rgb == rgb)
    }

    pub fn slot(&self, id: SlotId) -> Option<&ColorSlot> {
        self.slots.get(id)
    }

    pub fn slots(&self) -> &[ColorSlot] {
        &self.slots
    }

    pub fn free_count(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.in_use).count()
    }
}

impl Default for ColorSlotRegistry {
    fn default() -> Self {
        Self::new(&DEFAULT_COLORS)
    }
}

/// LED intensity for a given camera exposure. Long exposures oversaturate a fully
/// driven sphere into white, which destroys its hue.
pub fn led_intensity(exposure: u32) -> f32 {
    if exposure > 30 {
        0.5
    } else if exposure > 20 {
        0.7
    } else {
        1.0
    }
}

/// Scales a palette color by the LED intensity for `exposure`.
pub fn dimmed(rgb: Rgb<u8>, exposure: u32) -> Rgb<u8> {
    let factor = led_intensity(exposure);
    Rgb(rgb.0.map(|channel| (channel as f32 * factor) as u8))
}
