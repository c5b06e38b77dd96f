// THEORY:
// A `Blob` is one connected region of foreground pixels in a binary mask, at a
// single moment in time. It is what both the calibrator and the ROI tracker reason
// about: "is there exactly one sphere-sized blob?", "which blob is the largest?",
// "how big a window does the next frame need?".
//
// Key architectural principles:
// 1.  **Stateless Data Container**: A `Blob` carries no history. It summarises a
//     region by its label in the label image it came from, its pixel area and its
//     bounding box. Anything temporal lives on the `TrackedController`.
// 2.  **Pixel Area**: Area is the number of labelled pixels, not a polygon area.
//     Both the calibration size checks and the "largest wins" rule use it.
// 3.  **Local Coordinates**: Bounding boxes are expressed in the coordinates of the
//     mask they were found in (a ROI window, not necessarily the full frame).

/// Axis-aligned rectangle, top-left anchored, in pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Side of the square window that comfortably holds this box: twice its larger side.
    pub fn squared_side(&self) -> u32 {
        self.width.max(self.height) * 2
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// A single connected region of foreground pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    /// The label of this region in the label image it was extracted from.
    pub label: u32,
    /// Number of pixels in the region.
    pub area: u32,
    /// Smallest rectangle enclosing every pixel of the region.
    pub bounding_box: BoundingBox,
}

impl Blob {
    /// Radius of a disk with the same area. Spheres image as disks, so this is the
    /// apparent sphere radius.
    pub fn equivalent_radius(&self) -> f32 {
        (self.area as f32 / std::f32::consts::PI).sqrt()
    }
}

/// Picks the blob with the largest area. Ties keep the first one found.
pub fn largest(blobs: &[Blob]) -> Option<&Blob> {
    blobs.iter().fold(None, |best: Option<&Blob>, blob| match best {
        Some(current) if current.area >= blob.area => Some(current),
        _ => Some(blob),
    })
}
