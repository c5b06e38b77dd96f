// THEORY:
// Calibration is the step most likely to fail in the field (bad lighting, a red
// object in the background, a dim LED), and when it does the user needs to see
// the intermediate images to understand why. The tracker therefore reports its
// intermediate state to an optional `TraceSink`: every blink image, every diff
// mask at each cleaning stage, the combined mask, the estimated color and the
// verdict for each blink.
//
// The sink is purely an observer. The tracker's control flow and results are the
// same whether a sink is installed or not; `Tracer` is the small wrapper that makes
// every call a no-op when there is none.
//
// `RecordingTrace` keeps everything in memory. Hosts that want an HTML report or a
// live debug window can implement `TraceSink` themselves.

use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use std::cell::RefCell;
use std::rc::Rc;

pub trait TraceSink {
    /// Starts a fresh trace (called at the beginning of every calibration).
    fn clear(&mut self) {}
    fn text(&mut self, message: &str);
    fn color(&mut self, label: &str, color: Rgb<u8>);
    fn color_image(&mut self, label: &str, index: usize, image: &RgbImage);
    fn mask_image(&mut self, label: &str, index: usize, mask: &GrayImage);
}

impl<T: TraceSink + ?Sized> TraceSink for Rc<RefCell<T>> {
    fn clear(&mut self) {
        self.borrow_mut().clear()
    }

    fn text(&mut self, message: &str) {
        self.borrow_mut().text(message)
    }

    fn color(&mut self, label: &str, color: Rgb<u8>) {
        self.borrow_mut().color(label, color)
    }

    fn color_image(&mut self, label: &str, index: usize, image: &RgbImage) {
        self.borrow_mut().color_image(label, index, image)
    }

    fn mask_image(&mut self, label: &str, index: usize, mask: &GrayImage) {
        self.borrow_mut().mask_image(label, index, mask)
    }
}

/// Optional sink handed down through the algorithms.
pub struct Tracer<'a>(Option<&'a mut dyn TraceSink>);

impl<'a> Tracer<'a> {
    pub fn new(sink: Option<&'a mut dyn TraceSink>) -> Self {
        Self(sink)
    }

    pub fn disabled() -> Self {
        Self(None)
    }

    pub fn clear(&mut self) {
        if let Some(sink) = self.0.as_deref_mut() {
            sink.clear();
        }
    }

    pub fn text(&mut self, message: &str) {
        if let Some(sink) = self.0.as_deref_mut() {
            sink.text(message);
        }
    }

    pub fn color(&mut self, label: &str, color: Rgb<u8>) {
        if let Some(sink) = self.0.as_deref_mut() {
            sink.color(label, color);
        }
    }

    pub fn color_image(&mut self, label: &str, index: usize, image: &RgbImage) {
        if let Some(sink) = self.0.as_deref_mut() {
            sink.color_image(label, index, image);
        }
    }

    pub fn mask_image(&mut self, label: &str, index: usize, mask: &GrayImage) {
        if let Some(sink) = self.0.as_deref_mut() {
            sink.mask_image(label, index, mask);
        }
    }
}

#[derive(Debug, Clone)]
pub enum TraceEntry {
    Text(String),
    Color { label: String, color: Rgb<u8> },
    Image {
        label: String,
        index: usize,
        image: DynamicImage,
    },
}

/// In-memory trace: keeps every entry since the last `clear`.
#[derive(Debug, Default, Clone)]
pub struct RecordingTrace {
    pub entries: Vec<TraceEntry>,
}

impl RecordingTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|entry| match entry {
            TraceEntry::Text(text) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn images_labelled<'s>(&'s self, wanted: &'s str) -> impl Iterator<Item = &'s DynamicImage> {
        self.entries.iter().filter_map(move |entry| match entry {
            TraceEntry::Image { label, image, .. } if label == wanted => Some(image),
            _ => None,
        })
    }
}

impl TraceSink for RecordingTrace {
    fn clear(&mut self) {
        self.entries.clear();
    }

    fn text(&mut self, message: &str) {
        self.entries.push(TraceEntry::Text(message.to_string()));
    }

    fn color(&mut self, label: &str, color: Rgb<u8>) {
        self.entries.push(TraceEntry::Color {
            label: label.to_string(),
            color,
        });
    }

    fn color_image(&mut self, label: &str, index: usize, image: &RgbImage) {
        self.entries.push(TraceEntry::Image {
            label: label.to_string(),
            index,
            image: DynamicImage::ImageRgb8(image.clone()),
        });
    }

    fn mask_image(&mut self, label: &str, index: usize, mask: &GrayImage) {
        self.entries.push(TraceEntry::Image {
            label: label.to_string(),
            index,
            image: DynamicImage::ImageLuma8(mask.clone()),
        });
    }
}
