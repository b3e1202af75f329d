pub mod controller;
pub mod display;
pub mod encoder;
pub mod session;
pub mod store;
pub mod video;

use std::path::PathBuf;

use image::RgbImage;

/// Marker between the video title and the frame index in a sample stem.
pub const FRAME_MARKER: &str = "_frame_";

/// One decoded video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: usize, image: RgbImage) -> Self {
        Self { index, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// A pixel-space box drawn by the operator. Corners may come in any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxAnnotation {
    pub class_id: usize,
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoxAnnotation {
    pub fn new(class_id: usize, (x1, y1): (i32, i32), (x2, y2): (i32, i32)) -> Self {
        Self {
            class_id,
            x1,
            y1,
            x2,
            y2,
        }
    }

    pub fn width(&self) -> u32 {
        self.x1.abs_diff(self.x2)
    }

    pub fn height(&self) -> u32 {
        self.y1.abs_diff(self.y2)
    }

    /// Top-left and bottom-right corners.
    pub fn ordered(&self) -> ((i32, i32), (i32, i32)) {
        (
            (self.x1.min(self.x2), self.y1.min(self.y2)),
            (self.x1.max(self.x2), self.y1.max(self.y2)),
        )
    }
}

/// YOLO-style label: class id plus center and size as fractions of the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedLabel {
    pub class_id: usize,
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

/// The labels of exactly one frame.
pub type AnnotationSet = Vec<NormalizedLabel>;

/// An image + label pair written by a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSample {
    pub stem: String,
    pub image_path: PathBuf,
    pub label_path: PathBuf,
}

/// `{video_title}_frame_{index:06}`
pub fn sample_stem(video_title: &str, index: usize) -> String {
    format!("{video_title}{FRAME_MARKER}{index:06}")
}
