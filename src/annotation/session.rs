//! Box drawing state for the frame currently on screen.

use super::encoder;
use super::{AnnotationSet, BoxAnnotation};
use crate::error::{Error, Result};

/// Pointer events emitted by the display, in window pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEvent {
    Down { x: i32, y: i32 },
    Move { x: i32, y: i32 },
    Up { x: i32, y: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging {
        anchor: (i32, i32),
        cursor: (i32, i32),
    },
}

#[derive(Debug, Clone)]
pub struct AnnotationSession {
    classes: Vec<String>,
    class_id: usize,
    min_box_size: u32,
    frame_size: (u32, u32),
    state: DragState,
    boxes: Vec<BoxAnnotation>,
}

impl AnnotationSession {
    pub fn new(classes: Vec<String>) -> Result<Self> {
        if classes.is_empty() {
            return Err(Error::InvalidClassList);
        }

        Ok(Self {
            classes,
            class_id: 0,
            min_box_size: 0,
            frame_size: (0, 0),
            state: DragState::Idle,
            boxes: Vec::new(),
        })
    }

    /// Boxes narrower or shorter than this many pixels are dropped on release.
    /// Zero keeps every box, including degenerate ones.
    pub fn with_min_box_size(mut self, min_box_size: u32) -> Self {
        self.min_box_size = min_box_size;
        self
    }

    /// Start a fresh, empty set for a frame of the given size. The active class is kept.
    pub fn begin_frame(&mut self, width: u32, height: u32) {
        self.frame_size = (width, height);
        self.clear();
    }

    pub fn handle_pointer(&mut self, event: PointerEvent) -> Option<BoxAnnotation> {
        match (self.state, event) {
            (_, PointerEvent::Down { x, y }) => {
                self.state = DragState::Dragging {
                    anchor: (x, y),
                    cursor: (x, y),
                };
                None
            }
            (DragState::Dragging { anchor, .. }, PointerEvent::Move { x, y }) => {
                self.state = DragState::Dragging {
                    anchor,
                    cursor: (x, y),
                };
                None
            }
            (DragState::Dragging { anchor, .. }, PointerEvent::Up { x, y }) => {
                self.state = DragState::Idle;
                self.commit(anchor, (x, y))
            }
            (DragState::Idle, PointerEvent::Move { .. } | PointerEvent::Up { .. }) => None,
        }
    }

    fn commit(&mut self, anchor: (i32, i32), release: (i32, i32)) -> Option<BoxAnnotation> {
        let bbox = BoxAnnotation::new(self.class_id, self.clamp(anchor), self.clamp(release));
        if bbox.width() < self.min_box_size || bbox.height() < self.min_box_size {
            tracing::debug!(?bbox, min = self.min_box_size, "box below minimum size, dropped");
            return None;
        }
        self.boxes.push(bbox);
        Some(bbox)
    }

    fn clamp(&self, (x, y): (i32, i32)) -> (i32, i32) {
        let (w, h) = self.frame_size;
        let max_x = i32::try_from(w).unwrap_or(i32::MAX);
        let max_y = i32::try_from(h).unwrap_or(i32::MAX);
        (x.clamp(0, max_x), y.clamp(0, max_y))
    }

    pub fn select_next_class(&mut self) -> usize {
        self.class_id = (self.class_id + 1) % self.classes.len();
        self.class_id
    }

    pub fn select_previous_class(&mut self) -> usize {
        let n = self.classes.len();
        self.class_id = (self.class_id + n - 1) % n;
        self.class_id
    }

    /// Back to `Idle` with no boxes, whatever the prior state.
    pub fn clear(&mut self) {
        self.state = DragState::Idle;
        self.boxes.clear();
    }

    pub fn class_id(&self) -> usize {
        self.class_id
    }

    pub fn class_name(&self) -> &str {
        &self.classes[self.class_id]
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn state(&self) -> DragState {
        self.state
    }

    pub fn boxes(&self) -> &[BoxAnnotation] {
        &self.boxes
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// The rectangle being dragged, if any, for the live overlay.
    pub fn pending_box(&self) -> Option<BoxAnnotation> {
        match self.state {
            DragState::Dragging { anchor, cursor } => Some(BoxAnnotation::new(
                self.class_id,
                self.clamp(anchor),
                self.clamp(cursor),
            )),
            DragState::Idle => None,
        }
    }

    /// The current boxes normalized against the frame size.
    pub fn annotation_set(&self) -> AnnotationSet {
        let (w, h) = self.frame_size;
        self.boxes.iter().map(|b| encoder::encode(b, w, h)).collect()
    }
}
