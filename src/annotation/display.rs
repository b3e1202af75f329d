//! The narrow display/input contract the controller drives, plus a
//! line-oriented console implementation.

use std::io::BufRead;
use std::path::PathBuf;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::session::PointerEvent;
use super::BoxAnnotation;
use crate::error::{Error, Result};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorAction {
    Save,
    NextClass,
    PreviousClass,
    Clear,
    /// Position control moved to this frame index.
    Jump(usize),
    Quit,
}

impl OperatorAction {
    /// Keyboard shortcuts: `s`ave, `n`ext / `p`revious class, `c`lear, `q`uit.
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            's' => Some(Self::Save),
            'n' => Some(Self::NextClass),
            'p' => Some(Self::PreviousClass),
            'c' => Some(Self::Clear),
            'q' => Some(Self::Quit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Pointer(PointerEvent),
    Action(OperatorAction),
}

pub trait Display {
    fn show(&mut self, image: &RgbImage) -> Result<()>;

    /// Move the position control to `index` of `total` frames.
    fn set_position(&mut self, index: usize, total: usize);

    /// Block until the operator does something. `None` means input is closed.
    fn next_event(&mut self) -> Result<Option<InputEvent>>;
}

/// Copy of `frame` with `boxes` drawn on it. The input buffer is left untouched.
pub fn render_overlay(frame: &RgbImage, boxes: &[BoxAnnotation]) -> RgbImage {
    let mut overlay = frame.clone();
    // Corners are clipped to the image so rectangle sizes stay bounded.
    let max_x = i32::try_from(overlay.width()).unwrap_or(i32::MAX);
    let max_y = i32::try_from(overlay.height()).unwrap_or(i32::MAX);

    for bbox in boxes {
        let ((x1, y1), (x2, y2)) = bbox.ordered();
        let (x1, x2) = (x1.clamp(0, max_x), x2.clamp(0, max_x));
        let (y1, y2) = (y1.clamp(0, max_y), y2.clamp(0, max_y));
        for t in 0..BOX_THICKNESS {
            let width = x2.saturating_sub(x1).saturating_sub(2 * t).max(1) as u32;
            let height = y2.saturating_sub(y1).saturating_sub(2 * t).max(1) as u32;
            let rect = Rect::at(x1.saturating_add(t), y1.saturating_add(t))
                .of_size(width, height);
            draw_hollow_rect_mut(&mut overlay, rect, BOX_COLOR);
        }
    }
    overlay
}

/// Operator console reading one command per line:
///
/// `down X Y`, `move X Y`, `up X Y`, `s`/`save`, `n`/`next`, `p`/`prev`,
/// `c`/`clear`, `j N`/`jump N`, `q`/`quit`.
///
/// Each shown frame is optionally written to `preview` so it can be watched
/// in an image viewer.
pub struct ScriptedDisplay<R> {
    reader: R,
    preview: Option<PathBuf>,
    line: String,
}

impl<R: BufRead> ScriptedDisplay<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            preview: None,
            line: String::new(),
        }
    }

    pub fn with_preview(mut self, preview: Option<PathBuf>) -> Self {
        self.preview = preview;
        self
    }
}

impl<R: BufRead> Display for ScriptedDisplay<R> {
    fn show(&mut self, image: &RgbImage) -> Result<()> {
        let Some(path) = &self.preview else {
            return Ok(());
        };
        image.save(path).map_err(|e| Error::Image {
            path: path.clone(),
            source: e,
        })
    }

    fn set_position(&mut self, index: usize, total: usize) {
        tracing::debug!(index, total, "position");
    }

    fn next_event(&mut self) -> Result<Option<InputEvent>> {
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_line(&mut self.line)
                .map_err(|e| Error::io("<input>", e))?;
            if read == 0 {
                return Ok(None);
            }

            match parse_command(&self.line) {
                Ok(Some(event)) => return Ok(Some(event)),
                Ok(None) => continue,
                Err(e) => tracing::warn!("{e}"),
            }
        }
    }
}

/// Parse one console line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<InputEvent>> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let number = |raw: &str| -> Result<i64> {
        raw.parse::<i64>()
            .map_err(|_| Error::Input(format!("{command}: expected a number, got {raw:?}")))
    };
    let point = || -> Result<(i32, i32)> {
        match args.as_slice() {
            [x, y] => {
                let x = i32::try_from(number(*x)?)
                    .map_err(|_| Error::Input(format!("{command}: x out of range")))?;
                let y = i32::try_from(number(*y)?)
                    .map_err(|_| Error::Input(format!("{command}: y out of range")))?;
                Ok((x, y))
            }
            _ => Err(Error::Input(format!("{command}: expected X Y"))),
        }
    };

    let event = match command {
        "down" => {
            let (x, y) = point()?;
            InputEvent::Pointer(PointerEvent::Down { x, y })
        }
        "move" => {
            let (x, y) = point()?;
            InputEvent::Pointer(PointerEvent::Move { x, y })
        }
        "up" => {
            let (x, y) = point()?;
            InputEvent::Pointer(PointerEvent::Up { x, y })
        }
        "save" => InputEvent::Action(OperatorAction::Save),
        "next" => InputEvent::Action(OperatorAction::NextClass),
        "prev" => InputEvent::Action(OperatorAction::PreviousClass),
        "clear" => InputEvent::Action(OperatorAction::Clear),
        "quit" => InputEvent::Action(OperatorAction::Quit),
        "j" | "jump" => match args.as_slice() {
            [index] => {
                let index = usize::try_from(number(*index)?)
                    .map_err(|_| Error::Input(format!("{command}: index must be >= 0")))?;
                InputEvent::Action(OperatorAction::Jump(index))
            }
            _ => return Err(Error::Input(format!("{command}: expected a frame index"))),
        },
        other => {
            let mut chars = other.chars();
            match (chars.next().and_then(OperatorAction::from_key), chars.next()) {
                (Some(action), None) => InputEvent::Action(action),
                _ => return Err(Error::Input(format!("unknown command {other:?}"))),
            }
        }
    };
    Ok(Some(event))
}
