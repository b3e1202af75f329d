#![deny(clippy::all)]

//! Video frame annotation and leakage-free dataset splitting for
//! object-detection corpora.
//!
//! - [`annotation`]: step through a video, draw boxes, save YOLO-style labels.
//! - [`dataset`]: group saved samples by source video and split them into
//!   train / valid / test without spreading one video across subsets.

pub mod annotation;
pub mod config;
pub mod dataset;
pub mod error;

pub use error::{Error, Result};
