//! Output backends for processed frames.

pub mod image_sequence;

pub use image_sequence::ImageSequenceOutput;

use crate::frame::VideoFrame;
use anyhow::Result;

/// Trait for video output backends.
pub trait OutputBackend {
    /// Write a frame to the output.
    fn write_frame(&mut self, frame: &VideoFrame) -> Result<()>;
}
