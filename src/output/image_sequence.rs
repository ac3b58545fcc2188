//! Writes frames as a numbered PNG sequence.

use super::OutputBackend;
use crate::frame::VideoFrame;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes each frame to `<dir>/frame_NNNNNN.png`.
pub struct ImageSequenceOutput {
    dir: PathBuf,
    next_index: u64,
}

impl ImageSequenceOutput {
    /// Creates `dir` if needed. Numbering starts at zero.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {:?}", dir))?;
        Ok(Self { dir, next_index: 0 })
    }

    /// Path the frame with `index` is written to.
    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{:06}.png", index))
    }

    /// Restarts numbering so the next frame overwrites the first file.
    pub fn rewind(&mut self) {
        self.next_index = 0;
    }

    pub fn frames_written(&self) -> u64 {
        self.next_index
    }
}

impl OutputBackend for ImageSequenceOutput {
    fn write_frame(&mut self, frame: &VideoFrame) -> Result<()> {
        let path = self.frame_path(self.next_index);
        frame
            .save(&path)
            .with_context(|| format!("Failed to write {:?}", path))?;
        debug!("Wrote {:?}", path);
        self.next_index += 1;
        Ok(())
    }
}
