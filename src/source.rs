//! Frame sources
//!
//! A frame source hands out one [`PixelBuffer`] per streamer tick. Producing
//! a frame never fails: a source with nothing to show returns an empty buffer
//! and downstream consumers skip it.

mod walker;

use crate::pixels::PixelBuffer;
use std::path::PathBuf;
use thiserror::Error;

pub use walker::ImageWalker;

/// Frame source construction errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("no usable images in {0}")]
    NoUsableSource(PathBuf),
    #[error("failed to list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Something that produces a frame per tick
pub trait FrameSource: Send {
    /// Produce the next frame. An empty buffer means "nothing to show".
    fn next_frame(&mut self) -> PixelBuffer;

    /// Release whatever the source holds. Called once when it is swapped out.
    fn release(&mut self) {}
}

/// A constant buffer shows itself on every tick
impl FrameSource for PixelBuffer {
    fn next_frame(&mut self) -> PixelBuffer {
        self.clone()
    }
}
