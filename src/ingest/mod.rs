//! Frame sources.
//!
//! - Local video files, decoded with FFmpeg (feature: ffmpeg)
//! - Synthetic `stub://` source (tests, demo)
//!
//! Every source reports an explicit `ReadOutcome` per read so the streamer can
//! tell a finished file apart from a decode fault.

pub mod file;
#[cfg(feature = "ffmpeg")]
pub(crate) mod file_ffmpeg;

pub use file::{FileConfig, FileStats, VideoSource};

use crate::frame::Frame;

/// Result of one sequential read.
#[derive(Debug)]
pub enum ReadOutcome {
    Frame(Frame),
    /// The source has no more frames.
    EndOfStream,
    /// A frame could not be decoded. Later reads may still succeed.
    DecodeFault(String),
}

/// Sequential frame reader.
pub trait FrameSource {
    /// Width and height of every frame this source produces.
    fn dimensions(&self) -> (u32, u32);

    /// Read the next frame.
    fn read(&mut self) -> ReadOutcome;
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }

    fn read(&mut self) -> ReadOutcome {
        (**self).read()
    }
}
