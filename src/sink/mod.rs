//! Frame sinks.
//!
//! - Local video files, encoded with FFmpeg (feature: ffmpeg)
//! - In-memory sink for `stub://` destinations (tests, demo)
//!
//! Sinks are opened with fixed dimensions and a fixed output rate; every
//! written frame must match the dimensions.

pub mod file;
#[cfg(feature = "ffmpeg")]
pub(crate) mod file_ffmpeg;

pub use file::{FourCc, MemorySink, SinkConfig, VideoSink};

use anyhow::Result;

use crate::frame::Frame;

/// Sequential frame writer.
pub trait FrameSink {
    /// Append one frame.
    fn write(&mut self, frame: &Frame) -> Result<()>;

    /// Flush buffered output and finalize the container. Further writes fail.
    fn finish(&mut self) -> Result<()>;
}

impl<K: FrameSink + ?Sized> FrameSink for &mut K {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        (**self).write(frame)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}
