//! Local video file sink.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};

#[cfg(feature = "ffmpeg")]
use super::file_ffmpeg::FfmpegFileSink;
use super::FrameSink;
use crate::frame::Frame;

/// Four-character codec tag, e.g. `mp4v`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc([u8; 4]);

impl FourCc {
    /// MPEG-4 Part 2.
    pub const MP4V: FourCc = FourCc(*b"mp4v");

    pub fn as_str(&self) -> &str {
        // Constructed only from validated ASCII.
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl FromStr for FourCc {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(|b| b.is_ascii_alphanumeric()) {
            return Err(anyhow!(
                "codec tag must be exactly 4 ASCII alphanumeric characters, got '{}'",
                s
            ));
        }
        let mut tag = [0u8; 4];
        tag.copy_from_slice(bytes);
        Ok(FourCc(tag))
    }
}

impl Default for FourCc {
    fn default() -> Self {
        Self::MP4V
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self.as_str())
    }
}

/// Configuration for a video sink.
#[derive(Clone, Debug)]
pub struct SinkConfig {
    /// Destination path, or `stub://...` for an in-memory sink.
    pub path: String,
    pub width: u32,
    pub height: u32,
    /// Declared output rate. Frames are timestamped `n / fps` regardless of
    /// the source's rate.
    pub fps: u32,
    pub codec: FourCc,
}

/// Local file frame sink.
pub struct VideoSink {
    backend: SinkBackend,
}

enum SinkBackend {
    Memory(MemorySink),
    #[cfg(feature = "ffmpeg")]
    Ffmpeg(FfmpegFileSink),
}

impl VideoSink {
    /// Open the destination for writing.
    pub fn create(config: SinkConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!(
                "sink dimensions must be non-zero, got {}x{}",
                config.width,
                config.height
            ));
        }
        if config.fps == 0 {
            return Err(anyhow!("sink frame rate must be > 0"));
        }
        if config.path.starts_with("stub://") {
            log::info!(
                "VideoSink: writing {} (memory {}x{} @ {} fps)",
                config.path,
                config.width,
                config.height,
                config.fps
            );
            Ok(Self {
                backend: SinkBackend::Memory(MemorySink::new(config.width, config.height)),
            })
        } else {
            #[cfg(feature = "ffmpeg")]
            {
                Ok(Self {
                    backend: SinkBackend::Ffmpeg(FfmpegFileSink::new(config)?),
                })
            }
            #[cfg(not(feature = "ffmpeg"))]
            {
                Err(anyhow!("file encoding requires the ffmpeg feature"))
            }
        }
    }

    /// Frames written so far.
    pub fn frames_written(&self) -> u64 {
        match &self.backend {
            SinkBackend::Memory(sink) => sink.frames().len() as u64,
            #[cfg(feature = "ffmpeg")]
            SinkBackend::Ffmpeg(sink) => sink.frames_written(),
        }
    }
}

impl FrameSink for VideoSink {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        match &mut self.backend {
            SinkBackend::Memory(sink) => sink.write(frame),
            #[cfg(feature = "ffmpeg")]
            SinkBackend::Ffmpeg(sink) => sink.write(frame),
        }
    }

    fn finish(&mut self) -> Result<()> {
        match &mut self.backend {
            SinkBackend::Memory(sink) => sink.finish(),
            #[cfg(feature = "ffmpeg")]
            SinkBackend::Ffmpeg(sink) => sink.finish(),
        }
    }
}

// ----------------------------------------------------------------------------
// In-memory sink for tests
// ----------------------------------------------------------------------------

/// Keeps a copy of every written frame.
#[derive(Debug, Default)]
pub struct MemorySink {
    width: u32,
    height: u32,
    frames: Vec<Vec<u8>>,
    finished: bool,
}

impl MemorySink {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frames: Vec::new(),
            finished: false,
        }
    }

    /// RGB24 bytes of each written frame, in write order.
    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl FrameSink for MemorySink {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        if self.finished {
            return Err(anyhow!("write after finish"));
        }
        if frame.dimensions() != (self.width, self.height) {
            return Err(anyhow!(
                "frame is {}x{}, sink expects {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }
        self.frames.push(frame.as_bytes().to_vec());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}
