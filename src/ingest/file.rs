//! Local video file source.
//!
//! `VideoSource` reads frames sequentially from a local file. Paths of the
//! form `stub://WIDTHxHEIGHT?frames=N` select a synthetic generator instead,
//! which needs no decoder and is what the tests and demo use.

use anyhow::{anyhow, Context, Result};

use super::{FrameSource, ReadOutcome};
#[cfg(feature = "ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use crate::frame::Frame;

const DEFAULT_SYNTHETIC_WIDTH: u32 = 640;
const DEFAULT_SYNTHETIC_HEIGHT: u32 = 480;
const DEFAULT_SYNTHETIC_FRAMES: u64 = 300;

/// Configuration for a local file source.
#[derive(Clone, Debug, Default)]
pub struct FileConfig {
    /// Local file path (e.g., "drives/participant_01.mp4") or a `stub://` spec.
    pub path: String,
}

impl FileConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Local file frame source.
pub struct VideoSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl VideoSource {
    /// Open the source. Fails if the file cannot be opened or has no video track.
    pub fn open(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        if config.path.starts_with("stub://") {
            Ok(Self {
                backend: FileBackend::Synthetic(SyntheticFileSource::parse(config)?),
            })
        } else {
            #[cfg(feature = "ffmpeg")]
            {
                Ok(Self {
                    backend: FileBackend::Ffmpeg(FfmpegFileSource::new(config)?),
                })
            }
            #[cfg(not(feature = "ffmpeg"))]
            {
                Err(anyhow!("file decoding requires the ffmpeg feature"))
            }
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> FileStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

impl FrameSource for VideoSource {
    fn dimensions(&self) -> (u32, u32) {
        match &self.backend {
            FileBackend::Synthetic(source) => (source.width, source.height),
            #[cfg(feature = "ffmpeg")]
            FileBackend::Ffmpeg(source) => source.dimensions(),
        }
    }

    fn read(&mut self) -> ReadOutcome {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.read(),
            #[cfg(feature = "ffmpeg")]
            FileBackend::Ffmpeg(source) => source.read(),
        }
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_decoded: u64,
    pub decode_faults: u64,
    pub path: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    config: FileConfig,
    width: u32,
    height: u32,
    total_frames: u64,
    frame_count: u64,
}

impl SyntheticFileSource {
    fn parse(config: FileConfig) -> Result<Self> {
        let rest = config.path.trim_start_matches("stub://");
        let (dims, query) = rest.split_once('?').unwrap_or((rest, ""));

        // Anything that is not WIDTHxHEIGHT is just a label.
        let (width, height) = dims
            .split_once('x')
            .and_then(|(w, h)| Some((w.parse::<u32>().ok()?, h.parse::<u32>().ok()?)))
            .unwrap_or((DEFAULT_SYNTHETIC_WIDTH, DEFAULT_SYNTHETIC_HEIGHT));
        if width == 0 || height == 0 {
            return Err(anyhow!("synthetic source dimensions must be non-zero"));
        }

        let mut total_frames = DEFAULT_SYNTHETIC_FRAMES;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some(("frames", n)) => {
                    total_frames = n
                        .parse()
                        .with_context(|| format!("invalid frame count in '{}'", config.path))?;
                }
                _ => return Err(anyhow!("unknown synthetic source option '{}'", pair)),
            }
        }

        log::info!(
            "VideoSource: opened {} (synthetic {}x{}, {} frames)",
            config.path,
            width,
            height,
            total_frames
        );
        Ok(Self {
            config,
            width,
            height,
            total_frames,
            frame_count: 0,
        })
    }

    fn read(&mut self) -> ReadOutcome {
        if self.frame_count >= self.total_frames {
            return ReadOutcome::EndOfStream;
        }
        self.frame_count += 1;
        let shift = self.frame_count;
        ReadOutcome::Frame(Frame::from_fn(self.width, self.height, |x, y| {
            [
                ((x as u64 + shift) % 256) as u8,
                ((y as u64 + shift) % 256) as u8,
                ((x as u64 + y as u64) % 256) as u8,
            ]
        }))
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_decoded: self.frame_count,
            decode_faults: 0,
            path: self.config.path.clone(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_ends_after_frame_count() {
        let mut source = VideoSource::open(FileConfig::new("stub://8x6?frames=2")).unwrap();
        assert_eq!(source.dimensions(), (8, 6));
        assert!(matches!(source.read(), ReadOutcome::Frame(f) if f.dimensions() == (8, 6)));
        assert!(matches!(source.read(), ReadOutcome::Frame(_)));
        assert!(matches!(source.read(), ReadOutcome::EndOfStream));
        assert!(matches!(source.read(), ReadOutcome::EndOfStream));
        assert_eq!(source.stats().frames_decoded, 2);
    }

    #[test]
    fn synthetic_defaults() {
        let source = VideoSource::open(FileConfig::new("stub://front")).unwrap();
        assert_eq!(source.dimensions(), (640, 480));
    }

    #[test]
    fn rejects_remote_and_malformed_paths() {
        assert!(VideoSource::open(FileConfig::new("https://example.com/a.mp4")).is_err());
        assert!(VideoSource::open(FileConfig::new("   ")).is_err());
        assert!(VideoSource::open(FileConfig::new("stub://0x10")).is_err());
        assert!(VideoSource::open(FileConfig::new("stub://8x8?fps=3")).is_err());
    }
}
