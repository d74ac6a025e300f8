//! vid-anon: dashcam video anonymizer
//!
//! Hides identifying regions (faces, shirt logos) in recorded drives and trims
//! the first and last mile of each recording.
//!
//! # Architecture
//!
//! Per frame, data flows strictly downward:
//!
//! 1. **Landmarks**: an injected `LandmarkBackend` returns normalized pose and
//!    face keypoints.
//! 2. **Points**: the region's landmark subset is scaled into pixel space.
//! 3. **Mask**: bounding rect plus the filled, angle-ordered convex hull.
//! 4. **Pixelate**: block means over the bounding rect.
//! 5. **Composite**: masked pixels are written back; everything else is
//!    bit-identical.
//!
//! Only `FrameStreamer` and the sources/sinks it drives touch I/O.
//!
//! # Module Structure
//!
//! - `frame`: RGB24 frame buffer (zeroized on drop)
//! - `landmarks`: landmark backends (stub, tract-onnx)
//! - `anonymize`: region engine (points, hull, mask, pixelate, composite)
//! - `ingest` / `sink`: frame sources and sinks (synthetic, FFmpeg)
//! - `stream`: per-file loop, fault policy, reports
//! - `cut`: timing table and first/last-mile trimming
//! - `config`: layered configuration for the binaries

pub mod anonymize;
pub mod config;
pub mod cut;
pub mod frame;
pub mod ingest;
pub mod landmarks;
pub mod sink;
pub mod stream;

pub use anonymize::{anonymize_region, RegionError, RegionSpec};
pub use config::AnonConfig;
pub use cut::{
    CutError, CutOutcome, FfmpegCliTranscoder, TimingEntry, TimingTable, Transcoder, TrimWindow,
    VideoCutter,
};
pub use frame::{Frame, Rect};
pub use ingest::{FileConfig, FrameSource, ReadOutcome, VideoSource};
pub use landmarks::{
    Landmark, LandmarkBackend, LandmarkKind, LandmarkResult, LandmarkSet, StubBackend,
};
pub use sink::{FourCc, FrameSink, MemorySink, SinkConfig, VideoSink};
pub use stream::{
    EndReason, FaultPolicy, FrameStreamer, RegionStats, StreamError, StreamProgress,
    StreamReport, StreamerConfig,
};

/// Output path for one stage of one input: `{output_dir}/{relative stem}_{suffix}`.
///
/// The input's directory structure below `input_dir` is kept, so two inputs
/// with the same file name in different subdirectories do not collide.
pub fn output_path(
    input: &std::path::Path,
    input_dir: &std::path::Path,
    output_dir: &std::path::Path,
    suffix: &str,
) -> std::path::PathBuf {
    let relative = input.strip_prefix(input_dir).unwrap_or(input);
    let stem = relative.with_extension("");
    let mut name = stem.into_os_string();
    name.push("_");
    name.push(suffix);
    output_dir.join(name)
}

/// Sibling path an output is written to before it is complete:
/// `clip_blurred.mp4` becomes `clip_blurred.partial.mp4`.
///
/// The extension is kept so encoders can still pick the container from it.
pub fn partial_path(target: &std::path::Path) -> std::path::PathBuf {
    let mut name = target.file_stem().map(|s| s.to_os_string()).unwrap_or_default();
    name.push(".partial");
    if let Some(ext) = target.extension() {
        name.push(".");
        name.push(ext);
    }
    target.with_file_name(name)
}

/// Move a finished partial file into place.
pub(crate) fn promote_partial(
    partial: &std::path::Path,
    target: &std::path::Path,
) -> std::io::Result<()> {
    std::fs::rename(partial, target).inspect_err(|_| discard_partial(partial))
}

/// Remove an incomplete output, if one was created.
pub(crate) fn discard_partial(partial: &std::path::Path) {
    match std::fs::remove_file(partial) {
        Ok(()) => log::info!("removed incomplete output {}", partial.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!(
            "could not remove incomplete output {}: {}",
            partial.display(),
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    #[test]
    fn output_path_keeps_subdirectories() {
        let out = output_path(
            Path::new("drives/week1/p01.MP4"),
            Path::new("drives"),
            Path::new("anon"),
            "blurred.mp4",
        );
        assert_eq!(out, PathBuf::from("anon/week1/p01_blurred.mp4"));
    }

    #[test]
    fn output_path_outside_input_dir() {
        let out = output_path(
            Path::new("p01.mp4"),
            Path::new("drives"),
            Path::new(""),
            "cut.mp4",
        );
        assert_eq!(out, PathBuf::from("p01_cut.mp4"));
    }

    #[test]
    fn partial_path_keeps_extension_and_directory() {
        assert_eq!(
            partial_path(Path::new("anon/week1/p01_blurred.mp4")),
            PathBuf::from("anon/week1/p01_blurred.partial.mp4")
        );
        assert_eq!(partial_path(Path::new("out")), PathBuf::from("out.partial"));
    }

    #[test]
    fn failed_promotion_discards_partial() {
        let dir = tempfile::tempdir().unwrap();
        let partial = dir.path().join("a.partial.mp4");
        std::fs::write(&partial, b"frames").unwrap();
        let target = dir.path().join("missing_dir").join("a.mp4");

        assert!(promote_partial(&partial, &target).is_err());
        assert!(!partial.exists());
        assert!(!target.exists());
    }

    #[test]
    fn package_license() {
        assert_eq!(env!("CARGO_PKG_LICENSE"), "Apache-2.0");
    }
}
