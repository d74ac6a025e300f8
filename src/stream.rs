//! Per-file anonymization loop.
//!
//! `FrameStreamer` owns the landmark backend and the region list. One call to
//! `stream` (or `blur_video`) walks a source from the first frame to the end:
//!
//! ```text
//! Init ──open source/sink──▶ Streaming ──EndOfStream / fault limit──▶ Done
//! ```
//!
//! Region failures never end the stream; decode faults are governed by the
//! configured [`FaultPolicy`]; open and write failures are fatal.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use thiserror::Error;

use crate::anonymize::{anonymize_region, RegionError, RegionSpec};
use crate::frame::Frame;
use crate::ingest::{FileConfig, FrameSource, ReadOutcome, VideoSource};
use crate::landmarks::{LandmarkBackend, LandmarkResult, LandmarkSet};
use crate::sink::{FourCc, FrameSink, SinkConfig, VideoSink};

pub const DEFAULT_OUTPUT_FPS: u32 = 30;
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1000;
pub const DEFAULT_MAX_CONSECUTIVE_DECODE_FAULTS: u32 = 1000;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What to do when the source reports a frame it could not decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultPolicy {
    /// Skip faulty frames. After more than `max_consecutive` faults in a row the
    /// stream ends normally with [`EndReason::FaultLimit`].
    Tolerate { max_consecutive: u32 },
    /// The first fault aborts the stream with [`StreamError::DecodeFault`].
    Fail,
}

impl FaultPolicy {
    /// `0` means fail fast.
    pub fn from_max_consecutive(max: u32) -> Self {
        if max == 0 {
            FaultPolicy::Fail
        } else {
            FaultPolicy::Tolerate {
                max_consecutive: max,
            }
        }
    }
}

impl Default for FaultPolicy {
    fn default() -> Self {
        FaultPolicy::Tolerate {
            max_consecutive: DEFAULT_MAX_CONSECUTIVE_DECODE_FAULTS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamerConfig {
    /// Declared rate of the output file, independent of the source rate.
    pub output_fps: u32,
    pub codec: FourCc,
    /// Frames between progress reports.
    pub progress_interval: u64,
    pub fault_policy: FaultPolicy,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            output_fps: DEFAULT_OUTPUT_FPS,
            codec: FourCc::MP4V,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            fault_policy: FaultPolicy::default(),
        }
    }
}

impl StreamerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.output_fps == 0 {
            return Err(anyhow!("output_fps must be > 0"));
        }
        if self.progress_interval == 0 {
            return Err(anyhow!("progress_interval must be > 0"));
        }
        Ok(())
    }
}

/// Why streaming stopped without an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    EndOfStream,
    /// Too many consecutive decode faults.
    FaultLimit { consecutive: u32 },
    /// The destination already existed; nothing was read or written.
    OutputExists,
}

/// Outcome counters for one region.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegionStats {
    pub name: &'static str,
    pub blurred: u64,
    /// Landmark set absent, empty, or too short for the region's indices.
    pub missing_landmarks: u64,
    /// Hull collapsed to a point or line, or fell outside the frame.
    pub degenerate: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamReport {
    pub output: PathBuf,
    pub frames_read: u64,
    pub frames_written: u64,
    pub decode_faults: u64,
    /// Frames where the landmark backend returned an error.
    pub inference_failures: u64,
    pub regions: Vec<RegionStats>,
    pub end_reason: EndReason,
}

impl StreamReport {
    fn new(output: PathBuf, regions: &[RegionSpec]) -> Self {
        Self {
            output,
            frames_read: 0,
            frames_written: 0,
            decode_faults: 0,
            inference_failures: 0,
            regions: regions
                .iter()
                .map(|spec| RegionStats {
                    name: spec.name,
                    ..RegionStats::default()
                })
                .collect(),
            end_reason: EndReason::EndOfStream,
        }
    }

    pub fn skipped_existing(&self) -> bool {
        self.end_reason == EndReason::OutputExists
    }

    pub fn region(&self, name: &str) -> Option<&RegionStats> {
        self.regions.iter().find(|r| r.name == name)
    }
}

/// Snapshot handed to the progress callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamProgress {
    pub frames_read: u64,
    pub frames_written: u64,
    pub decode_faults: u64,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("cannot open video source '{path}'")]
    UnopenableSource {
        path: String,
        #[source]
        source: BoxError,
    },
    #[error("cannot open destination '{path}'")]
    UnwritableDestination {
        path: String,
        #[source]
        source: BoxError,
    },
    #[error("write failed after {frames_written} frames")]
    WriteFailed {
        frames_written: u64,
        #[source]
        source: BoxError,
    },
    #[error("decode fault at read {read}: {message}")]
    DecodeFault { read: u64, message: String },
}

type ProgressFn = Box<dyn FnMut(&StreamProgress)>;

pub struct FrameStreamer<B: LandmarkBackend> {
    backend: B,
    regions: Vec<RegionSpec>,
    config: StreamerConfig,
    progress: Option<ProgressFn>,
}

impl<B: LandmarkBackend> FrameStreamer<B> {
    pub fn new(backend: B, config: StreamerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            regions: Vec::new(),
            config,
            progress: None,
        })
    }

    /// Enable a region. Regions are processed in the order they are added.
    pub fn with_region(mut self, spec: RegionSpec) -> Result<Self> {
        if spec.blocks == 0 {
            return Err(anyhow!("region '{}': {}", spec.name, RegionError::InvalidBlocks));
        }
        if !self.backend.supports(spec.source) {
            return Err(anyhow!(
                "region '{}' needs {:?} landmarks, which backend '{}' does not produce",
                spec.name,
                spec.source,
                self.backend.name()
            ));
        }
        self.regions.push(spec);
        Ok(self)
    }

    pub fn on_progress(mut self, callback: impl FnMut(&StreamProgress) + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn regions(&self) -> &[RegionSpec] {
        &self.regions
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Anonymize `input` into `output`. An existing `output` is left alone;
    /// it is only ever created complete.
    pub fn blur_video(&mut self, input: &Path, output: &Path) -> Result<StreamReport, StreamError> {
        if output.exists() {
            log::info!(
                "FrameStreamer: {} already exists, skipping {}",
                output.display(),
                input.display()
            );
            let mut report = StreamReport::new(output.to_path_buf(), &self.regions);
            report.end_reason = EndReason::OutputExists;
            return Ok(report);
        }

        let input_path = input.to_string_lossy().into_owned();
        let source = VideoSource::open(FileConfig::new(input_path.clone())).map_err(|e| {
            StreamError::UnopenableSource {
                path: input_path,
                source: e.into(),
            }
        })?;

        self.stream_to_file(source, output, VideoSink::create)
    }

    /// Stream into a file sink created by `create`. Frames go to the
    /// [`partial_path`](crate::partial_path) sibling of `output`, which is
    /// renamed to `output` only after the sink finished. On error the partial
    /// file is removed, so `output` never holds a truncated video.
    pub fn stream_to_file<S, K, F>(
        &mut self,
        source: S,
        output: &Path,
        create: F,
    ) -> Result<StreamReport, StreamError>
    where
        S: FrameSource,
        K: FrameSink,
        F: FnOnce(SinkConfig) -> Result<K>,
    {
        let (width, height) = source.dimensions();
        let partial = crate::partial_path(output);
        let unwritable = |source: BoxError| StreamError::UnwritableDestination {
            path: output.to_string_lossy().into_owned(),
            source,
        };

        let sink = match create(SinkConfig {
            path: partial.to_string_lossy().into_owned(),
            width,
            height,
            fps: self.config.output_fps,
            codec: self.config.codec,
        }) {
            Ok(sink) => sink,
            Err(e) => {
                crate::discard_partial(&partial);
                return Err(unwritable(e.into()));
            }
        };

        let report = match self.stream(source, sink, output) {
            Ok(report) => report,
            Err(e) => {
                crate::discard_partial(&partial);
                return Err(e);
            }
        };
        crate::promote_partial(&partial, output).map_err(|e| unwritable(e.into()))?;
        Ok(report)
    }

    /// Run the loop over an already opened source and sink. The sink is
    /// finished on every non-error exit.
    pub fn stream<S: FrameSource, K: FrameSink>(
        &mut self,
        mut source: S,
        mut sink: K,
        output: impl Into<PathBuf>,
    ) -> Result<StreamReport, StreamError> {
        let mut report = StreamReport::new(output.into(), &self.regions);
        let (width, height) = source.dimensions();
        log::info!(
            "FrameStreamer: streaming {}x{} into {} (backend {}, {} region(s), {} fps)",
            width,
            height,
            report.output.display(),
            self.backend.name(),
            self.regions.len(),
            self.config.output_fps
        );

        if !self.regions.is_empty() {
            if let Err(e) = self.backend.warm_up() {
                log::warn!("FrameStreamer: backend warm-up failed: {:#}", e);
            }
        }

        let mut consecutive_faults = 0u32;
        let end_reason = loop {
            match source.read() {
                ReadOutcome::Frame(mut frame) => {
                    consecutive_faults = 0;
                    report.frames_read += 1;
                    self.anonymize_frame(&mut frame, &mut report);
                    sink.write(&frame).map_err(|e| StreamError::WriteFailed {
                        frames_written: report.frames_written,
                        source: e.into(),
                    })?;
                    report.frames_written += 1;
                    if report.frames_read % self.config.progress_interval == 0 {
                        self.report_progress(&report);
                    }
                }
                ReadOutcome::EndOfStream => break EndReason::EndOfStream,
                ReadOutcome::DecodeFault(message) => {
                    report.decode_faults += 1;
                    consecutive_faults += 1;
                    match self.config.fault_policy {
                        FaultPolicy::Fail => {
                            return Err(StreamError::DecodeFault {
                                read: report.frames_read + report.decode_faults,
                                message,
                            });
                        }
                        FaultPolicy::Tolerate { max_consecutive } => {
                            log::debug!("FrameStreamer: skipping undecodable frame: {}", message);
                            if consecutive_faults > max_consecutive {
                                break EndReason::FaultLimit {
                                    consecutive: consecutive_faults,
                                };
                            }
                        }
                    }
                }
            }
        };

        sink.finish().map_err(|e| StreamError::WriteFailed {
            frames_written: report.frames_written,
            source: e.into(),
        })?;
        report.end_reason = end_reason;

        match end_reason {
            EndReason::FaultLimit { consecutive } => log::warn!(
                "FrameStreamer: stopped after {} consecutive decode faults; {} frames written to {}",
                consecutive,
                report.frames_written,
                report.output.display()
            ),
            _ => log::info!(
                "FrameStreamer: finished {} ({} frames, {} decode faults)",
                report.output.display(),
                report.frames_written,
                report.decode_faults
            ),
        }
        Ok(report)
    }

    fn anonymize_frame(&mut self, frame: &mut Frame, report: &mut StreamReport) {
        if self.regions.is_empty() {
            return;
        }
        let detected = match self.backend.detect(frame) {
            Ok(result) => result,
            Err(e) => {
                report.inference_failures += 1;
                log::debug!(
                    "FrameStreamer: landmark inference failed on frame {}: {:#}",
                    report.frames_read,
                    e
                );
                LandmarkResult::default()
            }
        };

        let empty = LandmarkSet::default();
        for (spec, stats) in self.regions.iter().zip(report.regions.iter_mut()) {
            let landmarks = detected.get(spec.source).unwrap_or(&empty);
            match anonymize_region(frame, landmarks, spec) {
                Ok(_) => stats.blurred += 1,
                Err(RegionError::MissingLandmark { .. }) => stats.missing_landmarks += 1,
                Err(e) => {
                    stats.degenerate += 1;
                    log::debug!(
                        "FrameStreamer: {} skipped on frame {}: {}",
                        spec.name,
                        report.frames_read,
                        e
                    );
                }
            }
        }
    }

    fn report_progress(&mut self, report: &StreamReport) {
        let snapshot = StreamProgress {
            frames_read: report.frames_read,
            frames_written: report.frames_written,
            decode_faults: report.decode_faults,
        };
        log::info!(
            "FrameStreamer: {} frames processed ({} decode faults)",
            snapshot.frames_read,
            snapshot.decode_faults
        );
        if let Some(callback) = self.progress.as_mut() {
            callback(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{Landmark, LandmarkKind, StubBackend};
    use crate::sink::MemorySink;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::fs::File;
    use std::io::Write;
    use std::rc::Rc;

    /// Replays a fixed list of outcomes, then reports end of stream.
    struct ScriptedSource {
        width: u32,
        height: u32,
        script: VecDeque<ReadOutcome>,
    }

    impl ScriptedSource {
        fn new(width: u32, height: u32, script: Vec<ReadOutcome>) -> Self {
            Self {
                width,
                height,
                script: script.into(),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn dimensions(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn read(&mut self) -> ReadOutcome {
            self.script.pop_front().unwrap_or(ReadOutcome::EndOfStream)
        }
    }

    fn frame() -> ReadOutcome {
        ReadOutcome::Frame(Frame::filled(8, 8, [10, 20, 30]))
    }

    fn fault() -> ReadOutcome {
        ReadOutcome::DecodeFault("corrupt packet".to_string())
    }

    /// Appends raw frame bytes to a file and refuses writes past `capacity`.
    struct RawFileSink {
        file: File,
        capacity: u64,
        written: u64,
    }

    impl RawFileSink {
        fn create(config: SinkConfig, capacity: u64) -> Result<Self> {
            Ok(Self {
                file: File::create(&config.path)?,
                capacity,
                written: 0,
            })
        }
    }

    impl FrameSink for RawFileSink {
        fn write(&mut self, frame: &Frame) -> Result<()> {
            if self.written == self.capacity {
                return Err(anyhow!("disk full"));
            }
            self.file.write_all(frame.as_bytes())?;
            self.written += 1;
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.file.flush()?;
            Ok(())
        }
    }

    fn streamer(policy: FaultPolicy) -> FrameStreamer<StubBackend> {
        FrameStreamer::new(
            StubBackend::default(),
            StreamerConfig {
                fault_policy: policy,
                ..StreamerConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn synthetic_source_runs_to_end_of_stream() {
        let source = VideoSource::open(FileConfig::new("stub://8x6?frames=3")).unwrap();
        let mut sink = MemorySink::new(8, 6);
        let mut streamer = streamer(FaultPolicy::default());

        let report = streamer.stream(source, &mut sink, "stub://out").unwrap();

        assert_eq!(report.end_reason, EndReason::EndOfStream);
        assert_eq!(report.frames_read, 3);
        assert_eq!(report.frames_written, 3);
        assert_eq!(sink.frames().len(), 3);
        assert!(sink.is_finished());
        // No regions, no inference.
        assert_eq!(streamer.backend().calls(), 0);
    }

    #[test]
    fn consecutive_faults_past_limit_end_stream() {
        let source = ScriptedSource::new(8, 8, vec![frame(), fault(), fault(), fault(), frame()]);
        let mut sink = MemorySink::new(8, 8);
        let mut streamer = streamer(FaultPolicy::Tolerate { max_consecutive: 2 });

        let report = streamer.stream(source, &mut sink, "stub://out").unwrap();

        assert_eq!(report.end_reason, EndReason::FaultLimit { consecutive: 3 });
        assert_eq!(report.decode_faults, 3);
        assert_eq!(report.frames_written, 1);
        assert!(sink.is_finished());
    }

    #[test]
    fn decoded_frame_resets_fault_run() {
        let source = ScriptedSource::new(
            8,
            8,
            vec![fault(), fault(), frame(), fault(), fault(), frame()],
        );
        let mut sink = MemorySink::new(8, 8);
        let mut streamer = streamer(FaultPolicy::Tolerate { max_consecutive: 2 });

        let report = streamer.stream(source, &mut sink, "stub://out").unwrap();

        assert_eq!(report.end_reason, EndReason::EndOfStream);
        assert_eq!(report.decode_faults, 4);
        assert_eq!(report.frames_written, 2);
    }

    #[test]
    fn fail_policy_aborts_on_first_fault() {
        let source = ScriptedSource::new(8, 8, vec![frame(), fault(), frame()]);
        let mut sink = MemorySink::new(8, 8);
        let mut streamer = streamer(FaultPolicy::from_max_consecutive(0));

        let err = streamer.stream(source, &mut sink, "stub://out").unwrap_err();

        assert!(matches!(err, StreamError::DecodeFault { read: 2, .. }));
        assert_eq!(sink.frames().len(), 1);
        assert!(!sink.is_finished());
    }

    #[test]
    fn progress_callback_fires_every_interval() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let recorder = Rc::clone(&seen);
        let mut streamer = FrameStreamer::new(
            StubBackend::default(),
            StreamerConfig {
                progress_interval: 2,
                ..StreamerConfig::default()
            },
        )
        .unwrap()
        .on_progress(move |p| recorder.borrow_mut().push(p.frames_read));

        let source = VideoSource::open(FileConfig::new("stub://4x4?frames=5")).unwrap();
        streamer
            .stream(source, MemorySink::new(4, 4), "stub://out")
            .unwrap();

        assert_eq!(*seen.borrow(), vec![2, 4]);
    }

    #[test]
    fn missing_landmarks_and_inference_errors_skip_regions() {
        let backend = StubBackend::scripted(vec![None, Some(LandmarkResult::default())]);
        let mut streamer = FrameStreamer::new(backend, StreamerConfig::default())
            .unwrap()
            .with_region(RegionSpec::shirt(20))
            .unwrap();
        let source = ScriptedSource::new(8, 8, vec![frame(), frame()]);
        let mut sink = MemorySink::new(8, 8);

        let report = streamer.stream(source, &mut sink, "stub://out").unwrap();

        assert_eq!(report.inference_failures, 1);
        let shirt = report.region("shirt").unwrap();
        assert_eq!(shirt.missing_landmarks, 2);
        assert_eq!(shirt.blurred, 0);
        let untouched = Frame::filled(8, 8, [10, 20, 30]);
        assert!(sink.frames().iter().all(|f| f.as_slice() == untouched.as_bytes()));
    }

    #[test]
    fn collinear_landmarks_count_as_degenerate() {
        let line = LandmarkSet::new((0..4).map(|i| Landmark::new(0.1 * i as f32, 0.5)).collect());
        let backend = StubBackend::new(LandmarkResult {
            pose: Some(line),
            face: None,
        });
        let mut streamer = FrameStreamer::new(backend, StreamerConfig::default())
            .unwrap()
            .with_region(RegionSpec {
                name: "line",
                source: LandmarkKind::Pose,
                indices: vec![0, 1, 2, 3],
                blocks: 2,
            })
            .unwrap();
        let source = ScriptedSource::new(8, 8, vec![frame()]);

        let report = streamer
            .stream(source, MemorySink::new(8, 8), "stub://out")
            .unwrap();

        assert_eq!(report.region("line").unwrap().degenerate, 1);
        assert_eq!(streamer.backend().calls(), 1);
    }

    #[test]
    fn sink_rejection_is_fatal() {
        let source = ScriptedSource::new(8, 8, vec![frame()]);
        let mut streamer = streamer(FaultPolicy::default());
        let err = streamer
            .stream(source, MemorySink::new(4, 4), "stub://out")
            .unwrap_err();
        assert!(matches!(err, StreamError::WriteFailed { frames_written: 0, .. }));
    }

    #[test]
    fn existing_output_is_skipped() {
        let existing = tempfile::NamedTempFile::new().unwrap();
        let mut streamer = streamer(FaultPolicy::default())
            .with_region(RegionSpec::face(10))
            .unwrap();

        let report = streamer
            .blur_video(Path::new("stub://8x8?frames=2"), existing.path())
            .unwrap();

        assert!(report.skipped_existing());
        assert_eq!(report.frames_read, 0);
        assert_eq!(streamer.backend().calls(), 0);
    }

    #[test]
    fn unopenable_source_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut streamer = streamer(FaultPolicy::default());
        let err = streamer
            .blur_video(&dir.path().join("missing.mp4"), &dir.path().join("out.mp4"))
            .unwrap_err();
        assert!(matches!(err, StreamError::UnopenableSource { .. }));
    }

    #[test]
    fn invalid_config_and_regions_rejected() {
        let bad = StreamerConfig {
            output_fps: 0,
            ..StreamerConfig::default()
        };
        assert!(FrameStreamer::new(StubBackend::default(), bad).is_err());
        assert!(streamer(FaultPolicy::default())
            .with_region(RegionSpec::shirt(0))
            .is_err());
    }

    #[test]
    fn failed_write_leaves_no_output_and_rerun_completes() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("clip_blurred.mp4");
        let mut streamer = streamer(FaultPolicy::default());

        let source = ScriptedSource::new(8, 8, vec![frame(), frame(), frame()]);
        let err = streamer
            .stream_to_file(source, &output, |config| RawFileSink::create(config, 1))
            .unwrap_err();
        assert!(matches!(err, StreamError::WriteFailed { frames_written: 1, .. }));
        assert!(!output.exists());
        assert!(!crate::partial_path(&output).exists());

        let source = ScriptedSource::new(8, 8, vec![frame(), frame(), frame()]);
        let report = streamer
            .stream_to_file(source, &output, |config| RawFileSink::create(config, 10))
            .unwrap();
        assert_eq!(report.end_reason, EndReason::EndOfStream);
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 3 * 8 * 8 * 3);
        assert!(!crate::partial_path(&output).exists());
    }

    #[test]
    fn fail_fast_decode_fault_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("clip_blurred.mp4");
        let mut streamer = streamer(FaultPolicy::Fail);

        let source = ScriptedSource::new(8, 8, vec![frame(), fault()]);
        let err = streamer
            .stream_to_file(source, &output, |config| RawFileSink::create(config, 10))
            .unwrap_err();

        assert!(matches!(err, StreamError::DecodeFault { .. }));
        assert!(!output.exists());
        assert!(!crate::partial_path(&output).exists());
    }

    #[test]
    fn fault_limit_still_produces_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("clip_blurred.mp4");
        let mut streamer = streamer(FaultPolicy::Tolerate { max_consecutive: 1 });

        let source = ScriptedSource::new(8, 8, vec![frame(), fault(), fault(), frame()]);
        let report = streamer
            .stream_to_file(source, &output, |config| RawFileSink::create(config, 10))
            .unwrap();

        assert_eq!(report.end_reason, EndReason::FaultLimit { consecutive: 2 });
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 8 * 8 * 3);
    }
}
