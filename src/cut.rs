//! First/last-mile trimming.
//!
//! A timing table lists, per recording, when the participant starts and stops
//! driving. The cutter drops a fixed margin after the start and before the
//! stop (2m24s by default, roughly one mile at residential speed) so the
//! footage never shows where the driver lives.
//!
//! Table format: CSV with a header row and exactly three columns,
//! `file,start,stop`, timestamps as `HH:MM:SS`.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use anyhow::anyhow;
use chrono::{NaiveTime, Timelike};
use regex::Regex;
use thiserror::Error;

pub const DEFAULT_TRIM_OFFSET_SECS: u32 = 144;
/// Frame rate the trimmed file is re-encoded at.
pub const TRIM_OUTPUT_FPS: u32 = 30;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum CutError {
    #[error("cannot read timing table '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("timing table has no header row")]
    MissingHeader,
    #[error("timing table line {line}: expected 3 columns (file, start, stop), found {found}")]
    ColumnCount { line: usize, found: usize },
    #[error("timing table line {line}: invalid timestamp '{value}', expected HH:MM:SS")]
    BadTimestamp { line: usize, value: String },
    #[error("trim window for '{file}' is empty: {start} to {stop}")]
    EmptyTrimWindow {
        file: String,
        start: Timestamp,
        stop: Timestamp,
    },
    #[error("ffmpeg not found in PATH")]
    FfmpegNotFound,
    #[error("cannot move trimmed file into place at '{path}'")]
    Promote {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("transcoding '{input}' failed")]
    Transcode {
        input: PathBuf,
        #[source]
        source: BoxError,
    },
}

// ----------------------------------------------------------------------------
// Timing table
// ----------------------------------------------------------------------------

/// Whole seconds since the start of a recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u32);

impl Timestamp {
    pub fn from_secs(secs: u32) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> u32 {
        self.0
    }

    /// Parse a strict two-digit `HH:MM:SS`.
    pub fn parse(value: &str) -> Option<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| Regex::new(r"^\d{2}:\d{2}:\d{2}$").unwrap());
        if !pattern.is_match(value) {
            return None;
        }
        let time = NaiveTime::parse_from_str(value, "%H:%M:%S").ok()?;
        Some(Self(time.num_seconds_from_midnight()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0;
        write!(f, "{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimingEntry {
    pub file: String,
    pub start: Timestamp,
    pub stop: Timestamp,
}

impl TimingEntry {
    /// Window left after removing `offset_secs` from both ends.
    pub fn trimmed(&self, offset_secs: u32) -> Result<TrimWindow, CutError> {
        let start = self.start.as_secs().saturating_add(offset_secs);
        let stop = self.stop.as_secs().saturating_sub(offset_secs);
        if stop <= start {
            return Err(CutError::EmptyTrimWindow {
                file: self.file.clone(),
                start: Timestamp(start),
                stop: Timestamp(stop),
            });
        }
        Ok(TrimWindow {
            start: Timestamp(start),
            stop: Timestamp(stop),
        })
    }

    fn matches(&self, file_name: &str) -> bool {
        self.file == file_name
            || Path::new(&self.file)
                .file_name()
                .is_some_and(|name| name == file_name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrimWindow {
    pub start: Timestamp,
    pub stop: Timestamp,
}

#[derive(Clone, Debug, Default)]
pub struct TimingTable {
    entries: Vec<TimingEntry>,
}

impl TimingTable {
    pub fn load(path: &Path) -> Result<Self, CutError> {
        let raw = fs::read_to_string(path).map_err(|source| CutError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, CutError> {
        let mut rows = raw
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        let (header_line, header) = rows.next().ok_or(CutError::MissingHeader)?;
        let found = split_row(header).len();
        if found != 3 {
            return Err(CutError::ColumnCount {
                line: header_line,
                found,
            });
        }

        let mut entries = Vec::new();
        for (line, row) in rows {
            let fields = split_row(row);
            let [file, start, stop] = fields[..] else {
                return Err(CutError::ColumnCount {
                    line,
                    found: fields.len(),
                });
            };
            let timestamp = |value: &str| {
                Timestamp::parse(value).ok_or_else(|| CutError::BadTimestamp {
                    line,
                    value: value.to_string(),
                })
            };
            entries.push(TimingEntry {
                file: file.to_string(),
                start: timestamp(start)?,
                stop: timestamp(stop)?,
            });
        }
        Ok(Self { entries })
    }

    /// First entry for the file name (last path component) of `path`.
    pub fn lookup(&self, path: &Path) -> Option<&TimingEntry> {
        let name = path.file_name()?.to_str()?;
        self.entries.iter().find(|entry| entry.matches(name))
    }

    pub fn entries(&self) -> &[TimingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn split_row(row: &str) -> Vec<&str> {
    row.split(',')
        .map(|field| field.trim().trim_matches('"'))
        .collect()
}

// ----------------------------------------------------------------------------
// Transcoding
// ----------------------------------------------------------------------------

/// Re-encodes `input` between two timestamps.
pub trait Transcoder {
    fn trim(&mut self, input: &Path, output: &Path, window: TrimWindow) -> anyhow::Result<()>;
}

/// Runs the `ffmpeg` executable.
#[derive(Clone, Debug)]
pub struct FfmpegCliTranscoder {
    binary: PathBuf,
}

impl FfmpegCliTranscoder {
    /// Find `ffmpeg` on `PATH`.
    pub fn locate() -> Result<Self, CutError> {
        let binary = which::which("ffmpeg").map_err(|_| CutError::FfmpegNotFound)?;
        Ok(Self { binary })
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

/// `-y -i IN -ss START -to STOP -filter:v fps=30 OUT`
pub fn trim_args(input: &Path, output: &Path, window: TrimWindow) -> Vec<OsString> {
    vec![
        "-y".into(),
        "-i".into(),
        input.as_os_str().to_owned(),
        "-ss".into(),
        window.start.to_string().into(),
        "-to".into(),
        window.stop.to_string().into(),
        "-filter:v".into(),
        format!("fps={}", TRIM_OUTPUT_FPS).into(),
        output.as_os_str().to_owned(),
    ]
}

impl Transcoder for FfmpegCliTranscoder {
    fn trim(&mut self, input: &Path, output: &Path, window: TrimWindow) -> anyhow::Result<()> {
        let args = trim_args(input, output, window);
        log::debug!("Running {} {:?}", self.binary.display(), args);
        let result = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail = stderr.lines().last().unwrap_or("").trim();
            return Err(anyhow!("ffmpeg exited with {}: {}", result.status, tail));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Cutter
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CutOutcome {
    /// Not in the timing table; use the input as is.
    Passthrough(PathBuf),
    /// A trimmed file from an earlier run was found.
    Existing(PathBuf),
    Trimmed(PathBuf),
}

impl CutOutcome {
    /// The file later stages should read.
    pub fn path(&self) -> &Path {
        match self {
            CutOutcome::Passthrough(p) | CutOutcome::Existing(p) | CutOutcome::Trimmed(p) => p,
        }
    }

    /// True when the path is an intermediate file rather than the input.
    pub fn is_intermediate(&self) -> bool {
        !matches!(self, CutOutcome::Passthrough(_))
    }
}

pub struct VideoCutter<T: Transcoder> {
    table: TimingTable,
    transcoder: T,
    offset_secs: u32,
}

impl<T: Transcoder> VideoCutter<T> {
    pub fn new(table: TimingTable, transcoder: T) -> Self {
        Self {
            table,
            transcoder,
            offset_secs: DEFAULT_TRIM_OFFSET_SECS,
        }
    }

    pub fn with_offset_secs(mut self, offset_secs: u32) -> Self {
        self.offset_secs = offset_secs;
        self
    }

    pub fn transcoder(&self) -> &T {
        &self.transcoder
    }

    pub fn cut(&mut self, input: &Path, output: &Path) -> Result<CutOutcome, CutError> {
        let Some(entry) = self.table.lookup(input) else {
            log::debug!("VideoCutter: {} not in timing table", input.display());
            return Ok(CutOutcome::Passthrough(input.to_path_buf()));
        };
        if output.exists() {
            log::info!(
                "VideoCutter: first/last mile already removed ({})",
                output.display()
            );
            return Ok(CutOutcome::Existing(output.to_path_buf()));
        }

        let window = entry.trimmed(self.offset_secs)?;
        log::info!(
            "VideoCutter: removing first and last mile of {} ({} to {}), saving to {}",
            input.display(),
            window.start,
            window.stop,
            output.display()
        );
        let partial = crate::partial_path(output);
        if let Err(e) = self.transcoder.trim(input, &partial, window) {
            crate::discard_partial(&partial);
            return Err(CutError::Transcode {
                input: input.to_path_buf(),
                source: e.into(),
            });
        }
        crate::promote_partial(&partial, output).map_err(|source| CutError::Promote {
            path: output.to_path_buf(),
            source,
        })?;
        Ok(CutOutcome::Trimmed(output.to_path_buf()))
    }
}
