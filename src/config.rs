use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::anonymize::{RegionSpec, DEFAULT_FACE_BLOCKS, DEFAULT_SHIRT_BLOCKS};
use crate::cut::DEFAULT_TRIM_OFFSET_SECS;
use crate::sink::FourCc;
use crate::stream::{
    FaultPolicy, StreamerConfig, DEFAULT_MAX_CONSECUTIVE_DECODE_FAULTS, DEFAULT_OUTPUT_FPS,
    DEFAULT_PROGRESS_INTERVAL,
};

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AnonConfigFile {
    output: Option<OutputConfigFile>,
    regions: Option<RegionConfigFile>,
    stream: Option<StreamConfigFile>,
    trim: Option<TrimConfigFile>,
    model_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    fps: Option<u32>,
    codec: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RegionConfigFile {
    shirt_blocks: Option<u32>,
    face_blocks: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    progress_interval: Option<u64>,
    max_consecutive_decode_faults: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrimConfigFile {
    offset_secs: Option<u32>,
}

/// Settings shared by the binaries.
///
/// Resolution order: built-in defaults, then the file named by
/// `VIDANON_CONFIG` (JSON, or TOML for a `.toml` extension), then
/// `VIDANON_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonConfig {
    pub output_fps: u32,
    pub codec: FourCc,
    pub progress_interval: u64,
    /// `0` aborts on the first undecodable frame.
    pub max_consecutive_decode_faults: u32,
    pub shirt_blocks: u32,
    pub face_blocks: u32,
    pub trim_offset_secs: u32,
    /// Directory holding the landmark models for the tract backend.
    pub model_dir: Option<PathBuf>,
}

impl Default for AnonConfig {
    fn default() -> Self {
        Self {
            output_fps: DEFAULT_OUTPUT_FPS,
            codec: FourCc::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            max_consecutive_decode_faults: DEFAULT_MAX_CONSECUTIVE_DECODE_FAULTS,
            shirt_blocks: DEFAULT_SHIRT_BLOCKS,
            face_blocks: DEFAULT_FACE_BLOCKS,
            trim_offset_secs: DEFAULT_TRIM_OFFSET_SECS,
            model_dir: None,
        }
    }
}

impl AnonConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VIDANON_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AnonConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let output = file.output.unwrap_or_default();
        let regions = file.regions.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();
        let codec = match output.codec {
            Some(tag) => tag.parse()?,
            None => defaults.codec,
        };
        Ok(Self {
            output_fps: output.fps.unwrap_or(defaults.output_fps),
            codec,
            progress_interval: stream
                .progress_interval
                .unwrap_or(defaults.progress_interval),
            max_consecutive_decode_faults: stream
                .max_consecutive_decode_faults
                .unwrap_or(defaults.max_consecutive_decode_faults),
            shirt_blocks: regions.shirt_blocks.unwrap_or(defaults.shirt_blocks),
            face_blocks: regions.face_blocks.unwrap_or(defaults.face_blocks),
            trim_offset_secs: file
                .trim
                .and_then(|trim| trim.offset_secs)
                .unwrap_or(defaults.trim_offset_secs),
            model_dir: file.model_dir,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(fps) = env_number("VIDANON_OUTPUT_FPS")? {
            self.output_fps = fps;
        }
        if let Ok(codec) = std::env::var("VIDANON_CODEC") {
            if !codec.trim().is_empty() {
                self.codec = codec.trim().parse()?;
            }
        }
        if let Some(interval) = env_number("VIDANON_PROGRESS_INTERVAL")? {
            self.progress_interval = interval;
        }
        if let Some(max) = env_number("VIDANON_MAX_DECODE_FAULTS")? {
            self.max_consecutive_decode_faults = max;
        }
        if let Some(blocks) = env_number("VIDANON_SHIRT_BLOCKS")? {
            self.shirt_blocks = blocks;
        }
        if let Some(blocks) = env_number("VIDANON_FACE_BLOCKS")? {
            self.face_blocks = blocks;
        }
        if let Some(offset) = env_number("VIDANON_TRIM_OFFSET_SECS")? {
            self.trim_offset_secs = offset;
        }
        if let Ok(dir) = std::env::var("VIDANON_MODEL_DIR") {
            if !dir.trim().is_empty() {
                self.model_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.output_fps == 0 {
            return Err(anyhow!("output fps must be greater than zero"));
        }
        if self.progress_interval == 0 {
            return Err(anyhow!("progress interval must be greater than zero"));
        }
        if self.shirt_blocks == 0 || self.face_blocks == 0 {
            return Err(anyhow!("pixelation block counts must be greater than zero"));
        }
        Ok(())
    }

    pub fn streamer_config(&self) -> StreamerConfig {
        StreamerConfig {
            output_fps: self.output_fps,
            codec: self.codec,
            progress_interval: self.progress_interval,
            fault_policy: FaultPolicy::from_max_consecutive(self.max_consecutive_decode_faults),
        }
    }

    /// Regions to anonymize, shirt first so the face is pixelated last.
    pub fn regions(&self, blur_shirt: bool, blur_face: bool) -> Vec<RegionSpec> {
        let mut regions = Vec::new();
        if blur_shirt {
            regions.push(RegionSpec::shirt(self.shirt_blocks));
        }
        if blur_face {
            regions.push(RegionSpec::face(self.face_blocks));
        }
        regions
    }
}

fn read_config_file(path: &Path) -> Result<AnonConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_number<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", name)),
        _ => Ok(None),
    }
}
