//! vid_anon - anonymize a directory of dashcam recordings.
//!
//! For every `.mp4`/`.MP4` below INPUT_DIR:
//! 1. Optionally trims the first and last mile using a timing table
//! 2. Optionally pixelates faces and shirts frame by frame
//! 3. Optionally deletes the intermediate trimmed file
//!
//! Outputs are named `{output_dir}/{relative stem}_{suffix}` and existing
//! outputs are reused, so an interrupted run can simply be restarted. A file
//! that cannot be processed is logged and skipped; the exit status is non-zero
//! if any file failed.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use vid_anon::{
    output_path, AnonConfig, FfmpegCliTranscoder, FrameStreamer, LandmarkBackend, TimingTable,
    VideoCutter,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "vid_anon", about = "Video anonymization tool")]
struct Args {
    /// Directory searched recursively for recordings
    input_dir: PathBuf,

    /// Enable face blurring
    #[arg(long)]
    blur_face: bool,

    /// Enable shirt blurring to hide logos
    #[arg(long)]
    blur_shirt: bool,

    /// Timing table (CSV: file,start,stop) relative to INPUT_DIR; removes the
    /// first and last mile of driving
    #[arg(long, value_name = "TABLE")]
    cut_first_last_mile: Option<PathBuf>,

    /// Where anonymized files are written
    #[arg(long, default_value = ".", value_name = "DIR")]
    output_dir: PathBuf,

    /// Delete intermediate files
    #[arg(long)]
    clean_up: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = AnonConfig::load()?;
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let blur = args.blur_face || args.blur_shirt;
    if !blur && args.cut_first_last_mile.is_none() {
        log::warn!("nothing to do: pass --blur-face, --blur-shirt or --cut-first-last-mile");
        return Ok(());
    }

    let files = {
        let _stage = ui.stage("Find recordings");
        find_recordings(&args.input_dir)?
    };
    if files.is_empty() {
        log::warn!("no .mp4 files found under {}", args.input_dir.display());
        return Ok(());
    }
    log::info!("anonymizing {} file(s):", files.len());
    for file in &files {
        log::info!("  {}", file.display());
    }

    let mut cutter = match &args.cut_first_last_mile {
        Some(table) => {
            let table_path = args.input_dir.join(table);
            let table = TimingTable::load(&table_path)?;
            log::info!(
                "loaded {} timing entries from {}",
                table.len(),
                table_path.display()
            );
            Some(
                VideoCutter::new(table, FfmpegCliTranscoder::locate()?)
                    .with_offset_secs(cfg.trim_offset_secs),
            )
        }
        None => None,
    };

    let counter = ui.frame_counter("frames");
    let mut streamer = if blur {
        let backend = {
            let _stage = ui.stage("Load landmark models");
            load_backend(&cfg)?
        };
        let progress = counter.clone();
        let mut streamer = FrameStreamer::new(backend, cfg.streamer_config())?
            .on_progress(move |p| progress.set(p.frames_read));
        for region in cfg.regions(args.blur_shirt, args.blur_face) {
            streamer = streamer.with_region(region)?;
        }
        Some(streamer)
    } else {
        None
    };

    let failed = run_batch(&files, |file| {
        log::info!(
            "anonymizing {}... each step may take a few minutes",
            file.display()
        );
        let mut intermediates = Vec::new();
        let mut current = file.to_path_buf();

        if let Some(cutter) = cutter.as_mut() {
            let _stage = ui.stage(&format!("Trim {}", file.display()));
            let target = output_path(file, &args.input_dir, &args.output_dir, "cut.mp4");
            ensure_parent(&target)?;
            let outcome = cutter
                .cut(file, &target)
                .with_context(|| format!("trim {}", file.display()))?;
            if outcome.is_intermediate() {
                intermediates.push(outcome.path().to_path_buf());
            }
            current = outcome.path().to_path_buf();
        }

        if let Some(streamer) = streamer.as_mut() {
            let _stage = ui.stage(&format!("Blur {}", current.display()));
            let target = output_path(file, &args.input_dir, &args.output_dir, "blurred.mp4");
            ensure_parent(&target)?;
            counter.reset();
            let report = streamer
                .blur_video(&current, &target)
                .with_context(|| format!("blur {}", current.display()))?;
            if report.skipped_existing() {
                log::info!("{} already blurred, continuing", target.display());
            } else {
                log::info!(
                    "{}: {} frames written, {} decode faults, end: {:?}",
                    report.output.display(),
                    report.frames_written,
                    report.decode_faults,
                    report.end_reason
                );
                for region in &report.regions {
                    log::info!(
                        "  {}: {} blurred, {} without landmarks, {} degenerate",
                        region.name,
                        region.blurred,
                        region.missing_landmarks,
                        region.degenerate
                    );
                }
            }
        } else {
            // The trimmed file is the final product.
            intermediates.clear();
        }

        if args.clean_up {
            for path in intermediates {
                log::info!("deleting support file {}", path.display());
                fs::remove_file(&path)
                    .with_context(|| format!("delete {}", path.display()))?;
            }
        }
        Ok(())
    });
    counter.finish();

    if failed > 0 {
        return Err(anyhow!("{} of {} file(s) failed", failed, files.len()));
    }
    Ok(())
}

/// Run `each` on every file. A failure is logged and the batch moves on;
/// returns the number of files that failed.
fn run_batch<F>(files: &[PathBuf], mut each: F) -> usize
where
    F: FnMut(&Path) -> Result<()>,
{
    let mut failed = 0;
    for file in files {
        if let Err(e) = each(file) {
            log::error!("{} failed: {:#}", file.display(), e);
            failed += 1;
        }
    }
    failed
}

#[cfg(feature = "backend-tract")]
fn load_backend(cfg: &AnonConfig) -> Result<Box<dyn LandmarkBackend>> {
    use vid_anon::landmarks::{TractBackend, TractModelConfig};

    let dir = cfg
        .model_dir
        .as_ref()
        .ok_or_else(|| anyhow!("VIDANON_MODEL_DIR must name the landmark model directory"))?;
    let backend = TractBackend::new()
        .with_pose_model(TractModelConfig::pose_landmarks(dir.join("pose_landmark.onnx")))?
        .with_face_model(TractModelConfig::face_mesh(dir.join("face_landmark.onnx")))?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_backend(_cfg: &AnonConfig) -> Result<Box<dyn LandmarkBackend>> {
    Err(anyhow!(
        "landmark inference requires the backend-tract feature"
    ))
}

/// Every `.mp4` / `.MP4` below `dir`, sorted.
fn find_recordings(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = fs::read_dir(&current)
            .with_context(|| format!("read directory {}", current.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .is_some_and(|ext| ext == "mp4" || ext == "MP4")
            {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create output directory {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_continues_past_failed_file() {
        let files: Vec<PathBuf> = ["a.mp4", "broken.mp4", "c.mp4"]
            .into_iter()
            .map(PathBuf::from)
            .collect();
        let mut seen = Vec::new();

        let failed = run_batch(&files, |file| {
            seen.push(file.to_path_buf());
            if file.ends_with("broken.mp4") {
                return Err(anyhow!("cannot open video source"));
            }
            Ok(())
        });

        assert_eq!(failed, 1);
        assert_eq!(seen, files);
    }
}
