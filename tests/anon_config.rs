use std::sync::Mutex;

use tempfile::NamedTempFile;

use vid_anon::config::AnonConfig;
use vid_anon::{FaultPolicy, FourCc, LandmarkKind};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "VIDANON_CONFIG",
        "VIDANON_OUTPUT_FPS",
        "VIDANON_CODEC",
        "VIDANON_PROGRESS_INTERVAL",
        "VIDANON_MAX_DECODE_FAULTS",
        "VIDANON_SHIRT_BLOCKS",
        "VIDANON_FACE_BLOCKS",
        "VIDANON_TRIM_OFFSET_SECS",
        "VIDANON_MODEL_DIR",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = AnonConfig::load().expect("load config");

    assert_eq!(cfg, AnonConfig::default());
    assert_eq!(cfg.output_fps, 30);
    assert_eq!(cfg.codec, FourCc::MP4V);
    assert_eq!(cfg.trim_offset_secs, 144);
    let streamer = cfg.streamer_config();
    assert_eq!(
        streamer.fault_policy,
        FaultPolicy::Tolerate {
            max_consecutive: 1000
        }
    );
    assert_eq!(streamer.progress_interval, 1000);
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "output": { "fps": 25, "codec": "avc1" },
        "regions": { "shirt_blocks": 16, "face_blocks": 8 },
        "stream": { "progress_interval": 250, "max_consecutive_decode_faults": 50 },
        "trim": { "offset_secs": 120 },
        "model_dir": "/opt/models"
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("VIDANON_CONFIG", file.path());
    std::env::set_var("VIDANON_FACE_BLOCKS", "12");
    std::env::set_var("VIDANON_MAX_DECODE_FAULTS", "0");

    let cfg = AnonConfig::load().expect("load config");

    assert_eq!(cfg.output_fps, 25);
    assert_eq!(cfg.codec.to_string(), "avc1");
    assert_eq!(cfg.shirt_blocks, 16);
    assert_eq!(cfg.face_blocks, 12);
    assert_eq!(cfg.progress_interval, 250);
    assert_eq!(cfg.trim_offset_secs, 120);
    assert_eq!(cfg.model_dir.as_deref(), Some(std::path::Path::new("/opt/models")));
    assert_eq!(cfg.streamer_config().fault_policy, FaultPolicy::Fail);

    let regions = cfg.regions(true, true);
    assert_eq!(regions.len(), 2);
    assert_eq!(regions[0].source, LandmarkKind::Pose);
    assert_eq!(regions[0].blocks, 16);
    assert_eq!(regions[1].blocks, 12);

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = "[output]\nfps = 15\n\n[trim]\noffset_secs = 60\n";
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("VIDANON_CONFIG", file.path());

    let cfg = AnonConfig::load().expect("load config");

    assert_eq!(cfg.output_fps, 15);
    assert_eq!(cfg.trim_offset_secs, 60);
    assert_eq!(cfg.face_blocks, 10);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VIDANON_OUTPUT_FPS", "0");
    assert!(AnonConfig::load().is_err());
    clear_env();

    std::env::set_var("VIDANON_SHIRT_BLOCKS", "lots");
    assert!(AnonConfig::load().is_err());
    clear_env();

    std::env::set_var("VIDANON_CODEC", "mpeg4");
    assert!(AnonConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "unknown": 1 }"#).expect("write config");
    std::env::set_var("VIDANON_CONFIG", file.path());
    assert!(AnonConfig::load().is_err());

    clear_env();
}
