use std::io::Write;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use gstcar::config::{CameraSource, SinkKind, StreamConfig};
use gstcar::k4a::settings::{DepthMode, FpsMode, Mode as K4aMode};
use gstcar::pipeline;
use gstcar::theta::settings::{Mode as ThetaMode, Product};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in ["CAR_CONFIG", "CAR_SINK", "CAR_SINK_HOST", "CAR_SINK_BASE_PORT"] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "cameras": [
                { "name": "front", "source": "theta", "product": "z1", "serial_number": "20001234" },
                {
                    "name": "depth",
                    "source": "k4a",
                    "mode": "depth",
                    "fps": 15,
                    "depth_mode": "wfov-unbinned",
                    "colorize": { "min_depth": 300, "max_depth": 5000, "threads": 2 }
                }
            ],
            "sink": { "kind": "udp", "host": "10.0.0.2", "base_port": 6000 }
        }"#,
    );
    std::env::set_var("CAR_CONFIG", file.path());
    std::env::set_var("CAR_SINK_HOST", "10.0.0.9");
    std::env::set_var("CAR_SINK_BASE_PORT", "7000");

    let cfg = StreamConfig::load().expect("load config");

    assert_eq!(cfg.cameras.len(), 2);
    assert_eq!(cfg.sink.kind, SinkKind::Udp);
    assert_eq!(cfg.sink.host, "10.0.0.9");
    assert_eq!(cfg.sink.port_for(1), 7001);

    match &cfg.cameras[0].source {
        CameraSource::Theta(settings) => {
            assert_eq!(settings.product, Product::Z1);
            assert_eq!(settings.mode, ThetaMode::Uhd);
            assert_eq!(settings.serial_number, "20001234");
        }
        other => panic!("expected theta camera, got {:?}", other),
    }
    match &cfg.cameras[1].source {
        CameraSource::K4a { settings, colorize } => {
            assert_eq!(settings.mode, K4aMode::Depth);
            assert_eq!(settings.fps, FpsMode::Fps15);
            assert_eq!(settings.depth_mode, DepthMode::WfovUnbinned);
            let colorize = colorize.expect("colorize settings");
            assert_eq!(colorize.range.min(), 300);
            assert_eq!(colorize.range.max(), 5000);
            assert_eq!(colorize.threads, 2);
        }
        other => panic!("expected k4a camera, got {:?}", other),
    }

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
            [[cameras]]
            name = "kinect-color"
            source = "k4a"
            mode = "color"
            color_resolution = "1080p"
            fps = 30

            [sink]
            kind = "fake"
        "#,
    );

    let cfg = StreamConfig::from_path(file.path()).expect("load toml config");
    assert_eq!(cfg.sink.kind, SinkKind::Fake);
    let descriptions = pipeline::describe(&cfg);
    assert_eq!(descriptions.len(), 1);
    assert_eq!(descriptions[0].camera, "kinect-color");
    assert!(descriptions[0].launch.starts_with("k4asrc mode=color fps=fps30"));
    assert!(descriptions[0].launch.contains("color-resolution=1080p"));
    assert!(descriptions[0].launch.ends_with("fakesink sync=false"));

    clear_env();
}

#[test]
fn sink_kind_override_and_errors() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAR_SINK", "fake");
    let cfg = StreamConfig::load().expect("defaults with override");
    assert_eq!(cfg.sink.kind, SinkKind::Fake);
    assert_eq!(cfg.cameras[0].name, "theta");

    std::env::set_var("CAR_SINK", "rtmp");
    assert!(StreamConfig::load().is_err());

    std::env::set_var("CAR_SINK", "udp");
    std::env::set_var("CAR_SINK_BASE_PORT", "not-a-port");
    assert!(StreamConfig::load().is_err());

    clear_env();
}

#[test]
fn malformed_and_missing_files_are_errors() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(".json", "{ \"cameras\": [ { \"source\": ");
    assert!(StreamConfig::from_path(file.path()).is_err());

    let missing = file.path().with_extension("missing");
    std::env::set_var("CAR_CONFIG", &missing);
    let err = StreamConfig::load().expect_err("missing file");
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
