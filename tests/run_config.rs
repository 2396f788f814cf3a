use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile, TempDir};

use edge_detect::{BackendKind, CameraDevice, ConfigError, ConfigOverrides, RunConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "EDGE_DETECT_CONFIG",
        "EDGE_DETECT_MODEL",
        "EDGE_DETECT_LABELS",
        "EDGE_DETECT_CAMERA",
        "EDGE_DETECT_THRESHOLD",
        "EDGE_DETECT_OUTPUT",
    ] {
        std::env::remove_var(key);
    }
}

fn touch(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, b"{}").expect("write file");
    path
}

#[test]
fn file_then_env_then_cli() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = TempDir::new().expect("tempdir");
    let file_model = touch(&dir, "file_model.json");
    let env_model = touch(&dir, "env_model.json");
    let labels = touch(&dir, "labels.txt");

    let mut file = NamedTempFile::new().expect("temp config");
    let json = format!(
        r#"{{
            "model": "{}",
            "labels": "{}",
            "threshold": 0.6,
            "count": 5,
            "iterations": 10,
            "interval_ms": 250,
            "camera": {{ "device": "stub://file", "width": 320, "height": 240 }},
            "engine": {{ "backend": "stub", "input_width": 320, "input_height": 320 }},
            "logs": {{ "timing": "fps.txt", "detail": "objects.txt" }}
        }}"#,
        file_model.display(),
        labels.display()
    );
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("EDGE_DETECT_CONFIG", file.path());
    std::env::set_var("EDGE_DETECT_MODEL", &env_model);
    std::env::set_var("EDGE_DETECT_THRESHOLD", "0.7");
    std::env::set_var("EDGE_DETECT_CAMERA", "stub://env");

    let cfg = RunConfig::load(ConfigOverrides {
        threshold: Some(0.25),
        count: Some(2),
        ..ConfigOverrides::default()
    })
    .expect("load config");

    assert_eq!(cfg.model, env_model);
    assert_eq!(cfg.labels.as_deref(), Some(labels.as_path()));
    assert_eq!(cfg.threshold, 0.25);
    assert_eq!(cfg.count, 2);
    assert_eq!(cfg.iterations, 10);
    assert_eq!(cfg.interval.as_millis(), 250);
    assert_eq!(cfg.backend, BackendKind::Stub);
    assert_eq!((cfg.input_size.width, cfg.input_size.height), (320, 320));
    assert_eq!(cfg.timing_log, PathBuf::from("fps.txt"));
    assert_eq!(cfg.detail_log, PathBuf::from("objects.txt"));
    let camera = cfg.camera.expect("camera");
    assert_eq!(camera.device, CameraDevice::Stub("env".into()));
    assert_eq!((camera.width, camera.height), (320, 240));

    clear_env();
}

#[test]
fn toml_config_is_accepted() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = TempDir::new().expect("tempdir");
    let model = touch(&dir, "model.json");
    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = format!(
        r#"
model = "{}"
labels = ""
output = ""
threshold = 0.5

[camera]
device = "stub://toml"

[engine]
backend = "stub"
"#,
        model.display()
    );
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = RunConfig::load(ConfigOverrides {
        config_path: Some(file.path().to_path_buf()),
        ..ConfigOverrides::default()
    })
    .expect("load config");

    assert_eq!(cfg.model, model);
    assert!(cfg.labels.is_none());
    assert!(cfg.output.is_none());
    assert_eq!(cfg.threshold, 0.5);
    assert_eq!(
        cfg.camera.map(|c| c.device),
        Some(CameraDevice::Stub("toml".into()))
    );

    clear_env();
}

#[test]
fn unknown_keys_and_bad_values_are_config_errors() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{"treshold": 0.5}"#).expect("write config");
    let err = RunConfig::load(ConfigOverrides {
        config_path: Some(file.path().to_path_buf()),
        ..ConfigOverrides::default()
    })
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::Read { .. })
    ));

    let dir = TempDir::new().expect("tempdir");
    let model = touch(&dir, "model.json");
    std::env::set_var("EDGE_DETECT_THRESHOLD", "high");
    let err = RunConfig::load(ConfigOverrides {
        model: Some(model.clone()),
        labels: Some(String::new()),
        backend: Some("stub".into()),
        camera: Some("stub://bench".into()),
        ..ConfigOverrides::default()
    })
    .unwrap_err();
    assert!(err.downcast_ref::<ConfigError>().is_some());
    clear_env();

    let err = RunConfig::load(ConfigOverrides {
        model: Some(model),
        labels: Some(String::new()),
        backend: Some("edgetpu".into()),
        ..ConfigOverrides::default()
    })
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::Invalid(_))
    ));
}

#[test]
fn missing_model_is_reported_as_config_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = RunConfig::load(ConfigOverrides {
        model: Some(PathBuf::from("/nonexistent/model.onnx")),
        labels: Some(String::new()),
        backend: Some("stub".into()),
        camera: Some("stub://bench".into()),
        ..ConfigOverrides::default()
    })
    .unwrap_err();
    assert_eq!(
        edge_detect::ErrorClass::of(&err),
        edge_detect::ErrorClass::Config
    );
    assert_eq!(edge_detect::ErrorClass::of(&err).exit_code(), 2);
}
