use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::InputSize;
use crate::error::ConfigError;
use crate::ingest::{CameraConfig, CameraDevice};

const DEFAULT_MODEL_PATH: &str = "test_data/ssd_mobilenet_v2_coco_quant_postprocess.onnx";
const DEFAULT_LABELS_PATH: &str = "test_data/coco_labels.txt";
const DEFAULT_INPUT_PATH: &str = "coral_src1.jpg";
const DEFAULT_OUTPUT_PATH: &str = "output.jpg";
const DEFAULT_THRESHOLD: f32 = 0.4;
const DEFAULT_COUNT: u32 = 1;
const DEFAULT_CAMERA: &str = "1";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_TIMING_LOG: &str = "p2p_detect_fps.txt";
const DEFAULT_DETAIL_LOG: &str = "p2p_detect.txt";
const DEFAULT_INPUT_WIDTH: u32 = 300;
const DEFAULT_INPUT_HEIGHT: u32 = 300;

pub const CONFIG_ENV: &str = "EDGE_DETECT_CONFIG";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RunConfigFile {
    model: Option<PathBuf>,
    labels: Option<String>,
    input: Option<PathBuf>,
    output: Option<String>,
    threshold: Option<f32>,
    count: Option<u32>,
    iterations: Option<u64>,
    interval_ms: Option<u64>,
    show: Option<bool>,
    camera: Option<CameraConfigFile>,
    engine: Option<EngineConfigFile>,
    logs: Option<LogsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EngineConfigFile {
    backend: Option<String>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    float_input: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LogsConfigFile {
    timing: Option<PathBuf>,
    detail: Option<PathBuf>,
}

/// Inference backend selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// ONNX model run by tract.
    Tract,
    /// Scripted detections read from a JSON file given as the model path.
    Stub,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tract" => Ok(Self::Tract),
            "stub" => Ok(Self::Stub),
            other => Err(ConfigError::Invalid(format!(
                "unknown backend '{}' (expected tract or stub)",
                other
            ))),
        }
    }
}

/// Values given on the command line. `None` leaves the lower layers in place.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub model: Option<PathBuf>,
    pub labels: Option<String>,
    pub input: Option<PathBuf>,
    pub output: Option<String>,
    pub threshold: Option<f32>,
    pub count: Option<u32>,
    pub camera: Option<String>,
    pub iterations: Option<u64>,
    pub interval_ms: Option<u64>,
    pub timing_log: Option<PathBuf>,
    pub detail_log: Option<PathBuf>,
    pub backend: Option<String>,
    pub input_width: Option<u32>,
    pub input_height: Option<u32>,
    pub float_input: bool,
    pub show: bool,
}

/// Resolved run parameters. Fixed once loaded.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub model: PathBuf,
    pub labels: Option<PathBuf>,
    /// Where captured frames are persisted and read back from.
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub threshold: f32,
    /// Inference invocations per iteration.
    pub count: u32,
    /// `None` disables capture; the input image is processed as is.
    pub camera: Option<CameraConfig>,
    /// Iteration limit; 0 runs until cancelled.
    pub iterations: u64,
    pub interval: Duration,
    pub timing_log: PathBuf,
    pub detail_log: PathBuf,
    pub backend: BackendKind,
    pub input_size: InputSize,
    pub float_input: bool,
    pub show: bool,
}

impl RunConfig {
    /// Resolve defaults, then the config file, then environment, then `overrides`.
    pub fn load(overrides: ConfigOverrides) -> Result<Self> {
        let config_path = overrides
            .config_path
            .clone()
            .or_else(|| non_empty_env(CONFIG_ENV).map(PathBuf::from));
        let file_cfg = match config_path.as_deref() {
            Some(path) => read_config_file(path)?,
            None => RunConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.apply_overrides(overrides)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RunConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let engine = file.engine.unwrap_or_default();
        let logs = file.logs.unwrap_or_default();

        let camera = CameraDevice::parse(camera_file.device.as_deref().unwrap_or(DEFAULT_CAMERA))
            .map(|device| CameraConfig {
                device,
                width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                target_fps: camera_file.target_fps.unwrap_or(0),
            });
        let backend = match engine.backend {
            Some(name) => name.parse()?,
            None => BackendKind::Tract,
        };

        Ok(Self {
            model: file
                .model
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            labels: optional_path(file.labels.as_deref().unwrap_or(DEFAULT_LABELS_PATH)),
            input: file
                .input
                .unwrap_or_else(|| PathBuf::from(DEFAULT_INPUT_PATH)),
            output: optional_path(file.output.as_deref().unwrap_or(DEFAULT_OUTPUT_PATH)),
            threshold: file.threshold.unwrap_or(DEFAULT_THRESHOLD),
            count: file.count.unwrap_or(DEFAULT_COUNT),
            camera,
            iterations: file.iterations.unwrap_or(0),
            interval: Duration::from_millis(file.interval_ms.unwrap_or(0)),
            timing_log: logs
                .timing
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TIMING_LOG)),
            detail_log: logs
                .detail
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DETAIL_LOG)),
            backend,
            input_size: InputSize::new(
                engine.input_width.unwrap_or(DEFAULT_INPUT_WIDTH),
                engine.input_height.unwrap_or(DEFAULT_INPUT_HEIGHT),
            ),
            float_input: engine.float_input.unwrap_or(false),
            show: file.show.unwrap_or(false),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(model) = non_empty_env("EDGE_DETECT_MODEL") {
            self.model = PathBuf::from(model);
        }
        if let Ok(labels) = std::env::var("EDGE_DETECT_LABELS") {
            self.labels = optional_path(&labels);
        }
        if let Ok(camera) = std::env::var("EDGE_DETECT_CAMERA") {
            self.set_camera(&camera);
        }
        if let Some(threshold) = non_empty_env("EDGE_DETECT_THRESHOLD") {
            self.threshold = threshold.trim().parse().map_err(|_| {
                ConfigError::Invalid("EDGE_DETECT_THRESHOLD must be a number".into())
            })?;
        }
        if let Ok(output) = std::env::var("EDGE_DETECT_OUTPUT") {
            self.output = optional_path(&output);
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<()> {
        if let Some(model) = overrides.model {
            self.model = model;
        }
        if let Some(labels) = overrides.labels {
            self.labels = optional_path(&labels);
        }
        if let Some(input) = overrides.input {
            self.input = input;
        }
        if let Some(output) = overrides.output {
            self.output = optional_path(&output);
        }
        if let Some(threshold) = overrides.threshold {
            self.threshold = threshold;
        }
        if let Some(count) = overrides.count {
            self.count = count;
        }
        if let Some(camera) = overrides.camera {
            self.set_camera(&camera);
        }
        if let Some(iterations) = overrides.iterations {
            self.iterations = iterations;
        }
        if let Some(interval_ms) = overrides.interval_ms {
            self.interval = Duration::from_millis(interval_ms);
        }
        if let Some(path) = overrides.timing_log {
            self.timing_log = path;
        }
        if let Some(path) = overrides.detail_log {
            self.detail_log = path;
        }
        if let Some(backend) = overrides.backend {
            self.backend = backend.parse()?;
        }
        if let Some(width) = overrides.input_width {
            self.input_size.width = width;
        }
        if let Some(height) = overrides.input_height {
            self.input_size.height = height;
        }
        self.float_input |= overrides.float_input;
        self.show |= overrides.show;
        Ok(())
    }

    /// Replace the camera device, keeping any configured frame size.
    fn set_camera(&mut self, value: &str) {
        let previous = self.camera.take().unwrap_or(CameraConfig {
            device: CameraDevice::Index(1),
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
            target_fps: 0,
        });
        self.camera = CameraDevice::parse(value).map(|device| CameraConfig { device, ..previous });
    }

    fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::Invalid(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            ))
            .into());
        }
        if self.count == 0 {
            return Err(ConfigError::Invalid("count must be >= 1".into()).into());
        }
        if self.input_size.width == 0 || self.input_size.height == 0 {
            return Err(ConfigError::Invalid("model input size must be non-zero".into()).into());
        }

        require_file("model", &self.model)?;
        if let Some(labels) = &self.labels {
            require_file("label file", labels)?;
        }
        if self.backend == BackendKind::Tract && !cfg!(feature = "backend-tract") {
            return Err(ConfigError::Unavailable("tract backend", "backend-tract").into());
        }

        match &self.camera {
            Some(camera) => {
                if camera.width == 0 || camera.height == 0 {
                    return Err(ConfigError::Invalid("camera frame size must be non-zero".into()).into());
                }
                if !camera.device.is_stub() && !cfg!(feature = "ingest-v4l2") {
                    return Err(ConfigError::Unavailable("camera capture", "ingest-v4l2").into());
                }
                require_image_format("input", &self.input)?;
            }
            None => require_file("input image", &self.input)?,
        }
        if let Some(output) = &self.output {
            require_image_format("output", output)?;
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<RunConfigFile> {
    let read_err = |reason: String| ConfigError::Read {
        path: path.display().to_string(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|e| read_err(e.to_string()))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| read_err(e.to_string()))?
    } else {
        serde_json::from_str(&raw).map_err(|e| read_err(e.to_string()))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn optional_path(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

fn require_file(what: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConfigError::MissingFile {
            what,
            path: path.display().to_string(),
        })
    }
}

fn require_image_format(what: &str, path: &Path) -> Result<(), ConfigError> {
    image::ImageFormat::from_path(path)
        .map(|_| ())
        .map_err(|_| {
            ConfigError::Invalid(format!(
                "{} path {} has no supported image extension",
                what,
                path.display()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_cli() -> Result<()> {
        let cfg = RunConfig::from_file(RunConfigFile::default())?;
        assert_eq!(cfg.threshold, 0.4);
        assert_eq!(cfg.count, 1);
        assert_eq!(cfg.input, PathBuf::from("coral_src1.jpg"));
        assert_eq!(cfg.output, Some(PathBuf::from("output.jpg")));
        assert_eq!(cfg.timing_log, PathBuf::from("p2p_detect_fps.txt"));
        assert_eq!(cfg.detail_log, PathBuf::from("p2p_detect.txt"));
        assert_eq!(cfg.iterations, 0);
        assert_eq!(
            cfg.camera.as_ref().map(|c| c.device.node()),
            Some("/dev/video1".to_string())
        );
        assert_eq!(cfg.input_size, InputSize::new(300, 300));
        assert_eq!(cfg.backend, BackendKind::Tract);
        Ok(())
    }

    #[test]
    fn empty_strings_disable_optional_paths() -> Result<()> {
        let mut cfg = RunConfig::from_file(RunConfigFile::default())?;
        cfg.apply_overrides(ConfigOverrides {
            labels: Some(String::new()),
            output: Some(" ".into()),
            camera: Some("none".into()),
            ..ConfigOverrides::default()
        })?;
        assert!(cfg.labels.is_none());
        assert!(cfg.output.is_none());
        assert!(cfg.camera.is_none());
        Ok(())
    }

    #[test]
    fn camera_override_keeps_frame_size() -> Result<()> {
        let mut cfg = RunConfig::from_file(RunConfigFile {
            camera: Some(CameraConfigFile {
                device: Some("0".into()),
                width: Some(320),
                height: Some(240),
                target_fps: None,
            }),
            ..RunConfigFile::default()
        })?;
        cfg.set_camera("stub://bench");
        let camera = cfg.camera.expect("camera");
        assert_eq!(camera.device, CameraDevice::Stub("bench".into()));
        assert_eq!((camera.width, camera.height), (320, 240));
        Ok(())
    }

    #[test]
    fn validate_rejects_bad_values() -> Result<()> {
        let model = tempfile::NamedTempFile::new()?;
        let base = || -> Result<RunConfig> {
            let mut cfg = RunConfig::from_file(RunConfigFile::default())?;
            cfg.model = model.path().to_path_buf();
            cfg.labels = None;
            cfg.backend = BackendKind::Stub;
            cfg.camera = CameraDevice::parse("stub://test").map(|device| CameraConfig {
                device,
                ..CameraConfig::default()
            });
            Ok(cfg)
        };
        base()?.validate()?;

        let mut cfg = base()?;
        cfg.threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = base()?;
        cfg.count = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base()?;
        cfg.output = Some(PathBuf::from("annotated.unknown"));
        assert!(cfg.validate().is_err());

        let mut cfg = base()?;
        cfg.model = PathBuf::from("/definitely/not/here.onnx");
        let err = cfg.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::MissingFile { what: "model", .. })
        ));

        let mut cfg = base()?;
        cfg.camera = None;
        cfg.input = PathBuf::from("/definitely/not/here.jpg");
        assert!(cfg.validate().is_err());
        Ok(())
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!("tract".parse::<BackendKind>().ok(), Some(BackendKind::Tract));
        assert_eq!(" STUB ".parse::<BackendKind>().ok(), Some(BackendKind::Stub));
        assert!("edgetpu".parse::<BackendKind>().is_err());
    }
}
