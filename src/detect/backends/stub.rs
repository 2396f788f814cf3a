use std::path::Path;

use anyhow::Result;
use image::RgbImage;
use serde::Deserialize;

use crate::detect::backend::{DetectorBackend, InputSize};
use crate::detect::result::RawDetection;
use crate::error::ModelError;

/// Scripted backend for dry runs and tests.
///
/// Every invocation reports the same raw detections, so repeated runs over the
/// same input are deterministic.
pub struct StubBackend {
    input_size: InputSize,
    script: Vec<RawDetection>,
    input_bound: bool,
    invoked: bool,
    invocations: u64,
}

#[derive(Debug, Deserialize)]
struct StubScript {
    input_size: [u32; 2],
    #[serde(default)]
    detections: Vec<RawDetection>,
}

impl StubBackend {
    pub fn new(input_size: InputSize, script: Vec<RawDetection>) -> Self {
        Self {
            input_size,
            script,
            input_bound: false,
            invoked: false,
            invocations: 0,
        }
    }

    /// Load a JSON script: `{"input_size": [w, h], "detections": [...]}`.
    pub fn from_script<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let load_err = |reason: String| ModelError::Load {
            path: path.display().to_string(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let script: StubScript = serde_json::from_str(&raw).map_err(|e| load_err(e.to_string()))?;
        let [width, height] = script.input_size;
        if width == 0 || height == 0 {
            return Err(load_err("input_size must be non-zero".into()).into());
        }
        Ok(Self::new(InputSize::new(width, height), script.detections))
    }

    pub fn invocations(&self) -> u64 {
        self.invocations
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_size(&self) -> InputSize {
        self.input_size
    }

    fn set_input(&mut self, input: &RgbImage) -> Result<()> {
        if input.dimensions() != (self.input_size.width, self.input_size.height) {
            return Err(ModelError::Input(format!(
                "expected {}x{} input, received {}x{}",
                self.input_size.width,
                self.input_size.height,
                input.width(),
                input.height()
            ))
            .into());
        }
        self.input_bound = true;
        self.invoked = false;
        Ok(())
    }

    fn invoke(&mut self) -> Result<()> {
        if !self.input_bound {
            return Err(ModelError::Invoke("input tensor not set".into()).into());
        }
        self.invoked = true;
        self.invocations += 1;
        Ok(())
    }

    fn detections(&self) -> Result<Vec<RawDetection>> {
        if !self.invoked {
            return Err(ModelError::Output("no invocation since input was bound".into()).into());
        }
        Ok(self.script.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn stub_backend_replays_script() -> Result<()> {
        let mut backend = StubBackend::new(
            InputSize::new(4, 4),
            vec![RawDetection::new(1, 0.75, [0.0, 0.0, 1.0, 1.0])],
        );
        assert!(backend.detections().is_err());
        assert!(backend.invoke().is_err());
        assert!(backend.set_input(&RgbImage::new(5, 4)).is_err());

        backend.set_input(&RgbImage::new(4, 4))?;
        backend.invoke()?;
        let out = backend.detections()?;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_id, 1);
        assert_eq!(backend.invocations(), 1);
        Ok(())
    }

    #[test]
    fn stub_backend_loads_json_script() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{"input_size": [300, 200], "detections": [
                {{"class_id": 3, "score": 0.6, "bbox": [0.1, 0.2, 0.3, 0.4]}}
            ]}}"#
        )?;
        let backend = StubBackend::from_script(file.path())?;
        assert_eq!(backend.input_size(), InputSize::new(300, 200));
        assert_eq!(backend.script.len(), 1);
        Ok(())
    }

    #[test]
    fn stub_script_rejects_empty_input_size() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, r#"{{"input_size": [0, 200]}}"#)?;
        assert!(StubBackend::from_script(file.path()).is_err());
        Ok(())
    }
}
