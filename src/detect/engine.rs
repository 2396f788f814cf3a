use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::RgbImage;

use crate::detect::backend::{DetectorBackend, InputSize};
use crate::detect::result::{BBox, Detection, RawDetection};
use crate::error::ModelError;
use crate::preprocess::{fit_to_input, ResizeScale};

/// Inference engine handle.
///
/// Owns the backend exclusively. Backends allocate their tensors when they are
/// constructed, so a live engine is always ready to be invoked once an input
/// has been bound.
pub struct InferenceEngine {
    backend: Box<dyn DetectorBackend>,
    input_bound: bool,
    invocations: u64,
}

impl InferenceEngine {
    pub fn new<B: DetectorBackend + 'static>(backend: B) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(backend: Box<dyn DetectorBackend>) -> Self {
        Self {
            backend,
            input_bound: false,
            invocations: 0,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn input_size(&self) -> InputSize {
        self.backend.input_size()
    }

    /// Total number of completed invocations.
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.backend
            .warm_up()
            .with_context(|| format!("warming up {} backend", self.backend.name()))
    }

    /// Resize `image` into the model input and bind it.
    ///
    /// Returns the scale needed to map detections back onto `image`.
    pub fn set_resized_input(&mut self, image: &RgbImage) -> Result<ResizeScale> {
        let (input, scale) = fit_to_input(image, self.input_size())?;
        self.backend.set_input(&input)?;
        self.input_bound = true;
        Ok(scale)
    }

    /// Run the model once and return how long the invocation took.
    pub fn invoke(&mut self) -> Result<Duration> {
        if !self.input_bound {
            return Err(ModelError::Invoke("no input bound before invoke".into()).into());
        }
        let start = Instant::now();
        self.backend.invoke()?;
        let elapsed = start.elapsed();
        self.invocations += 1;
        Ok(elapsed)
    }

    /// Objects from the most recent invocation with `score >= threshold`,
    /// in engine order, boxed in original image pixels.
    pub fn get_objects(&self, threshold: f32, scale: ResizeScale) -> Result<Vec<Detection>> {
        let raw = self.backend.detections()?;
        Ok(filter_and_scale(&raw, threshold, self.input_size(), scale))
    }
}

pub(crate) fn filter_and_scale(
    raw: &[RawDetection],
    threshold: f32,
    size: InputSize,
    scale: ResizeScale,
) -> Vec<Detection> {
    let sx = size.width as f32 / scale.x;
    let sy = size.height as f32 / scale.y;
    raw.iter()
        .filter(|det| det.score >= threshold)
        .map(|det| {
            let [ymin, xmin, ymax, xmax] = det.bbox;
            Detection {
                class_id: det.class_id,
                score: det.score,
                bbox: BBox {
                    xmin: (xmin * sx) as i32,
                    ymin: (ymin * sy) as i32,
                    xmax: (xmax * sx) as i32,
                    ymax: (ymax * sy) as i32,
                },
            }
        })
        .collect()
}
