#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::Result;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectorBackend, InputSize};
use crate::detect::result::RawDetection;
use crate::error::ModelError;

/// Tract-based backend for SSD-style ONNX detection models.
///
/// Expects an NHWC input and the post-processed SSD outputs:
/// boxes `[1, N, 4]` (`ymin, xmin, ymax, xmax`, normalized), classes `[1, N]`,
/// scores `[1, N]` and an optional detection count `[1]`.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: InputSize,
    float_input: bool,
    input: Option<Tensor>,
    outputs: Option<TVec<Tensor>>,
}

impl TractBackend {
    /// Load an ONNX model with a `u8` NHWC input of `input_size`.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: InputSize) -> Result<Self> {
        Self::load(model_path.as_ref(), input_size, false)
    }

    /// Load a model whose input is `f32` NHWC scaled to `[0, 1]`.
    pub fn with_float_input<P: AsRef<Path>>(model_path: P, input_size: InputSize) -> Result<Self> {
        Self::load(model_path.as_ref(), input_size, true)
    }

    fn load(model_path: &Path, input_size: InputSize, float_input: bool) -> Result<Self> {
        let load_err = |stage: &str, err: TractError| ModelError::Load {
            path: model_path.display().to_string(),
            reason: format!("{}: {}", stage, err),
        };
        let datum = if float_input {
            f32::datum_type()
        } else {
            u8::datum_type()
        };
        // Building the runnable plan allocates every tensor the model needs.
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| load_err("parse", e))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    datum,
                    tvec!(1, input_size.height as usize, input_size.width as usize, 3),
                ),
            )
            .map_err(|e| load_err("input fact", e))?
            .into_optimized()
            .map_err(|e| load_err("optimize", e))?
            .into_runnable()
            .map_err(|e| load_err("plan", e))?;

        Ok(Self {
            model,
            input_size,
            float_input,
            input: None,
            outputs: None,
        })
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let shape = (
            1,
            self.input_size.height as usize,
            self.input_size.width as usize,
            3,
        );
        if self.float_input {
            tract_ndarray::Array4::from_shape_fn(shape, |(_, y, x, c)| {
                image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
            })
            .into_tensor()
        } else {
            tract_ndarray::Array4::from_shape_fn(shape, |(_, y, x, c)| {
                image.get_pixel(x as u32, y as u32)[c]
            })
            .into_tensor()
        }
    }
}

fn output_values(outputs: &TVec<Tensor>, index: usize) -> Result<Vec<f32>> {
    let tensor = outputs
        .get(index)
        .ok_or_else(|| ModelError::Output(format!("missing output #{}", index)))?;
    let values = tensor
        .cast_to::<f32>()
        .map_err(|e| ModelError::Output(format!("output #{}: {}", index, e)))?;
    let view = values
        .to_array_view::<f32>()
        .map_err(|e| ModelError::Output(format!("output #{}: {}", index, e)))?;
    Ok(view.iter().copied().collect())
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
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
        self.input = Some(self.build_input(input));
        self.outputs = None;
        Ok(())
    }

    fn invoke(&mut self) -> Result<()> {
        let input = self
            .input
            .clone()
            .ok_or_else(|| ModelError::Invoke("input tensor not set".into()))?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| ModelError::Invoke(e.to_string()))?;
        self.outputs = Some(outputs.into_iter().map(|v| v.into_tensor()).collect());
        Ok(())
    }

    fn detections(&self) -> Result<Vec<RawDetection>> {
        let outputs = self
            .outputs
            .as_ref()
            .ok_or_else(|| ModelError::Output("no invocation since input was bound".into()))?;
        if outputs.len() < 3 {
            return Err(ModelError::Output(format!(
                "expected at least 3 outputs (boxes, classes, scores), got {}",
                outputs.len()
            ))
            .into());
        }

        let boxes = output_values(outputs, 0)?;
        let classes = output_values(outputs, 1)?;
        let scores = output_values(outputs, 2)?;
        let reported = if outputs.len() > 3 {
            output_values(outputs, 3)?.first().copied()
        } else {
            None
        };
        decode_ssd(&boxes, &classes, &scores, reported)
    }
}

/// Decode post-processed SSD outputs into raw detections.
///
/// `boxes` holds four values per detection. The number of detections is the
/// shortest of the three outputs, further capped by `reported` when the model
/// emits a count.
fn decode_ssd(
    boxes: &[f32],
    classes: &[f32],
    scores: &[f32],
    reported: Option<f32>,
) -> Result<Vec<RawDetection>> {
    if boxes.len() % 4 != 0 {
        return Err(ModelError::Output(format!(
            "box output length {} is not a multiple of 4",
            boxes.len()
        ))
        .into());
    }

    let mut count = (boxes.len() / 4).min(classes.len()).min(scores.len());
    if let Some(reported) = reported {
        count = count.min(reported.max(0.0) as usize);
    }

    Ok(boxes
        .chunks_exact(4)
        .zip(classes.iter().zip(scores))
        .take(count)
        .map(|(bbox, (&class, &score))| {
            RawDetection::new(
                class.max(0.0) as u32,
                score,
                [bbox[0], bbox[1], bbox[2], bbox[3]],
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOXES: [f32; 12] = [
        0.1, 0.2, 0.3, 0.4, //
        0.0, 0.0, 1.0, 1.0, //
        0.5, 0.5, 0.6, 0.6,
    ];

    #[test]
    fn decodes_every_slot_without_a_count() -> Result<()> {
        let out = decode_ssd(&BOXES, &[0.0, 17.0, 3.0], &[0.9, 0.5, 0.1], None)?;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], RawDetection::new(0, 0.9, [0.1, 0.2, 0.3, 0.4]));
        assert_eq!(out[1].class_id, 17);
        assert_eq!(out[2].bbox, [0.5, 0.5, 0.6, 0.6]);
        Ok(())
    }

    #[test]
    fn reported_count_truncates() -> Result<()> {
        let out = decode_ssd(&BOXES, &[1.0, 2.0, 3.0], &[0.9, 0.8, 0.7], Some(2.0))?;
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].class_id, 2);

        let out = decode_ssd(&BOXES, &[1.0, 2.0, 3.0], &[0.9, 0.8, 0.7], Some(-4.0))?;
        assert!(out.is_empty());

        // A count larger than the outputs never reads past them.
        let out = decode_ssd(&BOXES, &[1.0, 2.0, 3.0], &[0.9, 0.8, 0.7], Some(100.0))?;
        assert_eq!(out.len(), 3);
        Ok(())
    }

    #[test]
    fn shortest_output_bounds_the_count() -> Result<()> {
        let out = decode_ssd(&BOXES, &[1.0, 2.0], &[0.9, 0.8, 0.7], None)?;
        assert_eq!(out.len(), 2);
        let out = decode_ssd(&BOXES[..4], &[1.0, 2.0], &[0.9, 0.8], None)?;
        assert_eq!(out.len(), 1);
        Ok(())
    }

    #[test]
    fn ragged_box_output_is_rejected() {
        let err = decode_ssd(&BOXES[..6], &[1.0, 2.0], &[0.9, 0.8], None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ModelError>(),
            Some(ModelError::Output(_))
        ));
    }

    #[test]
    fn negative_class_ids_clamp_to_zero() -> Result<()> {
        let out = decode_ssd(&BOXES[..4], &[-3.0], &[0.6], Some(1.0))?;
        assert_eq!(out[0].class_id, 0);
        Ok(())
    }
}
