//! Fitting an image into the model input tensor.

use anyhow::Result;
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::detect::InputSize;
use crate::error::ModelError;

/// Ratio between the resized image placed in the input tensor and the original.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResizeScale {
    pub x: f32,
    pub y: f32,
}

impl ResizeScale {
    pub fn uniform(scale: f32) -> Self {
        Self { x: scale, y: scale }
    }
}

/// Resize `image` to fit `size` keeping its aspect ratio.
///
/// The resized image is placed at the top-left corner of a zero-filled canvas
/// of exactly `size`. The returned scale maps normalized output boxes back to
/// original pixel coordinates: `original = normalized * size / scale`.
pub fn fit_to_input(image: &RgbImage, size: InputSize) -> Result<(RgbImage, ResizeScale)> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ModelError::Input(format!("image has no pixels ({}x{})", width, height)).into());
    }
    if size.width == 0 || size.height == 0 {
        return Err(ModelError::Input(format!(
            "model input size {}x{} is empty",
            size.width, size.height
        ))
        .into());
    }

    let scale = f64::min(
        f64::from(size.width) / f64::from(width),
        f64::from(size.height) / f64::from(height),
    );
    let resized_width = ((f64::from(width) * scale) as u32).clamp(1, size.width);
    let resized_height = ((f64::from(height) * scale) as u32).clamp(1, size.height);

    let mut canvas = RgbImage::new(size.width, size.height);
    if (resized_width, resized_height) == (width, height) {
        imageops::replace(&mut canvas, image, 0, 0);
    } else {
        let resized = imageops::resize(image, resized_width, resized_height, FilterType::Lanczos3);
        imageops::replace(&mut canvas, &resized, 0, 0);
    }

    Ok((canvas, ResizeScale::uniform(scale as f32)))
}
