use anyhow::Result;
use image::RgbImage;

use crate::detect::result::RawDetection;

/// Model input dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputSize {
    pub width: u32,
    pub height: u32,
}

impl InputSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Detector backend trait.
///
/// A backend owns a loaded model with its tensors already allocated; construction
/// is the allocation step, so `invoke` can never run against unallocated tensors.
///
/// The call sequence per image is `set_input`, then one or more `invoke` calls,
/// each followed by `detections` to read the outputs of that invocation.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Dimensions the input tensor expects.
    fn input_size(&self) -> InputSize;

    /// Bind an RGB image of exactly `input_size()` as the model input.
    fn set_input(&mut self, input: &RgbImage) -> Result<()>;

    /// Run the model once on the bound input.
    fn invoke(&mut self) -> Result<()>;

    /// Raw outputs of the most recent invocation, in engine order.
    fn detections(&self) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
