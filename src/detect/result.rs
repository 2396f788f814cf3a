use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates of the original image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BBox {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl BBox {
    /// Clip to a `width` x `height` frame, keeping one pixel of margin on each
    /// side so edges that fall outside the frame stay outside.
    ///
    /// The result is ordered (`min <= max`) even if `self` is not.
    pub fn clipped(&self, width: u32, height: u32) -> BBox {
        let max_x = i32::try_from(width).unwrap_or(i32::MAX);
        let max_y = i32::try_from(height).unwrap_or(i32::MAX);
        let xmin = self.xmin.clamp(-1, max_x);
        let ymin = self.ymin.clamp(-1, max_y);
        BBox {
            xmin,
            ymin,
            xmax: self.xmax.clamp(xmin, max_x),
            ymax: self.ymax.clamp(ymin, max_y),
        }
    }
}

/// One detected object, reported after an inference invocation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub class_id: u32,
    /// Confidence in [0, 1].
    pub score: f32,
    pub bbox: BBox,
}

/// Engine output before thresholding and scaling.
///
/// `bbox` is `[ymin, xmin, ymax, xmax]`, normalized to the model input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_id: u32,
    pub score: f32,
    pub bbox: [f32; 4],
}

impl RawDetection {
    pub fn new(class_id: u32, score: f32, bbox: [f32; 4]) -> Self {
        Self {
            class_id,
            score,
            bbox,
        }
    }
}
