//! Frame capture sources.
//!
//! - Local V4L2 cameras selected by index or device path (feature: ingest-v4l2)
//! - Synthetic `stub://` cameras (testing and dry runs)
//!
//! Every source produces a `Frame` in packed RGB24. Read failures surface as
//! `CaptureError`; the caller decides whether to skip or abort.

pub mod camera;
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
mod normalize;

pub use camera::{CameraConfig, CameraDevice, CameraSource, CameraStats, Frame};
