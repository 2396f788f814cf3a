//! edge_detect
//!
//! Single-shot object detection pipeline for edge cameras: capture a frame,
//! fit it into the model input, run the detector, log what it found and draw
//! the results onto the image.
//!
//! # Module Structure
//!
//! - `config`: run parameters (defaults, config file, environment, CLI)
//! - `ingest`: camera frame sources (V4L2 devices, synthetic `stub://` cameras)
//! - `preprocess`: aspect-preserving resize into the model input
//! - `detect`: detector backends and the inference engine handle
//! - `labels`: class id to label text
//! - `report`: timing and detail logs
//! - `annotate`: boxes and labels drawn onto the image
//! - `pipeline`: the capture/infer/report/annotate loop
//! - `error`: failure classes (config, capture, model)

pub mod annotate;
pub mod config;
pub mod detect;
pub mod error;
pub mod ingest;
pub mod labels;
pub mod pipeline;
pub mod preprocess;
pub mod report;

pub use config::{BackendKind, ConfigOverrides, RunConfig};
pub use detect::{
    BBox, Detection, DetectorBackend, InferenceEngine, InputSize, RawDetection, StubBackend,
};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use error::{CaptureError, ConfigError, ErrorClass, ModelError};
pub use ingest::{CameraConfig, CameraDevice, CameraSource, Frame};
pub use labels::LabelMap;
pub use pipeline::{IterationOutcome, IterationSummary, Pipeline, RunSummary};
pub use preprocess::ResizeScale;
pub use report::ReportWriter;
