mod backend;
mod backends;
mod engine;
mod result;

pub use backend::{DetectorBackend, InputSize};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use engine::InferenceEngine;
pub use result::{BBox, Detection, RawDetection};
