mod backend;
mod backends;
mod engine;
mod result;

pub use backend::DetectorBackend;
pub use backends::{CpuBackend, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use engine::{EngineOptions, InferenceEngine};
pub use result::{Classification, Detection, ObjectObservation};
