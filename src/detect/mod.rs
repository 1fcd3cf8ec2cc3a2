//! Object detection: backend trait, registry, result types and the detection stage.

mod backend;
mod backends;
mod registry;
mod result;
pub(crate) mod stage;

pub use backend::{DetectorBackend, DetectorProfile};
pub use backends::stub::ScriptedResponse;
pub use backends::{BlobBackend, ScriptedBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::BackendRegistry;
pub use result::{select_best, BoundingBox, Detection};
