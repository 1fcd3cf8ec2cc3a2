pub mod blob;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use blob::BlobBackend;
pub use stub::ScriptedBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
