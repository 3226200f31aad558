//! Shared plumbing for the asset build system: streams, blobs, validated
//! build paths, the build-wide error type and the job queue.

pub mod blob;
pub mod error;
pub mod jobs;
pub mod path;
pub mod stream;

pub use blob::BinaryBlob;
pub use error::{Error, Result};
pub use path::BuildPath;
