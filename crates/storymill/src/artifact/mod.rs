//! Shadow-twin artifacts: derived documents stored alongside their
//! source under a deterministic name and location, at most one live copy
//! per key.

pub mod resolver;
pub mod writer;

pub use resolver::{ArtifactKey, ArtifactKind, ArtifactLocation, ArtifactResolver};
pub use writer::{ArtifactWrite, ArtifactWriter};
