//! Crash-safe per-run persistence.
//!
//! Layout under the store root:
//!
//! ```text
//! <base>/ensemble-checkpoints/<run_id>/_meta.json
//! <base>/ensemble-checkpoints/<run_id>/<mode_id>.json
//! <base>/ensemble-checkpoints/<run_id>/synthesis.json
//! ```

pub mod store;
pub mod types;

pub use store::{CheckpointStore, SharedCheckpointStore, CHECKPOINT_DIR, META_FILE, SYNTHESIS_FILE};
pub use types::{
    CheckpointMetadata, ModeCheckpoint, ModeStatus, ResumeState, RunInfo, RunStatus,
    SynthesisCheckpoint,
};

use std::path::PathBuf;

use crate::error::ErrorKind;

/// Error type for checkpoint operations
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{what} not found: {}", path.display())]
    NotFound { what: &'static str, path: PathBuf },

    #[error("{context} ({}): {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt checkpoint {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl CheckpointError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::Invalid,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Io { .. } => ErrorKind::Io,
            Self::Corrupt { .. } => ErrorKind::Parse,
        }
    }

    /// Missing files are a normal empty state for callers.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;
