use std::path::PathBuf;

use thiserror::Error;

/// Central error type for the stem-splitter-server crate.
#[derive(Debug, Error)]
pub enum SplitError {
    // Generic fallback (wraps anyhow)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    // Pipeline-fatal variants
    #[error("Invalid upload: {0}")]
    Intake(String),

    #[error("Workspace error at {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Separation failed: {0}")]
    Separation(String),

    #[error("Could not build URL for {path}: {reason}")]
    UrlSynthesis { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    // Per-stem, recovered by the orchestrator
    #[error("Transcoding `{stem}` failed: {reason}")]
    StemTranscode { stem: String, reason: String },
}

impl SplitError {
    /// Returns false only for errors that drop a single stem instead of the request.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SplitError::StemTranscode { .. })
    }

    /// Returns true when the caller sent something unusable.
    pub fn is_client_error(&self) -> bool {
        matches!(self, SplitError::Intake(_))
    }

    pub fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SplitError::Workspace {
            path: path.into(),
            source,
        }
    }

    pub fn transcode(stem: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SplitError::StemTranscode {
            stem: stem.into(),
            reason: reason.to_string(),
        }
    }
}

// --- Implement From conversions for common errors ---
impl From<std::io::Error> for SplitError {
    fn from(e: std::io::Error) -> Self {
        SplitError::Anyhow(e.into())
    }
}

pub type Result<T> = std::result::Result<T, SplitError>;
