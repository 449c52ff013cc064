//! Typed errors for the sync pipeline and its collaborators.

use thiserror::Error;

/// Errors from the channel transport.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("channel gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("channel not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Errors from object storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage request failed (HTTP {status}) for '{path}'")]
    Status { status: u16, path: String },

    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    #[error("missing credentials: {0}")]
    Credentials(String),
}

/// Run-level failures of a sync procedure.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Too many listings looked deleted at once. Nothing was mutated.
    #[error(
        "deletion aborted by safety guard: {missing} of {total} listings reported missing; \
         check channel access and permissions"
    )]
    DeletionGuardTripped { missing: usize, total: usize },

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("catalog error: {0}")]
    Catalog(#[from] sqlx::Error),
}
