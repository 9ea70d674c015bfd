use std::path::PathBuf;

use thiserror::Error;

use crate::result::MediaKind;

/// Failure of a single episode. The worker logs it, leaves the episode's
/// inputs in place and moves on.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid episode file {path}: {reason}")]
    InvalidEpisode { path: PathBuf, reason: &'static str },

    #[error("cannot read metadata file {path}: {source}")]
    MetadataUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed metadata in {path}: expected 3 fields separated by '::', found {found}")]
    MetadataMalformed { path: PathBuf, found: usize },

    #[error("upload result has {} populated media fields, expected exactly one", populated.len())]
    AmbiguousResultShape { populated: Vec<MediaKind> },

    #[error("upload result for {kind} carries no file_id")]
    MissingFileId { kind: MediaKind },

    #[error("cannot write result file {path}: {source}")]
    ResultWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl UploadError {
    /// Whether the platform may already hold a copy of the episode.
    pub fn is_post_upload(&self) -> bool {
        matches!(
            self,
            UploadError::AmbiguousResultShape { .. }
                | UploadError::MissingFileId { .. }
                | UploadError::ResultWriteFailed { .. }
        )
    }
}

/// Opaque failure reported by an upload client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot read {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("unexpected response: {0}")]
    Response(String),
}

/// Invalid startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("api_id must be positive, got {0}")]
    ApiId(i64),

    #[error("api_hash must be 32 lowercase hex characters")]
    ApiHash,

    #[error("session {path}: {reason}")]
    Session { path: PathBuf, reason: String },

    #[error("cannot read session {path}: {source}")]
    SessionIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse session {path}: {source}")]
    SessionFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot build http client: {0}")]
    Http(#[from] reqwest::Error),
}
