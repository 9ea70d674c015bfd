//! Upload client seam.
//!
//! The worker only needs one blocking call per episode. [`crate::telegram`]
//! provides the HTTP implementation; tests substitute a recording stub.

use std::path::PathBuf;

use crate::error::ClientError;
use crate::metadata::EpisodeMetadata;
use crate::result::SentMessage;

/// Chat that receives the upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Peer {
    /// The session's own chat
    #[default]
    SelfChat,
}

/// Everything the client needs to send one episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub peer: Peer,
    pub file_path: PathBuf,
    pub title: String,
    pub performer: String,
    pub voice: bool,
    /// Thumbnail reference from the sidecar, passed through untouched
    pub thumbnail_ref: String,
}

impl UploadRequest {
    /// Audio upload to the self chat, not as a voice note.
    pub fn audio(file_path: PathBuf, metadata: EpisodeMetadata) -> Self {
        Self {
            peer: Peer::SelfChat,
            file_path,
            title: metadata.title,
            performer: metadata.artist,
            voice: false,
            thumbnail_ref: metadata.thumbnail_ref,
        }
    }
}

/// Blocking uploader. Retries are left to the caller, and so is working out
/// which media field of the returned message is populated.
pub trait UploadClient {
    fn upload(&self, request: &UploadRequest) -> Result<SentMessage, ClientError>;
}

impl<C: UploadClient + ?Sized> UploadClient for &C {
    fn upload(&self, request: &UploadRequest) -> Result<SentMessage, ClientError> {
        (**self).upload(request)
    }
}
