use std::fmt;

use serde::Deserialize;

use crate::error::UploadError;

/// MIME type recorded when the platform does not report one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Media kinds a sent message can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Document,
    Photo,
    Sticker,
    Video,
    Voice,
    VideoNote,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
            MediaKind::Photo => "photo",
            MediaKind::Sticker => "sticker",
            MediaKind::Video => "video",
            MediaKind::Voice => "voice",
            MediaKind::VideoNote => "video_note",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File fields shared by every media kind. All optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileDescriptor {
    pub file_id: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub mime_type: Option<String>,
}

impl FileDescriptor {
    pub fn with_id(file_id: &str) -> Self {
        Self {
            file_id: Some(file_id.to_string()),
            ..Self::default()
        }
    }
}

/// Raw upload result: the sent message as returned by the platform, with one
/// optional field per media kind.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SentMessage {
    pub audio: Option<FileDescriptor>,
    pub document: Option<FileDescriptor>,
    /// Size variants of the same picture
    pub photo: Option<Vec<FileDescriptor>>,
    pub sticker: Option<FileDescriptor>,
    pub video: Option<FileDescriptor>,
    pub voice: Option<FileDescriptor>,
    pub video_note: Option<FileDescriptor>,
}

/// Upload outcome tagged by the media kind the platform stored it as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResult {
    Audio(FileDescriptor),
    Document(FileDescriptor),
    Photo(Vec<FileDescriptor>),
    Sticker(FileDescriptor),
    Video(FileDescriptor),
    Voice(FileDescriptor),
    VideoNote(FileDescriptor),
}

impl TryFrom<SentMessage> for UploadResult {
    type Error = UploadError;

    fn try_from(message: SentMessage) -> Result<Self, Self::Error> {
        let SentMessage {
            audio,
            document,
            photo,
            sticker,
            video,
            voice,
            video_note,
        } = message;

        let found: Vec<UploadResult> = [
            audio.map(UploadResult::Audio),
            document.map(UploadResult::Document),
            photo.map(UploadResult::Photo),
            sticker.map(UploadResult::Sticker),
            video.map(UploadResult::Video),
            voice.map(UploadResult::Voice),
            video_note.map(UploadResult::VideoNote),
        ]
        .into_iter()
        .flatten()
        .collect();

        match <[UploadResult; 1]>::try_from(found) {
            Ok([result]) => Ok(result),
            Err(found) => Err(UploadError::AmbiguousResultShape {
                populated: found.iter().map(UploadResult::kind).collect(),
            }),
        }
    }
}

/// Stable view of an upload result, independent of the media kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedResult {
    /// Always set except for photos whose first variant has no `file_name`
    pub file_id: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub mime_type: String,
}

impl UploadResult {
    pub fn kind(&self) -> MediaKind {
        match self {
            UploadResult::Audio(_) => MediaKind::Audio,
            UploadResult::Document(_) => MediaKind::Document,
            UploadResult::Photo(_) => MediaKind::Photo,
            UploadResult::Sticker(_) => MediaKind::Sticker,
            UploadResult::Video(_) => MediaKind::Video,
            UploadResult::Voice(_) => MediaKind::Voice,
            UploadResult::VideoNote(_) => MediaKind::VideoNote,
        }
    }

    /// Extract `{file_id, file_name, file_size, mime_type}`, filling defaults.
    ///
    /// Photos take their first size variant and copy `file_id` only when that
    /// variant also has a `file_name`. Every other kind must carry a `file_id`.
    pub fn normalize(&self) -> Result<NormalizedResult, UploadError> {
        let kind = self.kind();
        let (file_id, file_name, file_size, mime_type) = match self {
            UploadResult::Photo(sizes) => {
                let first = sizes
                    .first()
                    .ok_or(UploadError::MissingFileId { kind })?;
                // file_id travels with file_name: a nameless variant yields neither.
                let (file_id, file_name) = match &first.file_name {
                    Some(name) => (first.file_id.clone(), Some(name.clone())),
                    None => (None, None),
                };
                (file_id, file_name, first.file_size, first.mime_type.clone())
            }
            UploadResult::Audio(file)
            | UploadResult::Document(file)
            | UploadResult::Sticker(file)
            | UploadResult::Video(file)
            | UploadResult::Voice(file)
            | UploadResult::VideoNote(file) => {
                let file_id = file
                    .file_id
                    .clone()
                    .ok_or(UploadError::MissingFileId { kind })?;
                (
                    Some(file_id),
                    file.file_name.clone(),
                    file.file_size,
                    file.mime_type.clone(),
                )
            }
        };

        let file_name = file_name.or_else(|| {
            let suffix = if kind == MediaKind::Sticker { ".webp" } else { "" };
            file_id.as_ref().map(|id| format!("{}{}", id, suffix))
        });

        Ok(NormalizedResult {
            file_id,
            file_name,
            file_size,
            mime_type: mime_type.unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
        })
    }
}
