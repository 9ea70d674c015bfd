use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::UploadError;

/// Extension of the audio files the producer drops into the watch directory.
pub const AUDIO_EXT: &str = "mp3";

const DATA_SUFFIX: &str = "_data";

/// File stem shared by an episode's audio, sidecar and result files.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EpisodeId(String);

impl EpisodeId {
    pub fn new(id: impl Into<String>) -> Result<Self, &'static str> {
        let id = id.into();
        if id.is_empty() {
            return Err("empty episode id");
        }
        if id.contains('/') || id.contains('\\') {
            return Err("episode id contains a path separator");
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of work found in the watch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEpisode {
    pub id: EpisodeId,
    /// `<id>.mp3`, written by the producer
    pub audio_path: PathBuf,
    /// `<id>_data.txt`, single `title::artist::thumbnail_ref` line
    pub metadata_path: PathBuf,
    /// `<id>.txt`, written by us once the upload is done
    pub result_path: PathBuf,
}

impl PendingEpisode {
    /// Derive all three paths of episode `id` inside `dir`.
    pub fn new(dir: &Path, id: EpisodeId) -> Self {
        let audio_path = dir.join(format!("{}.{}", id, AUDIO_EXT));
        let metadata_path = dir.join(format!("{}{}.txt", id, DATA_SUFFIX));
        let result_path = dir.join(format!("{}.txt", id));
        Self {
            id,
            audio_path,
            metadata_path,
            result_path,
        }
    }

    /// Build an episode from the path of its audio file.
    pub fn from_audio_path(audio_path: &Path) -> Result<Self, UploadError> {
        let invalid = |reason| UploadError::InvalidEpisode {
            path: audio_path.to_path_buf(),
            reason,
        };

        let name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| invalid("file name is not valid UTF-8"))?;
        let stem = name
            .strip_suffix(AUDIO_EXT)
            .and_then(|s| s.strip_suffix('.'))
            .ok_or_else(|| invalid("not an .mp3 file"))?;
        let id = EpisodeId::new(stem).map_err(invalid)?;

        let dir = audio_path.parent().unwrap_or_else(|| Path::new(""));
        Ok(Self::new(dir, id))
    }

    /// Episode whose sidecar is this episode's result file: `<x>_data.txt` is
    /// both the result of `<x>_data` and the sidecar of `<x>`.
    pub fn sidecar_owner(&self) -> Option<&str> {
        self.id
            .as_str()
            .strip_suffix(DATA_SUFFIX)
            .filter(|owner| !owner.is_empty())
    }
}
