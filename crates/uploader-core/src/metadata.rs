use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::UploadError;

/// Field separator of the sidecar line.
pub const DELIMITER: &str = "::";

/// Contents of an episode's `<id>_data.txt` sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeMetadata {
    pub title: String,
    pub artist: String,
    pub thumbnail_ref: String,
}

impl EpisodeMetadata {
    /// Split a `title::artist::thumbnail_ref` line. Returns the number of
    /// fields found when there are fewer than three; extra fields are ignored.
    pub fn parse_line(line: &str) -> Result<Self, usize> {
        let line = line.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = line.splitn(4, DELIMITER).collect();
        if fields.len() < 3 {
            return Err(fields.len());
        }
        Ok(Self {
            title: fields[0].to_string(),
            artist: fields[1].to_string(),
            thumbnail_ref: fields[2].to_string(),
        })
    }
}

/// Read the first line of the sidecar at `path`.
pub fn read_metadata(path: &Path) -> Result<EpisodeMetadata, UploadError> {
    let unreadable = |source| UploadError::MetadataUnreadable {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(unreadable)?;
    let mut line = String::new();
    BufReader::new(file).read_line(&mut line).map_err(unreadable)?;

    EpisodeMetadata::parse_line(&line).map_err(|found| UploadError::MetadataMalformed {
        path: path.to_path_buf(),
        found,
    })
}
