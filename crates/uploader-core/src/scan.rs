use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::episode::AUDIO_EXT;

/// List the audio files waiting in `dir`, sorted by file name.
///
/// Matches what a `*.mp3` shell glob would: regular files only, exact
/// lowercase extension, dotfiles excluded.
pub fn pending_audio_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if is_audio_name(name) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn is_audio_name(name: &str) -> bool {
    !name.starts_with('.')
        && Path::new(name)
            .extension()
            .is_some_and(|ext| ext == AUDIO_EXT)
}
