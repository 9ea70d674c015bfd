use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::UploadError;

/// Write `file_id` as the whole content of `result_path`.
///
/// The downstream consumer polls for the file, so it is written under a
/// temporary name first and renamed into place once flushed.
pub fn write_result(result_path: &Path, file_id: &str) -> Result<(), UploadError> {
    let failed = |source| UploadError::ResultWriteFailed {
        path: result_path.to_path_buf(),
        source,
    };

    clear_stale_temp(result_path);
    let temp_path = temp_path_for(result_path);
    let written = File::create(&temp_path).and_then(|mut file| {
        file.write_all(file_id.as_bytes())?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(failed(e));
    }

    fs::rename(&temp_path, result_path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        failed(e)
    })
}

/// Remove a temp file left behind by a write that never reached the rename.
/// Returns whether one was found.
pub fn clear_stale_temp(result_path: &Path) -> bool {
    let temp_path = temp_path_for(result_path);
    if !temp_path.is_file() {
        return false;
    }
    match fs::remove_file(&temp_path) {
        Ok(()) => {
            tracing::debug!(path = %temp_path.display(), "Removed stale result temp file");
            true
        }
        Err(e) => {
            tracing::warn!(path = %temp_path.display(), error = %e, "Failed to remove stale result temp file");
            false
        }
    }
}

/// `<dir>/.<name>.tmp`, hidden so it never matches the consumer's lookup.
fn temp_path_for(result_path: &Path) -> PathBuf {
    let name = result_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    result_path.with_file_name(format!(".{}.tmp", name))
}
