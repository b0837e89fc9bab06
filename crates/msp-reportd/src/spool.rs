//! Spool directory scanning.
//!
//! The report generator writes finished files into the spool directory and
//! renames them to their final name as the last step, so every regular file
//! found here is complete and safe to upload. Dotfiles are skipped: they
//! are generator temp files by convention.

use std::path::{Path, PathBuf};

/// Regular files ready for upload, in deterministic (name) order.
pub fn scan(directory: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}
