//! Sound-bank and MIDI-file enumeration

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A selectable file with its display label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEntry {
    pub label: String,
    pub path: PathBuf,
}

/// Every file under `dir` (subdirectories included, links followed) whose
/// extension is `extension`, in directory-walk order.
///
/// Unreadable directories are skipped with a warning; a missing root yields
/// an empty list.
pub fn list_media(dir: &Path, extension: &str) -> Vec<MediaEntry> {
    let extension = extension.trim_start_matches('.');
    let mut entries = Vec::new();

    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        if let Some(label) = media_label(path) {
            entries.push(MediaEntry {
                label,
                path: path.to_path_buf(),
            });
        }
    }

    debug!("{} .{} file(s) under {}", entries.len(), extension, dir.display());
    entries
}

/// File name without its extension, underscores shown as spaces
pub fn media_label(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    Some(stem.replace('_', " "))
}
