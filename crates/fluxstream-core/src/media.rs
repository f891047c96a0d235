//! Media file recognition and main-file selection.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Extensions (lowercase, with dot) treated as playable media.
pub const MEDIA_EXTENSIONS: &[&str] = &[".mp4", ".mkv", ".avi", ".mov", ".webm", ".flv", ".wmv"];

/// One file inside resolved content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Position in the engine's file list (used to open a reader).
    pub index: usize,
    /// Full path within the content.
    pub path: String,
    /// Last path component, e.g. `movie.mkv`.
    pub name: String,
    /// Length in bytes (0 if unknown).
    pub length: u64,
    /// Lowercase extension including the dot, e.g. `.mkv`. Empty if none.
    pub extension: String,
    pub is_media: bool,
}

impl FileDescriptor {
    /// Build a descriptor from a content path, deriving name and extension.
    pub fn from_path(index: usize, path: &str, length: u64) -> Self {
        let extension = extension_of(path);
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        Self {
            index,
            path: path.to_string(),
            name,
            length,
            is_media: is_media_extension(&extension),
            extension,
        }
    }

    /// Stand-in descriptor served when a live reader exists but its metadata lookup failed.
    pub fn placeholder() -> Self {
        Self {
            index: 0,
            path: String::new(),
            name: "unknown_video".to_string(),
            length: 0,
            extension: ".mp4".to_string(),
            is_media: true,
        }
    }

    /// MIME type for the extension; `application/octet-stream` when unknown.
    pub fn content_type(&self) -> &'static str {
        match self.extension.as_str() {
            ".mp4" => "video/mp4",
            ".mkv" => "video/x-matroska",
            ".avi" => "video/x-msvideo",
            ".mov" => "video/quicktime",
            ".webm" => "video/webm",
            ".flv" => "video/x-flv",
            ".wmv" => "video/x-ms-wmv",
            _ => "application/octet-stream",
        }
    }
}

/// Lowercase extension with leading dot, or empty string.
pub fn extension_of(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Case-insensitive check against [`MEDIA_EXTENSIONS`].
pub fn is_media_extension(ext: &str) -> bool {
    let lower = ext.to_lowercase();
    MEDIA_EXTENSIONS.contains(&lower.as_str())
}

/// Largest recognized media file; on equal lengths the first one listed wins.
pub fn select_main_file(files: &[FileDescriptor]) -> Option<&FileDescriptor> {
    let mut best: Option<&FileDescriptor> = None;
    for f in files.iter().filter(|f| f.is_media) {
        match best {
            Some(b) if f.length <= b.length => {}
            _ => best = Some(f),
        }
    }
    best
}
