use std::path::Path;

use regex::Regex;
use url::Url;

use crate::config::BatchSection;

/// Decides whether a pasted source can go into the queue at all.
pub trait SourceValidator: Send + Sync {
    fn is_valid(&self, source: &str) -> bool;
}

/// Accepts Google Drive share links in the shapes users actually paste:
/// `/file/d/<id>/...`, `/open?id=<id>` and `/uc?id=<id>`.
#[derive(Debug, Clone)]
pub struct DriveLinkValidator {
    file_path: Regex,
}

impl Default for DriveLinkValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl DriveLinkValidator {
    pub fn new() -> Self {
        Self {
            file_path: Regex::new(r"^/file/d/([A-Za-z0-9_-]{10,})(?:/|$)").unwrap(),
        }
    }
}

impl SourceValidator for DriveLinkValidator {
    fn is_valid(&self, source: &str) -> bool {
        let Ok(url) = Url::parse(source) else {
            return false;
        };
        if url.scheme() != "https" || url.host_str() != Some("drive.google.com") {
            return false;
        }
        if self.file_path.is_match(url.path()) {
            return true;
        }
        if matches!(url.path(), "/open" | "/uc") {
            return url
                .query_pairs()
                .any(|(key, value)| key == "id" && is_drive_id(&value));
        }
        false
    }
}

fn is_drive_id(candidate: &str) -> bool {
    candidate.len() >= 10
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Accepts local media files by extension, case-insensitively.
#[derive(Debug, Clone)]
pub struct MediaFileValidator {
    extensions: Vec<String>,
}

impl MediaFileValidator {
    pub fn new(extensions: &[String]) -> Self {
        Self {
            extensions: extensions.iter().map(|ext| ext.to_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &BatchSection) -> Self {
        Self::new(&config.media_extensions)
    }
}

impl SourceValidator for MediaFileValidator {
    fn is_valid(&self, source: &str) -> bool {
        Path::new(source)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_lowercase();
                self.extensions.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }
}
