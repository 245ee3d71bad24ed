//! Stored upload artifacts

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Handle to an artifact inside the audio store
///
/// Only the audio store creates these; `stored_name` is always a generated,
/// sanitized file name and `path` lies inside the store root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRef {
    pub stored_name: String,
    pub path: PathBuf,
}

impl StoredRef {
    pub(crate) fn new(stored_name: String, path: PathBuf) -> Self {
        Self { stored_name, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Uploaded recording as persisted by the audio store
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedAudio {
    /// Client-supplied file name (untrusted, metadata only)
    pub original_filename: String,
    pub stored: StoredRef,
    pub size_bytes: u64,
    /// Content type claimed by the client, not verified
    pub content_type: Option<String>,
    /// MIME type sniffed from magic bytes, if recognized
    pub detected_content_type: Option<String>,
    /// Hex SHA-256 of the stored bytes
    pub sha256: String,
    pub uploaded_at: DateTime<Utc>,
}
