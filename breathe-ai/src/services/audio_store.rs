//! Audio store
//!
//! Durable storage for uploaded recordings under a single storage root.
//!
//! The client-supplied file name is untrusted: it is reduced to its final
//! path component, restricted to `[A-Za-z0-9._-]`, length-capped and then
//! suffixed with a generated UUID. The result is the only thing ever joined
//! onto the storage root, so no upload can write outside it, and two uploads
//! with the same name never touch the same file.
//!
//! Bytes are written to a hidden `.part` file and linked into place once
//! synced; readers never observe a half-written artifact under its final name.

use crate::config::StorageConfig;
use crate::models::{StoredRef, UploadedAudio};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest extension kept from the client name (without the dot)
const MAX_EXTENSION_LEN: usize = 10;

/// Audio store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O failure while writing or reading an artifact
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Upload or store size limit exceeded
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Client file name unusable after sanitization
    #[error("Invalid file name: {0}")]
    InvalidName(String),

    /// Upload contained no bytes
    #[error("Upload is empty")]
    EmptyUpload,

    /// Stored reference does not point inside the store root
    #[error("Artifact is outside the storage root: {0}")]
    OutsideRoot(String),
}

impl StoreError {
    /// Stable error kind reported to clients
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Storage(_) | StoreError::OutsideRoot(_) => "StorageError",
            StoreError::QuotaExceeded(_) => "QuotaExceeded",
            StoreError::InvalidName(_) => "InvalidName",
            StoreError::EmptyUpload => "EmptyUpload",
        }
    }
}

/// File-system audio store
#[derive(Debug, Clone)]
pub struct AudioStore {
    root: PathBuf,
    config: StorageConfig,
}

impl AudioStore {
    /// Open (creating if needed) a store rooted at `root`
    ///
    /// The root is canonicalized so every `StoredRef` carries an absolute path.
    pub fn new(root: &Path, config: StorageConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        info!(root = %root.display(), "Audio store ready");
        Ok(Self { root, config })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist an upload and return its artifact description
    pub async fn save(
        &self,
        original_name: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<UploadedAudio, StoreError> {
        if bytes.is_empty() {
            return Err(StoreError::EmptyUpload);
        }

        let size_bytes = bytes.len() as u64;
        if size_bytes > self.config.max_upload_bytes {
            return Err(StoreError::QuotaExceeded(format!(
                "upload is {} bytes, limit is {} bytes",
                size_bytes, self.config.max_upload_bytes
            )));
        }

        let sanitized = sanitize_filename(original_name, self.config.max_filename_len)?;

        if let Some(max_store_bytes) = self.config.max_store_bytes {
            let used = self.usage_bytes().await?;
            if used.saturating_add(size_bytes) > max_store_bytes {
                return Err(StoreError::QuotaExceeded(format!(
                    "store holds {} bytes, upload of {} bytes would exceed limit of {} bytes",
                    used, size_bytes, max_store_bytes
                )));
            }
        }

        let stored_name = unique_stored_name(&sanitized);
        let final_path = self.root.join(&stored_name);
        let part_path = self.root.join(format!(".{}.part", stored_name));

        let part = PartFile::new(part_path);
        write_new_file(part.path(), bytes).await?;
        publish(part, &final_path).await?;

        let sha256 = format!("{:x}", Sha256::digest(bytes));
        let detected_content_type = infer::get(bytes).map(|kind| kind.mime_type().to_string());

        if let (Some(claimed), Some(detected)) = (content_type, detected_content_type.as_deref()) {
            if claimed != detected {
                debug!(claimed, detected, "Claimed content type differs from sniffed type");
            }
        }

        info!(
            original_filename = original_name,
            stored_name = %stored_name,
            size_bytes,
            "Stored uploaded audio"
        );

        Ok(UploadedAudio {
            original_filename: original_name.to_string(),
            stored: StoredRef::new(stored_name, final_path),
            size_bytes,
            content_type: content_type.map(str::to_string),
            detected_content_type,
            sha256,
            uploaded_at: Utc::now(),
        })
    }

    /// Open a stored artifact for reading
    pub async fn open(&self, stored: &StoredRef) -> Result<File, StoreError> {
        let path = self.resolve(stored)?;
        Ok(File::open(path).await?)
    }

    /// Verify that `stored` names a file directly inside the store root
    pub fn resolve(&self, stored: &StoredRef) -> Result<PathBuf, StoreError> {
        let name_is_plain = !stored.stored_name.is_empty()
            && !stored.stored_name.starts_with('.')
            && stored
                .stored_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

        let expected = self.root.join(&stored.stored_name);
        if !name_is_plain || stored.path != expected {
            warn!(path = %stored.path.display(), "Rejected artifact reference outside store root");
            return Err(StoreError::OutsideRoot(stored.path.display().to_string()));
        }
        Ok(expected)
    }

    /// Total bytes currently held by the store
    async fn usage_bytes(&self) -> Result<u64, StoreError> {
        let mut total = 0u64;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                total = total.saturating_add(metadata.len());
            }
        }
        Ok(total)
    }
}

async fn write_new_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

/// Move a finished `.part` file to its final name
///
/// Linking fails if `final_path` already exists, so an existing artifact is
/// never replaced.
async fn publish(part: PartFile, final_path: &Path) -> std::io::Result<()> {
    fs::hard_link(part.path(), final_path).await?;
    if let Err(e) = part.remove().await {
        warn!(path = %final_path.display(), "Stored artifact but could not remove its .part file: {}", e);
    }
    Ok(())
}

/// Temporary upload file, removed unless it is published
///
/// Covers the save future being dropped mid-write as well as error returns.
struct PartFile {
    path: PathBuf,
    armed: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn remove(mut self) -> std::io::Result<()> {
        self.armed = false;
        fs::remove_file(&self.path).await
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), "Failed to remove partial upload: {}", e);
                }
            }
        }
    }
}

fn unique_stored_name(sanitized: &str) -> String {
    let id = Uuid::new_v4().simple();
    match split_extension(sanitized) {
        (stem, Some(ext)) => format!("{}-{}.{}", stem, id, ext),
        (stem, None) => format!("{}-{}", stem, id),
    }
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

/// Reduce an untrusted client file name to a safe name component
///
/// Keeps only the final path component, maps every character outside
/// `[A-Za-z0-9._-]` to `_`, strips leading dots and caps the length at
/// `max_len` (extension preserved, lowercased, at most 10 characters).
pub fn sanitize_filename(name: &str, max_len: usize) -> Result<String, StoreError> {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or("");

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').trim_end_matches('.');

    if cleaned.is_empty() {
        return Err(StoreError::InvalidName(format!("'{}' has no usable name", name)));
    }

    let (stem, ext) = split_extension(cleaned);
    let ext = ext
        .filter(|e| e.len() <= MAX_EXTENSION_LEN)
        .map(|e| e.to_ascii_lowercase());

    let ext_len = ext.as_ref().map(|e| e.len() + 1).unwrap_or(0);
    let stem_budget = max_len.saturating_sub(ext_len).max(1);
    // Cleaned text is pure ASCII, so byte slicing is on char boundaries
    let mut stem = &stem[..stem.len().min(stem_budget)];
    stem = stem.trim_end_matches('.');
    let stem = if stem.is_empty() { "audio" } else { stem };

    Ok(match ext {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    fn store_in(dir: &Path) -> AudioStore {
        AudioStore::new(dir, StorageConfig::default()).unwrap()
    }

    #[test]
    fn test_sanitize_keeps_plain_names() {
        assert_eq!(sanitize_filename("cough_01.wav", 96).unwrap(), "cough_01.wav");
    }

    #[test]
    fn test_sanitize_strips_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd", 96).unwrap(), "passwd");
        assert_eq!(sanitize_filename("..\\..\\boot.ini", 96).unwrap(), "boot.ini");
        assert_eq!(sanitize_filename("/abs/path/.hidden.wav", 96).unwrap(), "hidden.wav");
    }

    #[test]
    fn test_sanitize_replaces_unsafe_characters() {
        assert_eq!(
            sanitize_filename("my recording (1);rm -rf.WAV", 96).unwrap(),
            "my_recording__1__rm_-rf.wav"
        );
        assert_eq!(sanitize_filename("résumé.mp3", 96).unwrap(), "r_sum_.mp3");
    }

    #[test]
    fn test_sanitize_rejects_empty_names() {
        for name in ["", ".", "..", "../..", "a/b/", "...."] {
            assert!(
                matches!(sanitize_filename(name, 96), Err(StoreError::InvalidName(_))),
                "expected rejection for {:?}",
                name
            );
        }
    }

    #[test]
    fn test_sanitize_caps_length_and_keeps_extension() {
        let long = format!("{}.webm", "a".repeat(500));
        let sanitized = sanitize_filename(&long, 32).unwrap();
        assert_eq!(sanitized.len(), 32);
        assert!(sanitized.ends_with(".webm"));
    }

    #[tokio::test]
    async fn test_save_writes_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let audio = store
            .save("../../etc/passwd", Some("audio/wav"), b"RIFF fake data")
            .await
            .unwrap();

        assert_eq!(audio.stored.path.parent().unwrap(), store.root());
        assert!(audio.stored.stored_name.starts_with("passwd-"));
        assert_eq!(audio.original_filename, "../../etc/passwd");
        assert_eq!(audio.size_bytes, 14);
        assert_eq!(std::fs::read(&audio.stored.path).unwrap(), b"RIFF fake data");
    }

    #[tokio::test]
    async fn test_identical_names_never_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let first = store.save("take.wav", None, b"first").await.unwrap();
        let second = store.save("take.wav", None, b"second").await.unwrap();

        assert_ne!(first.stored.path, second.stored.path);
        assert_eq!(std::fs::read(&first.stored.path).unwrap(), b"first");
        assert_eq!(std::fs::read(&second.stored.path).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_concurrent_uploads_are_all_retrievable() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(dir.path()));

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            // Half the uploads share a name to exercise collisions
            let name = if i % 2 == 0 { "same.wav".to_string() } else { format!("n{}.wav", i) };
            handles.push(tokio::spawn(async move {
                let payload = format!("payload-{}", i).into_bytes();
                let audio = store.save(&name, None, &payload).await.unwrap();
                (audio, payload)
            }));
        }

        for handle in handles {
            let (audio, payload) = handle.await.unwrap();
            let mut file = store.open(&audio.stored).await.unwrap();
            let mut contents = Vec::new();
            file.read_to_end(&mut contents).await.unwrap();
            assert_eq!(contents, payload);
        }
    }

    #[tokio::test]
    async fn test_upload_over_limit_is_quota_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            max_upload_bytes: 4,
            ..StorageConfig::default()
        };
        let store = AudioStore::new(dir.path(), config).unwrap();

        let err = store.save("big.wav", None, b"12345").await.unwrap_err();
        assert_eq!(err.kind(), "QuotaExceeded");
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_store_quota_counts_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            max_store_bytes: Some(10),
            ..StorageConfig::default()
        };
        let store = AudioStore::new(dir.path(), config).unwrap();

        store.save("a.wav", None, b"123456").await.unwrap();
        let err = store.save("b.wav", None, b"123456").await.unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn test_empty_upload_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let err = store.save("a.wav", None, b"").await.unwrap_err();
        assert_eq!(err.kind(), "EmptyUpload");
    }

    #[tokio::test]
    async fn test_open_rejects_foreign_reference() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let forged = StoredRef::new("passwd".to_string(), PathBuf::from("/etc/passwd"));
        assert!(matches!(
            store.open(&forged).await,
            Err(StoreError::OutsideRoot(_))
        ));

        let traversal = StoredRef::new("../x".to_string(), store.root().join("../x"));
        assert!(store.resolve(&traversal).is_err());
    }

    #[tokio::test]
    async fn test_no_part_files_left_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        store.save("a.wav", None, b"abc").await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(store.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_sha256_and_sniffed_type_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        // Minimal RIFF/WAVE header is enough for magic-byte detection
        let mut bytes = b"RIFF\x24\x00\x00\x00WAVEfmt ".to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        let audio = store.save("clip.wav", Some("audio/wav"), &bytes).await.unwrap();

        assert_eq!(audio.sha256.len(), 64);
        assert_eq!(audio.detected_content_type.as_deref(), Some("audio/x-wav"));
        assert_eq!(audio.content_type.as_deref(), Some("audio/wav"));
    }

    #[tokio::test]
    async fn test_publish_never_replaces_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("clip-1.wav");
        let part_path = dir.path().join(".clip-1.wav.part");
        std::fs::write(&final_path, b"original").unwrap();
        std::fs::write(&part_path, b"intruder").unwrap();

        let err = publish(PartFile::new(part_path.clone()), &final_path).await.unwrap_err();

        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&final_path).unwrap(), b"original");
        assert!(!part_path.exists());
    }

    #[tokio::test]
    async fn test_abandoned_part_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let part_path = dir.path().join(".late.wav.part");

        {
            let part = PartFile::new(part_path.clone());
            write_new_file(part.path(), b"half").await.unwrap();
            assert!(part_path.exists());
        }

        assert!(!part_path.exists());
    }
}
