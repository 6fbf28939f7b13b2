//! Media library for record photos.
//!
//! Owns the managed media directory and is the only module that touches it.
//! Photo references exist in two coordinate spaces: [`StoredRef`] is a path
//! relative to the managed root and is what gets persisted, [`RuntimeRef`] is
//! an absolute path usable by a rendering layer.  Conversion between the two
//! goes through [`MediaLibrary`] and nowhere else, so a foreign URI can never
//! be mistaken for a managed file by an ad-hoc prefix check.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::rlog;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum MediaError {
    /// Copying a source file into the managed root failed.  The source path
    /// is kept for the caller's error message.
    Copy(String, std::io::Error),
    /// The managed root could not be created or scanned.
    Io(std::io::Error),
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaError::Copy(src, e) => write!(f, "media import of {src} failed: {e}"),
            MediaError::Io(e) => write!(f, "media io error: {e}"),
        }
    }
}

impl std::error::Error for MediaError {}

impl From<std::io::Error> for MediaError {
    fn from(e: std::io::Error) -> Self {
        MediaError::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Reference types
// ---------------------------------------------------------------------------

/// A photo reference in stored form: a path relative to the managed root.
/// Durable across process restarts.  Only this module (and deserialization
/// of persisted payloads) constructs these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoredRef(String);

impl StoredRef {
    pub(crate) fn new(rel: impl Into<String>) -> Self {
        StoredRef(rel.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A photo reference in runtime form: an absolute path or URI.  This is what
/// the in-memory cache holds and what callers render from.  Any absolute URI
/// is representable, including picker output that has not been imported yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuntimeRef(String);

impl RuntimeRef {
    pub fn new(uri: impl Into<String>) -> Self {
        RuntimeRef(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RuntimeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Media library
// ---------------------------------------------------------------------------

/// Handle on the managed media directory.
#[derive(Debug, Clone)]
pub struct MediaLibrary {
    root: PathBuf,
}

impl MediaLibrary {
    /// Open the library at `root`, creating the directory if needed.
    pub fn open(root: &Path) -> Result<Self, MediaError> {
        std::fs::create_dir_all(root)?;
        Ok(MediaLibrary {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a stored reference to its runtime form by prefixing the
    /// managed root.  Total, never fails.
    pub fn resolve(&self, stored: &StoredRef) -> RuntimeRef {
        RuntimeRef(self.root.join(&stored.0).display().to_string())
    }

    /// Convert a runtime reference to its stored form by stripping the
    /// managed root.  A reference outside the root (a foreign URI that has
    /// not been imported) passes through unchanged.
    pub fn to_stored(&self, runtime: &RuntimeRef) -> StoredRef {
        match source_path(&runtime.0).strip_prefix(&self.root) {
            Ok(rel) => StoredRef(rel.display().to_string()),
            Err(_) => StoredRef(runtime.0.clone()),
        }
    }

    /// Whether the reference points inside the managed root.
    pub fn is_managed(&self, runtime: &RuntimeRef) -> bool {
        source_path(&runtime.0).starts_with(&self.root)
    }

    /// Copy the file behind `source` into the managed root and return the
    /// stored reference for the new file.  A source already under the root
    /// short-circuits to its existing stored path, no duplicate copy.
    ///
    /// The source may be a transient picker or camera path that will not
    /// survive process exit; after this call the bytes are durable.
    pub async fn save_to_library(&self, source: &RuntimeRef) -> Result<StoredRef, MediaError> {
        if self.is_managed(source) {
            return Ok(self.to_stored(source));
        }
        let src = source_path(&source.0);
        let name = new_media_name(src);
        let dest = self.root.join(&name);
        tokio::fs::copy(src, &dest)
            .await
            .map_err(|e| MediaError::Copy(source.0.clone(), e))?;
        Ok(StoredRef(name))
    }

    /// Import a source reference and return its runtime form: copy into the
    /// managed root, then resolve.
    pub async fn import(&self, source: &RuntimeRef) -> Result<RuntimeRef, MediaError> {
        let stored = self.save_to_library(source).await?;
        Ok(self.resolve(&stored))
    }

    /// Delete the file behind a stored reference.  Returns `true` if a file
    /// was removed.  An already-missing file is a no-op, not an error, so
    /// deletes can be retried.  Other failures are logged and swallowed:
    /// a record mutation must never be blocked by its photo cleanup.
    pub async fn remove(&self, stored: &StoredRef) -> bool {
        let path = self.root.join(&stored.0);
        if !path.starts_with(&self.root) {
            return false;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                rlog!("media: failed to remove {}: {e}", path.display());
                false
            }
        }
    }

    /// Delete the file behind a runtime reference, if it is managed.
    /// Foreign URIs are never owned by this library and are left alone.
    pub async fn remove_runtime(&self, runtime: &RuntimeRef) -> bool {
        if !self.is_managed(runtime) {
            return false;
        }
        self.remove(&self.to_stored(runtime)).await
    }

    /// Delete every file in the managed root that is not in `live`.
    /// Returns the number of files removed.
    pub async fn sweep<'a>(
        &self,
        live: impl IntoIterator<Item = &'a StoredRef>,
    ) -> Result<usize, MediaError> {
        let live: HashSet<&str> = live.into_iter().map(|r| r.0.as_str()).collect();
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !live.contains(name.as_str()) && self.remove(&StoredRef(name)).await {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Total size and count of the files under the managed root.
    pub async fn disk_usage(&self) -> Result<(u64, usize), MediaError> {
        let mut bytes = 0;
        let mut files = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_file() {
                bytes += meta.len();
                files += 1;
            }
        }
        Ok((bytes, files))
    }
}

/// Interpret a runtime URI as a filesystem path.  Picker and camera layers
/// commonly hand back `file://` URIs for plain local files.
fn source_path(uri: &str) -> &Path {
    Path::new(uri.strip_prefix("file://").unwrap_or(uri))
}

/// Pick a collision-free file name for an imported photo, preserving the
/// source extension: `<millis>-<random hex>.<ext>`.
fn new_media_name(src: &Path) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let mut token = [0u8; 4];
    OsRng.fill_bytes(&mut token);
    let ext = src
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string());
    format!("{millis}-{}.{ext}", hex::encode(token))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Per-invocation unique temp directory so parallel tests don't collide.
    fn test_dir(label: &str) -> PathBuf {
        let pid = std::process::id();
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("rigbook-{label}-{pid}-{ts}"))
    }

    fn test_library() -> MediaLibrary {
        MediaLibrary::open(&test_dir("media")).unwrap()
    }

    /// Write a fake photo outside the managed root and return its path.
    fn seed_photo(name: &str, bytes: &[u8]) -> RuntimeRef {
        let dir = test_dir("photo-src");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        RuntimeRef::new(path.display().to_string())
    }

    #[test]
    fn stored_runtime_round_trip() {
        let lib = test_library();
        let stored = StoredRef::new("1700000000000-ab12cd34.jpg");
        let runtime = lib.resolve(&stored);
        assert!(lib.is_managed(&runtime));
        assert_eq!(lib.to_stored(&runtime), stored);
        assert_eq!(lib.resolve(&lib.to_stored(&runtime)), runtime);
    }

    #[test]
    fn foreign_uri_passes_through() {
        let lib = test_library();
        let foreign = RuntimeRef::new("content://media/external/images/42");
        assert!(!lib.is_managed(&foreign));
        assert_eq!(lib.to_stored(&foreign).as_str(), foreign.as_str());
    }

    #[tokio::test]
    async fn save_copies_and_preserves_extension() {
        let lib = test_library();
        let src = seed_photo("snap.JPG", b"jpeg bytes");
        let stored = lib.save_to_library(&src).await.unwrap();
        assert!(stored.as_str().ends_with(".jpg"));
        let runtime = lib.resolve(&stored);
        assert_eq!(std::fs::read(runtime.as_str()).unwrap(), b"jpeg bytes");
        // Source is untouched.
        assert!(Path::new(src.as_str()).exists());
    }

    #[tokio::test]
    async fn save_on_managed_source_short_circuits() {
        let lib = test_library();
        let src = seed_photo("card.png", b"png");
        let stored = lib.save_to_library(&src).await.unwrap();
        let runtime = lib.resolve(&stored);
        let again = lib.save_to_library(&runtime).await.unwrap();
        assert_eq!(again, stored);
        assert_eq!(lib.disk_usage().await.unwrap().1, 1);
    }

    #[tokio::test]
    async fn save_missing_source_fails() {
        let lib = test_library();
        let gone = RuntimeRef::new("/nonexistent/rigbook/photo.jpg");
        let err = lib.save_to_library(&gone).await.unwrap_err();
        assert!(matches!(err, MediaError::Copy(_, _)));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let lib = test_library();
        let src = seed_photo("a.png", b"x");
        let stored = lib.save_to_library(&src).await.unwrap();
        assert!(lib.remove(&stored).await);
        assert!(!lib.remove(&stored).await);
    }

    #[tokio::test]
    async fn remove_runtime_ignores_foreign() {
        let lib = test_library();
        let foreign = RuntimeRef::new("content://media/external/images/42");
        assert!(!lib.remove_runtime(&foreign).await);
    }

    #[tokio::test]
    async fn sweep_keeps_live_files() {
        let lib = test_library();
        let live = lib
            .save_to_library(&seed_photo("keep.png", b"keep"))
            .await
            .unwrap();
        let orphan = lib
            .save_to_library(&seed_photo("orphan.png", b"drop"))
            .await
            .unwrap();
        let removed = lib.sweep([&live]).await.unwrap();
        assert_eq!(removed, 1);
        assert!(Path::new(lib.resolve(&live).as_str()).exists());
        assert!(!Path::new(lib.resolve(&orphan).as_str()).exists());
    }

    #[tokio::test]
    async fn file_uri_sources_are_importable() {
        let lib = test_library();
        let src = seed_photo("uri.png", b"via uri");
        let uri = RuntimeRef::new(format!("file://{}", src.as_str()));
        let stored = lib.save_to_library(&uri).await.unwrap();
        let runtime = lib.resolve(&stored);
        assert_eq!(std::fs::read(runtime.as_str()).unwrap(), b"via uri");
    }
}
