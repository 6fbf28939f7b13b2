//! App wiring: every store, explicitly constructed over one shared backend.
//!
//! There is no ambient registry; embedders build an [`AppStores`] once at
//! startup and pass it (or individual stores, which are cheap clones) to
//! whatever needs them.  Stores live for the life of the process, no
//! teardown.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::kv::{KeyValue, SqliteKv};
use crate::media::MediaLibrary;
use crate::quota::DEFAULT_COLLECTION_QUOTA;
use crate::records::{
    DriverId, EmergencyContact, FileDocument, HealthInsurance, Place, Trailer, TruckProfile,
};
use crate::store::{SingletonStore, Store, StoreError};

/// All record stores over one database and one media directory.
pub struct AppStores {
    pub places: Store<Place, SqliteKv>,
    pub trailers: Store<Trailer, SqliteKv>,
    pub files: Store<FileDocument, SqliteKv>,
    pub contacts: Store<EmergencyContact, SqliteKv>,
    pub truck: SingletonStore<TruckProfile, SqliteKv>,
    pub driver_id: SingletonStore<DriverId, SqliteKv>,
    pub insurance: SingletonStore<HealthInsurance, SqliteKv>,
    kv: Arc<SqliteKv>,
    media: MediaLibrary,
}

/// Snapshot of on-device storage consumption, for a settings screen.
#[derive(Debug, Clone)]
pub struct StorageUsage {
    /// Serialized payload size per storage key, sorted by key.
    pub payloads: Vec<(String, usize)>,
    /// Bytes and file count under the managed media root.
    pub media_bytes: u64,
    pub media_files: usize,
}

impl StorageUsage {
    pub fn payload_bytes(&self) -> usize {
        self.payloads.iter().map(|(_, n)| n).sum()
    }
}

impl AppStores {
    /// Open every store under `root`: the database at `root/records.db`,
    /// photos under `root/media`.  Each collection cache is loaded before
    /// this returns.
    pub async fn open(root: &Path) -> Result<Self, StoreError> {
        let kv = Arc::new(SqliteKv::open(&root.join("records.db"))?);
        let media = MediaLibrary::open(&root.join("media"))?;
        let quota = Some(DEFAULT_COLLECTION_QUOTA);

        Ok(AppStores {
            places: Store::open(Arc::clone(&kv), media.clone(), quota).await?,
            trailers: Store::open(Arc::clone(&kv), media.clone(), quota).await?,
            files: Store::open(Arc::clone(&kv), media.clone(), quota).await?,
            contacts: Store::open(Arc::clone(&kv), media.clone(), quota).await?,
            truck: SingletonStore::open(Arc::clone(&kv), media.clone(), None).await?,
            driver_id: SingletonStore::open(Arc::clone(&kv), media.clone(), None).await?,
            insurance: SingletonStore::open(Arc::clone(&kv), media.clone(), None).await?,
            kv,
            media,
        })
    }

    /// Open under the platform data directory:
    /// - Linux: `~/.local/share/rigbook`
    /// - macOS: `~/Library/Application Support/rigbook`
    /// - Windows: `%APPDATA%\rigbook`
    pub async fn open_default() -> Result<Self, StoreError> {
        let base = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::open(&base.join("rigbook")).await
    }

    /// Measure what the app currently keeps on disk.
    pub async fn usage(&self) -> Result<StorageUsage, StoreError> {
        let mut payloads = Vec::new();
        for key in self.kv.keys().await? {
            let len = self.kv.get(&key).await?.map(|b| b.len()).unwrap_or(0);
            payloads.push((key, len));
        }
        let (media_bytes, media_files) = self.media.disk_usage().await?;
        Ok(StorageUsage {
            payloads,
            media_bytes,
            media_files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::RuntimeRef;

    fn test_root(label: &str) -> PathBuf {
        let pid = std::process::id();
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("rigbook-app-{label}-{pid}-{ts}"))
    }

    #[tokio::test]
    async fn open_add_reopen() {
        let root = test_root("reopen");
        {
            let stores = AppStores::open(&root).await.unwrap();
            stores
                .places
                .add(Place {
                    name: "Flying J, Walcott".into(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        // A fresh handle over the same root sees the persisted record.
        let stores = AppStores::open(&root).await.unwrap();
        let places = stores.places.list().await;
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].name, "Flying J, Walcott");
    }

    #[tokio::test]
    async fn usage_counts_payloads_and_media() {
        let root = test_root("usage");
        let stores = AppStores::open(&root).await.unwrap();

        let src_dir = test_root("usage-src");
        std::fs::create_dir_all(&src_dir).unwrap();
        let photo = src_dir.join("dock.jpg");
        std::fs::write(&photo, vec![7u8; 128]).unwrap();

        stores
            .places
            .add(Place {
                name: "Shipper dock".into(),
                photos: vec![RuntimeRef::new(photo.display().to_string())],
                ..Default::default()
            })
            .await
            .unwrap();

        let usage = stores.usage().await.unwrap();
        assert!(usage.payloads.iter().any(|(k, n)| k == "places" && *n > 2));
        assert!(usage.payload_bytes() > 0);
        assert_eq!(usage.media_files, 1);
        assert_eq!(usage.media_bytes, 128);
    }
}
