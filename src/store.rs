//! Entity store engine.
//!
//! One [`Store`] owns one collection (one [`SingletonStore`] owns one
//! singleton slot): the in-memory cache, the CRUD surface, and the commit
//! protocol that keeps cache and persisted bytes in agreement.  Operations on
//! a single collection are serialized by a fair async mutex held across the
//! whole read-mutate-persist sequence, so two rapid calls can never commit
//! from the same starting snapshot and lose an update.  Different collections
//! never share a key or a lock and proceed independently.
//!
//! Commit protocol, in order: serialize the candidate with media references
//! in stored form, check the quota, write to the key-value layer, and only
//! then swap the cache.  A failed commit leaves the previous cache and the
//! persisted bytes untouched and deletes any media files that were imported
//! for the failed candidate.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::kv::{KeyValue, KvError};
use crate::media::{MediaError, MediaLibrary, RuntimeRef, StoredRef};
use crate::migrate;
use crate::quota::{self, QuotaExceeded};
use crate::rlog;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StoreError {
    /// `update` or `delete` referenced an unknown record id.
    NotFound(String),
    /// A photo could not be copied into the managed root; the commit was
    /// aborted and the collection is unchanged.
    Media(MediaError),
    /// The candidate payload was over the collection's size ceiling; the
    /// commit was aborted and the collection is unchanged.
    Quota(QuotaExceeded),
    /// The key-value backend failed.
    Storage(KvError),
    /// The candidate collection could not be serialized.
    Encode(serde_json::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "record {id} not found"),
            StoreError::Media(e) => write!(f, "{e}"),
            StoreError::Quota(e) => write!(f, "{e}"),
            StoreError::Storage(e) => write!(f, "storage error: {e}"),
            StoreError::Encode(e) => write!(f, "encode error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<MediaError> for StoreError {
    fn from(e: MediaError) -> Self {
        StoreError::Media(e)
    }
}

impl From<QuotaExceeded> for StoreError {
    fn from(e: QuotaExceeded) -> Self {
        StoreError::Quota(e)
    }
}

impl From<KvError> for StoreError {
    fn from(e: KvError) -> Self {
        StoreError::Storage(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Encode(e)
    }
}

// ---------------------------------------------------------------------------
// Record traits
// ---------------------------------------------------------------------------

/// Mutable view of one photo field on a record.
pub enum MediaSlot<'a> {
    /// A field holding at most one photo (a card front, a profile picture).
    /// Overwriting it supersedes the old file.
    Single(&'a mut Option<RuntimeRef>),
    /// A field holding any number of photos.
    Gallery(&'a mut Vec<RuntimeRef>),
}

/// A record kind stored in a collection.
///
/// `Self` is the runtime form handed to callers; [`Entity::Stored`] is the
/// serializable twin with media references in stored form.  The runtime form
/// deliberately does not implement `Serialize`, so runtime URIs cannot reach
/// the key-value layer.
pub trait Entity: Clone + Send + Sync + 'static {
    type Stored: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Storage key for the collection.  No two kinds share a key.
    const KEY: &'static str;

    fn id(&self) -> &str;
    fn created_at(&self) -> u64;
    fn stamp(&mut self, id: String, created_at: u64);

    /// Every photo field on the record, in a stable order.
    fn media_slots(&mut self) -> Vec<MediaSlot<'_>>;

    fn to_stored(&self, media: &MediaLibrary) -> Self::Stored;
    fn from_stored(stored: Self::Stored, media: &MediaLibrary) -> Self;
}

/// A record kind with at most one instance and no id/list semantics.
pub trait Singleton: Clone + Send + Sync + 'static {
    type Stored: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    const KEY: &'static str;

    fn media_slots(&mut self) -> Vec<MediaSlot<'_>>;

    fn to_stored(&self, media: &MediaLibrary) -> Self::Stored;
    fn from_stored(stored: Self::Stored, media: &MediaLibrary) -> Self;
}

// ---------------------------------------------------------------------------
// Collection store
// ---------------------------------------------------------------------------

/// Store for one collection of records.
///
/// Cheap to clone; clones share the cache and the per-collection lock.
pub struct Store<E: Entity, K: KeyValue> {
    kv: Arc<K>,
    media: MediaLibrary,
    quota: Option<usize>,
    cache: Arc<Mutex<Vec<E>>>,
}

impl<E: Entity, K: KeyValue> Clone for Store<E, K> {
    fn clone(&self) -> Self {
        Store {
            kv: Arc::clone(&self.kv),
            media: self.media.clone(),
            quota: self.quota,
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<E: Entity, K: KeyValue> Store<E, K> {
    /// Open the store and load the persisted collection into the cache.
    pub async fn open(
        kv: Arc<K>,
        media: MediaLibrary,
        quota: Option<usize>,
    ) -> Result<Self, StoreError> {
        let store = Store {
            kv,
            media,
            quota,
            cache: Arc::new(Mutex::new(Vec::new())),
        };
        store.load().await?;
        Ok(store)
    }

    /// Reload the cache from the key-value layer.
    ///
    /// A missing key is an empty collection.  An undecodable payload is
    /// corruption: the key is cleared, an empty collection is substituted,
    /// and no error reaches the caller for that path.
    pub async fn load(&self) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        let records = match self.kv.get(E::KEY).await? {
            None => Vec::new(),
            Some(bytes) => match migrate::decode_collection::<E>(&bytes, &self.media) {
                Ok(records) => records,
                Err(e) => {
                    rlog!("{}: discarding corrupt payload: {e}", E::KEY);
                    if let Err(e) = self.kv.remove(E::KEY).await {
                        rlog!("{}: failed to clear corrupt key: {e}", E::KEY);
                    }
                    Vec::new()
                }
            },
        };
        *cache = records;
        Ok(())
    }

    /// Current records, in insertion order.  No I/O.
    pub async fn list(&self) -> Vec<E> {
        self.cache.lock().await.clone()
    }

    /// Add a record.  The store assigns `id` and `created_at`, imports every
    /// photo into the managed root, and returns the stored record with
    /// photos in runtime form.
    pub async fn add(&self, mut draft: E) -> Result<E, StoreError> {
        let mut cache = self.cache.lock().await;

        let mut id = new_record_id();
        while cache.iter().any(|r| r.id() == id) {
            id = new_record_id();
        }
        draft.stamp(id, now_millis());

        let fresh = import_slots(draft.media_slots(), &self.media).await?;

        let mut candidate = cache.clone();
        candidate.push(draft.clone());
        match self.commit(&mut cache, candidate).await {
            Ok(()) => Ok(draft),
            Err(e) => {
                discard_fresh(&fresh, &self.media).await;
                Err(e)
            }
        }
    }

    /// Update the record with the given id by applying `patch` to a copy.
    ///
    /// `id` and `created_at` are immutable; whatever the patch does to them
    /// is undone before the commit.  New photos are imported like in `add`.
    /// A single-slot photo that the patch replaced is deleted, but only
    /// after the new payload is durably written.
    pub async fn update(
        &self,
        id: &str,
        patch: impl FnOnce(&mut E),
    ) -> Result<E, StoreError> {
        let mut cache = self.cache.lock().await;
        let pos = cache
            .iter()
            .position(|r| r.id() == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut updated = cache[pos].clone();
        let before = single_values(updated.media_slots());
        let (rid, created_at) = (updated.id().to_string(), updated.created_at());
        patch(&mut updated);
        updated.stamp(rid, created_at);

        let fresh = import_slots(updated.media_slots(), &self.media).await?;
        let after = single_values(updated.media_slots());

        let mut candidate = cache.clone();
        candidate[pos] = updated.clone();
        match self.commit(&mut cache, candidate).await {
            Ok(()) => {
                for (old, new) in before.iter().zip(after.iter()) {
                    if let Some(old) = old {
                        if new.as_ref() != Some(old) {
                            self.media.remove_runtime(old).await;
                        }
                    }
                }
                Ok(updated)
            }
            Err(e) => {
                discard_fresh(&fresh, &self.media).await;
                Err(e)
            }
        }
    }

    /// Delete the record with the given id, together with every photo it
    /// owns.  Photo cleanup failures are logged and never block the delete.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        let pos = cache
            .iter()
            .position(|r| r.id() == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut doomed = cache[pos].clone();
        for photo in all_values(doomed.media_slots()) {
            self.media.remove_runtime(&photo).await;
        }

        let mut candidate = cache.clone();
        candidate.remove(pos);
        self.commit(&mut cache, candidate).await
    }

    /// Delete every record and every photo the collection owns.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        for record in cache.iter() {
            let mut record = record.clone();
            for photo in all_values(record.media_slots()) {
                self.media.remove_runtime(&photo).await;
            }
        }
        self.commit(&mut cache, Vec::new()).await
    }

    /// Serialize, quota-check, persist, and only then swap the cache.
    async fn commit(&self, cache: &mut Vec<E>, candidate: Vec<E>) -> Result<(), StoreError> {
        let bytes = migrate::encode_collection(&candidate, &self.media)?;
        quota::check(bytes.len(), self.quota)?;
        self.kv.set(E::KEY, &bytes).await?;
        *cache = candidate;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Singleton store
// ---------------------------------------------------------------------------

/// Store for a singleton record (truck profile, cards).
pub struct SingletonStore<S: Singleton, K: KeyValue> {
    kv: Arc<K>,
    media: MediaLibrary,
    quota: Option<usize>,
    cache: Arc<Mutex<Option<S>>>,
}

impl<S: Singleton, K: KeyValue> Clone for SingletonStore<S, K> {
    fn clone(&self) -> Self {
        SingletonStore {
            kv: Arc::clone(&self.kv),
            media: self.media.clone(),
            quota: self.quota,
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<S: Singleton, K: KeyValue> SingletonStore<S, K> {
    /// Open the store and load the persisted value into the cache.
    pub async fn open(
        kv: Arc<K>,
        media: MediaLibrary,
        quota: Option<usize>,
    ) -> Result<Self, StoreError> {
        let store = SingletonStore {
            kv,
            media,
            quota,
            cache: Arc::new(Mutex::new(None)),
        };
        store.load().await?;
        Ok(store)
    }

    /// Reload the cache; same missing-key and corruption semantics as
    /// [`Store::load`].
    pub async fn load(&self) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        let value = match self.kv.get(S::KEY).await? {
            None => None,
            Some(bytes) => match migrate::decode_singleton::<S>(&bytes, &self.media) {
                Ok(value) => Some(value),
                Err(e) => {
                    rlog!("{}: discarding corrupt payload: {e}", S::KEY);
                    if let Err(e) = self.kv.remove(S::KEY).await {
                        rlog!("{}: failed to clear corrupt key: {e}", S::KEY);
                    }
                    None
                }
            },
        };
        *cache = value;
        Ok(())
    }

    /// Current value, if one has ever been set.  No I/O.
    pub async fn get(&self) -> Option<S> {
        self.cache.lock().await.clone()
    }

    /// Replace the singleton.  Photos are imported like in [`Store::add`];
    /// a single-slot photo the new value no longer carries is deleted after
    /// the durable write.
    pub async fn set(&self, mut draft: S) -> Result<S, StoreError> {
        let mut cache = self.cache.lock().await;
        let before = match cache.clone() {
            Some(mut old) => single_values(old.media_slots()),
            None => Vec::new(),
        };

        let fresh = import_slots(draft.media_slots(), &self.media).await?;
        let after = single_values(draft.media_slots());

        let bytes = migrate::encode_singleton(&draft, &self.media)?;
        if let Err(e) = quota::check(bytes.len(), self.quota) {
            discard_fresh(&fresh, &self.media).await;
            return Err(e.into());
        }
        if let Err(e) = self.kv.set(S::KEY, &bytes).await {
            discard_fresh(&fresh, &self.media).await;
            return Err(e.into());
        }
        *cache = Some(draft.clone());

        for (old, new) in before.iter().zip(after.iter()) {
            if let Some(old) = old {
                if new.as_ref() != Some(old) {
                    self.media.remove_runtime(old).await;
                }
            }
        }
        Ok(draft)
    }

    /// Remove the singleton and every photo it owns.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        if let Some(old) = cache.clone() {
            let mut old = old;
            for photo in all_values(old.media_slots()) {
                self.media.remove_runtime(&photo).await;
            }
        }
        self.kv.remove(S::KEY).await?;
        *cache = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Generate a record id: millisecond timestamp plus a random hex suffix so
/// two records created in the same millisecond still get distinct ids.
fn new_record_id() -> String {
    let mut token = [0u8; 4];
    OsRng.fill_bytes(&mut token);
    format!("{}-{}", now_millis(), hex::encode(token))
}

/// Import every photo reference that is not yet under the managed root,
/// rewriting the slots to runtime references of the imported copies.
/// Returns the stored refs of the files this call created, so a failed
/// commit can take them back out.  On error, files imported so far are
/// removed before returning.
async fn import_slots(
    slots: Vec<MediaSlot<'_>>,
    media: &MediaLibrary,
) -> Result<Vec<StoredRef>, MediaError> {
    let mut refs: Vec<&mut RuntimeRef> = Vec::new();
    for slot in slots {
        match slot {
            MediaSlot::Single(opt) => {
                if let Some(r) = opt.as_mut() {
                    refs.push(r);
                }
            }
            MediaSlot::Gallery(list) => refs.extend(list.iter_mut()),
        }
    }

    let mut fresh = Vec::new();
    for r in refs {
        if media.is_managed(r) {
            continue;
        }
        match media.save_to_library(r).await {
            Ok(stored) => {
                *r = media.resolve(&stored);
                fresh.push(stored);
            }
            Err(e) => {
                discard_fresh(&fresh, media).await;
                return Err(e);
            }
        }
    }
    Ok(fresh)
}

/// Remove files imported for a candidate that never committed.
async fn discard_fresh(fresh: &[StoredRef], media: &MediaLibrary) {
    for stored in fresh {
        media.remove(stored).await;
    }
}

/// Snapshot of the single-photo slots, in slot order.
fn single_values(slots: Vec<MediaSlot<'_>>) -> Vec<Option<RuntimeRef>> {
    slots
        .into_iter()
        .filter_map(|slot| match slot {
            MediaSlot::Single(opt) => Some(opt.clone()),
            MediaSlot::Gallery(_) => None,
        })
        .collect()
}

/// Every photo reference on the record, singles and galleries alike.
fn all_values(slots: Vec<MediaSlot<'_>>) -> Vec<RuntimeRef> {
    let mut out = Vec::new();
    for slot in slots {
        match slot {
            MediaSlot::Single(opt) => out.extend(opt.iter().cloned()),
            MediaSlot::Gallery(list) => out.extend(list.iter().cloned()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_ids_are_unique_and_well_formed() {
        let a = new_record_id();
        let b = new_record_id();
        assert_ne!(a, b);

        let (millis, token) = a.split_once('-').unwrap();
        assert!(millis.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(token.len(), 8);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
