//! Record kinds.
//!
//! Each kind comes in two shapes: the runtime form handed to callers, with
//! photos as absolute [`RuntimeRef`]s, and a `Stored*` twin that is what
//! actually gets serialized, with photos as relative [`StoredRef`]s.  Only
//! the stored forms implement `Serialize`, so a runtime URI can never leak
//! into a persisted payload.  Absent optional fields in old payloads fall
//! back to their serde defaults on load.

use serde::{Deserialize, Serialize};

use crate::media::{MediaLibrary, RuntimeRef, StoredRef};
use crate::store::{Entity, MediaSlot, Singleton};

fn resolve_all(refs: Vec<StoredRef>, media: &MediaLibrary) -> Vec<RuntimeRef> {
    refs.iter().map(|r| media.resolve(r)).collect()
}

fn store_all(refs: &[RuntimeRef], media: &MediaLibrary) -> Vec<StoredRef> {
    refs.iter().map(|r| media.to_stored(r)).collect()
}

// ---------------------------------------------------------------------------
// Places
// ---------------------------------------------------------------------------

/// A saved location: a customer yard, a truck stop, a scale.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Place {
    pub id: String,
    pub created_at: u64,
    pub name: String,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub favorite: bool,
    pub photos: Vec<RuntimeRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPlace {
    pub id: String,
    pub created_at: u64,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub photos: Vec<StoredRef>,
}

impl Entity for Place {
    type Stored = StoredPlace;
    const KEY: &'static str = "places";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> u64 {
        self.created_at
    }

    fn stamp(&mut self, id: String, created_at: u64) {
        self.id = id;
        self.created_at = created_at;
    }

    fn media_slots(&mut self) -> Vec<MediaSlot<'_>> {
        vec![MediaSlot::Gallery(&mut self.photos)]
    }

    fn to_stored(&self, media: &MediaLibrary) -> StoredPlace {
        StoredPlace {
            id: self.id.clone(),
            created_at: self.created_at,
            name: self.name.clone(),
            address: self.address.clone(),
            notes: self.notes.clone(),
            favorite: self.favorite,
            photos: store_all(&self.photos, media),
        }
    }

    fn from_stored(stored: StoredPlace, media: &MediaLibrary) -> Self {
        Place {
            id: stored.id,
            created_at: stored.created_at,
            name: stored.name,
            address: stored.address,
            notes: stored.notes,
            favorite: stored.favorite,
            photos: resolve_all(stored.photos, media),
        }
    }
}

// ---------------------------------------------------------------------------
// Trailers
// ---------------------------------------------------------------------------

/// A trailer the driver hauls or has hauled.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trailer {
    pub id: String,
    pub created_at: u64,
    /// Trailer number or nickname as painted on the unit.
    pub label: String,
    pub notes: Option<String>,
    pub photos: Vec<RuntimeRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTrailer {
    pub id: String,
    pub created_at: u64,
    pub label: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub photos: Vec<StoredRef>,
}

impl Entity for Trailer {
    type Stored = StoredTrailer;
    const KEY: &'static str = "trailers";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> u64 {
        self.created_at
    }

    fn stamp(&mut self, id: String, created_at: u64) {
        self.id = id;
        self.created_at = created_at;
    }

    fn media_slots(&mut self) -> Vec<MediaSlot<'_>> {
        vec![MediaSlot::Gallery(&mut self.photos)]
    }

    fn to_stored(&self, media: &MediaLibrary) -> StoredTrailer {
        StoredTrailer {
            id: self.id.clone(),
            created_at: self.created_at,
            label: self.label.clone(),
            notes: self.notes.clone(),
            photos: store_all(&self.photos, media),
        }
    }

    fn from_stored(stored: StoredTrailer, media: &MediaLibrary) -> Self {
        Trailer {
            id: stored.id,
            created_at: stored.created_at,
            label: stored.label,
            notes: stored.notes,
            photos: resolve_all(stored.photos, media),
        }
    }
}

// ---------------------------------------------------------------------------
// File documents
// ---------------------------------------------------------------------------

/// A scanned document: each page is one photo.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileDocument {
    pub id: String,
    pub created_at: u64,
    pub title: String,
    pub pages: Vec<RuntimeRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFileDocument {
    pub id: String,
    pub created_at: u64,
    pub title: String,
    #[serde(default)]
    pub pages: Vec<StoredRef>,
}

impl Entity for FileDocument {
    type Stored = StoredFileDocument;
    const KEY: &'static str = "files";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> u64 {
        self.created_at
    }

    fn stamp(&mut self, id: String, created_at: u64) {
        self.id = id;
        self.created_at = created_at;
    }

    fn media_slots(&mut self) -> Vec<MediaSlot<'_>> {
        vec![MediaSlot::Gallery(&mut self.pages)]
    }

    fn to_stored(&self, media: &MediaLibrary) -> StoredFileDocument {
        StoredFileDocument {
            id: self.id.clone(),
            created_at: self.created_at,
            title: self.title.clone(),
            pages: store_all(&self.pages, media),
        }
    }

    fn from_stored(stored: StoredFileDocument, media: &MediaLibrary) -> Self {
        FileDocument {
            id: stored.id,
            created_at: stored.created_at,
            title: stored.title,
            pages: resolve_all(stored.pages, media),
        }
    }
}

// ---------------------------------------------------------------------------
// Emergency contacts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmergencyContact {
    pub id: String,
    pub created_at: u64,
    pub name: String,
    pub phone: String,
    /// Relationship to the driver ("spouse", "dispatcher").
    pub relation: Option<String>,
    pub photo: Option<RuntimeRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEmergencyContact {
    pub id: String,
    pub created_at: u64,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub relation: Option<String>,
    #[serde(default)]
    pub photo: Option<StoredRef>,
}

impl Entity for EmergencyContact {
    type Stored = StoredEmergencyContact;
    const KEY: &'static str = "contacts";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> u64 {
        self.created_at
    }

    fn stamp(&mut self, id: String, created_at: u64) {
        self.id = id;
        self.created_at = created_at;
    }

    fn media_slots(&mut self) -> Vec<MediaSlot<'_>> {
        vec![MediaSlot::Single(&mut self.photo)]
    }

    fn to_stored(&self, media: &MediaLibrary) -> StoredEmergencyContact {
        StoredEmergencyContact {
            id: self.id.clone(),
            created_at: self.created_at,
            name: self.name.clone(),
            phone: self.phone.clone(),
            relation: self.relation.clone(),
            photo: self.photo.as_ref().map(|p| media.to_stored(p)),
        }
    }

    fn from_stored(stored: StoredEmergencyContact, media: &MediaLibrary) -> Self {
        EmergencyContact {
            id: stored.id,
            created_at: stored.created_at,
            name: stored.name,
            phone: stored.phone,
            relation: stored.relation,
            photo: stored.photo.as_ref().map(|p| media.resolve(p)),
        }
    }
}

// ---------------------------------------------------------------------------
// Truck profile (singleton)
// ---------------------------------------------------------------------------

/// The driver's truck.  At most one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TruckProfile {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<u16>,
    pub plate: Option<String>,
    pub vin: Option<String>,
    pub notes: Option<String>,
    pub photo: Option<RuntimeRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredTruckProfile {
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub year: Option<u16>,
    #[serde(default)]
    pub plate: Option<String>,
    #[serde(default)]
    pub vin: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub photo: Option<StoredRef>,
}

impl Singleton for TruckProfile {
    type Stored = StoredTruckProfile;
    const KEY: &'static str = "truck_profile";

    fn media_slots(&mut self) -> Vec<MediaSlot<'_>> {
        vec![MediaSlot::Single(&mut self.photo)]
    }

    fn to_stored(&self, media: &MediaLibrary) -> StoredTruckProfile {
        StoredTruckProfile {
            make: self.make.clone(),
            model: self.model.clone(),
            year: self.year,
            plate: self.plate.clone(),
            vin: self.vin.clone(),
            notes: self.notes.clone(),
            photo: self.photo.as_ref().map(|p| media.to_stored(p)),
        }
    }

    fn from_stored(stored: StoredTruckProfile, media: &MediaLibrary) -> Self {
        TruckProfile {
            make: stored.make,
            model: stored.model,
            year: stored.year,
            plate: stored.plate,
            vin: stored.vin,
            notes: stored.notes,
            photo: stored.photo.as_ref().map(|p| media.resolve(p)),
        }
    }
}

// ---------------------------------------------------------------------------
// Driver ID card (singleton)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DriverId {
    pub number: Option<String>,
    pub front: Option<RuntimeRef>,
    pub back: Option<RuntimeRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredDriverId {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub front: Option<StoredRef>,
    #[serde(default)]
    pub back: Option<StoredRef>,
}

impl Singleton for DriverId {
    type Stored = StoredDriverId;
    const KEY: &'static str = "driver_id";

    fn media_slots(&mut self) -> Vec<MediaSlot<'_>> {
        vec![
            MediaSlot::Single(&mut self.front),
            MediaSlot::Single(&mut self.back),
        ]
    }

    fn to_stored(&self, media: &MediaLibrary) -> StoredDriverId {
        StoredDriverId {
            number: self.number.clone(),
            front: self.front.as_ref().map(|p| media.to_stored(p)),
            back: self.back.as_ref().map(|p| media.to_stored(p)),
        }
    }

    fn from_stored(stored: StoredDriverId, media: &MediaLibrary) -> Self {
        DriverId {
            number: stored.number,
            front: stored.front.as_ref().map(|p| media.resolve(p)),
            back: stored.back.as_ref().map(|p| media.resolve(p)),
        }
    }
}

// ---------------------------------------------------------------------------
// Health insurance card (singleton)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HealthInsurance {
    pub provider: Option<String>,
    pub member_id: Option<String>,
    pub front: Option<RuntimeRef>,
    pub back: Option<RuntimeRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredHealthInsurance {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub member_id: Option<String>,
    #[serde(default)]
    pub front: Option<StoredRef>,
    #[serde(default)]
    pub back: Option<StoredRef>,
}

impl Singleton for HealthInsurance {
    type Stored = StoredHealthInsurance;
    const KEY: &'static str = "health_insurance";

    fn media_slots(&mut self) -> Vec<MediaSlot<'_>> {
        vec![
            MediaSlot::Single(&mut self.front),
            MediaSlot::Single(&mut self.back),
        ]
    }

    fn to_stored(&self, media: &MediaLibrary) -> StoredHealthInsurance {
        StoredHealthInsurance {
            provider: self.provider.clone(),
            member_id: self.member_id.clone(),
            front: self.front.as_ref().map(|p| media.to_stored(p)),
            back: self.back.as_ref().map(|p| media.to_stored(p)),
        }
    }

    fn from_stored(stored: StoredHealthInsurance, media: &MediaLibrary) -> Self {
        HealthInsurance {
            provider: stored.provider,
            member_id: stored.member_id,
            front: stored.front.as_ref().map(|p| media.resolve(p)),
            back: stored.back.as_ref().map(|p| media.resolve(p)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_media() -> MediaLibrary {
        let pid = std::process::id();
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        MediaLibrary::open(&std::env::temp_dir().join(format!("rigbook-records-{pid}-{ts}")))
            .unwrap()
    }

    #[test]
    fn place_stored_round_trip() {
        let media = test_media();
        let place = Place {
            id: "1-aa".into(),
            created_at: 42,
            name: "Acme Scales".into(),
            address: Some("I-80 exit 12".into()),
            notes: None,
            favorite: true,
            photos: vec![media.resolve(&StoredRef::new("7-beef.jpg"))],
        };
        let back = Place::from_stored(place.to_stored(&media), &media);
        assert_eq!(back, place);
    }

    #[test]
    fn driver_id_keeps_both_faces() {
        let media = test_media();
        let stored = StoredDriverId {
            number: Some("D-1234".into()),
            front: Some(StoredRef::new("1-aa.jpg")),
            back: None,
        };
        let card = DriverId::from_stored(stored, &media);
        assert!(card.back.is_none());
        assert!(media.is_managed(card.front.as_ref().unwrap()));
    }
}
