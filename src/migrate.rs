//! Decoding persisted payloads into live records.
//!
//! This is the forward-compatibility seam: fields added since a payload was
//! written are filled with their serde defaults, unknown extra fields are
//! ignored, and every media reference is re-resolved from stored to runtime
//! form.  A payload missing a required field (an absent `id`, a non-array
//! where an array is expected) fails the decode as a whole; the store treats
//! that as corruption and self-heals with an empty collection.

use crate::media::MediaLibrary;
use crate::store::{Entity, Singleton};

/// Decode a collection payload into runtime records.
pub fn decode_collection<E: Entity>(
    bytes: &[u8],
    media: &MediaLibrary,
) -> Result<Vec<E>, serde_json::Error> {
    let stored: Vec<E::Stored> = serde_json::from_slice(bytes)?;
    Ok(stored
        .into_iter()
        .map(|s| E::from_stored(s, media))
        .collect())
}

/// Serialize runtime records into the persisted collection payload.
/// Every media reference is converted to stored form on the way out.
pub fn encode_collection<E: Entity>(
    records: &[E],
    media: &MediaLibrary,
) -> Result<Vec<u8>, serde_json::Error> {
    let stored: Vec<E::Stored> = records.iter().map(|r| r.to_stored(media)).collect();
    serde_json::to_vec(&stored)
}

/// Decode a singleton payload.
pub fn decode_singleton<S: Singleton>(
    bytes: &[u8],
    media: &MediaLibrary,
) -> Result<S, serde_json::Error> {
    let stored: S::Stored = serde_json::from_slice(bytes)?;
    Ok(S::from_stored(stored, media))
}

/// Serialize a singleton into its persisted payload.
pub fn encode_singleton<S: Singleton>(
    value: &S,
    media: &MediaLibrary,
) -> Result<Vec<u8>, serde_json::Error> {
    let stored: S::Stored = value.to_stored(media);
    serde_json::to_vec(&stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Place;

    fn test_media() -> MediaLibrary {
        let pid = std::process::id();
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        MediaLibrary::open(&std::env::temp_dir().join(format!("rigbook-migrate-{pid}-{ts}")))
            .unwrap()
    }

    #[test]
    fn absent_optional_fields_get_defaults() {
        let media = test_media();
        // Payload written before `favorite` and `photos` existed.
        let payload = br#"[{"id":"1-aa","created_at":7,"name":"Acme Scales"}]"#;
        let places: Vec<Place> = decode_collection(payload, &media).unwrap();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].name, "Acme Scales");
        assert!(!places[0].favorite);
        assert!(places[0].photos.is_empty());
        assert!(places[0].address.is_none());
    }

    #[test]
    fn unknown_extra_fields_are_ignored() {
        let media = test_media();
        let payload = br#"[{"id":"1-aa","created_at":7,"name":"Acme","legacy_rating":5}]"#;
        let places: Vec<Place> = decode_collection(payload, &media).unwrap();
        assert_eq!(places[0].name, "Acme");
    }

    #[test]
    fn missing_required_field_fails_the_load() {
        let media = test_media();
        // No `id`: the whole collection is disqualified.
        let payload = br#"[{"created_at":7,"name":"Acme"}]"#;
        assert!(decode_collection::<Place>(payload, &media).is_err());
    }

    #[test]
    fn media_refs_come_back_in_runtime_form() {
        let media = test_media();
        let payload = br#"[{"id":"1-aa","created_at":7,"name":"Acme","photos":["99-beef.jpg"]}]"#;
        let places: Vec<Place> = decode_collection(payload, &media).unwrap();
        let photo = &places[0].photos[0];
        assert!(media.is_managed(photo));
        assert!(photo.as_str().ends_with("99-beef.jpg"));

        // And convert back to stored form on encode.
        let bytes = encode_collection(&places, &media).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains(r#""photos":["99-beef.jpg"]"#));
    }
}
