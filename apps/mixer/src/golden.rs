//! # Golden Output
//!
//! Responses are deterministic, so their serialized bytes can be pinned.
//! `fingerprint` hashes the canonical JSON of a response with BLAKE3; two
//! runs over the same stores and request must print the same hex digest.

use mixer_core::MixerError;
use serde::Serialize;

/// Canonical JSON bytes of `value`.
///
/// Field order follows struct declaration and `EntityMap` insertion order;
/// maps are `BTreeMap`s, so no ordering depends on hashing.
pub fn canonical_json(value: &impl Serialize) -> Result<Vec<u8>, MixerError> {
    serde_json::to_vec(value).map_err(|e| MixerError::MalformedPayload(e.to_string()))
}

/// BLAKE3 hex digest of the canonical JSON of `value`.
pub fn fingerprint(value: &impl Serialize) -> Result<String, MixerError> {
    let bytes = canonical_json(value)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixer_core::EntityMap;

    #[test]
    fn same_value_same_fingerprint() {
        let a: EntityMap<Vec<&str>> = [("geoId/06", vec!["x"]), ("geoId/05", vec![])]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let b = a.clone();
        assert_eq!(fingerprint(&a).expect("hash"), fingerprint(&b).expect("hash"));
        assert_eq!(fingerprint(&a).expect("hash").len(), 64);
    }

    #[test]
    fn entity_order_changes_fingerprint() {
        let a: EntityMap<u8> = [("a".to_string(), 1), ("b".to_string(), 2)].into_iter().collect();
        let b: EntityMap<u8> = [("b".to_string(), 2), ("a".to_string(), 1)].into_iter().collect();
        assert_ne!(fingerprint(&a).expect("hash"), fingerprint(&b).expect("hash"));
    }
}
