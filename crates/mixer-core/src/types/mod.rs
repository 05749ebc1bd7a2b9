//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the mixer:
//! - Query coordinates (`Direction`, `Origin`)
//! - Graph payloads (`Node`, `Triple`, `Observation`, `PropertyLabels`)
//! - Provenance wrapper (`SourceRecord`)
//! - Order-preserving response map (`EntityMap`)
//! - Error taxonomy (`MixerError`)
//!
//! ## Determinism Guarantees
//!
//! Every type that can end up in a response either implements `Ord` or is
//! only ever emitted in an order fixed by the merge engine. Nothing in here
//! depends on hash iteration order.

use crate::primitives::{LITERAL_TYPE, UNTYPED_ENTITY_TYPE};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

// =============================================================================
// DIRECTION
// =============================================================================

/// Direction of a predicate relative to the queried entity.
///
/// `Out` means the entity is the subject, `In` means it is the object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Out,
    In,
}

impl Direction {
    /// Parse a request direction. Empty input defaults to `Out`.
    pub fn parse(raw: &str) -> Result<Self, MixerError> {
        match raw.trim() {
            "" | "out" => Ok(Self::Out),
            "in" => Ok(Self::In),
            other => Err(MixerError::InvalidRequest(format!(
                "unknown direction '{}', expected 'in' or 'out'",
                other
            ))),
        }
    }

    /// Wire name used in row keys and responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Out => "out",
            Self::In => "in",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ORIGIN
// =============================================================================

/// The backing source a record was retrieved from.
///
/// Declaration order is precedence order: `Override` beats `Branch` beats
/// `Base` beats `QueryEngine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Origin {
    Override,
    Branch,
    Base,
    QueryEngine,
}

impl Origin {
    /// All origins, highest precedence first.
    pub const BY_PRECEDENCE: [Origin; 4] = [
        Origin::Override,
        Origin::Branch,
        Origin::Base,
        Origin::QueryEngine,
    ];

    /// Precedence rank. Higher wins a conflict.
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            Self::Override => 3,
            Self::Branch => 2,
            Self::Base => 1,
            Self::QueryEngine => 0,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Override => "override",
            Self::Branch => "branch",
            Self::Base => "base",
            Self::QueryEngine => "queryEngine",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// NODE (NEIGHBOR DESCRIPTOR)
// =============================================================================

/// A neighbor of an entity: either another entity (`dcid`) or a literal
/// (`value`), with display name and types when they could be resolved.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(default)]
    pub dcid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub provenance_id: Option<String>,
}

impl Node {
    /// Create an entity neighbor.
    #[must_use]
    pub fn entity(dcid: impl Into<String>, name: Option<String>, types: Vec<String>) -> Self {
        Self {
            dcid: Some(dcid.into()),
            name,
            types,
            value: None,
            provenance_id: None,
        }
    }

    /// Create a literal neighbor.
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    /// Attach a provenance id.
    #[must_use]
    pub fn with_provenance(mut self, provenance: Option<String>) -> Self {
        self.provenance_id = provenance;
        self
    }

    /// Natural identity: the neighbor dcid, or the literal value.
    #[must_use]
    pub fn identity(&self) -> &str {
        self.dcid
            .as_deref()
            .or(self.value.as_deref())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.dcid.is_none()
    }

    #[must_use]
    pub fn has_type(&self, type_name: &str) -> bool {
        self.types.iter().any(|t| t == type_name)
    }

    /// Key under which this node is grouped in neighbor responses.
    #[must_use]
    pub fn type_key(&self) -> &str {
        match self.types.first() {
            Some(first) => first,
            None if self.is_literal() => LITERAL_TYPE,
            None => UNTYPED_ENTITY_TYPE,
        }
    }
}

// =============================================================================
// TRIPLE
// =============================================================================

/// A `(subject, predicate, object)` statement with resolved display data.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "camelCase")]
pub struct Triple {
    pub subject_id: String,
    #[serde(default)]
    pub subject_name: Option<String>,
    #[serde(default)]
    pub subject_types: Vec<String>,
    pub predicate: String,
    #[serde(default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub object_name: Option<String>,
    #[serde(default)]
    pub object_types: Vec<String>,
    #[serde(default)]
    pub object_value: Option<String>,
    #[serde(default)]
    pub provenance_id: Option<String>,
}

impl Triple {
    /// The object as a single string: dcid for entity objects, value for literals.
    #[must_use]
    pub fn object_key(&self) -> &str {
        self.object_id
            .as_deref()
            .or(self.object_value.as_deref())
            .unwrap_or_default()
    }

    /// Direction of this triple as seen from `entity`.
    #[must_use]
    pub fn direction_from(&self, entity: &str) -> Direction {
        if self.subject_id == entity {
            Direction::Out
        } else {
            Direction::In
        }
    }

    /// The other end of the triple as seen from `entity`.
    #[must_use]
    pub fn neighbor_of(&self, entity: &str) -> Node {
        let node = match self.direction_from(entity) {
            Direction::Out => match &self.object_id {
                Some(id) => Node::entity(
                    id.clone(),
                    self.object_name.clone(),
                    self.object_types.clone(),
                ),
                None => Node::literal(self.object_value.clone().unwrap_or_default()),
            },
            Direction::In => Node::entity(
                self.subject_id.clone(),
                self.subject_name.clone(),
                self.subject_types.clone(),
            ),
        };
        node.with_provenance(self.provenance_id.clone())
    }
}

// =============================================================================
// OBSERVATION
// =============================================================================

/// A single precomputed statistical value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub stat_var: String,
    pub place: String,
    pub date: String,
    pub value: f64,
    #[serde(default)]
    pub measurement_method: Option<String>,
    #[serde(default)]
    pub observation_period: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub import_name: Option<String>,
}

impl Observation {
    #[must_use]
    pub fn method(&self) -> &str {
        self.measurement_method.as_deref().unwrap_or_default()
    }
}

// =============================================================================
// PROPERTY LABELS
// =============================================================================

/// Predicates known for an entity, split by direction. Both lists are sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PropertyLabels {
    pub in_labels: Vec<String>,
    pub out_labels: Vec<String>,
}

impl PropertyLabels {
    #[must_use]
    pub fn labels(&self, direction: Direction) -> &[String] {
        match direction {
            Direction::Out => &self.out_labels,
            Direction::In => &self.in_labels,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.in_labels.is_empty() && self.out_labels.is_empty()
    }
}

// =============================================================================
// SOURCE RECORD
// =============================================================================

/// A payload item tagged with where it came from and how fresh it is.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord<T> {
    pub origin: Origin,
    pub revision: u64,
    pub item: T,
}

impl<T> SourceRecord<T> {
    #[must_use]
    pub fn new(origin: Origin, revision: u64, item: T) -> Self {
        Self {
            origin,
            revision,
            item,
        }
    }
}

// =============================================================================
// ENTITY MAP
// =============================================================================

/// Response mapping from entity id to its result, in request order.
///
/// Serializes as a JSON object whose key order is the insertion order.
/// Inserting a key that is already present keeps the first value.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMap<T> {
    entries: Vec<(String, T)>,
    /// key -> position in `entries`
    positions: BTreeMap<String, usize>,
}

impl<T> Default for EntityMap<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            positions: BTreeMap::new(),
        }
    }
}

impl<T> EntityMap<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry; returns `false` if the key was already present.
    pub fn insert(&mut self, key: impl Into<String>, value: T) -> bool {
        let key = key.into();
        if self.contains_key(&key) {
            return false;
        }
        self.positions.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        true
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&T> {
        self.positions
            .get(key)
            .and_then(|&at| self.entries.get(at))
            .map(|(_, v)| v)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> FromIterator<(String, T)> for EntityMap<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<T: Serialize> Serialize for EntityMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct EntityMapVisitor<T>(PhantomData<T>);

impl<'de, T: Deserialize<'de>> Visitor<'de> for EntityMapVisitor<T> {
    type Value = EntityMap<T>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map keyed by entity id")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = EntityMap::new();
        while let Some((k, v)) = access.next_entry::<String, T>()? {
            map.insert(k, v);
        }
        Ok(map)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for EntityMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(EntityMapVisitor(PhantomData))
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the mixer.
///
/// Origin-scoped errors (`StoreUnavailable`, `QueryEngineTimeout`) degrade a
/// request to a partial result; `MalformedPayload` degrades a single key to a
/// miss. Only `InvalidRequest`, strict override failures and
/// `AllOriginsFailed` are meant to reach a client as request failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MixerError {
    /// A backing store could not be reached or failed mid-read.
    #[error("store {origin} unavailable: {reason}")]
    StoreUnavailable { origin: Origin, reason: String },

    /// The authoritative query engine did not answer before the deadline.
    #[error("query engine timed out after {elapsed_ms} ms")]
    QueryEngineTimeout { elapsed_ms: u64 },

    /// A row key or payload could not be decoded.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The caller sent a request that cannot be served.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The warm cache could not be built at startup.
    #[error("warm cache build failed: {0}")]
    WarmCacheBuildFailure(String),

    /// The override export could not be read or parsed.
    #[error("override load failed: {0}")]
    OverrideLoad(String),

    /// Every origin failed for every entity of the request.
    #[error("all origins failed: {0}")]
    AllOriginsFailed(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl MixerError {
    /// Build a `StoreUnavailable` from any displayable cause.
    pub fn unavailable(origin: Origin, reason: impl fmt::Display) -> Self {
        Self::StoreUnavailable {
            origin,
            reason: reason.to_string(),
        }
    }

    /// Whether this error only affects one origin (and so degrades gracefully).
    #[must_use]
    pub fn is_origin_scoped(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::QueryEngineTimeout { .. }
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_parse_defaults_to_out() {
        assert_eq!(Direction::parse("").expect("empty"), Direction::Out);
        assert_eq!(Direction::parse("out").expect("out"), Direction::Out);
        assert_eq!(Direction::parse("in").expect("in"), Direction::In);
    }

    #[test]
    fn direction_parse_rejects_unknown() {
        let result = Direction::parse("sideways");
        assert!(matches!(result, Err(MixerError::InvalidRequest(_))));
    }

    #[test]
    fn origin_precedence_is_total() {
        let ranks: Vec<u8> = Origin::BY_PRECEDENCE
            .iter()
            .map(|o| o.precedence())
            .collect();
        assert_eq!(ranks, vec![3, 2, 1, 0]);
        assert!(Origin::Override < Origin::Branch);
        assert!(Origin::Base < Origin::QueryEngine);
    }

    #[test]
    fn node_type_key() {
        let city = Node::entity("geoId/0647766", None, vec!["City".into()]);
        assert_eq!(city.type_key(), "City");
        assert_eq!(Node::literal("Arkansas").type_key(), LITERAL_TYPE);
        assert_eq!(Node::entity("x", None, vec![]).type_key(), UNTYPED_ENTITY_TYPE);
    }

    #[test]
    fn triple_neighbor_of_both_ends() {
        let triple = Triple {
            subject_id: "geoId/06085".into(),
            predicate: "containedInPlace".into(),
            object_id: Some("geoId/06".into()),
            object_name: Some("California".into()),
            object_types: vec!["State".into()],
            ..Triple::default()
        };
        assert_eq!(triple.direction_from("geoId/06085"), Direction::Out);
        assert_eq!(triple.direction_from("geoId/06"), Direction::In);
        assert_eq!(triple.neighbor_of("geoId/06085").identity(), "geoId/06");
        assert_eq!(triple.neighbor_of("geoId/06").identity(), "geoId/06085");
    }

    #[test]
    fn entity_map_keeps_first_insert_and_order() {
        let mut map = EntityMap::new();
        assert!(map.insert("b", 1));
        assert!(map.insert("a", 2));
        assert!(!map.insert("b", 3));
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(map.get("b"), Some(&1));
    }

    #[test]
    fn entity_map_lookups_follow_positions() {
        let ids: Vec<String> = (0..500).rev().map(|i| format!("geoId/{:05}", i)).collect();
        let map: EntityMap<usize> = ids.iter().cloned().zip(0..).collect();

        assert_eq!(map.len(), 500);
        assert_eq!(map.keys().next(), Some("geoId/00499"));
        assert_eq!(map.get("geoId/00499"), Some(&0));
        assert_eq!(map.get("geoId/00000"), Some(&499));
        assert!(map.contains_key("geoId/00250"));
        assert!(!map.contains_key("geoId/00500"));
        assert_eq!(map.get("geoId/00500"), None);
    }

    #[test]
    fn entity_map_serializes_in_insertion_order() {
        let map: EntityMap<u32> = vec![("z".to_string(), 1), ("a".to_string(), 2)]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&map).expect("serialize");
        assert_eq!(json, r#"{"z":1,"a":2}"#);
        let back: EntityMap<u32> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, map);
    }
}
