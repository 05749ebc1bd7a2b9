//! # Row-Key Codec
//!
//! Translates logical queries into cache row keys and cell bytes into typed
//! payloads.
//!
//! Key format: `<kind prefix><entity>^<predicate>^<direction>^<typeFilter>`.
//! Inside a component, `\` and `^` are escaped with `\`, so every tuple has
//! exactly one key and every well-formed key exactly one tuple.
//!
//! Payload format: 4-byte header + postcard body.
//! - 2 bytes: Magic ("MX")
//! - 1 byte: Version
//! - 1 byte: Row kind tag
//!
//! Any decode failure is reported as `MixerError::MalformedPayload`; callers
//! treat it as a miss for that key.

use crate::primitives::{KEY_ESCAPE, KEY_SEPARATOR, PAYLOAD_MAGIC, PAYLOAD_VERSION};
use crate::types::{Direction, MixerError, Node, Observation, PropertyLabels, Triple};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Header length in bytes (magic + version + kind tag).
const HEADER_LEN: usize = 4;

/// Upper bound on a single payload cell.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

// =============================================================================
// ROW KIND
// =============================================================================

/// What a cache row holds. Each kind has its own key prefix and payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RowKind {
    /// Neighbor descriptors for `(entity, predicate, direction[, type])`.
    PropertyValues,
    /// All triples touching an entity.
    Triples,
    /// Observations for `(place, statVar)`; the predicate slot holds the stat var.
    Observations,
    /// In/out predicate names of an entity.
    PropertyLabels,
    /// Stat vars with data for a place.
    StatVars,
}

impl RowKind {
    pub const ALL: [RowKind; 5] = [
        RowKind::PropertyValues,
        RowKind::Triples,
        RowKind::Observations,
        RowKind::PropertyLabels,
        RowKind::StatVars,
    ];

    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::PropertyValues => "pv/",
            Self::Triples => "tr/",
            Self::Observations => "ob/",
            Self::PropertyLabels => "pl/",
            Self::StatVars => "sv/",
        }
    }

    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::PropertyValues => 1,
            Self::Triples => 2,
            Self::Observations => 3,
            Self::PropertyLabels => 4,
            Self::StatVars => 5,
        }
    }

    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    fn from_key(raw: &str) -> Option<(Self, &str)> {
        Self::ALL
            .into_iter()
            .find_map(|k| raw.strip_prefix(k.prefix()).map(|rest| (k, rest)))
    }
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix().trim_end_matches('/'))
    }
}

// =============================================================================
// ROW KEY
// =============================================================================

/// An encoded cache row key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey(String);

impl RowKey {
    /// Wrap a raw stored key without validating it.
    ///
    /// Used when reading keys back from a store; `decode` validates.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The logical tuple behind a row key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyParts {
    pub kind: RowKind,
    pub entity: String,
    pub predicate: String,
    pub direction: Direction,
    pub type_filter: String,
}

fn push_escaped(out: &mut String, component: &str) {
    for c in component.chars() {
        if c == KEY_ESCAPE || c == KEY_SEPARATOR {
            out.push(KEY_ESCAPE);
        }
        out.push(c);
    }
}

/// Encode a logical query into its row key.
#[must_use]
pub fn encode(
    kind: RowKind,
    entity: &str,
    predicate: &str,
    direction: Direction,
    type_filter: &str,
) -> RowKey {
    let mut key = String::with_capacity(
        kind.prefix().len() + entity.len() + predicate.len() + type_filter.len() + 8,
    );
    key.push_str(kind.prefix());
    push_escaped(&mut key, entity);
    key.push(KEY_SEPARATOR);
    push_escaped(&mut key, predicate);
    key.push(KEY_SEPARATOR);
    key.push_str(direction.as_str());
    key.push(KEY_SEPARATOR);
    push_escaped(&mut key, type_filter);
    RowKey(key)
}

/// Encode one key per entity, preserving input order.
#[must_use]
pub fn encode_batch<S: AsRef<str>>(
    kind: RowKind,
    entities: &[S],
    predicate: &str,
    direction: Direction,
    type_filter: &str,
) -> Vec<RowKey> {
    entities
        .iter()
        .map(|e| encode(kind, e.as_ref(), predicate, direction, type_filter))
        .collect()
}

/// Key prefix shared by every row of `kind` for `entity`.
#[must_use]
pub fn entity_prefix(kind: RowKind, entity: &str) -> String {
    let mut prefix = String::from(kind.prefix());
    push_escaped(&mut prefix, entity);
    prefix.push(KEY_SEPARATOR);
    prefix
}

/// Decode a row key back into its logical tuple.
pub fn decode(key: &RowKey) -> Result<KeyParts, MixerError> {
    let (kind, rest) = RowKind::from_key(key.as_str())
        .ok_or_else(|| MixerError::MalformedPayload(format!("unknown key prefix: {}", key)))?;

    let mut components: Vec<String> = Vec::with_capacity(4);
    let mut current = String::new();
    let mut chars = rest.chars();
    while let Some(c) = chars.next() {
        if c == KEY_ESCAPE {
            match chars.next() {
                Some(next) if next == KEY_ESCAPE || next == KEY_SEPARATOR => current.push(next),
                _ => {
                    return Err(MixerError::MalformedPayload(format!(
                        "dangling escape in key: {}",
                        key
                    )));
                }
            }
        } else if c == KEY_SEPARATOR {
            components.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    components.push(current);

    let [entity, predicate, direction, type_filter]: [String; 4] =
        components.try_into().map_err(|parts: Vec<String>| {
            MixerError::MalformedPayload(format!(
                "expected 4 key components, found {} in {}",
                parts.len(),
                key
            ))
        })?;

    let direction = match direction.as_str() {
        "out" => Direction::Out,
        "in" => Direction::In,
        other => {
            return Err(MixerError::MalformedPayload(format!(
                "bad direction '{}' in key {}",
                other, key
            )));
        }
    };

    Ok(KeyParts {
        kind,
        entity,
        predicate,
        direction,
        type_filter,
    })
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// A decoded cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Neighbors(Vec<Node>),
    Triples(Vec<Triple>),
    Observations(Vec<Observation>),
    PropertyLabels(PropertyLabels),
    StatVars(Vec<String>),
}

impl Payload {
    #[must_use]
    pub fn kind(&self) -> RowKind {
        match self {
            Self::Neighbors(_) => RowKind::PropertyValues,
            Self::Triples(_) => RowKind::Triples,
            Self::Observations(_) => RowKind::Observations,
            Self::PropertyLabels(_) => RowKind::PropertyLabels,
            Self::StatVars(_) => RowKind::StatVars,
        }
    }
}

fn body<T: Serialize>(value: &T) -> Result<Vec<u8>, MixerError> {
    postcard::to_stdvec(value).map_err(|e| MixerError::MalformedPayload(e.to_string()))
}

/// Serialize a payload into cell bytes (header + body).
pub fn encode_payload(payload: &Payload) -> Result<Vec<u8>, MixerError> {
    let encoded = match payload {
        Payload::Neighbors(v) => body(v)?,
        Payload::Triples(v) => body(v)?,
        Payload::Observations(v) => body(v)?,
        Payload::PropertyLabels(v) => body(v)?,
        Payload::StatVars(v) => body(v)?,
    };

    let mut bytes = Vec::with_capacity(HEADER_LEN + encoded.len());
    bytes.extend_from_slice(PAYLOAD_MAGIC);
    bytes.push(PAYLOAD_VERSION);
    bytes.push(payload.kind().tag());
    bytes.extend_from_slice(&encoded);
    Ok(bytes)
}

fn read_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MixerError> {
    let (value, rest) = postcard::take_from_bytes::<T>(bytes)
        .map_err(|e| MixerError::MalformedPayload(format!("body decode failed: {}", e)))?;
    if !rest.is_empty() {
        return Err(MixerError::MalformedPayload(format!(
            "{} trailing bytes after body",
            rest.len()
        )));
    }
    Ok(value)
}

/// Deserialize cell bytes, checking that they hold a payload of `kind`.
pub fn decode_payload(kind: RowKind, bytes: &[u8]) -> Result<Payload, MixerError> {
    if bytes.len() < HEADER_LEN {
        return Err(MixerError::MalformedPayload(format!(
            "cell too short: {} bytes",
            bytes.len()
        )));
    }
    if bytes.len() > MAX_PAYLOAD_SIZE {
        return Err(MixerError::MalformedPayload(format!(
            "cell size {} exceeds maximum {}",
            bytes.len(),
            MAX_PAYLOAD_SIZE
        )));
    }
    if &bytes[0..2] != PAYLOAD_MAGIC {
        return Err(MixerError::MalformedPayload("invalid magic bytes".to_string()));
    }
    if bytes[2] != PAYLOAD_VERSION {
        return Err(MixerError::MalformedPayload(format!(
            "unsupported version: {} (expected {})",
            bytes[2], PAYLOAD_VERSION
        )));
    }
    if bytes[3] != kind.tag() {
        return Err(MixerError::MalformedPayload(format!(
            "kind mismatch: expected {}, found tag {}",
            kind, bytes[3]
        )));
    }

    let rest = &bytes[HEADER_LEN..];
    Ok(match kind {
        RowKind::PropertyValues => Payload::Neighbors(read_body(rest)?),
        RowKind::Triples => Payload::Triples(read_body(rest)?),
        RowKind::Observations => Payload::Observations(read_body(rest)?),
        RowKind::PropertyLabels => Payload::PropertyLabels(read_body(rest)?),
        RowKind::StatVars => Payload::StatVars(read_body(rest)?),
    })
}

// =============================================================================
// TESTS
// =============================================================================
