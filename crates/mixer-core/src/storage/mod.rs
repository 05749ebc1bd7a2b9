//! # Storage Module
//!
//! The row-store capability shared by every cache origin.
//!
//! A row store maps encoded row keys to payload cells with a revision. The
//! serving path only reads; writes happen offline (`RedbRowStore::replace_rows`)
//! or at construction time (`MemoryRowStore`).
//!
//! Implementations:
//! - `RedbRowStore`: redb file, used for Base and Branch
//! - `MemoryRowStore`: BTreeMap table, used by the override store and tests

pub mod redb_store;

pub use redb_store::RedbRowStore;

use crate::codec::{self, Payload, RowKey, RowKind};
use crate::types::{MixerError, Origin};
use std::collections::BTreeMap;

/// A raw cell read from a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRow {
    pub payload: Vec<u8>,
    pub revision: u64,
}

impl CacheRow {
    #[must_use]
    pub fn new(payload: Vec<u8>, revision: u64) -> Self {
        Self { payload, revision }
    }
}

/// Uniform read interface over a key-value table.
///
/// Implementations are synchronous; async callers run them on a blocking
/// thread.
pub trait RowStore: Send + Sync {
    /// Which origin this store answers for.
    fn origin(&self) -> Origin;

    /// Fetch the subset of `keys` that is present.
    ///
    /// Absent keys are omitted. An unreachable store fails the whole batch
    /// with `StoreUnavailable`.
    fn fetch_rows(&self, keys: &[RowKey]) -> Result<BTreeMap<RowKey, CacheRow>, MixerError>;

    /// All rows of one kind, in key order.
    fn scan_kind(&self, kind: RowKind) -> Result<Vec<(RowKey, CacheRow)>, MixerError>;

    /// Number of rows held.
    fn row_count(&self) -> Result<usize, MixerError>;
}

/// Decode a fetched cell, logging and dropping it if it is malformed.
pub fn decode_row(origin: Origin, kind: RowKind, key: &RowKey, row: &CacheRow) -> Option<Payload> {
    match codec::decode_payload(kind, &row.payload) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::warn!(%origin, key = %key, error = %e, "treating malformed cell as a miss");
            None
        }
    }
}

// =============================================================================
// IN-MEMORY TABLE
// =============================================================================

/// A BTreeMap-backed row store.
#[derive(Debug, Clone)]
pub struct MemoryRowStore {
    origin: Origin,
    rows: BTreeMap<RowKey, CacheRow>,
}

impl MemoryRowStore {
    #[must_use]
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            rows: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn from_rows(origin: Origin, rows: BTreeMap<RowKey, CacheRow>) -> Self {
        Self { origin, rows }
    }

    /// Insert or replace a row.
    pub fn insert(&mut self, key: RowKey, row: CacheRow) {
        self.rows.insert(key, row);
    }

    /// Encode and insert a payload.
    pub fn put(&mut self, key: RowKey, payload: &Payload, revision: u64) -> Result<(), MixerError> {
        let bytes = codec::encode_payload(payload)?;
        self.rows.insert(key, CacheRow::new(bytes, revision));
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RowStore for MemoryRowStore {
    fn origin(&self) -> Origin {
        self.origin
    }

    fn fetch_rows(&self, keys: &[RowKey]) -> Result<BTreeMap<RowKey, CacheRow>, MixerError> {
        Ok(keys
            .iter()
            .filter_map(|k| self.rows.get(k).map(|row| (k.clone(), row.clone())))
            .collect())
    }

    fn scan_kind(&self, kind: RowKind) -> Result<Vec<(RowKey, CacheRow)>, MixerError> {
        let prefix = kind.prefix();
        Ok(self
            .rows
            .range(RowKey::from_raw(prefix)..)
            .take_while(|(k, _)| k.as_str().starts_with(prefix))
            .map(|(k, row)| (k.clone(), row.clone()))
            .collect())
    }

    fn row_count(&self) -> Result<usize, MixerError> {
        Ok(self.rows.len())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn labels_key(entity: &str) -> RowKey {
        codec::encode(RowKind::PropertyLabels, entity, "", Direction::Out, "")
    }

    #[test]
    fn fetch_omits_absent_keys() {
        let mut store = MemoryRowStore::new(Origin::Base);
        store
            .put(labels_key("a"), &Payload::StatVars(vec![]), 1)
            .expect("put");
        let rows = store
            .fetch_rows(&[labels_key("a"), labels_key("b")])
            .expect("fetch");
        assert_eq!(rows.len(), 1);
        assert!(rows.contains_key(&labels_key("a")));
    }

    #[test]
    fn scan_kind_stays_inside_prefix() {
        let mut store = MemoryRowStore::new(Origin::Base);
        store.insert(labels_key("a"), CacheRow::new(vec![1], 1));
        store.insert(labels_key("b"), CacheRow::new(vec![2], 1));
        store.insert(
            codec::encode(RowKind::StatVars, "a", "", Direction::Out, ""),
            CacheRow::new(vec![3], 1),
        );
        store.insert(
            codec::encode(RowKind::Observations, "a", "x", Direction::Out, ""),
            CacheRow::new(vec![4], 1),
        );

        let scanned = store.scan_kind(RowKind::PropertyLabels).expect("scan");
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].0, labels_key("a"));
        assert_eq!(store.row_count().expect("count"), 4);
    }

    #[test]
    fn decode_row_drops_garbage() {
        let row = CacheRow::new(vec![0, 1, 2, 3, 4], 7);
        assert!(decode_row(Origin::Branch, RowKind::StatVars, &labels_key("a"), &row).is_none());
    }
}
