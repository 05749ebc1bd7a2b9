//! # Override Store
//!
//! A fully materialized, in-process table loaded once from a record export.
//! When enabled it shadows Branch and Base for every key it holds, and it can
//! serve requests on its own in override-only mode.

use crate::codec::{RowKey, RowKind};
use crate::records::{self, Record, TripleIndex};
use crate::storage::{CacheRow, MemoryRowStore, RowStore};
use crate::types::{MixerError, Origin};
use std::collections::BTreeMap;
use std::path::Path;

/// Revision stamped on every override row.
const OVERRIDE_REVISION: u64 = 0;

#[derive(Debug, Clone)]
pub struct OverrideStore {
    table: MemoryRowStore,
    entity_count: usize,
}

impl OverrideStore {
    /// Load an export file. Any read or parse failure is an `OverrideLoad`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MixerError> {
        let path = path.as_ref();
        let records = records::read_records(path)
            .map_err(|e| MixerError::OverrideLoad(format!("{}: {}", path.display(), e)))?;
        let store = Self::from_records(records)?;
        tracing::info!(
            path = %path.display(),
            rows = store.table.len(),
            entities = store.entity_count,
            "override store loaded"
        );
        Ok(store)
    }

    /// Materialize rows from already parsed records.
    pub fn from_records(records: Vec<Record>) -> Result<Self, MixerError> {
        let index = TripleIndex::from_records(records);
        let mut table = MemoryRowStore::new(Origin::Override);
        for (key, payload) in index.to_rows() {
            table
                .put(key, &payload, OVERRIDE_REVISION)
                .map_err(|e| MixerError::OverrideLoad(e.to_string()))?;
        }
        Ok(Self {
            table,
            entity_count: index.entities().len(),
        })
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entity_count
    }
}

impl RowStore for OverrideStore {
    fn origin(&self) -> Origin {
        Origin::Override
    }

    fn fetch_rows(&self, keys: &[RowKey]) -> Result<BTreeMap<RowKey, CacheRow>, MixerError> {
        self.table.fetch_rows(keys)
    }

    fn scan_kind(&self, kind: RowKind) -> Result<Vec<(RowKey, CacheRow)>, MixerError> {
        self.table.scan_kind(kind)
    }

    fn row_count(&self) -> Result<usize, MixerError> {
        self.table.row_count()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::codec::{self, Payload};
    use crate::types::Direction;
    use std::io::Write;

    const EXPORT: &str = r#"
{"kind":"triple","subject":"geoId/05","predicate":"name","value":"Arkansas (override)"}
{"kind":"triple","subject":"geoId/05","predicate":"typeOf","object":"State"}
"#;

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(EXPORT.as_bytes()).expect("write");

        let store = OverrideStore::load(file.path()).expect("load");
        assert_eq!(store.origin(), Origin::Override);

        let key = codec::encode(RowKind::PropertyValues, "geoId/05", "name", Direction::Out, "");
        let rows = store.fetch_rows(std::slice::from_ref(&key)).expect("fetch");
        let payload = codec::decode_payload(RowKind::PropertyValues, &rows[&key].payload)
            .expect("decode");
        let Payload::Neighbors(nodes) = payload else {
            panic!("expected neighbors");
        };
        assert_eq!(nodes[0].value.as_deref(), Some("Arkansas (override)"));
    }

    #[test]
    fn missing_file_is_override_load_error() {
        let temp = tempfile::tempdir().expect("temp dir");
        let result = OverrideStore::load(temp.path().join("absent.jsonl"));
        assert!(matches!(result, Err(MixerError::OverrideLoad(_))));
    }

    #[test]
    fn malformed_export_is_override_load_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"not json\n").expect("write");
        let result = OverrideStore::load(file.path());
        assert!(matches!(result, Err(MixerError::OverrideLoad(_))));
    }
}
