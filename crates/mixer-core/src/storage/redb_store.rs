//! # redb-backed Row Store
//!
//! Base and Branch cache tables stored in a redb embedded database.
//!
//! The serving path only opens read transactions. Snapshots are written by
//! the offline loader in a single write transaction, so a reader sees either
//! the previous snapshot or the new one, never a mix.

use super::{CacheRow, RowStore};
use crate::codec::{RowKey, RowKind};
use crate::types::{MixerError, Origin};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Table for cells: encoded row key -> payload bytes
const ROWS: TableDefinition<&str, &[u8]> = TableDefinition::new("rows");

/// Table for revisions: encoded row key -> revision
const REVISIONS: TableDefinition<&str, u64> = TableDefinition::new("revisions");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const LAST_REVISION: &str = "last_revision";

/// A disk-backed row store for one cache origin.
pub struct RedbRowStore {
    db: Database,
    origin: Origin,
}

impl fmt::Debug for RedbRowStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedbRowStore")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl RedbRowStore {
    /// Open or create a row store at the given path.
    pub fn open(path: impl AsRef<Path>, origin: Origin) -> Result<Self, MixerError> {
        let db = Database::create(path.as_ref()).map_err(|e| MixerError::unavailable(origin, e))?;

        // Initialize tables if they don't exist
        {
            let write_txn = db
                .begin_write()
                .map_err(|e| MixerError::unavailable(origin, e))?;
            let _ = write_txn
                .open_table(ROWS)
                .map_err(|e| MixerError::unavailable(origin, e))?;
            let _ = write_txn
                .open_table(REVISIONS)
                .map_err(|e| MixerError::unavailable(origin, e))?;
            let _ = write_txn
                .open_table(METADATA)
                .map_err(|e| MixerError::unavailable(origin, e))?;
            write_txn
                .commit()
                .map_err(|e| MixerError::unavailable(origin, e))?;
        }

        Ok(Self { db, origin })
    }

    fn unavailable(&self, e: impl fmt::Display) -> MixerError {
        MixerError::unavailable(self.origin, e)
    }

    /// Upsert encoded rows at `revision` in one transaction.
    ///
    /// Rows the batch does not mention are kept. Returns the number of rows
    /// written.
    pub fn write_rows(
        &self,
        rows: &BTreeMap<RowKey, Vec<u8>>,
        revision: u64,
    ) -> Result<usize, MixerError> {
        self.write(rows, revision, false)
    }

    /// Replace the whole table with `rows` at `revision` in one transaction.
    ///
    /// Keys absent from `rows` are gone afterwards, and `last_revision`
    /// becomes `revision`.
    pub fn replace_rows(
        &self,
        rows: &BTreeMap<RowKey, Vec<u8>>,
        revision: u64,
    ) -> Result<usize, MixerError> {
        self.write(rows, revision, true)
    }

    fn write(
        &self,
        rows: &BTreeMap<RowKey, Vec<u8>>,
        revision: u64,
        replace: bool,
    ) -> Result<usize, MixerError> {
        let write_txn = self.db.begin_write().map_err(|e| self.unavailable(e))?;

        {
            let mut rows_table = write_txn
                .open_table(ROWS)
                .map_err(|e| self.unavailable(e))?;
            let mut revisions_table = write_txn
                .open_table(REVISIONS)
                .map_err(|e| self.unavailable(e))?;
            let mut meta_table = write_txn
                .open_table(METADATA)
                .map_err(|e| self.unavailable(e))?;

            if replace {
                rows_table
                    .retain(|_, _| false)
                    .map_err(|e| self.unavailable(e))?;
                revisions_table
                    .retain(|_, _| false)
                    .map_err(|e| self.unavailable(e))?;
            }

            for (key, payload) in rows {
                rows_table
                    .insert(key.as_str(), payload.as_slice())
                    .map_err(|e| self.unavailable(e))?;
                revisions_table
                    .insert(key.as_str(), revision)
                    .map_err(|e| self.unavailable(e))?;
            }

            let previous = meta_table
                .get(LAST_REVISION)
                .map_err(|e| self.unavailable(e))?
                .map(|v| v.value())
                .unwrap_or(0);
            let last = if replace { revision } else { previous.max(revision) };
            meta_table
                .insert(LAST_REVISION, last)
                .map_err(|e| self.unavailable(e))?;
        }

        write_txn.commit().map_err(|e| self.unavailable(e))?;

        tracing::debug!(
            origin = %self.origin,
            rows = rows.len(),
            revision,
            replace,
            "wrote snapshot rows"
        );
        Ok(rows.len())
    }

    /// Highest revision ever written, 0 for an empty store.
    pub fn last_revision(&self) -> Result<u64, MixerError> {
        let read_txn = self.db.begin_read().map_err(|e| self.unavailable(e))?;
        let table = read_txn
            .open_table(METADATA)
            .map_err(|e| self.unavailable(e))?;
        Ok(table
            .get(LAST_REVISION)
            .map_err(|e| self.unavailable(e))?
            .map(|v| v.value())
            .unwrap_or(0))
    }
}

impl RowStore for RedbRowStore {
    fn origin(&self) -> Origin {
        self.origin
    }

    fn fetch_rows(&self, keys: &[RowKey]) -> Result<BTreeMap<RowKey, CacheRow>, MixerError> {
        let read_txn = self.db.begin_read().map_err(|e| self.unavailable(e))?;
        let rows_table = read_txn
            .open_table(ROWS)
            .map_err(|e| self.unavailable(e))?;
        let revisions_table = read_txn
            .open_table(REVISIONS)
            .map_err(|e| self.unavailable(e))?;

        let mut found = BTreeMap::new();
        for key in keys {
            let Some(payload) = rows_table
                .get(key.as_str())
                .map_err(|e| self.unavailable(e))?
            else {
                continue;
            };
            let revision = revisions_table
                .get(key.as_str())
                .map_err(|e| self.unavailable(e))?
                .map(|v| v.value())
                .unwrap_or(0);
            found.insert(key.clone(), CacheRow::new(payload.value().to_vec(), revision));
        }
        Ok(found)
    }

    fn scan_kind(&self, kind: RowKind) -> Result<Vec<(RowKey, CacheRow)>, MixerError> {
        let prefix = kind.prefix();
        let read_txn = self.db.begin_read().map_err(|e| self.unavailable(e))?;
        let rows_table = read_txn
            .open_table(ROWS)
            .map_err(|e| self.unavailable(e))?;
        let revisions_table = read_txn
            .open_table(REVISIONS)
            .map_err(|e| self.unavailable(e))?;

        let mut scanned = Vec::new();
        for entry in rows_table
            .range(prefix..)
            .map_err(|e| self.unavailable(e))?
        {
            let (key, payload) = entry.map_err(|e| self.unavailable(e))?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            let revision = revisions_table
                .get(key)
                .map_err(|e| self.unavailable(e))?
                .map(|v| v.value())
                .unwrap_or(0);
            scanned.push((
                RowKey::from_raw(key),
                CacheRow::new(payload.value().to_vec(), revision),
            ));
        }
        Ok(scanned)
    }

    fn row_count(&self) -> Result<usize, MixerError> {
        let read_txn = self.db.begin_read().map_err(|e| self.unavailable(e))?;
        let table = read_txn
            .open_table(ROWS)
            .map_err(|e| self.unavailable(e))?;
        let count = table.len().map_err(|e| self.unavailable(e))?;
        Ok(count as usize)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, Payload};
    use crate::types::{Direction, Node};
    use tempfile::tempdir;

    fn name_row(entity: &str, name: &str) -> (RowKey, Vec<u8>) {
        let key = codec::encode(RowKind::PropertyValues, entity, "name", Direction::Out, "");
        let payload =
            codec::encode_payload(&Payload::Neighbors(vec![Node::literal(name)])).expect("encode");
        (key, payload)
    }

    #[test]
    fn write_then_fetch() {
        let temp = tempdir().expect("temp dir");
        let store =
            RedbRowStore::open(temp.path().join("base.redb"), Origin::Base).expect("open db");

        let rows: BTreeMap<_, _> = [name_row("geoId/06", "California")].into_iter().collect();
        assert_eq!(store.write_rows(&rows, 3).expect("write"), 1);

        let (key, _) = name_row("geoId/06", "California");
        let (missing, _) = name_row("geoId/05", "Arkansas");
        let fetched = store
            .fetch_rows(&[key.clone(), missing])
            .expect("fetch");
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[&key].revision, 3);
        assert_eq!(store.last_revision().expect("revision"), 3);
        assert_eq!(store.row_count().expect("count"), 1);
    }

    #[test]
    fn last_revision_never_decreases() {
        let temp = tempdir().expect("temp dir");
        let store =
            RedbRowStore::open(temp.path().join("branch.redb"), Origin::Branch).expect("open db");

        let rows: BTreeMap<_, _> = [name_row("a", "A")].into_iter().collect();
        store.write_rows(&rows, 9).expect("write");
        store.write_rows(&rows, 4).expect("write");
        assert_eq!(store.last_revision().expect("revision"), 9);
    }

    #[test]
    fn replace_drops_keys_missing_from_new_snapshot() {
        let temp = tempdir().expect("temp dir");
        let store =
            RedbRowStore::open(temp.path().join("base.redb"), Origin::Base).expect("open db");

        let (old_key, _) = name_row("x", "Old");
        let (new_key, _) = name_row("y", "New");
        let first: BTreeMap<_, _> = [name_row("x", "Old")].into_iter().collect();
        let second: BTreeMap<_, _> = [name_row("y", "New")].into_iter().collect();
        store.write_rows(&first, 1).expect("write");
        store.replace_rows(&second, 2).expect("replace");

        let fetched = store
            .fetch_rows(&[old_key.clone(), new_key.clone()])
            .expect("fetch");
        assert!(!fetched.contains_key(&old_key));
        assert_eq!(fetched[&new_key].revision, 2);
        assert_eq!(store.row_count().expect("count"), 1);
        assert_eq!(store.last_revision().expect("revision"), 2);
    }

    #[test]
    fn upsert_keeps_unmentioned_keys() {
        let temp = tempdir().expect("temp dir");
        let store =
            RedbRowStore::open(temp.path().join("branch.redb"), Origin::Branch).expect("open db");

        let (old_key, _) = name_row("x", "Old");
        let first: BTreeMap<_, _> = [name_row("x", "Old")].into_iter().collect();
        let second: BTreeMap<_, _> = [name_row("y", "New")].into_iter().collect();
        store.write_rows(&first, 1).expect("write");
        store.write_rows(&second, 2).expect("write");

        let fetched = store.fetch_rows(&[old_key.clone()]).expect("fetch");
        assert_eq!(fetched[&old_key].revision, 1);
        assert_eq!(store.row_count().expect("count"), 2);
    }

    #[test]
    fn scan_kind_in_key_order() {
        let temp = tempdir().expect("temp dir");
        let store =
            RedbRowStore::open(temp.path().join("base.redb"), Origin::Base).expect("open db");

        let mut rows: BTreeMap<_, _> =
            [name_row("b", "B"), name_row("a", "A")].into_iter().collect();
        rows.insert(
            codec::encode(RowKind::StatVars, "a", "", Direction::Out, ""),
            codec::encode_payload(&Payload::StatVars(vec!["Count_Person".into()])).expect("encode"),
        );
        store.write_rows(&rows, 1).expect("write");

        let scanned = store.scan_kind(RowKind::PropertyValues).expect("scan");
        let entities: Vec<String> = scanned
            .iter()
            .map(|(k, _)| codec::decode(k).expect("decode").entity)
            .collect();
        assert_eq!(entities, vec!["a", "b"]);
        assert_eq!(store.scan_kind(RowKind::StatVars).expect("scan").len(), 1);
        assert!(store.scan_kind(RowKind::Triples).expect("scan").is_empty());
    }

    #[test]
    fn persistence() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("base.redb");
        let (key, _) = name_row("geoId/06", "California");
        {
            let store = RedbRowStore::open(&path, Origin::Base).expect("open db");
            let rows: BTreeMap<_, _> = [name_row("geoId/06", "California")].into_iter().collect();
            store.write_rows(&rows, 2).expect("write");
        }
        let reopened = RedbRowStore::open(&path, Origin::Base).expect("reopen db");
        assert!(reopened.fetch_rows(&[key]).expect("fetch").len() == 1);
    }
}
