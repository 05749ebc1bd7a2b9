//! Shared fixtures: three layered exports over a small slice of California.
#![allow(dead_code, clippy::unwrap_used)]

use mixer::orchestrator::{MixerOptions, Orchestrator, Stores};
use mixer_core::codec::RowKind;
use mixer_core::{
    CacheRow, MemoryRowStore, MixerError, Origin, OverrideStore, QueryEngine, RowKey, RowStore,
    TripleIndex, TripleTableEngine, parse_records,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const BASE: &str = r#"
# states
{"kind":"triple","subject":"State","predicate":"name","value":"State"}
{"kind":"triple","subject":"State","predicate":"typeOf","object":"Class"}
{"kind":"triple","subject":"geoId/05","predicate":"name","value":"Arkansas"}
{"kind":"triple","subject":"geoId/05","predicate":"typeOf","object":"State"}
{"kind":"triple","subject":"geoId/06","predicate":"name","value":"California"}
{"kind":"triple","subject":"geoId/06","predicate":"typeOf","object":"State"}

# Santa Clara County and what it contains
{"kind":"triple","subject":"geoId/06085","predicate":"name","value":"Santa Clara County"}
{"kind":"triple","subject":"geoId/06085","predicate":"typeOf","object":"County"}
{"kind":"triple","subject":"geoId/06085","predicate":"containedInPlace","object":"geoId/06"}
{"kind":"triple","subject":"geoId/0647766","predicate":"name","value":"Palo Alto"}
{"kind":"triple","subject":"geoId/0647766","predicate":"typeOf","object":"City"}
{"kind":"triple","subject":"geoId/0647766","predicate":"containedInPlace","object":"geoId/06085"}
{"kind":"triple","subject":"geoId/0649670","predicate":"name","value":"Mountain View"}
{"kind":"triple","subject":"geoId/0649670","predicate":"typeOf","object":"City"}
{"kind":"triple","subject":"geoId/0649670","predicate":"containedInPlace","object":"geoId/06085"}
{"kind":"triple","subject":"geoId/sd0629610","predicate":"name","value":"Palo Alto Unified"}
{"kind":"triple","subject":"geoId/sd0629610","predicate":"typeOf","object":"SchoolDistrict"}
{"kind":"triple","subject":"geoId/sd0629610","predicate":"containedInPlace","object":"geoId/06085"}

{"kind":"observation","statVar":"Count_Person","place":"geoId/06","date":"2019","value":39512223,"measurementMethod":"CensusPEPSurvey"}
{"kind":"observation","statVar":"Count_Person","place":"geoId/06","date":"2020","value":39538223,"measurementMethod":"CensusPEPSurvey"}
{"kind":"observation","statVar":"Count_Person","place":"geoId/06","date":"2020","value":39346023,"measurementMethod":"CensusACS5yrSurvey"}
{"kind":"observation","statVar":"Median_Age_Person","place":"geoId/06","date":"2020","value":36.7}
"#;

pub const BRANCH: &str = r#"
{"kind":"triple","subject":"geoId/0647766","predicate":"name","value":"Palo Alto (branch)"}
{"kind":"triple","subject":"geoId/0647766","predicate":"typeOf","object":"City"}
{"kind":"triple","subject":"geoId/0647766","predicate":"containedInPlace","object":"geoId/06085"}
{"kind":"observation","statVar":"Count_Person","place":"geoId/06","date":"2020","value":39538245,"measurementMethod":"CensusPEPSurvey"}
{"kind":"observation","statVar":"Count_Person","place":"geoId/06","date":"2021","value":39237836,"measurementMethod":"CensusPEPSurvey"}
"#;

/// Pins one display name. Every row it implies replaces the cached row.
pub const OVERRIDE: &str = r#"
{"kind":"triple","subject":"geoId/0649670","predicate":"name","value":"Mountain View (override)"}
"#;

/// Known only to the query engine.
pub const ENGINE: &str = r#"
{"kind":"triple","subject":"geoId/06","predicate":"name","value":"California"}
{"kind":"triple","subject":"geoId/06","predicate":"typeOf","object":"State"}
{"kind":"triple","subject":"geoId/48","predicate":"name","value":"Texas"}
{"kind":"triple","subject":"geoId/48","predicate":"typeOf","object":"State"}
{"kind":"triple","subject":"geoId/48","predicate":"isoCode","value":"US-TX"}
"#;

pub fn index(export: &str) -> TripleIndex {
    TripleIndex::from_records(parse_records(export).unwrap())
}

pub fn memory_store(origin: Origin, export: &str, revision: u64) -> Arc<dyn RowStore> {
    let mut store = MemoryRowStore::new(origin);
    for (key, payload) in index(export).to_rows() {
        store.put(key, &payload, revision).unwrap();
    }
    Arc::new(store)
}

pub fn override_from(export: &str) -> Arc<dyn RowStore> {
    Arc::new(OverrideStore::from_records(parse_records(export).unwrap()).unwrap())
}

pub fn override_store() -> Arc<dyn RowStore> {
    override_from(OVERRIDE)
}

pub fn engine(latency: Duration) -> Arc<dyn QueryEngine> {
    Arc::new(TripleTableEngine::new(index(ENGINE)).with_latency(latency))
}

/// Base, Branch and Override up; no query engine.
pub fn layered_stores() -> Stores {
    Stores {
        base: Some(memory_store(Origin::Base, BASE, 1)),
        branch: Some(memory_store(Origin::Branch, BRANCH, 2)),
        override_store: Some(override_store()),
        engine: None,
    }
}

pub fn with_override() -> MixerOptions {
    MixerOptions {
        use_override_store: true,
        ..MixerOptions::default()
    }
}

pub fn layered() -> Orchestrator {
    Orchestrator::new(layered_stores(), with_override()).unwrap()
}

pub fn strings(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// MISBEHAVING STORES
// =============================================================================

/// A store that is never reachable.
pub struct DownStore(pub Origin);

impl RowStore for DownStore {
    fn origin(&self) -> Origin {
        self.0
    }

    fn fetch_rows(&self, _keys: &[RowKey]) -> Result<BTreeMap<RowKey, CacheRow>, MixerError> {
        Err(MixerError::unavailable(self.0, "connection refused"))
    }

    fn scan_kind(&self, _kind: RowKind) -> Result<Vec<(RowKey, CacheRow)>, MixerError> {
        Err(MixerError::unavailable(self.0, "connection refused"))
    }

    fn row_count(&self) -> Result<usize, MixerError> {
        Err(MixerError::unavailable(self.0, "connection refused"))
    }
}

/// A working store that answers fetches only after `delay`.
pub struct SlowStore {
    pub inner: Arc<dyn RowStore>,
    pub delay: Duration,
}

impl RowStore for SlowStore {
    fn origin(&self) -> Origin {
        self.inner.origin()
    }

    fn fetch_rows(&self, keys: &[RowKey]) -> Result<BTreeMap<RowKey, CacheRow>, MixerError> {
        std::thread::sleep(self.delay);
        self.inner.fetch_rows(keys)
    }

    fn scan_kind(&self, kind: RowKind) -> Result<Vec<(RowKey, CacheRow)>, MixerError> {
        self.inner.scan_kind(kind)
    }

    fn row_count(&self) -> Result<usize, MixerError> {
        self.inner.row_count()
    }
}
