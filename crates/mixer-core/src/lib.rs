//! # mixer-core
//!
//! Store abstraction and deterministic merge engine for knowledge-graph
//! queries served from layered caches.
//!
//! A logical query (entity ids plus predicate, direction, type filter and
//! limit) is encoded into row keys, fetched from several origins of
//! differing freshness and authority, and reconciled into one canonical
//! answer by the merge engine.
//!
//! ## Origins
//!
//! - Override: in-process table loaded from an export, shadows everything
//! - Branch: small, frequently refreshed overlay
//! - Base: full, infrequently refreshed snapshot
//! - Query engine: source of truth, consulted only when no cache has the key
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies
//! - Read-only serving path; stores are written only by the offline loader
//! - Same inputs and store contents give byte-identical output

// =============================================================================
// MODULES
// =============================================================================

pub mod codec;
pub mod engine;
pub mod merge;
pub mod override_store;
pub mod primitives;
pub mod records;
pub mod storage;
pub mod types;
pub mod warm_cache;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use codec::{KeyParts, Payload, RowKey, RowKind};
pub use engine::{EngineQuery, EngineRows, QueryEngine, TripleTableEngine};
pub use merge::{
    BatchOutcome, MergeOutcome, MergePolicy, Mergeable, OriginBatch, merge, merge_with_groups,
};
pub use override_store::OverrideStore;
pub use records::{Record, TripleIndex, TripleRecord, parse_records, read_records};
pub use storage::{CacheRow, MemoryRowStore, RedbRowStore, RowStore};
pub use types::{
    Direction, EntityMap, MixerError, Node, Observation, Origin, PropertyLabels, SourceRecord,
    Triple,
};
pub use warm_cache::WarmCache;
