//! Per-key fetch across origins.
//!
//! All cache origins for a key are dispatched before any is awaited, so Base
//! and Branch always run concurrently. An Override row replaces every other
//! origin's row for the same key. The query engine is asked only when no
//! cache origin holds the key.

use super::Orchestrator;
use mixer_core::storage::decode_row;
use mixer_core::{
    EngineQuery, EngineRows, MixerError, Origin, OriginBatch, Payload, RowKey, RowKind, RowStore,
};
use std::sync::Arc;
use tokio::time::{Instant, timeout_at};

/// One key to look up, and how to read its rows.
pub(super) struct Lookup<R> {
    pub key: RowKey,
    pub kind: RowKind,
    /// Base is known not to hold the key; do not ask it.
    pub skip_base: bool,
    /// Base's row is already known from the warm cache.
    pub base_from_warm: Option<Option<R>>,
    /// Fallback template, `None` when the engine must not be asked.
    pub engine_query: Option<EngineQuery>,
    pub from_payload: fn(Payload) -> Option<R>,
    pub from_engine: fn(EngineRows) -> Option<R>,
}

impl Orchestrator {
    /// Fetch one key from every active origin.
    ///
    /// Each origin yields a batch with zero or one row value. A malformed
    /// row counts as a miss for that origin. When Override holds the key,
    /// only the Override batch is returned.
    pub(super) async fn gather<R: Send + 'static>(
        &self,
        lookup: Lookup<R>,
        deadline: Instant,
    ) -> Vec<OriginBatch<R>> {
        let options = &self.inner.options;
        let stores = &self.inner.stores;

        let mut active: Vec<Arc<dyn RowStore>> = Vec::new();
        let mut batches = Vec::new();
        let mut hit = false;
        let mut shadowed = false;

        if options.use_override_store || options.override_only {
            active.extend(stores.override_store.iter().cloned());
        }
        if !options.override_only {
            active.extend(stores.branch.iter().cloned());
            match lookup.base_from_warm {
                Some(row) => {
                    hit |= row.is_some();
                    batches.push(OriginBatch::fetched(Origin::Base, 0, row));
                }
                None if !lookup.skip_base => active.extend(stores.base.iter().cloned()),
                None => {}
            }
        }

        let pending: Vec<_> = active
            .into_iter()
            .map(|store| {
                let origin = store.origin();
                let keys = vec![lookup.key.clone()];
                let handle = tokio::task::spawn_blocking(move || {
                    store.fetch_rows(&keys).map(|rows| rows.into_iter().next())
                });
                (origin, handle)
            })
            .collect();

        for (origin, handle) in pending {
            let fetched = match timeout_at(deadline, handle).await {
                Err(_) => Err(MixerError::unavailable(origin, "deadline exceeded")),
                Ok(Err(join)) => Err(MixerError::unavailable(origin, join)),
                Ok(Ok(result)) => result,
            };
            match fetched {
                Err(e) => batches.push(OriginBatch::failed(origin, e)),
                Ok(None) => batches.push(OriginBatch::fetched(origin, 0, None)),
                Ok(Some((key, row))) => {
                    let value =
                        decode_row(origin, lookup.kind, &key, &row).and_then(lookup.from_payload);
                    hit |= value.is_some();
                    shadowed |= origin == Origin::Override && value.is_some();
                    batches.push(OriginBatch::fetched(origin, row.revision, value));
                }
            }
        }

        if shadowed {
            batches.retain(|b| b.origin == Origin::Override);
            return batches;
        }

        if !hit
            && !options.override_only
            && let Some(query) = lookup.engine_query
            && stores.engine.is_some()
        {
            let batch = match self.ask_engine(query, deadline).await {
                Ok(rows) => {
                    OriginBatch::fetched(Origin::QueryEngine, 0, (lookup.from_engine)(rows))
                }
                Err(e) => OriginBatch::failed(Origin::QueryEngine, e),
            };
            batches.push(batch);
        }

        batches
    }

    /// Run one template on the query engine, bounded by `deadline`.
    pub(super) async fn ask_engine(
        &self,
        query: EngineQuery,
        deadline: Instant,
    ) -> Result<EngineRows, MixerError> {
        let Some(engine) = self.inner.stores.engine.clone() else {
            return Err(MixerError::unavailable(
                Origin::QueryEngine,
                "no query engine configured",
            ));
        };

        let started = Instant::now();
        let template = query.template();
        let engine_deadline = deadline.into_std();
        let handle = tokio::task::spawn_blocking(move || engine.query(&query, engine_deadline));

        let result = match timeout_at(deadline, handle).await {
            Err(_) => Err(MixerError::QueryEngineTimeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
            Ok(Err(join)) => Err(MixerError::unavailable(Origin::QueryEngine, join)),
            Ok(Ok(result)) => result,
        };
        tracing::debug!(
            template,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "query engine fallback"
        );
        result
    }
}

// =============================================================================
// ROW READERS
// =============================================================================

pub(super) fn neighbors_payload(payload: Payload) -> Option<Vec<mixer_core::Node>> {
    match payload {
        Payload::Neighbors(nodes) => Some(nodes),
        _ => None,
    }
}

pub(super) fn neighbors_rows(rows: EngineRows) -> Option<Vec<mixer_core::Node>> {
    match rows {
        EngineRows::Neighbors(nodes) => Some(nodes),
        _ => None,
    }
}

pub(super) fn triples_payload(payload: Payload) -> Option<Vec<mixer_core::Triple>> {
    match payload {
        Payload::Triples(triples) => Some(triples),
        _ => None,
    }
}

pub(super) fn triples_rows(rows: EngineRows) -> Option<Vec<mixer_core::Triple>> {
    match rows {
        EngineRows::Triples(triples) => Some(triples),
        _ => None,
    }
}

pub(super) fn observations_payload(payload: Payload) -> Option<Vec<mixer_core::Observation>> {
    match payload {
        Payload::Observations(obs) => Some(obs),
        _ => None,
    }
}

pub(super) fn observations_rows(rows: EngineRows) -> Option<Vec<mixer_core::Observation>> {
    match rows {
        EngineRows::Observations(obs) => Some(obs),
        _ => None,
    }
}

pub(super) fn labels_payload(payload: Payload) -> Option<mixer_core::PropertyLabels> {
    match payload {
        Payload::PropertyLabels(labels) => Some(labels),
        _ => None,
    }
}

pub(super) fn labels_rows(rows: EngineRows) -> Option<mixer_core::PropertyLabels> {
    match rows {
        EngineRows::PropertyLabels(labels) => Some(labels),
        _ => None,
    }
}

pub(super) fn stat_vars_payload(payload: Payload) -> Option<Vec<String>> {
    match payload {
        Payload::StatVars(vars) => Some(vars),
        _ => None,
    }
}

pub(super) fn stat_vars_rows(rows: EngineRows) -> Option<Vec<String>> {
    match rows {
        EngineRows::StatVars(vars) => Some(vars),
        _ => None,
    }
}

/// Turn batches of row values into batches of items.
pub(super) fn flatten<T, R, F>(batches: Vec<OriginBatch<R>>, mut items: F) -> Vec<OriginBatch<T>>
where
    F: FnMut(R) -> Vec<T>,
{
    use mixer_core::{BatchOutcome, SourceRecord};

    batches
        .into_iter()
        .map(|batch| match batch.outcome {
            BatchOutcome::Failed(e) => OriginBatch::failed(batch.origin, e),
            BatchOutcome::Fetched(rows) => OriginBatch::records(
                batch.origin,
                rows.into_iter()
                    .flat_map(|row| {
                        let (origin, revision) = (row.origin, row.revision);
                        items(row.item)
                            .into_iter()
                            .map(move |item| SourceRecord::new(origin, revision, item))
                    })
                    .collect(),
            ),
        })
        .collect()
}
