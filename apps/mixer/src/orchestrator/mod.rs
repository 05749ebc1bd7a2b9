//! # Orchestrator
//!
//! Receives typed requests, decomposes them into one logical query per
//! entity, fans those out over the origins and assembles merged responses.
//!
//! ## Concurrency
//!
//! ```text
//! request ──► JoinSet (≤ fan_out_limit logical queries in flight)
//!                │
//!                ├─► spawn_blocking(override.fetch_rows)  ┐
//!                ├─► spawn_blocking(branch.fetch_rows)    ├─ timeout_at(deadline)
//!                ├─► spawn_blocking(base.fetch_rows)      ┘
//!                └─► query engine (only on a full cache miss)
//!                         │
//!                         ▼
//!                   merge engine ──► response (input order)
//! ```
//!
//! Results are re-associated with their input index, never by completion
//! order. Store handles and the warm cache are shared read-only via `Arc`.

mod fetch;
mod operations;
mod responses;

pub use responses::{Merged, NeighborGroups, SourceSeries, StatValue, TripleGroups};

use crate::config::MixerConfig;
use mixer_core::primitives::{MAX_COMPONENT_LENGTH, MAX_ENTITIES_PER_REQUEST};
use mixer_core::{
    EntityMap, MixerError, Origin, OverrideStore, QueryEngine, RedbRowStore, RowStore,
    TripleTableEngine, WarmCache,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

// =============================================================================
// OPTIONS AND STORES
// =============================================================================

/// Runtime switches for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixerOptions {
    pub use_override_store: bool,
    /// Override failures fail the request instead of degrading it.
    pub override_required: bool,
    /// Serve from the override store alone.
    pub override_only: bool,
    pub use_warm_cache: bool,
    /// Budget shared by every origin fetch of one request.
    pub deadline: Duration,
    /// Logical queries in flight per request.
    pub fan_out_limit: usize,
}

impl Default for MixerOptions {
    fn default() -> Self {
        Self {
            use_override_store: false,
            override_required: false,
            override_only: false,
            use_warm_cache: true,
            deadline: Duration::from_millis(5000),
            fan_out_limit: 16,
        }
    }
}

/// The origins available to the orchestrator. Any of them may be absent.
#[derive(Clone, Default)]
pub struct Stores {
    pub base: Option<Arc<dyn RowStore>>,
    pub branch: Option<Arc<dyn RowStore>>,
    pub override_store: Option<Arc<dyn RowStore>>,
    pub engine: Option<Arc<dyn QueryEngine>>,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores")
            .field("base", &self.base.is_some())
            .field("branch", &self.branch.is_some())
            .field("override_store", &self.override_store.is_some())
            .field("engine", &self.engine.is_some())
            .finish()
    }
}

impl Stores {
    /// Open every origin named in the config.
    ///
    /// Base and Branch files that cannot be opened are fatal. An override
    /// export that cannot be loaded is fatal only when override mode is
    /// required; otherwise the service runs without it.
    pub fn open(config: &MixerConfig) -> Result<Self, MixerError> {
        let mut stores = Self::default();

        if let Some(path) = &config.stores.base_path {
            stores.base = Some(Arc::new(RedbRowStore::open(path, Origin::Base)?));
        }
        if let Some(path) = &config.stores.branch_path {
            stores.branch = Some(Arc::new(RedbRowStore::open(path, Origin::Branch)?));
        }
        if config.mixer.use_override_store
            && let Some(path) = &config.stores.override_path
        {
            match OverrideStore::load(path) {
                Ok(store) => stores.override_store = Some(Arc::new(store)),
                Err(e) if config.mixer.override_required || config.mixer.override_only => {
                    return Err(e);
                }
                Err(e) => tracing::warn!(error = %e, "continuing without override store"),
            }
        }
        if let Some(path) = &config.stores.engine_source_path {
            stores.engine = Some(Arc::new(TripleTableEngine::from_path(path)?));
        }

        Ok(stores)
    }
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

struct Inner {
    stores: Stores,
    options: MixerOptions,
    warm_cache: Option<WarmCache>,
}

/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("stores", &self.inner.stores)
            .field("options", &self.inner.options)
            .field("warm_cache", &self.inner.warm_cache.is_some())
            .finish()
    }
}

/// Per-origin health, reported by `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OriginStatus {
    pub origin: Origin,
    pub rows: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub origins: Vec<OriginStatus>,
    pub query_engine: bool,
    pub warm_cache_entities: Option<usize>,
    pub warm_cache_places: Option<usize>,
    pub override_only: bool,
}

impl Orchestrator {
    /// Build the orchestrator, warming the cache from Base when enabled.
    ///
    /// A warm-up failure is fatal.
    pub fn new(stores: Stores, options: MixerOptions) -> Result<Self, MixerError> {
        if options.fan_out_limit == 0 {
            return Err(MixerError::Config("fan_out_limit must be > 0".to_string()));
        }
        if options.override_only && stores.override_store.is_none() {
            return Err(MixerError::Config(
                "override-only mode needs an override store".to_string(),
            ));
        }

        let warm_cache = match (&stores.base, options.use_warm_cache && !options.override_only) {
            (Some(base), true) => Some(WarmCache::build(base.as_ref())?),
            _ => None,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                stores,
                options,
                warm_cache,
            }),
        })
    }

    /// Open stores from the config and build.
    pub fn from_config(config: &MixerConfig) -> Result<Self, MixerError> {
        Self::new(Stores::open(config)?, config.options())
    }

    #[must_use]
    pub fn options(&self) -> &MixerOptions {
        &self.inner.options
    }

    #[must_use]
    pub fn warm_cache(&self) -> Option<&WarmCache> {
        self.inner.warm_cache.as_ref()
    }

    /// Row counts of every configured origin.
    pub async fn status(&self) -> StatusReport {
        let stores = &self.inner.stores;
        let mut origins = Vec::new();
        for store in [&stores.override_store, &stores.branch, &stores.base]
            .into_iter()
            .flatten()
        {
            let origin = store.origin();
            let store = Arc::clone(store);
            let counted = tokio::task::spawn_blocking(move || store.row_count())
                .await
                .map_err(|e| MixerError::unavailable(origin, e))
                .and_then(|r| r);
            origins.push(match counted {
                Ok(rows) => OriginStatus {
                    origin,
                    rows: Some(rows),
                    error: None,
                },
                Err(e) => OriginStatus {
                    origin,
                    rows: None,
                    error: Some(e.to_string()),
                },
            });
        }

        let warm = self.warm_cache();
        StatusReport {
            origins,
            query_engine: stores.engine.is_some(),
            warm_cache_entities: warm.map(WarmCache::entity_count),
            warm_cache_places: warm.map(WarmCache::place_count),
            override_only: self.inner.options.override_only,
        }
    }

    fn request_deadline(&self) -> tokio::time::Instant {
        tokio::time::Instant::now() + self.inner.options.deadline
    }

    /// Run one logical query per key, at most `fan_out_limit` at a time.
    ///
    /// Outcomes come back in key order.
    async fn fan_out<K, T, F, Fut>(
        &self,
        keys: Vec<K>,
        task: F,
    ) -> Result<Vec<Outcome<T>>, MixerError>
    where
        K: Send + 'static,
        T: Send + 'static,
        F: Fn(Orchestrator, K) -> Fut,
        Fut: Future<Output = Result<Outcome<T>, MixerError>> + Send + 'static,
    {
        let total = keys.len();
        let semaphore = Arc::new(Semaphore::new(self.inner.options.fan_out_limit));
        let mut set = JoinSet::new();

        for (idx, key) in keys.into_iter().enumerate() {
            let permits = Arc::clone(&semaphore);
            let query = task(self.clone(), key);
            set.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => query.await,
                    Err(e) => Err(MixerError::Io(format!("fan-out semaphore closed: {}", e))),
                };
                (idx, result)
            });
        }

        let mut slots: Vec<Option<Outcome<T>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            let (idx, result) =
                joined.map_err(|e| MixerError::Io(format!("logical query task failed: {}", e)))?;
            if let Some(slot) = slots.get_mut(idx) {
                *slot = Some(result?);
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| MixerError::Io("logical query lost".to_string())))
            .collect()
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Result of one logical query.
#[derive(Debug)]
struct Outcome<T> {
    value: T,
    partial: bool,
    all_failed: bool,
}

impl<T> Outcome<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            partial: self.partial,
            all_failed: self.all_failed,
        }
    }
}

/// Pair outcomes with their entities, failing only if every entity failed.
fn assemble<T>(
    entities: Vec<String>,
    outcomes: Vec<Outcome<T>>,
) -> Result<Merged<EntityMap<T>>, MixerError> {
    if !outcomes.is_empty() && outcomes.iter().all(|o| o.all_failed) {
        return Err(MixerError::AllOriginsFailed(format!(
            "no origin answered for any of {} entities",
            outcomes.len()
        )));
    }
    let partial = outcomes.iter().any(|o| o.partial);
    let payload = entities
        .into_iter()
        .zip(outcomes)
        .map(|(entity, outcome)| (entity, outcome.value))
        .collect();
    Ok(Merged { payload, partial })
}

// =============================================================================
// REQUEST CHECKS
// =============================================================================

/// Validate entity ids and collapse duplicates to their first occurrence.
fn entity_list(what: &str, ids: &[String]) -> Result<Vec<String>, MixerError> {
    if ids.is_empty() {
        return Err(MixerError::InvalidRequest(format!("{} must not be empty", what)));
    }
    let mut seen = BTreeSet::new();
    let mut unique = Vec::with_capacity(ids.len());
    for id in ids {
        non_empty(what, id)?;
        if seen.insert(id.as_str()) {
            unique.push(id.clone());
        }
    }
    if unique.len() > MAX_ENTITIES_PER_REQUEST {
        return Err(MixerError::InvalidRequest(format!(
            "{} has {} ids, maximum is {}",
            what,
            unique.len(),
            MAX_ENTITIES_PER_REQUEST
        )));
    }
    Ok(unique)
}

fn non_empty(what: &str, value: &str) -> Result<(), MixerError> {
    if value.trim().is_empty() {
        return Err(MixerError::InvalidRequest(format!("{} must not be empty", what)));
    }
    if value.len() > MAX_COMPONENT_LENGTH {
        return Err(MixerError::InvalidRequest(format!(
            "{} exceeds {} bytes",
            what, MAX_COMPONENT_LENGTH
        )));
    }
    Ok(())
}
