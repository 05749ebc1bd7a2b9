//! # Warm Cache
//!
//! Existence indexes over Base, built once before serving:
//! - entity -> predicates known in each direction
//! - place -> stat vars with data
//!
//! The cache is immutable after `build`; a rebuild means a restart.

use crate::codec::{self, Payload, RowKind};
use crate::storage::{decode_row, RowStore};
use crate::types::{Direction, MixerError, PropertyLabels};
use std::collections::{BTreeMap, BTreeSet};

static NO_STAT_VARS: BTreeSet<String> = BTreeSet::new();

#[derive(Debug, Clone, Default)]
pub struct WarmCache {
    labels: BTreeMap<String, PropertyLabels>,
    stat_vars: BTreeMap<String, BTreeSet<String>>,
}

impl WarmCache {
    /// Scan `base` for label and stat-var index rows.
    ///
    /// Fails with `WarmCacheBuildFailure` if the store cannot be scanned.
    /// Rows that do not decode are skipped.
    pub fn build(base: &dyn RowStore) -> Result<Self, MixerError> {
        let origin = base.origin();
        let mut cache = Self::default();
        let mut skipped = 0usize;

        let label_rows = base
            .scan_kind(RowKind::PropertyLabels)
            .map_err(|e| MixerError::WarmCacheBuildFailure(e.to_string()))?;
        for (key, row) in &label_rows {
            let entity = match codec::decode(key) {
                Ok(parts) => parts.entity,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping undecodable warm-up key");
                    skipped = skipped.saturating_add(1);
                    continue;
                }
            };
            match decode_row(origin, RowKind::PropertyLabels, key, row) {
                Some(Payload::PropertyLabels(labels)) => {
                    cache.labels.insert(entity, normalized(labels));
                }
                _ => skipped = skipped.saturating_add(1),
            }
        }

        let stat_var_rows = base
            .scan_kind(RowKind::StatVars)
            .map_err(|e| MixerError::WarmCacheBuildFailure(e.to_string()))?;
        for (key, row) in &stat_var_rows {
            let place = match codec::decode(key) {
                Ok(parts) => parts.entity,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping undecodable warm-up key");
                    skipped = skipped.saturating_add(1);
                    continue;
                }
            };
            match decode_row(origin, RowKind::StatVars, key, row) {
                Some(Payload::StatVars(vars)) => {
                    cache.stat_vars.insert(place, vars.into_iter().collect());
                }
                _ => skipped = skipped.saturating_add(1),
            }
        }

        tracing::info!(
            entities = cache.labels.len(),
            places = cache.stat_vars.len(),
            skipped,
            "warm cache built"
        );
        Ok(cache)
    }

    /// Whether Base knows `predicate` for `entity` in either direction.
    #[must_use]
    pub fn contains(&self, entity: &str, predicate: &str) -> bool {
        self.contains_directed(entity, predicate, Direction::Out)
            || self.contains_directed(entity, predicate, Direction::In)
    }

    #[must_use]
    pub fn contains_directed(&self, entity: &str, predicate: &str, direction: Direction) -> bool {
        self.labels.get(entity).is_some_and(|labels| {
            labels
                .labels(direction)
                .binary_search_by(|p| p.as_str().cmp(predicate))
                .is_ok()
        })
    }

    /// Base's labels for `entity`, if Base holds the entity at all.
    #[must_use]
    pub fn labels(&self, entity: &str) -> Option<&PropertyLabels> {
        self.labels.get(entity)
    }

    #[must_use]
    pub fn known_stat_vars(&self, place: &str) -> &BTreeSet<String> {
        self.stat_vars.get(place).unwrap_or(&NO_STAT_VARS)
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn place_count(&self) -> usize {
        self.stat_vars.len()
    }
}

fn normalized(mut labels: PropertyLabels) -> PropertyLabels {
    labels.in_labels.sort();
    labels.in_labels.dedup();
    labels.out_labels.sort();
    labels.out_labels.dedup();
    labels
}
