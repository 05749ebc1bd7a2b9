//! # Authoritative Query Engine
//!
//! The source-of-truth accessor consulted when no cache origin holds a key,
//! and for every reconciliation request.
//!
//! Queries are a closed set of parameterized templates. Every call is bounded
//! by a deadline; an engine that cannot answer in time reports
//! `QueryEngineTimeout` and the caller degrades to a partial result.

use crate::records::TripleIndex;
use crate::types::{Direction, MixerError, Node, Observation, PropertyLabels, Triple};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

/// A parameterized query template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineQuery {
    Neighbors {
        entity: String,
        predicate: String,
        direction: Direction,
        type_filter: Option<String>,
    },
    Triples {
        entity: String,
    },
    Observations {
        place: String,
        stat_var: String,
    },
    PropertyLabels {
        entity: String,
    },
    StatVars {
        place: String,
    },
    ReconMatch {
        in_property: String,
        out_property: String,
        values: Vec<String>,
    },
}

impl EngineQuery {
    /// Template name, for logs.
    #[must_use]
    pub fn template(&self) -> &'static str {
        match self {
            Self::Neighbors { .. } => "neighbors",
            Self::Triples { .. } => "triples",
            Self::Observations { .. } => "observations",
            Self::PropertyLabels { .. } => "property_labels",
            Self::StatVars { .. } => "stat_vars",
            Self::ReconMatch { .. } => "recon_match",
        }
    }
}

/// Rows returned for a template, shaped like the matching cache payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineRows {
    Neighbors(Vec<Node>),
    Triples(Vec<Triple>),
    Observations(Vec<Observation>),
    PropertyLabels(PropertyLabels),
    StatVars(Vec<String>),
    Recon(BTreeMap<String, Vec<String>>),
}

/// Source-of-truth query capability.
pub trait QueryEngine: Send + Sync {
    /// Run one template, giving up at `deadline`.
    fn query(&self, query: &EngineQuery, deadline: Instant) -> Result<EngineRows, MixerError>;
}

// =============================================================================
// TRIPLE TABLE ENGINE
// =============================================================================

/// An in-process engine over the full record export.
#[derive(Debug, Clone)]
pub struct TripleTableEngine {
    index: TripleIndex,
    latency: Duration,
}

impl TripleTableEngine {
    #[must_use]
    pub fn new(index: TripleIndex) -> Self {
        Self {
            index,
            latency: Duration::ZERO,
        }
    }

    /// Load the source table from an export file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MixerError> {
        Ok(Self::new(TripleIndex::from_path(path)?))
    }

    /// Add a fixed delay to every query.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    #[must_use]
    pub fn index(&self) -> &TripleIndex {
        &self.index
    }
}

impl QueryEngine for TripleTableEngine {
    fn query(&self, query: &EngineQuery, deadline: Instant) -> Result<EngineRows, MixerError> {
        let started = Instant::now();

        if !self.latency.is_zero() {
            let budget = deadline.saturating_duration_since(started);
            std::thread::sleep(self.latency.min(budget));
        }
        if Instant::now() >= deadline {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            tracing::warn!(
                template = query.template(),
                elapsed_ms,
                "query engine deadline expired"
            );
            return Err(MixerError::QueryEngineTimeout { elapsed_ms });
        }

        Ok(match query {
            EngineQuery::Neighbors {
                entity,
                predicate,
                direction,
                type_filter,
            } => EngineRows::Neighbors(self.index.neighbors(
                entity,
                predicate,
                *direction,
                type_filter.as_deref(),
            )),
            EngineQuery::Triples { entity } => EngineRows::Triples(self.index.triples(entity)),
            EngineQuery::Observations { place, stat_var } => {
                EngineRows::Observations(self.index.observations(place, stat_var))
            }
            EngineQuery::PropertyLabels { entity } => {
                EngineRows::PropertyLabels(self.index.property_labels(entity))
            }
            EngineQuery::StatVars { place } => EngineRows::StatVars(self.index.stat_vars(place)),
            EngineQuery::ReconMatch {
                in_property,
                out_property,
                values,
            } => EngineRows::Recon(self.index.resolve(in_property, out_property, values)),
        })
    }
}
