//! # Merge Engine
//!
//! Reconciles per-origin partial results for one logical query into one
//! canonical list.
//!
//! The merge is a pure function of its inputs:
//! 1. Batches are put in precedence order (override, branch, base, query engine).
//! 2. Candidates are partitioned by identity.
//! 3. Each identity keeps the record from the highest-precedence origin; within
//!    an origin the higher revision wins, then the earlier input.
//! 4. Output follows the first-seen order of identities.
//! 5. A positive limit keeps a stable prefix of each group.
//!
//! Failed origins are dropped and flag the outcome as partial. With a strict
//! override policy a failed override origin fails the whole merge.

use crate::types::{MixerError, Node, Observation, Origin, SourceRecord, Triple};
use std::collections::BTreeMap;

// =============================================================================
// MERGEABLE
// =============================================================================

/// A payload item the merge engine can de-duplicate.
pub trait Mergeable {
    type Identity: Ord;

    /// Natural identity; two items with the same identity are the same fact.
    fn identity(&self) -> Self::Identity;

    /// Measurement method, for items that have one.
    fn measurement_method(&self) -> Option<&str> {
        None
    }
}

impl Mergeable for Node {
    type Identity = String;

    fn identity(&self) -> String {
        Node::identity(self).to_string()
    }
}

impl Mergeable for Triple {
    type Identity = (String, String, String);

    fn identity(&self) -> Self::Identity {
        (
            self.subject_id.clone(),
            self.predicate.clone(),
            self.object_key().to_string(),
        )
    }
}

impl Mergeable for Observation {
    type Identity = (String, String, String, String);

    fn identity(&self) -> Self::Identity {
        (
            self.stat_var.clone(),
            self.place.clone(),
            self.date.clone(),
            self.method().to_string(),
        )
    }

    fn measurement_method(&self) -> Option<&str> {
        Some(self.method())
    }
}

/// Predicate labels and stat var names.
impl Mergeable for String {
    type Identity = String;

    fn identity(&self) -> String {
        self.clone()
    }
}

// =============================================================================
// INPUTS AND OUTPUTS
// =============================================================================

/// How to reconcile one logical query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergePolicy {
    /// Maximum items per group; 0 means unbounded.
    pub limit: usize,
    /// Fail the merge if the override origin failed.
    pub strict_override: bool,
    /// Keep only observations with this method.
    pub measurement_method: Option<String>,
}

impl MergePolicy {
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }
}

/// What one origin produced.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome<T> {
    Fetched(Vec<SourceRecord<T>>),
    Failed(MixerError),
}

/// One origin's contribution to a merge.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginBatch<T> {
    pub origin: Origin,
    pub outcome: BatchOutcome<T>,
}

impl<T> OriginBatch<T> {
    /// A successful batch; every item is tagged with `origin` and `revision`.
    #[must_use]
    pub fn fetched(origin: Origin, revision: u64, items: impl IntoIterator<Item = T>) -> Self {
        Self {
            origin,
            outcome: BatchOutcome::Fetched(
                items
                    .into_iter()
                    .map(|item| SourceRecord::new(origin, revision, item))
                    .collect(),
            ),
        }
    }

    #[must_use]
    pub fn records(origin: Origin, records: Vec<SourceRecord<T>>) -> Self {
        Self {
            origin,
            outcome: BatchOutcome::Fetched(records),
        }
    }

    #[must_use]
    pub fn failed(origin: Origin, error: MixerError) -> Self {
        Self {
            origin,
            outcome: BatchOutcome::Failed(error),
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, BatchOutcome::Failed(_))
    }
}

/// The canonical result of a merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome<T> {
    pub items: Vec<SourceRecord<T>>,
    /// At least one origin failed.
    pub partial: bool,
    /// Every queried origin failed.
    pub all_failed: bool,
    /// Origins that failed, in precedence order.
    pub failed: Vec<Origin>,
}

impl<T> MergeOutcome<T> {
    /// Drop provenance and keep the payload items.
    #[must_use]
    pub fn into_items(self) -> Vec<T> {
        self.items.into_iter().map(|r| r.item).collect()
    }
}

// =============================================================================
// MERGE
// =============================================================================

/// Merge with a single limit group.
pub fn merge<T: Mergeable>(
    batches: Vec<OriginBatch<T>>,
    policy: &MergePolicy,
) -> Result<MergeOutcome<T>, MixerError> {
    merge_with_groups(batches, policy, |_| ())
}

/// Merge, applying `policy.limit` to each group produced by `group_of`.
pub fn merge_with_groups<T, G, F>(
    mut batches: Vec<OriginBatch<T>>,
    policy: &MergePolicy,
    group_of: F,
) -> Result<MergeOutcome<T>, MixerError>
where
    T: Mergeable,
    G: Ord,
    F: Fn(&T) -> G,
{
    // Stable: batches from the same origin keep their input order.
    batches.sort_by_key(|b| b.origin);
    let queried = batches.len();

    let mut failed = Vec::new();
    let mut items: Vec<SourceRecord<T>> = Vec::new();
    let mut positions: BTreeMap<T::Identity, usize> = BTreeMap::new();

    for batch in batches {
        let records = match batch.outcome {
            BatchOutcome::Failed(error) => {
                if policy.strict_override && batch.origin == Origin::Override {
                    return Err(error);
                }
                tracing::warn!(origin = %batch.origin, error = %error, "dropping failed origin");
                failed.push(batch.origin);
                continue;
            }
            BatchOutcome::Fetched(records) => records,
        };

        for record in records {
            if let Some(wanted) = policy.measurement_method.as_deref()
                && record.item.measurement_method().is_some_and(|m| m != wanted)
            {
                continue;
            }

            let identity = record.item.identity();
            match positions.get(&identity) {
                None => {
                    positions.insert(identity, items.len());
                    items.push(record);
                }
                Some(&at) => {
                    let held = &items[at];
                    let wins = record.origin.precedence() > held.origin.precedence()
                        || (record.origin == held.origin && record.revision > held.revision);
                    if wins {
                        items[at] = record;
                    }
                }
            }
        }
    }

    if policy.limit > 0 {
        let mut counts: BTreeMap<G, usize> = BTreeMap::new();
        items.retain(|record| {
            let count = counts.entry(group_of(&record.item)).or_insert(0);
            *count = count.saturating_add(1);
            *count <= policy.limit
        });
    }

    Ok(MergeOutcome {
        items,
        partial: !failed.is_empty(),
        all_failed: queried > 0 && failed.len() == queried,
        failed,
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn named(dcid: &str, name: &str) -> Node {
        Node::entity(dcid, Some(name.to_string()), vec![])
    }

    fn obs(date: &str, value: f64, method: Option<&str>) -> Observation {
        Observation {
            stat_var: "Count_Person".into(),
            place: "geoId/06".into(),
            date: date.into(),
            value,
            measurement_method: method.map(str::to_string),
            observation_period: None,
            unit: None,
            import_name: None,
        }
    }

    #[test]
    fn override_beats_branch_beats_base() {
        let batches = vec![
            OriginBatch::fetched(Origin::Base, 1, vec![named("a", "base")]),
            OriginBatch::fetched(Origin::Override, 0, vec![named("a", "override")]),
            OriginBatch::fetched(Origin::Branch, 2, vec![named("a", "branch")]),
        ];
        let outcome = merge(batches, &MergePolicy::default()).expect("merge");
        let items = outcome.into_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name.as_deref(), Some("override"));
    }

    #[test]
    fn completion_order_does_not_matter() {
        let make = |order: [Origin; 3]| {
            order
                .into_iter()
                .map(|origin| {
                    OriginBatch::fetched(
                        origin,
                        1,
                        vec![named(origin.as_str(), "x"), named("shared", origin.as_str())],
                    )
                })
                .collect::<Vec<_>>()
        };
        let a = merge(
            make([Origin::Base, Origin::Branch, Origin::Override]),
            &MergePolicy::default(),
        )
        .expect("merge");
        let b = merge(
            make([Origin::Override, Origin::Base, Origin::Branch]),
            &MergePolicy::default(),
        )
        .expect("merge");
        assert_eq!(a, b);
        let ids: Vec<String> = a.into_items().iter().map(|n| n.identity().to_string()).collect();
        assert_eq!(ids, vec!["override", "shared", "branch", "base"]);
    }

    #[test]
    fn higher_revision_wins_within_origin() {
        let batches = vec![
            OriginBatch::fetched(Origin::Branch, 3, vec![named("a", "old")]),
            OriginBatch::fetched(Origin::Branch, 5, vec![named("a", "new")]),
        ];
        let items = merge(batches, &MergePolicy::default())
            .expect("merge")
            .into_items();
        assert_eq!(items[0].name.as_deref(), Some("new"));
    }

    #[test]
    fn failed_origin_marks_partial() {
        let batches = vec![
            OriginBatch::failed(Origin::Base, MixerError::unavailable(Origin::Base, "down")),
            OriginBatch::fetched(Origin::Branch, 1, vec![named("a", "branch")]),
        ];
        let outcome = merge(batches, &MergePolicy::default()).expect("merge");
        assert!(outcome.partial);
        assert!(!outcome.all_failed);
        assert_eq!(outcome.failed, vec![Origin::Base]);
        assert_eq!(outcome.items.len(), 1);
    }

    #[test]
    fn all_failed_is_reported() {
        let batches: Vec<OriginBatch<Node>> = vec![
            OriginBatch::failed(Origin::Base, MixerError::unavailable(Origin::Base, "down")),
            OriginBatch::failed(Origin::Branch, MixerError::unavailable(Origin::Branch, "down")),
        ];
        let outcome = merge(batches, &MergePolicy::default()).expect("merge");
        assert!(outcome.all_failed);
        assert!(outcome.items.is_empty());
    }

    #[test]
    fn strict_override_failure_is_an_error() {
        let batches: Vec<OriginBatch<Node>> = vec![
            OriginBatch::failed(
                Origin::Override,
                MixerError::unavailable(Origin::Override, "not loaded"),
            ),
            OriginBatch::fetched(Origin::Base, 1, vec![named("a", "base")]),
        ];
        let policy = MergePolicy {
            strict_override: true,
            ..MergePolicy::default()
        };
        assert!(merge(batches.clone(), &policy).is_err());
        assert!(merge(batches, &MergePolicy::default()).is_ok());
    }

    #[test]
    fn limit_applies_per_group() {
        let nodes = vec![
            Node::entity("c1", None, vec!["City".into()]),
            Node::entity("c2", None, vec!["City".into()]),
            Node::entity("k1", None, vec!["County".into()]),
            Node::entity("k2", None, vec!["County".into()]),
        ];
        let batches = vec![OriginBatch::fetched(Origin::Base, 1, nodes)];
        let items = merge_with_groups(batches, &MergePolicy::with_limit(1), |n: &Node| {
            n.type_key().to_string()
        })
        .expect("merge")
        .into_items();
        let ids: Vec<&str> = items.iter().map(Node::identity).collect();
        assert_eq!(ids, vec!["c1", "k1"]);
    }

    #[test]
    fn observations_keep_all_methods_by_default() {
        let batches = vec![OriginBatch::fetched(
            Origin::Base,
            1,
            vec![obs("2020", 1.0, Some("A")), obs("2020", 2.0, Some("B"))],
        )];
        let items = merge(batches.clone(), &MergePolicy::default())
            .expect("merge")
            .into_items();
        assert_eq!(items.len(), 2);

        let preferred = MergePolicy {
            measurement_method: Some("B".into()),
            ..MergePolicy::default()
        };
        let items = merge(batches.clone(), &preferred).expect("merge").into_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].method(), "B");

        let missing = MergePolicy {
            measurement_method: Some("C".into()),
            ..MergePolicy::default()
        };
        assert!(merge(batches, &missing).expect("merge").items.is_empty());
    }
}
