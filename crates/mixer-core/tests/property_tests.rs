//! # Property-Based Tests
//!
//! Codec bijectivity and merge determinism invariants.

use mixer_core::codec::{self, RowKind};
use mixer_core::{Direction, MergePolicy, Node, Origin, OriginBatch, merge, merge_with_groups};
use proptest::collection::vec;
use proptest::prelude::*;

fn kind() -> impl Strategy<Value = RowKind> {
    prop::sample::select(RowKind::ALL.to_vec())
}

fn direction() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Out), Just(Direction::In)]
}

fn origin() -> impl Strategy<Value = Origin> {
    prop::sample::select(Origin::BY_PRECEDENCE.to_vec())
}

/// Components drawn from a small alphabet rich in separators and escapes.
fn component() -> impl Strategy<Value = String> {
    "[a-c/\\^\\\\]{0,8}"
}

fn node() -> impl Strategy<Value = Node> {
    ("[a-f]{1,2}", prop::option::of("[A-C]"), prop::option::of("[xyz]")).prop_map(
        |(dcid, type_name, name)| Node::entity(dcid, name, type_name.into_iter().collect()),
    )
}

fn batches() -> impl Strategy<Value = Vec<(Origin, u64, Vec<Node>)>> {
    vec((origin(), 0u64..4, vec(node(), 0..8)), 0..6)
}

fn build(batches: &[(Origin, u64, Vec<Node>)]) -> Vec<OriginBatch<Node>> {
    batches
        .iter()
        .map(|(origin, revision, nodes)| OriginBatch::fetched(*origin, *revision, nodes.clone()))
        .collect()
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Every valid tuple decodes back to itself.
    #[test]
    fn codec_roundtrip(
        kind in kind(),
        entity in component(),
        predicate in component(),
        direction in direction(),
        type_filter in component(),
    ) {
        let key = codec::encode(kind, &entity, &predicate, direction, &type_filter);
        let parts = codec::decode(&key).expect("decode");
        prop_assert_eq!(parts.kind, kind);
        prop_assert_eq!(parts.entity, entity);
        prop_assert_eq!(parts.predicate, predicate);
        prop_assert_eq!(parts.direction, direction);
        prop_assert_eq!(parts.type_filter, type_filter);
    }

    /// Distinct tuples never share a key.
    #[test]
    fn codec_collision_free(
        a in (component(), component(), component()),
        b in (component(), component(), component()),
    ) {
        let ka = codec::encode(RowKind::PropertyValues, &a.0, &a.1, Direction::Out, &a.2);
        let kb = codec::encode(RowKind::PropertyValues, &b.0, &b.1, Direction::Out, &b.2);
        prop_assert_eq!(ka == kb, a == b);
    }

    /// Merging is insensitive to the order in which origins completed.
    #[test]
    fn merge_ignores_batch_order(input in batches()) {
        let mut by_origin = input.clone();
        by_origin.sort_by_key(|(origin, _, _)| *origin);

        let shuffled = merge(build(&input), &MergePolicy::default()).expect("merge");
        let ordered = merge(build(&by_origin), &MergePolicy::default()).expect("merge");
        prop_assert_eq!(shuffled, ordered);
    }

    /// Output identities are unique.
    #[test]
    fn merge_deduplicates(input in batches()) {
        let items = merge(build(&input), &MergePolicy::default()).expect("merge").into_items();
        let mut ids: Vec<&str> = items.iter().map(Node::identity).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), total);
    }

    /// A limited merge is a per-group prefix of the unlimited merge.
    #[test]
    fn limit_is_stable_prefix(input in batches(), limit in 1usize..4) {
        let group = |n: &Node| n.type_key().to_string();
        let full = merge_with_groups(build(&input), &MergePolicy::default(), group)
            .expect("merge")
            .into_items();
        let limited = merge_with_groups(build(&input), &MergePolicy::with_limit(limit), group)
            .expect("merge")
            .into_items();

        let mut counts = std::collections::BTreeMap::new();
        let expected: Vec<Node> = full
            .into_iter()
            .filter(|n| {
                let count = counts.entry(group(n)).or_insert(0usize);
                *count += 1;
                *count <= limit
            })
            .collect();
        prop_assert_eq!(limited, expected);
    }
}
