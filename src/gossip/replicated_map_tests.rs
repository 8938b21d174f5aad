use super::replicated_map::ReplicatedMap;
use crate::node::id::NodeId;

type TestMap = ReplicatedMap<String, u8>;

/// Tests that for all states a, b and c, merging b into a and then c into a is equivalent to
/// merging c into b and then b into a, i.e. that the merge function is associative. This is the
/// first important property of state-based CRDTs. Commutativity and idempotence are tested below.
///
/// We could express associativity as "for all states a, b and c, merge(merge(a, b), c) =
/// merge(a, merge(b, c))", except that here we mutate state rather than returning an immutable
/// state, so "merge" is not quite exactly a function in the mathematical sense. Replica identity
/// and local clocks legitimately differ between the two sides, so we compare shipped states.
#[quickcheck]
fn merge_test_associativity(mut a: TestMap, mut b: TestMap, c: TestMap) -> bool {
    let merged_a_and_b_first = {
        let mut res = a.clone();
        res.merge(&b.state());
        res.merge(&c.state());
        res
    };
    let merged_b_and_c_first = {
        b.merge(&c.state());
        a.merge(&b.state());
        a
    };
    merged_a_and_b_first.state() == merged_b_and_c_first.state()
}

/// Tests that for all states a and b, merging a into b is equivalent to merging b into a,
/// i.e. that merging is commutative.
#[quickcheck]
fn merge_test_commutativity(a: TestMap, mut b: TestMap) -> bool {
    let merged_a_b = {
        let mut a = a.clone();
        a.merge(&b.state());
        a
    };
    let merged_b_a = {
        b.merge(&a.state());
        b
    };
    merged_a_b.state() == merged_b_a.state()
}

/// Tests that for all states a and b, once we have merged b into a, merging b again into the
/// resulting state is a no-op, i.e. that merging is idempotent.
#[quickcheck]
fn merge_test_idempotence(mut a: TestMap, b: TestMap) -> bool {
    let merged_a_b = {
        a.merge(&b.state());
        a
    };
    let merged_a_b_b = {
        let mut merged_a_b = merged_a_b.clone();
        merged_a_b.merge(&b.state());
        merged_a_b
    };
    merged_a_b.state() == merged_a_b_b.state()
}

/// Merging a map's own state back into it changes nothing and says so.
#[quickcheck]
fn merge_own_state_reports_no_change(mut a: TestMap) -> bool {
    let state = a.state();
    !a.merge(&state)
}

fn two_replicas() -> (NodeId, NodeId) {
    let a = NodeId::random();
    let b = NodeId::random();
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Two concurrent writes of the same key with the same timestamp resolve to the same
/// winner on both replicas: the one written by the greater replica id.
#[test]
fn concurrent_writes_resolve_deterministically() {
    let (lower, higher) = two_replicas();
    let mut on_lower = ReplicatedMap::new(lower);
    let mut on_higher = ReplicatedMap::new(higher);

    on_lower.apply_add("svc".to_string(), 1u8);
    on_higher.apply_add("svc".to_string(), 2u8);

    on_lower.merge(&on_higher.state());
    on_higher.merge(&on_lower.state());

    assert_eq!(on_lower.read(), on_higher.read());
    assert_eq!(on_lower.read().get("svc"), Some(&2));
}

/// A tombstone suppresses a concurrent add carrying the same timestamp, even when the
/// removing replica has the lower id.
#[test]
fn tombstone_outranks_concurrent_add_with_equal_timestamp() {
    let (lower, higher) = two_replicas();
    let mut removing = ReplicatedMap::<String, u8>::new(lower);
    let mut adding = ReplicatedMap::new(higher);

    removing.apply_remove("svc".to_string());
    adding.apply_add("svc".to_string(), 7u8);

    removing.merge(&adding.state());
    adding.merge(&removing.state());

    assert!(removing.read().is_empty());
    assert!(adding.read().is_empty());
}

/// An add stamped after a removal was observed resurrects the key: the merged-in
/// tombstone advances the local Lamport clock, so the next local write outranks it.
#[test]
fn later_add_resurrects_removed_key() {
    let (a, b) = two_replicas();
    let mut origin = ReplicatedMap::new(a);
    origin.apply_add("svc".to_string(), 1u8);
    origin.apply_remove("svc".to_string());

    let mut other = ReplicatedMap::new(b);
    other.merge(&origin.state());
    assert!(other.read().is_empty());

    other.apply_add("svc".to_string(), 9u8);
    origin.merge(&other.state());

    assert_eq!(origin.read().get("svc"), Some(&9));
    assert_eq!(other.read().get("svc"), Some(&9));
}

/// Removing a key the map has never seen is a no-op from the reader's perspective.
#[test]
fn remove_of_absent_key_is_harmless() {
    let (a, _) = two_replicas();
    let mut map = ReplicatedMap::<String, u8>::new(a);
    map.apply_remove("missing".to_string());
    assert!(map.read().is_empty());
}

/// A delta carrying a single entry converges the same way the full state does.
#[test]
fn one_entry_delta_merges_like_full_state() {
    let (a, b) = two_replicas();
    let mut origin = ReplicatedMap::new(a);
    origin.apply_add("left".to_string(), 1u8);
    let (key, entry) = origin.apply_add("right".to_string(), 2u8);

    let mut other = ReplicatedMap::new(b);
    other.merge(&super::replicated_map::State::from([(key, entry)]));

    assert_eq!(other.read().get("right"), Some(&2));
    assert_eq!(other.read().get("left"), None);

    other.merge(&origin.state());
    assert_eq!(other.read(), origin.read());
}
