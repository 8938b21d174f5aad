use std::collections::BTreeMap;

#[cfg(test)]
use quickcheck::Arbitrary;

use crate::node::id::NodeId;

/// The full, shippable state of a [ReplicatedMap]: every key it knows about,
/// live or tombstoned, together with its causal metadata. A delta is a [State]
/// containing only some of the keys.
pub type State<K, V> = BTreeMap<K, VersionedEntry<V>>;

/// Causal metadata attached to every entry: a Lamport timestamp plus the replica
/// that wrote the entry, used as a tie-break so that concurrent writes of the same
/// key resolve identically on every replica.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct Dot {
    pub clock: u64,
    pub replica: NodeId,
}

/// A single [ReplicatedMap] entry. A `None` value is a tombstone: it participates
/// in the ordering like any other entry and suppresses adds with an equal or lower
/// timestamp, while an add with a higher timestamp resurrects the key.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct VersionedEntry<V> {
    pub dot: Dot,
    pub value: Option<V>,
}

impl<V> VersionedEntry<V> {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// The total order used by [merge](ReplicatedMap::merge): timestamp first,
    /// then tombstones over live values, then the writing replica as a final
    /// tie-break. Ordering two entries never depends on which replica does the
    /// comparison, which is what makes merging commutative.
    fn precedence(&self) -> (u64, bool, NodeId) {
        (self.dot.clock, self.is_tombstone(), self.dot.replica)
    }

    pub(crate) fn supersedes(&self, other: &Self) -> bool {
        self.precedence() > other.precedence()
    }
}

/// A delta-state replicated map with add-wins/last-writer-wins conflict resolution.
///
/// Every local mutation stamps the touched entry with a fresh [Dot]; remote states
/// are folded in with [merge](ReplicatedMap::merge), a commutative, associative and
/// idempotent function, so replicas converge no matter how often, in what order, or
/// how redundantly states are exchanged. No acknowledgement or global ordering is
/// required between replicas.
#[derive(Clone, Debug)]
pub struct ReplicatedMap<K, V> {
    replica: NodeId,
    clock: u64,
    entries: State<K, V>,
}

impl<K, V> ReplicatedMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    pub fn new(replica: NodeId) -> Self {
        Self {
            replica,
            clock: 0,
            entries: BTreeMap::new(),
        }
    }

    fn next_dot(&mut self) -> Dot {
        self.clock += 1;
        Dot {
            clock: self.clock,
            replica: self.replica,
        }
    }

    /// Writes a value under `key` and returns the one-entry delta to ship.
    pub fn apply_add(&mut self, key: K, value: V) -> (K, VersionedEntry<V>) {
        let entry = VersionedEntry {
            dot: self.next_dot(),
            value: Some(value),
        };
        self.entries.insert(key.clone(), entry.clone());
        (key, entry)
    }

    /// Writes a tombstone under `key` and returns the one-entry delta to ship.
    /// Removing a key this map has never seen is not an error.
    pub fn apply_remove(&mut self, key: K) -> (K, VersionedEntry<V>) {
        let entry = VersionedEntry {
            dot: self.next_dot(),
            value: None,
        };
        self.entries.insert(key.clone(), entry.clone());
        (key, entry)
    }

    /// Folds a remote state (or delta) into this map, keeping, for every key, the
    /// entry that takes precedence under the total order described on
    /// [VersionedEntry]. Returns whether the local state changed at all.
    ///
    /// The local Lamport clock is advanced past every observed timestamp so that
    /// subsequent local writes outrank everything this replica has already seen.
    pub fn merge(&mut self, remote: &State<K, V>) -> bool {
        let mut changed = false;
        for (key, incoming) in remote {
            self.clock = self.clock.max(incoming.dot.clock);
            match self.entries.get(key) {
                Some(current) if !incoming.supersedes(current) => (),
                _ => {
                    self.entries.insert(key.clone(), incoming.clone());
                    changed = true;
                }
            }
        }
        changed
    }

    /// The materialized mapping: every live (non-tombstoned) key and its winning value.
    pub fn read(&self) -> BTreeMap<K, V> {
        self.entries
            .iter()
            .filter_map(|(key, entry)| entry.value.as_ref().map(|value| (key.clone(), value.clone())))
            .collect()
    }

    /// A full snapshot of the map, tombstones included, suitable for anti-entropy shipping.
    pub fn state(&self) -> State<K, V> {
        self.entries.clone()
    }
}

#[cfg(test)]
impl Arbitrary for Dot {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Self {
            clock: u64::arbitrary(g),
            replica: NodeId::arbitrary(g),
        }
    }
}

#[cfg(test)]
impl<V: Arbitrary> Arbitrary for VersionedEntry<V> {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Self {
            dot: Dot::arbitrary(g),
            value: Option::<V>::arbitrary(g),
        }
    }
}

/// Generates an arbitrary map whose local clock is ahead of every entry it holds,
/// which is the invariant [ReplicatedMap::next_dot] relies on.
#[cfg(test)]
impl<K, V> Arbitrary for ReplicatedMap<K, V>
where
    K: Arbitrary + Ord,
    V: Arbitrary,
{
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        let entries = State::<K, V>::arbitrary(g);
        let clock = entries.values().map(|entry| entry.dot.clock).max().unwrap_or(0);
        Self {
            replica: NodeId::arbitrary(g),
            clock,
            entries,
        }
    }
}
