use std::fmt;

use crate::gossip::GossipEndpoint;
use crate::process::ProcessRef;

use self::id::NodeId;

pub mod id {
    #[cfg(test)]
    use quickcheck::Arbitrary;

    /// A [NodeId] is a 128-bit random value identifying a single replica.
    ///
    /// It is drawn once, when a coordinator starts, and lives for as long as the coordinator does.
    /// A restarted coordinator is a brand new replica with a brand new id.
    #[repr(transparent)]
    #[derive(Copy, Clone, PartialEq, PartialOrd, Eq, Ord, Debug, Hash)]
    pub struct NodeId(u128);

    impl NodeId {
        /// Draws a fresh random id. A collision between two replicas is an accepted
        /// residual risk and is not handled defensively.
        pub(crate) fn random() -> Self {
            Self(rand::random())
        }

        pub fn to_u128(&self) -> u128 {
            self.0
        }
    }

    #[cfg(test)]
    impl Arbitrary for NodeId {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            NodeId(u128::arbitrary(g))
        }
    }
}

/// The pair of gossip endpoints a node publishes in the membership map.
///
/// Peers that learn about this node through a merge use these endpoints to grow
/// the neighbour sets of their own membership and registry channels, which is how
/// pairwise joins turn into a full mesh.
pub struct NodeEndpoints<M> {
    pub membership: GossipEndpoint<NodeId, NodeEndpoints<M>>,
    pub registry: GossipEndpoint<String, ProcessRef<M>>,
}

impl<M> Clone for NodeEndpoints<M> {
    fn clone(&self) -> Self {
        Self {
            membership: self.membership.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<M> fmt::Debug for NodeEndpoints<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeEndpoints").finish_non_exhaustive()
    }
}
