use std::collections::BTreeMap;
use std::fmt;

use tokio::sync::{mpsc, oneshot};

use crate::node::id::NodeId;
use crate::HordeError;

use self::replicated_map::{ReplicatedMap, State};

pub mod replicated_map;

#[cfg(test)]
mod replicated_map_tests;

/// Identifies which of a coordinator's two channels emitted a merge notification.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum ChannelRole {
    Membership,
    Registry,
}

/// A local mutation of a channel's [ReplicatedMap].
pub(crate) enum Op<K, V> {
    Add(K, V),
    Remove(K),
}

/// The mailbox address of a [GossipChannel]. Endpoints are cheap to clone, are
/// stored as values in the membership map, and are what channels ship state to.
pub struct GossipEndpoint<K, V> {
    sender: mpsc::UnboundedSender<ChannelMessage<K, V>>,
}

impl<K, V> GossipEndpoint<K, V> {
    fn send(&self, message: ChannelMessage<K, V>) {
        // A vanished channel is indistinguishable from an unreachable one:
        // the send fails silently and a later ship repairs convergence.
        let _ = self.sender.send(message);
    }

    pub(crate) fn points_to_same_channel(&self, other: &Self) -> bool {
        self.sender.same_channel(&other.sender)
    }

    /// Applies a local mutation and returns the materialized mapping once the
    /// channel has processed it, so the caller can refresh its cache synchronously.
    pub(crate) async fn apply(&self, op: Op<K, V>) -> Result<BTreeMap<K, V>, HordeError> {
        let (reply, receiver) = oneshot::channel();
        self.send(ChannelMessage::Apply { op, reply });
        receiver.await.map_err(|_| HordeError::CoordinatorStopped)
    }

    pub(crate) async fn read(&self) -> Result<BTreeMap<K, V>, HordeError> {
        let (reply, receiver) = oneshot::channel();
        self.send(ChannelMessage::Read { reply });
        receiver.await.map_err(|_| HordeError::CoordinatorStopped)
    }

    pub(crate) fn add_neighbours(&self, endpoints: Vec<GossipEndpoint<K, V>>) {
        self.send(ChannelMessage::AddNeighbours { endpoints });
    }

    /// Requests a full-state push to every neighbour, without waiting for it.
    pub(crate) fn ship(&self) {
        self.send(ChannelMessage::Ship);
    }

    /// Tells the channel task to exit. Only its owning coordinator calls this:
    /// a channel appears in remote neighbour sets and holds an endpoint to its own
    /// mailbox, so it would otherwise outlive every handle as a cycle of senders.
    pub(crate) fn stop(&self) {
        self.send(ChannelMessage::Stop);
    }
}

impl<K, V> Clone for GossipEndpoint<K, V> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<K, V> fmt::Debug for GossipEndpoint<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GossipEndpoint").finish_non_exhaustive()
    }
}

enum ChannelMessage<K, V> {
    Apply {
        op: Op<K, V>,
        reply: oneshot::Sender<BTreeMap<K, V>>,
    },
    AddNeighbours {
        endpoints: Vec<GossipEndpoint<K, V>>,
    },
    Ship,
    Merge {
        state: State<K, V>,
    },
    Read {
        reply: oneshot::Sender<BTreeMap<K, V>>,
    },
    Stop,
}

/// A [GossipChannel] wraps one [ReplicatedMap] with a growing set of neighbour
/// endpoints and an owner to notify.
///
/// Each channel is a single sequential actor: it processes one message at a time
/// from its mailbox, with no locking. Local mutations ship their delta to every
/// neighbour immediately; a [Ship](ChannelMessage::Ship) request pushes the full
/// state instead, which is what periodic anti-entropy relies on. Shipping is
/// fire-and-forget: no acknowledgement is tracked and no retry bookkeeping exists,
/// because merging is idempotent.
pub(crate) struct GossipChannel<K, V> {
    map: ReplicatedMap<K, V>,
    neighbours: Vec<GossipEndpoint<K, V>>,
    self_endpoint: GossipEndpoint<K, V>,
    owner: mpsc::UnboundedSender<ChannelRole>,
    role: ChannelRole,
    mailbox: mpsc::UnboundedReceiver<ChannelMessage<K, V>>,
}

impl<K, V> GossipChannel<K, V>
where
    K: Ord + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Spawns a channel task for `replica` and returns its endpoint. The task runs
    /// until its owning coordinator [stops](GossipEndpoint::stop) it.
    pub(crate) fn spawn(
        replica: NodeId,
        role: ChannelRole,
        owner: mpsc::UnboundedSender<ChannelRole>,
    ) -> GossipEndpoint<K, V> {
        let (sender, mailbox) = mpsc::unbounded_channel();
        let endpoint = GossipEndpoint { sender };
        let channel = Self {
            map: ReplicatedMap::new(replica),
            neighbours: Vec::new(),
            self_endpoint: endpoint.clone(),
            owner,
            role,
            mailbox,
        };
        tokio::spawn(channel.run());
        endpoint
    }

    async fn run(mut self) {
        while let Some(message) = self.mailbox.recv().await {
            match message {
                ChannelMessage::Apply { op, reply } => {
                    let (key, entry) = match op {
                        Op::Add(key, value) => self.map.apply_add(key, value),
                        Op::Remove(key) => self.map.apply_remove(key),
                    };
                    let delta = State::from([(key, entry)]);
                    self.ship(&delta);
                    let _ = reply.send(self.map.read());
                }
                ChannelMessage::AddNeighbours { endpoints } => self.add_neighbours(endpoints),
                ChannelMessage::Ship => self.ship(&self.map.state()),
                ChannelMessage::Merge { state } => {
                    if self.map.merge(&state) {
                        let _ = self.owner.send(self.role);
                    }
                }
                ChannelMessage::Read { reply } => {
                    let _ = reply.send(self.map.read());
                }
                ChannelMessage::Stop => break,
            }
        }
    }

    /// Grows the neighbour set. Adding is idempotent, the channel never ships to
    /// itself, and neighbours are never removed, so full-mesh convergence, once
    /// reached, is never lost.
    fn add_neighbours(&mut self, endpoints: Vec<GossipEndpoint<K, V>>) {
        for endpoint in endpoints {
            if endpoint.points_to_same_channel(&self.self_endpoint) {
                continue;
            }
            if self
                .neighbours
                .iter()
                .any(|neighbour| neighbour.points_to_same_channel(&endpoint))
            {
                continue;
            }
            self.neighbours.push(endpoint);
        }
        log::debug!(
            "{:?} channel now ships to {} neighbour(s)",
            self.role,
            self.neighbours.len()
        );
    }

    fn ship(&self, state: &State<K, V>) {
        for neighbour in &self.neighbours {
            neighbour.send(ChannelMessage::Merge {
                state: state.clone(),
            });
        }
    }
}
