use std::{marker::PhantomData, time::Duration};

use tokio::sync::{broadcast, mpsc};

use crate::{
    gossip::{ChannelRole, GossipChannel},
    node::{id::NodeId, NodeEndpoints},
    Coordinator, Horde,
};

/// Configures and starts a [Horde] coordinator with its two gossip channels.
pub struct HordeBuilder<M> {
    anti_entropy_interval: Duration,
    events_capacity: usize,
    _message: PhantomData<M>,
}

impl<M: Send + 'static> HordeBuilder<M> {
    pub fn new() -> Self {
        Self {
            anti_entropy_interval: Duration::from_secs(1),
            events_capacity: 16,
            _message: PhantomData,
        }
    }

    /// How often the coordinator pushes both channels' full state to every neighbour.
    /// This is the heartbeat that repairs convergence after lost messages; merging is
    /// idempotent, so a short interval costs bandwidth but never correctness.
    pub fn with_anti_entropy_interval(mut self, interval: Duration) -> Self {
        self.anti_entropy_interval = interval;
        self
    }

    /// Capacity of the [events](Horde::events) broadcast buffer.
    pub fn with_events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = capacity;
        self
    }

    /// Draws a fresh [NodeId], spawns the membership and registry channels and the
    /// coordinator task, and returns a handle on the new singleton horde.
    ///
    /// Must be called within a Tokio runtime. The three tasks stop when every handle
    /// is dropped; restarting after a crash is the caller's supervision concern, and
    /// a restarted instance must be joined to the horde again.
    pub fn build(self) -> Horde<M> {
        let node_id = NodeId::random();
        let (events_sender, _) = broadcast::channel(self.events_capacity);
        let (commands_sender, commands_receiver) = mpsc::unbounded_channel();
        let (notifications_sender, notifications_receiver) = mpsc::unbounded_channel();

        let membership = GossipChannel::spawn(
            node_id,
            ChannelRole::Membership,
            notifications_sender.clone(),
        );
        let registry = GossipChannel::spawn(node_id, ChannelRole::Registry, notifications_sender);
        let endpoints = NodeEndpoints {
            membership,
            registry,
        };

        let coordinator = Coordinator {
            node_id,
            endpoints,
            members: Default::default(),
            processes: Default::default(),
            commands: commands_receiver,
            notifications: notifications_receiver,
            events: events_sender.clone(),
            anti_entropy: tokio::time::interval(self.anti_entropy_interval),
        };
        tokio::spawn(coordinator.run());

        Horde {
            node_id,
            commands: commands_sender,
            events: events_sender,
        }
    }
}

impl<M: Send + 'static> Default for HordeBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}
