use std::collections::BTreeMap;

use thiserror::Error;
use tokio::{
    select,
    sync::{broadcast, mpsc, oneshot},
    time::Interval,
};
use tokio_stream::wrappers::BroadcastStream;

use gossip::{ChannelRole, GossipEndpoint, Op};
use node::{id::NodeId, NodeEndpoints};
use process::ProcessRef;

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

mod builder;

pub mod gossip;
pub mod naming;
pub mod node;
pub mod process;


pub use self::builder::*;

/// A handle on one member of a horde: a cluster of coordinators joined, directly or
/// transitively, into a single gossip mesh.
///
/// Each [Horde] owns a coordinator task and two [gossip channels](gossip), one
/// replicating cluster membership and one replicating name registrations. Any node can
/// [register](Horde::register) a name for a locally running process and any other node,
/// including one that joined afterwards, can [resolve](Horde::lookup) it, with no central
/// coordinator and no quorum. Reads are served from a local cache and may be stale during
/// the convergence window; writes on different nodes are never serialized against each
/// other and conflicts resolve through the replicated map's merge rule.
///
/// Every instance is fully self-contained; a single process can run several independent
/// hordes.
pub struct Horde<M> {
    node_id: NodeId,
    commands: mpsc::UnboundedSender<Command<M>>,
    events: broadcast::Sender<HordeEvent>,
}

/// Emitted whenever a merge of remote state changed one of the local caches.
/// Local writes refresh the caches synchronously and do not emit events.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum HordeEvent {
    MembersChanged,
    ProcessesChanged,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Error)]
pub enum HordeError {
    /// The coordinator task behind this handle is no longer running. All of its
    /// membership and registry state is lost; the application must build a fresh
    /// instance and join it to the horde again.
    #[error("the horde coordinator is no longer running")]
    CoordinatorStopped,
}

impl<M: Send + 'static> Horde<M> {
    pub fn builder() -> HordeBuilder<M> {
        HordeBuilder::new()
    }

    /// The random 128-bit id identifying this replica for the lifetime of its coordinator.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// A stream of [HordeEvent]s. Slow subscribers may observe
    /// [lag](tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged) rather than
    /// unbounded buffering; events carry no payload, so a lagging subscriber just re-reads
    /// the caches.
    pub fn events(&self) -> BroadcastStream<HordeEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Registers `name` for the given process reference on this node and returns the
    /// reference once the local registry has recorded it.
    ///
    /// There is no cluster-wide uniqueness check: concurrent registrations of the same
    /// name on different nodes resolve through the merge rule and the loser is silently
    /// superseded.
    pub async fn register(
        &self,
        name: impl Into<String>,
        process: ProcessRef<M>,
    ) -> Result<ProcessRef<M>, HordeError> {
        let name = name.into();
        self.request(|reply| Command::Register {
            name,
            process,
            reply,
        })
        .await
    }

    /// Removes `name` from the registry. Unregistering a name that was never
    /// registered is a no-op.
    pub async fn unregister(&self, name: impl Into<String>) -> Result<(), HordeError> {
        let name = name.into();
        self.request(|reply| Command::Unregister { name, reply }).await
    }

    /// Resolves `name` from the local cache. Never blocks on remote state; the answer
    /// may be stale while a merge is still in flight.
    pub async fn lookup(
        &self,
        name: impl Into<String>,
    ) -> Result<Option<ProcessRef<M>>, HordeError> {
        let name = name.into();
        self.request(|reply| Command::Lookup { name, reply }).await
    }

    /// A snapshot of every known member and its published endpoints.
    pub async fn members(&self) -> Result<BTreeMap<NodeId, NodeEndpoints<M>>, HordeError> {
        self.request(|reply| Command::Members { reply }).await
    }

    /// A snapshot of every known name registration.
    pub async fn processes(&self) -> Result<BTreeMap<String, ProcessRef<M>>, HordeError> {
        self.request(|reply| Command::Processes { reply }).await
    }

    /// Joins this horde with `other`'s. A single pairwise join suffices: every node of
    /// either horde eventually learns about every node of the other through the
    /// membership gossip, with no separate discovery protocol. Convergence is
    /// asynchronous; observe it through [events](Horde::events) or by polling.
    pub fn join(&self, other: &Horde<M>) -> Result<(), HordeError> {
        self.command(Command::Join {
            peer: other.commands.clone(),
        })
    }

    /// Removes this node from the membership map and ships the removal. Fire-and-forget
    /// and irrevocable: no acknowledgement is awaited, and this node's prior name
    /// registrations deliberately remain resolvable (membership and registry are
    /// independent).
    pub async fn leave(&self) -> Result<(), HordeError> {
        self.request(|reply| Command::Leave { reply }).await
    }

    /// Triggers an immediate anti-entropy push of both channels' full state to every
    /// neighbour. The coordinator also does this periodically on its own; this is the
    /// hook for deployments that want to drive the heartbeat themselves.
    pub fn ship_now(&self) -> Result<(), HordeError> {
        self.command(Command::ShipNow)
    }

    fn command(&self, command: Command<M>) -> Result<(), HordeError> {
        self.commands
            .send(command)
            .map_err(|_| HordeError::CoordinatorStopped)
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command<M>,
    ) -> Result<R, HordeError> {
        let (reply, receiver) = oneshot::channel();
        self.command(make(reply))?;
        receiver.await.map_err(|_| HordeError::CoordinatorStopped)
    }
}

impl<M> Clone for Horde<M> {
    fn clone(&self) -> Self {
        Self {
            node_id: self.node_id,
            commands: self.commands.clone(),
            events: self.events.clone(),
        }
    }
}

enum Command<M> {
    Register {
        name: String,
        process: ProcessRef<M>,
        reply: oneshot::Sender<ProcessRef<M>>,
    },
    Unregister {
        name: String,
        reply: oneshot::Sender<()>,
    },
    Lookup {
        name: String,
        reply: oneshot::Sender<Option<ProcessRef<M>>>,
    },
    Members {
        reply: oneshot::Sender<BTreeMap<NodeId, NodeEndpoints<M>>>,
    },
    Processes {
        reply: oneshot::Sender<BTreeMap<String, ProcessRef<M>>>,
    },
    /// Asks the coordinator to introduce itself to a peer coordinator.
    Join {
        peer: mpsc::UnboundedSender<Command<M>>,
    },
    /// Sent by a joining peer: its membership endpoint becomes a neighbour of ours
    /// and receives our membership state immediately.
    JoinRequest {
        from: NodeId,
        membership: GossipEndpoint<NodeId, NodeEndpoints<M>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    ShipNow,
}

/// The coordinator task behind a [Horde] handle.
///
/// A single sequential actor: commands from handles, merge notifications from the two
/// channels and the periodic anti-entropy tick are processed one at a time from ordered
/// queues, with no locking. The `members` and `processes` fields are read-only
/// materialized caches of the two replicated maps, refreshed from channel replies and
/// merge notifications only.
struct Coordinator<M> {
    node_id: NodeId,
    endpoints: NodeEndpoints<M>,
    members: BTreeMap<NodeId, NodeEndpoints<M>>,
    processes: BTreeMap<String, ProcessRef<M>>,
    commands: mpsc::UnboundedReceiver<Command<M>>,
    notifications: mpsc::UnboundedReceiver<ChannelRole>,
    events: broadcast::Sender<HordeEvent>,
    anti_entropy: Interval,
}

impl<M: Send + 'static> Coordinator<M> {
    async fn run(mut self) {
        self.serve().await;
        // The channels survive sender drops on their own: each one addresses its own
        // mailbox and sits in remote neighbour sets, so they are stopped explicitly.
        self.endpoints.membership.stop();
        self.endpoints.registry.stop();
        log::info!("node {:x} coordinator stopped", self.node_id.to_u128());
    }

    async fn serve(&mut self) {
        // Seed the membership map with this node: it is now a singleton horde.
        match self
            .endpoints
            .membership
            .apply(Op::Add(self.node_id, self.endpoints.clone()))
            .await
        {
            Ok(members) => self.members = members,
            Err(_) => return,
        }
        log::info!("node {:x} started as a singleton horde", self.node_id.to_u128());

        loop {
            select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        // Every handle is gone; the coordinator has no caller left.
                        break;
                    };
                    if self.handle_command(command).await.is_err() {
                        break;
                    }
                }
                notification = self.notifications.recv() => {
                    let Some(role) = notification else { break };
                    if self.handle_notification(role).await.is_err() {
                        break;
                    }
                }
                _ = self.anti_entropy.tick() => {
                    self.endpoints.membership.ship();
                    self.endpoints.registry.ship();
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command<M>) -> Result<(), HordeError> {
        match command {
            Command::Register {
                name,
                process,
                reply,
            } => {
                log::debug!("node {:x} registering name {:?}", self.node_id.to_u128(), name);
                self.processes = self
                    .endpoints
                    .registry
                    .apply(Op::Add(name, process.clone()))
                    .await?;
                let _ = reply.send(process);
            }
            Command::Unregister { name, reply } => {
                log::debug!("node {:x} unregistering name {:?}", self.node_id.to_u128(), name);
                self.processes = self.endpoints.registry.apply(Op::Remove(name)).await?;
                let _ = reply.send(());
            }
            Command::Lookup { name, reply } => {
                let _ = reply.send(self.processes.get(&name).cloned());
            }
            Command::Members { reply } => {
                let _ = reply.send(self.members.clone());
            }
            Command::Processes { reply } => {
                let _ = reply.send(self.processes.clone());
            }
            Command::Join { peer } => {
                log::info!("node {:x} joining a remote horde", self.node_id.to_u128());
                let _ = peer.send(Command::JoinRequest {
                    from: self.node_id,
                    membership: self.endpoints.membership.clone(),
                });
            }
            Command::JoinRequest { from, membership } => {
                log::info!(
                    "node {:x} accepted a join from node {:x}",
                    self.node_id.to_u128(),
                    from.to_u128()
                );
                self.endpoints.membership.add_neighbours(vec![membership]);
                self.endpoints.membership.ship();
            }
            Command::Leave { reply } => {
                log::info!("node {:x} leaving the horde", self.node_id.to_u128());
                self.members = self
                    .endpoints
                    .membership
                    .apply(Op::Remove(self.node_id))
                    .await?;
                let _ = reply.send(());
            }
            Command::ShipNow => {
                self.endpoints.membership.ship();
                self.endpoints.registry.ship();
            }
        }
        Ok(())
    }

    async fn handle_notification(&mut self, role: ChannelRole) -> Result<(), HordeError> {
        match role {
            ChannelRole::Membership => {
                let members = self.endpoints.membership.read().await?;

                // Newly observed nodes mean the mesh grew: hand every known endpoint to
                // both channels (adding is idempotent, self is filtered out) and push
                // state right away so late joiners catch up without waiting for the
                // anti-entropy tick.
                let newly_observed = members
                    .keys()
                    .filter(|id| !self.members.contains_key(id))
                    .count();
                if newly_observed > 0 {
                    log::debug!(
                        "node {:x} observed {} new member(s)",
                        self.node_id.to_u128(),
                        newly_observed
                    );
                    let membership_endpoints = members
                        .values()
                        .map(|endpoints| endpoints.membership.clone())
                        .collect();
                    let registry_endpoints = members
                        .values()
                        .map(|endpoints| endpoints.registry.clone())
                        .collect();
                    self.endpoints.membership.add_neighbours(membership_endpoints);
                    self.endpoints.registry.add_neighbours(registry_endpoints);
                    self.endpoints.membership.ship();
                    self.endpoints.registry.ship();
                }

                self.members = members;
                let _ = self.events.send(HordeEvent::MembersChanged);
            }
            ChannelRole::Registry => {
                self.processes = self.endpoints.registry.read().await?;
                let _ = self.events.send(HordeEvent::ProcessesChanged);
            }
        }
        Ok(())
    }
}
