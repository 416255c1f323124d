//! In-process cluster fabric over crossbeam channels.
//!
//! Everything the replicas of one test or embedded cluster share lives in a
//! single [`Fabric`]: an inbox per node, a directed link matrix for
//! partition injection, and the sink that client replies funnel into. Each
//! engine gets a [`ChannelEndpoint`] — a thin port onto the fabric that
//! implements [`Transport`] — so severing a link affects every path between
//! two nodes at once, replies included in the same bookkeeping.

use std::iter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::host::{ClientReply, ReplyAddress, Transport};
use crate::paxos::ballot::NodeId;
use crate::paxos::message::PaxosMessage;

/// Shared cluster state: who can reach whom, and where messages land.
struct Fabric {
    cluster_size: u32,
    /// Row-major directed adjacency: entry `from * n + to` is true while
    /// the link is up.
    links: Vec<AtomicBool>,
    /// One inbox sender per node, indexed by node id.
    inboxes: Vec<Sender<(NodeId, PaxosMessage)>>,
    /// Where every node's client replies land.
    replies: Sender<(ReplyAddress, ClientReply)>,
}

impl Fabric {
    fn link_up(&self, from: NodeId, to: NodeId) -> bool {
        self.links[(from * self.cluster_size + to) as usize].load(Ordering::SeqCst)
    }

    fn set_link(&self, from: NodeId, to: NodeId, up: bool) {
        if from == to || from >= self.cluster_size || to >= self.cluster_size {
            return;
        }
        self.links[(from * self.cluster_size + to) as usize].store(up, Ordering::SeqCst);
    }

    /// Hand `message` to `to`'s inbox, unless the link is down.
    fn deliver(&self, from: NodeId, to: NodeId, message: PaxosMessage) {
        if to < self.cluster_size && self.link_up(from, to) {
            let _ = self.inboxes[to as usize].send((from, message));
        }
    }
}

/// One node's port onto the fabric. Implements [`Transport`].
pub struct ChannelEndpoint {
    /// This node's id.
    pub node_id: NodeId,
    rx: Receiver<(NodeId, PaxosMessage)>,
    fabric: Arc<Fabric>,
}

impl ChannelEndpoint {
    /// Try to receive one message, non-blocking.
    pub fn try_recv(&self) -> Option<(NodeId, PaxosMessage)> {
        self.rx.try_recv().ok()
    }
}

impl Transport for ChannelEndpoint {
    fn send(&mut self, to: NodeId, message: PaxosMessage) {
        self.fabric.deliver(self.node_id, to, message);
    }

    fn broadcast(&mut self, message: PaxosMessage) {
        // The engine pre-records its own votes, so self is skipped.
        for peer in (0..self.fabric.cluster_size).filter(|&peer| peer != self.node_id) {
            self.fabric.deliver(self.node_id, peer, message.clone());
        }
    }

    fn reply(&mut self, to: ReplyAddress, reply: ClientReply) {
        let _ = self.fabric.replies.send((to, reply));
    }
}

/// An in-process cluster network.
pub struct ChannelNetwork {
    fabric: Arc<Fabric>,
    /// Unclaimed inbox receivers, one slot per node.
    receivers: Vec<Option<Receiver<(NodeId, PaxosMessage)>>>,
    reply_rx: Receiver<(ReplyAddress, ClientReply)>,
}

impl ChannelNetwork {
    /// Create a fully connected cluster of `cluster_size` nodes.
    pub fn new(cluster_size: u32) -> Self {
        let n = cluster_size as usize;
        let (inboxes, receivers): (Vec<_>, Vec<_>) = iter::repeat_with(unbounded)
            .take(n)
            .map(|(tx, rx)| (tx, Some(rx)))
            .unzip();
        let links = iter::repeat_with(|| AtomicBool::new(true))
            .take(n * n)
            .collect();
        let (reply_tx, reply_rx) = unbounded();

        ChannelNetwork {
            fabric: Arc::new(Fabric {
                cluster_size,
                links,
                inboxes,
                replies: reply_tx,
            }),
            receivers,
            reply_rx,
        }
    }

    /// Number of nodes.
    pub fn cluster_size(&self) -> u32 {
        self.fabric.cluster_size
    }

    /// Claim the port for one node. Each node's inbox can be claimed once;
    /// later calls return `None`.
    pub fn create_endpoint(&mut self, node_id: NodeId) -> Option<ChannelEndpoint> {
        let rx = self.receivers.get_mut(node_id as usize)?.take()?;
        Some(ChannelEndpoint {
            node_id,
            rx,
            fabric: Arc::clone(&self.fabric),
        })
    }

    /// Cut or restore the link between `a` and `b`, both directions.
    pub fn set_link(&self, a: NodeId, b: NodeId, up: bool) {
        self.fabric.set_link(a, b, up);
        self.fabric.set_link(b, a, up);
    }

    /// Isolate `node_id` from every peer.
    pub fn disconnect(&self, node_id: NodeId) {
        for peer in 0..self.fabric.cluster_size {
            self.set_link(node_id, peer, false);
        }
    }

    /// Rejoin `node_id` to every peer.
    pub fn reconnect(&self, node_id: NodeId) {
        for peer in 0..self.fabric.cluster_size {
            self.set_link(node_id, peer, true);
        }
    }

    /// Drain any client replies delivered so far.
    pub fn drain_replies(&self) -> Vec<(ReplyAddress, ClientReply)> {
        self.reply_rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paxos::ballot::{BallotNumber, Identifier};
    use crate::paxos::message::Heartbeat;

    fn heartbeat(counter: u64) -> PaxosMessage {
        PaxosMessage::Heartbeat(Heartbeat { counter })
    }

    #[test]
    fn test_broadcast_skips_self_and_cut_links() {
        let mut network = ChannelNetwork::new(3);
        let mut ep0 = network.create_endpoint(0).unwrap();
        let ep1 = network.create_endpoint(1).unwrap();
        let ep2 = network.create_endpoint(2).unwrap();

        network.set_link(0, 2, false);
        let id = Identifier::new(0, BallotNumber::new(1, 0), 1);
        ep0.broadcast(PaxosMessage::Prepare(id));

        let (from, _) = ep1.try_recv().unwrap();
        assert_eq!(from, 0);
        assert!(ep2.try_recv().is_none());
        assert!(ep0.try_recv().is_none());
    }

    #[test]
    fn test_partitioned_link_heals() {
        let mut network = ChannelNetwork::new(2);
        let mut ep0 = network.create_endpoint(0).unwrap();
        let ep1 = network.create_endpoint(1).unwrap();

        network.disconnect(1);
        ep0.send(1, heartbeat(1));
        assert!(ep1.try_recv().is_none());

        network.reconnect(1);
        ep0.send(1, heartbeat(2));
        let (_, message) = ep1.try_recv().unwrap();
        assert_eq!(message, heartbeat(2));
    }

    #[test]
    fn test_endpoint_claimed_once() {
        let mut network = ChannelNetwork::new(2);
        assert!(network.create_endpoint(0).is_some());
        assert!(network.create_endpoint(0).is_none());
        assert!(network.create_endpoint(7).is_none());
    }

    #[test]
    fn test_reply_lane_collects_from_all_ports() {
        let mut network = ChannelNetwork::new(2);
        let mut ep0 = network.create_endpoint(0).unwrap();
        let mut ep1 = network.create_endpoint(1).unwrap();

        ep0.reply(
            ReplyAddress(8),
            ClientReply::NotLeader { node: 0, msg_id: 8 },
        );
        ep1.reply(
            ReplyAddress(9),
            ClientReply::LostLeadership { node: 1, msg_id: 9 },
        );

        let replies = network.drain_replies();
        assert_eq!(replies.len(), 2);
        assert!(replies.contains(&(
            ReplyAddress(8),
            ClientReply::NotLeader { node: 0, msg_id: 8 }
        )));
        assert!(network.drain_replies().is_empty());
    }
}
