//! Chandy-Lamport global snapshots — pure capture bookkeeping, no I/O.
//!
//! One [`SnapshotRecord`] tracks one capture: the local state recorded for
//! each node and the messages caught in flight on each channel. Channels
//! are the directed pairs of a full mesh; a channel into a node stays
//! "open" from the moment the node records its state until that channel
//! delivers its marker. Messages received on an open channel belong to the
//! snapshot; everything after the marker does not.

use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::types::{NodeId, NodeState};

/// A marker the runtime layer must emit on behalf of `from`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MarkerOut {
    pub from: NodeId,
    pub to: NodeId,
}

/// One global snapshot capture.
///
/// Mutable while markers are still in flight; once [`is_complete`] returns
/// true every further marker and message is a no-op and the record is
/// effectively read-only.
///
/// [`is_complete`]: SnapshotRecord::is_complete
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "M: Serialize", deserialize = "M: Deserialize<'de>"))
)]
pub struct SnapshotRecord<M> {
    initiator: NodeId,
    /// Indexed by node id; a slot stays unset until that node's first
    /// marker records its local state.
    states: Vec<Option<NodeState>>,
    /// Per receiving node: the (sender, payload) pairs caught in flight.
    messages: BTreeMap<NodeId, Vec<(NodeId, M)>>,
    /// Per recording node: senders whose channel has not yet delivered its
    /// marker for this capture. Absent key = node not recording yet.
    open_channels: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl<M> SnapshotRecord<M> {
    /// Starts a capture: records the initiator's state and emits a marker
    /// to every other node.
    ///
    /// # Panics
    ///
    /// Panics if `initiator` is out of range.
    #[must_use]
    pub fn initiate(
        initiator: NodeId,
        num_nodes: usize,
        state: NodeState,
        markers: &mut Vec<MarkerOut>,
    ) -> Self {
        let mut states = vec![None; num_nodes];
        states[initiator.index()] = Some(state);

        let peers = || (0..num_nodes).map(NodeId).filter(move |&n| n != initiator);
        let open: BTreeSet<NodeId> = peers().collect();
        markers.extend(peers().map(|to| MarkerOut { from: initiator, to }));

        let mut open_channels = BTreeMap::new();
        open_channels.insert(initiator, open);
        Self {
            initiator,
            states,
            messages: BTreeMap::new(),
            open_channels,
        }
    }

    /// A marker arrived at `to` on the channel from `from`.
    ///
    /// First marker seen by `to` for this capture: `to`'s local state is
    /// recorded before any further application message, the arrival channel
    /// is flushed, and markers are forwarded to all of `to`'s peers. A
    /// later marker just flushes its channel. Duplicate markers are no-ops:
    /// loss and duplication are the transport's problem, not this core's.
    ///
    /// # Panics
    ///
    /// Panics if `from` or `to` is out of range, or `from == to`.
    pub fn receive_marker(
        &mut self,
        from: NodeId,
        to: NodeId,
        state: NodeState,
        markers: &mut Vec<MarkerOut>,
    ) {
        assert_ne!(from, to, "a node has no channel to itself");
        assert!(from.index() < self.states.len() && to.index() < self.states.len());

        if let Some(open) = self.open_channels.get_mut(&to) {
            open.remove(&from);
            return;
        }

        // First marker: record state, open the remaining channels, forward.
        self.states[to.index()] = Some(state);
        let num_nodes = self.states.len();
        let peers = move |center: NodeId| (0..num_nodes).map(NodeId).filter(move |&n| n != center);
        let mut open: BTreeSet<NodeId> = peers(to).collect();
        open.remove(&from);
        self.open_channels.insert(to, open);
        markers.extend(peers(to).map(|peer| MarkerOut { from: to, to: peer }));
    }

    /// An application message from `from` arrived at `to`.
    ///
    /// Recorded iff `to` has already recorded its state and the channel
    /// from `from` has not yet delivered its marker. Returns whether the
    /// payload was recorded (and consumed).
    pub fn record_message(&mut self, from: NodeId, to: NodeId, payload: M) -> bool {
        let in_flight = self
            .open_channels
            .get(&to)
            .is_some_and(|open| open.contains(&from));
        if in_flight {
            self.messages.entry(to).or_default().push((from, payload));
        }
        in_flight
    }

    /// Complete once every node's state is recorded and every channel has
    /// delivered its marker.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.states.iter().all(Option::is_some)
            && self.open_channels.values().all(BTreeSet::is_empty)
    }

    #[must_use]
    pub fn initiator(&self) -> NodeId {
        self.initiator
    }

    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.states.len()
    }

    /// The recorded state of one node, if captured yet.
    ///
    /// # Panics
    ///
    /// Panics if `node` is out of range.
    #[must_use]
    pub fn recorded_state(&self, node: NodeId) -> Option<NodeState> {
        self.states[node.index()]
    }

    #[must_use]
    pub fn states(&self) -> &[Option<NodeState>] {
        &self.states
    }

    /// Messages recorded as in flight toward `node`, in arrival order.
    #[must_use]
    pub fn in_flight(&self, node: NodeId) -> &[(NodeId, M)] {
        self.messages.get(&node).map_or(&[], Vec::as_slice)
    }
}
