//! The coordination façade.
//!
//! [`CoordinationSystem`] owns the fixed set of nodes, one token tree per
//! registered resource, and one record per snapshot capture. Each tree and
//! each record is an independently lockable unit, so unrelated resources
//! and captures never contend; there is no process-wide lock.
//!
//! The façade routes operations to the pure cores, keeps the vector clocks
//! threaded through every simulated send and receive, and turns the cores'
//! effects into calls on the abstract [`Transport`] hooks.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::core::clock::{CausalOrder, VectorClock};
use crate::core::mutex::{Effect, RequestOutcome, TokenTreeCore};
use crate::core::snapshot::SnapshotRecord;
use crate::core::types::{NodeId, NodeState, ResourceId, SnapshotId};
use crate::error::CoordError;
use crate::grant::PendingGrant;
use crate::topology::Topology;
use crate::traits::Transport;

/// Outcome of a resource request.
#[must_use]
#[derive(Debug)]
pub enum Acquire {
    /// The requester's slot already held the token.
    Granted,
    /// Queued; resolve the grant by awaiting the future.
    Pending(PendingGrant),
}

impl Acquire {
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Acquire::Granted)
    }

    /// The pending grant, if the request was queued.
    #[must_use]
    pub fn into_pending(self) -> Option<PendingGrant> {
        match self {
            Acquire::Granted => None,
            Acquire::Pending(grant) => Some(grant),
        }
    }
}

/// Per-node state: the exclusively owned clock, the coarse resource-access
/// state, and the node's shared-resource values.
struct NodeCell<M> {
    clock: VectorClock,
    state: NodeState,
    shared: BTreeMap<ResourceId, M>,
}

/// One resource's tree plus the waiters to notify when their grant fires.
struct ResourceTree {
    core: TokenTreeCore,
    waiters: BTreeMap<NodeId, oneshot::Sender<()>>,
}

type TreeMap = BTreeMap<ResourceId, Arc<Mutex<ResourceTree>>>;
type SnapshotMap<M> = BTreeMap<SnapshotId, Arc<Mutex<SnapshotRecord<M>>>>;

/// The coordination kernel façade for a fixed set of peer nodes.
///
/// `T` is the outbound transport; `M` is the caller's opaque payload type
/// for shared-resource values and in-flight snapshot messages.
pub struct CoordinationSystem<T: Transport, M> {
    transport: T,
    nodes: Vec<Mutex<NodeCell<M>>>,
    trees: RwLock<TreeMap>,
    snapshots: RwLock<SnapshotMap<M>>,
    next_snapshot: AtomicU64,
}

impl<T: Transport, M: Clone + Send> CoordinationSystem<T, M> {
    /// Creates a system of `num_nodes` peers, all idle, with zeroed clocks
    /// and no resources registered.
    ///
    /// # Panics
    ///
    /// Panics if `num_nodes` is zero.
    #[must_use]
    pub fn new(num_nodes: usize, transport: T) -> Self {
        assert!(num_nodes > 0, "a system needs at least one node");
        let nodes = (0..num_nodes)
            .map(|_| {
                Mutex::new(NodeCell {
                    clock: VectorClock::new(num_nodes),
                    state: NodeState::Idle,
                    shared: BTreeMap::new(),
                })
            })
            .collect();
        Self {
            transport,
            nodes,
            trees: RwLock::new(BTreeMap::new()),
            snapshots: RwLock::new(BTreeMap::new()),
            next_snapshot: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    // ------------------------------------------------------------------
    // Mutual exclusion
    // ------------------------------------------------------------------

    /// Registers (or replaces) the token tree for `resource`.
    ///
    /// The topology's root starts with the token.
    ///
    /// # Errors
    ///
    /// [`CoordError::TopologySize`] if the topology was validated for a
    /// different number of nodes.
    pub fn init_mutex_tree(
        &self,
        resource: ResourceId,
        topology: &Topology,
    ) -> Result<(), CoordError> {
        if topology.len() != self.nodes.len() {
            return Err(CoordError::TopologySize {
                expected: self.nodes.len(),
                got: topology.len(),
            });
        }
        let tree = ResourceTree {
            core: TokenTreeCore::new(topology.root(), topology.parents()),
            waiters: BTreeMap::new(),
        };
        debug!(%resource, root = %topology.root(), "mutex tree initialised");
        self.trees
            .write()
            .unwrap()
            .insert(resource, Arc::new(Mutex::new(tree)));
        Ok(())
    }

    /// Requests exclusive access to `resource` on behalf of `node`.
    ///
    /// Never blocks: returns [`Acquire::Granted`] when the node's slot
    /// already holds the token, otherwise [`Acquire::Pending`] with a
    /// future resolved when the token arrives.
    ///
    /// # Errors
    ///
    /// [`CoordError::UnknownNode`], [`CoordError::UnknownResource`], or
    /// [`CoordError::AlreadyRequesting`] if a live request is already
    /// pending for this node (a request whose grant future was dropped is
    /// cleared and replaced instead).
    pub fn request_resource(
        &self,
        node: NodeId,
        resource: &ResourceId,
    ) -> Result<Acquire, CoordError> {
        self.check_node(node)?;
        let tree = self.tree(resource)?;
        let mut tree = tree.lock().unwrap();

        if let Some(tx) = tree.waiters.get(&node) {
            if tx.is_closed() {
                // The previous waiter dropped its grant: treat as cancelled.
                tree.waiters.remove(&node);
                tree.core.cancel(node);
            } else {
                return Err(CoordError::AlreadyRequesting {
                    node,
                    resource: resource.clone(),
                });
            }
        }

        let mut effects = Vec::new();
        match tree.core.request(node, &mut effects) {
            RequestOutcome::Granted => {
                debug!(%resource, %node, "granted immediately");
                self.set_state(node, NodeState::Holding);
                Ok(Acquire::Granted)
            }
            RequestOutcome::Pending => {
                let (tx, rx) = oneshot::channel();
                tree.waiters.insert(node, tx);
                self.set_state(node, NodeState::Requesting);
                self.apply_effects(resource, &mut tree, effects);
                debug!(%resource, %node, "request pending");
                Ok(Acquire::Pending(PendingGrant::new(rx)))
            }
        }
    }

    /// Releases the token held by `node` and routes it to the next waiter.
    ///
    /// # Errors
    ///
    /// [`CoordError::ReleaseNotOwned`] if the node's slot does not hold the
    /// token (no state is mutated), plus the usual lookup errors.
    pub fn release_resource(
        &self,
        node: NodeId,
        resource: &ResourceId,
    ) -> Result<(), CoordError> {
        self.check_node(node)?;
        let tree = self.tree(resource)?;
        let mut tree = tree.lock().unwrap();

        let mut effects = Vec::new();
        tree.core
            .release(node, &mut effects)
            .map_err(|_| CoordError::ReleaseNotOwned {
                node,
                resource: resource.clone(),
            })?;
        debug!(%resource, %node, "released");
        self.set_state(node, NodeState::Idle);
        self.apply_effects(resource, &mut tree, effects);
        Ok(())
    }

    /// Withdraws `node`'s pending request, if any.
    ///
    /// Only the local queue entry is removed; a request already forwarded
    /// upstream stays in flight and is served harmlessly (the token
    /// round-trips and settles back toward the root).
    ///
    /// # Errors
    ///
    /// Lookup errors only; cancelling without a pending request is a no-op.
    pub fn cancel_request(&self, node: NodeId, resource: &ResourceId) -> Result<(), CoordError> {
        self.check_node(node)?;
        let tree = self.tree(resource)?;
        let mut tree = tree.lock().unwrap();

        let had_waiter = tree.waiters.remove(&node).is_some();
        let had_entry = tree.core.cancel(node);
        if had_waiter || had_entry {
            debug!(%resource, %node, "request cancelled");
            self.set_state(node, NodeState::Idle);
        }
        Ok(())
    }

    /// Whether `node`'s slot currently holds the token for `resource`.
    ///
    /// # Errors
    ///
    /// Lookup errors.
    pub fn holds_token(&self, node: NodeId, resource: &ResourceId) -> Result<bool, CoordError> {
        self.check_node(node)?;
        let tree = self.tree(resource)?;
        let tree = tree.lock().unwrap();
        Ok(tree.core.holds_token(node))
    }

    /// Turns the core's effects into transport calls and grant deliveries.
    ///
    /// Every outbound hop is a send event for the emitting node, so its
    /// clock component advances. A grant whose waiter is gone (the future
    /// was dropped) is released again on the node's behalf so the token
    /// cannot strand on an abandoned slot.
    fn apply_effects(&self, resource: &ResourceId, tree: &mut ResourceTree, effects: Vec<Effect>) {
        let mut work = std::collections::VecDeque::from(effects);
        while let Some(effect) = work.pop_front() {
            match effect {
                Effect::SendRequest { from, to } => {
                    self.tick_clock(from);
                    trace!(%resource, %from, %to, "forwarding request");
                    self.transport.send_request(to, resource);
                }
                Effect::SendToken { from, to } => {
                    self.tick_clock(from);
                    trace!(%resource, %from, %to, "token in transit");
                    self.transport.send_token(to, from, resource);
                }
                Effect::Granted { node } => {
                    let delivered = match tree.waiters.remove(&node) {
                        Some(tx) => tx.send(()).is_ok(),
                        None => false,
                    };
                    if delivered {
                        debug!(%resource, %node, "token granted");
                        self.set_state(node, NodeState::Holding);
                    } else {
                        debug!(%resource, %node, "waiter gone, releasing on its behalf");
                        self.set_state(node, NodeState::Idle);
                        let mut extra = Vec::new();
                        if tree.core.release(node, &mut extra).is_ok() {
                            work.extend(extra);
                        }
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Starts a global snapshot: records the initiator's state and emits a
    /// marker to every other node.
    ///
    /// # Errors
    ///
    /// [`CoordError::UnknownNode`].
    pub fn initiate_snapshot(&self, initiator: NodeId) -> Result<SnapshotId, CoordError> {
        self.check_node(initiator)?;
        let id = SnapshotId(self.next_snapshot.fetch_add(1, Ordering::Relaxed));
        let state = self.nodes[initiator.index()].lock().unwrap().state;

        let mut markers = Vec::new();
        let record = SnapshotRecord::initiate(initiator, self.nodes.len(), state, &mut markers);
        self.snapshots
            .write()
            .unwrap()
            .insert(id, Arc::new(Mutex::new(record)));
        debug!(%id, %initiator, "snapshot initiated");

        for marker in markers {
            self.tick_clock(marker.from);
            self.transport.send_marker(marker.from, marker.to);
        }
        Ok(id)
    }

    /// Delivers the marker for capture `id` on the channel `from -> to`.
    ///
    /// First marker seen by `to`: its state is recorded before any further
    /// application message and markers are forwarded to all its peers.
    /// Later markers flush their channel. Markers for a completed capture
    /// are ignored — the record is read-only from then on.
    ///
    /// # Errors
    ///
    /// Lookup errors, or [`CoordError::InvalidChannel`] if `from == to`.
    pub fn receive_marker(
        &self,
        id: SnapshotId,
        from: NodeId,
        to: NodeId,
    ) -> Result<(), CoordError> {
        self.check_node(from)?;
        self.check_node(to)?;
        if from == to {
            return Err(CoordError::InvalidChannel { from, to });
        }
        let record = self.snapshot_arc(id)?;
        let mut record = record.lock().unwrap();

        // Marker receipt is a local event for the receiver.
        self.tick_clock(to);
        if record.is_complete() {
            trace!(%id, %from, %to, "marker after completion ignored");
            return Ok(());
        }

        let state = self.nodes[to.index()].lock().unwrap().state;
        let mut markers = Vec::new();
        record.receive_marker(from, to, state, &mut markers);
        if record.is_complete() {
            debug!(%id, "snapshot complete");
        }
        drop(record);

        for marker in markers {
            self.tick_clock(marker.from);
            self.transport.send_marker(marker.from, marker.to);
        }
        Ok(())
    }

    /// Routes an application message receipt to every in-progress capture.
    ///
    /// The payload lands in the in-flight set of each capture whose
    /// `from -> to` channel is still open; clock merging is the separate
    /// [`vector_clock_update`](Self::vector_clock_update) step.
    ///
    /// # Errors
    ///
    /// Lookup errors, or [`CoordError::InvalidChannel`] if `from == to`.
    pub fn record_message(
        &self,
        from: NodeId,
        to: NodeId,
        payload: M,
    ) -> Result<(), CoordError> {
        self.check_node(from)?;
        self.check_node(to)?;
        if from == to {
            return Err(CoordError::InvalidChannel { from, to });
        }
        let records: Vec<_> = self.snapshots.read().unwrap().values().cloned().collect();
        for record in records {
            let mut record = record.lock().unwrap();
            if record.record_message(from, to, payload.clone()) {
                trace!(%from, %to, "message recorded in flight");
            }
        }
        Ok(())
    }

    /// A copy of the capture record.
    ///
    /// # Errors
    ///
    /// [`CoordError::UnknownSnapshot`].
    pub fn snapshot(&self, id: SnapshotId) -> Result<SnapshotRecord<M>, CoordError> {
        let record = self.snapshot_arc(id)?;
        let record = record.lock().unwrap();
        Ok(record.clone())
    }

    /// Whether every node's state is recorded and every channel flushed.
    ///
    /// # Errors
    ///
    /// [`CoordError::UnknownSnapshot`].
    pub fn snapshot_is_complete(&self, id: SnapshotId) -> Result<bool, CoordError> {
        let record = self.snapshot_arc(id)?;
        let record = record.lock().unwrap();
        Ok(record.is_complete())
    }

    // ------------------------------------------------------------------
    // Clocks and causality
    // ------------------------------------------------------------------

    /// Merges an incoming stamp into `node`'s clock (componentwise max,
    /// then local advance) — the receive half of clock threading.
    ///
    /// # Errors
    ///
    /// [`CoordError::UnknownNode`] or [`CoordError::ClockDimensionMismatch`];
    /// a stamp of the wrong dimension crosses the system boundary, so it is
    /// an error here rather than the panic the clock itself reserves for
    /// internal misuse.
    pub fn vector_clock_update(
        &self,
        node: NodeId,
        incoming: &VectorClock,
    ) -> Result<(), CoordError> {
        self.check_node(node)?;
        if incoming.dimension() != self.nodes.len() {
            return Err(CoordError::ClockDimensionMismatch {
                expected: self.nodes.len(),
                got: incoming.dimension(),
            });
        }
        let mut cell = self.nodes[node.index()].lock().unwrap();
        cell.clock.update(node, incoming);
        trace!(%node, clock = %cell.clock, "clock merged");
        Ok(())
    }

    /// Records a local event at `node` and returns the fresh stamp, for
    /// callers building event logs.
    ///
    /// # Errors
    ///
    /// [`CoordError::UnknownNode`].
    pub fn record_local_event(&self, node: NodeId) -> Result<VectorClock, CoordError> {
        self.check_node(node)?;
        let mut cell = self.nodes[node.index()].lock().unwrap();
        cell.clock.increment(node);
        Ok(cell.clock.clone())
    }

    /// A copy of `node`'s current clock.
    ///
    /// # Errors
    ///
    /// [`CoordError::UnknownNode`].
    pub fn clock(&self, node: NodeId) -> Result<VectorClock, CoordError> {
        self.check_node(node)?;
        Ok(self.nodes[node.index()].lock().unwrap().clock.clone())
    }

    /// The causal relation between two stamped events.
    ///
    /// Four-valued on purpose: callers decide what counts as a violation
    /// for their use case.
    ///
    /// # Panics
    ///
    /// Panics if the stamps have different dimensions.
    #[must_use]
    pub fn detect_causal_order(&self, a: &VectorClock, b: &VectorClock) -> CausalOrder {
        a.compare(b)
    }

    // ------------------------------------------------------------------
    // Node state and shared values
    // ------------------------------------------------------------------

    /// The node's coarse resource-access state.
    ///
    /// # Errors
    ///
    /// [`CoordError::UnknownNode`].
    pub fn node_state(&self, node: NodeId) -> Result<NodeState, CoordError> {
        self.check_node(node)?;
        Ok(self.nodes[node.index()].lock().unwrap().state)
    }

    /// Stores a shared-resource value owned by `node`.
    ///
    /// # Errors
    ///
    /// [`CoordError::UnknownNode`].
    pub fn insert_shared(
        &self,
        node: NodeId,
        resource: ResourceId,
        value: M,
    ) -> Result<(), CoordError> {
        self.check_node(node)?;
        self.nodes[node.index()]
            .lock()
            .unwrap()
            .shared
            .insert(resource, value);
        Ok(())
    }

    /// A copy of the shared-resource value owned by `node`, if any.
    ///
    /// # Errors
    ///
    /// [`CoordError::UnknownNode`].
    pub fn shared(&self, node: NodeId, resource: &ResourceId) -> Result<Option<M>, CoordError> {
        self.check_node(node)?;
        Ok(self.nodes[node.index()]
            .lock()
            .unwrap()
            .shared
            .get(resource)
            .cloned())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn check_node(&self, node: NodeId) -> Result<(), CoordError> {
        if node.index() < self.nodes.len() {
            Ok(())
        } else {
            Err(CoordError::UnknownNode(node))
        }
    }

    fn tree(&self, resource: &ResourceId) -> Result<Arc<Mutex<ResourceTree>>, CoordError> {
        self.trees
            .read()
            .unwrap()
            .get(resource)
            .cloned()
            .ok_or_else(|| CoordError::UnknownResource(resource.clone()))
    }

    fn snapshot_arc(&self, id: SnapshotId) -> Result<Arc<Mutex<SnapshotRecord<M>>>, CoordError> {
        self.snapshots
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(CoordError::UnknownSnapshot(id))
    }

    /// A send (or marker receipt) is a local event for the node.
    fn tick_clock(&self, node: NodeId) {
        self.nodes[node.index()].lock().unwrap().clock.increment(node);
    }

    fn set_state(&self, node: NodeId, state: NodeState) {
        self.nodes[node.index()].lock().unwrap().state = state;
    }
}
