//! Raymond token-tree mutual exclusion — pure state machine, no I/O.
//!
//! One `TokenTreeCore` serializes access to one named resource. The tree
//! topology (parent/child edges over node ids) is fixed at construction;
//! the token location and the per-node FIFO wait queues mutate under
//! request/release traffic.
//!
//! Transitions return [`Effect`] values instead of performing I/O, so the
//! runtime layer and the model-checker tests drive the exact same state
//! machine.
//!
//! Queue entries are node ids with a positional meaning: an entry equal to
//! the slot's own id is a local request; any other entry names the child
//! edge a forwarded request arrived through. Requests escalate toward the
//! root only on a queue's empty-to-non-empty transition at a node that does
//! not hold the token. An idle token gravitates back toward the root, which
//! also restores service to entries left behind a handoff without any
//! re-request message.

use std::collections::{BTreeSet, VecDeque};

use super::types::NodeId;

/// Side effect the runtime layer must carry out after a transition.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Effect {
    /// Forward a resource request one hop toward the root.
    SendRequest { from: NodeId, to: NodeId },
    /// The token crosses a tree edge toward the root.
    SendToken { from: NodeId, to: NodeId },
    /// The token reached `node`'s slot for a local request; notify the
    /// waiter.
    Granted { node: NodeId },
}

/// Outcome of a local request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestOutcome {
    /// The requester's slot already held the token.
    Granted,
    /// Queued; the grant arrives asynchronously with the token.
    Pending,
}

/// Release attempted by a node whose slot does not hold the token.
///
/// Recoverable: surfaced to the caller, no state was mutated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReleaseNotOwned;

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct Slot {
    /// One hop toward the root; `None` for the root. A plain index, never
    /// an owning reference.
    parent: Option<NodeId>,
    children: BTreeSet<NodeId>,
    /// Strict FIFO. Entries: own id = local request, child id = forwarded.
    queue: VecDeque<NodeId>,
    holds_token: bool,
}

/// Token tree for one resource.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TokenTreeCore {
    slots: Vec<Slot>,
    root: NodeId,
}

impl TokenTreeCore {
    /// Builds the tree from validated parent edges; the root starts with
    /// the token.
    ///
    /// # Panics
    ///
    /// Panics on malformed input (out-of-range root, a root with a parent,
    /// a non-root without one). [`crate::topology::TreeTopology::validate`]
    /// rejects these eagerly with a proper error; reaching the panic means
    /// validation was bypassed.
    #[must_use]
    pub fn new(root: NodeId, parents: &[Option<NodeId>]) -> Self {
        assert!(root.index() < parents.len(), "root out of range");
        assert!(parents[root.index()].is_none(), "root must not have a parent");

        let mut slots: Vec<Slot> = parents
            .iter()
            .enumerate()
            .map(|(i, parent)| {
                assert!(
                    parent.is_some() || NodeId(i) == root,
                    "non-root node without a parent"
                );
                Slot {
                    parent: *parent,
                    children: BTreeSet::new(),
                    queue: VecDeque::new(),
                    holds_token: false,
                }
            })
            .collect();
        for (i, parent) in parents.iter().enumerate() {
            if let Some(p) = parent {
                slots[p.index()].children.insert(NodeId(i));
            }
        }
        slots[root.index()].holds_token = true;
        Self { slots, root }
    }

    /// Number of nodes in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Whether `node`'s slot currently holds the token.
    ///
    /// # Panics
    ///
    /// Panics if `node` is out of range.
    #[must_use]
    pub fn holds_token(&self, node: NodeId) -> bool {
        self.slots[node.index()].holds_token
    }

    /// How many slots report the token. The tree invariant keeps this at
    /// exactly one; exposed so tests can observe it.
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.slots.iter().filter(|s| s.holds_token).count()
    }

    /// The queue entries pending at one node, front first.
    ///
    /// # Panics
    ///
    /// Panics if `node` is out of range.
    pub fn queued(&self, node: NodeId) -> impl ExactSizeIterator<Item = NodeId> + '_ {
        self.slots[node.index()].queue.iter().copied()
    }

    /// Whether `child` is a direct child of `parent`.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is out of range.
    #[must_use]
    pub fn is_child(&self, parent: NodeId, child: NodeId) -> bool {
        self.slots[parent.index()].children.contains(&child)
    }

    /// A local request at `node`.
    ///
    /// Returns [`RequestOutcome::Granted`] without touching any queue when
    /// the node's slot already holds the token. Otherwise the request is
    /// enqueued locally (deduplicated: a node queues itself at most once)
    /// and, on the queue's empty-to-non-empty transition, escalated toward
    /// the root.
    ///
    /// # Panics
    ///
    /// Panics if `node` is out of range.
    pub fn request(&mut self, node: NodeId, effects: &mut Vec<Effect>) -> RequestOutcome {
        let slot = &mut self.slots[node.index()];
        if slot.holds_token {
            return RequestOutcome::Granted;
        }
        if slot.queue.contains(&node) {
            // Already waiting; the earlier escalation is still in flight.
            return RequestOutcome::Pending;
        }
        let was_empty = slot.queue.is_empty();
        slot.queue.push_back(node);
        if was_empty {
            self.escalate(node, effects);
        }
        RequestOutcome::Pending
    }

    /// Walks toward the root, enqueueing the edge the request came through.
    /// Stops at a node that already had a pending request or holds the
    /// token: that node will serve the subtree when the token next passes.
    fn escalate(&mut self, from: NodeId, effects: &mut Vec<Effect>) {
        let mut hop = from;
        while let Some(parent) = self.slots[hop.index()].parent {
            effects.push(Effect::SendRequest { from: hop, to: parent });
            let slot = &mut self.slots[parent.index()];
            let was_empty = slot.queue.is_empty();
            slot.queue.push_back(hop);
            if slot.holds_token || !was_empty {
                break;
            }
            hop = parent;
        }
    }

    /// Releases the token held by `node` and routes it to its next slot.
    ///
    /// The holder's flag is cleared before any other slot's flag is set, so
    /// the tree never reports two holders. With a non-empty queue the head
    /// entry decides the direction (direct child: silent handoff; parent
    /// side: a `SendToken` hop); with an empty queue the token rests at the
    /// root or gravitates toward it.
    ///
    /// # Errors
    ///
    /// [`ReleaseNotOwned`] if `node`'s slot does not hold the token; no
    /// state is mutated.
    ///
    /// # Panics
    ///
    /// Panics if `node` is out of range.
    pub fn release(&mut self, node: NodeId, effects: &mut Vec<Effect>) -> Result<(), ReleaseNotOwned> {
        let slot = &mut self.slots[node.index()];
        if !slot.holds_token {
            return Err(ReleaseNotOwned);
        }
        slot.holds_token = false;
        self.route_token(node, effects);
        Ok(())
    }

    /// Withdraws `node`'s local request, if one is still queued.
    ///
    /// Only the local self entry is removed; entries already forwarded
    /// upstream stay where they are. A token that later arrives and finds
    /// no self entry simply keeps routing, so stale upstream entries cost
    /// one extra token round-trip and nothing else.
    ///
    /// Returns whether an entry was removed.
    ///
    /// # Panics
    ///
    /// Panics if `node` is out of range.
    pub fn cancel(&mut self, node: NodeId) -> bool {
        let slot = &mut self.slots[node.index()];
        if let Some(pos) = slot.queue.iter().position(|&entry| entry == node) {
            slot.queue.remove(pos);
            true
        } else {
            false
        }
    }

    /// Routes the token, currently owned by no slot, starting at `at`.
    ///
    /// Self entry at the head: grant here. Child entry: silent direct-child
    /// handoff one level down. Parent-side entry, or an empty queue at a
    /// non-root: one `SendToken` hop toward the root. Empty queue at the
    /// root: the token rests idle.
    fn route_token(&mut self, mut at: NodeId, effects: &mut Vec<Effect>) {
        loop {
            let root = self.root;
            let slot = &mut self.slots[at.index()];
            match slot.queue.front().copied() {
                Some(next) if next == at => {
                    slot.queue.pop_front();
                    slot.holds_token = true;
                    effects.push(Effect::Granted { node: at });
                    return;
                }
                Some(next) if slot.children.contains(&next) => {
                    slot.queue.pop_front();
                    at = next;
                }
                Some(_) => {
                    // Head arrived from the parent side: pass the token up.
                    slot.queue.pop_front();
                    let parent = slot.parent.expect("parent-side entry at the root");
                    effects.push(Effect::SendToken { from: at, to: parent });
                    at = parent;
                }
                None => {
                    if at == root {
                        slot.holds_token = true;
                        return;
                    }
                    let parent = slot.parent.expect("non-root slot has a parent");
                    effects.push(Effect::SendToken { from: at, to: parent });
                    at = parent;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Star: root 0, every other node a direct child.
    fn star(n: usize) -> TokenTreeCore {
        let parents: Vec<Option<NodeId>> =
            (0..n).map(|i| if i == 0 { None } else { Some(NodeId(0)) }).collect();
        TokenTreeCore::new(NodeId(0), &parents)
    }

    /// Chain: 0 <- 1 <- 2 <- ...
    fn chain(n: usize) -> TokenTreeCore {
        let parents: Vec<Option<NodeId>> =
            (0..n).map(|i| if i == 0 { None } else { Some(NodeId(i - 1)) }).collect();
        TokenTreeCore::new(NodeId(0), &parents)
    }

    #[test]
    fn test_root_starts_with_token() {
        let tree = star(3);
        assert!(tree.holds_token(NodeId(0)));
        assert_eq!(tree.token_count(), 1);
    }

    #[test]
    fn test_request_granted_at_holder() {
        let mut tree = star(3);
        let mut effects = Vec::new();
        assert_eq!(tree.request(NodeId(0), &mut effects), RequestOutcome::Granted);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_star_request_and_handoff() {
        // 3-node tree, root 0, children {1, 2}; root holds the token.
        let mut tree = star(3);
        let mut effects = Vec::new();

        assert_eq!(tree.request(NodeId(2), &mut effects), RequestOutcome::Pending);
        assert_eq!(
            effects,
            vec![Effect::SendRequest { from: NodeId(2), to: NodeId(0) }]
        );
        assert_eq!(tree.queued(NodeId(0)).collect::<Vec<_>>(), vec![NodeId(2)]);

        effects.clear();
        tree.release(NodeId(0), &mut effects).unwrap();
        // Direct-child handoff carries no SendToken; the grant fires at 2.
        assert_eq!(effects, vec![Effect::Granted { node: NodeId(2) }]);
        assert!(tree.holds_token(NodeId(2)));
        assert!(!tree.holds_token(NodeId(0)));
        assert_eq!(tree.token_count(), 1);

        effects.clear();
        assert_eq!(tree.request(NodeId(2), &mut effects), RequestOutcome::Granted);
    }

    #[test]
    fn test_grandchild_cascade() {
        let mut tree = chain(3);
        let mut effects = Vec::new();

        assert_eq!(tree.request(NodeId(2), &mut effects), RequestOutcome::Pending);
        // Escalates hop by hop: 2 -> 1, then 1 -> 0.
        assert_eq!(
            effects,
            vec![
                Effect::SendRequest { from: NodeId(2), to: NodeId(1) },
                Effect::SendRequest { from: NodeId(1), to: NodeId(0) },
            ]
        );

        effects.clear();
        tree.release(NodeId(0), &mut effects).unwrap();
        // Two silent child handoffs, then the grant.
        assert_eq!(effects, vec![Effect::Granted { node: NodeId(2) }]);
        assert!(tree.holds_token(NodeId(2)));
        assert_eq!(tree.token_count(), 1);
    }

    #[test]
    fn test_escalation_stops_at_pending_ancestor() {
        let mut tree = chain(3);
        let mut effects = Vec::new();
        tree.request(NodeId(1), &mut effects);
        effects.clear();
        tree.request(NodeId(2), &mut effects);
        // Node 1 already escalated; 2's request stops there.
        assert_eq!(
            effects,
            vec![Effect::SendRequest { from: NodeId(2), to: NodeId(1) }]
        );
        assert_eq!(
            tree.queued(NodeId(1)).collect::<Vec<_>>(),
            vec![NodeId(1), NodeId(2)]
        );
        assert_eq!(tree.queued(NodeId(0)).collect::<Vec<_>>(), vec![NodeId(1)]);
    }

    #[test]
    fn test_fifo_locality() {
        let mut tree = star(3);
        let mut effects = Vec::new();
        tree.request(NodeId(1), &mut effects);
        tree.request(NodeId(2), &mut effects);
        assert_eq!(
            tree.queued(NodeId(0)).collect::<Vec<_>>(),
            vec![NodeId(1), NodeId(2)]
        );

        effects.clear();
        tree.release(NodeId(0), &mut effects).unwrap();
        assert_eq!(effects, vec![Effect::Granted { node: NodeId(1) }]);

        effects.clear();
        tree.release(NodeId(1), &mut effects).unwrap();
        // Idle token gravitates to the root, which serves the next waiter.
        assert_eq!(
            effects,
            vec![
                Effect::SendToken { from: NodeId(1), to: NodeId(0) },
                Effect::Granted { node: NodeId(2) },
            ]
        );
        assert!(tree.holds_token(NodeId(2)));
        assert_eq!(tree.token_count(), 1);
    }

    #[test]
    fn test_release_not_owned() {
        let mut tree = star(3);
        let mut effects = Vec::new();
        let before = tree.clone();
        assert_eq!(tree.release(NodeId(1), &mut effects), Err(ReleaseNotOwned));
        assert!(effects.is_empty());
        assert_eq!(tree, before);
    }

    #[test]
    fn test_idle_release_rests_at_root() {
        let mut tree = star(3);
        let mut effects = Vec::new();
        tree.release(NodeId(0), &mut effects).unwrap();
        assert!(effects.is_empty());
        assert!(tree.holds_token(NodeId(0)));
    }

    #[test]
    fn test_idle_token_gravitates_from_non_root() {
        let mut tree = chain(3);
        let mut effects = Vec::new();
        tree.request(NodeId(2), &mut effects);
        effects.clear();
        tree.release(NodeId(0), &mut effects).unwrap();
        assert!(tree.holds_token(NodeId(2)));

        effects.clear();
        tree.release(NodeId(2), &mut effects).unwrap();
        assert_eq!(
            effects,
            vec![
                Effect::SendToken { from: NodeId(2), to: NodeId(1) },
                Effect::SendToken { from: NodeId(1), to: NodeId(0) },
            ]
        );
        assert!(tree.holds_token(NodeId(0)));
        assert_eq!(tree.token_count(), 1);
    }

    #[test]
    fn test_request_deduplicated() {
        let mut tree = star(3);
        let mut effects = Vec::new();
        tree.request(NodeId(1), &mut effects);
        effects.clear();
        assert_eq!(tree.request(NodeId(1), &mut effects), RequestOutcome::Pending);
        assert!(effects.is_empty());
        assert_eq!(tree.queued(NodeId(1)).len(), 1);
    }

    #[test]
    fn test_cancel_removes_local_entry_only() {
        let mut tree = chain(3);
        let mut effects = Vec::new();
        tree.request(NodeId(2), &mut effects);
        assert!(tree.cancel(NodeId(2)));
        assert_eq!(tree.queued(NodeId(2)).len(), 0);
        // The forwarded entries stay; the token will round-trip and settle
        // back at the root.
        assert_eq!(tree.queued(NodeId(1)).collect::<Vec<_>>(), vec![NodeId(2)]);

        effects.clear();
        tree.release(NodeId(0), &mut effects).unwrap();
        assert_eq!(
            effects,
            vec![
                Effect::SendToken { from: NodeId(2), to: NodeId(1) },
                Effect::SendToken { from: NodeId(1), to: NodeId(0) },
            ]
        );
        assert!(tree.holds_token(NodeId(0)));
        assert_eq!(tree.token_count(), 1);
    }

    #[test]
    fn test_cancel_without_request() {
        let mut tree = star(2);
        assert!(!tree.cancel(NodeId(1)));
    }
}
