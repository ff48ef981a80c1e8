//! Tree topology description and eager validation.
//!
//! A [`TreeTopology`] is a plain description of parent edges plus a
//! designated root (the initial token holder). [`TreeTopology::validate`]
//! turns it into a [`Topology`], which cannot be constructed any other way:
//! holding one proves the edges form a single rooted tree, so a stuck queue
//! can never be the first symptom of a bad topology.

use std::fmt;

use error_stack::Report;

use crate::core::types::NodeId;

/// Defect found while validating a topology description.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TopologyError {
    /// A tree needs at least one node.
    Empty,
    /// The designated initial token holder is missing or out of range.
    InvalidRoot,
    /// A non-root node has no parent edge, so no designated path to the
    /// token holder exists.
    OrphanedNode(NodeId),
    /// An edge endpoint is out of range or a node parents itself.
    InvalidEdge { child: NodeId },
    /// Following parent edges from this node never reaches the root.
    CycleDetected(NodeId),
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyError::Empty => f.write_str("topology has no nodes"),
            TopologyError::InvalidRoot => {
                f.write_str("no valid initial token holder designated")
            }
            TopologyError::OrphanedNode(node) => {
                write!(f, "{node} has no parent and is not the root")
            }
            TopologyError::InvalidEdge { child } => {
                write!(f, "parent edge of {child} is invalid")
            }
            TopologyError::CycleDetected(node) => {
                write!(f, "parent edges from {node} never reach the root")
            }
        }
    }
}

impl std::error::Error for TopologyError {}

/// Builder for a token-tree topology over nodes `0..n`.
#[derive(Clone, Debug)]
pub struct TreeTopology {
    num_nodes: usize,
    root: NodeId,
    parents: Vec<Option<NodeId>>,
}

impl TreeTopology {
    /// An edgeless topology; add edges with [`parent`](Self::parent).
    #[must_use]
    pub fn new(num_nodes: usize, root: NodeId) -> Self {
        Self {
            num_nodes,
            root,
            parents: vec![None; num_nodes],
        }
    }

    /// The shape the original system used for every resource: node 0 is the
    /// root and initial token holder, every other node a direct child.
    #[must_use]
    pub fn star(num_nodes: usize) -> Self {
        let mut topology = Self::new(num_nodes, NodeId(0));
        for child in 1..num_nodes {
            topology = topology.parent(NodeId(child), NodeId(0));
        }
        topology
    }

    /// A chain `root <- 1 <- 2 <- ...`, useful for deep-escalation tests.
    #[must_use]
    pub fn chain(num_nodes: usize) -> Self {
        let mut topology = Self::new(num_nodes, NodeId(0));
        for child in 1..num_nodes {
            topology = topology.parent(NodeId(child), NodeId(child - 1));
        }
        topology
    }

    /// Sets the parent of `child`; the edge points one hop toward the root.
    #[must_use]
    pub fn parent(mut self, child: NodeId, parent: NodeId) -> Self {
        if let Some(slot) = self.parents.get_mut(child.index()) {
            *slot = Some(parent);
        } else {
            // Out of range; remembered as-is and rejected by validate().
            self.parents.resize(child.index() + 1, None);
            self.parents[child.index()] = Some(parent);
        }
        self
    }

    /// Checks that the description is a single tree rooted at the
    /// designated initial token holder.
    ///
    /// # Errors
    ///
    /// Rejects eagerly, at construction time, everything that would
    /// otherwise surface later as a stuck queue: a missing or doubly-rooted
    /// token holder, orphaned nodes, out-of-range edges, self-parenting,
    /// and parent cycles.
    pub fn validate(self) -> Result<Topology, Report<TopologyError>> {
        if self.num_nodes == 0 {
            return Err(Report::new(TopologyError::Empty));
        }
        if let Some(out_of_range) = self
            .parents
            .iter()
            .enumerate()
            .skip(self.num_nodes)
            .find_map(|(i, p)| p.map(|_| NodeId(i)))
        {
            return Err(Report::new(TopologyError::InvalidEdge { child: out_of_range })
                .attach_printable(format!("only {} nodes exist", self.num_nodes)));
        }
        if self.root.index() >= self.num_nodes {
            return Err(Report::new(TopologyError::InvalidRoot)
                .attach_printable(format!("root {} out of range", self.root)));
        }
        if self.parents[self.root.index()].is_some() {
            return Err(Report::new(TopologyError::InvalidRoot)
                .attach_printable("the root cannot have a parent"));
        }

        let mut parents = self.parents;
        parents.resize(self.num_nodes, None);

        for (i, parent) in parents.iter().enumerate() {
            let child = NodeId(i);
            match parent {
                None if child != self.root => {
                    return Err(Report::new(TopologyError::OrphanedNode(child)));
                }
                Some(p) if p.index() >= self.num_nodes || *p == child => {
                    return Err(Report::new(TopologyError::InvalidEdge { child })
                        .attach_printable(format!("parent {p} is not a valid node")));
                }
                _ => {}
            }
        }

        // Every node must reach the root in at most n hops.
        for start in 0..self.num_nodes {
            let mut hop = NodeId(start);
            let mut steps = 0;
            while let Some(parent) = parents[hop.index()] {
                hop = parent;
                steps += 1;
                if steps > self.num_nodes {
                    return Err(Report::new(TopologyError::CycleDetected(NodeId(start))));
                }
            }
            if hop != self.root {
                // Unreachable given the orphan check, kept as a guard.
                return Err(Report::new(TopologyError::CycleDetected(NodeId(start))));
            }
        }

        Ok(Topology {
            root: self.root,
            parents,
        })
    }
}

/// A validated tree topology.
///
/// Can only be obtained through [`TreeTopology::validate`]; holding one
/// proves validation was performed.
#[derive(Clone, Debug)]
pub struct Topology {
    root: NodeId,
    parents: Vec<Option<NodeId>>,
}

impl Topology {
    /// The designated root and initial token holder.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Parent edge per node, indexed by node id; `None` for the root.
    #[must_use]
    pub fn parents(&self) -> &[Option<NodeId>] {
        &self.parents
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_validates() {
        let topology = TreeTopology::star(5).validate().unwrap();
        assert_eq!(topology.root(), NodeId(0));
        assert_eq!(topology.len(), 5);
        assert_eq!(topology.parents()[3], Some(NodeId(0)));
    }

    #[test]
    fn test_chain_validates() {
        let topology = TreeTopology::chain(4).validate().unwrap();
        assert_eq!(topology.parents()[3], Some(NodeId(2)));
    }

    #[test]
    fn test_empty_rejected() {
        let err = TreeTopology::new(0, NodeId(0)).validate().unwrap_err();
        assert_eq!(*err.current_context(), TopologyError::Empty);
    }

    #[test]
    fn test_root_out_of_range_rejected() {
        let err = TreeTopology::new(2, NodeId(7)).validate().unwrap_err();
        assert_eq!(*err.current_context(), TopologyError::InvalidRoot);
    }

    #[test]
    fn test_root_with_parent_rejected() {
        let err = TreeTopology::star(3)
            .parent(NodeId(0), NodeId(1))
            .validate()
            .unwrap_err();
        assert_eq!(*err.current_context(), TopologyError::InvalidRoot);
    }

    #[test]
    fn test_orphan_rejected() {
        let err = TreeTopology::new(3, NodeId(0))
            .parent(NodeId(1), NodeId(0))
            .validate()
            .unwrap_err();
        assert_eq!(
            *err.current_context(),
            TopologyError::OrphanedNode(NodeId(2))
        );
    }

    #[test]
    fn test_self_parent_rejected() {
        let err = TreeTopology::new(2, NodeId(0))
            .parent(NodeId(1), NodeId(1))
            .validate()
            .unwrap_err();
        assert_eq!(
            *err.current_context(),
            TopologyError::InvalidEdge { child: NodeId(1) }
        );
    }

    #[test]
    fn test_cycle_rejected() {
        // 1 and 2 parent each other; both orphaned from the root's tree.
        let err = TreeTopology::new(3, NodeId(0))
            .parent(NodeId(1), NodeId(2))
            .parent(NodeId(2), NodeId(1))
            .validate()
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            TopologyError::CycleDetected(_)
        ));
    }

    #[test]
    fn test_edge_out_of_range_rejected() {
        let err = TreeTopology::star(2)
            .parent(NodeId(9), NodeId(0))
            .validate()
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            TopologyError::InvalidEdge { .. }
        ));
    }
}
