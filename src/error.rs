//! Error taxonomy for kernel operations.
//!
//! Lookup and ownership errors are returned to the immediate caller and
//! never mutate shared tree or snapshot state; no error here is fatal to
//! the system as a whole. Topology defects are a separate, eager failure:
//! see [`crate::topology::TopologyError`].

use std::fmt;

use crate::core::types::{NodeId, ResourceId, SnapshotId};

/// Recoverable failure of a kernel operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CoordError {
    /// The node id names no node of this system.
    UnknownNode(NodeId),
    /// No mutex tree was initialised for this resource.
    UnknownResource(ResourceId),
    /// The snapshot id names no capture.
    UnknownSnapshot(SnapshotId),
    /// Release attempted by a node whose slot does not hold the token.
    ReleaseNotOwned { node: NodeId, resource: ResourceId },
    /// The node already has a pending request for this resource.
    AlreadyRequesting { node: NodeId, resource: ResourceId },
    /// A marker or message names a node as its own peer.
    InvalidChannel { from: NodeId, to: NodeId },
    /// An incoming clock stamp has the wrong number of components.
    ClockDimensionMismatch { expected: usize, got: usize },
    /// The topology was built for a different number of nodes.
    TopologySize { expected: usize, got: usize },
}

impl fmt::Display for CoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordError::UnknownNode(node) => write!(f, "unknown node {node}"),
            CoordError::UnknownResource(resource) => {
                write!(f, "no mutex tree initialised for resource {resource}")
            }
            CoordError::UnknownSnapshot(id) => write!(f, "unknown snapshot {id}"),
            CoordError::ReleaseNotOwned { node, resource } => {
                write!(f, "{node} does not hold the token for {resource}")
            }
            CoordError::AlreadyRequesting { node, resource } => {
                write!(f, "{node} already has a pending request for {resource}")
            }
            CoordError::InvalidChannel { from, to } => {
                write!(f, "invalid channel {from} -> {to}")
            }
            CoordError::ClockDimensionMismatch { expected, got } => {
                write!(f, "clock has {got} components, system has {expected} nodes")
            }
            CoordError::TopologySize { expected, got } => {
                write!(f, "topology describes {got} nodes, system has {expected}")
            }
        }
    }
}

impl std::error::Error for CoordError {}
