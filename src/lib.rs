//! Coordination kernel for a fixed cohort of peer nodes
//!
//! This library serializes access to named shared resources without a
//! central lock server, captures consistent global snapshots, and tracks
//! the causal ordering of events — the three classic building blocks
//! wired together behind one façade:
//!
//! - **Token-tree mutual exclusion** (Raymond's algorithm): one token per
//!   resource travels a fixed tree of nodes; requests escalate toward the
//!   root, grants ride the token back down.
//! - **Global snapshots** (Chandy-Lamport): marker messages delimit a
//!   consistent cut of node states plus the messages caught in flight.
//! - **Vector clocks**: every simulated send and receive threads through
//!   the clocks, and causality is exposed as the full four-valued partial
//!   order, never a collapsed boolean.
//!
//! # Architecture
//!
//! The state transition logic lives in [`core`] — pure, I/O-free, and
//! shared verbatim with the model-checker tests. [`CoordinationSystem`]
//! adds per-resource and per-snapshot locking and calls the abstract
//! [`Transport`] hooks; real delivery (sockets, retries, auth) belongs to
//! the transport collaborator, not to this kernel.
//!
//! # Quick Start
//!
//! ```ignore
//! use cohort::{CoordinationSystem, NodeId, NullTransport, TreeTopology};
//!
//! let system: CoordinationSystem<NullTransport, String> =
//!     CoordinationSystem::new(3, NullTransport);
//! let topology = TreeTopology::star(3).validate()?;
//! system.init_mutex_tree("printer".into(), &topology)?;
//!
//! // The root starts with the token; everyone else waits their turn.
//! let grant = system
//!     .request_resource(NodeId(2), &"printer".into())?
//!     .into_pending()
//!     .expect("node 2 does not hold the token yet");
//! system.release_resource(NodeId(0), &"printer".into())?;
//! grant.await?;
//! ```

#![warn(clippy::pedantic)]

pub mod core;
mod error;
mod grant;
mod system;
pub mod topology;
mod traits;

pub use crate::core::{
    CausalOrder, NodeId, NodeState, ResourceId, SnapshotId, SnapshotRecord, VectorClock,
};
pub use error::CoordError;
pub use grant::{GrantRevoked, PendingGrant};
pub use system::{Acquire, CoordinationSystem};
pub use topology::{Topology, TopologyError, TreeTopology};
pub use traits::{NullTransport, Transport};
