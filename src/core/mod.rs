//! Pure state machine core — no I/O, no async, no locks.
//!
//! This module contains the state transition logic shared between:
//! - The runtime façade ([`crate::CoordinationSystem`])
//! - The Stateright model-checker tests
//!
//! By extracting this logic, the model checker verifies the exact same
//! state transitions as the production code.
//!
//! # Modules
//!
//! - [`types`]: identifier newtypes and [`types::NodeState`]
//! - [`clock`]: vector clocks and the four-valued causal comparison
//! - [`mutex`]: the Raymond token-tree state machine
//! - [`snapshot`]: Chandy-Lamport capture records

pub mod clock;
pub mod mutex;
pub mod snapshot;
pub mod types;

pub use clock::{CausalOrder, VectorClock};
pub use mutex::{Effect, ReleaseNotOwned, RequestOutcome, TokenTreeCore};
pub use snapshot::{MarkerOut, SnapshotRecord};
pub use types::{NodeId, NodeState, ResourceId, SnapshotId};
