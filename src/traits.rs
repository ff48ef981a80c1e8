//! The transport seam.
//!
//! The kernel performs no network I/O. Every message-worthy transition is
//! surfaced through [`Transport`], which an external collaborator (socket
//! layer, simulator, test recorder) implements. Calls are fire-and-forget:
//! delivery, retry, and backoff are the transport's responsibility.

use crate::core::types::{NodeId, ResourceId};

/// Outbound hooks the kernel calls into.
///
/// Implementations must be cheap and non-blocking; they run while the
/// per-resource (or per-snapshot) lock is held.
pub trait Transport: Send + Sync + 'static {
    /// A resource request was forwarded one hop toward the root.
    fn send_request(&self, to: NodeId, resource: &ResourceId);

    /// The resource token moved across a tree edge.
    fn send_token(&self, to: NodeId, from: NodeId, resource: &ResourceId);

    /// A snapshot marker was emitted on the channel `from -> to`.
    fn send_marker(&self, from: NodeId, to: NodeId);
}

/// Discards every message. Useful for single-process simulations and
/// tests that only observe kernel state.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn send_request(&self, _to: NodeId, _resource: &ResourceId) {}

    fn send_token(&self, _to: NodeId, _from: NodeId, _resource: &ResourceId) {}

    fn send_marker(&self, _from: NodeId, _to: NodeId) {}
}
