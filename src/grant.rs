//! Pending-grant notification.
//!
//! `request_resource` never blocks: a request that cannot be served
//! immediately hands back a [`PendingGrant`], resolved exactly once when
//! the token reaches the requester's slot. Dropping the future is a
//! cancellation — if the token arrives afterwards the kernel releases it
//! again on the requester's behalf, so it cannot strand.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures::future::FusedFuture;
use pin_project_lite::pin_project;
use tokio::sync::oneshot;

/// The pending request was cancelled or superseded before the token
/// arrived; no grant will ever be delivered for it.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct GrantRevoked;

impl fmt::Display for GrantRevoked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("pending grant revoked before the token arrived")
    }
}

impl std::error::Error for GrantRevoked {}

pin_project! {
    /// Future for a queued resource request, resolved exactly once when the
    /// token reaches the requester's tree slot.
    #[must_use = "futures do nothing unless polled"]
    pub struct PendingGrant {
        #[pin]
        rx: oneshot::Receiver<()>,
        terminated: bool,
    }
}

impl PendingGrant {
    pub(crate) fn new(rx: oneshot::Receiver<()>) -> Self {
        Self {
            rx,
            terminated: false,
        }
    }
}

impl Future for PendingGrant {
    type Output = Result<(), GrantRevoked>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.rx.poll(cx));
        *this.terminated = true;
        Poll::Ready(result.map_err(|_closed| GrantRevoked))
    }
}

impl FusedFuture for PendingGrant {
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl fmt::Debug for PendingGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingGrant")
            .field("terminated", &self.terminated)
            .finish()
    }
}
