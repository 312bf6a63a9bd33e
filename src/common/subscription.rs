//! Cancellable subscription handle.

use tokio_util::sync::CancellationToken;

/// Handle to a background listener. Cancels the listener on
/// [`unsubscribe`](Self::unsubscribe) or when dropped.
#[derive(Debug, Default)]
pub struct Subscription {
    token: CancellationToken,
}

impl Subscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing token; cancelling the subscription cancels it.
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Token observed by the listener task.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub fn unsubscribe(&self) {
        self.token.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
