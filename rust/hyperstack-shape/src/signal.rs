//! Abort signals attached to shape stream options.
//!
//! Aborting only marks a signal; caches notice it on their next lookup.

use tokio_util::sync::CancellationToken;

/// Owner side of an abort signal.
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    token: CancellationToken,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            token: self.token.clone(),
        }
    }

    pub fn abort(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!("abort signal triggered");
        }
        self.token.cancel();
    }
}

/// Read side of an [`AbortController`].
#[derive(Debug, Clone)]
pub struct AbortSignal {
    token: CancellationToken,
}

impl AbortSignal {
    /// A signal that is already aborted.
    pub fn already_aborted() -> Self {
        let token = CancellationToken::new();
        token.cancel();
        Self { token }
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the owning controller aborts.
    pub async fn aborted(&self) {
        self.token.cancelled().await;
    }
}
