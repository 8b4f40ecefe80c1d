//! Seam between the cache and the sync client that owns shape streams.
//!
//! The cache never fetches or materializes rows itself. It asks a
//! [`ShapeClient`] to construct streams and shapes, then reads them through
//! [`ShapeStreamHandle`] and [`ShapeHandle`].

use crate::config::ShapeStreamOptions;
use crate::error::FetchError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

pub type Row = Map<String, Value>;

pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// A live subscription to one set of shape options.
pub trait ShapeStreamHandle: Send + Sync + 'static {
    fn options(&self) -> &ShapeStreamOptions;

    fn is_aborted(&self) -> bool {
        self.options().is_aborted()
    }
}

/// Materialized rows of a stream plus its sync state.
#[async_trait]
pub trait ShapeHandle: Send + Sync + 'static {
    /// Current rows. Implementations hand out their own buffer, not a copy.
    fn current_rows(&self) -> Arc<Vec<Row>>;

    fn is_loading(&self) -> bool;

    /// Unix time in milliseconds of the last sync, `None` while loading.
    fn last_synced_at(&self) -> Option<u64>;

    fn error(&self) -> Option<FetchError>;

    /// Register `callback` to run after every change. Notifications reach
    /// subscribers in the order the source emits them.
    fn subscribe(&self, callback: ChangeCallback) -> Unsubscribe;

    /// Resolves with the first complete row set.
    async fn rows(&self) -> Result<Arc<Vec<Row>>, FetchError>;
}

/// Factory for streams and shapes.
pub trait ShapeClient: Send + Sync + 'static {
    type Stream: ShapeStreamHandle;
    type Shape: ShapeHandle;

    /// May open a connection to the remote source.
    fn stream(&self, options: ShapeStreamOptions) -> Arc<Self::Stream>;

    fn shape(&self, stream: Arc<Self::Stream>) -> Arc<Self::Shape>;
}

/// Releases a [`ShapeHandle::subscribe`] registration.
///
/// The release runs exactly once: on [`Unsubscribe::unsubscribe`] or on drop,
/// whichever comes first.
#[must_use = "dropping an Unsubscribe releases the subscription immediately"]
pub struct Unsubscribe {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Unsubscribe {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A registration with nothing to release.
    pub fn noop() -> Self {
        Self { release: None }
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }

    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("released", &self.is_released())
            .finish()
    }
}
