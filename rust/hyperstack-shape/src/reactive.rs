//! Reactive bindings over cached shapes.
//!
//! [`use_shape`] resolves a shape through a [`ShapeCache`], snapshots it into
//! a `watch` cell and keeps that cell current from the shape's change
//! notifications. UI layers adapt the cell to their own primitives through
//! [`UseShape::watch`] or [`UseShape::changes`].
//!
//! ```rust,ignore
//! let cache = ShapeCache::new(MemoryClient::new());
//! let items = use_shape_with(&cache, options, |result| result.rows_as::<Item>());
//!
//! let mut changes = items.changes();
//! while let Some(items) = changes.next().await {
//!     render(&items);
//! }
//! ```

use crate::cache::ShapeCache;
use crate::client::{Row, ShapeClient, ShapeHandle, ShapeStreamHandle, Unsubscribe};
use crate::config::ShapeStreamOptions;
use crate::error::FetchError;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Snapshot of a shape at one notification.
pub struct UseShapeResult<S, H> {
    /// The shape's row buffer at snapshot time.
    pub data: Arc<Vec<Row>>,
    pub shape: Arc<H>,
    pub stream: Arc<S>,
    /// True until the initial sync completes.
    pub is_loading: bool,
    /// Unix time in milliseconds of the last sync. `None` while loading.
    pub last_synced_at: Option<u64>,
    pub error: Option<FetchError>,
    pub is_error: bool,
}

impl<S, H> UseShapeResult<S, H>
where
    S: ShapeStreamHandle,
    H: ShapeHandle,
{
    pub fn snapshot(stream: &Arc<S>, shape: &Arc<H>) -> Self {
        let is_loading = shape.is_loading();
        let error = shape.error();
        Self {
            data: shape.current_rows(),
            shape: shape.clone(),
            stream: stream.clone(),
            is_loading,
            last_synced_at: if is_loading {
                None
            } else {
                shape.last_synced_at()
            },
            is_error: error.is_some(),
            error,
        }
    }
}

impl<S, H> UseShapeResult<S, H> {
    /// Rows deserialized into `T`. Rows that don't fit `T` are skipped.
    pub fn rows_as<T: DeserializeOwned>(&self) -> Vec<T> {
        self.data
            .iter()
            .filter_map(|row| serde_json::from_value(serde_json::Value::Object(row.clone())).ok())
            .collect()
    }
}

impl<S, H> Clone for UseShapeResult<S, H> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            shape: self.shape.clone(),
            stream: self.stream.clone(),
            is_loading: self.is_loading,
            last_synced_at: self.last_synced_at,
            error: self.error.clone(),
            is_error: self.is_error,
        }
    }
}

impl<S, H> fmt::Debug for UseShapeResult<S, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UseShapeResult")
            .field("data", &self.data)
            .field("is_loading", &self.is_loading)
            .field("last_synced_at", &self.last_synced_at)
            .field("error", &self.error)
            .field("is_error", &self.is_error)
            .finish_non_exhaustive()
    }
}

pub type Selector<S, H, Sel> = Arc<dyn Fn(&UseShapeResult<S, H>) -> Sel + Send + Sync>;

struct Projection<S, H, Sel> {
    stream: Arc<S>,
    shape: Arc<H>,
    latest: watch::Sender<UseShapeResult<S, H>>,
    selected: watch::Sender<Sel>,
    selector: Mutex<Selector<S, H, Sel>>,
    /// Set once the binding is torn down; late notifications are ignored.
    detached: AtomicBool,
}

impl<S, H, Sel> Projection<S, H, Sel>
where
    S: ShapeStreamHandle,
    H: ShapeHandle,
{
    fn refresh(&self) {
        if self.detached.load(Ordering::Acquire) {
            tracing::trace!("ignoring notification for detached shape binding");
            return;
        }
        let snapshot = UseShapeResult::snapshot(&self.stream, &self.shape);
        self.latest.send_modify(|latest| *latest = snapshot);
        self.reproject();
    }

    fn reproject(&self) {
        let selector = self
            .selector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let latest = self.latest.borrow().clone();
        let selection = selector(&latest);
        self.selected.send_modify(|selected| *selected = selection);
        tracing::trace!(
            rows = latest.data.len(),
            is_loading = latest.is_loading,
            is_error = latest.is_error,
            "shape projection updated"
        );
    }
}

/// Live binding to a cached shape.
///
/// Dropping it (or calling [`UseShape::dispose`]) releases the shape
/// subscription exactly once. Receivers obtained earlier keep their last
/// value but stop changing.
pub struct UseShape<S, H, Sel> {
    projection: Arc<Projection<S, H, Sel>>,
    subscription: Unsubscribe,
}

impl<S, H, Sel> UseShape<S, H, Sel>
where
    S: ShapeStreamHandle,
    H: ShapeHandle,
    Sel: Send + Sync + 'static,
{
    fn bind(stream: Arc<S>, shape: Arc<H>, selector: Selector<S, H, Sel>) -> Self {
        let initial = UseShapeResult::snapshot(&stream, &shape);
        let (latest, _) = watch::channel(initial.clone());
        let (selected, _) = watch::channel(selector(&initial));

        let projection = Arc::new(Projection {
            stream,
            shape: shape.clone(),
            latest,
            selected,
            selector: Mutex::new(selector),
            detached: AtomicBool::new(false),
        });

        // The shape must not own the projection, otherwise a dropped binding
        // could still be driven by its callbacks.
        let weak: Weak<Projection<S, H, Sel>> = Arc::downgrade(&projection);
        let subscription = shape.subscribe(Arc::new(move || {
            if let Some(projection) = weak.upgrade() {
                projection.refresh();
            }
        }));
        tracing::debug!("shape binding subscribed");

        Self {
            projection,
            subscription,
        }
    }

    pub fn value(&self) -> Sel
    where
        Sel: Clone,
    {
        self.projection.selected.borrow().clone()
    }

    pub fn with_value<R>(&self, f: impl FnOnce(&Sel) -> R) -> R {
        f(&self.projection.selected.borrow())
    }

    /// The unprojected snapshot the current value was computed from.
    pub fn result(&self) -> UseShapeResult<S, H> {
        self.projection.latest.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Sel> {
        self.projection.selected.subscribe()
    }

    pub fn watch_result(&self) -> watch::Receiver<UseShapeResult<S, H>> {
        self.projection.latest.subscribe()
    }

    /// Stream of selections, starting with the current one.
    pub fn changes(&self) -> WatchStream<Sel>
    where
        Sel: Clone,
    {
        WatchStream::new(self.watch())
    }

    /// Swap the projection function and re-project the current snapshot.
    pub fn set_selector<F>(&self, selector: F)
    where
        F: Fn(&UseShapeResult<S, H>) -> Sel + Send + Sync + 'static,
    {
        *self
            .projection
            .selector
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(selector);
        self.projection.reproject();
    }

    pub fn shape(&self) -> &Arc<H> {
        &self.projection.shape
    }

    pub fn stream(&self) -> &Arc<S> {
        &self.projection.stream
    }

    pub fn is_disposed(&self) -> bool {
        self.subscription.is_released()
    }

    pub fn dispose(&mut self) {
        if !self.subscription.is_released() {
            tracing::debug!("shape binding unsubscribed");
            self.detach();
        }
    }
}

impl<S, H, Sel> UseShape<S, H, Sel> {
    fn detach(&mut self) {
        self.projection.detached.store(true, Ordering::Release);
        self.subscription.unsubscribe();
    }
}

impl<S, H, Sel> Drop for UseShape<S, H, Sel> {
    fn drop(&mut self) {
        if !self.subscription.is_released() {
            tracing::debug!("shape binding dropped");
            self.detach();
        }
    }
}

pub type UseShapeBinding<C> = UseShape<
    <C as ShapeClient>::Stream,
    <C as ShapeClient>::Shape,
    UseShapeResult<<C as ShapeClient>::Stream, <C as ShapeClient>::Shape>,
>;

/// Bind to the shape for `options`, exposing the full [`UseShapeResult`].
pub fn use_shape<C: ShapeClient>(
    cache: &ShapeCache<C>,
    options: ShapeStreamOptions,
) -> UseShapeBinding<C> {
    use_shape_with(cache, options, |result| result.clone())
}

/// Bind to the shape for `options`, exposing `selector`'s projection of each
/// snapshot.
pub fn use_shape_with<C, Sel, F>(
    cache: &ShapeCache<C>,
    options: ShapeStreamOptions,
    selector: F,
) -> UseShape<C::Stream, C::Shape, Sel>
where
    C: ShapeClient,
    Sel: Send + Sync + 'static,
    F: Fn(&UseShapeResult<C::Stream, C::Shape>) -> Sel + Send + Sync + 'static,
{
    let stream = cache.get_shape_stream(options);
    let shape = cache.get_shape(&stream);
    UseShape::bind(stream, shape, Arc::new(selector))
}
