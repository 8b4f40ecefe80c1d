//! In-process shape client.
//!
//! Rows live in memory and change only through the mutators on
//! [`MemoryShape`]. Useful for tests, fixtures and offline development
//! against the same cache and bindings a networked client would use.

use crate::client::{ChangeCallback, Row, ShapeClient, ShapeHandle, ShapeStreamHandle, Unsubscribe};
use crate::config::ShapeStreamOptions;
use crate::error::FetchError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug)]
pub struct MemoryShapeStream {
    id: u64,
    options: ShapeStreamOptions,
}

impl MemoryShapeStream {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl ShapeStreamHandle for MemoryShapeStream {
    fn options(&self) -> &ShapeStreamOptions {
        &self.options
    }
}

struct MemoryState {
    rows: Arc<Vec<Row>>,
    loading: bool,
    last_synced_at: Option<u64>,
    error: Option<FetchError>,
}

type Subscribers = Mutex<Vec<(u64, ChangeCallback)>>;

pub struct MemoryShape {
    stream: Arc<MemoryShapeStream>,
    state: RwLock<MemoryState>,
    subscribers: Arc<Subscribers>,
    next_subscriber: AtomicU64,
    /// Flips to `true` once the shape is up to date or has failed.
    settled: watch::Sender<bool>,
}

impl MemoryShape {
    pub fn new(stream: Arc<MemoryShapeStream>) -> Self {
        let (settled, _) = watch::channel(false);
        Self {
            stream,
            state: RwLock::new(MemoryState {
                rows: Arc::new(Vec::new()),
                loading: true,
                last_synced_at: None,
                error: None,
            }),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_subscriber: AtomicU64::new(0),
            settled,
        }
    }

    pub fn stream(&self) -> &Arc<MemoryShapeStream> {
        &self.stream
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    pub fn set_rows(&self, rows: Vec<Row>) {
        self.update(|state| state.rows = Arc::new(rows));
    }

    pub fn push_row(&self, row: Row) {
        // Copy-on-write: snapshots taken earlier keep the old buffer.
        self.update(|state| Arc::make_mut(&mut state.rows).push(row));
    }

    pub fn mark_up_to_date(&self) {
        self.mark_up_to_date_at(now_millis());
    }

    pub fn mark_up_to_date_at(&self, synced_at: u64) {
        self.update(|state| {
            state.loading = false;
            state.last_synced_at = Some(synced_at);
        });
        self.settled.send_replace(true);
    }

    pub fn set_error(&self, error: FetchError) {
        self.update(|state| state.error = Some(error));
        self.settled.send_replace(true);
    }

    pub fn clear_error(&self) {
        self.update(|state| state.error = None);
    }

    fn update(&self, f: impl FnOnce(&mut MemoryState)) {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut state);
        }
        self.notify();
    }

    fn notify(&self) {
        // Callbacks may read the shape or unsubscribe, so none of our locks
        // are held while they run.
        let callbacks: Vec<ChangeCallback> = lock(&self.subscribers)
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        tracing::trace!(
            stream = self.stream.id,
            subscribers = callbacks.len(),
            "notifying shape subscribers"
        );

        for callback in callbacks {
            callback();
        }
    }

    fn read<R>(&self, f: impl FnOnce(&MemoryState) -> R) -> R {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }
}

#[async_trait]
impl ShapeHandle for MemoryShape {
    fn current_rows(&self) -> Arc<Vec<Row>> {
        self.read(|state| state.rows.clone())
    }

    fn is_loading(&self) -> bool {
        self.read(|state| state.loading)
    }

    fn last_synced_at(&self) -> Option<u64> {
        self.read(|state| if state.loading { None } else { state.last_synced_at })
    }

    fn error(&self) -> Option<FetchError> {
        self.read(|state| state.error.clone())
    }

    fn subscribe(&self, callback: ChangeCallback) -> Unsubscribe {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers).push((id, callback));

        let subscribers: Weak<Subscribers> = Arc::downgrade(&self.subscribers);
        Unsubscribe::new(move || {
            if let Some(subscribers) = subscribers.upgrade() {
                lock(&subscribers).retain(|(existing, _)| *existing != id);
            }
        })
    }

    async fn rows(&self) -> Result<Arc<Vec<Row>>, FetchError> {
        let mut settled = self.settled.subscribe();
        let synced = settled.wait_for(|done| *done).await.is_ok();
        if !synced {
            return Err(FetchError::new("shape closed before initial sync"));
        }

        self.read(|state| match (&state.error, state.loading) {
            (Some(error), true) => Err(error.clone()),
            _ => Ok(state.rows.clone()),
        })
    }
}

/// Client whose streams and shapes are [`MemoryShapeStream`] and
/// [`MemoryShape`].
#[derive(Default)]
pub struct MemoryClient {
    next_stream: AtomicU64,
    shapes_created: AtomicUsize,
    streams: Mutex<Vec<Arc<MemoryShapeStream>>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn streams_created(&self) -> usize {
        lock(&self.streams).len()
    }

    pub fn shapes_created(&self) -> usize {
        self.shapes_created.load(Ordering::SeqCst)
    }

    /// Every stream this client has constructed, oldest first.
    pub fn streams(&self) -> Vec<Arc<MemoryShapeStream>> {
        lock(&self.streams).clone()
    }
}

impl ShapeClient for MemoryClient {
    type Stream = MemoryShapeStream;
    type Shape = MemoryShape;

    fn stream(&self, options: ShapeStreamOptions) -> Arc<MemoryShapeStream> {
        let stream = Arc::new(MemoryShapeStream {
            id: self.next_stream.fetch_add(1, Ordering::SeqCst),
            options,
        });
        lock(&self.streams).push(stream.clone());
        stream
    }

    fn shape(&self, stream: Arc<MemoryShapeStream>) -> Arc<MemoryShape> {
        self.shapes_created.fetch_add(1, Ordering::SeqCst);
        Arc::new(MemoryShape::new(stream))
    }
}
