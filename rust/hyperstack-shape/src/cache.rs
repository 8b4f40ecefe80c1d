//! Two-level cache of shape streams and shapes.
//!
//! Streams are keyed by the canonical hash of their options and shapes by
//! the identity of the stream they wrap. Entries are evicted only when the
//! stream's abort signal has fired, and only on the next lookup that touches
//! them. Nothing is dropped for being idle.

use crate::canonical::sorted_options_hash;
use crate::client::{ShapeClient, ShapeHandle, ShapeStreamHandle};
use crate::config::ShapeStreamOptions;
use crate::error::FetchError;
use dashmap::DashMap;
use std::sync::Arc;

/// Identity of a cached stream: the address of its `Arc` allocation.
///
/// Unique while the stream is alive; every [`ShapeEntry`] keeps its stream
/// alive so an address is never reused under a live key.
type StreamId = usize;

fn stream_id<S>(stream: &Arc<S>) -> StreamId {
    Arc::as_ptr(stream) as *const () as usize
}

struct ShapeEntry<S, H> {
    stream: Arc<S>,
    shape: Arc<H>,
}

/// Cache of streams and shapes for one [`ShapeClient`].
///
/// Cloning is cheap and clones share the same entries. Lookups are meant to
/// run from a single cooperative task; check-then-insert is not atomic
/// across threads.
pub struct ShapeCache<C: ShapeClient> {
    client: Arc<C>,
    /// canonical options hash -> stream
    streams: Arc<DashMap<String, Arc<C::Stream>>>,
    /// stream identity -> shape wrapping that stream
    shapes: Arc<DashMap<StreamId, ShapeEntry<C::Stream, C::Shape>>>,
}

impl<C: ShapeClient> ShapeCache<C> {
    pub fn new(client: C) -> Self {
        Self::with_client(Arc::new(client))
    }

    pub fn with_client(client: Arc<C>) -> Self {
        Self {
            client,
            streams: Arc::new(DashMap::new()),
            shapes: Arc::new(DashMap::new()),
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Return the cached stream for `options`, creating one on a miss or
    /// when the cached stream's signal has been aborted.
    pub fn get_shape_stream(&self, options: ShapeStreamOptions) -> Arc<C::Stream> {
        let key = sorted_options_hash(&options);

        // Clone out of the map so no shard guard is held while removing.
        let cached = self.streams.get(&key).map(|entry| entry.value().clone());
        if let Some(stream) = cached {
            if !stream.is_aborted() {
                tracing::debug!(key = %key, "shape stream cache hit");
                return stream;
            }

            tracing::debug!(key = %key, "evicting aborted shape stream");
            self.streams.remove(&key);
            self.shapes.remove(&stream_id(&stream));
        }

        tracing::debug!(key = %key, "creating shape stream");
        let stream = self.client.stream(options);
        self.streams.insert(key, stream.clone());
        stream
    }

    /// Return the single shape for `stream`, creating it on first use.
    ///
    /// If the stream has been aborted since its shape was cached, both the
    /// stream entry and the shape entry are evicted before a new shape is
    /// built.
    pub fn get_shape(&self, stream: &Arc<C::Stream>) -> Arc<C::Shape> {
        let id = stream_id(stream);

        let cached = self.shapes.get(&id).map(|entry| entry.shape.clone());
        if let Some(shape) = cached {
            if !stream.is_aborted() {
                return shape;
            }

            let key = sorted_options_hash(stream.options());
            tracing::debug!(key = %key, "evicting shape of aborted stream");
            // A fresh stream may already sit under the same key.
            self.streams
                .remove_if(&key, |_, cached| Arc::ptr_eq(cached, stream));
            self.shapes.remove(&id);
        }

        let shape = self.client.shape(stream.clone());
        self.shapes.insert(
            id,
            ShapeEntry {
                stream: stream.clone(),
                shape: shape.clone(),
            },
        );
        shape
    }

    /// Resolve the shape for `options` and wait for its first full row set.
    pub async fn preload_shape(
        &self,
        options: ShapeStreamOptions,
    ) -> Result<Arc<C::Shape>, FetchError> {
        let stream = self.get_shape_stream(options);
        let shape = self.get_shape(&stream);
        let rows = shape.rows().await?;
        tracing::debug!(rows = rows.len(), "shape preloaded");
        Ok(shape)
    }

    /// Peek at the cached stream for `options` without evicting or creating.
    pub fn cached_stream(&self, options: &ShapeStreamOptions) -> Option<Arc<C::Stream>> {
        self.streams
            .get(&sorted_options_hash(options))
            .map(|entry| entry.value().clone())
    }

    /// Peek at the cached shape for `stream` without evicting or creating.
    pub fn cached_shape(&self, stream: &Arc<C::Stream>) -> Option<Arc<C::Shape>> {
        self.shapes.get(&stream_id(stream)).and_then(|entry| {
            Arc::ptr_eq(&entry.stream, stream).then(|| entry.shape.clone())
        })
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    pub fn clear(&self) {
        self.streams.clear();
        self.shapes.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let aborted_streams = self
            .streams
            .iter()
            .filter(|entry| entry.value().is_aborted())
            .count();

        CacheStats {
            stream_count: self.streams.len(),
            shape_count: self.shapes.len(),
            aborted_streams,
        }
    }
}

impl<C: ShapeClient> Clone for ShapeCache<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            streams: self.streams.clone(),
            shapes: self.shapes.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub stream_count: usize,
    pub shape_count: usize,
    /// Aborted streams still awaiting eviction on their next lookup.
    pub aborted_streams: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShapeParams;
    use crate::memory::MemoryClient;
    use crate::signal::AbortController;
    use serde_json::json;

    const BASE_URL: &str = "http://localhost:3000/v1/shape";

    fn options(table: &str) -> ShapeStreamOptions {
        ShapeStreamOptions::new(BASE_URL).with_params(ShapeParams::new(table))
    }

    #[test]
    fn test_same_options_share_stream() {
        let cache = ShapeCache::new(MemoryClient::new());

        let first = cache.get_shape_stream(options("foo"));
        let second = cache.get_shape_stream(options("foo"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.client().streams_created(), 1);
        assert_eq!(cache.stream_count(), 1);
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let cache = ShapeCache::new(MemoryClient::new());

        let a = cache.get_shape_stream(options("foo").with_params(
            ShapeParams::new("foo")
                .with_param("x", json!({"b": 1, "a": 2}))
                .with_param("y", 1),
        ));
        let b = cache.get_shape_stream(options("foo").with_params(
            ShapeParams::new("foo")
                .with_param("y", 1)
                .with_param("x", json!({"a": 2, "b": 1})),
        ));

        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_different_options_get_different_streams() {
        let cache = ShapeCache::new(MemoryClient::new());

        let foo = cache.get_shape_stream(options("foo"));
        let bar = cache.get_shape_stream(options("bar"));

        assert!(!Arc::ptr_eq(&foo, &bar));
        assert_eq!(cache.stream_count(), 2);
    }

    #[test]
    fn test_aborted_stream_is_replaced() {
        let cache = ShapeCache::new(MemoryClient::new());
        let controller = AbortController::new();

        let stale = cache.get_shape_stream(options("foo").with_signal(controller.signal()));
        let stale_shape = cache.get_shape(&stale);
        controller.abort();

        let fresh_controller = AbortController::new();
        let fresh = cache.get_shape_stream(options("foo").with_signal(fresh_controller.signal()));

        assert!(!Arc::ptr_eq(&stale, &fresh));
        assert!(cache.cached_shape(&stale).is_none());
        assert!(!Arc::ptr_eq(&stale_shape, &cache.get_shape(&fresh)));
        assert_eq!(cache.client().streams_created(), 2);
    }

    #[test]
    fn test_abort_is_lazy() {
        let cache = ShapeCache::new(MemoryClient::new());
        let controller = AbortController::new();

        let stream = cache.get_shape_stream(options("foo").with_signal(controller.signal()));
        cache.get_shape(&stream);
        controller.abort();

        assert_eq!(cache.stream_count(), 1);
        assert_eq!(cache.shape_count(), 1);
        assert_eq!(cache.stats().aborted_streams, 1);
    }

    #[test]
    fn test_shape_is_unique_per_stream() {
        let cache = ShapeCache::new(MemoryClient::new());
        let stream = cache.get_shape_stream(options("foo"));

        let first = cache.get_shape(&stream);
        let second = cache.get_shape(&stream);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.client().shapes_created(), 1);
    }

    #[test]
    fn test_get_shape_evicts_both_levels_on_abort() {
        let cache = ShapeCache::new(MemoryClient::new());
        let controller = AbortController::new();

        let stream = cache.get_shape_stream(options("foo").with_signal(controller.signal()));
        let shape = cache.get_shape(&stream);
        controller.abort();

        let replacement = cache.get_shape(&stream);

        assert!(!Arc::ptr_eq(&shape, &replacement));
        assert!(cache
            .cached_stream(&options("foo").with_signal(controller.signal()))
            .is_none());
        assert_eq!(cache.shape_count(), 1);
    }

    #[test]
    fn test_get_shape_keeps_fresh_stream_with_same_key() {
        let cache = ShapeCache::new(MemoryClient::new());
        let controller = AbortController::new();

        let stale = cache.get_shape_stream(options("foo").with_signal(controller.signal()));
        cache.get_shape(&stale);
        controller.abort();
        let fresh_controller = AbortController::new();
        let fresh_options = options("foo").with_signal(fresh_controller.signal());
        let fresh = cache.get_shape_stream(fresh_options.clone());

        // Re-resolving the stale stream's shape must not drop the fresh stream.
        cache.get_shape(&stale);

        let cached = cache.cached_stream(&fresh_options).unwrap();
        assert!(Arc::ptr_eq(&cached, &fresh));
    }

    #[test]
    fn test_clear_empties_both_levels() {
        let cache = ShapeCache::new(MemoryClient::new());
        let stream = cache.get_shape_stream(options("foo"));
        cache.get_shape(&stream);

        cache.clear();

        assert_eq!(
            cache.stats(),
            CacheStats {
                stream_count: 0,
                shape_count: 0,
                aborted_streams: 0,
            }
        );
        assert!(!Arc::ptr_eq(&stream, &cache.get_shape_stream(options("foo"))));
    }

    #[test]
    fn test_clones_share_entries() {
        let cache = ShapeCache::new(MemoryClient::new());
        let other = cache.clone();

        let a = cache.get_shape_stream(options("foo"));
        let b = other.get_shape_stream(options("foo"));

        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_independent_caches_do_not_share() {
        let client = Arc::new(MemoryClient::new());
        let first = ShapeCache::with_client(client.clone());
        let second = ShapeCache::with_client(client.clone());

        let a = first.get_shape_stream(options("foo"));
        let b = second.get_shape_stream(options("foo"));

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(client.streams_created(), 2);
    }

    #[tokio::test]
    async fn test_preload_resolves_after_initial_sync() {
        let cache = ShapeCache::new(MemoryClient::new());
        let stream = cache.get_shape_stream(options("foo"));
        let shape = cache.get_shape(&stream);

        let preload = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.preload_shape(options("foo")).await })
        };

        shape.set_rows(vec![json!({"id": "1"}).as_object().cloned().unwrap()]);
        shape.mark_up_to_date();

        let preloaded = preload.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&preloaded, &shape));
        assert_eq!(preloaded.current_rows().len(), 1);
    }

    #[tokio::test]
    async fn test_preload_surfaces_client_error() {
        let cache = ShapeCache::new(MemoryClient::new());
        let stream = cache.get_shape_stream(options("foo"));
        cache
            .get_shape(&stream)
            .set_error(FetchError::new("Error fetching data").with_status(500));

        let err = cache.preload_shape(options("foo")).await.err().unwrap();
        assert_eq!(err.message, "Error fetching data");
        assert_eq!(err.status, Some(500));
    }
}
