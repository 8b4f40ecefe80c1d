//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use hyperstack_shape::prelude::*;
//! ```

pub use crate::{
    use_shape, use_shape_with, AbortController, AbortSignal, FetchError, MemoryClient, Row,
    ShapeCache, ShapeClient, ShapeHandle, ShapeParams, ShapeStreamHandle, ShapeStreamOptions,
    UseShape, UseShapeResult,
};

pub use futures_util::StreamExt;
