//! Incremental static regeneration (ISR) cache.
//!
//! # Data Flow
//! ```text
//! routed event (GET, no preview/action signals)
//!     → interceptor.rs: localize + normalize path, ISR eligibility
//!     → store.rs: IncrementalCache::get(path)
//!     → tag cache check (app/route values)
//!     → control.rs: cache-control, etag, HIT/STALE/ERROR
//!     → STALE ⇒ revalidation message sent from the request task group
//!     → InternalResult (or fall through to the origin)
//! ```
//!
//! # Design Decisions
//! - Interception never fails a request: any error falls through to rendering
//! - Stored values carry their own metadata (status, headers, tags)

pub mod control;
pub mod interceptor;
pub mod store;
pub mod value;

use std::path::PathBuf;

use thiserror::Error;

use crate::actor::ActorError;

pub use control::{compute_cache_control, CacheControl, CacheStatus};
pub use interceptor::CacheInterceptor;
pub use store::{FilesystemCache, IncrementalCache, MemoryCache};
pub use value::{CacheEntry, CacheMeta, CacheValue};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt cache entry: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid cache key {0:?}")]
    InvalidKey(String),

    #[error("tag cache: {0}")]
    TagCache(#[from] ActorError),

    #[error("stored body is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}
