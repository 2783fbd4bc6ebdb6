//! Tag revalidation times, sharded across actor instances.
//!
//! # Data Flow
//! ```text
//! cache interceptor: value tagged [a, b], lastModified t
//!     → ShardedTagCache::has_been_revalidated → tag-shard-<hash % shards>
//!     → any revalidatedAt > t ⇒ treat as a miss
//!
//! admin: revalidate_tags([a])
//!     → write_tags(now) on each owning shard → PurgeActor (when enabled)
//! ```

pub mod actor;
pub mod client;

use async_trait::async_trait;

use crate::actor::ActorError;

pub use actor::TagCacheActor;
pub use client::ShardedTagCache;

/// Answers whether cached values are still valid for their tags.
#[async_trait]
pub trait TagCache: Send + Sync {
    async fn has_been_revalidated(&self, tags: &[String], last_modified: i64)
        -> Result<bool, ActorError>;

    async fn write_tags(&self, tags: &[String], revalidated_at: i64) -> Result<(), ActorError>;
}
