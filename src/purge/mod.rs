//! Batched CDN cache purges.
//!
//! # Data Flow
//! ```text
//! revalidate_tags(tags)
//!     → PurgeActor::purge_cache_by_tags (unique rows in cache_purge)
//!     → first request in a window arms the debounce alarm
//!     → alarm: pages of `page_size` tags → PurgeApi → rows deleted
//!     → 429 aborts the alarm; the actor host retries it with backoff
//! ```
//!
//! # Design Decisions
//! - One actor instance for the whole zone so batches are as large as possible
//! - Non rate-limit failures drop the page; purging is best effort

pub mod actor;
pub mod api;

pub use actor::{PurgeActor, PurgeSettings, PURGE_ACTOR_ID};
pub use api::{HttpPurgeApi, PurgeApi, PurgeError};
