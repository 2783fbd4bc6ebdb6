//! Routes tag operations to their shard.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{TagCache, TagCacheActor};
use crate::actor::{ActorError, Clock, Namespace};
use crate::purge::{PurgeActor, PURGE_ACTOR_ID};

pub struct ShardedTagCache {
    namespace: Arc<Namespace<TagCacheActor>>,
    shards: u32,
    clock: Arc<dyn Clock>,
    purge: Option<Arc<Namespace<PurgeActor>>>,
}

impl ShardedTagCache {
    pub fn new(
        namespace: Arc<Namespace<TagCacheActor>>,
        shards: u32,
        clock: Arc<dyn Clock>,
        purge: Option<Arc<Namespace<PurgeActor>>>,
    ) -> Self {
        Self {
            namespace,
            shards: shards.max(1),
            clock,
            purge,
        }
    }

    pub fn shard_for(&self, tag: &str) -> String {
        format!("tag-shard-{}", fnv1a(tag) % self.shards)
    }

    fn by_shard(&self, tags: &[String]) -> BTreeMap<String, Vec<String>> {
        let mut shards: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for tag in tags {
            shards.entry(self.shard_for(tag)).or_default().push(tag.clone());
        }
        shards
    }

    pub fn get_last_revalidated(&self, tags: &[String]) -> Result<i64, ActorError> {
        let mut last = 0;
        for (shard, tags) in self.by_shard(tags) {
            last = last.max(self.namespace.get(&shard)?.get_last_revalidated(&tags)?);
        }
        Ok(last)
    }

    pub fn get_revalidation_times(&self, tags: &[String]) -> Result<BTreeMap<String, i64>, ActorError> {
        let mut times = BTreeMap::new();
        for (shard, tags) in self.by_shard(tags) {
            times.extend(self.namespace.get(&shard)?.get_revalidation_times(&tags)?);
        }
        Ok(times)
    }

    /// Mark `tags` revalidated now and queue CDN purges. Returns the timestamp written.
    pub fn revalidate_tags(&self, tags: &[String]) -> Result<i64, ActorError> {
        let now = self.clock.now_ms();
        self.write_shards(tags, now)?;
        if let Some(purge) = &self.purge {
            purge.get(PURGE_ACTOR_ID)?.purge_cache_by_tags(tags)?;
        }
        tracing::info!(tags = ?tags, revalidated_at = now, "tags revalidated");
        Ok(now)
    }

    fn write_shards(&self, tags: &[String], revalidated_at: i64) -> Result<(), ActorError> {
        for (shard, tags) in self.by_shard(tags) {
            self.namespace.get(&shard)?.write_tags(&tags, revalidated_at)?;
        }
        Ok(())
    }
}

#[async_trait]
impl TagCache for ShardedTagCache {
    async fn has_been_revalidated(&self, tags: &[String], last_modified: i64) -> Result<bool, ActorError> {
        for (shard, tags) in self.by_shard(tags) {
            if self.namespace.get(&shard)?.has_been_revalidated(&tags, last_modified)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn write_tags(&self, tags: &[String], revalidated_at: i64) -> Result<(), ActorError> {
        self.write_shards(tags, revalidated_at)
    }
}

impl std::fmt::Debug for ShardedTagCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedTagCache")
            .field("shards", &self.shards)
            .field("purge", &self.purge.is_some())
            .finish()
    }
}

fn fnv1a(s: &str) -> u32 {
    s.bytes().fold(0x811c_9dc5u32, |hash, b| {
        (hash ^ u32::from(b)).wrapping_mul(0x0100_0193)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ManualClock;

    fn client(shards: u32, clock: Arc<ManualClock>) -> ShardedTagCache {
        let namespace = Arc::new(Namespace::new("tags", None, clock.clone(), |ctx| {
            TagCacheActor::create(ctx)
        }));
        ShardedTagCache::new(namespace, shards, clock, None)
    }

    #[test]
    fn test_shard_assignment_is_stable() {
        let cache = client(4, Arc::new(ManualClock::new(0)));
        let first = cache.shard_for("posts");
        assert_eq!(cache.shard_for("posts"), first);
        assert!(first.starts_with("tag-shard-"));
        assert_eq!(fnv1a(""), 0x811c_9dc5);
    }

    #[tokio::test]
    async fn test_revalidate_tags_across_shards() {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = client(3, clock.clone());
        let tags: Vec<String> = (0..12).map(|i| format!("tag-{i}")).collect();

        clock.set(5_000);
        assert_eq!(cache.revalidate_tags(&tags[..6]).unwrap(), 5_000);

        assert!(cache.has_been_revalidated(&tags, 4_999).await.unwrap());
        assert!(!cache.has_been_revalidated(&tags, 5_000).await.unwrap());
        assert!(!cache.has_been_revalidated(&tags[6..], 0).await.unwrap());
        assert_eq!(cache.get_last_revalidated(&tags).unwrap(), 5_000);
        assert_eq!(cache.get_revalidation_times(&tags).unwrap().len(), 6);
    }
}
