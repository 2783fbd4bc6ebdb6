//! One tag-cache shard.

use std::collections::BTreeMap;
use std::sync::Arc;

use rusqlite::{params_from_iter, types::Value};

use crate::actor::{ActorContext, ActorError, SqlStorage};

const SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS revalidations (tag TEXT PRIMARY KEY, revalidatedAt INTEGER)";

#[derive(Debug)]
pub struct TagCacheActor {
    storage: Arc<SqlStorage>,
}

impl TagCacheActor {
    pub fn create(ctx: ActorContext) -> Result<Arc<Self>, ActorError> {
        ctx.storage.execute_batch(SCHEMA)?;
        Ok(Arc::new(Self {
            storage: ctx.storage,
        }))
    }

    /// Latest revalidation of any of `tags`, 0 when none was recorded.
    pub fn get_last_revalidated(&self, tags: &[String]) -> Result<i64, ActorError> {
        if tags.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "SELECT MAX(revalidatedAt) FROM revalidations WHERE tag IN ({})",
            placeholders(tags.len())
        );
        let last: Option<i64> = self.storage.with_conn(|conn| {
            conn.query_row(&sql, params_from_iter(tags.iter()), |row| row.get(0))
        })?;
        Ok(last.unwrap_or(0))
    }

    pub fn has_been_revalidated(&self, tags: &[String], last_modified: i64) -> Result<bool, ActorError> {
        if tags.is_empty() {
            return Ok(false);
        }
        let sql = format!(
            "SELECT 1 FROM revalidations WHERE tag IN ({}) AND revalidatedAt > ? LIMIT 1",
            placeholders(tags.len())
        );
        let args: Vec<Value> = tags
            .iter()
            .map(|t| Value::Text(t.clone()))
            .chain(std::iter::once(Value::Integer(last_modified)))
            .collect();
        let found = self.storage.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            stmt.exists(params_from_iter(args.iter()))
        })?;
        Ok(found)
    }

    /// Last writer wins per tag.
    pub fn write_tags(&self, tags: &[String], revalidated_at: i64) -> Result<(), ActorError> {
        self.storage.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO revalidations (tag, revalidatedAt) VALUES (?1, ?2)",
                )?;
                for tag in tags {
                    stmt.execute(rusqlite::params![tag, revalidated_at])?;
                }
            }
            tx.commit()
        })?;
        Ok(())
    }

    pub fn get_revalidation_times(&self, tags: &[String]) -> Result<BTreeMap<String, i64>, ActorError> {
        if tags.is_empty() {
            return Ok(BTreeMap::new());
        }
        let sql = format!(
            "SELECT tag, revalidatedAt FROM revalidations WHERE tag IN ({})",
            placeholders(tags.len())
        );
        self.storage.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let times = stmt
                .query_map(params_from_iter(tags.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<rusqlite::Result<BTreeMap<String, i64>>>()?;
            Ok(times)
        })
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::SystemClock;

    fn shard() -> Arc<TagCacheActor> {
        TagCacheActor::create(ActorContext {
            id: "tag-shard-0".to_string(),
            storage: Arc::new(SqlStorage::in_memory().unwrap()),
            clock: Arc::new(SystemClock),
        })
        .unwrap()
    }

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_last_revalidated_defaults_to_zero() {
        let cache = shard();
        assert_eq!(cache.get_last_revalidated(&tags(&["a"])).unwrap(), 0);
        cache.write_tags(&tags(&["a", "b"]), 100).unwrap();
        cache.write_tags(&tags(&["b"]), 250).unwrap();
        assert_eq!(cache.get_last_revalidated(&tags(&["a", "b", "c"])).unwrap(), 250);
    }

    #[test]
    fn test_revalidated_iff_some_tag_is_newer() {
        let cache = shard();
        let written = [("a", 100), ("b", 200), ("c", 300)];
        for (tag, at) in written {
            cache.write_tags(&tags(&[tag]), at).unwrap();
        }
        let sets: [&[&str]; 5] = [&["a"], &["a", "b"], &["c"], &["a", "x"], &["x"]];
        for set in sets {
            for t in [0, 99, 100, 150, 200, 299, 300, 400] {
                let expected = written
                    .iter()
                    .any(|(tag, at)| set.contains(tag) && *at > t);
                assert_eq!(
                    cache.has_been_revalidated(&tags(set), t).unwrap(),
                    expected,
                    "tags {set:?} at {t}"
                );
            }
        }
    }

    #[test]
    fn test_last_writer_wins() {
        let cache = shard();
        cache.write_tags(&tags(&["a"]), 500).unwrap();
        cache.write_tags(&tags(&["a"]), 400).unwrap();
        let times = cache.get_revalidation_times(&tags(&["a", "missing"])).unwrap();
        assert_eq!(times.len(), 1);
        assert_eq!(times["a"], 400);
    }
}
