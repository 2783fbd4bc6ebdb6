//! The purge worklist actor.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use rusqlite::params_from_iter;

use super::{PurgeApi, PurgeError};
use crate::actor::{ActorContext, ActorError, AlarmScheduler, Clock, DurableActor, SqlStorage};
use crate::config::PurgeConfig;
use crate::observability::metrics;

pub const PURGE_ACTOR_ID: &str = "cache-purge";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cache_purge (tag TEXT NOT NULL);
CREATE UNIQUE INDEX IF NOT EXISTS tag_index ON cache_purge (tag);
";

#[derive(Debug, Clone, Copy)]
pub struct PurgeSettings {
    pub buffer_ms: i64,
    pub page_size: usize,
}

impl PurgeSettings {
    pub fn from_config(config: &PurgeConfig) -> Self {
        Self {
            buffer_ms: i64::try_from(config.buffer_time_in_seconds.saturating_mul(1000))
                .unwrap_or(i64::MAX),
            page_size: config.page_size.clamp(1, 100),
        }
    }
}

pub struct PurgeActor {
    storage: Arc<SqlStorage>,
    alarms: AlarmScheduler,
    clock: Arc<dyn Clock>,
    api: Arc<dyn PurgeApi>,
    settings: PurgeSettings,
}

impl PurgeActor {
    pub fn create(
        ctx: ActorContext,
        api: Arc<dyn PurgeApi>,
        settings: PurgeSettings,
    ) -> Result<Arc<Self>, ActorError> {
        ctx.storage.execute_batch(SCHEMA)?;
        let actor = Arc::new_cyclic(|this: &Weak<Self>| {
            let target: Weak<dyn DurableActor> = this.clone();
            Self {
                alarms: AlarmScheduler::new(
                    Arc::clone(&ctx.storage),
                    Arc::clone(&ctx.clock),
                    target,
                    format!("purge/{}", ctx.id),
                ),
                storage: ctx.storage,
                clock: ctx.clock,
                api,
                settings,
            }
        });
        actor.alarms.resume()?;
        Ok(actor)
    }

    /// Record tags for purging; the first call in a window arms the flush.
    pub fn purge_cache_by_tags(&self, tags: &[String]) -> Result<(), ActorError> {
        self.storage.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("INSERT OR REPLACE INTO cache_purge (tag) VALUES (?1)")?;
                for tag in tags {
                    stmt.execute([tag])?;
                }
            }
            tx.commit()
        })?;
        if self.alarms.get_alarm()?.is_none() {
            self.alarms
                .set_alarm(self.clock.now_ms() + self.settings.buffer_ms)?;
        }
        Ok(())
    }

    pub fn pending(&self) -> Result<usize, ActorError> {
        let count: i64 = self
            .storage
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM cache_purge", [], |r| r.get(0)))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn next_alarm(&self) -> Result<Option<i64>, ActorError> {
        self.alarms.get_alarm()
    }

    fn next_page(&self) -> Result<Vec<String>, ActorError> {
        let limit = i64::try_from(self.settings.page_size).unwrap_or(100);
        self.storage.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT tag FROM cache_purge LIMIT ?1")?;
            let tags = stmt
                .query_map([limit], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tags)
        })
    }

    fn delete_tags(&self, tags: &[String]) -> Result<(), ActorError> {
        let placeholders = vec!["?"; tags.len()].join(",");
        self.storage.with_conn(|conn| {
            conn.execute(
                &format!("DELETE FROM cache_purge WHERE tag IN ({placeholders})"),
                params_from_iter(tags.iter()),
            )
        })?;
        Ok(())
    }
}

#[async_trait]
impl DurableActor for PurgeActor {
    async fn alarm(&self) -> Result<(), ActorError> {
        let mut page = self.next_page()?;
        while !page.is_empty() {
            match self.api.purge_tags(&page).await {
                Ok(()) => {
                    metrics::record_purge_call("success", page.len());
                    tracing::debug!(tags = page.len(), "cache purged");
                }
                Err(PurgeError::RateLimited) => {
                    metrics::record_purge_call("rate_limited", page.len());
                    return Err(ActorError::Alarm(PurgeError::RateLimited.to_string()));
                }
                Err(e) => {
                    metrics::record_purge_call("failed", page.len());
                    tracing::error!(tags = page.len(), error = %e, "cache purge failed, dropping batch");
                }
            }
            self.delete_tags(&page)?;
            if page.len() < self.settings.page_size {
                break;
            }
            page = self.next_page()?;
        }
        Ok(())
    }
}
