//! The revalidation queue actor: one instance per `revalidate-<n>` shard.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use super::{RevalidationError, RevalidationMessage};
use crate::actor::{ActorContext, ActorError, AlarmScheduler, Clock, DurableActor, SqlStorage};
use crate::config::QueueConfig;
use crate::observability::metrics;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS failed_state (id TEXT PRIMARY KEY, data TEXT, buildId TEXT);
CREATE TABLE IF NOT EXISTS sync (id TEXT PRIMARY KEY, lastSuccess INTEGER, buildId TEXT);
";

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_revalidations: usize,
    pub revalidation_timeout: Duration,
    pub retry_interval_ms: i64,
    pub max_retries: u32,
    pub disable_sqlite: bool,
    pub protocol: Option<String>,
    pub build_id: String,
    pub preview_mode_id: String,
}

impl QueueSettings {
    pub fn from_config(config: &QueueConfig, build_id: &str, preview_mode_id: &str) -> Self {
        Self {
            max_revalidations: config.max_revalidations.max(1),
            revalidation_timeout: Duration::from_millis(config.revalidation_timeout_ms),
            retry_interval_ms: i64::try_from(config.retry_interval_ms).unwrap_or(i64::MAX),
            max_retries: config.max_retries,
            disable_sqlite: config.disable_sqlite,
            protocol: config.protocol.clone(),
            build_id: build_id.to_string(),
            preview_mode_id: preview_mode_id.to_string(),
        }
    }
}

/// A message whose revalidation failed and waits for the alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedState {
    pub msg: RevalidationMessage,
    pub retry_count: u32,
    pub next_alarm_ms: i64,
}

#[derive(Debug, Default)]
struct QueueState {
    ongoing: HashSet<String>,
    failed: HashMap<String, FailedState>,
}

/// Inspection view for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub id: String,
    pub ongoing: usize,
    pub failed: Vec<FailedState>,
    pub next_alarm_ms: Option<i64>,
}

pub struct QueueActor {
    id: String,
    settings: QueueSettings,
    storage: Arc<SqlStorage>,
    alarms: AlarmScheduler,
    clock: Arc<dyn Clock>,
    http: reqwest::Client,
    state: Mutex<QueueState>,
    capacity: Notify,
    this: Weak<QueueActor>,
}

impl QueueActor {
    /// Build the actor and restore its failed state from storage.
    pub fn create(
        ctx: ActorContext,
        settings: QueueSettings,
        http: reqwest::Client,
    ) -> Result<Arc<Self>, ActorError> {
        let actor = Arc::new_cyclic(|this: &Weak<Self>| {
            let target: Weak<dyn DurableActor> = this.clone();
            Self {
                alarms: AlarmScheduler::new(
                    Arc::clone(&ctx.storage),
                    Arc::clone(&ctx.clock),
                    target,
                    format!("queue/{}", ctx.id),
                ),
                id: ctx.id,
                settings,
                storage: ctx.storage,
                clock: ctx.clock,
                http,
                state: Mutex::new(QueueState::default()),
                capacity: Notify::new(),
                this: this.clone(),
            }
        });
        actor.init_state()?;
        actor.alarms.resume()?;
        Ok(actor)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, ActorError> {
        self.state.lock().map_err(|_| ActorError::Poisoned)
    }

    fn init_state(&self) -> Result<(), ActorError> {
        if self.settings.disable_sqlite {
            return Ok(());
        }
        let build_id = &self.settings.build_id;
        let rows = self.storage.with_conn(|conn| {
            conn.execute_batch(SCHEMA)?;
            let purged_failed =
                conn.execute("DELETE FROM failed_state WHERE buildId != ?1", [build_id])?;
            let purged_sync = conn.execute("DELETE FROM sync WHERE buildId != ?1", [build_id])?;
            if purged_failed + purged_sync > 0 {
                tracing::info!(
                    purged_failed,
                    purged_sync,
                    "dropped revalidation state of previous builds"
                );
            }
            let mut stmt = conn.prepare("SELECT id, data FROM failed_state")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        {
            let mut state = self.lock()?;
            for (id, data) in rows {
                match serde_json::from_str::<FailedState>(&data) {
                    Ok(failed) => {
                        state.failed.insert(id, failed);
                    }
                    Err(e) => tracing::warn!(id, error = %e, "skipping unreadable failed state"),
                }
            }
            if !state.failed.is_empty() {
                tracing::info!(actor = %self.id, restored = state.failed.len(), "failed revalidations restored");
            }
        }
        self.add_alarm()
    }

    /// Queue a revalidation unless it is in flight, failing, or already done.
    ///
    /// Waits while the shard is at capacity; the execution itself is detached.
    pub async fn revalidate(&self, msg: RevalidationMessage) -> Result<(), RevalidationError> {
        let id = msg.deduplication_id.clone();
        let max = self.settings.max_revalidations;
        {
            let state = self.lock()?;
            if state.ongoing.len() > 2 * max {
                tracing::warn!(
                    actor = %self.id,
                    ongoing = state.ongoing.len(),
                    max,
                    "revalidation backlog is growing"
                );
            }
            if state.ongoing.contains(&id) || state.failed.contains_key(&id) {
                return Ok(());
            }
        }
        if self.check_sync_table(&msg)? {
            tracing::debug!(actor = %self.id, url = %msg.body.url, "already revalidated");
            return Ok(());
        }

        loop {
            {
                let mut state = self.lock()?;
                if state.ongoing.contains(&id) {
                    return Ok(());
                }
                if state.ongoing.len() < max {
                    state.ongoing.insert(id.clone());
                    break;
                }
            }
            self.capacity.notified().await;
        }

        let Some(this) = self.this.upgrade() else {
            return Ok(());
        };
        tokio::spawn(async move {
            this.execute_revalidation(msg).await;
        });
        Ok(())
    }

    async fn execute_revalidation(&self, msg: RevalidationMessage) {
        let id = msg.deduplication_id.clone();
        match self.run_revalidation(&msg).await {
            Ok(()) => {
                metrics::record_revalidation("success");
                tracing::debug!(actor = %self.id, host = %msg.body.host, url = %msg.body.url, "revalidated");
            }
            Err(e) => {
                metrics::record_revalidation(e.kind());
                e.log(&id);
            }
        }
        self.release(&id);
    }

    /// Drop `id` from the in-flight set and wake one waiter. A poisoned lock is
    /// recovered, otherwise the route would stay in flight forever.
    fn release(&self, id: &str) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| {
            tracing::error!(actor = %self.id, "queue state lock poisoned, recovering");
            self.state.clear_poison();
            poisoned.into_inner()
        });
        state.ongoing.remove(id);
        drop(state);
        self.capacity.notify_one();
    }

    async fn run_revalidation(&self, msg: &RevalidationMessage) -> Result<(), RevalidationError> {
        let host = &msg.body.host;
        let url = &msg.body.url;
        let target = format!("{}://{host}{url}", self.protocol_for(host));

        let response = match self
            .http
            .head(&target)
            .header("x-prerender-revalidate", &self.settings.preview_mode_id)
            .header("x-isr", "1")
            .timeout(self.settings.revalidation_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.add_to_failed_state(msg)?;
                return Err(RevalidationError::Recoverable(format!(
                    "revalidation request to {host}{url} failed: {e}"
                )));
            }
        };

        let status = response.status().as_u16();
        let revalidated = response
            .headers()
            .get("x-nextjs-cache")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "REVALIDATED");
        // Release the connection whatever the outcome.
        let _ = response.bytes().await;

        match status {
            200 if revalidated => {}
            200 => {
                self.clear_failed_state(&msg.deduplication_id)?;
                return Err(RevalidationError::Fatal(format!(
                    "revalidation of {host}{url} returned 200 without being revalidated"
                )));
            }
            404 => {
                self.clear_failed_state(&msg.deduplication_id)?;
                return Err(RevalidationError::Ignorable(format!(
                    "{host}{url} no longer exists"
                )));
            }
            500 => {
                self.add_to_failed_state(msg)?;
                return Err(RevalidationError::Ignorable(format!(
                    "origin error while revalidating {host}{url}"
                )));
            }
            other => {
                self.add_to_failed_state(msg)?;
                return Err(RevalidationError::Recoverable(format!(
                    "unexpected status {other} while revalidating {host}{url}"
                )));
            }
        }

        if let Err(e) = self.record_success(msg) {
            self.add_to_failed_state(msg)?;
            return Err(e.into());
        }
        self.clear_failed_state(&msg.deduplication_id)?;
        Ok(())
    }

    fn protocol_for(&self, host: &str) -> &str {
        if let Some(protocol) = &self.settings.protocol {
            return protocol;
        }
        let hostname = host.split(':').next().unwrap_or(host);
        if hostname == "localhost" || hostname == "127.0.0.1" {
            "http"
        } else {
            "https"
        }
    }

    fn record_success(&self, msg: &RevalidationMessage) -> Result<(), ActorError> {
        if self.settings.disable_sqlite {
            return Ok(());
        }
        let now_secs = (self.clock.now_ms() as f64 / 1000.0).round() as i64;
        self.storage.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sync (id, lastSuccess, buildId) VALUES (?1, ?2, ?3)",
                params![msg.sync_id(), now_secs, self.settings.build_id],
            )
        })?;
        Ok(())
    }

    /// Whether a revalidation newer than the message's entry already succeeded.
    fn check_sync_table(&self, msg: &RevalidationMessage) -> Result<bool, ActorError> {
        if self.settings.disable_sqlite {
            return Ok(false);
        }
        let last_modified_secs = (msg.body.last_modified as f64 / 1000.0).round() as i64;
        let newer: i64 = self.storage.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM sync WHERE id = ?1 AND lastSuccess > ?2",
                params![msg.sync_id(), last_modified_secs],
                |row| row.get(0),
            )
        })?;
        Ok(newer > 0)
    }

    fn clear_failed_state(&self, id: &str) -> Result<(), ActorError> {
        let removed = self.lock()?.failed.remove(id).is_some();
        if removed && !self.settings.disable_sqlite {
            self.storage
                .with_conn(|conn| conn.execute("DELETE FROM failed_state WHERE id = ?1", [id]))?;
        }
        Ok(())
    }

    fn add_to_failed_state(&self, msg: &RevalidationMessage) -> Result<(), ActorError> {
        let id = &msg.deduplication_id;
        let previous = self.lock()?.failed.get(id).map(|f| f.retry_count);
        let retry_count = match previous {
            Some(count) if count >= self.settings.max_retries => {
                tracing::error!(
                    host = %msg.body.host,
                    url = %msg.body.url,
                    retries = count,
                    "revalidation keeps failing, giving up until the next request"
                );
                return self.clear_failed_state(id);
            }
            Some(count) => count + 1,
            None => 1,
        };

        let backoff = 1i64 << (retry_count + 1).min(40);
        let failed = FailedState {
            msg: msg.clone(),
            retry_count,
            next_alarm_ms: self.clock.now_ms()
                + self.settings.retry_interval_ms.saturating_mul(backoff),
        };
        self.lock()?.failed.insert(id.clone(), failed.clone());

        if !self.settings.disable_sqlite {
            let data = serde_json::to_string(&failed)?;
            self.storage.with_conn(|conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO failed_state (id, data, buildId) VALUES (?1, ?2, ?3)",
                    params![id, data, self.settings.build_id],
                )
            })?;
        }
        self.add_alarm()
    }

    /// Arm the alarm for the earliest retry, unless one is already pending.
    fn add_alarm(&self) -> Result<(), ActorError> {
        if self.alarms.get_alarm()?.is_some() {
            return Ok(());
        }
        let earliest = self.lock()?.failed.values().map(|f| f.next_alarm_ms).min();
        let Some(mut at) = earliest else {
            return Ok(());
        };
        let now = self.clock.now_ms();
        if at < now {
            at = now + self.settings.retry_interval_ms;
        }
        self.alarms.set_alarm(at)
    }

    pub fn next_alarm(&self) -> Result<Option<i64>, ActorError> {
        self.alarms.get_alarm()
    }

    pub fn snapshot(&self) -> Result<QueueSnapshot, ActorError> {
        let (ongoing, mut failed) = {
            let state = self.lock()?;
            (state.ongoing.len(), state.failed.values().cloned().collect::<Vec<_>>())
        };
        failed.sort_by_key(|f| f.next_alarm_ms);
        Ok(QueueSnapshot {
            id: self.id.clone(),
            ongoing,
            failed,
            next_alarm_ms: self.alarms.get_alarm()?,
        })
    }
}

#[async_trait]
impl DurableActor for QueueActor {
    /// Retry the earliest pending entry plus everything already due, one at a time.
    async fn alarm(&self) -> Result<(), ActorError> {
        let now = self.clock.now_ms();
        let batch: Vec<RevalidationMessage> = {
            let state = self.lock()?;
            let next = state
                .failed
                .values()
                .filter(|f| f.next_alarm_ms > now)
                .min_by_key(|f| f.next_alarm_ms)
                .map(|f| f.msg.clone());
            next.into_iter()
                .chain(
                    state
                        .failed
                        .values()
                        .filter(|f| f.next_alarm_ms <= now)
                        .map(|f| f.msg.clone()),
                )
                .collect()
        };
        tracing::debug!(actor = %self.id, retries = batch.len(), "revalidation alarm");
        for msg in batch {
            self.execute_revalidation(msg).await;
        }
        Ok(())
    }
}
