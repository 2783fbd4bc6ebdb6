//! Persisted single-alarm scheduling for one actor instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use rusqlite::{params, OptionalExtension};

use super::{ActorError, Clock, DurableActor, SqlStorage};
use crate::resilience::alarm_retry_delay;

/// Attempts of a failing alarm handler before the alarm is abandoned.
pub const MAX_ALARM_ATTEMPTS: u32 = 6;

/// At most one pending alarm per actor, like a timer that can be re-set but not stacked.
pub struct AlarmScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    storage: Arc<SqlStorage>,
    clock: Arc<dyn Clock>,
    target: Weak<dyn DurableActor>,
    generation: AtomicU64,
    label: String,
}

impl AlarmScheduler {
    pub fn new(
        storage: Arc<SqlStorage>,
        clock: Arc<dyn Clock>,
        target: Weak<dyn DurableActor>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                clock,
                target,
                generation: AtomicU64::new(0),
                label: label.into(),
            }),
        }
    }

    /// Scheduled time in epoch milliseconds, if an alarm is pending.
    pub fn get_alarm(&self) -> Result<Option<i64>, ActorError> {
        Ok(self.inner.stored()?.map(|(at, _)| at))
    }

    /// Schedule the alarm, replacing any pending one.
    pub fn set_alarm(&self, at_ms: i64) -> Result<(), ActorError> {
        self.inner.arm(at_ms, 0)
    }

    pub fn delete_alarm(&self) -> Result<(), ActorError> {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.clear()
    }

    /// Start the timer for an alarm persisted by a previous incarnation.
    pub fn resume(&self) -> Result<(), ActorError> {
        if let Some((at, attempt)) = self.inner.stored()? {
            tracing::debug!(actor = %self.inner.label, at, attempt, "resuming persisted alarm");
            Inner::start_timer(&self.inner, at, attempt);
        }
        Ok(())
    }
}

impl Inner {
    fn stored(&self) -> Result<Option<(i64, u32)>, ActorError> {
        self.storage.with_conn(|conn| {
            conn.query_row("SELECT at, attempt FROM _alarm WHERE id = 0", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()
        })
    }

    fn clear(&self) -> Result<(), ActorError> {
        self.storage
            .with_conn(|conn| conn.execute("DELETE FROM _alarm WHERE id = 0", []))?;
        Ok(())
    }

    fn arm(self: &Arc<Self>, at_ms: i64, attempt: u32) -> Result<(), ActorError> {
        self.storage.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO _alarm (id, at, attempt) VALUES (0, ?1, ?2)",
                params![at_ms, attempt],
            )
        })?;
        Self::start_timer(self, at_ms, attempt);
        Ok(())
    }

    fn start_timer(this: &Arc<Self>, at_ms: i64, attempt: u32) {
        let generation = this.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(actor = %this.label, "no runtime, alarm persisted only");
            return;
        };
        let delay = u64::try_from(at_ms - this.clock.now_ms()).unwrap_or(0);
        let inner = Arc::clone(this);
        handle.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            inner.fire(generation, attempt).await;
        });
    }

    async fn fire(self: Arc<Self>, generation: u64, attempt: u32) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if let Err(e) = self.clear() {
            tracing::error!(actor = %self.label, error = %e, "failed to clear alarm");
        }
        let Some(target) = self.target.upgrade() else {
            return;
        };

        let Err(e) = target.alarm().await else {
            return;
        };
        let next_attempt = attempt + 1;
        if next_attempt >= MAX_ALARM_ATTEMPTS {
            tracing::error!(actor = %self.label, attempts = next_attempt, error = %e, "alarm abandoned");
            return;
        }
        let delay = alarm_retry_delay(next_attempt);
        tracing::warn!(
            actor = %self.label,
            attempt = next_attempt,
            retry_in_ms = delay.as_millis() as u64,
            error = %e,
            "alarm failed, retrying"
        );
        let at = self.clock.now_ms() + delay.as_millis() as i64;
        if let Err(e) = self.arm(at, next_attempt) {
            tracing::error!(actor = %self.label, error = %e, "failed to re-arm alarm");
        }
    }
}
