//! Durable single-instance actors.
//!
//! # Data Flow
//! ```text
//! caller → Namespace::get(id)
//!     → existing instance, or factory(ActorContext { storage, clock })
//!     → actor methods (state mutex, never held across .await)
//!
//! AlarmScheduler::set_alarm(at)
//!     → `_alarm` row persisted in the actor's SQLite file
//!     → tokio timer fires → row cleared → DurableActor::alarm()
//!     → Err → re-armed with 2^attempt s backoff, bounded attempts
//! ```
//!
//! # Design Decisions
//! - One SQLite file per actor instance; in-memory when no state dir is configured
//! - A newer `set_alarm` supersedes a pending timer (generation counter)
//! - Persisted alarms are resumed when the instance is recreated

pub mod alarm;
pub mod clock;
pub mod namespace;
pub mod storage;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use alarm::AlarmScheduler;
pub use clock::{Clock, ManualClock, SystemClock};
pub use namespace::{ActorContext, Namespace};
pub use storage::SqlStorage;

#[derive(Debug, Error)]
pub enum ActorError {
    #[error("actor storage: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("cannot prepare actor storage at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("actor storage lock poisoned")]
    Poisoned,

    #[error("corrupt actor state: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("alarm handler failed: {0}")]
    Alarm(String),
}

/// An actor that can receive scheduled alarms.
#[async_trait]
pub trait DurableActor: Send + Sync + 'static {
    async fn alarm(&self) -> Result<(), ActorError>;
}
