//! ISR revalidation coordination.
//!
//! # Data Flow
//! ```text
//! cache interceptor serves a STALE entry
//!     → RevalidationMessage { body, dedup id, group id }
//!     → QueueClient::send → Namespace<QueueActor>::get("revalidate-<n>")
//!     → QueueActor::revalidate (dedup, failed-state, sync checks, capacity wait)
//!     → detached HEAD to the origin with the preview secret
//!     → sync row on success, failed_state + alarm on failure
//! ```
//!
//! # Design Decisions
//! - Shards are chosen by a seeded hash of the path so one route always lands on one actor
//! - Routes in failed state are only retried by the alarm, never by new arrivals
//! - In-flight executions are not persisted; a restart forgets them

pub mod message;
pub mod queue;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::actor::{ActorError, Namespace};

pub use message::{cyrb128, message_group_id, MessageBody, RevalidationMessage};
pub use queue::{FailedState, QueueActor, QueueSettings, QueueSnapshot};

/// Revalidation outcomes that are not a success, by severity.
#[derive(Debug, Error)]
pub enum RevalidationError {
    /// Expected outcome (page gone, origin hiccup already queued for retry).
    #[error("{0}")]
    Ignorable(String),

    #[error("{0}")]
    Recoverable(String),

    /// Internal inconsistency; never retried.
    #[error("{0}")]
    Fatal(String),

    #[error(transparent)]
    Actor(#[from] ActorError),
}

impl RevalidationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ignorable(_) => "ignorable",
            Self::Recoverable(_) => "recoverable",
            Self::Fatal(_) => "fatal",
            Self::Actor(_) => "actor",
        }
    }

    /// Log at the severity the outcome deserves.
    pub fn log(&self, dedup_id: &str) {
        match self {
            Self::Ignorable(msg) => tracing::debug!(dedup_id, "{msg}"),
            Self::Recoverable(msg) => tracing::warn!(dedup_id, "{msg}"),
            Self::Fatal(msg) => tracing::error!(dedup_id, "{msg}"),
            Self::Actor(e) => tracing::error!(dedup_id, error = %e, "revalidation state error"),
        }
    }
}

/// Where stale pages send their revalidation requests.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn send(&self, message: RevalidationMessage) -> Result<(), RevalidationError>;
}

/// Routes messages to the queue actor named by their group id.
#[derive(Debug, Clone)]
pub struct QueueClient {
    namespace: Arc<Namespace<QueueActor>>,
}

impl QueueClient {
    pub fn new(namespace: Arc<Namespace<QueueActor>>) -> Self {
        Self { namespace }
    }

    pub fn namespace(&self) -> &Arc<Namespace<QueueActor>> {
        &self.namespace
    }
}

#[async_trait]
impl Queue for QueueClient {
    async fn send(&self, message: RevalidationMessage) -> Result<(), RevalidationError> {
        let actor = self.namespace.get(&message.group_id)?;
        actor.revalidate(message).await
    }
}
