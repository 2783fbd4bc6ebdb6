//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     ctrl-c → broadcast → stop accepting → stop health checks / watchers
//!
//! Background work (tasks.rs):
//!     request handler → RequestTasks (revalidation sends, ...)
//!     → joined in the background after the response
//!     → BackgroundTracker drained on shutdown (bounded by a grace period)
//! ```
//!
//! # Design Decisions
//! - Shutdown has a timeout: leftover background work is abandoned after the grace period
//! - Actor alarms are persisted, so abandoned retries resume on the next start

pub mod shutdown;
pub mod tasks;

pub use shutdown::Shutdown;
pub use tasks::{BackgroundTracker, RequestTasks};
