//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Origin request fails (connect error, 5xx on idempotent method):
//!     → backoff.rs (exponential delay with jitter) → retry
//!
//! Actor alarm handler fails:
//!     → backoff.rs (fixed 2^attempt seconds) → re-arm, bounded attempts
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline; timeouts live with the caller's config
//! - Origin retries only for idempotent methods (GET, HEAD, OPTIONS, PUT, DELETE)

pub mod backoff;

pub use backoff::{alarm_retry_delay, calculate_backoff, is_idempotent};
