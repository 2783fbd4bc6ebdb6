//! Origin dispatch: where routed requests get rendered.
//!
//! # Data Flow
//! ```text
//! RoutingResult (from the routing engine)
//!     → external rewrite? → external.rs (reqwest, absolute URL)
//!     → resolver.rs (host/path-prefix rules → origin group)
//!     → pool.rs (balancer.rs picks a healthy backend, connection cap)
//!     → proxy.rs (hyper client, retry loop, passive health)
//!     → x-middleware-response-* headers applied to the response
//!
//! health.rs probes every backend periodically (active checks).
//! ```
//!
//! # Design Decisions
//! - Strategy chosen by name at startup, one balancer per group
//! - Only idempotent methods are retried
//! - Unhealthy backends are skipped until they pass `healthy_threshold` probes

pub mod backend;
pub mod balancer;
pub mod external;
pub mod health;
pub mod pool;
pub mod proxy;
pub mod resolver;

use thiserror::Error;

pub use external::ExternalProxy;
pub use health::HealthMonitor;
pub use pool::OriginPool;
pub use proxy::{ForwardContext, OriginDispatcher};
pub use resolver::OriginResolver;

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("no origin group named {0}")]
    UnknownGroup(String),

    #[error("no healthy backend in group {0}")]
    NoHealthyBackend(String),

    #[error("backend {0} is at its connection limit")]
    AtCapacity(String),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("external request failed: {0}")]
    External(#[from] reqwest::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl OriginError {
    pub fn status(&self) -> u16 {
        match self {
            Self::NoHealthyBackend(_) | Self::AtCapacity(_) => 503,
            Self::External(e) if e.is_timeout() => 504,
            Self::InvalidRequest(_) => 400,
            Self::UnknownGroup(_) | Self::Upstream(_) | Self::External(_) => 502,
        }
    }
}
