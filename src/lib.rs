//! Edge render gateway for Next.js build output.
//!
//! Routes requests the way the Next.js server would (redirects, middleware,
//! rewrites, i18n, fallback pages), answers ISR pages from the incremental
//! cache, coordinates background revalidation through durable actors and
//! forwards everything else to render origins.

pub mod actor;
pub mod admin;
pub mod app;
pub mod assets;
pub mod cache;
pub mod config;
pub mod edge;
pub mod http;
pub mod lifecycle;
pub mod manifest;
pub mod observability;
pub mod origin;
pub mod purge;
pub mod resilience;
pub mod revalidation;
pub mod routing;
pub mod tag_cache;

pub use app::EdgeApp;
pub use config::schema::EdgeConfig;
pub use http::EdgeServer;
pub use lifecycle::Shutdown;
