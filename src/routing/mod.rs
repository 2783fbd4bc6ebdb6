//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! InternalEvent (from http::converter)
//!     → engine.rs (fixed stage order, errors become a /500 rewrite)
//!         → rules.rs       config headers, redirects, rewrites
//!         → normalize.rs   data routes, slash redirects
//!         → i18n.rs        locale detection / redirect
//!         → middleware.rs  Next.js middleware
//!         → matcher.rs     static / dynamic route lookup
//!         → fallback.rs    fallback: false → /404
//!         → cache::interceptor (optional)
//!     → Routed::Respond(InternalResult) | Routed::Forward(RoutingResult)
//!
//! Context compilation (at startup and on reload):
//!     BuildOutput
//!     → compile route regexes, rule regexes, middleware matchers
//!     → freeze as immutable RoutingContext (swapped atomically on reload)
//! ```
//!
//! # Design Decisions
//! - All manifest state lives in an explicit RoutingContext; nothing is global
//! - Stages return values; the event is never shared across requests
//! - Matching is non-exclusive; static routes take precedence over dynamic ones

pub mod engine;
pub mod fallback;
pub mod i18n;
pub mod matcher;
pub mod middleware;
pub mod normalize;
pub mod path_template;
pub mod rules;
pub mod url;

use thiserror::Error;

use crate::http::event::{InternalEvent, InternalResult};

pub use engine::{RoutingContext, RoutingOptions};

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error(transparent)]
    Template(#[from] path_template::TemplateError),

    #[error("invalid url {url:?}: {source}")]
    Url {
        url: String,
        #[source]
        source: ::url::ParseError,
    },

    #[error("invalid rewrite destination {0:?}")]
    Destination(String),

    #[error("middleware failed: {0}")]
    Middleware(String),
}

/// A stage either continues with an event or answers the request.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Continue(InternalEvent),
    Respond(InternalResult),
}
