//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum, request id, trace, timeout, body limit)
//!     → converter.rs (hyper request → InternalEvent)
//!     → edge + routing (event.rs types only)
//!     → converter.rs (InternalResult → response) | origin dispatch
//!     → Send to client
//! ```

pub mod converter;
pub mod event;
pub mod server;

pub use event::{InternalEvent, InternalResult, MultiValue, Routed, RoutingResult};
pub use server::{AppState, EdgeServer, X_REQUEST_ID};
