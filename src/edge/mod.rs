//! Edge entry point: everything that runs before a request reaches an origin.
//!
//! # Data Flow
//! ```text
//! InternalEvent
//!     → skew.rs (pinned to another deployment? proxy there)
//!     → image.rs (/cdn-cgi/image/..., <basePath>/_next/image)
//!     → routing engine (redirects, middleware, rewrites, ISR cache)
//!     → Routed::Respond | Routed::Forward (origin dispatch)
//! ```
//!
//! # Design Decisions
//! - One [`Edge`] per build output; a config or build change swaps the whole
//!   value, long-lived services (actors, caches) are shared across swaps
//! - Stages answer with `Option`, the first `Some` wins

pub mod entry;
pub mod image;
pub mod skew;
pub mod sniff;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::actor::Clock;
use crate::assets::{AssetResolver, StaticAssets};
use crate::cache::{CacheInterceptor, FilesystemCache, IncrementalCache};
use crate::config::EdgeConfig;
use crate::manifest::{BuildOutput, ManifestError};
use crate::revalidation::Queue;
use crate::routing::engine::{RoutingContext, RoutingOptions};
use crate::routing::middleware::{Middleware, MiddlewareError, MiddlewareRegistry, RemoteMiddleware};
use crate::tag_cache::TagCache;

pub use image::ImageHandler;
pub use skew::SkewProtection;

#[derive(Debug, Error)]
pub enum EdgeError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Middleware(#[from] MiddlewareError),

    #[error(transparent)]
    Image(#[from] image::ImageSetupError),
}

/// Services that outlive a routing context.
#[derive(Clone)]
pub struct EdgeServices {
    pub clock: Arc<dyn Clock>,
    /// Shared store; when `None`, a filesystem cache is opened per build.
    pub cache: Option<Arc<dyn IncrementalCache>>,
    pub cache_dir: Option<PathBuf>,
    pub tag_cache: Option<Arc<dyn TagCache>>,
    pub queue: Option<Arc<dyn Queue>>,
    /// Middleware implementations by manifest entry name.
    pub middleware: HashMap<String, Arc<dyn Middleware>>,
}

impl EdgeServices {
    fn incremental_cache(&self, build_id: &str) -> Option<Arc<dyn IncrementalCache>> {
        if let Some(cache) = &self.cache {
            return Some(cache.clone());
        }
        self.cache_dir.as_ref().map(|dir| {
            Arc::new(FilesystemCache::new(dir, build_id, self.clock.clone())) as Arc<dyn IncrementalCache>
        })
    }
}

/// Everything compiled from one build output and config.
#[derive(Debug)]
pub struct Edge {
    pub routing: RoutingContext,
    pub images: ImageHandler,
    pub skew: SkewProtection,
}

impl Edge {
    pub fn build(
        config: &EdgeConfig,
        build: Arc<BuildOutput>,
        services: &EdgeServices,
    ) -> Result<Self, EdgeError> {
        let assets: Option<Arc<dyn AssetResolver>> = config.build.assets_dir.as_ref().map(|dir| {
            Arc::new(StaticAssets::new(dir, build.next_config.base_path.clone())) as Arc<dyn AssetResolver>
        });

        let default_middleware: Option<Arc<dyn Middleware>> = match &config.routing.middleware_endpoint {
            Some(endpoint) => Some(Arc::new(RemoteMiddleware::new(
                endpoint.clone(),
                Duration::from_secs(config.timeouts.request_secs),
            )?)),
            None => None,
        };
        let middleware = MiddlewareRegistry::new(&build.middleware, &services.middleware, default_middleware)?;

        let interceptor = match services.incremental_cache(&build.build_id) {
            Some(cache) => Some(Arc::new(CacheInterceptor::new(
                build.clone(),
                cache,
                services.tag_cache.clone(),
                services.queue.clone(),
                services.clock.clone(),
                config.queue.max_revalidate_concurrency,
            )?)),
            None => None,
        };

        let options = RoutingOptions {
            enable_cache_interception: config.routing.enable_cache_interception,
            middleware_headers_override_next_config: config.routing.middleware_headers_override_next_config,
        };

        tracing::info!(
            build_id = %build.build_id,
            middleware = !middleware.is_empty(),
            cache_interception = options.enable_cache_interception && interceptor.is_some(),
            "edge context built"
        );

        Ok(Self {
            images: ImageHandler::new(&config.images, &build.next_config, assets.clone())?,
            skew: SkewProtection::new(&config.skew_protection),
            routing: RoutingContext::new(build, middleware, options, assets, interceptor)?,
        })
    }
}
