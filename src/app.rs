//! Assembly of the gateway from a validated configuration.
//!
//! # Data Flow
//! ```text
//! EdgeConfig
//!     → BuildOutput::load (manifests)
//!     → actor namespaces (purge → tag cache → revalidation queue)
//!     → EdgeServices (clock, incremental cache, tag cache, queue)
//!     → Edge (routing context, image handler, skew protection) in an ArcSwap
//!     → OriginPool + OriginDispatcher
//! ```
//!
//! # Design Decisions
//! - Reload rebuilds only the [`Edge`]; actors, origins and caches persist
//! - Actor namespaces are created up front, instances lazily on first use

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::actor::{Clock, Namespace, SystemClock};
use crate::admin::{admin_router, AdminState};
use crate::cache::{IncrementalCache, MemoryCache};
use crate::config::EdgeConfig;
use crate::edge::{Edge, EdgeError, EdgeServices};
use crate::http::{AppState, EdgeServer};
use crate::lifecycle::{BackgroundTracker, Shutdown};
use crate::manifest::{BuildOutput, ManifestError};
use crate::origin::{HealthMonitor, OriginDispatcher, OriginError, OriginPool};
use crate::purge::{HttpPurgeApi, PurgeActor, PurgeApi, PurgeError, PurgeSettings};
use crate::revalidation::{Queue, QueueActor, QueueClient, QueueSettings};
use crate::tag_cache::{ShardedTagCache, TagCache, TagCacheActor};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("build output: {0}")]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Edge(#[from] EdgeError),

    #[error(transparent)]
    Origin(#[from] OriginError),

    #[error(transparent)]
    Purge(#[from] PurgeError),

    #[error("http client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub struct EdgeApp {
    pub config: EdgeConfig,
    pub services: EdgeServices,
    pub edge: Arc<ArcSwap<Edge>>,
    pub origins: Arc<OriginDispatcher>,
    pub tracker: BackgroundTracker,
    pub queues: Arc<Namespace<QueueActor>>,
    pub tags: Arc<ShardedTagCache>,
    pub purge: Option<Arc<Namespace<PurgeActor>>>,
}

impl EdgeApp {
    pub fn build(config: EdgeConfig) -> Result<Self, AppError> {
        Self::build_with_clock(config, Arc::new(SystemClock))
    }

    pub fn build_with_clock(config: EdgeConfig, clock: Arc<dyn Clock>) -> Result<Self, AppError> {
        let build = Arc::new(BuildOutput::load(&config.build.dir)?);
        let state_dir = config.actors.state_dir.clone();

        let purge = if config.purge.enabled {
            let api: Arc<dyn PurgeApi> = Arc::new(HttpPurgeApi::new(&config.purge)?);
            let settings = PurgeSettings::from_config(&config.purge);
            Some(Arc::new(Namespace::new(
                "cache-purge",
                state_dir.clone(),
                clock.clone(),
                move |ctx| PurgeActor::create(ctx, api.clone(), settings),
            )))
        } else {
            None
        };

        let tag_namespace = Arc::new(Namespace::new(
            "tag-cache",
            state_dir.clone(),
            clock.clone(),
            TagCacheActor::create,
        ));
        let tags = Arc::new(ShardedTagCache::new(
            tag_namespace,
            config.tag_cache.shards,
            clock.clone(),
            purge.clone(),
        ));

        let settings = QueueSettings::from_config(&config.queue, &build.build_id, build.preview_mode_id());
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let queues = Arc::new(Namespace::new(
            "revalidation-queue",
            state_dir,
            clock.clone(),
            move |ctx| QueueActor::create(ctx, settings.clone(), http.clone()),
        ));

        let (cache, cache_dir) = incremental_cache(&config, clock.clone());
        let services = EdgeServices {
            clock,
            cache,
            cache_dir,
            tag_cache: Some(tags.clone() as Arc<dyn TagCache>),
            queue: Some(Arc::new(QueueClient::new(queues.clone())) as Arc<dyn Queue>),
            middleware: HashMap::new(),
        };

        let edge = Edge::build(&config, build, &services)?;
        let pool = Arc::new(OriginPool::new(&config.backends, &config.health_check.strategy));
        let origins = Arc::new(OriginDispatcher::new(&config, pool)?);

        Ok(Self {
            config,
            services,
            edge: Arc::new(ArcSwap::from_pointee(edge)),
            origins,
            tracker: BackgroundTracker::new(),
            queues,
            tags,
            purge,
        })
    }

    /// Rebuild the edge from `config` and the build output it points at.
    /// On error the current edge keeps serving.
    pub fn reload(&self, config: &EdgeConfig) -> Result<(), AppError> {
        let build = Arc::new(BuildOutput::load(&config.build.dir)?);
        let build_id = build.build_id.clone();
        let edge = Edge::build(config, build, &self.services)?;
        self.edge.store(Arc::new(edge));
        if config.backends.len() != self.config.backends.len() || config.origins.len() != self.config.origins.len() {
            tracing::warn!("origin changes take effect after a restart");
        }
        tracing::info!(build_id = %build_id, "edge reloaded");
        Ok(())
    }

    pub fn state(&self) -> AppState {
        AppState {
            edge: self.edge.clone(),
            origins: self.origins.clone(),
            tracker: self.tracker.clone(),
            max_body_size: self.config.listener.max_body_size,
        }
    }

    pub fn admin_state(&self) -> AdminState {
        AdminState {
            api_key: Arc::from(self.config.admin.api_key.as_str()),
            edge: self.edge.clone(),
            pool: self.origins.pool().clone(),
            queues: Some(self.queues.clone()),
            tags: Some(self.tags.clone()),
            purge: self.purge.clone(),
            tracker: self.tracker.clone(),
        }
    }

    /// Serve until `shutdown` fires, then give background work the grace period.
    pub async fn serve(
        &self,
        listener: TcpListener,
        admin_listener: Option<TcpListener>,
        shutdown: Shutdown,
    ) -> Result<(), AppError> {
        if self.config.health_check.enabled {
            let monitor = HealthMonitor::new(self.origins.pool().clone(), self.config.health_check.clone());
            tokio::spawn(monitor.run(shutdown.subscribe()));
        }

        if let Some(admin_listener) = admin_listener {
            let app = admin_router(self.admin_state());
            let mut signal = shutdown.subscribe();
            tracing::info!(address = ?admin_listener.local_addr().ok(), "admin api starting");
            tokio::spawn(async move {
                let served = axum::serve(admin_listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = signal.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "admin api failed");
                }
            });
        }

        EdgeServer::new(&self.config, self.state())
            .run(listener, shutdown)
            .await?;

        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        if !self.tracker.wait_idle(grace).await {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "background work still running after grace period"
            );
        }
        Ok(())
    }
}

fn incremental_cache(
    config: &EdgeConfig,
    clock: Arc<dyn Clock>,
) -> (Option<Arc<dyn IncrementalCache>>, Option<PathBuf>) {
    match config.routing.incremental_cache.as_str() {
        "filesystem" => {
            let dir = config
                .build
                .cache_dir
                .clone()
                .unwrap_or_else(|| config.build.dir.join("cache"));
            (None, Some(dir))
        }
        _ => (Some(Arc::new(MemoryCache::new(clock))), None),
    }
}
