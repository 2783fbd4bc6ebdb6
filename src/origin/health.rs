//! Active health checking of render origins.
//!
//! Passive checks happen in the dispatcher: connection errors and
//! 502/503/504 count as failures, everything else as success.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use futures_util::future::join_all;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::observability::metrics;
use crate::origin::backend::{Backend, Transition};
use crate::origin::pool::OriginPool;

pub struct HealthMonitor {
    pool: Arc<OriginPool>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(pool: Arc<OriginPool>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            pool,
            config,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("active health checks disabled");
            return;
        }
        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_all().await,
                _ = shutdown.recv() => {
                    tracing::info!("health monitor stopping");
                    break;
                }
            }
        }
    }

    pub async fn check_all(&self) {
        let backends = self.pool.all_backends();
        let results = join_all(backends.iter().map(|backend| self.probe(backend))).await;
        for (backend, healthy) in backends.iter().zip(results) {
            let transition = if healthy {
                backend.mark_success(self.config.healthy_threshold as usize)
            } else {
                backend.mark_failure(self.config.unhealthy_threshold as usize)
            };
            match transition {
                Transition::BecameHealthy => {
                    tracing::info!(backend = %backend.name, addr = %backend.addr, "backend healthy")
                }
                Transition::BecameUnhealthy => {
                    tracing::warn!(backend = %backend.name, addr = %backend.addr, "backend unhealthy")
                }
                Transition::None => {}
            }
            metrics::record_backend_health(&backend.name, backend.is_healthy());
        }
    }

    async fn probe(&self, backend: &Backend) -> bool {
        let request = match Request::builder()
            .method("GET")
            .uri(format!("http://{}{}", backend.addr, self.config.path))
            .header("user-agent", "render-edge-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(error = %e, "failed to build health check request");
                return false;
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let ok = response.status().is_success();
                if !ok {
                    tracing::warn!(backend = %backend.name, status = %response.status(), "health check failed: non-success status");
                }
                ok
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = %backend.name, error = %e, "health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(backend = %backend.name, "health check failed: timeout");
                false
            }
        }
    }
}
