//! render-edge: edge render gateway for Next.js build output.
//!
//! # Architecture Overview
//!
//! ```text
//!                ┌──────────────────────────────────────────────────────────────┐
//!                │                         RENDER EDGE                           │
//!   Request      │  ┌────────┐   ┌────────┐   ┌─────────┐   ┌────────────────┐   │
//!   ─────────────┼─▶│  http  │──▶│  edge  │──▶│ routing │──▶│ origin dispatch│───┼──▶ render
//!                │  │ server │   │ skew + │   │ engine  │   │ pool + retries │   │    origins
//!                │  └────────┘   │ images │   └────┬────┘   └────────────────┘   │
//!                │               └────────┘        │ ISR hit/stale              │
//!                │                                 ▼                            │
//!                │                          ┌─────────────┐                     │
//!                │                          │    cache    │                     │
//!                │                          │ interceptor │                     │
//!                │                          └──────┬──────┘                     │
//!                │             stale → queue msg   │   tags                     │
//!                │   ┌──────────────────┐  ┌───────▼────────┐  ┌─────────────┐  │
//!                │   │ revalidation     │  │ tag cache      │─▶│ cache purge │  │
//!                │   │ queue actors     │  │ shard actors   │  │ actor       │  │
//!                │   └──────────────────┘  └────────────────┘  └─────────────┘  │
//!                │        actor namespace: rusqlite storage + alarms           │
//!                └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use render_edge::config::load_config;
use render_edge::config::watcher::ConfigWatcher;
use render_edge::observability::{logging, metrics};
use render_edge::{EdgeApp, Shutdown};

#[derive(Parser)]
#[command(name = "render-edge")]
#[command(about = "Edge render gateway for Next.js", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "edge.toml", env = "EDGE_CONFIG")]
    config: PathBuf,

    /// Do not reload when the config file or the build's BUILD_ID changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            logging::init_logging("info");
            tracing::error!(path = ?args.config, error = %e, "failed to load configuration");
            return Err(e.into());
        }
    };
    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "render-edge starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "failed to parse metrics address"
            ),
        }
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        build_dir = ?config.build.dir,
        backends = config.backends.len(),
        cache_interception = config.routing.enable_cache_interception,
        "configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let admin_listener = if config.admin.enabled {
        Some(TcpListener::bind(&config.admin.bind_address).await?)
    } else {
        None
    };
    let build_dir = config.build.dir.clone();

    let app = Arc::new(EdgeApp::build(config)?);
    let shutdown = Shutdown::new();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.listen_for_signals().await });
    }

    // Keep the watcher handle alive for the lifetime of the server.
    let _watcher = if !args.no_watch {
        let (watcher, mut updates) = ConfigWatcher::new(&args.config, Some(&build_dir));
        let handle = match watcher.run() {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "config watcher unavailable, hot reload disabled");
                None
            }
        };
        let app = app.clone();
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(new_config) = updates.recv() => {
                        if let Err(e) = app.reload(&new_config) {
                            tracing::error!(error = %e, "reload failed, keeping current edge");
                        }
                    }
                    _ = stop.recv() => break,
                }
            }
        });
        handle
    } else {
        None
    };

    app.serve(listener, admin_listener, shutdown).await?;

    tracing::info!("shutdown complete");
    Ok(())
}
