//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the edge gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EdgeConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Location of the Next.js build output and static assets.
    pub build: BuildConfig,

    /// Routing engine toggles.
    pub routing: RoutingConfig,

    /// Rules mapping routed paths to origin groups.
    pub origins: Vec<OriginRouteConfig>,

    /// Origin server definitions.
    pub backends: Vec<BackendConfig>,

    /// Origin health check settings.
    pub health_check: HealthCheckConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Origin retry configuration.
    pub retries: RetryConfig,

    /// Durable actor storage.
    pub actors: ActorConfig,

    /// Revalidation queue actor settings.
    pub queue: QueueConfig,

    /// Sharded tag cache settings.
    pub tag_cache: TagCacheConfig,

    /// CDN purge actor settings.
    pub purge: PurgeConfig,

    /// Image optimization passthrough.
    pub images: ImageConfig,

    /// Skew protection across deployments.
    pub skew_protection: SkewProtectionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,

    /// Maximum accepted request body in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// Build output locations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Directory holding `BUILD_ID` and the `*-manifest.json` files.
    pub dir: PathBuf,

    /// Directory served by the static asset resolver (`public/` + `_next/static`).
    pub assets_dir: Option<PathBuf>,

    /// Directory of the filesystem incremental cache.
    pub cache_dir: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".next"),
            assets_dir: None,
            cache_dir: None,
        }
    }
}

/// Routing engine toggles.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Serve ISR pages straight from the incremental cache.
    pub enable_cache_interception: bool,

    /// When true, middleware response headers win over `headers()` rules.
    pub middleware_headers_override_next_config: bool,

    /// Incremental cache backend: "memory" or "filesystem".
    pub incremental_cache: String,

    /// Endpoint of the middleware runtime. Middleware is skipped when unset.
    pub middleware_endpoint: Option<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enable_cache_interception: false,
            middleware_headers_override_next_config: false,
            incremental_cache: "memory".to_string(),
            middleware_endpoint: None,
        }
    }
}

/// Rule mapping requests to an origin group.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OriginRouteConfig {
    /// Rule identifier for logging/metrics.
    pub name: String,

    /// Host header to match (exact match).
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: Option<String>,

    /// Backend group name to forward to.
    pub backend_group: String,

    /// Rule priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}

/// Origin server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique backend identifier.
    pub name: String,

    /// Backend group this server belongs to.
    pub group: String,

    /// Backend address (e.g., "127.0.0.1:3000").
    pub address: String,

    /// Maximum concurrent requests to this backend.
    #[serde(default = "default_max_backend_conns")]
    pub max_connections: usize,
}

fn default_max_backend_conns() -> usize {
    100
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,

    /// Backend selection strategy: "round_robin" or "least_connections".
    pub strategy: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_secs: 5,
            path: "/".to_string(),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
            strategy: "round_robin".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Grace period for background work on shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

/// Retry configuration for origin requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of attempts.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Durable actor storage.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ActorConfig {
    /// Directory for per-actor SQLite files. In-memory storage when unset.
    pub state_dir: Option<PathBuf>,
}

/// Revalidation queue actor settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum in-flight revalidations per shard.
    pub max_revalidations: usize,

    /// Timeout of the revalidation HEAD request in milliseconds.
    pub revalidation_timeout_ms: u64,

    /// Base interval of the retry backoff in milliseconds.
    pub retry_interval_ms: u64,

    /// Failures tolerated before a message is dropped.
    pub max_retries: u32,

    /// Keep failure and sync state in memory only.
    pub disable_sqlite: bool,

    /// Number of queue shards (message groups).
    pub max_revalidate_concurrency: u32,

    /// Force the scheme of revalidation requests ("http"/"https").
    pub protocol: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_revalidations: 5,
            revalidation_timeout_ms: 10_000,
            retry_interval_ms: 2_000,
            max_retries: 6,
            disable_sqlite: false,
            max_revalidate_concurrency: 10,
            protocol: None,
        }
    }
}

/// Sharded tag cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TagCacheConfig {
    /// Number of tag cache actor shards.
    pub shards: u32,
}

impl Default for TagCacheConfig {
    fn default() -> Self {
        Self { shards: 4 }
    }
}

/// CDN purge actor settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PurgeConfig {
    /// Enqueue CDN purges when tags are revalidated.
    pub enabled: bool,

    /// Debounce window before a batch is sent.
    pub buffer_time_in_seconds: u64,

    /// Base URL of the purge API.
    pub api_base: String,

    /// Zone the purge applies to.
    pub zone_id: Option<String>,

    /// Bearer token for the purge API.
    pub api_token: Option<String>,

    /// Tags per purge call (upstream limit).
    pub page_size: usize,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            buffer_time_in_seconds: 5,
            api_base: "https://api.cloudflare.com/client/v4".to_string(),
            zone_id: None,
            api_token: None,
            page_size: 100,
        }
    }
}

/// Remote image allow-list entry. `hostname` and `pathname` are regexes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemotePatternConfig {
    pub protocol: Option<String>,
    pub hostname: String,
    pub port: Option<String>,
    #[serde(default = "default_any_path")]
    pub pathname: String,
    pub search: Option<String>,
}

/// Local image allow-list entry. `pathname` is a regex.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalPatternConfig {
    #[serde(default = "default_any_path")]
    pub pathname: String,
    pub search: Option<String>,
}

fn default_any_path() -> String {
    "^.*$".to_string()
}

/// Image optimization passthrough.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Serve SVG images through `/_next/image`.
    pub allow_svg: bool,

    /// Timeout for remote image fetches in milliseconds.
    pub fetch_timeout_ms: u64,

    /// `content-security-policy` sent with optimized images.
    pub content_security_policy: String,

    /// `content-disposition` type ("attachment" or "inline").
    pub content_disposition_type: String,

    pub remote_patterns: Vec<RemotePatternConfig>,

    pub local_patterns: Vec<LocalPatternConfig>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            allow_svg: false,
            fetch_timeout_ms: 7_000,
            content_security_policy: "script-src 'none'; frame-src 'none'; sandbox;".to_string(),
            content_disposition_type: "attachment".to_string(),
            remote_patterns: Vec::new(),
            local_patterns: vec![LocalPatternConfig {
                pathname: default_any_path(),
                search: None,
            }],
        }
    }
}

/// Skew protection across deployments.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SkewProtectionConfig {
    pub enabled: bool,

    /// Deployment id of this build.
    pub current_deployment_id: String,

    /// Deployment id -> origin base URL of that deployment.
    pub deployments: HashMap<String, String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// Bearer token for the admin API. Required when enabled.
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
