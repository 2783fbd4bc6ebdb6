//! Shared utilities for integration tests: raw TCP origins and build fixtures.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use render_edge::config::{BackendConfig, EdgeConfig};

pub const BUILD_ID: &str = "test-build";
pub const PREVIEW_MODE_ID: &str = "preview-id";

/// A request as the mock origin saw it. Header names are lower-cased.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// A programmable origin on an ephemeral port that records every request.
#[derive(Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockBackend {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Poll until `count` requests arrived or `timeout` elapsed.
    pub async fn wait_for_requests(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.request_count() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.request_count() >= count
    }
}

/// Start an origin answering every request with `respond(&request)`.
pub async fn start_backend<F>(respond: F) -> MockBackend
where
    F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let recorded = requests.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let respond = respond.clone();
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let _ = serve_connection(socket, respond.as_ref(), &recorded).await;
            });
        }
    });

    MockBackend { addr, requests }
}

/// An origin that answers 200 with `body` to everything.
pub async fn start_static_backend(body: &'static str) -> MockBackend {
    start_backend(move |_| MockResponse::new(200, body).with_header("content-type", "text/html")).await
}

async fn serve_connection<F>(
    mut socket: TcpStream,
    respond: &F,
    recorded: &Mutex<Vec<RecordedRequest>>,
) -> std::io::Result<()>
where
    F: Fn(&RecordedRequest) -> MockResponse,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or("").split(' ');
    let method = request_line.next().unwrap_or("").to_string();
    let target = request_line.next().unwrap_or("/").to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .collect();

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    let request = RecordedRequest {
        method,
        target,
        headers,
        body,
    };
    let response = respond(&request);
    let is_head = request.method == "HEAD";
    recorded.lock().unwrap().push(request);

    let reason = axum::http::StatusCode::from_u16(response.status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let mut out = format!("HTTP/1.1 {} {reason}\r\n", response.status);
    for (name, value) in &response.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    let body_len = if is_head { 0 } else { response.body.len() };
    out.push_str(&format!("Content-Length: {body_len}\r\nConnection: close\r\n\r\n"));
    if !is_head {
        out.push_str(&response.body);
    }
    socket.write_all(out.as_bytes()).await?;
    socket.shutdown().await
}

/// Routes manifest of a small fleet-tracking site.
pub fn routes_manifest() -> serde_json::Value {
    serde_json::json!({
        "version": 3,
        "basePath": "",
        "redirects": [
            {
                "source": "/old-fleet",
                "destination": "/fleet",
                "regex": "^/old-fleet(?:/)?$",
                "statusCode": 308
            }
        ],
        "headers": [
            {
                "source": "/fleet",
                "regex": "^/fleet(?:/)?$",
                "headers": [{"key": "x-fleet-page", "value": "1"}]
            }
        ],
        "rewrites": {
            "beforeFiles": [],
            "afterFiles": [
                {
                    "source": "/trucks/:id",
                    "destination": "/vehicles/:id",
                    "regex": "^/trucks(?:/([^/]+?))(?:/)?$"
                }
            ],
            "fallback": []
        },
        "staticRoutes": [
            {"page": "/", "regex": "^/(?:/)?$"},
            {"page": "/fleet", "regex": "^/fleet(?:/)?$"},
            {"page": "/404", "regex": "^/404(?:/)?$"}
        ],
        "dynamicRoutes": [
            {
                "page": "/vehicles/[id]",
                "regex": "^/vehicles/([^/]+?)(?:/)?$",
                "routeKeys": {"nxtPid": "nxtPid"},
                "namedRegex": "^/vehicles/(?<nxtPid>[^/]+?)(?:/)?$"
            },
            {
                "page": "/depots/[id]",
                "regex": "^/depots/([^/]+?)(?:/)?$",
                "routeKeys": {"nxtPid": "nxtPid"},
                "namedRegex": "^/depots/(?<nxtPid>[^/]+?)(?:/)?$"
            }
        ],
        "dataRoutes": []
    })
}

/// `/fleet` revalidates every 60s; `/depots/[id]` is `fallback: false`.
pub fn prerender_manifest() -> serde_json::Value {
    serde_json::json!({
        "version": 4,
        "routes": {
            "/fleet": {"initialRevalidateSeconds": 60, "srcRoute": "/fleet", "dataRoute": null},
            "/depots/north": {"initialRevalidateSeconds": false, "srcRoute": "/depots/[id]", "dataRoute": null}
        },
        "dynamicRoutes": {
            "/depots/[id]": {"routeRegex": "^/depots/([^/]+?)(?:/)?$", "fallback": false, "dataRoute": null}
        },
        "preview": {
            "previewModeId": PREVIEW_MODE_ID,
            "previewModeSigningKey": "signing",
            "previewModeEncryptionKey": "encryption"
        }
    })
}

/// Write a build output directory with the given manifests.
pub fn write_build(dir: &Path, routes: &serde_json::Value, prerender: &serde_json::Value) {
    fs::create_dir_all(dir.join("server")).unwrap();
    fs::write(dir.join("BUILD_ID"), BUILD_ID).unwrap();
    fs::write(dir.join("routes-manifest.json"), routes.to_string()).unwrap();
    fs::write(dir.join("prerender-manifest.json"), prerender.to_string()).unwrap();
}

/// Register a single-matcher middleware in the build's middleware manifest.
pub fn write_middleware_manifest(dir: &Path, regexp: &str) {
    let manifest = serde_json::json!({
        "version": 3,
        "sortedMiddleware": ["/"],
        "middleware": {
            "/": {
                "name": "middleware",
                "page": "/",
                "files": ["server/middleware.js"],
                "matchers": [{"regexp": regexp}]
            }
        },
        "functions": {}
    });
    fs::create_dir_all(dir.join("server")).unwrap();
    fs::write(dir.join("server/middleware-manifest.json"), manifest.to_string()).unwrap();
}

/// A config pointing at `build_dir` with one origin in the default group.
pub fn edge_config(build_dir: &Path, origin: SocketAddr) -> EdgeConfig {
    let mut config = EdgeConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.build.dir = build_dir.to_path_buf();
    config.health_check.enabled = false;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 50;
    config.timeouts.shutdown_grace_secs = 1;
    config.admin.api_key = "test-admin-key".to_string();
    config.backends.push(BackendConfig {
        name: "origin-1".to_string(),
        group: "default".to_string(),
        address: origin.to_string(),
        max_connections: 50,
    });
    config
}

/// A client that leaves redirects to the test.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
