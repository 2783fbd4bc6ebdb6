//! Skew protection: requests pinned to another deployment are proxied to it.

use std::collections::HashMap;

use url::Url;

use crate::config::SkewProtectionConfig;
use crate::http::event::{InternalEvent, InternalResult};
use crate::origin::ExternalProxy;

pub const DEPLOYMENT_ID_HEADER: &str = "x-deployment-id";
pub const DEPLOYMENT_ID_QUERY: &str = "dpl";
pub const DEPLOYMENT_ID_COOKIE: &str = "__dpl";

#[derive(Debug, Clone)]
pub struct SkewProtection {
    enabled: bool,
    current: String,
    deployments: HashMap<String, Url>,
}

impl SkewProtection {
    pub fn new(config: &SkewProtectionConfig) -> Self {
        let deployments = config
            .deployments
            .iter()
            .filter_map(|(id, origin)| match Url::parse(origin) {
                Ok(url) => Some((id.clone(), url)),
                Err(e) => {
                    tracing::warn!(deployment = %id, origin = %origin, error = %e, "ignoring invalid deployment origin");
                    None
                }
            })
            .collect();
        Self {
            enabled: config.enabled,
            current: config.current_deployment_id.clone(),
            deployments,
        }
    }

    /// URL to proxy `event` to, when it belongs to another known deployment.
    pub fn target(&self, event: &InternalEvent) -> Option<Url> {
        if !self.enabled {
            return None;
        }
        let url = Url::parse(&event.url).ok()?;
        if matches!(url.host_str(), Some("localhost") | Some("127.0.0.1")) {
            return None;
        }
        let requested = requested_deployment(event)?;
        if requested == self.current {
            return None;
        }
        let Some(origin) = self.deployments.get(requested) else {
            tracing::debug!(deployment = requested, "unknown deployment requested, serving current");
            return None;
        };
        let mut target = origin.join(url.path()).ok()?;
        target.set_query(url.query());
        Some(target)
    }

    pub async fn maybe_proxy(&self, event: &InternalEvent, proxy: &ExternalProxy) -> Option<InternalResult> {
        let target = self.target(event)?;
        tracing::debug!(url = %event.url, target = %target, "proxying to pinned deployment");
        Some(proxy.proxy_to(event, target.as_str(), &["origin"]).await)
    }
}

fn requested_deployment(event: &InternalEvent) -> Option<&str> {
    event
        .header(DEPLOYMENT_ID_HEADER)
        .or_else(|| event.query.get(DEPLOYMENT_ID_QUERY).and_then(|v| v.first()))
        .or_else(|| event.cookies.get(DEPLOYMENT_ID_COOKIE).map(String::as_str))
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protection(enabled: bool) -> SkewProtection {
        let mut deployments = HashMap::new();
        deployments.insert("dep-1".to_string(), "https://dep-1.example.workers.dev".to_string());
        deployments.insert("dep-2".to_string(), "https://dep-2.example.workers.dev".to_string());
        SkewProtection::new(&SkewProtectionConfig {
            enabled,
            current_deployment_id: "dep-2".into(),
            deployments,
        })
    }

    fn event(url: &str) -> InternalEvent {
        InternalEvent {
            method: "GET".into(),
            url: url.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_header_query_and_cookie() {
        let skew = protection(true);

        let mut e = event("https://shop.example.com/_next/static/chunks/a.js?v=1");
        e.headers.insert(DEPLOYMENT_ID_HEADER.into(), "dep-1".into());
        assert_eq!(
            skew.target(&e).unwrap().as_str(),
            "https://dep-1.example.workers.dev/_next/static/chunks/a.js?v=1"
        );

        let mut e = event("https://shop.example.com/page");
        e.query.insert(DEPLOYMENT_ID_QUERY.into(), "dep-1".into());
        assert!(skew.target(&e).is_some());

        let mut e = event("https://shop.example.com/page");
        e.cookies.insert(DEPLOYMENT_ID_COOKIE.into(), "dep-1".into());
        assert!(skew.target(&e).is_some());
    }

    #[test]
    fn test_skipped_cases() {
        let mut e = event("https://shop.example.com/page");
        e.headers.insert(DEPLOYMENT_ID_HEADER.into(), "dep-1".into());
        assert!(protection(false).target(&e).is_none());

        let skew = protection(true);
        let mut local = event("http://localhost:3000/page");
        local.headers.insert(DEPLOYMENT_ID_HEADER.into(), "dep-1".into());
        assert!(skew.target(&local).is_none());

        let mut current = event("https://shop.example.com/page");
        current.headers.insert(DEPLOYMENT_ID_HEADER.into(), "dep-2".into());
        assert!(skew.target(&current).is_none());

        let mut unknown = event("https://shop.example.com/page");
        unknown.headers.insert(DEPLOYMENT_ID_HEADER.into(), "dep-9".into());
        assert!(skew.target(&unknown).is_none());

        assert!(skew.target(&event("https://shop.example.com/page")).is_none());
    }
}
