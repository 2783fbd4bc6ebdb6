//! Proxy for external rewrites and skew-protected deployments.

use std::time::Duration;

use crate::http::event::{InternalEvent, InternalResult, MultiValue};
use crate::origin::OriginError;

/// Never forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "host",
    "content-length",
];

#[derive(Debug, Clone)]
pub struct ExternalProxy {
    client: reqwest::Client,
}

impl ExternalProxy {
    pub fn new(timeout: Duration) -> Result<Self, OriginError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    /// Send `event` to its own (absolute, external) URL.
    pub async fn proxy(&self, event: &InternalEvent) -> InternalResult {
        self.proxy_to(event, &event.url, &[]).await
    }

    /// Send `event` to `url`, dropping the `skip` request headers.
    pub async fn proxy_to(&self, event: &InternalEvent, url: &str, skip: &[&str]) -> InternalResult {
        match self.send(event, url, skip).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(url, error = %e, "external proxy request failed");
                InternalResult::new(e.status()).with_body(e.to_string())
            }
        }
    }

    async fn send(
        &self,
        event: &InternalEvent,
        url: &str,
        skip: &[&str],
    ) -> Result<InternalResult, OriginError> {
        let method = reqwest::Method::from_bytes(event.method.as_bytes())
            .map_err(|_| OriginError::InvalidRequest(format!("bad method {}", event.method)))?;
        let mut request = self.client.request(method, url);
        for (name, value) in &event.headers {
            if HOP_BY_HOP.contains(&name.as_str()) || skip.contains(&name.as_str()) {
                continue;
            }
            request = request.header(name, value);
        }
        if let Some(body) = &event.body {
            request = request.body(body.clone());
        }

        let response = request.send().await?;
        let mut result = InternalResult::new(response.status().as_u16());
        for (name, value) in response.headers() {
            if HOP_BY_HOP.contains(&name.as_str()) {
                continue;
            }
            let Ok(value) = value.to_str() else {
                continue;
            };
            match result.headers.get_mut(name.as_str()) {
                Some(existing) => existing.push(value.to_string()),
                None => {
                    result
                        .headers
                        .insert(name.as_str().to_string(), MultiValue::from(value));
                }
            }
        }
        result.body = response.bytes().await?;
        Ok(result)
    }
}
