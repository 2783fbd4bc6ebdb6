//! The upstream purge-by-tag API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::PurgeConfig;

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("purge credentials are not configured")]
    MissingCredentials,

    #[error("purge API rate limit exceeded")]
    RateLimited,

    #[error("purge request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("purge rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait PurgeApi: Send + Sync {
    async fn purge_tags(&self, tags: &[String]) -> Result<(), PurgeError>;
}

#[derive(Debug, Deserialize)]
struct PurgeResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

/// `POST {api_base}/zones/{zone}/purge_cache` with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpPurgeApi {
    client: reqwest::Client,
    api_base: String,
    zone_id: Option<String>,
    api_token: Option<String>,
}

impl HttpPurgeApi {
    pub fn new(config: &PurgeConfig) -> Result<Self, PurgeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            zone_id: config.zone_id.clone(),
            api_token: config.api_token.clone(),
        })
    }
}

#[async_trait]
impl PurgeApi for HttpPurgeApi {
    async fn purge_tags(&self, tags: &[String]) -> Result<(), PurgeError> {
        let (Some(zone), Some(token)) = (&self.zone_id, &self.api_token) else {
            return Err(PurgeError::MissingCredentials);
        };
        let response = self
            .client
            .post(format!("{}/zones/{zone}/purge_cache", self.api_base))
            .bearer_auth(token)
            .json(&serde_json::json!({ "tags": tags }))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PurgeError::RateLimited);
        }
        let body: PurgeResponse = response.json().await?;
        if !body.success {
            return Err(PurgeError::Rejected(
                serde_json::to_string(&body.errors).unwrap_or_default(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_credentials() {
        let api = HttpPurgeApi::new(&PurgeConfig::default()).unwrap();
        let err = api.purge_tags(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, PurgeError::MissingCredentials));
    }
}
