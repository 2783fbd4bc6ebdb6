//! Cached render output.

use serde::{Deserialize, Serialize};

use crate::http::event::ResponseHeaders;
use crate::manifest::Revalidate;

pub const CACHE_TAGS_HEADER: &str = "x-next-cache-tags";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMeta {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub headers: ResponseHeaders,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postponed: Option<String>,
}

/// One rendered value, by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheValue {
    /// App router page: HTML and its RSC payload.
    App {
        html: String,
        rsc: String,
        #[serde(default)]
        meta: Option<CacheMeta>,
        #[serde(default)]
        revalidate: Option<Revalidate>,
    },
    /// Pages router page: HTML and its data JSON.
    Page {
        html: String,
        json: serde_json::Value,
        #[serde(default)]
        meta: Option<CacheMeta>,
        #[serde(default)]
        revalidate: Option<Revalidate>,
    },
    Redirect {
        #[serde(default)]
        props: serde_json::Value,
        #[serde(default)]
        meta: Option<CacheMeta>,
        #[serde(default)]
        revalidate: Option<Revalidate>,
    },
    /// Route handler output. Binary bodies are stored base64 encoded.
    Route {
        body: String,
        #[serde(default)]
        meta: Option<CacheMeta>,
        #[serde(default)]
        revalidate: Option<Revalidate>,
    },
}

impl CacheValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::App { .. } => "app",
            Self::Page { .. } => "page",
            Self::Redirect { .. } => "redirect",
            Self::Route { .. } => "route",
        }
    }

    pub fn meta(&self) -> Option<&CacheMeta> {
        match self {
            Self::App { meta, .. }
            | Self::Page { meta, .. }
            | Self::Redirect { meta, .. }
            | Self::Route { meta, .. } => meta.as_ref(),
        }
    }

    pub fn revalidate(&self) -> Option<Revalidate> {
        match self {
            Self::App { revalidate, .. }
            | Self::Page { revalidate, .. }
            | Self::Redirect { revalidate, .. }
            | Self::Route { revalidate, .. } => *revalidate,
        }
    }

    /// Tags from the `x-next-cache-tags` meta header.
    pub fn tags(&self) -> Vec<String> {
        self.meta()
            .and_then(|m| m.headers.get(CACHE_TAGS_HEADER))
            .map(|v| {
                v.joined(",")
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub value: CacheValue,
    /// Epoch milliseconds.
    pub last_modified: i64,
    #[serde(default)]
    pub should_bypass_tag_cache: bool,
}
