//! `prerender-manifest.json`: which routes are statically generated and how often they revalidate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Revalidation interval: seconds, or `false` for never.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Revalidate {
    Seconds(u64),
    Flag(bool),
}

impl Revalidate {
    /// `None` means the route never revalidates.
    pub fn seconds(self) -> Option<u64> {
        match self {
            Self::Seconds(s) => Some(s),
            Self::Flag(_) => None,
        }
    }
}

/// `fallback` of a dynamic prerender route: `false`, `null` (blocking) or a fallback page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Fallback {
    Flag(bool),
    Page(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrerenderRoute {
    #[serde(default)]
    pub initial_revalidate_seconds: Option<Revalidate>,
    #[serde(default)]
    pub src_route: Option<String>,
    #[serde(default)]
    pub data_route: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DynamicPrerenderRoute {
    pub route_regex: String,
    #[serde(default)]
    pub fallback: Option<Fallback>,
    #[serde(default)]
    pub data_route: Option<String>,
    #[serde(default)]
    pub data_route_regex: Option<String>,
}

impl DynamicPrerenderRoute {
    pub fn is_fallback_false(&self) -> bool {
        matches!(self.fallback, Some(Fallback::Flag(false)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PreviewProps {
    pub preview_mode_id: String,
    pub preview_mode_signing_key: String,
    pub preview_mode_encryption_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PrerenderManifest {
    pub version: u32,
    pub routes: HashMap<String, PrerenderRoute>,
    pub dynamic_routes: HashMap<String, DynamicPrerenderRoute>,
    pub preview: PreviewProps,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prerender_manifest() {
        let manifest: PrerenderManifest = serde_json::from_str(
            r#"{
                "version": 4,
                "routes": {
                    "/": {"initialRevalidateSeconds": false, "srcRoute": null, "dataRoute": "/index.rsc"},
                    "/fleet": {"initialRevalidateSeconds": 60, "srcRoute": "/fleet", "dataRoute": "/fleet.rsc"}
                },
                "dynamicRoutes": {
                    "/vehicles/[id]": {"routeRegex": "^/vehicles/([^/]+?)(?:/)?$", "fallback": false, "dataRoute": null},
                    "/docs/[slug]": {"routeRegex": "^/docs/([^/]+?)(?:/)?$", "fallback": null},
                    "/blog/[slug]": {"routeRegex": "^/blog/([^/]+?)(?:/)?$", "fallback": "/blog/[slug].html"}
                },
                "preview": {"previewModeId": "pid", "previewModeSigningKey": "s", "previewModeEncryptionKey": "e"}
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.routes["/"].initial_revalidate_seconds.unwrap().seconds(), None);
        assert_eq!(manifest.routes["/fleet"].initial_revalidate_seconds.unwrap().seconds(), Some(60));
        assert!(manifest.dynamic_routes["/vehicles/[id]"].is_fallback_false());
        assert!(!manifest.dynamic_routes["/docs/[slug]"].is_fallback_false());
        assert!(!manifest.dynamic_routes["/blog/[slug]"].is_fallback_false());
        assert_eq!(manifest.preview.preview_mode_id, "pid");
    }
}
