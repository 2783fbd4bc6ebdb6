//! `middleware-manifest.json`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareMatcher {
    pub regexp: String,
    #[serde(default)]
    pub original_source: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareInfo {
    pub name: String,
    pub page: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub matchers: Vec<MiddlewareMatcher>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct MiddlewareManifest {
    pub version: u32,
    pub middleware: HashMap<String, MiddlewareInfo>,
    pub sorted_middleware: Vec<String>,
}

impl MiddlewareManifest {
    /// Middleware entries in execution order.
    pub fn ordered(&self) -> impl Iterator<Item = &MiddlewareInfo> {
        self.sorted_middleware
            .iter()
            .filter_map(|key| self.middleware.get(key))
    }
}
