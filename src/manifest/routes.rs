//! `routes-manifest.json`: route definitions and config-level rewrite/redirect/header rules.

use std::collections::HashMap;

use fancy_regex::Regex;
use serde::{Deserialize, Serialize};

use super::{I18nConfig, ManifestError};

/// A page route as emitted by `next build`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouteDefinition {
    pub page: String,
    pub regex: String,
    #[serde(default)]
    pub route_keys: HashMap<String, String>,
    #[serde(default)]
    pub named_regex: Option<String>,
}

/// A `has` / `missing` condition on a rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RouteHas {
    Header {
        key: String,
        #[serde(default)]
        value: Option<String>,
    },
    Cookie {
        key: String,
        #[serde(default)]
        value: Option<String>,
    },
    Query {
        key: String,
        #[serde(default)]
        value: Option<String>,
    },
    Host {
        #[serde(default)]
        key: Option<String>,
        value: Option<String>,
    },
}

impl RouteHas {
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Header { key, .. } | Self::Cookie { key, .. } | Self::Query { key, .. } => {
                Some(key)
            }
            Self::Host { key, .. } => key.as_deref(),
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Header { value, .. }
            | Self::Cookie { value, .. }
            | Self::Query { value, .. }
            | Self::Host { value, .. } => value.as_deref(),
        }
    }
}

/// A rewrite or redirect rule. Redirects carry a status code.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RewriteRule {
    pub source: String,
    pub destination: String,
    pub regex: String,
    #[serde(default)]
    pub has: Vec<RouteHas>,
    #[serde(default)]
    pub missing: Vec<RouteHas>,
    /// `Some(false)` disables locale prefixing for this rule.
    #[serde(default)]
    pub locale: Option<bool>,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub status_code: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HeaderRule {
    pub source: String,
    pub regex: String,
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
    #[serde(default)]
    pub locale: Option<bool>,
    #[serde(default)]
    pub has: Vec<RouteHas>,
    #[serde(default)]
    pub missing: Vec<RouteHas>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RewriteGroups {
    pub before_files: Vec<RewriteRule>,
    pub after_files: Vec<RewriteRule>,
    pub fallback: Vec<RewriteRule>,
}

/// Older builds emit a flat list, which means after-files rewrites.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
enum RewritesField {
    Grouped(RewriteGroups),
    Flat(Vec<RewriteRule>),
}

impl From<RewritesField> for RewriteGroups {
    fn from(field: RewritesField) -> Self {
        match field {
            RewritesField::Grouped(groups) => groups,
            RewritesField::Flat(after_files) => RewriteGroups {
                after_files,
                ..Default::default()
            },
        }
    }
}

fn deserialize_rewrites<'de, D>(deserializer: D) -> Result<RewriteGroups, D::Error>
where
    D: serde::Deserializer<'de>,
{
    RewritesField::deserialize(deserializer).map(Into::into)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutesManifest {
    pub version: u32,
    pub base_path: String,
    pub redirects: Vec<RewriteRule>,
    pub headers: Vec<HeaderRule>,
    #[serde(deserialize_with = "deserialize_rewrites")]
    pub rewrites: RewriteGroups,
    pub dynamic_routes: Vec<RouteDefinition>,
    pub static_routes: Vec<RouteDefinition>,
    pub data_routes: Vec<RouteDefinition>,
    pub i18n: Option<I18nConfig>,
}

pub(crate) fn compile_regex(regex: &str) -> Result<Regex, ManifestError> {
    Regex::new(regex).map_err(|e| ManifestError::Regex {
        regex: regex.to_string(),
        message: e.to_string(),
    })
}

/// A rewrite/redirect with its source regex compiled.
#[derive(Debug, Clone)]
pub struct CompiledRewrite {
    pub rule: RewriteRule,
    pub regex: Regex,
}

impl CompiledRewrite {
    pub fn compile_all(rules: &[RewriteRule]) -> Result<Vec<Self>, ManifestError> {
        rules
            .iter()
            .map(|rule| {
                Ok(Self {
                    regex: compile_regex(&rule.regex)?,
                    rule: rule.clone(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct CompiledHeaderRule {
    pub rule: HeaderRule,
    pub regex: Regex,
}

impl CompiledHeaderRule {
    pub fn compile_all(rules: &[HeaderRule]) -> Result<Vec<Self>, ManifestError> {
        rules
            .iter()
            .map(|rule| {
                Ok(Self {
                    regex: compile_regex(&rule.regex)?,
                    rule: rule.clone(),
                })
            })
            .collect()
    }
}
