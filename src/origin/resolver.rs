//! Which origin group renders a routed request.
//!
//! # Design Decisions
//! - Rules are sorted by priority once, first match wins
//! - Host matching is case-insensitive and ignores the port
//! - Path prefixes are matched against the routed (rewritten) path
//! - Requests no rule claims go to the `default` group

use crate::config::OriginRouteConfig;

pub const DEFAULT_GROUP: &str = "default";

#[derive(Debug, Clone)]
struct OriginRule {
    name: String,
    host: Option<String>,
    path_prefix: Option<String>,
    group: String,
    priority: u32,
}

impl OriginRule {
    fn matches(&self, host: Option<&str>, path: &str) -> bool {
        let host_ok = match &self.host {
            None => true,
            Some(expected) => host
                .map(|h| h.split(':').next().unwrap_or(h).eq_ignore_ascii_case(expected))
                .unwrap_or(false),
        };
        let path_ok = self
            .path_prefix
            .as_deref()
            .map_or(true, |prefix| path.starts_with(prefix));
        host_ok && path_ok
    }
}

#[derive(Debug, Clone, Default)]
pub struct OriginResolver {
    rules: Vec<OriginRule>,
}

impl OriginResolver {
    pub fn new(configs: &[OriginRouteConfig]) -> Self {
        let mut rules: Vec<OriginRule> = configs
            .iter()
            .map(|c| OriginRule {
                name: c.name.clone(),
                host: c.host.as_ref().map(|h| h.to_ascii_lowercase()),
                path_prefix: c.path_prefix.clone(),
                group: c.backend_group.clone(),
                priority: c.priority,
            })
            .collect();
        // Stable sort keeps file order among equal priorities.
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { rules }
    }

    pub fn resolve(&self, host: Option<&str>, path: &str) -> &str {
        match self.rules.iter().find(|r| r.matches(host, path)) {
            Some(rule) => {
                tracing::trace!(rule = %rule.name, group = %rule.group, path, "origin rule matched");
                &rule.group
            }
            None => DEFAULT_GROUP,
        }
    }
}
