//! Config-level rules from the routes manifest: rewrites, redirects and headers.
//!
//! A rule applies when its regex matches the (localized unless `locale: false`)
//! path and every `has` condition holds while no `missing` condition does.
//! Parameters come from the rule's source template plus named captures in
//! `has` values, and are substituted into the destination.

use std::collections::BTreeMap;

use fancy_regex::Regex;
use url::Url;

use crate::http::event::{InternalEvent, MultiValue};
use crate::manifest::{CompiledHeaderRule, CompiledRewrite, NextConfig, RewriteRule, RouteHas};
use crate::routing::i18n::localize_path;
use crate::routing::path_template::{Params, PathMatcher, PathRenderer};
use crate::routing::url::{is_external, parse_query, stringify_query, url_parts};
use crate::routing::RoutingError;

// Literal `(.)`, `(..)`, `(...)` and `+` would otherwise be read as template syntax.
const ESCAPES: [(&str, &str); 4] = [
    ("(...)", "\u{E003}"),
    ("(..)", "\u{E002}"),
    ("(.)", "\u{E001}"),
    ("+", "\u{E004}"),
];

pub fn escape_template(input: &str, is_path: bool) -> String {
    let mut out = input.to_string();
    for (literal, marker) in ESCAPES {
        if is_path && literal == "+" {
            continue;
        }
        out = out.replace(literal, marker);
    }
    out
}

pub fn unescape_template(input: &str) -> String {
    let mut out = input.to_string();
    for (literal, marker) in ESCAPES {
        out = out.replace(marker, literal);
    }
    out
}

fn has_value(event: &InternalEvent, condition: &RouteHas) -> Option<String> {
    match condition {
        RouteHas::Header { key, .. } => event.header(&key.to_lowercase()).map(str::to_string),
        RouteHas::Cookie { key, .. } => event.cookies.get(key).cloned(),
        RouteHas::Query { key, .. } => event.query.get(key).map(|v| v.joined(",")),
        RouteHas::Host { .. } => event.host().map(str::to_string),
    }
}

fn test_regex(pattern: &str, value: &str) -> bool {
    Regex::new(pattern)
        .and_then(|re| re.is_match(value))
        .unwrap_or(false)
}

/// All conditions hold (or, when `inverted`, none of them do).
pub fn check_has(event: &InternalEvent, conditions: &[RouteHas], inverted: bool) -> bool {
    conditions.iter().all(|condition| {
        let Some(value) = has_value(event, condition) else {
            return inverted;
        };
        match condition.value() {
            None => !inverted,
            Some(pattern) if test_regex(pattern, &value) => !inverted,
            Some(_) => inverted,
        }
    })
}

/// Parameters contributed by `has` conditions.
fn has_params(event: &InternalEvent, conditions: &[RouteHas]) -> Params {
    let mut params = Params::new();
    for condition in conditions {
        let Some(value) = has_value(event, condition) else {
            continue;
        };
        match condition.value() {
            None => {
                if let Some(key) = condition.key() {
                    params.insert(key.to_string(), MultiValue::One(value));
                }
            }
            Some(pattern) => {
                let Ok(re) = Regex::new(&format!("^{pattern}$")) else {
                    continue;
                };
                let Ok(Some(caps)) = re.captures(&value) else {
                    continue;
                };
                for name in re.capture_names().flatten() {
                    if let Some(m) = caps.name(name) {
                        params.insert(name.to_string(), MultiValue::One(m.as_str().to_string()));
                    }
                }
            }
        }
    }
    params
}

fn rule_path<'a>(rule: &RewriteRule, raw: &'a str, localized: &'a str) -> &'a str {
    if rule.locale == Some(false) {
        raw
    } else {
        localized
    }
}

/// The result of applying the first matching rewrite.
#[derive(Debug, Clone)]
pub struct RewriteOutcome<'a> {
    pub event: InternalEvent,
    pub rule: &'a RewriteRule,
    pub is_external_rewrite: bool,
}

pub fn handle_rewrites<'a>(
    event: &InternalEvent,
    rules: &'a [CompiledRewrite],
    config: &NextConfig,
) -> Result<Option<RewriteOutcome<'a>>, RoutingError> {
    let localized = localize_path(event, config.i18n.as_ref());

    let Some(compiled) = rules.iter().find(|compiled| {
        let path = rule_path(&compiled.rule, &event.raw_path, &localized);
        compiled.regex.is_match(path).unwrap_or(false)
            && check_has(event, &compiled.rule.has, false)
            && check_has(event, &compiled.rule.missing, true)
    }) else {
        return Ok(None);
    };
    let rule = &compiled.rule;

    let external = is_external(&rule.destination, None);
    let parts = url_parts(&rule.destination, external)
        .ok_or_else(|| RoutingError::Destination(rule.destination.clone()))?;
    let path_to_use = rule_path(rule, &event.raw_path, &localized);
    let query_string = parts.query_string.replace('+', "%20");

    let mut params = PathMatcher::new(&escape_template(&rule.source, false))?
        .matches(path_to_use)
        .map(|m| m.params)
        .unwrap_or_default();
    params.extend(has_params(event, &rule.has));

    let (mut path, host, query) = if params.is_empty() {
        (parts.pathname.clone(), parts.hostname.clone(), query_string)
    } else {
        let render = |template: &str, is_path: bool| -> Result<String, RoutingError> {
            let renderer = PathRenderer::with_validation(&escape_template(template, is_path), false)?;
            Ok(unescape_template(&renderer.render(&params)?))
        };
        (
            render(&parts.pathname, true)?,
            render(&parts.hostname, false)?,
            render(&query_string, false)?,
        )
    };

    if let Some(i18n) = config.i18n.as_ref().filter(|_| !external) {
        let stripped = i18n
            .locales
            .iter()
            .find_map(|l| path.strip_prefix(&format!("/{l}")))
            .map(str::to_string);
        if let Some(stripped) = stripped.filter(|s| s.starts_with("/api/")) {
            path = stripped;
        }
    }

    let base_url = if external {
        format!("{}//{host}{path}", parts.protocol)
    } else {
        let base = Url::parse(&event.url).map_err(|source| RoutingError::Url {
            url: event.url.clone(),
            source,
        })?;
        let mut joined = base.join(&path).map_err(|source| RoutingError::Url {
            url: path.clone(),
            source,
        })?;
        joined.set_query(None);
        joined.to_string()
    };

    let mut final_query = event.query.clone();
    final_query.extend(parse_query(&query));
    let url = format!("{base_url}{}", stringify_query(&final_query));
    let raw_path = Url::parse(&url)
        .map(|u| u.path().to_string())
        .map_err(|source| RoutingError::Url {
            url: url.clone(),
            source,
        })?;

    tracing::debug!(source = %rule.source, destination = %url, external, "rewrite applied");

    Ok(Some(RewriteOutcome {
        event: InternalEvent {
            raw_path,
            url,
            query: final_query,
            ..event.clone()
        },
        rule,
        is_external_rewrite: external,
    }))
}

/// Headers from `headers` rules in `next.config.js` that apply to this request.
pub fn config_headers(
    event: &InternalEvent,
    rules: &[CompiledHeaderRule],
    config: &NextConfig,
) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    let localized = localize_path(event, config.i18n.as_ref());

    for compiled in rules {
        let rule = &compiled.rule;
        let path = if rule.locale == Some(false) {
            &event.raw_path
        } else {
            &localized
        };
        if !(compiled.regex.is_match(path).unwrap_or(false)
            && check_has(event, &rule.has, false)
            && check_has(event, &rule.missing, true))
        {
            continue;
        }

        let params = PathMatcher::new(&rule.source)
            .ok()
            .and_then(|m| m.matches(path))
            .map(|m| m.params)
            .unwrap_or_default();

        for entry in &rule.headers {
            let render = |template: &str| -> String {
                if params.is_empty() {
                    return template.to_string();
                }
                PathRenderer::new(template)
                    .and_then(|r| r.render(&params))
                    .unwrap_or_else(|e| {
                        tracing::debug!(template, error = %e, "header template not rendered");
                        template.to_string()
                    })
            };
            headers.insert(render(&entry.key).to_lowercase(), render(&entry.value));
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::routes::HeaderEntry;
    use crate::manifest::{HeaderRule, I18nConfig};
    use crate::routing::url::parse_cookies;

    fn event(url: &str, headers: &[(&str, &str)]) -> InternalEvent {
        let parsed = Url::parse(url).unwrap();
        let mut e = InternalEvent {
            method: "GET".into(),
            raw_path: parsed.path().to_string(),
            url: url.to_string(),
            query: parse_query(parsed.query().unwrap_or("")),
            ..Default::default()
        };
        e.headers.insert("host".into(), parsed.host_str().unwrap().to_string());
        for (k, v) in headers {
            e.headers.insert(k.to_string(), v.to_string());
        }
        e.cookies = parse_cookies(e.cookie_header());
        e
    }

    fn rewrite(source: &str, destination: &str, regex: &str) -> RewriteRule {
        RewriteRule {
            source: source.into(),
            destination: destination.into(),
            regex: regex.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_escape_roundtrip() {
        let s = "/(.)photo/(..)feed/(...)x+y";
        assert_eq!(unescape_template(&escape_template(s, false)), s);
        assert!(escape_template("/a+b", true).contains('+'));
        assert!(!escape_template("a+b", false).contains('+'));
    }

    #[test]
    fn test_check_has() {
        let e = event("https://h/a?tab=1&tab=2", &[("x-tenant", "acme"), ("cookie", "role=admin")]);
        let header = RouteHas::Header { key: "X-Tenant".into(), value: Some("ac.*".into()) };
        let cookie = RouteHas::Cookie { key: "role".into(), value: None };
        let query = RouteHas::Query { key: "tab".into(), value: Some("^1,2$".into()) };
        let host = RouteHas::Host { key: None, value: Some("other".into()) };
        let absent = RouteHas::Cookie { key: "session".into(), value: None };

        assert!(check_has(&e, &[header.clone(), cookie.clone(), query], false));
        assert!(!check_has(&e, &[host.clone()], false));
        assert!(check_has(&e, &[host], true));
        assert!(check_has(&e, &[absent.clone()], true));
        assert!(!check_has(&e, &[absent], false));
        assert!(!check_has(&e, &[cookie], true));
        assert!(check_has(&e, &[], false));
    }

    #[test]
    fn test_internal_rewrite_with_params() {
        let rules = CompiledRewrite::compile_all(&[rewrite(
            "/fleet/:id",
            "/vehicles/:id?view=fleet",
            "^/fleet(?:/([^/]+?))(?:/)?$",
        )])
        .unwrap();
        let e = event("https://h/fleet/42?x=1", &[]);
        let out = handle_rewrites(&e, &rules, &NextConfig::default()).unwrap().unwrap();
        assert!(!out.is_external_rewrite);
        assert_eq!(out.event.raw_path, "/vehicles/42");
        assert_eq!(out.event.url, "https://h/vehicles/42?view=fleet&x=1");
        assert_eq!(out.event.query["view"], MultiValue::One("fleet".into()));
    }

    #[test]
    fn test_external_rewrite() {
        let rules = CompiledRewrite::compile_all(&[rewrite(
            "/docs/:path*",
            "https://docs.example.com/:path*",
            "^/docs(?:/((?:[^/]+?)(?:/(?:[^/]+?))*))?(?:/)?$",
        )])
        .unwrap();
        let e = event("https://h/docs/guide/intro", &[]);
        let out = handle_rewrites(&e, &rules, &NextConfig::default()).unwrap().unwrap();
        assert!(out.is_external_rewrite);
        assert_eq!(out.event.url, "https://docs.example.com/guide/intro");
        assert_eq!(out.event.raw_path, "/guide/intro");
    }

    #[test]
    fn test_has_named_capture_param() {
        let mut rule = rewrite("/portal", "/tenants/:tenant", "^/portal(?:/)?$");
        rule.has = vec![RouteHas::Header {
            key: "x-tenant".into(),
            value: Some("(?<tenant>[a-z]+)".into()),
        }];
        let rules = CompiledRewrite::compile_all(&[rule]).unwrap();

        let e = event("https://h/portal", &[("x-tenant", "acme")]);
        let out = handle_rewrites(&e, &rules, &NextConfig::default()).unwrap().unwrap();
        assert_eq!(out.event.raw_path, "/tenants/acme");

        let missing = event("https://h/portal", &[]);
        assert!(handle_rewrites(&missing, &rules, &NextConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_localized_api_rewrite_drops_locale() {
        let config = NextConfig {
            i18n: Some(I18nConfig {
                locales: vec!["en".into(), "fr".into()],
                default_locale: "en".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let rules = CompiledRewrite::compile_all(&[rewrite(
            "/:nextInternalLocale(en|fr)/legacy/:id",
            "/:nextInternalLocale/api/items/:id",
            "^(?:/(en|fr))/legacy(?:/([^/]+?))(?:/)?$",
        )])
        .unwrap();
        let e = event("https://h/legacy/9", &[]);
        let out = handle_rewrites(&e, &rules, &config).unwrap().unwrap();
        assert_eq!(out.event.raw_path, "/api/items/9");
    }

    #[test]
    fn test_config_headers() {
        let rules = CompiledHeaderRule::compile_all(&[
            HeaderRule {
                source: "/vehicles/:id".into(),
                regex: "^/vehicles(?:/([^/]+?))(?:/)?$".into(),
                headers: vec![
                    HeaderEntry { key: "x-vehicle".into(), value: ":id".into() },
                    HeaderEntry { key: "Cache-Control".into(), value: "public, max-age=60".into() },
                ],
                ..Default::default()
            },
            HeaderRule {
                source: "/(.*)".into(),
                regex: "^(?:/(.*))(?:/)?$".into(),
                headers: vec![HeaderEntry { key: "x-frame-options".into(), value: "DENY".into() }],
                missing: vec![RouteHas::Header { key: "x-embed".into(), value: None }],
                ..Default::default()
            },
        ])
        .unwrap();

        let h = config_headers(&event("https://h/vehicles/7", &[]), &rules, &NextConfig::default());
        assert_eq!(h["x-vehicle"], "7");
        assert_eq!(h["cache-control"], "public, max-age=60");
        assert_eq!(h["x-frame-options"], "DENY");

        let h = config_headers(&event("https://h/about", &[("x-embed", "1")]), &rules, &NextConfig::default());
        assert!(h.is_empty());
    }
}
