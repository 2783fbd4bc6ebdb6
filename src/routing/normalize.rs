//! Slash normalisation redirects and legacy data-route fix-up.

use url::Url;

use crate::http::event::{InternalEvent, InternalResult};
use crate::manifest::NextConfig;
use crate::routing::url::stringify_query;
use crate::routing::{Flow, RoutingError};

fn parse_url(url: &str) -> Result<Url, RoutingError> {
    Url::parse(url).map_err(|source| RoutingError::Url {
        url: url.to_string(),
        source,
    })
}

/// Collapse `//`+ and backslashes in the path, leaving the query untouched.
pub fn normalize_repeated_slashes(event: &InternalEvent) -> Result<String, RoutingError> {
    let url = parse_url(&event.url)?;
    let host = url.host_str().unwrap_or_default();
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let mut collapsed = String::new();
    let mut previous_slash = false;
    for c in format!("{host}{}", event.raw_path).chars() {
        let c = if c == '\\' { '/' } else { c };
        if c == '/' && previous_slash {
            continue;
        }
        previous_slash = c == '/';
        collapsed.push(c);
    }
    let search = url.query().map(|q| format!("?{q}")).unwrap_or_default();
    Ok(format!("{}://{collapsed}{search}", url.scheme()))
}

pub fn handle_repeated_slash_redirect(
    event: &InternalEvent,
) -> Result<Option<InternalResult>, RoutingError> {
    if event.raw_path.contains("//") || event.raw_path.contains('\\') {
        let location = normalize_repeated_slashes(event)?;
        return Ok(Some(InternalResult::redirect(308, &location)));
    }
    Ok(None)
}

/// `name.ext` at the end of the path.
fn looks_like_file(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or("");
    let Some((stem, ext)) = last.rsplit_once('.') else {
        return false;
    };
    let word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    !stem.is_empty()
        && stem.chars().last().map(|c| word(c) || c == '-').unwrap_or(false)
        && !ext.is_empty()
        && ext.chars().all(word)
}

pub fn handle_trailing_slash_redirect(
    event: &InternalEvent,
    config: &NextConfig,
) -> Option<InternalResult> {
    if config.skip_trailing_slash_redirect || event.raw_path.starts_with("/api/") {
        return None;
    }
    let (base, search) = match event.url.split_once('?') {
        Some((b, q)) if !q.is_empty() => (b, format!("?{q}")),
        Some((b, _)) => (b, String::new()),
        None => (event.url.as_str(), String::new()),
    };

    if config.trailing_slash
        && event.header("x-nextjs-data").is_none()
        && !event.raw_path.ends_with('/')
        && !looks_like_file(&event.raw_path)
    {
        return Some(InternalResult::redirect(308, &format!("{base}/{search}")));
    }

    if !config.trailing_slash && event.raw_path.ends_with('/') && event.raw_path != "/" {
        let trimmed = base.strip_suffix('/').unwrap_or(base);
        return Some(InternalResult::redirect(308, &format!("{trimmed}{search}")));
    }

    None
}

/// Rewrite `/_next/data/<buildId>/<page>.json` to the page itself.
///
/// A data request for another build answers 404 with an empty JSON object.
pub fn fix_data_page(
    mut event: InternalEvent,
    build_id: &str,
    base_path: &str,
) -> Result<Flow, RoutingError> {
    let data_prefix = format!("{base_path}/_next/data/{build_id}");

    if event.raw_path.starts_with("/_next/data") && !event.raw_path.starts_with(&data_prefix) {
        return Ok(Flow::Respond(
            InternalResult::new(404)
                .with_header("content-type", "application/json")
                .with_body("{}"),
        ));
    }

    let page = event
        .raw_path
        .strip_prefix(&data_prefix)
        .and_then(|rest| rest.strip_suffix(".json"))
        .filter(|page| page.starts_with('/'))
        .map(str::to_string);
    if let Some(page) = page {
        let inner = if page == "/index" { "/" } else { page.as_str() };
        let new_path = format!("{base_path}{inner}");

        event
            .query
            .insert("__nextDataReq".to_string(), "1".into());
        let url = parse_url(&event.url)?;
        let target = format!("{new_path}{}", stringify_query(&event.query));
        event.url = url
            .join(&target)
            .map_err(|source| RoutingError::Url {
                url: target.clone(),
                source,
            })?
            .to_string();
        event.raw_path = new_path;
    }

    Ok(Flow::Continue(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::url::parse_query;

    fn event(url: &str, raw_path: &str) -> InternalEvent {
        InternalEvent {
            method: "GET".into(),
            raw_path: raw_path.into(),
            url: url.into(),
            query: parse_query(url.split_once('?').map(|(_, q)| q).unwrap_or("")),
            ..Default::default()
        }
    }

    #[test]
    fn test_repeated_slash_redirect() {
        let e = event("https://host//a///b?x=1", "//a///b");
        let result = handle_repeated_slash_redirect(&e).unwrap().unwrap();
        assert_eq!(result.status_code, 308);
        assert_eq!(result.header("location"), Some("https://host/a/b?x=1"));
    }

    #[test]
    fn test_backslash_redirect_keeps_query() {
        let e = event("http://host:3000/a/b?q=a//b", "/a\\b");
        let result = handle_repeated_slash_redirect(&e).unwrap().unwrap();
        assert_eq!(result.header("location"), Some("http://host:3000/a/b?q=a//b"));
        assert!(handle_repeated_slash_redirect(&event("https://h/a?x=//", "/a"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_trailing_slash_added() {
        let cfg = NextConfig {
            trailing_slash: true,
            ..Default::default()
        };
        let e = event("https://h/admin/vehicles?page=2", "/admin/vehicles");
        let r = handle_trailing_slash_redirect(&e, &cfg).unwrap();
        assert_eq!(r.status_code, 308);
        assert_eq!(r.header("location"), Some("https://h/admin/vehicles/?page=2"));

        assert!(handle_trailing_slash_redirect(&event("https://h/logo.png", "/logo.png"), &cfg).is_none());
        assert!(handle_trailing_slash_redirect(&event("https://h/api/x", "/api/x"), &cfg).is_none());
        assert!(handle_trailing_slash_redirect(&event("https://h/a/", "/a/"), &cfg).is_none());
    }

    #[test]
    fn test_trailing_slash_removed() {
        let cfg = NextConfig::default();
        let e = event("https://h/admin/vehicles/", "/admin/vehicles/");
        let r = handle_trailing_slash_redirect(&e, &cfg).unwrap();
        assert_eq!(r.header("location"), Some("https://h/admin/vehicles"));
        assert!(handle_trailing_slash_redirect(&event("https://h/", "/"), &cfg).is_none());

        let skip = NextConfig {
            skip_trailing_slash_redirect: true,
            ..Default::default()
        };
        assert!(handle_trailing_slash_redirect(&e, &skip).is_none());
    }

    #[test]
    fn test_fix_data_page() {
        let e = event("https://h/_next/data/b1/vehicles/7.json?x=1", "/_next/data/b1/vehicles/7.json");
        match fix_data_page(e, "b1", "").unwrap() {
            Flow::Continue(e) => {
                assert_eq!(e.raw_path, "/vehicles/7");
                assert_eq!(e.url, "https://h/vehicles/7?__nextDataReq=1&x=1");
                assert!(e.query.contains_key("__nextDataReq"));
            }
            Flow::Respond(r) => panic!("unexpected response {r:?}"),
        }

        let index = event("https://h/_next/data/b1/index.json", "/_next/data/b1/index.json");
        match fix_data_page(index, "b1", "").unwrap() {
            Flow::Continue(e) => assert_eq!(e.raw_path, "/"),
            Flow::Respond(r) => panic!("unexpected response {r:?}"),
        }
    }

    #[test]
    fn test_fix_data_page_wrong_build() {
        let e = event("https://h/_next/data/old/a.json", "/_next/data/old/a.json");
        match fix_data_page(e, "b1", "").unwrap() {
            Flow::Respond(r) => {
                assert_eq!(r.status_code, 404);
                assert_eq!(&r.body[..], b"{}");
                assert_eq!(r.header("content-type"), Some("application/json"));
            }
            Flow::Continue(_) => panic!("expected 404"),
        }
    }

    #[test]
    fn test_fix_data_page_build_id_ending_in_json() {
        let e = event("https://h/_next/data/abc.json", "/_next/data/abc.json");
        match fix_data_page(e, "abc.json", "").unwrap() {
            Flow::Continue(e) => {
                assert_eq!(e.raw_path, "/_next/data/abc.json");
                assert!(!e.query.contains_key("__nextDataReq"));
            }
            Flow::Respond(r) => panic!("unexpected response {r:?}"),
        }
    }
}
