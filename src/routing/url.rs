//! URL, query and cookie helpers shared by the routing stages.

use std::collections::BTreeMap;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use crate::http::event::{MultiValue, Query};

/// Characters escaped in query keys and values.
const QUERY_COMPONENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'%')
    .add(b'`');

/// Parse `a=1&a=2&b` (leading `?` optional). Repeated keys become `Many`.
pub fn parse_query(search: &str) -> Query {
    let search = search.strip_prefix('?').unwrap_or(search);
    let mut query = Query::new();
    for (key, value) in url::form_urlencoded::parse(search.as_bytes()) {
        insert_query_value(&mut query, key.into_owned(), value.into_owned());
    }
    query
}

pub fn insert_query_value(query: &mut Query, key: String, value: String) {
    match query.get_mut(&key) {
        Some(existing) => existing.push(value),
        None => {
            query.insert(key, MultiValue::One(value));
        }
    }
}

/// `?a=1&a=2&b=`, or an empty string for an empty query.
pub fn stringify_query(query: &Query) -> String {
    let mut parts = Vec::new();
    for (key, value) in query {
        let key = utf8_percent_encode(key, QUERY_COMPONENT).to_string();
        for v in value.values() {
            parts.push(format!("{key}={}", utf8_percent_encode(v, QUERY_COMPONENT)));
        }
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("?{}", parts.join("&"))
    }
}

pub fn parse_cookies(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Absolute URL for `<basePath><path>` resolved against `base_url`.
pub fn construct_next_url(base_url: &str, path: &str, base_path: &str) -> Result<String, url::ParseError> {
    let base = Url::parse(base_url)?;
    Ok(base.join(&format!("{base_path}{path}"))?.to_string())
}

/// Pieces of a rewrite destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub protocol: String,
    pub hostname: String,
    pub pathname: String,
    pub query_string: String,
}

/// Split a destination into its parts without normalising it, so template
/// syntax in the host or path survives.
pub fn url_parts(url: &str, external: bool) -> Option<UrlParts> {
    if !external {
        let (path, query) = match url.split_once('?') {
            Some((p, q)) => (p, q),
            None => (url, ""),
        };
        return Some(UrlParts {
            protocol: String::new(),
            hostname: String::new(),
            pathname: path.to_string(),
            query_string: query.to_string(),
        });
    }

    let (protocol, rest) = if let Some(rest) = url.strip_prefix("https:") {
        ("https:", rest)
    } else if let Some(rest) = url.strip_prefix("http:") {
        ("http:", rest)
    } else {
        return None;
    };
    let rest = rest.strip_prefix("//").or_else(|| rest.strip_prefix('/'))?;
    let host_end = rest
        .find(|c: char| c == '/' || c == '?' || c.is_whitespace())
        .unwrap_or(rest.len());
    let hostname = &rest[..host_end];
    if hostname.is_empty() {
        return None;
    }
    let remainder = &rest[host_end..];
    let (pathname, query_string) = match remainder.split_once('?') {
        Some((p, q)) => (p, q),
        None => (remainder, ""),
    };

    Some(UrlParts {
        protocol: protocol.to_string(),
        hostname: hostname.to_string(),
        pathname: pathname.to_string(),
        query_string: query_string.to_string(),
    })
}

/// Whether `url` is absolute and, when a host is given, points elsewhere.
pub fn is_external(url: &str, host: Option<&str>) -> bool {
    let absolute = url.starts_with("http://") || url.starts_with("https://");
    match host {
        Some(host) if !host.is_empty() => absolute && !url.contains(host),
        _ => absolute,
    }
}

/// Decode one path segment, re-escaping characters that would change the path structure.
pub fn decode_path_segment(segment: &str) -> String {
    let decoded = percent_encoding::percent_decode_str(segment).decode_utf8_lossy();
    let mut out = String::with_capacity(decoded.len());
    for c in decoded.chars() {
        match c {
            '/' => out.push_str("%2F"),
            '?' => out.push_str("%3F"),
            '#' => out.push_str("%23"),
            '%' => out.push_str("%25"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_repeated_keys() {
        let q = parse_query("?a=1&a=2&b=x%20y&c");
        assert_eq!(q["a"], MultiValue::Many(vec!["1".into(), "2".into()]));
        assert_eq!(q["b"], MultiValue::One("x y".into()));
        assert_eq!(q["c"], MultiValue::One(String::new()));
    }

    #[test]
    fn test_stringify_query() {
        let q = parse_query("b=2&a=1&a=3&s=a b");
        assert_eq!(stringify_query(&q), "?a=1&a=3&b=2&s=a%20b");
        assert_eq!(stringify_query(&Query::new()), "");
    }

    #[test]
    fn test_parse_cookies() {
        let c = parse_cookies("NEXT_LOCALE=fr; session=abc=def;  empty=");
        assert_eq!(c["NEXT_LOCALE"], "fr");
        assert_eq!(c["session"], "abc=def");
        assert_eq!(c["empty"], "");
    }

    #[test]
    fn test_construct_next_url() {
        assert_eq!(
            construct_next_url("https://fleet.example.com/x?y=1", "/fr", "").unwrap(),
            "https://fleet.example.com/fr"
        );
        assert_eq!(
            construct_next_url("https://fleet.example.com/", "/fr", "/app").unwrap(),
            "https://fleet.example.com/app/fr"
        );
    }

    #[test]
    fn test_url_parts_external() {
        let parts = url_parts("https://:sub.example.com/docs/:path*?ref=:ref", true).unwrap();
        assert_eq!(parts.protocol, "https:");
        assert_eq!(parts.hostname, ":sub.example.com");
        assert_eq!(parts.pathname, "/docs/:path*");
        assert_eq!(parts.query_string, "ref=:ref");

        assert!(url_parts("/relative", true).is_none());
    }

    #[test]
    fn test_url_parts_internal() {
        let parts = url_parts("/vehicles/:id?tab=overview", false).unwrap();
        assert_eq!(parts.pathname, "/vehicles/:id");
        assert_eq!(parts.query_string, "tab=overview");
        assert!(parts.hostname.is_empty());
    }

    #[test]
    fn test_is_external() {
        assert!(is_external("https://other.com/a", Some("fleet.example.com")));
        assert!(!is_external("https://fleet.example.com/a", Some("fleet.example.com")));
        assert!(!is_external("/a", None));
        assert!(is_external("http://x.com", None));
    }

    #[test]
    fn test_decode_path_segment() {
        assert_eq!(decode_path_segment("caf%C3%A9"), "café");
        assert_eq!(decode_path_segment("a%2Fb"), "a%2Fb");
        assert_eq!(decode_path_segment("what%3F"), "what%3F");
    }
}
