//! Cache-control policy for cached responses.

use md5::{Digest, Md5};

use crate::http::event::InternalResult;
use crate::manifest::{NextConfig, PrerenderManifest, Revalidate};
use crate::revalidation::RevalidationMessage;

pub const CACHE_ONE_YEAR: i64 = 31_536_000;
pub const CACHE_ONE_MONTH: i64 = 2_592_000;
pub const CACHE_STATUS_HEADER: &str = "x-opennext-cache";

const NO_STORE: &str = "private, no-cache, no-store, max-age=0, must-revalidate";

pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", Md5::digest(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Stale,
    Error,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Stale => "STALE",
            Self::Error => "ERROR",
        }
    }
}

/// Headers for a cached response, plus the revalidation to send when stale.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheControl {
    pub cache_control: String,
    pub status: CacheStatus,
    pub etag: String,
    pub revalidation: Option<RevalidationMessage>,
}

impl CacheControl {
    pub fn apply(&self, result: &mut InternalResult) {
        result
            .headers
            .insert("cache-control".to_string(), self.cache_control.clone().into());
        result
            .headers
            .insert(CACHE_STATUS_HEADER.to_string(), self.status.as_str().into());
        result
            .headers
            .insert("etag".to_string(), self.etag.clone().into());
    }
}

/// What is being served: `path` without base path or trailing slash, `""` for the index.
#[derive(Debug, Clone, Copy)]
pub struct CachedResponse<'a> {
    pub path: &'a str,
    pub body: &'a [u8],
    pub host: &'a str,
    pub revalidate: Option<Revalidate>,
    pub last_modified: Option<i64>,
}

/// `s-maxage` is what is left of the revalidate window, floored at 1 (stale).
pub fn compute_cache_control(
    response: CachedResponse<'_>,
    now_ms: i64,
    prerender: &PrerenderManifest,
    config: &NextConfig,
    max_concurrency: u32,
) -> CacheControl {
    let etag = md5_hex(response.body);
    let route_path = if response.path.is_empty() { "/" } else { response.path };

    if response.revalidate == Some(Revalidate::Seconds(0)) {
        return CacheControl {
            cache_control: NO_STORE.to_string(),
            status: CacheStatus::Error,
            etag,
            revalidation: None,
        };
    }

    let revalidate = response.revalidate.or_else(|| {
        prerender
            .routes
            .get(route_path)
            .and_then(|r| r.initial_revalidate_seconds)
    });
    let final_revalidate = revalidate
        .and_then(Revalidate::seconds)
        .map(|s| i64::try_from(s).unwrap_or(CACHE_ONE_YEAR))
        .unwrap_or(CACHE_ONE_YEAR);

    if final_revalidate == CACHE_ONE_YEAR {
        return CacheControl {
            cache_control: format!(
                "s-maxage={CACHE_ONE_YEAR}, stale-while-revalidate={CACHE_ONE_MONTH}"
            ),
            status: CacheStatus::Hit,
            etag,
            revalidation: None,
        };
    }

    let last_modified = response.last_modified.unwrap_or(now_ms);
    let age = ((now_ms - response.last_modified.unwrap_or(0)) as f64 / 1000.0).round() as i64;
    let s_max_age = (final_revalidate - age).max(1);
    let stale = s_max_age == 1;

    let revalidation = stale.then(|| {
        let mut url = if config.trailing_slash && route_path != "/" {
            format!("{route_path}/")
        } else {
            route_path.to_string()
        };
        if !config.base_path.is_empty() {
            url = format!("{}{url}", config.base_path);
        }
        RevalidationMessage::new(
            response.host,
            &url,
            route_path,
            &etag,
            last_modified,
            max_concurrency,
        )
    });

    CacheControl {
        cache_control: format!("s-maxage={s_max_age}, stale-while-revalidate={CACHE_ONE_MONTH}"),
        status: if stale { CacheStatus::Stale } else { CacheStatus::Hit },
        etag,
        revalidation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PrerenderRoute;

    const NOW: i64 = 1_700_000_000_000;

    fn prerender(path: &str, seconds: Option<Revalidate>) -> PrerenderManifest {
        let mut manifest = PrerenderManifest::default();
        manifest.routes.insert(
            path.to_string(),
            PrerenderRoute {
                initial_revalidate_seconds: seconds,
                ..Default::default()
            },
        );
        manifest
    }

    fn response(revalidate: Option<Revalidate>, age_secs: i64) -> CachedResponse<'static> {
        CachedResponse {
            path: "/isr",
            body: b"hello",
            host: "example.com",
            revalidate,
            last_modified: Some(NOW - age_secs * 1000),
        }
    }

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_zero_revalidate_is_uncacheable() {
        let cc = compute_cache_control(
            response(Some(Revalidate::Seconds(0)), 0),
            NOW,
            &PrerenderManifest::default(),
            &NextConfig::default(),
            10,
        );
        assert_eq!(cc.status, CacheStatus::Error);
        assert_eq!(cc.cache_control, NO_STORE);
        assert_eq!(cc.etag, "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_never_revalidate() {
        let manifest = prerender("/isr", Some(Revalidate::Flag(false)));
        let cc = compute_cache_control(response(None, 10_000), NOW, &manifest, &NextConfig::default(), 10);
        assert_eq!(cc.status, CacheStatus::Hit);
        assert_eq!(cc.cache_control, "s-maxage=31536000, stale-while-revalidate=2592000");
        assert!(cc.revalidation.is_none());
    }

    #[test]
    fn test_stale_exactly_when_window_elapsed() {
        let manifest = prerender("/isr", Some(Revalidate::Seconds(60)));
        let config = NextConfig::default();
        for age in [0, 10, 58, 59, 60, 61, 3_600] {
            let cc = compute_cache_control(response(None, age), NOW, &manifest, &config, 10);
            let expected_max_age = (60 - age).max(1);
            assert_eq!(
                cc.cache_control,
                format!("s-maxage={expected_max_age}, stale-while-revalidate=2592000")
            );
            assert_eq!(cc.status == CacheStatus::Stale, expected_max_age == 1, "age {age}");
            assert_eq!(cc.revalidation.is_some(), expected_max_age == 1, "age {age}");
        }
    }

    #[test]
    fn test_value_revalidate_overrides_manifest() {
        let manifest = prerender("/isr", Some(Revalidate::Seconds(60)));
        let cc = compute_cache_control(
            response(Some(Revalidate::Seconds(600)), 100),
            NOW,
            &manifest,
            &NextConfig::default(),
            10,
        );
        assert_eq!(cc.cache_control, "s-maxage=500, stale-while-revalidate=2592000");
    }

    #[test]
    fn test_stale_message_url() {
        let config = NextConfig {
            base_path: "/docs".to_string(),
            trailing_slash: true,
            ..Default::default()
        };
        let cc = compute_cache_control(
            response(Some(Revalidate::Seconds(5)), 100),
            NOW,
            &PrerenderManifest::default(),
            &config,
            10,
        );
        let msg = cc.revalidation.unwrap();
        assert_eq!(msg.body.host, "example.com");
        assert_eq!(msg.body.url, "/docs/isr/");
        assert_eq!(msg.body.last_modified, NOW - 100_000);
        assert_eq!(
            msg.deduplication_id,
            md5_hex(format!("/isr-{}-{}", NOW - 100_000, cc.etag).as_bytes())
        );
        assert_eq!(msg.group_id, crate::revalidation::message_group_id("/isr", 10));
    }
}
