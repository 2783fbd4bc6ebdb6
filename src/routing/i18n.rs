//! Locale detection and locale-aware paths.
//!
//! Detection order: a domain mapped to a locale group wins outright, then the
//! `NEXT_LOCALE` cookie, then the best `Accept-Language` match, then the
//! configured default.

use crate::http::event::{InternalEvent, InternalResult};
use crate::manifest::{DomainLocale, I18nConfig};
use crate::routing::url::construct_next_url;

const LOCALE_COOKIE: &str = "NEXT_LOCALE";

/// Best locale for an `Accept-Language` header among `preferences`.
///
/// Quality values sort descending with ties kept in header order; `q=0`
/// excludes a language. Each requested tag is tried exactly first, then by
/// dropping trailing subtags (`fr-FR` → `fr`). `*` picks the first preference.
pub fn accept_language(header: Option<&str>, preferences: &[String]) -> Option<String> {
    let header = header?;
    let mut selections: Vec<(String, f32, usize)> = header
        .split(',')
        .enumerate()
        .filter_map(|(position, part)| {
            let mut pieces = part.split(';');
            let token = pieces.next()?.trim().to_lowercase();
            if token.is_empty() {
                return None;
            }
            let mut q = 1.0f32;
            for param in pieces {
                if let Some((k, v)) = param.split_once('=') {
                    if k.trim() == "q" {
                        q = v.trim().parse().unwrap_or(0.0);
                    }
                }
            }
            (q > 0.0).then_some((token, q, position))
        })
        .collect();

    selections.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.2.cmp(&b.2))
    });

    let find = |tag: &str| {
        preferences
            .iter()
            .find(|p| p.to_lowercase() == tag)
            .cloned()
    };

    for (token, _, _) in &selections {
        if token == "*" {
            return preferences.first().cloned();
        }
        if let Some(found) = find(token) {
            return Some(found);
        }
        let parts: Vec<&str> = token.split('-').collect();
        for end in (1..parts.len()).rev() {
            if let Some(found) = find(&parts[..end].join("-")) {
                return Some(found);
            }
        }
    }
    None
}

fn hostname(event: &InternalEvent) -> Option<String> {
    let host = event.host()?;
    Some(host.split(':').next().unwrap_or(host).to_lowercase())
}

/// The locale group for the request's domain, if any.
pub fn domain_locale<'a>(event: &InternalEvent, i18n: &'a I18nConfig) -> Option<&'a DomainLocale> {
    let host = hostname(event)?;
    i18n.domains.as_ref()?.iter().find(|d| {
        d.domain.split(':').next().unwrap_or(&d.domain).to_lowercase() == host
    })
}

/// The locale group that prefers `locale`.
fn preferred_domain<'a>(i18n: &'a I18nConfig, locale: &str) -> Option<&'a DomainLocale> {
    let locale = locale.to_lowercase();
    i18n.domains.as_ref()?.iter().find(|d| {
        d.default_locale.to_lowercase() == locale
            || d.locales.iter().any(|l| l.to_lowercase() == locale)
    })
}

fn cookie_locale(event: &InternalEvent, i18n: &I18nConfig) -> Option<String> {
    let value = event.cookies.get(LOCALE_COOKIE)?.to_lowercase();
    i18n.locales.iter().find(|l| l.to_lowercase() == value).cloned()
}

pub fn detect_locale(event: &InternalEvent, i18n: &I18nConfig) -> String {
    let domain = domain_locale(event, i18n);
    if i18n.locale_detection == Some(false) {
        return domain
            .map(|d| d.default_locale.clone())
            .unwrap_or_else(|| i18n.default_locale.clone());
    }
    if let Some(domain) = domain {
        return domain.default_locale.clone();
    }
    cookie_locale(event, i18n)
        .or_else(|| accept_language(event.header("accept-language"), &i18n.locales))
        .unwrap_or_else(|| i18n.default_locale.clone())
}

fn first_segment(path: &str) -> &str {
    path.split('/').nth(1).unwrap_or("")
}

/// The locale the path already starts with, if any.
pub fn path_locale<'a>(path: &str, i18n: &'a I18nConfig) -> Option<&'a str> {
    let segment = first_segment(path).to_lowercase();
    i18n.locales
        .iter()
        .find(|l| l.to_lowercase() == segment)
        .map(String::as_str)
}

/// Prefix the raw path with the detected locale unless it already carries one.
pub fn localize_path(event: &InternalEvent, i18n: Option<&I18nConfig>) -> String {
    let Some(i18n) = i18n else {
        return event.raw_path.clone();
    };
    if path_locale(&event.raw_path, i18n).is_some() {
        return event.raw_path.clone();
    }
    format!("/{}{}", detect_locale(event, i18n), event.raw_path)
}

/// 307 from `/` to the visitor's locale (or preferred domain).
pub fn handle_locale_redirect(
    event: &InternalEvent,
    i18n: Option<&I18nConfig>,
    base_path: &str,
) -> Option<InternalResult> {
    let i18n = i18n?;
    if i18n.locale_detection == Some(false) || event.raw_path != "/" {
        return None;
    }

    let preferred = accept_language(event.header("accept-language"), &i18n.locales);
    let detected = detect_locale(event, i18n);
    let domain = domain_locale(event, i18n);

    if let (Some(domain), Some(preferred)) = (domain, preferred.as_deref()) {
        if let Some(preferred_domain) = preferred_domain(i18n, preferred) {
            let same_domain = preferred_domain.domain == domain.domain;
            let is_default = preferred_domain.default_locale == preferred;
            if !same_domain || !is_default {
                let scheme = if preferred_domain.http == Some(true) { "http" } else { "https" };
                let locale = if is_default { "" } else { preferred };
                return Some(InternalResult::redirect(
                    307,
                    &format!("{scheme}://{}/{locale}", preferred_domain.domain),
                ));
            }
        }
    }

    let default_locale = domain
        .map(|d| d.default_locale.as_str())
        .unwrap_or(&i18n.default_locale);
    if detected.to_lowercase() == default_locale.to_lowercase() {
        return None;
    }

    let location = construct_next_url(&event.url, &format!("/{detected}"), base_path).ok()?;
    Some(InternalResult::redirect(307, &location))
}
