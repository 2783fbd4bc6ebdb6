//! Conversion between hyper/axum messages and the routing pipeline's
//! [`InternalEvent`]/[`InternalResult`].

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use thiserror::Error;

use crate::http::event::{InternalEvent, InternalResult, MultiValue};
use crate::routing::url::{parse_cookies, parse_query};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("request has no host")]
    MissingHost,
}

/// Headers folded into one value per name, names lower-cased.
/// Cookies are joined with `; `, everything else with `, `.
pub fn fold_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        let key = name.as_str().to_string();
        let sep = if key == "cookie" { "; " } else { ", " };
        out.entry(key)
            .and_modify(|existing| {
                existing.push_str(sep);
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    out
}

pub async fn to_internal_event(
    request: Request<Body>,
    remote: SocketAddr,
    max_body: usize,
) -> Result<InternalEvent, ConvertError> {
    let (parts, body) = request.into_parts();
    let mut headers = fold_headers(&parts.headers);

    let host = match headers.get("host") {
        Some(host) => host.clone(),
        None => {
            let host = parts
                .uri
                .authority()
                .map(|a| a.to_string())
                .ok_or(ConvertError::MissingHost)?;
            headers.insert("host".to_string(), host.clone());
            host
        }
    };
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|p| p.split(',').next())
        .map(|p| p.trim().to_string())
        .or_else(|| parts.uri.scheme_str().map(str::to_string))
        .unwrap_or_else(|| "http".to_string());
    let path = parts.uri.path().to_string();
    let search = parts.uri.query().map(|q| format!("?{q}")).unwrap_or_default();

    let bytes = axum::body::to_bytes(body, max_body)
        .await
        .map_err(|_| ConvertError::BodyTooLarge { limit: max_body })?;

    let cookies = headers
        .get("cookie")
        .map(|c| parse_cookies(c))
        .unwrap_or_default();

    Ok(InternalEvent {
        method: parts.method.as_str().to_string(),
        url: format!("{scheme}://{host}{path}{search}"),
        raw_path: path,
        body: (!bytes.is_empty()).then_some(bytes),
        query: parse_query(&search),
        cookies,
        headers,
        remote_address: remote.ip().to_string(),
    })
}

/// Build the HTTP response; `Many` header values become repeated headers.
pub fn to_response(result: InternalResult) -> Response<Body> {
    let status = StatusCode::from_u16(result.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Body::from(result.body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for (name, value) in &result.headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::debug!(header = %name, "dropping invalid response header name");
            continue;
        };
        for v in value.values() {
            match HeaderValue::from_str(v) {
                Ok(v) => {
                    headers.append(name.clone(), v);
                }
                Err(_) => tracing::debug!(header = %name, "dropping invalid response header value"),
            }
        }
    }
    response
}

/// Overlay routing headers onto an origin response. `set-cookie` is appended,
/// every other header replaces what the origin sent.
pub fn apply_headers(headers: &mut HeaderMap, overlay: &BTreeMap<String, MultiValue>) {
    for (name, value) in overlay {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        let values: Vec<HeaderValue> = value
            .values()
            .into_iter()
            .filter_map(|v| HeaderValue::from_str(v).ok())
            .collect();
        if name != axum::http::header::SET_COOKIE {
            headers.remove(&name);
        }
        for v in values {
            headers.append(name.clone(), v);
        }
    }
}
