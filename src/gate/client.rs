//! Client classification for forwarded requests.
//!
//! Flow Overview: the proxy calls `/auth/verify` with the original request
//! described in `x-forwarded-*` headers. Everything the engine needs from the
//! inbound request is captured once into a `ForwardedRequest`, which is then
//! passed by reference through the decision and the response builder.

use axum::http::{header, HeaderMap, Method};
use std::net::SocketAddr;

pub const HEADER_FORWARDED_METHOD: &str = "x-forwarded-method";
pub const HEADER_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const HEADER_FORWARDED_HOST: &str = "x-forwarded-host";
pub const HEADER_FORWARDED_URI: &str = "x-forwarded-uri";
pub const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";
pub const HEADER_ORIGINAL_URI: &str = "x-original-uri";
pub const HEADER_REAL_IP: &str = "x-real-ip";
pub const HEADER_PREFLIGHT: &str = "access-control-request-method";
pub const HEADER_M2M_TOKEN: &str = "x-vondr-auth";
pub const HEADER_USER_ID: &str = "x-vondr-user-id";
pub const HEADER_EMAIL: &str = "x-vondr-email";
pub const HEADER_ORGANIZATION_ID: &str = "x-vondr-organization-id";
pub const SESSION_COOKIE_NAME: &str = "session_token";

/// Request-scoped view of the guarded request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ForwardedRequest {
    /// Method of the original request (forwarded method, else our own).
    pub method: String,
    pub forwarded_proto: Option<String>,
    pub forwarded_host: Option<String>,
    pub forwarded_uri: Option<String>,
    pub original_uri: Option<String>,
    /// Path of the verify request itself, last resort for the return URL.
    pub request_path: String,
    pub session_token: Option<String>,
    pub m2m_token: Option<String>,
    pub m2m_user_id: Option<String>,
    pub client_ip: String,
    pub is_browser: bool,
    pub has_preflight_header: bool,
}

impl ForwardedRequest {
    /// Capture the forwarded request from the verify call.
    #[must_use]
    pub fn from_parts(
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
    ) -> Self {
        let method = header_value(headers, HEADER_FORWARDED_METHOD)
            .map_or_else(|| method.as_str().to_string(), str::to_string);

        Self {
            method,
            forwarded_proto: header_value(headers, HEADER_FORWARDED_PROTO).map(str::to_string),
            forwarded_host: header_value(headers, HEADER_FORWARDED_HOST).map(str::to_string),
            forwarded_uri: header_value(headers, HEADER_FORWARDED_URI).map(str::to_string),
            original_uri: header_value(headers, HEADER_ORIGINAL_URI).map(str::to_string),
            request_path: path.to_string(),
            session_token: extract_session_token(headers),
            m2m_token: header_value(headers, HEADER_M2M_TOKEN).map(str::to_string),
            m2m_user_id: header_value(headers, HEADER_USER_ID).map(str::to_string),
            client_ip: extract_client_ip(headers, peer),
            is_browser: is_browser_request(headers),
            has_preflight_header: header_value(headers, HEADER_PREFLIGHT).is_some(),
        }
    }

    /// CORS preflight without a session is left to the proxy's own CORS handling.
    #[must_use]
    pub fn is_unauthenticated_preflight(&self) -> bool {
        let is_preflight = self.method.eq_ignore_ascii_case("OPTIONS") || self.has_preflight_header;
        is_preflight && self.session_token.is_none()
    }

    /// True when the original request arrived over HTTPS.
    #[must_use]
    pub fn is_https(&self) -> bool {
        self.forwarded_proto
            .as_deref()
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
    }
}

/// Header value as text, with missing, non-ASCII and empty values all treated as absent.
pub(crate) fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// First entry of a comma separated forwarded header.
pub(crate) fn first_forwarded_value(value: &str) -> &str {
    value.split(',').next().map_or("", str::trim)
}

/// Real client IP: first `x-forwarded-for` entry, else `x-real-ip`, else the peer address.
#[must_use]
pub fn extract_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = header_value(headers, HEADER_FORWARDED_FOR) {
        return first_forwarded_value(forwarded).to_string();
    }
    if let Some(real_ip) = header_value(headers, HEADER_REAL_IP) {
        return real_ip.trim().to_string();
    }
    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

/// Browser clients advertise `text/html` in `Accept`.
#[must_use]
pub fn is_browser_request(headers: &HeaderMap) -> bool {
    header_value(headers, header::ACCEPT.as_str()).is_some_and(|accept| accept.contains("text/html"))
}

fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(header::COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            if key.trim() == SESSION_COOKIE_NAME {
                let token = val.trim().trim_matches('"');
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }
    None
}
