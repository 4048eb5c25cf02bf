//! Redirect targets and response shaping for verify decisions.
//!
//! Browser clients always get a `302 Found` with `Location`; API clients always
//! get the matching status with a JSON `{"error": message}` body. The choice is
//! made once per decision from `ForwardedRequest::is_browser`.

use axum::{
    body::Body,
    http::{header::LOCATION, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::error;
use url::form_urlencoded;

use super::{
    client::{
        first_forwarded_value, ForwardedRequest, HEADER_EMAIL, HEADER_ORGANIZATION_ID,
        HEADER_USER_ID,
    },
    engine::{Decision, Denial},
    model::Identity,
};

/// Reason code used in error redirects for access denials.
pub const REASON_APP_NOT_ALLOWED: &str = "app_not_allowed";
/// Reason code used in error redirects for country denials.
pub const REASON_APP_COUNTRY_BLOCKED: &str = "app_country_blocked";

/// Where denied browser clients are sent.
#[derive(Clone, Debug)]
pub struct RedirectConfig {
    auth_login_url: String,
    error_login_url: String,
}

impl RedirectConfig {
    #[must_use]
    pub fn new(auth_login_url: String, error_login_url: String) -> Self {
        Self {
            auth_login_url,
            error_login_url,
        }
    }

    /// Login URL with `auto=1` and the original request as `return_to`.
    /// Falls back to the bare login URL when the original URL cannot be rebuilt.
    #[must_use]
    pub fn login_redirect_url(&self, request: &ForwardedRequest) -> String {
        match build_original_request_url(request) {
            Some(original) => {
                let encoded: String = form_urlencoded::byte_serialize(original.as_bytes()).collect();
                format!("{}?auto=1&return_to={encoded}", self.auth_login_url)
            }
            None => self.auth_login_url.clone(),
        }
    }

    /// Error page URL: `<errorLoginBase>/<status>/<reason>`.
    #[must_use]
    pub fn error_redirect_url(&self, status: StatusCode, reason: &str) -> String {
        format!("{}/{}/{reason}", self.error_login_url, status.as_u16())
    }
}

/// Rebuild the URL the client originally asked for.
///
/// Returns `None` unless the forwarded proto is `http` or `https` and a
/// forwarded host is present.
#[must_use]
pub fn build_original_request_url(request: &ForwardedRequest) -> Option<String> {
    let proto = request
        .forwarded_proto
        .as_deref()
        .map(first_forwarded_value)
        .filter(|proto| !proto.is_empty())?
        .to_ascii_lowercase();
    let host = request
        .forwarded_host
        .as_deref()
        .map(first_forwarded_value)
        .filter(|host| !host.is_empty())?;

    if proto != "http" && proto != "https" {
        return None;
    }

    let path = request
        .forwarded_uri
        .as_deref()
        .map(first_forwarded_value)
        .filter(|uri| !uri.is_empty())
        .or(request.original_uri.as_deref())
        .unwrap_or(&request.request_path);

    if path.starts_with('/') {
        Some(format!("{proto}://{host}{path}"))
    } else {
        Some(format!("{proto}://{host}/{path}"))
    }
}

/// Turn a decision into the HTTP response returned to the proxy.
#[must_use]
pub fn into_response(
    decision: &Decision,
    request: &ForwardedRequest,
    config: &RedirectConfig,
) -> Response {
    match decision {
        Decision::Preflight => StatusCode::OK.into_response(),
        Decision::Allow(identity) => identity_response(identity),
        Decision::Deny(denial) => denial_response(denial, request, config),
    }
}

fn identity_response(identity: &Identity) -> Response {
    let headers = [
        (HEADER_USER_ID, identity.user_id.to_string()),
        (HEADER_EMAIL, identity.email.clone()),
        (HEADER_ORGANIZATION_ID, identity.organization_id.to_string()),
    ];

    let mut response = Response::new(Body::empty());
    for (name, value) in headers {
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(name), value);
            }
            Err(err) => {
                error!("Failed to encode identity header {name}: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }
    response
}

fn denial_response(
    denial: &Denial,
    request: &ForwardedRequest,
    config: &RedirectConfig,
) -> Response {
    if !request.is_browser {
        let body = Json(json!({ "error": denial.message() }));
        return (denial.status(), body).into_response();
    }

    let location = match denial {
        Denial::NoSession | Denial::InvalidSession | Denial::UnauthorizedM2m(_) => {
            config.login_redirect_url(request)
        }
        Denial::HttpsRequired | Denial::AppNotAllowed => {
            config.error_redirect_url(StatusCode::FORBIDDEN, REASON_APP_NOT_ALLOWED)
        }
        Denial::CountryBlocked => {
            config.error_redirect_url(StatusCode::FORBIDDEN, REASON_APP_COUNTRY_BLOCKED)
        }
    };

    redirect(&location)
}

fn redirect(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(err) => {
            error!("Failed to encode redirect location: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
