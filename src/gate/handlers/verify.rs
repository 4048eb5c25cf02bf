use axum::{
    extract::{ConnectInfo, Extension, OriginalUri},
    http::{HeaderMap, Method},
    response::Response,
};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use utoipa::ToSchema;

use crate::gate::{client::ForwardedRequest, engine::Verifier};

/// JSON body returned to API clients on denial.
#[derive(ToSchema, Serialize, Debug)]
pub struct VerifyError {
    error: String,
}

#[utoipa::path(
    get,
    path = "/auth/verify",
    params(
        ("x-forwarded-proto" = Option<String>, Header, description = "Scheme of the original request"),
        ("x-forwarded-host" = Option<String>, Header, description = "Host of the original request"),
        ("x-forwarded-uri" = Option<String>, Header, description = "Path of the original request"),
        ("x-vondr-auth" = Option<String>, Header, description = "Application token for machine-to-machine calls"),
        ("x-vondr-user-id" = Option<String>, Header, description = "Acting member for machine-to-machine calls"),
    ),
    responses(
        (status = 200, description = "Allowed, identity in x-vondr-* response headers"),
        (status = 302, description = "Denied browser request, redirect to login or error page"),
        (status = 401, description = "Missing or invalid credentials", body = VerifyError),
        (status = 403, description = "Credentials valid but access not allowed", body = VerifyError),
    ),
    tag = "auth"
)]
// axum handler for forward auth, mounted for every method
pub async fn verify(
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    verifier: Extension<Arc<Verifier>>,
) -> Response {
    let request = ForwardedRequest::from_parts(
        &method,
        uri.path(),
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
    );

    verifier.verify(&request).await
}
