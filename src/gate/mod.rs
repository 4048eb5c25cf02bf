use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Extension, MatchedPath},
    http::{HeaderName, HeaderValue, Method, Request},
    routing::{any, get},
    Router,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod client;
pub mod country;
pub mod domains;
pub mod engine;
pub mod handlers;
pub mod model;
pub mod redirect;

#[cfg(test)]
mod tests;

use self::engine::{Collaborators, Verifier};
use crate::store::{geoip::MaxMindGeoIp, keydb::KeyDbSessionStore, postgres::PgStore};

#[derive(OpenApi)]
#[openapi(
    paths(handlers::verify::verify, handlers::health::health),
    components(schemas(handlers::verify::VerifyError, handlers::health::Health)),
    tags(
        (name = "auth", description = "Forward-auth decisions for the reverse proxy"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

/// Server settings resolved from the CLI.
#[derive(Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub dsn: SecretString,
    pub keydb_url: SecretString,
    pub auth_login_url: String,
    pub error_login_url: String,
    pub geoip_db_path: Option<std::path::PathBuf>,
    pub lookup_timeout: Duration,
    pub cors_origins: Vec<String>,
}

/// Router for the verify and health endpoints and API docs.
///
/// The verify route answers every method: the proxy may forward the original
/// verb and the decision never depends on our own method except for preflight.
/// `/health` additionally expects an `Extension<PgPool>`.
#[must_use]
pub fn router(verifier: Arc<Verifier>) -> Router {
    Router::new()
        .route("/auth/verify", any(handlers::verify))
        .route("/health", get(handlers::health).options(handlers::health))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(Extension(verifier))
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(config: ServerConfig) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(10)
        .max_lifetime(Duration::from_secs(60 * 2))
        .acquire_timeout(config.lookup_timeout)
        .test_before_acquire(true)
        .connect(config.dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    let sessions = KeyDbSessionStore::connect(config.keydb_url.expose_secret())
        .await
        .context("Failed to connect to KeyDB")?;

    let geoip = Arc::new(MaxMindGeoIp::open(config.geoip_db_path.as_deref()));
    let collaborators =
        Collaborators::from_store(PgStore::new(pool.clone()), Arc::new(sessions), geoip);
    let redirects =
        redirect::RedirectConfig::new(config.auth_login_url, config.error_login_url);
    let verifier = Arc::new(
        Verifier::new(collaborators, redirects).with_lookup_timeout(config.lookup_timeout),
    );

    let app = router(verifier).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .option_layer(cors_layer(&config.cors_origins)?)
            .layer(Extension(pool)),
    );

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// CORS for browser calls to the service itself; an empty list disables it.
fn cors_layer(origins: &[String]) -> Result<Option<CorsLayer>> {
    if origins.is_empty() {
        return Ok(None);
    }

    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("Invalid CORS origin: {origin}"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_credentials(true),
    ))
}
