//! Forward-auth decision engine.
//!
//! Flow Overview (each step is terminal on its first failure):
//! 1. Unauthenticated CORS preflight passes untouched.
//! 2. `x-vondr-auth` present: resolve app by token, then the acting member
//!    from `x-vondr-user-id`; both must share an organization. With a
//!    forwarded host the host must belong to the organization and the app's
//!    country rules must pass.
//! 3. Otherwise resolve the `session_token` cookie to a session and member.
//! 4. `system` members are allowed immediately.
//! 5. Everyone else must arrive over HTTPS, on an allowed organization
//!    domain, from an allowed country for the app serving that domain.
//!
//! Lookups run one at a time, each bounded by the lookup timeout. Not found,
//! transient errors and timeouts all deny; the engine never retries.

use axum::{http::StatusCode, response::Response};
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    client::ForwardedRequest,
    country::{check_country_access, CountryVerdict, MSG_RULES_UNAVAILABLE},
    model::{App, Identity, MemberRole},
    redirect::{into_response, RedirectConfig},
};
use crate::store::{
    AppLookup, CountryRuleLookup, GeoIpLookup, LookupError, LookupResult, MemberLookup,
    OrganizationLookup, SessionStore,
};

pub const MSG_INVALID_TOKEN: &str = "Invalid authentication token";
pub const MSG_USER_ID_REQUIRED: &str =
    "x-vondr-user-id header is required when using API token authentication";
pub const MSG_MEMBER_NOT_FOUND: &str = "Member not found for provided x-vondr-user-id";
pub const MSG_MEMBER_NOT_ALLOWED: &str = "Member is not allowed to use this application token";
pub const MSG_ORGANIZATION_GONE: &str =
    "Organization associated with this application no longer exists";
pub const MSG_DOMAIN_NOT_ALLOWED: &str =
    "Access to this domain is not allowed for this application token";

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Why a request was denied. The display text is the API error message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Denial {
    #[error("No session cookie found")]
    NoSession,
    #[error("Invalid or expired session")]
    InvalidSession,
    #[error("Only HTTPS requests are allowed")]
    HttpsRequired,
    #[error("Access to this application is not allowed for your organization")]
    AppNotAllowed,
    #[error("Access from this country is not allowed for this application")]
    CountryBlocked,
    #[error("{0}")]
    UnauthorizedM2m(String),
}

impl Denial {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoSession | Self::InvalidSession | Self::UnauthorizedM2m(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::HttpsRequired | Self::AppNotAllowed | Self::CountryBlocked => {
                StatusCode::FORBIDDEN
            }
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    fn m2m(message: &str) -> Decision {
        Decision::Deny(Self::UnauthorizedM2m(message.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// CORS preflight without a session, nothing was checked.
    Preflight,
    Allow(Identity),
    Deny(Denial),
}

/// External lookups the engine consults, injected at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: Arc<dyn SessionStore>,
    pub members: Arc<dyn MemberLookup>,
    pub organizations: Arc<dyn OrganizationLookup>,
    pub apps: Arc<dyn AppLookup>,
    pub country_rules: Arc<dyn CountryRuleLookup>,
    pub geoip: Arc<dyn GeoIpLookup>,
}

impl Collaborators {
    /// Wire every relational lookup to the same store.
    #[must_use]
    pub fn from_store<S>(
        store: S,
        sessions: Arc<dyn SessionStore>,
        geoip: Arc<dyn GeoIpLookup>,
    ) -> Self
    where
        S: MemberLookup + OrganizationLookup + AppLookup + CountryRuleLookup + 'static,
    {
        let store = Arc::new(store);
        Self {
            sessions,
            members: store.clone(),
            organizations: store.clone(),
            apps: store.clone(),
            country_rules: store,
            geoip,
        }
    }
}

pub struct Verifier {
    collaborators: Collaborators,
    redirects: RedirectConfig,
    lookup_timeout: Duration,
}

impl Verifier {
    #[must_use]
    pub fn new(collaborators: Collaborators, redirects: RedirectConfig) -> Self {
        Self {
            collaborators,
            redirects,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_lookup_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    #[must_use]
    pub fn geoip_enabled(&self) -> bool {
        self.collaborators.geoip.is_enabled()
    }

    /// Decide and shape the response for the proxy.
    pub async fn verify(&self, request: &ForwardedRequest) -> Response {
        let decision = self.decide(request).await;
        into_response(&decision, request, &self.redirects)
    }

    #[instrument(
        skip_all,
        fields(
            method = %request.method,
            host = request.forwarded_host.as_deref().unwrap_or(""),
            browser = request.is_browser
        )
    )]
    pub async fn decide(&self, request: &ForwardedRequest) -> Decision {
        let decision = if request.is_unauthenticated_preflight() {
            Decision::Preflight
        } else if let Some(token) = request.m2m_token.as_deref() {
            self.decide_m2m(token, request).await
        } else {
            self.decide_session(request).await
        };

        match &decision {
            Decision::Preflight => debug!("preflight passed through"),
            Decision::Allow(identity) => debug!(user_id = %identity.user_id, "allowed"),
            Decision::Deny(denial) => info!(?denial, "denied"),
        }

        decision
    }

    async fn decide_m2m(&self, token: &str, request: &ForwardedRequest) -> Decision {
        let Some(app) = self
            .found("app by token", self.collaborators.apps.get_by_token(token))
            .await
        else {
            return Denial::m2m(MSG_INVALID_TOKEN);
        };

        let Some(raw_user_id) = request.m2m_user_id.as_deref() else {
            return Denial::m2m(MSG_USER_ID_REQUIRED);
        };

        let member = match Uuid::parse_str(raw_user_id.trim()) {
            Ok(member_id) => {
                self.found("member", self.collaborators.members.get_by_id(member_id))
                    .await
            }
            Err(_) => None,
        };
        let Some(member) = member else {
            return Denial::m2m(MSG_MEMBER_NOT_FOUND);
        };

        if member.organization_id != app.organization_id {
            return Denial::m2m(MSG_MEMBER_NOT_ALLOWED);
        }

        if let Some(host) = request.forwarded_host.as_deref() {
            let Some(organization) = self
                .found(
                    "organization",
                    self.collaborators
                        .organizations
                        .get_by_id(app.organization_id),
                )
                .await
            else {
                return Denial::m2m(MSG_ORGANIZATION_GONE);
            };

            if !self
                .host_allowed(app.organization_id, organization.hostname(), host)
                .await
            {
                return Denial::m2m(MSG_DOMAIN_NOT_ALLOWED);
            }

            if let CountryVerdict::Denied(message) = self.check_country(&app, request).await {
                return Decision::Deny(Denial::UnauthorizedM2m(message));
            }
        }

        Decision::Allow(Identity::from(&member))
    }

    async fn decide_session(&self, request: &ForwardedRequest) -> Decision {
        let Some(token) = request.session_token.as_deref() else {
            return Decision::Deny(Denial::NoSession);
        };

        let Some(session) = self
            .found("session", self.collaborators.sessions.get(token))
            .await
        else {
            return Decision::Deny(Denial::InvalidSession);
        };

        let Some(member) = self
            .found(
                "member",
                self.collaborators.members.get_by_id(session.member_id),
            )
            .await
        else {
            return Decision::Deny(Denial::InvalidSession);
        };

        if member.role == MemberRole::System {
            return Decision::Allow(Identity::from(&member));
        }

        if !request.is_https() {
            return Decision::Deny(Denial::HttpsRequired);
        }

        if let Some(host) = request.forwarded_host.as_deref() {
            let Some(organization) = self
                .found(
                    "organization",
                    self.collaborators
                        .organizations
                        .get_by_id(member.organization_id),
                )
                .await
            else {
                return Decision::Deny(Denial::InvalidSession);
            };

            if !self
                .host_allowed(member.organization_id, organization.hostname(), host)
                .await
            {
                return Decision::Deny(Denial::AppNotAllowed);
            }

            // Without the map the target app, and so its country rules, is unknown.
            let Ok(domain_map) = self
                .bounded(
                    "domain app map",
                    self.collaborators
                        .apps
                        .domain_app_map(member.organization_id, organization.hostname()),
                )
                .await
            else {
                return Decision::Deny(Denial::CountryBlocked);
            };

            if let Some(app) = domain_map.get(host) {
                if let CountryVerdict::Denied(reason) = self.check_country(app, request).await {
                    debug!(app_id = %app.id, %reason, "country check failed");
                    return Decision::Deny(Denial::CountryBlocked);
                }
            }
        }

        Decision::Allow(Identity::from(&member))
    }

    async fn host_allowed(
        &self,
        organization_id: Uuid,
        hostname: Option<&str>,
        host: &str,
    ) -> bool {
        self.bounded(
            "allowed domains",
            self.collaborators
                .apps
                .allowed_domains(organization_id, hostname),
        )
        .await
        .is_ok_and(|domains| domains.contains(host))
    }

    async fn check_country(&self, app: &App, request: &ForwardedRequest) -> CountryVerdict {
        match self
            .bounded(
                "country rules",
                self.collaborators.country_rules.list_codes(app.id),
            )
            .await
        {
            Ok(rules) => check_country_access(
                &rules,
                &request.client_ip,
                self.collaborators.geoip.as_ref(),
            ),
            Err(_) => CountryVerdict::Denied(MSG_RULES_UNAVAILABLE.to_string()),
        }
    }

    /// Run one lookup under the lookup timeout.
    async fn bounded<T, F>(&self, what: &'static str, lookup: F) -> Result<T, LookupError>
    where
        F: Future<Output = Result<T, LookupError>>,
    {
        let result = match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(LookupError::Timeout(self.lookup_timeout)),
        };
        if let Err(err) = &result {
            warn!("Failed to lookup {what}: {err}");
        }
        result
    }

    /// Collapse a lookup into found or not, logging why it was not.
    async fn found<T, F>(&self, what: &'static str, lookup: F) -> Option<T>
    where
        F: Future<Output = LookupResult<T>>,
    {
        match self.bounded(what, lookup).await {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                debug!("{what} not found");
                None
            }
            Err(_) => None,
        }
    }
}
