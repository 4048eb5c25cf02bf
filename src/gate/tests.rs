//! Decision scenarios against the in-memory collaborators.

#![allow(clippy::unwrap_used)]

use axum::{
    body::to_bytes,
    http::{header::LOCATION, StatusCode},
    response::Response,
};
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

use super::{
    client::{ForwardedRequest, HEADER_EMAIL, HEADER_ORGANIZATION_ID, HEADER_USER_ID},
    engine::{
        Collaborators, Decision, Denial, Verifier, MSG_DOMAIN_NOT_ALLOWED, MSG_INVALID_TOKEN,
        MSG_MEMBER_NOT_ALLOWED, MSG_MEMBER_NOT_FOUND, MSG_ORGANIZATION_GONE,
        MSG_USER_ID_REQUIRED,
    },
    model::{App, Identity, Member, MemberRole, Organization, Session},
    redirect::RedirectConfig,
};
use crate::store::memory::{
    MemoryApps, MemoryCountryRules, MemoryMembers, MemoryOrganizations, MemorySessionStore,
    StaticGeoIp,
};

const ACME: Uuid = Uuid::from_u128(0x0a);
const GLOBEX: Uuid = Uuid::from_u128(0x0b);
const DISSOLVED: Uuid = Uuid::from_u128(0x0c);
const BARE: Uuid = Uuid::from_u128(0x0d);

const ALICE: Uuid = Uuid::from_u128(0x1a);
const ROBOT: Uuid = Uuid::from_u128(0x1b);
const HANK: Uuid = Uuid::from_u128(0x1c);
const GHOST: Uuid = Uuid::from_u128(0x1d);
const BORIS: Uuid = Uuid::from_u128(0x1e);
const DORA: Uuid = Uuid::from_u128(0x1f);

const PORTAL: Uuid = Uuid::from_u128(0x2a);
const FINANCE: Uuid = Uuid::from_u128(0x2b);
const ORPHAN: Uuid = Uuid::from_u128(0x2c);

const NL_IP: &str = "203.0.113.10";
const US_IP: &str = "198.51.100.20";
const UNKNOWN_IP: &str = "192.0.2.99";

const LOGIN_URL: &str = "https://auth.vondr.ai/login";
const ERROR_URL: &str = "https://auth.vondr.ai/error";

fn member(id: Uuid, email: &str, organization_id: Uuid, role: MemberRole) -> Member {
    Member {
        id,
        email: email.to_string(),
        organization_id,
        role,
    }
}

fn session(token: &str, member: &Member) -> Session {
    Session {
        token: token.to_string(),
        member_id: member.id,
        email: member.email.clone(),
        organization_id: member.organization_id,
        external_identity_id: format!("ext-{}", member.id),
    }
}

fn app(id: Uuid, organization_id: Uuid, label: &str, token: &str) -> App {
    App {
        id,
        organization_id,
        subdomain_labels: vec![label.to_string()],
        main_label: label.to_string(),
        access_token: token.to_string(),
        is_platform_app: false,
    }
}

fn members() -> Vec<Member> {
    vec![
        member(ALICE, "alice@acme.test", ACME, MemberRole::Member),
        member(ROBOT, "robot@acme.test", ACME, MemberRole::System),
        member(HANK, "hank@globex.test", GLOBEX, MemberRole::Admin),
        member(BORIS, "boris@bare.test", BARE, MemberRole::Member),
        member(DORA, "dora@dissolved.test", DISSOLVED, MemberRole::Member),
    ]
}

/// Acme owns `acme.vondr.ai` with a portal app (no rules) and a finance app
/// restricted to NL. Bare has no hostname. Dissolved has an app but no
/// organization record.
fn collaborators() -> Collaborators {
    let members = members();
    let alice = &members[0];
    let robot = &members[1];
    let boris = &members[3];
    let ghost = member(GHOST, "ghost@acme.test", ACME, MemberRole::Member);

    Collaborators {
        sessions: Arc::new(MemorySessionStore::new([
            session("sess-alice", alice),
            session("sess-robot", robot),
            session("sess-boris", boris),
            session("sess-ghost", &ghost),
        ])),
        members: Arc::new(MemoryMembers::new(members)),
        organizations: Arc::new(MemoryOrganizations::new([
            Organization {
                id: ACME,
                hostname: Some("acme.vondr.ai".to_string()),
            },
            Organization {
                id: GLOBEX,
                hostname: Some("globex.vondr.ai".to_string()),
            },
            Organization {
                id: BARE,
                hostname: None,
            },
        ])),
        apps: Arc::new(MemoryApps::new([
            app(PORTAL, ACME, "portal", "tok-portal"),
            app(FINANCE, ACME, "finance", "tok-finance"),
            app(ORPHAN, DISSOLVED, "orphan", "tok-orphan"),
        ])),
        country_rules: Arc::new(MemoryCountryRules::new([(FINANCE, &["nl"][..])])),
        geoip: Arc::new(StaticGeoIp::new([(NL_IP, "NL"), (US_IP, "US")])),
    }
}

fn verifier(collaborators: Collaborators) -> Verifier {
    Verifier::new(
        collaborators,
        RedirectConfig::new(LOGIN_URL.to_string(), ERROR_URL.to_string()),
    )
}

fn request(proto: &str, host: &str) -> ForwardedRequest {
    ForwardedRequest {
        method: "GET".to_string(),
        forwarded_proto: Some(proto.to_string()),
        forwarded_host: Some(host.to_string()),
        forwarded_uri: Some("/dashboard".to_string()),
        request_path: "/auth/verify".to_string(),
        client_ip: NL_IP.to_string(),
        ..ForwardedRequest::default()
    }
}

fn with_session(token: &str, host: &str) -> ForwardedRequest {
    ForwardedRequest {
        session_token: Some(token.to_string()),
        ..request("https", host)
    }
}

fn with_m2m(token: &str, user_id: Option<Uuid>, host: Option<&str>) -> ForwardedRequest {
    ForwardedRequest {
        m2m_token: Some(token.to_string()),
        m2m_user_id: user_id.map(|id| id.to_string()),
        forwarded_host: host.map(str::to_string),
        ..request("https", "ignored")
    }
}

fn browser(request: ForwardedRequest) -> ForwardedRequest {
    ForwardedRequest {
        is_browser: true,
        ..request
    }
}

fn from_ip(request: ForwardedRequest, ip: &str) -> ForwardedRequest {
    ForwardedRequest {
        client_ip: ip.to_string(),
        ..request
    }
}

fn alice() -> Identity {
    Identity::from(&members()[0])
}

async fn error_body(response: Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
}

#[tokio::test]
async fn missing_cookie_is_no_session() {
    let verifier = verifier(collaborators());
    let request = request("https", "portal.acme.vondr.ai");

    assert_eq!(
        verifier.decide(&request).await,
        Decision::Deny(Denial::NoSession)
    );

    let response = verifier.verify(&request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        error_body(response).await,
        serde_json::json!({ "error": "No session cookie found" })
    );
}

#[tokio::test]
async fn missing_cookie_redirects_browser_to_login_with_return_to() {
    let verifier = verifier(collaborators());
    let request = browser(request("https", "portal.acme.vondr.ai"));

    let response = verifier.verify(&request).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        "https://auth.vondr.ai/login?auto=1&return_to=https%3A%2F%2Fportal.acme.vondr.ai%2Fdashboard"
    );
}

#[tokio::test]
async fn unknown_session_is_invalid() {
    let verifier = verifier(collaborators());
    let decision = verifier
        .decide(&with_session("sess-nobody", "portal.acme.vondr.ai"))
        .await;
    assert_eq!(decision, Decision::Deny(Denial::InvalidSession));
}

#[tokio::test]
async fn session_store_failure_is_invalid_session() {
    let mut collaborators = collaborators();
    collaborators.sessions = Arc::new(MemorySessionStore::failing());
    let verifier = verifier(collaborators);

    let response = verifier
        .verify(&with_session("sess-alice", "portal.acme.vondr.ai"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        error_body(response).await,
        serde_json::json!({ "error": "Invalid or expired session" })
    );
}

#[tokio::test]
async fn session_without_member_is_invalid() {
    let verifier = verifier(collaborators());
    let decision = verifier
        .decide(&with_session("sess-ghost", "portal.acme.vondr.ai"))
        .await;
    assert_eq!(decision, Decision::Deny(Denial::InvalidSession));
}

#[tokio::test]
async fn member_lookup_failure_is_invalid_session() {
    let mut collaborators = collaborators();
    collaborators.members = Arc::new(MemoryMembers::failing());
    let verifier = verifier(collaborators);

    let decision = verifier
        .decide(&with_session("sess-alice", "portal.acme.vondr.ai"))
        .await;
    assert_eq!(decision, Decision::Deny(Denial::InvalidSession));
}

#[tokio::test]
async fn slow_session_store_times_out_and_denies() {
    let mut collaborators = collaborators();
    collaborators.sessions = Arc::new(
        MemorySessionStore::new([session("sess-alice", &members()[0])])
            .with_latency(Duration::from_millis(500)),
    );
    let verifier = verifier(collaborators).with_lookup_timeout(Duration::from_millis(10));

    let decision = verifier
        .decide(&with_session("sess-alice", "portal.acme.vondr.ai"))
        .await;
    assert_eq!(decision, Decision::Deny(Denial::InvalidSession));
}

#[tokio::test]
async fn system_member_bypasses_https_domain_and_country() {
    let verifier = verifier(collaborators());
    let request = from_ip(
        ForwardedRequest {
            session_token: Some("sess-robot".to_string()),
            ..request("http", "evil.example.com")
        },
        US_IP,
    );

    let decision = verifier.decide(&request).await;
    assert_eq!(
        decision,
        Decision::Allow(Identity::from(&members()[1]))
    );
}

#[tokio::test]
async fn plain_http_is_forbidden() {
    let verifier = verifier(collaborators());
    let request = ForwardedRequest {
        session_token: Some("sess-alice".to_string()),
        ..request("http", "portal.acme.vondr.ai")
    };

    assert_eq!(
        verifier.decide(&request).await,
        Decision::Deny(Denial::HttpsRequired)
    );

    let response = verifier.verify(&request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        error_body(response).await,
        serde_json::json!({ "error": "Only HTTPS requests are allowed" })
    );

    let response = verifier.verify(&browser(request)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        "https://auth.vondr.ai/error/403/app_not_allowed"
    );
}

#[tokio::test]
async fn missing_forwarded_proto_is_not_https() {
    let verifier = verifier(collaborators());
    let request = ForwardedRequest {
        forwarded_proto: None,
        ..with_session("sess-alice", "portal.acme.vondr.ai")
    };

    assert_eq!(
        verifier.decide(&request).await,
        Decision::Deny(Denial::HttpsRequired)
    );
}

#[tokio::test]
async fn organization_hostname_and_app_subdomains_are_allowed() {
    let verifier = verifier(collaborators());

    for host in [
        "acme.vondr.ai",
        "portal.acme.vondr.ai",
        "finance.acme.vondr.ai",
    ] {
        let decision = verifier.decide(&with_session("sess-alice", host)).await;
        assert_eq!(decision, Decision::Allow(alice()), "host {host}");
    }
}

#[tokio::test]
async fn allowed_request_carries_identity_headers() {
    let verifier = verifier(collaborators());
    let response = verifier
        .verify(&with_session("sess-alice", "portal.acme.vondr.ai"))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(
        headers.get(HEADER_USER_ID).unwrap(),
        ALICE.to_string().as_str()
    );
    assert_eq!(headers.get(HEADER_EMAIL).unwrap(), "alice@acme.test");
    assert_eq!(
        headers.get(HEADER_ORGANIZATION_ID).unwrap(),
        ACME.to_string().as_str()
    );
}

#[tokio::test]
async fn foreign_host_is_not_allowed() {
    let verifier = verifier(collaborators());

    for host in [
        "evil.example.com",
        "globex.vondr.ai",
        "shop.acme.vondr.ai",
        "portal.acme.vondr.ai.evil.example.com",
    ] {
        let decision = verifier.decide(&with_session("sess-alice", host)).await;
        assert_eq!(decision, Decision::Deny(Denial::AppNotAllowed), "host {host}");
    }

    let response = verifier
        .verify(&with_session("sess-alice", "evil.example.com"))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        error_body(response).await,
        serde_json::json!({
            "error": "Access to this application is not allowed for your organization"
        })
    );
}

#[tokio::test]
async fn organization_without_hostname_allows_no_domain() {
    let verifier = verifier(collaborators());
    let decision = verifier.decide(&with_session("sess-boris", "portal")).await;
    assert_eq!(decision, Decision::Deny(Denial::AppNotAllowed));
}

#[tokio::test]
async fn missing_forwarded_host_skips_domain_and_country_checks() {
    let verifier = verifier(collaborators());
    let request = from_ip(
        ForwardedRequest {
            forwarded_host: None,
            ..with_session("sess-alice", "unused")
        },
        US_IP,
    );

    assert_eq!(verifier.decide(&request).await, Decision::Allow(alice()));
}

#[tokio::test]
async fn app_lookup_failure_denies_domain() {
    let mut collaborators = collaborators();
    collaborators.apps = Arc::new(MemoryApps::failing());
    let verifier = verifier(collaborators);

    let decision = verifier
        .decide(&with_session("sess-alice", "portal.acme.vondr.ai"))
        .await;
    assert_eq!(decision, Decision::Deny(Denial::AppNotAllowed));
}

#[tokio::test]
async fn country_rules_only_apply_to_the_target_app() {
    let verifier = verifier(collaborators());

    let portal = from_ip(with_session("sess-alice", "portal.acme.vondr.ai"), US_IP);
    assert_eq!(verifier.decide(&portal).await, Decision::Allow(alice()));

    let finance = from_ip(with_session("sess-alice", "finance.acme.vondr.ai"), US_IP);
    assert_eq!(
        verifier.decide(&finance).await,
        Decision::Deny(Denial::CountryBlocked)
    );

    let finance_nl = with_session("sess-alice", "finance.acme.vondr.ai");
    assert_eq!(verifier.decide(&finance_nl).await, Decision::Allow(alice()));
}

#[tokio::test]
async fn country_blocked_responses() {
    let verifier = verifier(collaborators());
    let request = from_ip(with_session("sess-alice", "finance.acme.vondr.ai"), US_IP);

    let response = verifier.verify(&request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        error_body(response).await,
        serde_json::json!({
            "error": "Access from this country is not allowed for this application"
        })
    );

    let response = verifier.verify(&browser(request)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        location(&response),
        "https://auth.vondr.ai/error/403/app_country_blocked"
    );
}

#[tokio::test]
async fn internal_addresses_pass_country_rules() {
    let verifier = verifier(collaborators());

    for ip in ["10.0.0.5", "192.168.1.20", "127.0.0.1", "::1", "fd00::1"] {
        let request = from_ip(with_session("sess-alice", "finance.acme.vondr.ai"), ip);
        assert_eq!(verifier.decide(&request).await, Decision::Allow(alice()), "ip {ip}");
    }
}

#[tokio::test]
async fn unresolvable_client_denies_restricted_app() {
    let verifier = verifier(collaborators());

    for ip in ["", "not-an-ip", UNKNOWN_IP] {
        let request = from_ip(with_session("sess-alice", "finance.acme.vondr.ai"), ip);
        assert_eq!(
            verifier.decide(&request).await,
            Decision::Deny(Denial::CountryBlocked),
            "ip {ip:?}"
        );
    }
}

#[tokio::test]
async fn disabled_geoip_denies_restricted_app_only() {
    let mut collaborators = collaborators();
    collaborators.geoip = Arc::new(StaticGeoIp::disabled());
    let verifier = verifier(collaborators);

    let finance = with_session("sess-alice", "finance.acme.vondr.ai");
    assert_eq!(
        verifier.decide(&finance).await,
        Decision::Deny(Denial::CountryBlocked)
    );

    let portal = with_session("sess-alice", "portal.acme.vondr.ai");
    assert_eq!(verifier.decide(&portal).await, Decision::Allow(alice()));
}

#[tokio::test]
async fn country_rules_failure_denies() {
    let mut collaborators = collaborators();
    collaborators.country_rules = Arc::new(MemoryCountryRules::failing());
    let verifier = verifier(collaborators);

    let decision = verifier
        .decide(&with_session("sess-alice", "portal.acme.vondr.ai"))
        .await;
    assert_eq!(decision, Decision::Deny(Denial::CountryBlocked));
}

#[tokio::test]
async fn unauthenticated_preflight_passes() {
    let verifier = verifier(collaborators());
    let by_method = ForwardedRequest {
        method: "OPTIONS".to_string(),
        ..request("http", "evil.example.com")
    };

    assert_eq!(verifier.decide(&by_method).await, Decision::Preflight);
    assert_eq!(verifier.verify(&by_method).await.status(), StatusCode::OK);

    let by_header = ForwardedRequest {
        has_preflight_header: true,
        ..request("https", "portal.acme.vondr.ai")
    };
    assert_eq!(verifier.decide(&by_header).await, Decision::Preflight);
}

#[tokio::test]
async fn preflight_with_session_is_checked() {
    let verifier = verifier(collaborators());
    let request = ForwardedRequest {
        method: "OPTIONS".to_string(),
        ..with_session("sess-alice", "evil.example.com")
    };

    assert_eq!(
        verifier.decide(&request).await,
        Decision::Deny(Denial::AppNotAllowed)
    );
}

#[tokio::test]
async fn decisions_are_repeatable() {
    let verifier = verifier(collaborators());
    let requests = [
        with_session("sess-alice", "portal.acme.vondr.ai"),
        from_ip(with_session("sess-alice", "finance.acme.vondr.ai"), US_IP),
        with_m2m("tok-portal", Some(HANK), None),
    ];

    for request in &requests {
        let first = verifier.decide(request).await;
        let second = verifier.decide(request).await;
        assert_eq!(first, second);
    }
}

#[tokio::test]
async fn m2m_unknown_token_is_unauthorized() {
    let verifier = verifier(collaborators());
    let request = with_m2m("tok-unknown", Some(ALICE), None);

    let response = verifier.verify(&request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        error_body(response).await,
        serde_json::json!({ "error": MSG_INVALID_TOKEN })
    );
}

#[tokio::test]
async fn m2m_token_wins_over_session_cookie() {
    let verifier = verifier(collaborators());
    let request = ForwardedRequest {
        session_token: Some("sess-alice".to_string()),
        ..with_m2m("tok-unknown", Some(ALICE), None)
    };

    assert_eq!(
        verifier.decide(&request).await,
        Decision::Deny(Denial::UnauthorizedM2m(MSG_INVALID_TOKEN.to_string()))
    );
}

#[tokio::test]
async fn m2m_requires_user_id() {
    let verifier = verifier(collaborators());
    assert_eq!(
        verifier.decide(&with_m2m("tok-portal", None, None)).await,
        Decision::Deny(Denial::UnauthorizedM2m(MSG_USER_ID_REQUIRED.to_string()))
    );
}

#[tokio::test]
async fn m2m_unknown_or_malformed_member() {
    let verifier = verifier(collaborators());

    let unknown = with_m2m("tok-portal", Some(GHOST), None);
    assert_eq!(
        verifier.decide(&unknown).await,
        Decision::Deny(Denial::UnauthorizedM2m(MSG_MEMBER_NOT_FOUND.to_string()))
    );

    let malformed = ForwardedRequest {
        m2m_user_id: Some("not-a-uuid".to_string()),
        ..with_m2m("tok-portal", None, None)
    };
    assert_eq!(
        verifier.decide(&malformed).await,
        Decision::Deny(Denial::UnauthorizedM2m(MSG_MEMBER_NOT_FOUND.to_string()))
    );
}

#[tokio::test]
async fn m2m_member_from_other_organization() {
    let verifier = verifier(collaborators());
    let response = verifier
        .verify(&with_m2m("tok-portal", Some(HANK), None))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        error_body(response).await,
        serde_json::json!({ "error": MSG_MEMBER_NOT_ALLOWED })
    );
}

#[tokio::test]
async fn m2m_without_host_allows_same_organization_member() {
    let verifier = verifier(collaborators());
    let request = from_ip(
        ForwardedRequest {
            forwarded_proto: Some("http".to_string()),
            ..with_m2m("tok-finance", Some(ALICE), None)
        },
        US_IP,
    );

    assert_eq!(verifier.decide(&request).await, Decision::Allow(alice()));
}

#[tokio::test]
async fn m2m_host_must_belong_to_organization() {
    let verifier = verifier(collaborators());

    let allowed = with_m2m("tok-portal", Some(ALICE), Some("portal.acme.vondr.ai"));
    assert_eq!(verifier.decide(&allowed).await, Decision::Allow(alice()));

    let foreign = with_m2m("tok-portal", Some(ALICE), Some("globex.vondr.ai"));
    assert_eq!(
        verifier.decide(&foreign).await,
        Decision::Deny(Denial::UnauthorizedM2m(MSG_DOMAIN_NOT_ALLOWED.to_string()))
    );
}

#[tokio::test]
async fn m2m_app_without_organization() {
    let verifier = verifier(collaborators());
    let request = with_m2m("tok-orphan", Some(DORA), Some("orphan.dissolved.vondr.ai"));

    assert_eq!(
        verifier.decide(&request).await,
        Decision::Deny(Denial::UnauthorizedM2m(MSG_ORGANIZATION_GONE.to_string()))
    );
}

#[tokio::test]
async fn m2m_country_rules_follow_the_token_app() {
    let verifier = verifier(collaborators());

    let blocked = from_ip(
        with_m2m("tok-finance", Some(ALICE), Some("portal.acme.vondr.ai")),
        US_IP,
    );
    let response = verifier.verify(&blocked).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        error_body(response).await,
        serde_json::json!({
            "error": "Access from country 'US' is not allowed for this application."
        })
    );

    let allowed = with_m2m("tok-finance", Some(ALICE), Some("portal.acme.vondr.ai"));
    assert_eq!(verifier.decide(&allowed).await, Decision::Allow(alice()));
}

#[tokio::test]
async fn m2m_denial_redirects_browser_to_login() {
    let verifier = verifier(collaborators());
    let request = browser(with_m2m(
        "tok-portal",
        Some(HANK),
        Some("portal.acme.vondr.ai"),
    ));

    let response = verifier.verify(&request).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response).starts_with("https://auth.vondr.ai/login?auto=1&return_to="));
}

#[tokio::test]
async fn unencodable_identity_is_server_error() {
    let mut collaborators = collaborators();
    let mallory = member(
        Uuid::from_u128(0x99),
        "mallory@acme.test\r\nx-injected: 1",
        ACME,
        MemberRole::System,
    );
    collaborators.sessions = Arc::new(MemorySessionStore::new([session(
        "sess-mallory",
        &mallory,
    )]));
    collaborators.members = Arc::new(MemoryMembers::new([mallory]));
    let verifier = verifier(collaborators);

    let response = verifier
        .verify(&with_session("sess-mallory", "portal.acme.vondr.ai"))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
