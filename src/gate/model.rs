//! Records the decision engine reads from its collaborators.

use serde::Deserialize;
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Interactive session created at login and resolved from the `session_token` cookie.
///
/// Stored by the login service as JSON under `session:<token>`; the token
/// itself is the key and is filled in after decoding.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Session {
    #[serde(skip)]
    pub token: String,
    pub member_id: Uuid,
    pub email: String,
    pub organization_id: Uuid,
    #[serde(rename = "microsoft_id", default)]
    pub external_identity_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberRole {
    Admin,
    Member,
    /// Trusted internal identity, skips HTTPS, domain and country checks.
    System,
}

impl MemberRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            "system" => Ok(Self::System),
            other => Err(format!("unknown member role: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub id: Uuid,
    pub email: String,
    pub organization_id: Uuid,
    pub role: MemberRole,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Organization {
    pub id: Uuid,
    pub hostname: Option<String>,
}

impl Organization {
    /// Hostname, treating an empty string the same as an unset one.
    #[must_use]
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref().filter(|hostname| !hostname.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct App {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub subdomain_labels: Vec<String>,
    pub main_label: String,
    pub access_token: String,
    pub is_platform_app: bool,
}

/// Two uppercase ASCII letters, e.g. `NL`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CountryCode(String);

impl CountryCode {
    /// Normalize raw input into a country code.
    ///
    /// # Errors
    /// Returns a message when the input is empty or not exactly two letters.
    pub fn parse(value: &str) -> Result<Self, String> {
        let code = value.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err("country code is required".to_string());
        }
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err("country code must be a two-letter ISO code (e.g., 'NL')".to_string());
        }
        Ok(Self(code))
    }

    /// Case-insensitive comparison against a code reported by GeoIP.
    #[must_use]
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller identity forwarded upstream on an allow decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub organization_id: Uuid,
}

impl From<&Member> for Identity {
    fn from(member: &Member) -> Self {
        Self {
            user_id: member.id,
            email: member.email.clone(),
            organization_id: member.organization_id,
        }
    }
}
