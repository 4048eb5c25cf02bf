//! In-memory collaborators for tests and local experiments.
//!
//! Each fake is immutable once built. `failing` variants return a backend
//! error for every call, and `with_latency` delays each call so timeouts can be
//! exercised.

use async_trait::async_trait;
use std::{collections::HashMap, net::IpAddr, time::Duration};
use uuid::Uuid;

use super::{
    AppLookup, CountryRuleLookup, GeoIpLookup, LookupError, LookupResult, MemberLookup,
    OrganizationLookup, SessionStore,
};
use crate::gate::model::{App, CountryCode, Member, Organization, Session};

#[derive(Clone, Debug, Default)]
struct Behavior {
    failure: Option<LookupError>,
    latency: Option<Duration>,
}

impl Behavior {
    async fn gate(&self) -> Result<(), LookupError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

fn unavailable() -> LookupError {
    LookupError::Backend("in-memory store marked as failing".to_string())
}

#[derive(Clone, Debug, Default)]
pub struct MemorySessionStore {
    sessions: HashMap<String, Session>,
    behavior: Behavior,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(sessions: impl IntoIterator<Item = Session>) -> Self {
        Self {
            sessions: sessions
                .into_iter()
                .map(|session| (session.token.clone(), session))
                .collect(),
            behavior: Behavior::default(),
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            behavior: Behavior {
                failure: Some(unavailable()),
                latency: None,
            },
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.behavior.latency = Some(latency);
        self
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, token: &str) -> LookupResult<Session> {
        self.behavior.gate().await?;
        Ok(self.sessions.get(token).cloned())
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryMembers {
    members: HashMap<Uuid, Member>,
    behavior: Behavior,
}

impl MemoryMembers {
    #[must_use]
    pub fn new(members: impl IntoIterator<Item = Member>) -> Self {
        Self {
            members: members
                .into_iter()
                .map(|member| (member.id, member))
                .collect(),
            behavior: Behavior::default(),
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            behavior: Behavior {
                failure: Some(unavailable()),
                latency: None,
            },
            ..Self::default()
        }
    }
}

#[async_trait]
impl MemberLookup for MemoryMembers {
    async fn get_by_id(&self, id: Uuid) -> LookupResult<Member> {
        self.behavior.gate().await?;
        Ok(self.members.get(&id).cloned())
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryOrganizations {
    organizations: HashMap<Uuid, Organization>,
    behavior: Behavior,
}

impl MemoryOrganizations {
    #[must_use]
    pub fn new(organizations: impl IntoIterator<Item = Organization>) -> Self {
        Self {
            organizations: organizations
                .into_iter()
                .map(|organization| (organization.id, organization))
                .collect(),
            behavior: Behavior::default(),
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            behavior: Behavior {
                failure: Some(unavailable()),
                latency: None,
            },
            ..Self::default()
        }
    }
}

#[async_trait]
impl OrganizationLookup for MemoryOrganizations {
    async fn get_by_id(&self, id: Uuid) -> LookupResult<Organization> {
        self.behavior.gate().await?;
        Ok(self.organizations.get(&id).cloned())
    }
}

/// Apps kept in insertion order, which stands in for creation order.
#[derive(Clone, Debug, Default)]
pub struct MemoryApps {
    apps: Vec<App>,
    behavior: Behavior,
}

impl MemoryApps {
    #[must_use]
    pub fn new(apps: impl IntoIterator<Item = App>) -> Self {
        Self {
            apps: apps.into_iter().collect(),
            behavior: Behavior::default(),
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            behavior: Behavior {
                failure: Some(unavailable()),
                latency: None,
            },
            ..Self::default()
        }
    }
}

#[async_trait]
impl AppLookup for MemoryApps {
    async fn get_by_token(&self, token: &str) -> LookupResult<App> {
        self.behavior.gate().await?;
        Ok(self
            .apps
            .iter()
            .find(|app| app.access_token == token)
            .cloned())
    }

    async fn list_by_organization(&self, organization_id: Uuid) -> Result<Vec<App>, LookupError> {
        self.behavior.gate().await?;
        Ok(self
            .apps
            .iter()
            .filter(|app| app.organization_id == organization_id)
            .cloned()
            .collect())
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryCountryRules {
    rules: HashMap<Uuid, Vec<CountryCode>>,
    behavior: Behavior,
}

impl MemoryCountryRules {
    /// Build from raw codes; invalid codes are dropped the way storage would reject them.
    #[must_use]
    pub fn new<'a>(rules: impl IntoIterator<Item = (Uuid, &'a [&'a str])>) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|(app_id, codes)| {
                    let codes = codes
                        .iter()
                        .filter_map(|code| CountryCode::parse(code).ok())
                        .collect();
                    (app_id, codes)
                })
                .collect(),
            behavior: Behavior::default(),
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            behavior: Behavior {
                failure: Some(unavailable()),
                latency: None,
            },
            ..Self::default()
        }
    }
}

#[async_trait]
impl CountryRuleLookup for MemoryCountryRules {
    async fn list_codes(&self, app_id: Uuid) -> Result<Vec<CountryCode>, LookupError> {
        self.behavior.gate().await?;
        Ok(self.rules.get(&app_id).cloned().unwrap_or_default())
    }
}

/// Fixed IP to country table.
#[derive(Clone, Debug)]
pub struct StaticGeoIp {
    enabled: bool,
    failing: bool,
    countries: HashMap<IpAddr, String>,
}

impl StaticGeoIp {
    /// Enabled table; entries whose IP does not parse are skipped.
    #[must_use]
    pub fn new<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            enabled: true,
            failing: false,
            countries: entries
                .into_iter()
                .filter_map(|(ip, country)| Some((ip.parse().ok()?, country.to_string())))
                .collect(),
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            failing: false,
            countries: HashMap::new(),
        }
    }

    /// Enabled, but every lookup errors.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            enabled: true,
            failing: true,
            countries: HashMap::new(),
        }
    }
}

impl GeoIpLookup for StaticGeoIp {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn lookup_country(&self, ip: IpAddr) -> LookupResult<String> {
        if !self.enabled {
            return Err(LookupError::Backend("geoip not configured".to_string()));
        }
        if self.failing {
            return Err(LookupError::Backend(format!("no geoip answer for {ip}")));
        }
        Ok(self.countries.get(&ip).cloned())
    }
}
