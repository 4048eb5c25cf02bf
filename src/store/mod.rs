//! Collaborator capabilities consulted by the decision engine.
//!
//! Every async lookup has three outcomes: `Ok(Some(_))` found, `Ok(None)` not
//! found, and `Err(LookupError)` for transient or backend failures. The engine
//! denies on both of the latter; retries, if any, belong in the adapters.
//!
//! Adapters:
//! - [`keydb`]: sessions written by the login service.
//! - [`postgres`]: sqlx-backed members, organizations, apps and country rules.
//! - [`geoip`]: `MaxMind` country database reader.
//! - [`memory`]: in-memory doubles for tests.

pub mod geoip;
pub mod keydb;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::{
    collections::{BTreeMap, BTreeSet},
    net::IpAddr,
    time::Duration,
};
use thiserror::Error;
use uuid::Uuid;

use crate::gate::{
    domains,
    model::{App, CountryCode, Member, Organization, Session},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend unavailable: {0}")]
    Backend(String),
    #[error("stored record is invalid: {0}")]
    Corrupt(String),
}

pub type LookupResult<T> = Result<Option<T>, LookupError>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Resolve a live session by its raw token.
    async fn get(&self, token: &str) -> LookupResult<Session>;
}

#[async_trait]
pub trait MemberLookup: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> LookupResult<Member>;
}

#[async_trait]
pub trait OrganizationLookup: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> LookupResult<Organization>;
}

#[async_trait]
pub trait AppLookup: Send + Sync {
    async fn get_by_token(&self, token: &str) -> LookupResult<App>;

    /// Applications owned by the organization, oldest first.
    async fn list_by_organization(&self, organization_id: Uuid) -> Result<Vec<App>, LookupError>;

    async fn allowed_domains(
        &self,
        organization_id: Uuid,
        hostname: Option<&str>,
    ) -> Result<BTreeSet<String>, LookupError> {
        let apps = self.list_by_organization(organization_id).await?;
        Ok(domains::allowed_domains(hostname, &apps))
    }

    async fn domain_app_map(
        &self,
        organization_id: Uuid,
        hostname: Option<&str>,
    ) -> Result<BTreeMap<String, App>, LookupError> {
        let apps = self.list_by_organization(organization_id).await?;
        Ok(domains::domain_app_map(hostname, &apps))
    }
}

#[async_trait]
pub trait CountryRuleLookup: Send + Sync {
    /// Normalized country codes allowed for the app; empty means unrestricted.
    async fn list_codes(&self, app_id: Uuid) -> Result<Vec<CountryCode>, LookupError>;
}

/// Country resolution for client addresses. Local database reads, so synchronous.
pub trait GeoIpLookup: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// ISO country code for `ip`, `Ok(None)` when the database has no answer.
    ///
    /// # Errors
    /// Returns an error when the database is disabled or the lookup fails.
    fn lookup_country(&self, ip: IpAddr) -> LookupResult<String>;
}
