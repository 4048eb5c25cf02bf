//! PostgreSQL adapters for members, organizations, apps and country rules.
//!
//! Schema lives in `sql/schema.sql`.

use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info_span, Instrument, Span};
use uuid::Uuid;

use super::{
    AppLookup, CountryRuleLookup, LookupError, LookupResult, MemberLookup, OrganizationLookup,
};
use crate::gate::model::{App, CountryCode, Member, MemberRole, Organization};

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn query_span(statement: &'static str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = statement
    )
}

fn backend(err: sqlx::Error) -> LookupError {
    LookupError::Backend(err.to_string())
}

fn member_from_row(row: &PgRow) -> Result<Member, LookupError> {
    let role: String = row.try_get("role").map_err(backend)?;
    let role = role.parse::<MemberRole>().map_err(LookupError::Corrupt)?;
    Ok(Member {
        id: row.try_get("id").map_err(backend)?,
        email: row.try_get("email").map_err(backend)?,
        organization_id: row.try_get("organization_id").map_err(backend)?,
        role,
    })
}

fn app_from_row(row: &PgRow) -> Result<App, LookupError> {
    Ok(App {
        id: row.try_get("id").map_err(backend)?,
        organization_id: row.try_get("organization_id").map_err(backend)?,
        subdomain_labels: row.try_get("subdomain_labels").map_err(backend)?,
        main_label: row.try_get("main_label").map_err(backend)?,
        access_token: row.try_get("access_token").map_err(backend)?,
        is_platform_app: row.try_get("is_platform_app").map_err(backend)?,
    })
}

#[async_trait]
impl MemberLookup for PgStore {
    async fn get_by_id(&self, id: Uuid) -> LookupResult<Member> {
        const QUERY: &str =
            "SELECT id, email, organization_id, role FROM members WHERE id = $1";
        let row = sqlx::query(QUERY)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span(QUERY))
            .await
            .map_err(backend)?;

        row.as_ref().map(member_from_row).transpose()
    }
}

#[async_trait]
impl OrganizationLookup for PgStore {
    async fn get_by_id(&self, id: Uuid) -> LookupResult<Organization> {
        const QUERY: &str = "SELECT id, hostname FROM organizations WHERE id = $1";
        let row = sqlx::query(QUERY)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span(QUERY))
            .await
            .map_err(backend)?;

        row.map(|row| -> Result<Organization, LookupError> {
            Ok(Organization {
                id: row.try_get("id").map_err(backend)?,
                hostname: row.try_get("hostname").map_err(backend)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl AppLookup for PgStore {
    async fn get_by_token(&self, token: &str) -> LookupResult<App> {
        const QUERY: &str = "SELECT id, organization_id, subdomain_labels, main_label, \
             access_token, is_platform_app FROM apps WHERE access_token = $1";
        let row = sqlx::query(QUERY)
            .bind(token)
            .fetch_optional(&self.pool)
            .instrument(query_span(QUERY))
            .await
            .map_err(backend)?;

        row.as_ref().map(app_from_row).transpose()
    }

    async fn list_by_organization(&self, organization_id: Uuid) -> Result<Vec<App>, LookupError> {
        // Creation order fixes which app owns a colliding domain.
        const QUERY: &str = "SELECT id, organization_id, subdomain_labels, main_label, \
             access_token, is_platform_app FROM apps WHERE organization_id = $1 \
             ORDER BY created_at ASC, id ASC";
        let rows = sqlx::query(QUERY)
            .bind(organization_id)
            .fetch_all(&self.pool)
            .instrument(query_span(QUERY))
            .await
            .map_err(backend)?;

        rows.iter().map(app_from_row).collect()
    }
}

#[async_trait]
impl CountryRuleLookup for PgStore {
    async fn list_codes(&self, app_id: Uuid) -> Result<Vec<CountryCode>, LookupError> {
        const QUERY: &str = "SELECT country_code FROM app_allowed_countries \
             WHERE app_id = $1 ORDER BY country_code";
        let rows = sqlx::query(QUERY)
            .bind(app_id)
            .fetch_all(&self.pool)
            .instrument(query_span(QUERY))
            .await
            .map_err(backend)?;

        rows.iter()
            .map(|row| -> Result<CountryCode, LookupError> {
                let code: String = row.try_get("country_code").map_err(backend)?;
                CountryCode::parse(&code).map_err(LookupError::Corrupt)
            })
            .collect()
    }
}
