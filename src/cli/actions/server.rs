use crate::gate::{self, ServerConfig};
use anyhow::Result;
use secrecy::SecretString;
use std::{path::PathBuf, time::Duration};
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub keydb_url: SecretString,
    pub auth_login_url: String,
    pub error_login_url: String,
    pub geoip_db_path: Option<PathBuf>,
    pub lookup_timeout: Duration,
    pub cors_origins: Vec<String>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database or KeyDB is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Server args: {:?}", args);

    gate::new(ServerConfig {
        port: args.port,
        dsn: args.dsn,
        keydb_url: args.keydb_url,
        auth_login_url: args.auth_login_url,
        error_login_url: args.error_login_url,
        geoip_db_path: args.geoip_db_path,
        lookup_timeout: args.lookup_timeout,
        cors_origins: args.cors_origins,
    })
    .await
}
