//! KeyDB (Redis protocol) session store.
//!
//! The login service writes each session as JSON under `session:<token>` with
//! a TTL, so expiry is handled by KeyDB and an expired session is simply
//! missing.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use tracing::{info_span, Instrument};

use super::{LookupError, LookupResult, SessionStore};
use crate::gate::model::Session;

const SESSION_KEY_PREFIX: &str = "session:";

#[derive(Clone)]
pub struct KeyDbSessionStore {
    connection: ConnectionManager,
}

impl KeyDbSessionStore {
    /// Connect to KeyDB at `url`, e.g. `redis://:password@keydb:6379/0`.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }
}

fn session_key(token: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{token}")
}

/// Decode a stored session, attaching the token it was stored under.
fn decode_session(token: &str, raw: &str) -> Result<Session, LookupError> {
    let mut session: Session = serde_json::from_str(raw)
        .map_err(|err| LookupError::Corrupt(format!("invalid session payload: {err}")))?;
    session.token = token.to_string();
    Ok(session)
}

#[async_trait]
impl SessionStore for KeyDbSessionStore {
    async fn get(&self, token: &str) -> LookupResult<Session> {
        let mut connection = self.connection.clone();
        let span = info_span!("keydb.get", db.system = "redis", db.operation = "GET");

        let raw: Option<String> = connection
            .get(session_key(token))
            .instrument(span)
            .await
            .map_err(|err| LookupError::Backend(err.to_string()))?;

        raw.map(|raw| decode_session(token, &raw)).transpose()
    }
}
