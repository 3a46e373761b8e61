use rand::Rng;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::state::DbPool;
use crate::users::{Role, User};

/// The authenticated identity carried by a session. It never holds the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl From<&User> for Session {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

/// Persist a session for `identity`. Returns the session token.
pub fn create_session(pool: &DbPool, identity: &Session, hours: u64) -> AppResult<String> {
    let conn = pool.get()?;

    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();

    conn.execute(
        "INSERT INTO sessions (id, token, user_id, name, email, role, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now', ?7))",
        params![
            id,
            token,
            identity.user_id,
            identity.name,
            identity.email,
            identity.role.as_str(),
            format!("+{} hours", hours)
        ],
    )?;

    tracing::info!("Session created for {} ({})", identity.user_id, identity.role);
    Ok(token)
}

/// Look up a live session by token. Expired or unknown tokens resolve to `None`.
pub fn resolve_session(pool: &DbPool, token: &str) -> AppResult<Option<Session>> {
    let conn = pool.get()?;

    let row: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT user_id, name, email, role FROM sessions
             WHERE token = ?1 AND expires_at > datetime('now')",
            params![token],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    let Some((user_id, name, email, role)) = row else {
        return Ok(None);
    };

    match role.parse::<Role>() {
        Ok(role) => Ok(Some(Session {
            user_id,
            name,
            email,
            role,
        })),
        Err(_) => {
            tracing::warn!("Session for {} has unknown role '{}'", user_id, role);
            Ok(None)
        }
    }
}

/// Delete a session by token.
pub fn delete_session(pool: &DbPool, token: &str) -> AppResult<()> {
    let conn = pool.get()?;
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Drop sessions past their expiry. Returns how many were removed.
pub fn purge_expired(pool: &DbPool) -> AppResult<usize> {
    let conn = pool.get()?;
    let removed = conn.execute(
        "DELETE FROM sessions WHERE expires_at <= datetime('now')",
        [],
    )?;
    Ok(removed)
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
