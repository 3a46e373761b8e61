use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};

use crate::auth::session;
use crate::auth::SessionState;
use crate::error::AppError;
use crate::state::AppState;

/// Resolves the caller's session from the session cookie.
///
/// Never rejects for a missing or stale cookie; that is `Anonymous`. If the
/// session table cannot be reached the state is `Loading`, so guards answer
/// "try again" rather than bouncing a signed-in user to the login page.
impl FromRequestParts<AppState> for SessionState {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = cookie_value(&parts.headers, &state.config.auth.cookie_name) else {
            return Ok(SessionState::Anonymous);
        };

        match session::resolve_session(&state.db, token) {
            Ok(Some(session)) => Ok(SessionState::Authenticated(session)),
            Ok(None) => Ok(SessionState::Anonymous),
            Err(AppError::Pool(e)) => {
                tracing::warn!("Session store unavailable: {}", e);
                Ok(SessionState::Loading)
            }
            Err(e) => Err(e),
        }
    }
}

pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == name && !val.is_empty() {
                Some(val)
            } else {
                None
            }
        })
}
