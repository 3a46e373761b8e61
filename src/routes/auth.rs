use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::{session, Session, SessionState};
use crate::error::{AppError, AppResult};
use crate::extractors::cookie_value;
use crate::state::AppState;
use crate::users::{NewUser, Role};
use crate::validation::FieldErrors;

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/session", get(current_session))
}

// -- Request/Response types --

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub confirm_password: String,
    pub role: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Returned by every login surface: who is signed in and where they land.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedIn {
    pub session: Session,
    pub redirect: &'static str,
}

#[derive(Serialize)]
pub struct SessionInfo {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

// -- Cookie helpers --

pub(crate) fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    let max_age_secs = max_age_hours * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", name)
}

/// Persist `identity` as a session and answer with its cookie.
pub(crate) fn sign_in(
    state: &AppState,
    identity: Session,
    status: StatusCode,
) -> AppResult<Response> {
    let auth = &state.config.auth;
    let token = session::create_session(&state.db, &identity, auth.session_hours)?;
    let redirect = identity.role.home_path();

    Ok((
        status,
        [(
            header::SET_COOKIE,
            session_cookie(&auth.cookie_name, &token, auth.session_hours),
        )],
        Json(SignedIn {
            session: identity,
            redirect,
        }),
    )
        .into_response())
}

// -- Handlers --

/// POST /auth/signup: register a buyer or seller and sign them in
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> AppResult<Response> {
    let mut errors = FieldErrors::default();
    errors.require("name", &req.name, "Name is required");
    errors.require("email", &req.email, "Email is required");
    errors.require("phone", &req.phone, "Phone is required");
    if req.password.is_empty() {
        errors.add("password", "Password is required");
    } else if req.password.chars().count() < MIN_PASSWORD_LEN {
        errors.add("password", "Password must be at least 6 characters");
    }
    if req.password != req.confirm_password {
        errors.add("confirmPassword", "Passwords do not match");
    }

    let role = match req.role.as_deref().map(str::trim) {
        None | Some("") => Role::Buyer,
        Some(raw) => match raw.parse::<Role>() {
            Ok(role @ (Role::Buyer | Role::Seller)) => role,
            _ => {
                errors.add("role", "Choose either buyer or seller");
                Role::Buyer
            }
        },
    };
    if !req.email.trim().is_empty() && state.users.get_user_by_email(&req.email)?.is_some() {
        errors.add("email", "An account with this email already exists");
    }
    errors.into_result()?;

    let user = state.users.save_user(NewUser {
        name: req.name.trim().to_string(),
        email: req.email,
        password: req.password,
        role,
    })?;

    sign_in(&state, Session::from(&user), StatusCode::CREATED)
}

/// POST /auth/login: email + password
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Response> {
    let mut errors = FieldErrors::default();
    errors.require("email", &req.email, "Email is required");
    errors.require("password", &req.password, "Password is required");
    errors.into_result()?;

    let Some(user) = state.users.verify_user(&req.email, &req.password)? else {
        tracing::warn!("Failed login for {}", req.email.trim());
        return Err(AppError::InvalidCredentials);
    };

    sign_in(&state, Session::from(&user), StatusCode::OK)
}

/// POST /auth/logout: delete session and redirect
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let cookie_name = &state.config.auth.cookie_name;

    if let Some(token) = cookie_value(&headers, cookie_name) {
        if let Err(e) = session::delete_session(&state.db, token) {
            tracing::warn!("Failed to delete session on logout: {}", e);
        }
    }

    Ok((
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, "/".to_string()),
            (header::SET_COOKIE, clear_session_cookie(cookie_name)),
        ],
        "",
    )
        .into_response())
}

/// GET /auth/session: the caller's identity, if any
pub async fn current_session(session_state: SessionState) -> AppResult<Json<SessionInfo>> {
    match session_state {
        SessionState::Loading => Err(AppError::Loading),
        SessionState::Anonymous => Ok(Json(SessionInfo {
            authenticated: false,
            session: None,
        })),
        SessionState::Authenticated(session) => Ok(Json(SessionInfo {
            authenticated: true,
            session: Some(session),
        })),
    }
}
