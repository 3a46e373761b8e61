use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::admin_portal;
use crate::auth::guard::ADMIN_PORTAL;
use crate::auth::SessionState;
use crate::error::AppResult;
use crate::listings::{Listing, ListingStats, ListingStatus};
use crate::routes::auth::sign_in;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin-portal/login", post(login))
        .route("/admin-portal/listings", get(listings))
        .route("/admin-portal/listings/{id}/approve", post(approve))
        .route("/admin-portal/listings/{id}/reject", post(reject))
        .route("/admin-portal/stats", get(stats))
        .route("/admin-portal/refresh", post(refresh))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AdminLoginRequest {
    pub email: String,
    pub access_key: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct StatusFilter {
    /// Omitted means every listing.
    pub status: Option<ListingStatus>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    #[serde(flatten)]
    pub listings: ListingStats,
    pub active_users: usize,
}

/// POST /admin-portal/login: access key + allow-listed email
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<AdminLoginRequest>,
) -> AppResult<Response> {
    let identity = admin_portal::authenticate(
        &state.config.admin,
        &state.users,
        &req.email,
        &req.access_key,
    )?;
    tracing::info!("Admin portal login for {}", identity.email);
    sign_in(&state, identity, StatusCode::OK)
}

/// GET /admin-portal/listings?status=pending|approved|rejected
pub async fn listings(
    State(state): State<AppState>,
    session_state: SessionState,
    Query(filter): Query<StatusFilter>,
) -> AppResult<Json<Vec<Listing>>> {
    ADMIN_PORTAL.enforce(&session_state)?;
    let listings = match filter.status {
        Some(status) => state.listings.with_status(status)?,
        None => state.listings.all()?,
    };
    Ok(Json(listings))
}

/// POST /admin-portal/listings/{id}/approve
pub async fn approve(
    State(state): State<AppState>,
    session_state: SessionState,
    Path(id): Path<String>,
) -> AppResult<Json<Listing>> {
    decide(&state, &session_state, &id, ListingStatus::Approved)
}

/// POST /admin-portal/listings/{id}/reject
pub async fn reject(
    State(state): State<AppState>,
    session_state: SessionState,
    Path(id): Path<String>,
) -> AppResult<Json<Listing>> {
    decide(&state, &session_state, &id, ListingStatus::Rejected)
}

fn decide(
    state: &AppState,
    session_state: &SessionState,
    id: &str,
    status: ListingStatus,
) -> AppResult<Json<Listing>> {
    let admin = ADMIN_PORTAL.enforce(session_state)?;
    let listing = state.listings.update_status(id, status)?;
    tracing::info!("{} set listing {} to {}", admin.email, listing.id, status);
    Ok(Json(listing))
}

/// GET /admin-portal/stats
pub async fn stats(
    State(state): State<AppState>,
    session_state: SessionState,
) -> AppResult<Json<DashboardStats>> {
    ADMIN_PORTAL.enforce(&session_state)?;
    Ok(Json(DashboardStats {
        listings: state.listings.stats()?,
        active_users: state.users.active_user_count()?,
    }))
}

/// POST /admin-portal/refresh: re-read every collection from storage
pub async fn refresh(
    State(state): State<AppState>,
    session_state: SessionState,
) -> AppResult<Json<DashboardStats>> {
    ADMIN_PORTAL.enforce(&session_state)?;
    state.listings.reload()?;
    state.users.reload()?;
    state.ledger.reload()?;
    Ok(Json(DashboardStats {
        listings: state.listings.stats()?,
        active_users: state.users.active_user_count()?,
    }))
}
