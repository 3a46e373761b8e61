use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};

use crate::auth::guard::SELLER_ONLY;
use crate::auth::SessionState;
use crate::error::AppResult;
use crate::listings::{Listing, NewListing};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/seller/listings", get(mine).post(submit))
        .route("/seller/listings/pending", get(pending))
}

/// POST /seller/listings: submit a listing for moderation
pub async fn submit(
    State(state): State<AppState>,
    session_state: SessionState,
    Json(data): Json<NewListing>,
) -> AppResult<(StatusCode, Json<Listing>)> {
    let seller = SELLER_ONLY.enforce(&session_state)?;
    let listing = state.listings.add_listing(data, &seller)?;
    Ok((StatusCode::CREATED, Json(listing)))
}

/// GET /seller/listings
pub async fn mine(
    State(state): State<AppState>,
    session_state: SessionState,
) -> AppResult<Json<Vec<Listing>>> {
    let seller = SELLER_ONLY.enforce(&session_state)?;
    Ok(Json(state.listings.owned_by(&seller.user_id)?))
}

/// GET /seller/listings/pending
pub async fn pending(
    State(state): State<AppState>,
    session_state: SessionState,
) -> AppResult<Json<Vec<Listing>>> {
    let seller = SELLER_ONLY.enforce(&session_state)?;
    Ok(Json(state.listings.pending_owned_by(&seller.user_id)?))
}
