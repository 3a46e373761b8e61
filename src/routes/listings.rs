use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

use crate::auth::guard::ANY_ROLE;
use crate::auth::{Session, SessionState};
use crate::error::{AppError, AppResult};
use crate::listings::{Listing, ListingQuery, ListingStatus};
use crate::payments::{PaymentOutcome, PaymentRequest};
use crate::state::AppState;
use crate::users::Role;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/listings", get(browse))
        .route("/listings/events", get(events))
        .route("/listings/{id}", get(detail))
        .route("/listings/{id}/unlock", post(unlock))
}

/// A listing as a viewer sees it. Contact details are present only once unlocked.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingView {
    pub id: String,
    pub title: String,
    pub price: String,
    pub location: String,
    pub property_type: String,
    pub description: String,
    pub images: Vec<String>,
    pub seller_name: String,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
    pub contact_label: &'static str,
    pub unlock_price: u64,
    pub currency: String,
    pub unlocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl ListingView {
    fn new(listing: Listing, unlocked: bool, state: &AppState) -> Self {
        let contact_label = listing.contact_label();
        let (contact, email) = if unlocked {
            (Some(listing.contact), Some(listing.email))
        } else {
            (None, None)
        };
        Self {
            id: listing.id,
            title: listing.title,
            price: listing.price,
            location: listing.location,
            property_type: listing.property_type,
            description: listing.description,
            images: listing.images,
            seller_name: listing.seller_name,
            status: listing.status,
            created_at: listing.created_at,
            contact_label,
            unlock_price: state.config.payments.unlock_amount,
            currency: state.config.payments.currency.clone(),
            unlocked,
            contact,
            email,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockResponse {
    pub status: PaymentOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Owners and admins always see contact details; everyone else must pay.
fn is_unlocked_for(
    state: &AppState,
    listing: &Listing,
    viewer: Option<&Session>,
) -> AppResult<bool> {
    match viewer {
        None => Ok(false),
        Some(v) if v.role == Role::Admin || listing.is_owned_by(&v.user_id) => Ok(true),
        Some(v) => state.ledger.is_unlocked(&v.user_id, &listing.id),
    }
}

/// Unapproved listings are hidden from everyone but their owner and admins.
fn visible_listing(state: &AppState, id: &str, viewer: Option<&Session>) -> AppResult<Listing> {
    let listing = state.listings.get(id)?.ok_or(AppError::NotFound)?;
    let privileged = viewer
        .map(|v| v.role == Role::Admin || listing.is_owned_by(&v.user_id))
        .unwrap_or(false);
    if listing.status == ListingStatus::Approved || privileged {
        Ok(listing)
    } else {
        Err(AppError::NotFound)
    }
}

/// GET /listings?q=&category=: approved listings
pub async fn browse(
    State(state): State<AppState>,
    session_state: SessionState,
    Query(query): Query<ListingQuery>,
) -> AppResult<Json<Vec<ListingView>>> {
    let viewer = session_state.session();
    let mut views = Vec::new();
    for listing in state.listings.search(&query)? {
        let unlocked = is_unlocked_for(&state, &listing, viewer)?;
        views.push(ListingView::new(listing, unlocked, &state));
    }
    Ok(Json(views))
}

/// GET /listings/{id}
pub async fn detail(
    State(state): State<AppState>,
    session_state: SessionState,
    Path(id): Path<String>,
) -> AppResult<Json<ListingView>> {
    let viewer = session_state.session();
    let listing = visible_listing(&state, &id, viewer)?;
    let unlocked = is_unlocked_for(&state, &listing, viewer)?;
    Ok(Json(ListingView::new(listing, unlocked, &state)))
}

/// POST /listings/{id}/unlock: pay to reveal contact details
pub async fn unlock(
    State(state): State<AppState>,
    session_state: SessionState,
    Path(id): Path<String>,
) -> AppResult<Json<UnlockResponse>> {
    let viewer = ANY_ROLE.enforce(&session_state)?;
    let listing = visible_listing(&state, &id, Some(&viewer))?;

    if is_unlocked_for(&state, &listing, Some(&viewer))? {
        return Ok(Json(UnlockResponse {
            status: PaymentOutcome::Unlocked,
            reference: None,
        }));
    }

    let payments = &state.config.payments;
    let request = PaymentRequest::new(
        &listing.id,
        &viewer,
        payments.unlock_amount,
        &payments.currency,
    );
    let status = state
        .ledger
        .request_payment(state.payments.as_ref(), &request)
        .await?;

    Ok(Json(UnlockResponse {
        status,
        reference: Some(request.reference),
    }))
}

/// GET /listings/events: one `listings-changed` event per real change
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = WatchStream::from_changes(state.listings.subscribe()).map(|version| {
        Ok(Event::default()
            .event("listings-changed")
            .data(version.to_string()))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
