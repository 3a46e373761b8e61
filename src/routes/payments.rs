use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::payments::ProviderOutcome;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/payments/callback", post(callback))
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Success,
    Cancelled,
}

#[derive(Deserialize)]
pub struct CallbackRequest {
    pub reference: String,
    pub status: CallbackStatus,
}

#[derive(Serialize)]
pub struct CallbackResponse {
    pub resolved: bool,
}

/// POST /payments/callback: the gateway reports how a payment ended
pub async fn callback(
    State(state): State<AppState>,
    Json(req): Json<CallbackRequest>,
) -> AppResult<Json<CallbackResponse>> {
    let outcome = match req.status {
        CallbackStatus::Success => ProviderOutcome::Completed,
        CallbackStatus::Cancelled => ProviderOutcome::Cancelled,
    };

    let settled = state
        .ledger
        .settle(state.payments.as_ref(), &req.reference, outcome)
        .await?;
    if settled.is_none() {
        return Err(AppError::NotFound);
    }
    tracing::info!("Payment {} resolved as {:?}", req.reference, req.status);
    Ok(Json(CallbackResponse { resolved: true }))
}
