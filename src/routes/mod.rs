pub mod admin;
pub mod auth;
pub mod listings;
pub mod payments;
pub mod seller;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// The full HTTP surface for one execution context.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(auth::router())
        .merge(admin::router())
        .merge(seller::router())
        .merge(listings::router())
        .merge(payments::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
