pub mod billing;
pub mod stripe;

use axum::{
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::responses::JsonResponse;
use crate::state::AppState;

pub async fn root() -> Response {
    JsonResponse::success("CaseMap billing is running").into_response()
}

pub fn router(state: AppState) -> Router {
    let billing_routes = Router::new()
        .route("/checkout-session", post(billing::create_checkout_session))
        .route("/portal-session", post(billing::create_portal_session));

    Router::new()
        .route("/", get(root))
        .route("/api/stripe/webhook", post(stripe::webhook))
        .nest("/api/billing", billing_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
