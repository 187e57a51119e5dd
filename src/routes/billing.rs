use axum::response::{IntoResponse, Response};
use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use crate::billing::checkout::{self, CheckoutError, CheckoutSessionRequest};
use crate::responses::JsonResponse;
use crate::state::AppState;

// POST /api/billing/checkout-session
pub async fn create_checkout_session(
    State(app_state): State<AppState>,
    Json(payload): Json<CheckoutSessionRequest>,
) -> Response {
    match checkout::create_checkout_session(&app_state, &payload).await {
        Ok(session) => Json(session).into_response(),
        Err(CheckoutError::PlanNotFound(plan_id)) => {
            warn!(%plan_id, user_id = %payload.user_id, "checkout requested for unknown plan");
            JsonResponse::not_found("Plan not found").into_response()
        }
        Err(CheckoutError::UserNotFound(user_id)) => {
            warn!(%user_id, "checkout requested for unknown user");
            JsonResponse::not_found("User not found").into_response()
        }
        Err(CheckoutError::Persistence(err)) => {
            error!(?err, user_id = %payload.user_id, "checkout lookup failed");
            JsonResponse::server_error("Internal server error").into_response()
        }
        Err(CheckoutError::Processor(err)) => {
            error!(%err, user_id = %payload.user_id, "failed to create checkout session");
            JsonResponse::bad_gateway("Failed to create checkout session").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PortalSessionPayload {
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
}

// POST /api/billing/portal-session
pub async fn create_portal_session(
    State(app_state): State<AppState>,
    Json(payload): Json<PortalSessionPayload>,
) -> Response {
    let customer_id = match payload
        .customer_id
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        Some(c) => c,
        None => return JsonResponse::bad_request("Missing customer_id").into_response(),
    };

    match checkout::create_portal_session(&app_state, customer_id, payload.return_url.as_deref())
        .await
    {
        Ok(url) => Json(json!({ "url": url })).into_response(),
        Err(err) => {
            error!(%err, customer_id, "failed to create billing portal session");
            JsonResponse::server_error("Failed to create billing portal session").into_response()
        }
    }
}
