use axum::Json;
use axum::{extract::State, http::HeaderMap, response::IntoResponse};
use axum::response::Response;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::billing::events::StripeEvent;
use crate::billing::{dispatch, DispatchOutcome, WebhookError};
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

// POST /api/stripe/webhook
pub async fn webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    match handle_webhook(&app_state, &headers, &body, OffsetDateTime::now_utc()).await {
        Ok(()) => Json(json!({ "received": true })).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Verify, de-duplicate, dispatch, then record the event id. Nothing past
/// verification runs for an unauthenticated body.
pub async fn handle_webhook(
    app_state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    now: OffsetDateTime,
) -> Result<(), WebhookError> {
    let sig = match headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok()) {
        Some(s) => s,
        None => {
            warn!("stripe webhook missing signature header");
            return Err(WebhookError::InvalidSignature);
        }
    };

    if let Err(err) = app_state.verifier.verify(body, sig, now) {
        warn!(%err, "stripe webhook verification failed");
        return Err(err);
    }

    let event = StripeEvent::parse(body)?;
    let evt_type = event.event_type.as_str();

    if app_state.event_log.has_processed_event(&event.id).await? {
        info!(event_id = %event.id, evt_type, "duplicate stripe event acknowledged");
        return Ok(());
    }

    let outcome = match dispatch(app_state, &event, now).await {
        Ok(outcome) => outcome,
        Err(err) => {
            match &err {
                WebhookError::Persistence(_) => error!(
                    event_id = %event.id,
                    evt_type,
                    %err,
                    "stripe event failed; will be retried"
                ),
                _ => warn!(event_id = %event.id, evt_type, %err, "stripe event rejected"),
            }
            return Err(err);
        }
    };

    if outcome == DispatchOutcome::Applied {
        if let Err(err) = app_state.event_log.record_event(&event.id, evt_type).await {
            error!(?err, event_id = %event.id, "failed to record processed stripe event");
        }
    }
    info!(event_id = %event.id, evt_type, ?outcome, "stripe event handled");
    Ok(())
}
