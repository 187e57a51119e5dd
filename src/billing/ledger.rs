use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::billing::dispatcher::DispatchOutcome;
use crate::billing::error::WebhookError;
use crate::billing::events::{timestamp, InvoiceObject};
use crate::db::subscription_repository::SubscriptionRepository;
use crate::models::subscription::{
    CancelAtWrite, Subscription, SubscriptionStatus, SubscriptionUpsert,
};
use crate::state::AppState;

/// Idempotent write keyed by `external_subscription_id`: applying the same
/// row twice leaves the store as applying it once.
pub async fn write_subscription(
    subscriptions: &dyn SubscriptionRepository,
    row: &SubscriptionUpsert,
) -> Result<Subscription, WebhookError> {
    let stored = subscriptions.upsert_subscription(row).await?;
    info!(
        subscription_id = %stored.external_subscription_id,
        user_id = %stored.user_id,
        status = %stored.status,
        "subscription row written"
    );
    Ok(stored)
}

pub(crate) fn parse_user_id(raw: &str, object: &str) -> Result<Uuid, WebhookError> {
    Uuid::parse_str(raw).map_err(|_| {
        WebhookError::InvalidPayload(format!("{object}: metadata user_id `{raw}` is not a uuid"))
    })
}

/// Records a paid invoice against its subscription row. An invoice for a
/// subscription that has no row, or only a canceled one, is not recorded
/// while the user holds a different live subscription.
pub async fn apply_invoice_payment(
    state: &AppState,
    invoice: &InvoiceObject,
    now: OffsetDateTime,
) -> Result<DispatchOutcome, WebhookError> {
    let Some(subscription_id) = invoice.subscription_id() else {
        info!(invoice_id = %invoice.id, "invoice has no subscription reference; nothing to record");
        return Ok(DispatchOutcome::Acknowledged);
    };

    let user_id = invoice
        .metadata("user_id")
        .ok_or_else(|| WebhookError::MissingMetadata {
            object: invoice.id.clone(),
            field: "user_id",
        })?;
    let plan_id = invoice
        .metadata("plan_id")
        .ok_or_else(|| WebhookError::MissingMetadata {
            object: invoice.id.clone(),
            field: "plan_id",
        })?;
    let user_id = parse_user_id(user_id, &invoice.id)?;

    let customer_id = invoice
        .customer
        .as_ref()
        .map(|c| c.id().to_string())
        .ok_or_else(|| WebhookError::InvalidPayload(format!("{}: missing customer", invoice.id)))?;
    let period_end = invoice.period_end().ok_or_else(|| {
        WebhookError::InvalidPayload(format!("{}: missing billing period end", invoice.id))
    })?;

    let row = SubscriptionUpsert {
        external_subscription_id: subscription_id.to_string(),
        user_id,
        plan_id: plan_id.to_string(),
        external_customer_id: customer_id,
        status: SubscriptionStatus::Active,
        current_period_end: timestamp(period_end)?,
        cancel_at: CancelAtWrite::Keep,
        updated_at: now,
    };

    let _guard = state.user_locks.lock(user_id).await;

    if state
        .pending_cancellations
        .is_pending(subscription_id)
        .await?
    {
        warn!(
            invoice_id = %invoice.id,
            %subscription_id,
            "invoice for a subscription awaiting cancellation; not recorded"
        );
        return Ok(DispatchOutcome::Acknowledged);
    }

    let rows = state
        .subscriptions
        .list_subscriptions_for_user(user_id)
        .await?;
    let has_open_row = rows
        .iter()
        .find(|s| s.external_subscription_id == subscription_id)
        .is_some_and(|s| s.status != SubscriptionStatus::Canceled);
    if !has_open_row {
        if let Some(current) = rows
            .iter()
            .find(|s| s.external_subscription_id != subscription_id && s.is_live())
        {
            warn!(
                invoice_id = %invoice.id,
                %subscription_id,
                %user_id,
                current = %current.external_subscription_id,
                "invoice for a superseded subscription; not recorded"
            );
            return Ok(DispatchOutcome::Acknowledged);
        }
    }

    write_subscription(state.subscriptions.as_ref(), &row).await?;
    Ok(DispatchOutcome::Applied)
}
