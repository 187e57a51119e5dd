//! Applies subscription created/updated events while keeping at most one
//! live subscription row per user.
//!
//! A live row has no scheduled cancellation and a status other than
//! `canceled`. When a live subscription arrives, every other row the user
//! holds is canceled at the processor and removed locally before the
//! incoming row is written. Deliveries may arrive in any order, so the set of
//! "other" rows is re-read on every call, under the user's lock.
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::billing::dispatcher::DispatchOutcome;
use crate::billing::entitlement::set_entitlement;
use crate::billing::error::WebhookError;
use crate::billing::events::{timestamp, SubscriptionObject};
use crate::billing::ledger::{parse_user_id, write_subscription};
use crate::models::subscription::{
    CancelAtWrite, Subscription, SubscriptionStatus, SubscriptionUpsert,
};
use crate::services::stripe::StripeServiceError;
use crate::state::AppState;

pub async fn reconcile_subscription(
    state: &AppState,
    sub: &SubscriptionObject,
    now: OffsetDateTime,
) -> Result<DispatchOutcome, WebhookError> {
    if let Some(cancel_at) = sub.cancel_at {
        return mark_cancel_scheduled(state, sub, timestamp(cancel_at)?, now).await;
    }

    let user_id = sub
        .metadata("user_id")
        .ok_or_else(|| WebhookError::MissingMetadata {
            object: sub.id.clone(),
            field: "user_id",
        })?;
    let plan_id = sub
        .metadata("plan_id")
        .ok_or_else(|| WebhookError::MissingMetadata {
            object: sub.id.clone(),
            field: "plan_id",
        })?;
    let user_id = parse_user_id(user_id, &sub.id)?;
    let status = sub
        .status
        .parse::<SubscriptionStatus>()
        .map_err(|e| WebhookError::InvalidPayload(format!("{}: {e}", sub.id)))?;
    let period_end = sub.period_end().ok_or_else(|| {
        WebhookError::InvalidPayload(format!("{}: missing current_period_end", sub.id))
    })?;

    let row = SubscriptionUpsert {
        external_subscription_id: sub.id.clone(),
        user_id,
        plan_id: plan_id.to_string(),
        external_customer_id: sub.customer.id().to_string(),
        status,
        current_period_end: timestamp(period_end)?,
        cancel_at: CancelAtWrite::Clear,
        updated_at: now,
    };

    let _guard = state.user_locks.lock(user_id).await;

    if state.pending_cancellations.is_pending(&sub.id).await? {
        if status == SubscriptionStatus::Canceled {
            state.pending_cancellations.resolve(&sub.id).await?;
            info!(subscription_id = %sub.id, %user_id, "processor confirmed pending cancellation");
            return Ok(DispatchOutcome::Applied);
        }
        info!(
            subscription_id = %sub.id,
            %user_id,
            %status,
            "subscription is being retired; update not applied"
        );
        return Ok(DispatchOutcome::Acknowledged);
    }

    if status != SubscriptionStatus::Canceled {
        retire_other_subscriptions(state, &row, now).await?;
    }

    let stored = write_subscription(state.subscriptions.as_ref(), &row).await?;

    if stored.status == SubscriptionStatus::Active {
        set_entitlement(
            state.users.as_ref(),
            user_id,
            true,
            sub.metadata("assistant_id"),
        )
        .await?;
    }

    Ok(DispatchOutcome::Applied)
}

/// A cancellation-scheduling update only marks the row. Nothing else moves.
async fn mark_cancel_scheduled(
    state: &AppState,
    sub: &SubscriptionObject,
    cancel_at: OffsetDateTime,
    now: OffsetDateTime,
) -> Result<DispatchOutcome, WebhookError> {
    let matched = state
        .subscriptions
        .set_cancel_at(&sub.id, cancel_at, now)
        .await?;
    if !matched {
        warn!(subscription_id = %sub.id, "cancellation scheduled for unknown subscription");
        return Ok(DispatchOutcome::Acknowledged);
    }
    info!(subscription_id = %sub.id, %cancel_at, "subscription cancellation scheduled");
    Ok(DispatchOutcome::Applied)
}

async fn retire_other_subscriptions(
    state: &AppState,
    incoming: &SubscriptionUpsert,
    now: OffsetDateTime,
) -> Result<(), WebhookError> {
    let others: Vec<Subscription> = state
        .subscriptions
        .list_subscriptions_for_user(incoming.user_id)
        .await?
        .into_iter()
        .filter(|s| s.external_subscription_id != incoming.external_subscription_id)
        .collect();

    if others.is_empty() {
        return Ok(());
    }

    for other in &others {
        if other.status == SubscriptionStatus::Canceled {
            continue;
        }
        let other_id = other.external_subscription_id.as_str();
        match state.stripe.cancel_subscription(other_id).await {
            Ok(()) => info!(
                subscription_id = other_id,
                replaced_by = %incoming.external_subscription_id,
                "canceled superseded subscription at processor"
            ),
            Err(StripeServiceError::NotFound(_)) => info!(
                subscription_id = other_id,
                "superseded subscription already gone at processor"
            ),
            Err(err) => {
                warn!(
                    subscription_id = other_id,
                    user_id = %incoming.user_id,
                    %err,
                    "failed to cancel superseded subscription; queued for retry"
                );
                state
                    .pending_cancellations
                    .record_failure(other_id, incoming.user_id, &err.to_string(), now)
                    .await?;
            }
        }
    }

    let ids: Vec<String> = others
        .into_iter()
        .map(|s| s.external_subscription_id)
        .collect();
    let removed = state.subscriptions.delete_subscriptions(&ids).await?;
    info!(
        user_id = %incoming.user_id,
        removed,
        replaced_by = %incoming.external_subscription_id,
        "removed superseded subscription rows"
    );
    Ok(())
}
