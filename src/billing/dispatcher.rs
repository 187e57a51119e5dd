use time::OffsetDateTime;
use tracing::{info, warn};

use crate::billing::error::WebhookError;
use crate::billing::events::{
    CheckoutSessionObject, EventKind, Expandable, InvoiceObject, ObjectRef, StripeEvent,
    SubscriptionObject,
};
use crate::billing::{ledger, reconciler};
use crate::state::AppState;

/// What a successfully handled event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// State changed.
    Applied,
    /// Understood, nothing to write.
    Acknowledged,
    /// Event type we do not handle.
    Ignored,
}

pub async fn dispatch(
    state: &AppState,
    event: &StripeEvent,
    now: OffsetDateTime,
) -> Result<DispatchOutcome, WebhookError> {
    match event.kind() {
        EventKind::CheckoutSessionCompleted => {
            let session: CheckoutSessionObject = event.object()?;
            info!(
                event_id = %event.id,
                session_id = %session.id,
                customer = session.customer.as_ref().map(Expandable::id),
                subscription = session.subscription.as_ref().map(Expandable::id),
                "checkout session completed"
            );
            Ok(DispatchOutcome::Acknowledged)
        }
        EventKind::SubscriptionCreated | EventKind::SubscriptionUpdated => {
            let sub: SubscriptionObject = event.object()?;
            reconciler::reconcile_subscription(state, &sub, now).await
        }
        EventKind::InvoicePaymentSucceeded => {
            let invoice: InvoiceObject = event.object()?;
            ledger::apply_invoice_payment(state, &invoice, now).await
        }
        EventKind::SubscriptionDeleted => {
            let deleted: ObjectRef = event.object()?;
            delete_subscription(state, &deleted.id).await
        }
        EventKind::Unknown(event_type) => {
            warn!(event_id = %event.id, %event_type, "unhandled stripe event type");
            Ok(DispatchOutcome::Ignored)
        }
    }
}

/// Removes the row and any pending retry for it. Entitlement is left alone.
async fn delete_subscription(
    state: &AppState,
    subscription_id: &str,
) -> Result<DispatchOutcome, WebhookError> {
    let removed = state.subscriptions.delete_subscription(subscription_id).await?;
    let resolved = state.pending_cancellations.resolve(subscription_id).await?;
    info!(subscription_id, removed, resolved, "subscription deleted");
    if removed || resolved {
        Ok(DispatchOutcome::Applied)
    } else {
        Ok(DispatchOutcome::Acknowledged)
    }
}
