use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::services::stripe::StripeServiceError;
use crate::state::AppState;

const MAX_CANCELLATIONS_PER_SWEEP: i64 = 25;
/// After this many failures a record is left in place for an operator and
/// no longer retried.
pub const MAX_CANCELLATION_ATTEMPTS: i32 = 20;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub canceled: usize,
    pub failed: usize,
    pub exhausted: usize,
    pub pruned_locks: usize,
}

pub async fn start_background_workers(state: AppState) {
    let interval = Duration::from_secs(state.config.pending_cancellation_sweep_seconds);
    tokio::spawn(async move {
        loop {
            match sweep_pending_cancellations(&state, OffsetDateTime::now_utc()).await {
                Ok(report) if report.canceled + report.failed > 0 => {
                    info!(
                        canceled = report.canceled,
                        failed = report.failed,
                        exhausted = report.exhausted,
                        pruned_locks = report.pruned_locks,
                        "pending cancellation sweep finished"
                    );
                }
                Ok(_) => {}
                Err(err) => error!(?err, "worker: error sweeping pending cancellations"),
            }
            sleep(interval).await;
        }
    });
}

/// Retries processor cancellations that failed during reconciliation. A
/// successful cancel, or the processor no longer knowing the subscription,
/// resolves the record; anything else reschedules it with backoff until
/// `MAX_CANCELLATION_ATTEMPTS` is reached.
pub async fn sweep_pending_cancellations(
    state: &AppState,
    now: OffsetDateTime,
) -> Result<SweepReport, sqlx::Error> {
    let mut report = SweepReport::default();
    let due = state
        .pending_cancellations
        .list_due(now, MAX_CANCELLATION_ATTEMPTS, MAX_CANCELLATIONS_PER_SWEEP)
        .await?;

    for pending in due {
        let id = pending.external_subscription_id.as_str();
        match state.stripe.cancel_subscription(id).await {
            Ok(()) | Err(StripeServiceError::NotFound(_)) => {
                state.pending_cancellations.resolve(id).await?;
                report.canceled += 1;
                info!(
                    subscription_id = id,
                    user_id = %pending.user_id,
                    attempts = pending.attempts,
                    "pending cancellation resolved"
                );
            }
            Err(err) => {
                let updated = state
                    .pending_cancellations
                    .record_failure(id, pending.user_id, &err.to_string(), now)
                    .await?;
                report.failed += 1;
                if updated.attempts >= MAX_CANCELLATION_ATTEMPTS {
                    report.exhausted += 1;
                    error!(
                        subscription_id = id,
                        user_id = %pending.user_id,
                        attempts = updated.attempts,
                        %err,
                        "pending cancellation retries exhausted; manual cancellation required"
                    );
                    continue;
                }
                warn!(
                    subscription_id = id,
                    attempts = updated.attempts,
                    next_attempt_at = %updated.next_attempt_at,
                    %err,
                    "pending cancellation retry failed"
                );
            }
        }
    }

    report.pruned_locks = state.user_locks.prune_idle();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::MockDb;
    use crate::db::mock_stripe_event_log_repository::MockStripeEventLogRepository;
    use crate::services::stripe::MockStripeService;
    use crate::state::test_support::test_state;
    use std::sync::Arc;
    use uuid::Uuid;

    fn at(ts: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(ts).unwrap()
    }

    fn setup() -> (Arc<MockDb>, Arc<MockStripeService>, AppState) {
        let db = Arc::new(MockDb::default());
        let stripe = Arc::new(MockStripeService::new());
        let state = test_state(
            db.clone(),
            stripe.clone(),
            Arc::new(MockStripeEventLogRepository::default()),
        );
        (db, stripe, state)
    }

    #[tokio::test]
    async fn due_records_are_retried_and_resolved() {
        let (db, stripe, state) = setup();
        let user_id = Uuid::new_v4();
        let t0 = at(1_750_000_000);
        state
            .pending_cancellations
            .record_failure("sub_A", user_id, "timeout", t0)
            .await
            .unwrap();

        // not due yet
        let report = sweep_pending_cancellations(&state, t0).await.unwrap();
        assert_eq!(report.canceled, 0);
        assert!(stripe.cancel_calls().is_empty());

        let report = sweep_pending_cancellations(&state, at(1_750_000_030)).await.unwrap();
        assert_eq!(report.canceled, 1);
        assert_eq!(stripe.cancel_calls(), vec!["sub_A".to_string()]);
        assert!(db.pending_cancellation("sub_A").is_none());
    }

    #[tokio::test]
    async fn failures_back_off_exponentially() {
        let (db, stripe, state) = setup();
        let user_id = Uuid::new_v4();
        let t0 = at(1_750_000_000);
        stripe.fail_cancel("sub_A");
        state
            .pending_cancellations
            .record_failure("sub_A", user_id, "timeout", t0)
            .await
            .unwrap();

        let t1 = at(1_750_000_030);
        let report = sweep_pending_cancellations(&state, t1).await.unwrap();
        assert_eq!(report.failed, 1);
        let pending = db.pending_cancellation("sub_A").unwrap();
        assert_eq!(pending.attempts, 2);
        assert_eq!(pending.next_attempt_at, t1 + time::Duration::seconds(60));
        assert!(pending.last_error.unwrap().contains("failed to cancel"));

        // retried only once the backoff elapses
        sweep_pending_cancellations(&state, t1 + time::Duration::seconds(59))
            .await
            .unwrap();
        assert_eq!(stripe.cancel_calls().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_records_stop_being_retried() {
        let (db, stripe, state) = setup();
        let user_id = Uuid::new_v4();
        let t0 = at(1_750_000_000);
        stripe.fail_cancel("sub_A");
        for _ in 0..MAX_CANCELLATION_ATTEMPTS - 1 {
            state
                .pending_cancellations
                .record_failure("sub_A", user_id, "timeout", t0)
                .await
                .unwrap();
        }

        let report = sweep_pending_cancellations(&state, t0 + time::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.exhausted, 1);
        assert_eq!(
            db.pending_cancellation("sub_A").unwrap().attempts,
            MAX_CANCELLATION_ATTEMPTS
        );

        let report = sweep_pending_cancellations(&state, t0 + time::Duration::days(30))
            .await
            .unwrap();
        assert_eq!(report.failed + report.canceled, 0);
        assert_eq!(stripe.cancel_calls().len(), 1);
        assert!(db.pending_cancellation("sub_A").is_some());
    }

    #[tokio::test]
    async fn not_found_at_processor_resolves_record() {
        let (db, stripe, state) = setup();
        stripe.mark_missing("sub_gone");
        state
            .pending_cancellations
            .record_failure("sub_gone", Uuid::new_v4(), "timeout", at(0))
            .await
            .unwrap();

        let report = sweep_pending_cancellations(&state, at(100)).await.unwrap();
        assert_eq!(report.canceled, 1);
        assert!(db.pending_cancellation("sub_gone").is_none());
    }

    #[tokio::test]
    async fn sweep_prunes_idle_user_locks() {
        let (_db, _stripe, state) = setup();
        drop(state.user_locks.lock(Uuid::new_v4()).await);
        let report = sweep_pending_cancellations(&state, at(0)).await.unwrap();
        assert_eq!(report.pruned_locks, 1);
        assert!(state.user_locks.is_empty());
    }

    #[tokio::test]
    async fn storage_failure_is_returned() {
        let state = test_state(
            Arc::new(MockDb::failing()),
            Arc::new(MockStripeService::new()),
            Arc::new(MockStripeEventLogRepository::default()),
        );
        assert!(sweep_pending_cancellations(&state, at(0)).await.is_err());
    }
}
