use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::pending_cancellation::PendingCancellation;

#[async_trait]
pub trait PendingCancellationRepository: Send + Sync {
    /// Records one more failed cancel attempt, inserting the record on the
    /// first failure, and schedules the next attempt from `now`.
    async fn record_failure(
        &self,
        external_subscription_id: &str,
        user_id: Uuid,
        error: &str,
        now: OffsetDateTime,
    ) -> Result<PendingCancellation, sqlx::Error>;

    async fn is_pending(&self, external_subscription_id: &str) -> Result<bool, sqlx::Error>;

    /// Records due at `now` that have failed fewer than `max_attempts` times.
    async fn list_due(
        &self,
        now: OffsetDateTime,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<PendingCancellation>, sqlx::Error>;

    /// Returns `false` when nothing was pending for the id.
    async fn resolve(&self, external_subscription_id: &str) -> Result<bool, sqlx::Error>;
}
