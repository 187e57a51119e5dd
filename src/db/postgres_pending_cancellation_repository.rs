use crate::db::pending_cancellation_repository::PendingCancellationRepository;
use crate::models::pending_cancellation::{retry_backoff, PendingCancellation};
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

pub struct PostgresPendingCancellationRepository {
    pub pool: PgPool,
}

#[async_trait]
impl PendingCancellationRepository for PostgresPendingCancellationRepository {
    async fn record_failure(
        &self,
        external_subscription_id: &str,
        user_id: Uuid,
        error: &str,
        now: OffsetDateTime,
    ) -> Result<PendingCancellation, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let previous_attempts = sqlx::query_scalar::<_, i32>(
            r#"
            SELECT attempts
            FROM pending_subscription_cancellations
            WHERE external_subscription_id = $1
            FOR UPDATE
            "#,
        )
        .bind(external_subscription_id)
        .fetch_optional(&mut *tx)
        .await?
        .unwrap_or(0);

        let attempts = previous_attempts + 1;
        let next_attempt_at = now + retry_backoff(attempts - 1);

        let record = sqlx::query_as::<_, PendingCancellation>(
            r#"
            INSERT INTO pending_subscription_cancellations (
                external_subscription_id,
                user_id,
                attempts,
                last_error,
                next_attempt_at,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (external_subscription_id) DO UPDATE SET
                attempts = EXCLUDED.attempts,
                last_error = EXCLUDED.last_error,
                next_attempt_at = EXCLUDED.next_attempt_at
            RETURNING external_subscription_id,
                      user_id,
                      attempts,
                      last_error,
                      next_attempt_at,
                      created_at
            "#,
        )
        .bind(external_subscription_id)
        .bind(user_id)
        .bind(attempts)
        .bind(error)
        .bind(next_attempt_at)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn is_pending(&self, external_subscription_id: &str) -> Result<bool, sqlx::Error> {
        let exists = sqlx::query_scalar::<_, i32>(
            "SELECT 1 FROM pending_subscription_cancellations WHERE external_subscription_id = $1",
        )
        .bind(external_subscription_id)
        .fetch_optional(&self.pool)
        .await?
        .is_some();

        Ok(exists)
    }

    async fn list_due(
        &self,
        now: OffsetDateTime,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<PendingCancellation>, sqlx::Error> {
        sqlx::query_as::<_, PendingCancellation>(
            r#"
            SELECT external_subscription_id,
                   user_id,
                   attempts,
                   last_error,
                   next_attempt_at,
                   created_at
            FROM pending_subscription_cancellations
            WHERE next_attempt_at <= $1
              AND attempts < $2
            ORDER BY next_attempt_at ASC
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn resolve(&self, external_subscription_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM pending_subscription_cancellations WHERE external_subscription_id = $1",
        )
        .bind(external_subscription_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
