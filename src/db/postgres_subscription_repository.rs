use crate::db::subscription_repository::SubscriptionRepository;
use crate::models::subscription::{CancelAtWrite, Subscription, SubscriptionUpsert};
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

pub struct PostgresSubscriptionRepository {
    pub pool: PgPool,
}

const SUBSCRIPTION_COLUMNS: &str = r#"
    external_subscription_id,
    user_id,
    plan_id,
    external_customer_id,
    status,
    current_period_end,
    cancel_at,
    updated_at
"#;

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn list_subscriptions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 ORDER BY updated_at DESC",
            SUBSCRIPTION_COLUMNS
        );
        sqlx::query_as::<_, Subscription>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
    }

    async fn upsert_subscription(
        &self,
        row: &SubscriptionUpsert,
    ) -> Result<Subscription, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO subscriptions (
                external_subscription_id,
                user_id,
                plan_id,
                external_customer_id,
                status,
                current_period_end,
                cancel_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NULL, $7)
            ON CONFLICT (external_subscription_id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                plan_id = EXCLUDED.plan_id,
                external_customer_id = EXCLUDED.external_customer_id,
                status = EXCLUDED.status,
                current_period_end = EXCLUDED.current_period_end,
                cancel_at = CASE WHEN $8 THEN NULL ELSE subscriptions.cancel_at END,
                updated_at = EXCLUDED.updated_at
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        );
        sqlx::query_as::<_, Subscription>(&sql)
            .bind(&row.external_subscription_id)
            .bind(row.user_id)
            .bind(&row.plan_id)
            .bind(&row.external_customer_id)
            .bind(row.status)
            .bind(row.current_period_end)
            .bind(row.updated_at)
            .bind(row.cancel_at == CancelAtWrite::Clear)
            .fetch_one(&self.pool)
            .await
    }

    async fn set_cancel_at(
        &self,
        external_subscription_id: &str,
        cancel_at: OffsetDateTime,
        updated_at: OffsetDateTime,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET cancel_at = $2, updated_at = $3
            WHERE external_subscription_id = $1
            "#,
        )
        .bind(external_subscription_id)
        .bind(cancel_at)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_subscription(
        &self,
        external_subscription_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE external_subscription_id = $1")
            .bind(external_subscription_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_subscriptions(
        &self,
        external_subscription_ids: &[String],
    ) -> Result<u64, sqlx::Error> {
        if external_subscription_ids.is_empty() {
            return Ok(0);
        }
        let result =
            sqlx::query("DELETE FROM subscriptions WHERE external_subscription_id = ANY($1)")
                .bind(external_subscription_ids)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}
