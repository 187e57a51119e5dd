use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::subscription::{Subscription, SubscriptionUpsert};

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn list_subscriptions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Subscription>, sqlx::Error>;

    /// Insert-or-update keyed by `external_subscription_id`.
    async fn upsert_subscription(
        &self,
        row: &SubscriptionUpsert,
    ) -> Result<Subscription, sqlx::Error>;

    /// Returns `false` when no row matched.
    async fn set_cancel_at(
        &self,
        external_subscription_id: &str,
        cancel_at: OffsetDateTime,
        updated_at: OffsetDateTime,
    ) -> Result<bool, sqlx::Error>;

    async fn delete_subscription(&self, external_subscription_id: &str)
        -> Result<bool, sqlx::Error>;

    async fn delete_subscriptions(
        &self,
        external_subscription_ids: &[String],
    ) -> Result<u64, sqlx::Error>;
}
