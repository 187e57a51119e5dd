use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::plan::Plan;

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn find_plan(&self, plan_id: &str) -> Result<Option<Plan>, sqlx::Error>;
}

pub struct PostgresPlanRepository {
    pub pool: PgPool,
}

#[async_trait]
impl PlanRepository for PostgresPlanRepository {
    async fn find_plan(&self, plan_id: &str) -> Result<Option<Plan>, sqlx::Error> {
        sqlx::query_as::<_, Plan>(
            "SELECT id, name, stripe_price_monthly, stripe_price_yearly FROM plans WHERE id = $1",
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
    }
}
