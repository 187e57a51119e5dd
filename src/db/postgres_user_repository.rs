use crate::{db::user_repository::UserRepository, models::user::BillingUser};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

pub struct PostgresUserRepository {
    pub pool: PgPool,
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn find_billing_user(&self, user_id: Uuid) -> Result<Option<BillingUser>, sqlx::Error> {
        sqlx::query_as::<_, BillingUser>(
            r#"
            SELECT id,
                   email,
                   name,
                   entitlement_active,
                   assistant_profile_id
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn update_entitlement(
        &self,
        user_id: Uuid,
        active: bool,
        assistant_profile_id: Option<String>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET entitlement_active = $2,
                assistant_profile_id = COALESCE($3, assistant_profile_id)
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(active)
        .bind(assistant_profile_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
