use async_trait::async_trait;
use uuid::Uuid;

use crate::models::user::BillingUser;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_billing_user(&self, user_id: Uuid) -> Result<Option<BillingUser>, sqlx::Error>;

    /// Sets `entitlement_active`; a `Some` profile id also replaces
    /// `assistant_profile_id`. Returns `false` when the user does not exist.
    async fn update_entitlement(
        &self,
        user_id: Uuid,
        active: bool,
        assistant_profile_id: Option<String>,
    ) -> Result<bool, sqlx::Error>;
}
