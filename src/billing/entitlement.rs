use tracing::{info, warn};
use uuid::Uuid;

use crate::billing::error::WebhookError;
use crate::db::user_repository::UserRepository;

/// Sets the user's entitlement flag in a single row write. A profile id, when
/// given, is recorded alongside it.
pub async fn set_entitlement(
    users: &dyn UserRepository,
    user_id: Uuid,
    active: bool,
    assistant_profile_id: Option<&str>,
) -> Result<(), WebhookError> {
    let updated = users
        .update_entitlement(user_id, active, assistant_profile_id.map(str::to_string))
        .await?;
    if updated {
        info!(%user_id, active, assistant_profile_id, "entitlement updated");
    } else {
        warn!(%user_id, active, "entitlement update matched no user");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::user_repository::MockUserRepository;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn writes_flag_and_profile_once() {
        let user_id = Uuid::new_v4();
        let mut users = MockUserRepository::new();
        users
            .expect_update_entitlement()
            .with(eq(user_id), eq(true), eq(Some("asst_42".to_string())))
            .times(1)
            .returning(|_, _, _| Ok(true));

        set_entitlement(&users, user_id, true, Some("asst_42"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_user_is_not_an_error() {
        let mut users = MockUserRepository::new();
        users
            .expect_update_entitlement()
            .times(1)
            .returning(|_, _, _| Ok(false));

        assert!(set_entitlement(&users, Uuid::new_v4(), true, None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn storage_failure_is_persistence_error() {
        let mut users = MockUserRepository::new();
        users
            .expect_update_entitlement()
            .returning(|_, _, _| Err(sqlx::Error::Protocol("Mock DB failure".into())));

        let err = set_entitlement(&users, Uuid::new_v4(), true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::Persistence(_)));
    }
}
