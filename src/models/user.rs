use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, FromRow, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BillingUser {
    pub id: uuid::Uuid,
    pub email: String,
    pub name: Option<String>,
    pub entitlement_active: bool,
    pub assistant_profile_id: Option<String>,
}
