use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub stripe_price_monthly: String,
    pub stripe_price_yearly: String,
}

impl Plan {
    pub fn price_for(&self, cycle: BillingCycle) -> &str {
        match cycle {
            BillingCycle::Monthly => &self.stripe_price_monthly,
            BillingCycle::Yearly => &self.stripe_price_yearly,
        }
    }
}
