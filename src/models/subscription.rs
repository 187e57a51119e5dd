use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(sqlx::Type, Debug, Deserialize, Serialize, PartialEq, Eq, Copy, Clone)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Incomplete,
    Active,
    PastDue,
    Canceled,
    Unpaid,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processor statuses outside our five-value lifecycle are folded into the
/// nearest local status.
impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incomplete" => Ok(SubscriptionStatus::Incomplete),
            "active" | "trialing" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" | "incomplete_expired" => Ok(SubscriptionStatus::Canceled),
            "unpaid" | "paused" => Ok(SubscriptionStatus::Unpaid),
            other => Err(format!("unrecognized subscription status `{}`", other)),
        }
    }
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub external_subscription_id: String,
    pub user_id: Uuid,
    pub plan_id: String,
    pub external_customer_id: String,
    pub status: SubscriptionStatus,
    pub current_period_end: OffsetDateTime,
    pub cancel_at: Option<OffsetDateTime>,
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    /// Live rows are the ones invariant I1 counts: not canceled and without a
    /// scheduled cancellation.
    pub fn is_live(&self) -> bool {
        self.cancel_at.is_none() && self.status != SubscriptionStatus::Canceled
    }
}

/// What an upsert does with an already stored `cancel_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAtWrite {
    Clear,
    Keep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpsert {
    pub external_subscription_id: String,
    pub user_id: Uuid,
    pub plan_id: String,
    pub external_customer_id: String,
    pub status: SubscriptionStatus,
    pub current_period_end: OffsetDateTime,
    pub cancel_at: CancelAtWrite,
    pub updated_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processor_statuses_fold_into_local_lifecycle() {
        assert_eq!("active".parse::<SubscriptionStatus>(), Ok(SubscriptionStatus::Active));
        assert_eq!("trialing".parse::<SubscriptionStatus>(), Ok(SubscriptionStatus::Active));
        assert_eq!(
            "incomplete_expired".parse::<SubscriptionStatus>(),
            Ok(SubscriptionStatus::Canceled)
        );
        assert_eq!("paused".parse::<SubscriptionStatus>(), Ok(SubscriptionStatus::Unpaid));
        assert_eq!("past_due".parse::<SubscriptionStatus>(), Ok(SubscriptionStatus::PastDue));
        assert!("bogus".parse::<SubscriptionStatus>().is_err());
    }

    #[test]
    fn scheduled_cancellation_is_not_live() {
        let now = OffsetDateTime::now_utc();
        let mut sub = Subscription {
            external_subscription_id: "sub_1".into(),
            user_id: Uuid::new_v4(),
            plan_id: "pro".into(),
            external_customer_id: "cus_1".into(),
            status: SubscriptionStatus::Active,
            current_period_end: now,
            cancel_at: None,
            updated_at: now,
        };
        assert!(sub.is_live());
        sub.cancel_at = Some(now);
        assert!(!sub.is_live());
        sub.cancel_at = None;
        sub.status = SubscriptionStatus::Canceled;
        assert!(!sub.is_live());
    }
}
