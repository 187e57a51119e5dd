use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::{
    pending_cancellation_repository::PendingCancellationRepository, plan_repository::PlanRepository,
    subscription_repository::SubscriptionRepository, user_repository::UserRepository,
};
use crate::models::pending_cancellation::{retry_backoff, PendingCancellation};
use crate::models::plan::Plan;
use crate::models::subscription::{CancelAtWrite, Subscription, SubscriptionUpsert};
use crate::models::user::BillingUser;

/// In-memory stand-in for the datastore tables the billing flow touches.
pub struct MockDb {
    pub should_fail: bool,
    /// Pause inside `list_subscriptions_for_user` after the snapshot is taken,
    /// widening the read-then-write window for concurrency tests.
    pub list_delay: Option<Duration>,
    pub subscriptions: Mutex<HashMap<String, Subscription>>,
    pub users: Mutex<HashMap<Uuid, BillingUser>>,
    pub plans: Mutex<HashMap<String, Plan>>,
    pub pending: Mutex<HashMap<String, PendingCancellation>>,
    pub subscription_writes: Mutex<usize>,
    pub entitlement_updates: Mutex<Vec<(Uuid, bool, Option<String>)>>,
}

impl Default for MockDb {
    fn default() -> Self {
        Self {
            should_fail: false,
            list_delay: None,
            subscriptions: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
            plans: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            subscription_writes: Mutex::new(0),
            entitlement_updates: Mutex::new(vec![]),
        }
    }
}

impl MockDb {
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub fn with_user(self, user: BillingUser) -> Self {
        self.users.lock().unwrap().insert(user.id, user);
        self
    }

    pub fn with_subscription(self, sub: Subscription) -> Self {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(sub.external_subscription_id.clone(), sub);
        self
    }

    pub fn with_plan(self, plan: Plan) -> Self {
        self.plans.lock().unwrap().insert(plan.id.clone(), plan);
        self
    }

    pub fn subscription(&self, id: &str) -> Option<Subscription> {
        self.subscriptions.lock().unwrap().get(id).cloned()
    }

    pub fn subscriptions_for(&self, user_id: Uuid) -> Vec<Subscription> {
        let mut rows: Vec<Subscription> = self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.external_subscription_id.cmp(&b.external_subscription_id));
        rows
    }

    pub fn user(&self, id: Uuid) -> Option<BillingUser> {
        self.users.lock().unwrap().get(&id).cloned()
    }

    pub fn pending_cancellation(&self, id: &str) -> Option<PendingCancellation> {
        self.pending.lock().unwrap().get(id).cloned()
    }

    pub fn write_count(&self) -> usize {
        *self.subscription_writes.lock().unwrap() + self.entitlement_updates.lock().unwrap().len()
    }

    fn check(&self) -> Result<(), sqlx::Error> {
        if self.should_fail {
            return Err(sqlx::Error::Protocol("Mock DB failure".into()));
        }
        Ok(())
    }

    fn count_write(&self) {
        *self.subscription_writes.lock().unwrap() += 1;
    }
}

#[async_trait]
impl SubscriptionRepository for MockDb {
    async fn list_subscriptions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        self.check()?;
        let rows = self.subscriptions_for(user_id);
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(rows)
    }

    async fn upsert_subscription(
        &self,
        row: &SubscriptionUpsert,
    ) -> Result<Subscription, sqlx::Error> {
        self.check()?;
        self.count_write();
        let mut subs = self.subscriptions.lock().unwrap();
        let cancel_at = match (row.cancel_at, subs.get(&row.external_subscription_id)) {
            (CancelAtWrite::Keep, Some(existing)) => existing.cancel_at,
            _ => None,
        };
        let stored = Subscription {
            external_subscription_id: row.external_subscription_id.clone(),
            user_id: row.user_id,
            plan_id: row.plan_id.clone(),
            external_customer_id: row.external_customer_id.clone(),
            status: row.status,
            current_period_end: row.current_period_end,
            cancel_at,
            updated_at: row.updated_at,
        };
        subs.insert(stored.external_subscription_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn set_cancel_at(
        &self,
        external_subscription_id: &str,
        cancel_at: OffsetDateTime,
        updated_at: OffsetDateTime,
    ) -> Result<bool, sqlx::Error> {
        self.check()?;
        let mut subs = self.subscriptions.lock().unwrap();
        match subs.get_mut(external_subscription_id) {
            Some(sub) => {
                self.count_write();
                sub.cancel_at = Some(cancel_at);
                sub.updated_at = updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_subscription(
        &self,
        external_subscription_id: &str,
    ) -> Result<bool, sqlx::Error> {
        self.check()?;
        let removed = self
            .subscriptions
            .lock()
            .unwrap()
            .remove(external_subscription_id)
            .is_some();
        if removed {
            self.count_write();
        }
        Ok(removed)
    }

    async fn delete_subscriptions(
        &self,
        external_subscription_ids: &[String],
    ) -> Result<u64, sqlx::Error> {
        self.check()?;
        let mut subs = self.subscriptions.lock().unwrap();
        let mut removed = 0;
        for id in external_subscription_ids {
            if subs.remove(id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            self.count_write();
        }
        Ok(removed)
    }
}

#[async_trait]
impl UserRepository for MockDb {
    async fn find_billing_user(&self, user_id: Uuid) -> Result<Option<BillingUser>, sqlx::Error> {
        self.check()?;
        Ok(self.user(user_id))
    }

    async fn update_entitlement(
        &self,
        user_id: Uuid,
        active: bool,
        assistant_profile_id: Option<String>,
    ) -> Result<bool, sqlx::Error> {
        self.check()?;
        self.entitlement_updates
            .lock()
            .unwrap()
            .push((user_id, active, assistant_profile_id.clone()));
        let mut users = self.users.lock().unwrap();
        match users.get_mut(&user_id) {
            Some(user) => {
                user.entitlement_active = active;
                if assistant_profile_id.is_some() {
                    user.assistant_profile_id = assistant_profile_id;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl PlanRepository for MockDb {
    async fn find_plan(&self, plan_id: &str) -> Result<Option<Plan>, sqlx::Error> {
        self.check()?;
        Ok(self.plans.lock().unwrap().get(plan_id).cloned())
    }
}

#[async_trait]
impl PendingCancellationRepository for MockDb {
    async fn record_failure(
        &self,
        external_subscription_id: &str,
        user_id: Uuid,
        error: &str,
        now: OffsetDateTime,
    ) -> Result<PendingCancellation, sqlx::Error> {
        self.check()?;
        let mut pending = self.pending.lock().unwrap();
        let record = pending
            .entry(external_subscription_id.to_string())
            .or_insert_with(|| PendingCancellation {
                external_subscription_id: external_subscription_id.to_string(),
                user_id,
                attempts: 0,
                last_error: None,
                next_attempt_at: now,
                created_at: now,
            });
        record.attempts += 1;
        record.last_error = Some(error.to_string());
        record.next_attempt_at = now + retry_backoff(record.attempts - 1);
        Ok(record.clone())
    }

    async fn is_pending(&self, external_subscription_id: &str) -> Result<bool, sqlx::Error> {
        self.check()?;
        Ok(self
            .pending
            .lock()
            .unwrap()
            .contains_key(external_subscription_id))
    }

    async fn list_due(
        &self,
        now: OffsetDateTime,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<PendingCancellation>, sqlx::Error> {
        self.check()?;
        let mut due: Vec<PendingCancellation> = self
            .pending
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.next_attempt_at <= now && p.attempts < max_attempts)
            .cloned()
            .collect();
        due.sort_by_key(|p| p.next_attempt_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn resolve(&self, external_subscription_id: &str) -> Result<bool, sqlx::Error> {
        self.check()?;
        Ok(self
            .pending
            .lock()
            .unwrap()
            .remove(external_subscription_id)
            .is_some())
    }
}
