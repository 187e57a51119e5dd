use crate::billing::locks::UserLocks;
use crate::billing::signature::WebhookVerifier;
use crate::config::Config;
use crate::db::{
    pending_cancellation_repository::PendingCancellationRepository,
    plan_repository::PlanRepository, stripe_event_log_repository::StripeEventLogRepository,
    subscription_repository::SubscriptionRepository, user_repository::UserRepository,
};
use crate::services::stripe::StripeService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub users: Arc<dyn UserRepository>,
    pub plans: Arc<dyn PlanRepository>,
    pub event_log: Arc<dyn StripeEventLogRepository>,
    pub pending_cancellations: Arc<dyn PendingCancellationRepository>,
    pub stripe: Arc<dyn StripeService>,
    pub verifier: Arc<WebhookVerifier>,
    pub user_locks: UserLocks,
    pub config: Arc<Config>,
}
