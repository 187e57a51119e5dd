use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::models::plan::BillingCycle;
use crate::models::subscription::Subscription;
use crate::services::stripe::{
    CheckoutLineItem, CheckoutMode, CreateCheckoutSessionRequest, StripeServiceError,
};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionRequest {
    pub user_id: Uuid,
    pub plan_id: String,
    pub billing_cycle: BillingCycle,
    #[serde(default)]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckoutSessionResponse {
    pub session_id: String,
    pub url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("plan `{0}` not found")]
    PlanNotFound(String),
    #[error("user {0} not found")]
    UserNotFound(Uuid),
    #[error(transparent)]
    Persistence(#[from] sqlx::Error),
    #[error(transparent)]
    Processor(#[from] StripeServiceError),
}

/// Redirect base for checkout: the caller's origin when it is an http(s)
/// URL, otherwise the configured site URL.
fn redirect_base<'a>(origin: Option<&'a str>, site_url: &'a str) -> &'a str {
    origin
        .map(str::trim)
        .filter(|o| o.starts_with("https://") || o.starts_with("http://"))
        .unwrap_or(site_url)
        .trim_end_matches('/')
}

/// Reuses a customer id the user already has at the processor, preferring
/// the live subscription's.
fn existing_customer(rows: &[Subscription]) -> Option<String> {
    rows.iter()
        .find(|s| s.is_live())
        .or_else(|| rows.first())
        .map(|s| s.external_customer_id.clone())
}

pub async fn create_checkout_session(
    state: &AppState,
    req: &CheckoutSessionRequest,
) -> Result<CheckoutSessionResponse, CheckoutError> {
    let plan = state
        .plans
        .find_plan(&req.plan_id)
        .await?
        .ok_or_else(|| CheckoutError::PlanNotFound(req.plan_id.clone()))?;
    let user = state
        .users
        .find_billing_user(req.user_id)
        .await?
        .ok_or(CheckoutError::UserNotFound(req.user_id))?;

    let rows = state
        .subscriptions
        .list_subscriptions_for_user(user.id)
        .await?;
    let customer_id = match existing_customer(&rows) {
        Some(id) => id,
        None => {
            let metadata = BTreeMap::from([("user_id".to_string(), user.id.to_string())]);
            let id = state
                .stripe
                .create_customer(&user.email, user.name.as_deref(), metadata)
                .await?;
            info!(user_id = %user.id, customer_id = %id, "created processor customer");
            id
        }
    };

    let base = redirect_base(req.origin.as_deref(), &state.config.site_url);
    let subscription_metadata = BTreeMap::from([
        ("user_id".to_string(), user.id.to_string()),
        ("plan_id".to_string(), plan.id.clone()),
    ]);
    let session = state
        .stripe
        .create_checkout_session(CreateCheckoutSessionRequest {
            success_url: format!("{base}/chat?success=true"),
            cancel_url: format!("{base}/chat?canceled=true"),
            mode: CheckoutMode::Subscription,
            line_items: vec![CheckoutLineItem {
                price: plan.price_for(req.billing_cycle).to_string(),
                quantity: 1,
            }],
            customer: Some(customer_id),
            subscription_metadata: Some(subscription_metadata),
        })
        .await?;

    info!(
        user_id = %user.id,
        plan_id = %plan.id,
        session_id = %session.id,
        "checkout session created"
    );
    Ok(CheckoutSessionResponse {
        session_id: session.id,
        url: session.url,
    })
}

pub async fn create_portal_session(
    state: &AppState,
    customer_id: &str,
    return_url: Option<&str>,
) -> Result<String, StripeServiceError> {
    let return_url = return_url
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or(state.config.site_url.as_str());
    let session = state
        .stripe
        .create_billing_portal_session(customer_id, return_url)
        .await?;
    Ok(session.url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::MockDb;
    use crate::db::mock_stripe_event_log_repository::MockStripeEventLogRepository;
    use crate::models::plan::Plan;
    use crate::models::subscription::SubscriptionStatus;
    use crate::models::user::BillingUser;
    use crate::services::stripe::MockStripeService;
    use crate::state::test_support::test_state;
    use std::sync::Arc;
    use time::OffsetDateTime;

    fn plan() -> Plan {
        Plan {
            id: "pro".into(),
            name: "Pro".into(),
            stripe_price_monthly: "price_pro_m".into(),
            stripe_price_yearly: "price_pro_y".into(),
        }
    }

    fn user(id: Uuid) -> BillingUser {
        BillingUser {
            id,
            email: "counsel@casemap.test".into(),
            name: Some("Counsel".into()),
            entitlement_active: false,
            assistant_profile_id: None,
        }
    }

    fn setup(db: MockDb) -> (Arc<MockStripeService>, AppState) {
        let stripe = Arc::new(MockStripeService::new());
        let state = test_state(
            Arc::new(db),
            stripe.clone(),
            Arc::new(MockStripeEventLogRepository::default()),
        );
        (stripe, state)
    }

    fn request(user_id: Uuid, cycle: BillingCycle, origin: Option<&str>) -> CheckoutSessionRequest {
        CheckoutSessionRequest {
            user_id,
            plan_id: "pro".into(),
            billing_cycle: cycle,
            origin: origin.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn new_customer_gets_created_and_metadata_is_attached() {
        let user_id = Uuid::new_v4();
        let (stripe, state) = setup(MockDb::default().with_plan(plan()).with_user(user(user_id)));

        let resp = create_checkout_session(&state, &request(user_id, BillingCycle::Yearly, None))
            .await
            .unwrap();
        assert!(resp.session_id.starts_with("cs_test_"));

        let customers = stripe.created_customers.lock().unwrap();
        assert_eq!(customers.len(), 1);
        assert_eq!(customers[0].0, "counsel@casemap.test");
        assert_eq!(customers[0].1.get("user_id"), Some(&user_id.to_string()));

        let reqs = stripe.last_create_requests.lock().unwrap();
        let sent = &reqs[0];
        assert_eq!(sent.mode, CheckoutMode::Subscription);
        assert_eq!(sent.line_items[0].price, "price_pro_y");
        assert_eq!(sent.success_url, "https://casemap.test/chat?success=true");
        assert_eq!(sent.cancel_url, "https://casemap.test/chat?canceled=true");
        let meta = sent.subscription_metadata.as_ref().unwrap();
        assert_eq!(meta.get("user_id"), Some(&user_id.to_string()));
        assert_eq!(meta.get("plan_id").map(String::as_str), Some("pro"));
    }

    #[tokio::test]
    async fn existing_customer_is_reused_and_origin_respected() {
        let user_id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let db = MockDb::default()
            .with_plan(plan())
            .with_user(user(user_id))
            .with_subscription(Subscription {
                external_subscription_id: "sub_1".into(),
                user_id,
                plan_id: "basic".into(),
                external_customer_id: "cus_existing".into(),
                status: SubscriptionStatus::Active,
                current_period_end: now,
                cancel_at: None,
                updated_at: now,
            });
        let (stripe, state) = setup(db);

        create_checkout_session(
            &state,
            &request(user_id, BillingCycle::Monthly, Some("https://app.casemap.test/")),
        )
        .await
        .unwrap();

        assert!(stripe.created_customers.lock().unwrap().is_empty());
        let reqs = stripe.last_create_requests.lock().unwrap();
        assert_eq!(reqs[0].customer.as_deref(), Some("cus_existing"));
        assert_eq!(reqs[0].line_items[0].price, "price_pro_m");
        assert_eq!(
            reqs[0].success_url,
            "https://app.casemap.test/chat?success=true"
        );
    }

    #[tokio::test]
    async fn unknown_plan_or_user_is_not_found() {
        let user_id = Uuid::new_v4();
        let (stripe, state) = setup(MockDb::default().with_user(user(user_id)));
        let err = create_checkout_session(&state, &request(user_id, BillingCycle::Monthly, None))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::PlanNotFound(_)));

        let (_, state) = setup(MockDb::default().with_plan(plan()));
        let err = create_checkout_session(&state, &request(user_id, BillingCycle::Monthly, None))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::UserNotFound(id) if id == user_id));
        assert_eq!(stripe.call_count(), 0);
    }

    #[tokio::test]
    async fn processor_failure_surfaces() {
        let user_id = Uuid::new_v4();
        let stripe = Arc::new(MockStripeService::failing());
        let state = test_state(
            Arc::new(MockDb::default().with_plan(plan()).with_user(user(user_id))),
            stripe,
            Arc::new(MockStripeEventLogRepository::default()),
        );
        let err = create_checkout_session(&state, &request(user_id, BillingCycle::Monthly, None))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Processor(_)));
    }

    #[test]
    fn non_http_origins_fall_back_to_site_url() {
        assert_eq!(
            redirect_base(Some("javascript:alert(1)"), "https://casemap.test"),
            "https://casemap.test"
        );
        assert_eq!(
            redirect_base(Some(" http://localhost:5173/ "), "https://casemap.test"),
            "http://localhost:5173"
        );
        assert_eq!(redirect_base(None, "https://casemap.test/"), "https://casemap.test");
    }

    #[tokio::test]
    async fn portal_defaults_return_url_to_site() {
        let (stripe, state) = setup(MockDb::default());
        let url = create_portal_session(&state, "cus_1", None).await.unwrap();
        assert_eq!(url, "https://example.test/portal/cus_1");
        create_portal_session(&state, "cus_1", Some("https://casemap.test/settings"))
            .await
            .unwrap();

        let calls = stripe.portal_requests.lock().unwrap();
        assert_eq!(calls[0], ("cus_1".to_string(), "https://casemap.test".to_string()));
        assert_eq!(calls[1].1, "https://casemap.test/settings");
    }
}
