use super::{
    CheckoutSession, CreateCheckoutSessionRequest, PortalSession, StripeService,
    StripeServiceError,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct MockStripeService {
    pub created_sessions: Arc<Mutex<Vec<CheckoutSession>>>,
    pub last_create_requests: Arc<Mutex<Vec<CreateCheckoutSessionRequest>>>,
    pub created_customers: Arc<Mutex<Vec<(String, BTreeMap<String, String>)>>>,
    pub portal_requests: Arc<Mutex<Vec<(String, String)>>>,
    pub cancel_requests: Arc<Mutex<Vec<String>>>,
    failing_cancels: Arc<Mutex<HashSet<String>>>,
    missing_subscriptions: Arc<Mutex<HashSet<String>>>,
    fail_all: Arc<Mutex<bool>>,
    seq: Arc<AtomicU64>,
}

impl MockStripeService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later call fails with an API error.
    pub fn failing() -> Self {
        let mock = Self::default();
        *mock.fail_all.lock().unwrap() = true;
        mock
    }

    pub fn fail_cancel(&self, subscription_id: &str) {
        self.failing_cancels
            .lock()
            .unwrap()
            .insert(subscription_id.to_string());
    }

    pub fn mark_missing(&self, subscription_id: &str) {
        self.missing_subscriptions
            .lock()
            .unwrap()
            .insert(subscription_id.to_string());
    }

    pub fn clear_cancel_failures(&self) {
        self.failing_cancels.lock().unwrap().clear();
        *self.fail_all.lock().unwrap() = false;
    }

    pub fn cancel_calls(&self) -> Vec<String> {
        self.cancel_requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.last_create_requests.lock().unwrap().len()
            + self.created_customers.lock().unwrap().len()
            + self.portal_requests.lock().unwrap().len()
            + self.cancel_requests.lock().unwrap().len()
    }

    fn make_id(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn check(&self) -> Result<(), StripeServiceError> {
        if *self.fail_all.lock().unwrap() {
            return Err(StripeServiceError::Api("mock stripe unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StripeService for MockStripeService {
    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError> {
        self.last_create_requests.lock().unwrap().push(req.clone());
        self.check()?;

        let session = CheckoutSession {
            id: self.make_id("cs_test"),
            url: Some("https://example.test/checkout".into()),
        };
        self.created_sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }

    async fn create_customer(
        &self,
        email: &str,
        _name: Option<&str>,
        metadata: BTreeMap<String, String>,
    ) -> Result<String, StripeServiceError> {
        self.created_customers
            .lock()
            .unwrap()
            .push((email.to_string(), metadata));
        self.check()?;
        Ok(self.make_id("cus_test"))
    }

    async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, StripeServiceError> {
        self.portal_requests
            .lock()
            .unwrap()
            .push((customer_id.to_string(), return_url.to_string()));
        self.check()?;
        Ok(PortalSession {
            url: format!("https://example.test/portal/{}", customer_id),
        })
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), StripeServiceError> {
        self.cancel_requests
            .lock()
            .unwrap()
            .push(subscription_id.to_string());
        self.check()?;
        if self
            .missing_subscriptions
            .lock()
            .unwrap()
            .contains(subscription_id)
        {
            return Err(StripeServiceError::NotFound(format!(
                "subscription {} not found",
                subscription_id
            )));
        }
        if self.failing_cancels.lock().unwrap().contains(subscription_id) {
            return Err(StripeServiceError::Api(format!(
                "failed to cancel {}",
                subscription_id
            )));
        }
        Ok(())
    }
}
