// NOTE: async-stripe is compiled with a minimal feature set (runtime-tokio-hyper, checkout,
// billing, webhook-events, and connect). Touching APIs outside those features will require
// updating Cargo.toml explicitly so we keep compile times and binary size in check.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum StripeServiceError {
    #[error("stripe api error: {0}")]
    Api(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("other error: {0}")]
    Other(String),
}

impl From<stripe::StripeError> for StripeServiceError {
    fn from(err: stripe::StripeError) -> Self {
        match &err {
            stripe::StripeError::Stripe(req) if req.http_status == 404 => {
                StripeServiceError::NotFound(err.to_string())
            }
            _ => StripeServiceError::Api(err.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    Payment,
    Subscription,
    Setup,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutLineItem {
    pub price: String,
    pub quantity: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateCheckoutSessionRequest {
    pub success_url: String,
    pub cancel_url: String,
    pub mode: CheckoutMode,
    pub line_items: Vec<CheckoutLineItem>,
    pub customer: Option<String>,
    /// Copied onto the subscription the session creates, so lifecycle
    /// webhooks echo it back.
    pub subscription_metadata: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortalSession {
    pub url: String,
}

#[async_trait]
pub trait StripeService: Send + Sync {
    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, StripeServiceError>;

    async fn create_customer(
        &self,
        email: &str,
        name: Option<&str>,
        metadata: BTreeMap<String, String>,
    ) -> Result<String, StripeServiceError>;

    async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, StripeServiceError>;

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), StripeServiceError>;
}

mod live;
mod mock;

pub use live::LiveStripeService;
pub use mock::MockStripeService;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_captures_checkout_request_and_returns_url() {
        let mock = MockStripeService::new();
        let req = CreateCheckoutSessionRequest {
            success_url: "https://example.test/chat?success=true".into(),
            cancel_url: "https://example.test/chat?canceled=true".into(),
            mode: CheckoutMode::Subscription,
            line_items: vec![CheckoutLineItem {
                price: "price_123".into(),
                quantity: 1,
            }],
            customer: Some("cus_test_123".into()),
            subscription_metadata: Some(
                [
                    ("user_id".to_string(), "u-1".to_string()),
                    ("plan_id".to_string(), "pro".to_string()),
                ]
                .into_iter()
                .collect(),
            ),
        };

        let session = mock.create_checkout_session(req.clone()).await.unwrap();
        assert!(session.id.starts_with("cs_test_"));
        assert_eq!(
            session.url.as_deref(),
            Some("https://example.test/checkout")
        );

        let captured = mock.last_create_requests.lock().unwrap();
        assert_eq!(captured.len(), 1);
        let first = &captured[0];
        assert_eq!(first.success_url, req.success_url);
        assert_eq!(first.customer, req.customer);
        assert_eq!(first.line_items[0].price, "price_123");
        assert_eq!(
            first
                .subscription_metadata
                .as_ref()
                .and_then(|m| m.get("plan_id"))
                .map(String::as_str),
            Some("pro")
        );
    }

    #[tokio::test]
    async fn mock_cancel_failures_are_scripted_per_subscription() {
        let mock = MockStripeService::new();
        mock.fail_cancel("sub_broken");
        mock.mark_missing("sub_gone");

        assert!(mock.cancel_subscription("sub_ok").await.is_ok());
        assert!(matches!(
            mock.cancel_subscription("sub_broken").await,
            Err(StripeServiceError::Api(_))
        ));
        assert!(matches!(
            mock.cancel_subscription("sub_gone").await,
            Err(StripeServiceError::NotFound(_))
        ));
        assert_eq!(
            mock.cancel_calls(),
            vec!["sub_ok".to_string(), "sub_broken".into(), "sub_gone".into()]
        );

        mock.clear_cancel_failures();
        assert!(mock.cancel_subscription("sub_broken").await.is_ok());
    }

    #[tokio::test]
    async fn live_checkout_invalid_customer_id_maps_to_other_error() {
        let live = LiveStripeService::new("sk_test_dummy");
        let req = CreateCheckoutSessionRequest {
            success_url: "https://example.test/success".into(),
            cancel_url: "https://example.test/cancel".into(),
            mode: CheckoutMode::Subscription,
            line_items: vec![CheckoutLineItem {
                price: "price_123".into(),
                quantity: 1,
            }],
            customer: Some("not_a_customer_id".into()),
            subscription_metadata: None,
        };

        let result = live.create_checkout_session(req).await;
        assert!(matches!(result, Err(StripeServiceError::Other(_))));
    }

    #[tokio::test]
    async fn live_cancel_invalid_subscription_id_maps_to_other_error() {
        let live = LiveStripeService::new("sk_test_dummy");
        let result = live.cancel_subscription("not_a_subscription").await;
        assert!(matches!(result, Err(StripeServiceError::Other(_))));
    }

    #[tokio::test]
    async fn live_portal_invalid_customer_id_maps_to_other_error() {
        let live = LiveStripeService::new("sk_test_dummy");
        let result = live
            .create_billing_portal_session("nope", "https://example.test")
            .await;
        assert!(matches!(result, Err(StripeServiceError::Other(_))));
    }
}
