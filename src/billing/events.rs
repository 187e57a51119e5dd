//! Typed views over the processor's webhook envelope.
//!
//! Only the fields the billing flow reads are modelled; everything else in
//! the payload is ignored so API version drift on unrelated fields cannot
//! break deserialization.
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use time::OffsetDateTime;

use crate::billing::error::WebhookError;

pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    CheckoutSessionCompleted,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaymentSucceeded,
    Unknown(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::CheckoutSessionCompleted => "checkout.session.completed",
            EventKind::SubscriptionCreated => "customer.subscription.created",
            EventKind::SubscriptionUpdated => "customer.subscription.updated",
            EventKind::SubscriptionDeleted => "customer.subscription.deleted",
            EventKind::InvoicePaymentSucceeded => "invoice.payment_succeeded",
            EventKind::Unknown(other) => other,
        }
    }
}

impl FromStr for EventKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "checkout.session.completed" => EventKind::CheckoutSessionCompleted,
            "customer.subscription.created" => EventKind::SubscriptionCreated,
            "customer.subscription.updated" => EventKind::SubscriptionUpdated,
            "customer.subscription.deleted" => EventKind::SubscriptionDeleted,
            "invoice.payment_succeeded" => EventKind::InvoicePaymentSucceeded,
            other => EventKind::Unknown(other.to_string()),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl StripeEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, WebhookError> {
        serde_json::from_slice(payload)
            .map_err(|e| WebhookError::InvalidPayload(format!("malformed event envelope: {e}")))
    }

    pub fn kind(&self) -> EventKind {
        match self.event_type.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }

    /// Deserializes `data.object` into one of the typed views below.
    pub fn object<T: DeserializeOwned>(&self) -> Result<T, WebhookError> {
        T::deserialize(&self.data.object).map_err(|e| {
            WebhookError::InvalidPayload(format!("{} object: {e}", self.event_type))
        })
    }
}

/// A reference the processor sends either as a bare id or, when expanded,
/// as the full object.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct List<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

fn nullable_metadata<'de, D>(deserializer: D) -> Result<Metadata, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Metadata>::deserialize(deserializer)?.unwrap_or_default())
}

fn metadata_value<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

pub fn timestamp(seconds: i64) -> Result<OffsetDateTime, WebhookError> {
    OffsetDateTime::from_unix_timestamp(seconds)
        .map_err(|e| WebhookError::InvalidPayload(format!("timestamp {seconds}: {e}")))
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: Expandable,
    pub status: String,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at: Option<i64>,
    #[serde(default)]
    pub items: Option<List<SubscriptionItem>>,
    #[serde(default, deserialize_with = "nullable_metadata")]
    pub metadata: Metadata,
}

impl SubscriptionObject {
    /// Current API versions carry the period on the first item; older ones
    /// on the subscription itself.
    pub fn period_end(&self) -> Option<i64> {
        self.items
            .as_ref()
            .and_then(|items| items.data.first())
            .and_then(|item| item.current_period_end)
            .or(self.current_period_end)
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        metadata_value(&self.metadata, key)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacySubscriptionDetails {
    #[serde(default, deserialize_with = "nullable_metadata")]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParentSubscriptionDetails {
    #[serde(default)]
    pub subscription: Option<Expandable>,
    #[serde(default, deserialize_with = "nullable_metadata")]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceParent {
    #[serde(default)]
    pub subscription_details: Option<ParentSubscriptionDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinePeriod {
    pub end: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceLine {
    #[serde(default)]
    pub period: Option<LinePeriod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<Expandable>,
    #[serde(default)]
    pub parent: Option<InvoiceParent>,
    #[serde(default)]
    pub subscription: Option<Expandable>,
    #[serde(default)]
    pub subscription_details: Option<LegacySubscriptionDetails>,
    #[serde(default)]
    pub lines: Option<List<InvoiceLine>>,
    #[serde(default)]
    pub period_end: Option<i64>,
}

impl InvoiceObject {
    fn parent_details(&self) -> Option<&ParentSubscriptionDetails> {
        self.parent.as_ref()?.subscription_details.as_ref()
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.parent_details()
            .and_then(|d| d.subscription.as_ref())
            .or(self.subscription.as_ref())
            .map(Expandable::id)
    }

    /// Metadata copied from the subscription at invoice time.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.parent_details()
            .and_then(|d| metadata_value(&d.metadata, key))
            .or_else(|| {
                self.subscription_details
                    .as_ref()
                    .and_then(|d| metadata_value(&d.metadata, key))
            })
    }

    pub fn period_end(&self) -> Option<i64> {
        self.lines
            .as_ref()
            .and_then(|lines| lines.data.first())
            .and_then(|line| line.period.as_ref())
            .map(|p| p.end)
            .or(self.period_end)
    }
}

/// Just the id; enough for deletions.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<Expandable>,
    #[serde(default)]
    pub subscription: Option<Expandable>,
}
