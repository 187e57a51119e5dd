//! Subscription billing: webhook verification, event dispatch, and the
//! reconciliation that keeps a single live subscription per user.

pub mod checkout;
pub mod dispatcher;
pub mod entitlement;
pub mod error;
pub mod events;
pub mod ledger;
pub mod locks;
pub mod reconciler;
pub mod signature;

pub use dispatcher::{dispatch, DispatchOutcome};
pub use error::WebhookError;
pub use signature::WebhookVerifier;
