use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

const BASE_BACKOFF_SECONDS: i64 = 30;
const MAX_BACKOFF_SECONDS: i64 = 3600;

/// A processor-side cancellation that failed during reconciliation and still
/// has to be retried out of band.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PendingCancellation {
    pub external_subscription_id: String,
    pub user_id: Uuid,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

/// Delay before the next attempt after `attempts` failures: 30s doubling,
/// capped at one hour.
pub fn retry_backoff(attempts: i32) -> Duration {
    let exp = attempts.clamp(0, 16) as u32;
    let secs = BASE_BACKOFF_SECONDS
        .saturating_mul(2_i64.saturating_pow(exp))
        .min(MAX_BACKOFF_SECONDS);
    Duration::seconds(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(retry_backoff(0), Duration::seconds(30));
        assert_eq!(retry_backoff(1), Duration::seconds(60));
        assert_eq!(retry_backoff(3), Duration::seconds(240));
        assert_eq!(retry_backoff(7), Duration::seconds(3600));
        assert_eq!(retry_backoff(500), Duration::seconds(3600));
        assert_eq!(retry_backoff(-2), Duration::seconds(30));
    }
}
