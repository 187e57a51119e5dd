pub mod mock_db;
pub mod mock_stripe_event_log_repository;
pub mod pending_cancellation_repository;
pub mod plan_repository;
pub mod postgres_pending_cancellation_repository;
pub mod postgres_stripe_event_log_repository;
pub mod postgres_subscription_repository;
pub mod postgres_user_repository;
pub mod stripe_event_log_repository;
pub mod subscription_repository;
pub mod user_repository;
