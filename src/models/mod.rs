pub mod pending_cancellation;
pub mod plan;
pub mod subscription;
pub mod user;
