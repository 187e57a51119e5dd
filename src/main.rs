use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use casemap_billing::billing::locks::UserLocks;
use casemap_billing::billing::WebhookVerifier;
use casemap_billing::config::{Config, DatabaseSettings};
use casemap_billing::db::{
    plan_repository::PostgresPlanRepository,
    postgres_pending_cancellation_repository::PostgresPendingCancellationRepository,
    postgres_stripe_event_log_repository::PostgresStripeEventLogRepository,
    postgres_subscription_repository::PostgresSubscriptionRepository,
    postgres_user_repository::PostgresUserRepository,
};
use casemap_billing::services::stripe::LiveStripeService;
use casemap_billing::{init_tracing, routes, worker, AppState};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;

    let sentry_guard = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    init_tracing(sentry_guard.is_some());

    let pg_pool = establish_connection(&config.database).await?;
    if config.database.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pg_pool)
            .await
            .context("failed to apply migrations")?;
        info!("database migrations applied");
    }

    let state = AppState {
        subscriptions: Arc::new(PostgresSubscriptionRepository {
            pool: pg_pool.clone(),
        }),
        users: Arc::new(PostgresUserRepository {
            pool: pg_pool.clone(),
        }),
        plans: Arc::new(PostgresPlanRepository {
            pool: pg_pool.clone(),
        }),
        event_log: Arc::new(PostgresStripeEventLogRepository {
            pool: pg_pool.clone(),
        }),
        pending_cancellations: Arc::new(PostgresPendingCancellationRepository { pool: pg_pool }),
        stripe: Arc::new(LiveStripeService::from_settings(&config.stripe)),
        verifier: Arc::new(WebhookVerifier::new(
            config.stripe.webhook_secret.clone(),
            config.stripe.webhook_tolerance_seconds,
        )),
        user_locks: UserLocks::new(),
        config: Arc::new(config),
    };

    worker::start_background_workers(state.clone()).await;

    let addr = state.config.bind_addr;
    let app = routes::router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// Establish a connection to the database and verify it.
async fn establish_connection(settings: &DatabaseSettings) -> anyhow::Result<PgPool> {
    let mut options =
        PgConnectOptions::from_str(&settings.url).context("DATABASE_URL is not a valid url")?;
    if let Some(key) = settings.service_key.as_deref() {
        options = options.password(key);
    }

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect_with(options)
        .await
        .context("Failed to connect to the database")?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("Failed to verify database connection")?;

    info!("✅ Successfully connected to the database");
    Ok(pool)
}
