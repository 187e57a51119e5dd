use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::billing::signature::DEFAULT_TOLERANCE_SECONDS;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has invalid value `{value}`: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
    pub webhook_tolerance_seconds: u64,
}

#[derive(Clone, Debug)]
pub struct DatabaseSettings {
    pub url: String,
    pub service_key: Option<String>,
    pub max_connections: u32,
    pub run_migrations: bool,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database: DatabaseSettings,
    pub stripe: StripeSettings,
    pub site_url: String,
    pub bind_addr: SocketAddr,
    pub pending_cancellation_sweep_seconds: u64,
    pub sentry_dsn: Option<String>,
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &'static str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn parsed<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            None => Ok(default),
            Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn flag(&self, name: &'static str) -> Result<bool, ConfigError> {
        match self.optional(name).as_deref() {
            None => Ok(false),
            Some(v) if v == "1" || v.eq_ignore_ascii_case("true") => Ok(true),
            Some(v) if v == "0" || v.eq_ignore_ascii_case("false") => Ok(false),
            Some(v) => Err(ConfigError::Invalid {
                name,
                value: v.to_string(),
                reason: "expected true/false".into(),
            }),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Load .env file
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let webhook_tolerance_seconds =
            vars.parsed("STRIPE_WEBHOOK_TOLERANCE_SECONDS", DEFAULT_TOLERANCE_SECONDS)?;
        if webhook_tolerance_seconds == 0 {
            return Err(ConfigError::Invalid {
                name: "STRIPE_WEBHOOK_TOLERANCE_SECONDS",
                value: "0".into(),
                reason: "timestamp tolerance cannot be disabled".into(),
            });
        }

        let stripe = StripeSettings {
            secret_key: vars.required("STRIPE_SECRET_KEY")?,
            webhook_secret: vars.required("STRIPE_WEBHOOK_SIGNING_SECRET")?,
            webhook_tolerance_seconds,
        };

        let database = DatabaseSettings {
            url: vars.required("DATABASE_URL")?,
            service_key: vars.optional("DATABASE_SERVICE_KEY"),
            max_connections: vars.parsed("DATABASE_MAX_CONNECTIONS", 5)?,
            run_migrations: vars.flag("DATABASE_RUN_MIGRATIONS")?,
        };

        let site_url = vars
            .required("SITE_URL")?
            .trim_end_matches('/')
            .to_string();

        let bind_addr = vars.parsed("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?;

        let pending_cancellation_sweep_seconds =
            vars.parsed("PENDING_CANCELLATION_SWEEP_SECONDS", 60)?;
        if pending_cancellation_sweep_seconds == 0 {
            return Err(ConfigError::Invalid {
                name: "PENDING_CANCELLATION_SWEEP_SECONDS",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        Ok(Config {
            database,
            stripe,
            site_url,
            bind_addr,
            pending_cancellation_sweep_seconds,
            sentry_dsn: vars.optional("SENTRY_DSN"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("STRIPE_SECRET_KEY", "sk_test_123"),
        ("STRIPE_WEBHOOK_SIGNING_SECRET", "whsec_123"),
        ("DATABASE_URL", "postgres://localhost/casemap"),
        ("SITE_URL", "https://casemap.test/"),
    ];

    fn with(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        let mut all: Vec<(&str, &str)> = REQUIRED.to_vec();
        all.extend_from_slice(extra);
        all
    }

    #[test]
    fn defaults_apply_when_optional_vars_are_absent() {
        let config = Config::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(config.stripe.webhook_tolerance_seconds, 300);
        assert_eq!(config.database.max_connections, 5);
        assert!(!config.database.run_migrations);
        assert_eq!(config.database.service_key, None);
        assert_eq!(config.site_url, "https://casemap.test");
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.pending_cancellation_sweep_seconds, 60);
        assert_eq!(config.sentry_dsn, None);
    }

    #[test]
    fn missing_required_var_is_reported_by_name() {
        let err = Config::from_lookup(lookup(&REQUIRED[1..])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("STRIPE_SECRET_KEY"));
        assert_eq!(err.to_string(), "STRIPE_SECRET_KEY must be set");
    }

    #[test]
    fn tolerance_cannot_be_disabled() {
        let err = Config::from_lookup(lookup(&with(&[(
            "STRIPE_WEBHOOK_TOLERANCE_SECONDS",
            "0",
        )])))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "STRIPE_WEBHOOK_TOLERANCE_SECONDS",
                ..
            }
        ));
    }

    #[test]
    fn invalid_numbers_and_flags_are_rejected() {
        let err = Config::from_lookup(lookup(&with(&[("DATABASE_MAX_CONNECTIONS", "many")])))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "DATABASE_MAX_CONNECTIONS",
                ..
            }
        ));

        let err = Config::from_lookup(lookup(&with(&[("DATABASE_RUN_MIGRATIONS", "maybe")])))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "DATABASE_RUN_MIGRATIONS",
                ..
            }
        ));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&with(&[
            ("STRIPE_WEBHOOK_TOLERANCE_SECONDS", "600"),
            ("DATABASE_SERVICE_KEY", "service-role"),
            ("DATABASE_RUN_MIGRATIONS", "TRUE"),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("SENTRY_DSN", "https://key@sentry.test/1"),
        ])))
        .unwrap();
        assert_eq!(config.stripe.webhook_tolerance_seconds, 600);
        assert_eq!(config.database.service_key.as_deref(), Some("service-role"));
        assert!(config.database.run_migrations);
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert!(config.sentry_dsn.is_some());
    }
}
