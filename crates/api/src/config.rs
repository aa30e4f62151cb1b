//! Runtime configuration, read from the environment (and `.env` if present).

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use uninexus_directory::{DEFAULT_INVITATION_TTL_HOURS, invitation_ttl};
use uninexus_observability::LogFormat;

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    /// Postgres connection string. Without it the in-memory store is used.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub invitation_ttl: chrono::TimeDelta,
    pub expiry_sweep_interval: Duration,
    pub frontend_url: String,
    pub log_format: LogFormat,
}

impl ApiConfig {
    /// Load `.env`, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let jwt_secret = var("JWT_SECRET").unwrap_or_else(|| DEV_JWT_SECRET.to_string());

        let invitation_ttl_hours = parse_or(
            "INVITATION_TTL_HOURS",
            var("INVITATION_TTL_HOURS"),
            DEFAULT_INVITATION_TTL_HOURS,
        )?;
        let invitation_ttl =
            invitation_ttl(invitation_ttl_hours).map_err(|e| ConfigError::Invalid {
                name: "INVITATION_TTL_HOURS",
                reason: e.to_string(),
            })?;
        let sweep_secs: u64 = parse_or(
            "EXPIRY_SWEEP_INTERVAL_SECS",
            var("EXPIRY_SWEEP_INTERVAL_SECS"),
            300,
        )?;
        if sweep_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "EXPIRY_SWEEP_INTERVAL_SECS",
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            bind_addr: parse_or(
                "BIND_ADDR",
                var("BIND_ADDR"),
                SocketAddr::from(([0, 0, 0, 0], 8080)),
            )?,
            database_url: var("DATABASE_URL"),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", var("DB_MAX_CONNECTIONS"), 10)?,
            jwt_secret,
            invitation_ttl,
            expiry_sweep_interval: Duration::from_secs(sweep_secs),
            frontend_url: var("FRONTEND_URL").unwrap_or_else(|| "http://localhost:3000".to_string()),
            log_format: parse_or("LOG_FORMAT", var("LOG_FORMAT"), LogFormat::Json)?,
        })
    }

    /// `JWT_SECRET` was not set and the insecure dev default is in use.
    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<ApiConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ApiConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.db_max_connections, 10);
        assert!(cfg.uses_dev_secret());
        assert_eq!(cfg.invitation_ttl, chrono::TimeDelta::hours(168));
        assert_eq!(cfg.expiry_sweep_interval, Duration::from_secs(300));
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "postgres://localhost/uninexus"),
            ("INVITATION_TTL_HOURS", "24"),
            ("LOG_FORMAT", "pretty"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/uninexus"));
        assert_eq!(cfg.invitation_ttl, chrono::TimeDelta::hours(24));
        assert_eq!(cfg.log_format, LogFormat::Pretty);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let cfg = config(&[("DATABASE_URL", "  ")]).unwrap();
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn invalid_numbers_fail() {
        let err = config(&[("DB_MAX_CONNECTIONS", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "DB_MAX_CONNECTIONS", .. }));

        let err = config(&[("INVITATION_TTL_HOURS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "INVITATION_TTL_HOURS", .. }));
    }

    #[test]
    fn oversized_invitation_lifetime_is_rejected() {
        for raw in ["8761", "9223372036854775807"] {
            let err = config(&[("INVITATION_TTL_HOURS", raw)]).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { name: "INVITATION_TTL_HOURS", .. }));
        }
        let cfg = config(&[("INVITATION_TTL_HOURS", "8760")]).unwrap();
        assert_eq!(cfg.invitation_ttl, chrono::TimeDelta::hours(8760));
    }
}
