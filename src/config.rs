// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names, default values, and the
//! [`AppConfig`] loaded from them once at startup. The loaded configuration
//! is passed to the services that need it; nothing reads the environment
//! afterwards.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `STORE_URL` | Base URL of the hosted store | unset: in-memory store |
//! | `STORE_API_KEY` | API key for the hosted store | Required with `STORE_URL` |
//! | `SECRET_KEY` | HS256 secret for credentials | Required |
//! | `ACCESS_TOKEN_EXPIRE_MINUTES` | Credential lifetime | `30` |
//! | `REMOTE_MAX_ATTEMPTS` | Attempts per store operation | `3` |
//! | `REMOTE_BASE_DELAY_MS` | Backoff base delay | `200` |
//! | `REMOTE_TIMEOUT_SECS` | Per-attempt timeout | `10` |
//! | `REMOTE_POOL_SIZE` | Concurrent store calls | `8` |
//! | `IDENTITY_CACHE_TTL_SECS` | User cache TTL | `300` |
//! | `IDENTITY_CACHE_CAPACITY` | User cache size | `1000` |
//! | `REVOCATION_TTL_SECS` | Revoked set reload interval | `600` |
//! | `RATE_LIMIT_CAPACITY` | Requests per window per client | `100` |
//! | `RATE_LIMIT_WINDOW_SECS` | Rate limit window | `60` |
//! | `TRUSTED_PROXIES` | Comma-separated proxy IPs whose `X-Forwarded-For` is read | empty |
//! | `LEDGER_MODE` | `sync` or `deferred` | `sync` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::cache::IdentityConfig;
use crate::rate_limit::RateLimitConfig;
use crate::remote::RetryPolicy;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const STORE_URL_ENV: &str = "STORE_URL";
pub const STORE_API_KEY_ENV: &str = "STORE_API_KEY";
pub const SECRET_KEY_ENV: &str = "SECRET_KEY";
pub const ACCESS_TOKEN_EXPIRE_MINUTES_ENV: &str = "ACCESS_TOKEN_EXPIRE_MINUTES";
pub const REMOTE_MAX_ATTEMPTS_ENV: &str = "REMOTE_MAX_ATTEMPTS";
pub const REMOTE_BASE_DELAY_MS_ENV: &str = "REMOTE_BASE_DELAY_MS";
pub const REMOTE_TIMEOUT_SECS_ENV: &str = "REMOTE_TIMEOUT_SECS";
pub const REMOTE_POOL_SIZE_ENV: &str = "REMOTE_POOL_SIZE";
pub const IDENTITY_CACHE_TTL_SECS_ENV: &str = "IDENTITY_CACHE_TTL_SECS";
pub const IDENTITY_CACHE_CAPACITY_ENV: &str = "IDENTITY_CACHE_CAPACITY";
pub const REVOCATION_TTL_SECS_ENV: &str = "REVOCATION_TTL_SECS";
pub const RATE_LIMIT_CAPACITY_ENV: &str = "RATE_LIMIT_CAPACITY";
pub const RATE_LIMIT_WINDOW_SECS_ENV: &str = "RATE_LIMIT_WINDOW_SECS";
pub const TRUSTED_PROXIES_ENV: &str = "TRUSTED_PROXIES";
pub const LEDGER_MODE_ENV: &str = "LEDGER_MODE";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default `RUST_LOG` filter.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

/// Secrets shorter than this trigger a startup warning.
pub const RECOMMENDED_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// When transaction effects reach account balances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LedgerMode {
    /// Before the mutating request returns.
    #[default]
    Sync,
    /// On a background task after the response.
    Deferred,
}

impl FromStr for LedgerMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(LedgerMode::Sync),
            "deferred" => Ok(LedgerMode::Deferred),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            _ => Ok(LogFormat::Pretty),
        }
    }
}

/// Connection settings of the hosted store.
#[derive(Clone)]
pub struct StoreConfig {
    pub url: Url,
    pub api_key: String,
}

/// Everything the service reads from the environment.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// `None` runs against the in-memory store.
    pub store: Option<StoreConfig>,
    pub secret_key: String,
    pub credential_ttl: Duration,
    pub retry: RetryPolicy,
    pub pool_size: usize,
    pub identity: IdentityConfig,
    pub rate_limit: RateLimitConfig,
    pub ledger_mode: LedgerMode,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let store = match var(STORE_URL_ENV) {
            Some(raw) => {
                let url = Url::parse(raw.trim()).map_err(|_| ConfigError::Invalid {
                    name: STORE_URL_ENV,
                    value: raw.clone(),
                })?;
                let api_key = var(STORE_API_KEY_ENV).ok_or(ConfigError::Missing(STORE_API_KEY_ENV))?;
                Some(StoreConfig { url, api_key })
            }
            None => None,
        };

        let secret_key = var(SECRET_KEY_ENV).ok_or(ConfigError::Missing(SECRET_KEY_ENV))?;

        let max_attempts: u32 = positive(&var, REMOTE_MAX_ATTEMPTS_ENV, 3)?;
        let base_delay_ms: u64 = parsed(&var, REMOTE_BASE_DELAY_MS_ENV, 200)?;
        let timeout_secs: u64 = positive(&var, REMOTE_TIMEOUT_SECS_ENV, 10)?;

        Ok(Self {
            host: var(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parsed(&var, PORT_ENV, 8080)?,
            store,
            secret_key,
            credential_ttl: Duration::from_secs(
                60 * positive::<u64, _>(&var, ACCESS_TOKEN_EXPIRE_MINUTES_ENV, 30)?,
            ),
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(base_delay_ms),
                attempt_timeout: Duration::from_secs(timeout_secs),
            },
            pool_size: positive(&var, REMOTE_POOL_SIZE_ENV, 8)?,
            identity: IdentityConfig {
                user_ttl: Duration::from_secs(positive(&var, IDENTITY_CACHE_TTL_SECS_ENV, 300)?),
                user_capacity: positive(&var, IDENTITY_CACHE_CAPACITY_ENV, 1000)?,
                revocation_ttl: Duration::from_secs(positive(&var, REVOCATION_TTL_SECS_ENV, 600)?),
            },
            rate_limit: RateLimitConfig {
                capacity: positive(&var, RATE_LIMIT_CAPACITY_ENV, 100)?,
                window: Duration::from_secs(positive(&var, RATE_LIMIT_WINDOW_SECS_ENV, 60)?),
                trusted_proxies: addresses(&var, TRUSTED_PROXIES_ENV)?,
            },
            ledger_mode: parsed(&var, LEDGER_MODE_ENV, LedgerMode::default())?,
            log_format: var(LOG_FORMAT_ENV)
                .and_then(|raw| raw.parse().ok())
                .unwrap_or_default(),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the secret is shorter than recommended.
    pub fn has_weak_secret(&self) -> bool {
        self.secret_key.len() < RECOMMENDED_SECRET_LEN
    }

    /// Configuration for unit tests: in-memory store, fixed secret.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn for_tests() -> Self {
        Self::from_lookup(|name| match name {
            SECRET_KEY_ENV => Some("test-secret-with-at-least-32-characters!".to_string()),
            _ => None,
        })
        .unwrap_or_else(|e| panic!("test configuration is invalid: {e}"))
    }
}

fn parsed<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => Ok(default),
    }
}

/// Like [`parsed`], rejecting zero.
fn positive<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    F: Fn(&str) -> Option<String>,
{
    let value = parsed(var, name, default)?;
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            name,
            value: var(name).unwrap_or_default(),
        })
    }
}

/// Comma-separated IP addresses; unset means none.
fn addresses<F>(var: &F, name: &'static str) -> Result<Vec<IpAddr>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = var(name) else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse().map_err(|_| ConfigError::Invalid {
                name,
                value: item.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_with_only_a_secret() {
        let cfg = config(&[(SECRET_KEY_ENV, "s")]).unwrap();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:8080");
        assert!(cfg.store.is_none());
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.base_delay, Duration::from_millis(200));
        assert_eq!(cfg.pool_size, 8);
        assert_eq!(cfg.identity.user_capacity, 1000);
        assert_eq!(cfg.rate_limit.capacity, 100);
        assert!(cfg.rate_limit.trusted_proxies.is_empty());
        assert_eq!(cfg.ledger_mode, LedgerMode::Sync);
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert_eq!(cfg.credential_ttl, Duration::from_secs(1800));
        assert!(cfg.has_weak_secret());
    }

    #[test]
    fn secret_is_required() {
        assert!(matches!(config(&[]), Err(ConfigError::Missing(SECRET_KEY_ENV))));
    }

    #[test]
    fn store_url_requires_api_key() {
        let err = config(&[(SECRET_KEY_ENV, "s"), (STORE_URL_ENV, "https://db.example.co")]);
        assert!(matches!(err, Err(ConfigError::Missing(STORE_API_KEY_ENV))));

        let cfg = config(&[
            (SECRET_KEY_ENV, "s"),
            (STORE_URL_ENV, "https://db.example.co"),
            (STORE_API_KEY_ENV, "key"),
        ])
        .unwrap();
        assert_eq!(cfg.store.unwrap().url.host_str(), Some("db.example.co"));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = config(&[(SECRET_KEY_ENV, "s"), (REMOTE_MAX_ATTEMPTS_ENV, "many")]);
        assert!(matches!(
            err,
            Err(ConfigError::Invalid { name: REMOTE_MAX_ATTEMPTS_ENV, .. })
        ));

        let err = config(&[(SECRET_KEY_ENV, "s"), (RATE_LIMIT_CAPACITY_ENV, "0")]);
        assert!(matches!(
            err,
            Err(ConfigError::Invalid { name: RATE_LIMIT_CAPACITY_ENV, .. })
        ));
    }

    #[test]
    fn ledger_mode_and_log_format_parse() {
        let cfg = config(&[
            (SECRET_KEY_ENV, "s"),
            (LEDGER_MODE_ENV, "Deferred"),
            (LOG_FORMAT_ENV, "json"),
        ])
        .unwrap();
        assert_eq!(cfg.ledger_mode, LedgerMode::Deferred);
        assert_eq!(cfg.log_format, LogFormat::Json);

        let err = config(&[(SECRET_KEY_ENV, "s"), (LEDGER_MODE_ENV, "eventually")]);
        assert!(matches!(err, Err(ConfigError::Invalid { name: LEDGER_MODE_ENV, .. })));
    }

    #[test]
    fn trusted_proxies_parse_as_addresses() {
        let cfg = config(&[(SECRET_KEY_ENV, "s"), (TRUSTED_PROXIES_ENV, "10.0.0.1, ::1,")]).unwrap();
        assert_eq!(
            cfg.rate_limit.trusted_proxies,
            vec![IpAddr::from([10, 0, 0, 1]), "::1".parse::<IpAddr>().unwrap()]
        );

        let err = config(&[(SECRET_KEY_ENV, "s"), (TRUSTED_PROXIES_ENV, "10.0.0.1, proxy.internal")]);
        assert!(matches!(
            err,
            Err(ConfigError::Invalid { name: TRUSTED_PROXIES_ENV, .. })
        ));
    }
}
