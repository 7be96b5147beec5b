//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use crate::auth::DEFAULT_BCRYPT_COST;
use chrono::Duration;
use serde::Deserialize;
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::warn;

const DEV_ACCESS_SECRET: &str = "crm-dev-access-secret-change-in-production";
const DEV_REFRESH_SECRET: &str = "crm-dev-refresh-secret-change-in-production";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0),
            port: 3000,
            request_timeout_secs: 30,
        }
    }
}

/// Database configuration for the PostgreSQL credential store
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            max_pool_size: 10,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Token, hashing and lockout parameters
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// Clock-skew tolerance for token expiry, capped at 5 seconds
    pub token_leeway_secs: u64,
    pub bcrypt_cost: u32,
    pub max_login_attempts: u32,
    pub lock_duration: Duration,
    pub reset_token_ttl: Duration,
    pub access_cookie_name: String,
    pub refresh_cookie_name: String,
    pub cookie_secure: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_secret: DEV_ACCESS_SECRET.to_string(),
            refresh_secret: DEV_REFRESH_SECRET.to_string(),
            access_token_ttl: Duration::minutes(15),
            refresh_token_ttl: Duration::days(7),
            token_leeway_secs: 0,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            max_login_attempts: 5,
            lock_duration: Duration::hours(2),
            reset_token_ttl: Duration::minutes(10),
            access_cookie_name: "access_token".to_string(),
            refresh_cookie_name: "refresh_token".to_string(),
            cookie_secure: false,
        }
    }
}

impl AuthConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.access_secret.is_empty() || self.refresh_secret.is_empty() {
            return Err(ConfigError::MissingVar(
                "JWT_ACCESS_SECRET / JWT_REFRESH_SECRET".to_string(),
            ));
        }
        if self.access_secret == self.refresh_secret {
            return Err(ConfigError::InvalidValue(
                "JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ".to_string(),
            ));
        }
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ConfigError::InvalidValue(format!(
                "AUTH_BCRYPT_COST must be between 4 and 31, got {}",
                self.bcrypt_cost
            )));
        }
        if self.max_login_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "AUTH_MAX_LOGIN_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        check_duration("ACCESS_TOKEN_TTL_MINUTES", self.access_token_ttl)?;
        check_duration("REFRESH_TOKEN_TTL_DAYS", self.refresh_token_ttl)?;
        check_duration("AUTH_LOCK_DURATION_MINUTES", self.lock_duration)?;
        check_duration("AUTH_RESET_TOKEN_TTL_MINUTES", self.reset_token_ttl)?;
        Ok(())
    }

    /// Defaults with the cheapest bcrypt cost
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            bcrypt_cost: 4,
            ..Self::default()
        }
    }
}

/// Seed administrator created at start-up when both values are set
#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    /// `None` selects the in-memory credential store
    pub database: Option<DatabaseConfig>,
    pub cors: CorsConfig,
    pub auth: AuthConfig,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

/// `LOG_FORMAT=json` switches the subscriber to JSON lines. Read before
/// [`Settings::load`] so its warnings are already captured.
pub fn json_logs_requested() -> bool {
    let _ = dotenvy::dotenv();
    std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Read and parse an environment variable, falling back to `default` when unset
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", key, raw))),
        Err(_) => Ok(default),
    }
}

/// Longest accepted value for any configured TTL or lock duration
const MAX_CONFIGURED_DURATION_DAYS: i64 = 3650;

/// Convert a configured count into a `Duration`, rejecting overflow
fn checked_duration(
    key: &str,
    amount: i64,
    to_duration: fn(i64) -> Option<Duration>,
) -> Result<Duration, ConfigError> {
    to_duration(amount)
        .ok_or_else(|| ConfigError::InvalidValue(format!("{}={} is out of range", key, amount)))
}

fn env_duration(
    key: &str,
    default: i64,
    to_duration: fn(i64) -> Option<Duration>,
) -> Result<Duration, ConfigError> {
    checked_duration(key, env_or(key, default)?, to_duration)
}

/// Durations must be positive and at most ten years
fn check_duration(key: &str, value: Duration) -> Result<(), ConfigError> {
    if value <= Duration::zero() || value > Duration::days(MAX_CONFIGURED_DURATION_DAYS) {
        return Err(ConfigError::InvalidValue(format!(
            "{} must be positive and at most {} days, got {}s",
            key,
            MAX_CONFIGURED_DURATION_DAYS,
            value.num_seconds()
        )));
    }
    Ok(())
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let defaults = ServerConfig::default();
        let server = ServerConfig {
            host: env_or("HOST", defaults.host)?,
            port: env_or("PORT", defaults.port)?,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
        };

        let database = match std::env::var("DATABASE_URL") {
            Ok(database_url) => Some(Self::parse_database_url(&database_url)?),
            Err(_) => None,
        };

        let cors = CorsConfig {
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let auth = Self::load_auth()?;

        let bootstrap_admin = match (std::env::var("ADMIN_EMAIL"), std::env::var("ADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) => Some(BootstrapAdmin { email, password }),
            _ => None,
        };

        Ok(Self {
            server,
            database,
            cors,
            auth,
            bootstrap_admin,
        })
    }

    fn load_auth() -> Result<AuthConfig, ConfigError> {
        let defaults = AuthConfig::default();

        let access_secret = std::env::var("JWT_ACCESS_SECRET").unwrap_or_else(|_| {
            warn!("JWT_ACCESS_SECRET not set, using development default (INSECURE)");
            defaults.access_secret.clone()
        });
        let refresh_secret = std::env::var("JWT_REFRESH_SECRET").unwrap_or_else(|_| {
            warn!("JWT_REFRESH_SECRET not set, using development default (INSECURE)");
            defaults.refresh_secret.clone()
        });

        let auth = AuthConfig {
            access_secret,
            refresh_secret,
            access_token_ttl: env_duration(
                "ACCESS_TOKEN_TTL_MINUTES",
                defaults.access_token_ttl.num_minutes(),
                Duration::try_minutes,
            )?,
            refresh_token_ttl: env_duration(
                "REFRESH_TOKEN_TTL_DAYS",
                defaults.refresh_token_ttl.num_days(),
                Duration::try_days,
            )?,
            token_leeway_secs: env_or("AUTH_TOKEN_LEEWAY_SECS", defaults.token_leeway_secs)?,
            bcrypt_cost: env_or("AUTH_BCRYPT_COST", defaults.bcrypt_cost)?,
            max_login_attempts: env_or("AUTH_MAX_LOGIN_ATTEMPTS", defaults.max_login_attempts)?,
            lock_duration: env_duration(
                "AUTH_LOCK_DURATION_MINUTES",
                defaults.lock_duration.num_minutes(),
                Duration::try_minutes,
            )?,
            reset_token_ttl: env_duration(
                "AUTH_RESET_TOKEN_TTL_MINUTES",
                defaults.reset_token_ttl.num_minutes(),
                Duration::try_minutes,
            )?,
            access_cookie_name: std::env::var("AUTH_COOKIE_NAME")
                .unwrap_or(defaults.access_cookie_name),
            refresh_cookie_name: std::env::var("AUTH_REFRESH_COOKIE_NAME")
                .unwrap_or(defaults.refresh_cookie_name),
            cookie_secure: env_or("AUTH_COOKIE_SECURE", defaults.cookie_secure)?,
        };

        auth.validate()?;
        Ok(auth)
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str) -> Result<DatabaseConfig, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|_| {
            ConfigError::InvalidValue(
                "Invalid DATABASE_URL format (expected postgresql://...)".to_string(),
            )
        })?;

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        Ok(DatabaseConfig {
            host,
            port: parsed.port().unwrap_or(5432),
            user: parsed.username().to_string(),
            password: parsed.password().map(|p| p.to_string()).unwrap_or_default(),
            database: parsed.path().trim_start_matches('/').to_string(),
            max_pool_size: env_or("DB_MAX_CONNECTIONS", 10)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_default_auth_config() {
        let config = AuthConfig::default();
        assert_eq!(config.access_token_ttl, Duration::minutes(15));
        assert_eq!(config.refresh_token_ttl, Duration::days(7));
        assert_eq!(config.max_login_attempts, 5);
        assert_eq!(config.lock_duration, Duration::hours(2));
        assert_eq!(config.reset_token_ttl, Duration::minutes(10));
        assert_eq!(config.bcrypt_cost, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shared_secret_is_rejected() {
        let config = AuthConfig {
            refresh_secret: DEV_ACCESS_SECRET.to_string(),
            ..AuthConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_bcrypt_cost_bounds() {
        let config = AuthConfig {
            bcrypt_cost: 3,
            ..AuthConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_durations_are_rejected() {
        let negative_lock = AuthConfig {
            lock_duration: Duration::minutes(-5),
            ..AuthConfig::default()
        };
        assert!(matches!(
            negative_lock.validate(),
            Err(ConfigError::InvalidValue(msg)) if msg.contains("AUTH_LOCK_DURATION_MINUTES")
        ));

        let zero_access = AuthConfig {
            access_token_ttl: Duration::zero(),
            ..AuthConfig::default()
        };
        assert!(zero_access.validate().is_err());

        let endless_reset = AuthConfig {
            reset_token_ttl: Duration::days(MAX_CONFIGURED_DURATION_DAYS + 1),
            ..AuthConfig::default()
        };
        assert!(endless_reset.validate().is_err());
    }

    #[test]
    fn test_huge_duration_counts_do_not_panic() {
        assert!(matches!(
            checked_duration("AUTH_LOCK_DURATION_MINUTES", i64::MAX, Duration::try_minutes),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(checked_duration("REFRESH_TOKEN_TTL_DAYS", i64::MIN, Duration::try_days).is_err());
        assert_eq!(
            checked_duration("AUTH_LOCK_DURATION_MINUTES", 120, Duration::try_minutes).unwrap(),
            Duration::hours(2)
        );
    }

    #[test]
    fn test_parse_database_url() {
        let db = Settings::parse_database_url("postgresql://crm:pw@db.internal:5433/crm").unwrap();
        assert_eq!(db.host, "db.internal");
        assert_eq!(db.port, 5433);
        assert_eq!(db.user, "crm");
        assert_eq!(db.password, "pw");
        assert_eq!(db.database, "crm");
    }

    #[test]
    fn test_parse_database_url_rejects_garbage() {
        assert!(Settings::parse_database_url("not a url").is_err());
    }
}
