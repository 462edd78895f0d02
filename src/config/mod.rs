use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::auth::AuthBackend;
use crate::throttle::{ThrottleClass, ThrottleRate};

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set as well")]
    Missing(&'static str),
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub session: SessionConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
    /// Login created at startup when it does not exist yet
    pub seed_user: Option<SeedUserConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub max_connections: usize,
    pub keep_alive_seconds: u64,
    pub client_timeout_seconds: u64,
    pub client_shutdown_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string, or `memory://` for the in-process store
    pub url: String,
    pub max_connections: usize,
    pub run_migrations: bool,
}

impl DatabaseConfig {
    pub fn is_in_memory(&self) -> bool {
        self.url.starts_with("memory:")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for JWT signing. Empty means one is generated at startup.
    pub jwt_secret: String,
    pub access_token_lifetime_minutes: i64,
    pub refresh_token_lifetime_days: i64,
    pub rotate_refresh_tokens: bool,
    pub blacklist_after_rotation: bool,
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            access_token_lifetime_minutes: 5,
            refresh_token_lifetime_days: 1,
            rotate_refresh_tokens: false,
            blacklist_after_rotation: true,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Master key material for the session cookie, at least 32 bytes.
    pub secret_key: String,
    pub cookie_name: String,
    pub cookie_secure: bool,
    pub cookie_age_seconds: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            cookie_name: "sessionid".to_string(),
            cookie_secure: false,
            cookie_age_seconds: 1_209_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Authentication classes tried in order on authenticated scopes
    pub authentication_classes: Vec<AuthBackend>,
    pub throttle_classes: Vec<ThrottleClass>,
    pub user_throttle_rate: ThrottleRate,
    pub anon_throttle_rate: ThrottleRate,
    pub max_json_payload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            authentication_classes: vec![AuthBackend::Session, AuthBackend::Jwt, AuthBackend::Token],
            throttle_classes: vec![ThrottleClass::User],
            user_throttle_rate: ThrottleRate::new(1000, 86_400),
            anon_throttle_rate: ThrottleRate::new(100, 86_400),
            max_json_payload_bytes: 262_144,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SeedUserConfig {
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub is_staff: bool,
}

impl std::fmt::Debug for SeedUserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedUserConfig")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("is_staff", &self.is_staff)
            .finish_non_exhaustive()
    }
}

impl SeedUserConfig {
    /// No username means no seed user; a username needs a password
    pub fn from_parts(
        username: Option<String>,
        password: Option<String>,
        email: Option<String>,
        is_staff: bool,
    ) -> Result<Option<Self>, ConfigError> {
        let username = match username.map(|u| u.trim().to_string()) {
            Some(u) if !u.is_empty() => u,
            _ => return Ok(None),
        };
        let password = match password {
            Some(p) if !p.is_empty() => p,
            _ => return Err(ConfigError::Missing("SEED_PASSWORD")),
        };

        Ok(Some(Self {
            username,
            email: email.unwrap_or_default(),
            password,
            is_staff,
        }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let auth_defaults = AuthConfig::default();
        let session_defaults = SessionConfig::default();
        let api_defaults = ApiConfig::default();

        Ok(Self {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: parse_var("PORT", 8000)?,
                workers: parse_var("WORKERS", 4)?,
                max_connections: parse_var("MAX_CONNECTIONS", 1000)?,
                keep_alive_seconds: parse_var("KEEP_ALIVE_SECONDS", 75)?,
                client_timeout_seconds: parse_var("CLIENT_TIMEOUT_SECONDS", 30)?,
                client_shutdown_seconds: parse_var("CLIENT_SHUTDOWN_SECONDS", 5)?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| "memory://".to_string()),
                max_connections: parse_var("DB_MAX_CONNECTIONS", 10)?,
                run_migrations: parse_var("DB_RUN_MIGRATIONS", true)?,
            },
            auth: AuthConfig {
                jwt_secret: env::var("JWT_SECRET").unwrap_or_default(),
                access_token_lifetime_minutes: parse_var(
                    "ACCESS_TOKEN_LIFETIME_MINUTES",
                    auth_defaults.access_token_lifetime_minutes,
                )?,
                refresh_token_lifetime_days: parse_var(
                    "REFRESH_TOKEN_LIFETIME_DAYS",
                    auth_defaults.refresh_token_lifetime_days,
                )?,
                rotate_refresh_tokens: parse_var("ROTATE_REFRESH_TOKENS", auth_defaults.rotate_refresh_tokens)?,
                blacklist_after_rotation: parse_var(
                    "BLACKLIST_AFTER_ROTATION",
                    auth_defaults.blacklist_after_rotation,
                )?,
                bcrypt_cost: parse_var("BCRYPT_COST", auth_defaults.bcrypt_cost)?,
            },
            session: SessionConfig {
                secret_key: env::var("SECRET_KEY").unwrap_or_default(),
                cookie_name: env::var("SESSION_COOKIE_NAME").unwrap_or(session_defaults.cookie_name),
                cookie_secure: parse_var("SESSION_COOKIE_SECURE", session_defaults.cookie_secure)?,
                cookie_age_seconds: parse_var("SESSION_COOKIE_AGE", session_defaults.cookie_age_seconds)?,
            },
            api: ApiConfig {
                authentication_classes: parse_list("AUTHENTICATION_CLASSES", api_defaults.authentication_classes)?,
                throttle_classes: parse_list("THROTTLE_CLASSES", api_defaults.throttle_classes)?,
                user_throttle_rate: parse_var("THROTTLE_RATE_USER", api_defaults.user_throttle_rate)?,
                anon_throttle_rate: parse_var("THROTTLE_RATE_ANON", api_defaults.anon_throttle_rate)?,
                max_json_payload_bytes: parse_var("MAX_JSON_PAYLOAD_BYTES", api_defaults.max_json_payload_bytes)?,
            },
            logging: LoggingConfig {
                level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
                directory: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
            },
            seed_user: SeedUserConfig::from_parts(
                env::var("SEED_USERNAME").ok(),
                env::var("SEED_PASSWORD").ok(),
                env::var("SEED_EMAIL").ok(),
                parse_var("SEED_IS_STAFF", false)?,
            )?,
        })
    }
}

fn parse_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

/// Parse a comma separated list; an unset variable yields the default
fn parse_list<T>(key: &'static str, default: Vec<T>) -> Result<Vec<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = match env::var(key) {
        Ok(raw) => raw,
        Err(_) => return Ok(default),
    };

    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| {
            item.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: item.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_url_selects_in_memory_store() {
        let cfg = DatabaseConfig {
            url: "memory://".to_string(),
            max_connections: 1,
            run_migrations: false,
        };
        assert!(cfg.is_in_memory());

        let pg = DatabaseConfig {
            url: "postgres://localhost/students".to_string(),
            ..cfg
        };
        assert!(!pg.is_in_memory());
    }

    #[test]
    fn seed_user_needs_a_password() {
        assert!(SeedUserConfig::from_parts(None, Some("pw".into()), None, false)
            .unwrap()
            .is_none());
        assert!(SeedUserConfig::from_parts(Some("  ".into()), None, None, false)
            .unwrap()
            .is_none());
        assert!(matches!(
            SeedUserConfig::from_parts(Some("admin".into()), None, None, false),
            Err(ConfigError::Missing("SEED_PASSWORD"))
        ));

        let seed = SeedUserConfig::from_parts(Some(" admin ".into()), Some("pw".into()), None, true)
            .unwrap()
            .unwrap();
        assert_eq!(seed.username, "admin");
        assert_eq!(seed.email, "");
        assert!(seed.is_staff);
        assert!(!format!("{:?}", seed).contains("pw"));
    }

    #[test]
    fn api_defaults_follow_rest_framework_defaults() {
        let api = ApiConfig::default();
        assert_eq!(api.authentication_classes.first(), Some(&AuthBackend::Session));
        assert_eq!(api.throttle_classes, vec![ThrottleClass::User]);
        assert_eq!(api.user_throttle_rate.num_requests, 1000);
    }
}
