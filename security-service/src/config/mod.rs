use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

use crate::services::email::SmtpSettings;
use crate::services::encryption::DEFAULT_KDF_ITERATIONS;
use crate::services::rate_limiter::{RateLimitPolicy, RateLimitTier, RateLimitTiers};

#[derive(Debug, Clone)]
pub struct SecurityServiceConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub encryption: EncryptionConfig,
    pub session: SessionConfig,
    pub login: LoginConfig,
    pub two_factor: TwoFactorConfig,
    pub rate_limit: RateLimitConfig,
    pub scheduler: SchedulerConfig,
    pub alerts: AlertConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    pub master_key: Option<SecretString>,
    pub kdf_iterations: u32,
    pub rotation_days: u32,
    pub rotation_batch_size: u32,
    pub rotation_batch_delay_ms: u64,
    pub rotation_min_success_ratio: f64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub jwt_secret: SecretString,
    pub cookie_name: String,
}

#[derive(Debug, Clone)]
pub struct LoginConfig {
    pub max_attempts: u32,
    pub lockout_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct TwoFactorConfig {
    pub enabled: bool,
    pub issuer: String,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub tiers: RateLimitTiers,
    pub retention_hours: i64,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub monitor_interval_seconds: u64,
    pub key_rotation_check_interval_seconds: u64,
    pub rate_limit_sweep_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub admin_email: Option<String>,
    pub app_base_url: String,
    pub smtp: Option<SmtpSettings>,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub internal_api_key: Option<SecretString>,
    pub allowed_origins: Vec<String>,
}

impl Default for SecurityServiceConfig {
    /// Development settings. `jwt_secret` is a fixed placeholder and must be
    /// replaced for anything but local runs.
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "security-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: "postgres://localhost/security".to_string(),
                max_connections: 10,
            },
            encryption: EncryptionConfig {
                master_key: None,
                kdf_iterations: DEFAULT_KDF_ITERATIONS,
                rotation_days: 90,
                rotation_batch_size: 100,
                rotation_batch_delay_ms: 100,
                rotation_min_success_ratio: 1.0,
            },
            session: SessionConfig {
                jwt_secret: SecretString::new("dev-only-jwt-secret".to_string()),
                cookie_name: "session_id".to_string(),
            },
            login: LoginConfig {
                max_attempts: 5,
                lockout_minutes: 15,
            },
            two_factor: TwoFactorConfig {
                enabled: true,
                issuer: "Real Estate Platform".to_string(),
            },
            rate_limit: RateLimitConfig {
                tiers: RateLimitTiers::default(),
                retention_hours: 24,
            },
            scheduler: SchedulerConfig {
                monitor_interval_seconds: 300,
                key_rotation_check_interval_seconds: 86_400,
                rate_limit_sweep_interval_seconds: 3_600,
            },
            alerts: AlertConfig {
                admin_email: None,
                app_base_url: "http://localhost:3000".to_string(),
                smtp: None,
            },
            security: SecurityConfig {
                internal_api_key: None,
                allowed_origins: vec!["http://localhost:3000".to_string()],
            },
        }
    }
}

impl SecurityServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let mut tiers = RateLimitTiers::default();
        for tier in RateLimitTier::ALL {
            let defaults = tier.default_policy();
            let max_requests = parse_env(
                &format!("RATE_LIMIT_{}_MAX_REQUESTS", tier.env_key()),
                &defaults.max_requests.to_string(),
                is_prod,
            )?;
            let window_seconds: i64 = parse_env(
                &format!("RATE_LIMIT_{}_WINDOW_SECONDS", tier.env_key()),
                &defaults.window.num_seconds().to_string(),
                is_prod,
            )?;
            tiers.set(
                tier,
                RateLimitPolicy::new(max_requests, chrono::Duration::seconds(window_seconds)),
            );
        }

        let smtp = match get_optional_env("SMTP_HOST") {
            Some(host) => {
                let user = get_env("SMTP_USER", None, is_prod)?;
                Some(SmtpSettings {
                    host,
                    port: parse_env("SMTP_PORT", "587", is_prod)?,
                    from_email: get_optional_env("SMTP_FROM").unwrap_or_else(|| user.clone()),
                    user,
                    password: SecretString::new(get_env("SMTP_PASSWORD", None, is_prod)?),
                })
            }
            None => None,
        };

        let config = SecurityServiceConfig {
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT")
                .or_else(|| common_config.otlp_endpoint.clone()),
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("security-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
            },
            encryption: EncryptionConfig {
                master_key: (if is_prod {
                    Some(get_env("ENCRYPTION_KEY", None, true)?)
                } else {
                    get_optional_env("ENCRYPTION_KEY")
                })
                .map(SecretString::new),
                kdf_iterations: parse_env(
                    "ENCRYPTION_KDF_ITERATIONS",
                    &DEFAULT_KDF_ITERATIONS.to_string(),
                    is_prod,
                )?,
                rotation_days: parse_env("ENCRYPTION_KEY_ROTATION_DAYS", "90", is_prod)?,
                rotation_batch_size: parse_env("KEY_ROTATION_BATCH_SIZE", "100", is_prod)?,
                rotation_batch_delay_ms: parse_env("KEY_ROTATION_BATCH_DELAY_MS", "100", is_prod)?,
                rotation_min_success_ratio: parse_env(
                    "KEY_ROTATION_MIN_SUCCESS_RATIO",
                    "1.0",
                    is_prod,
                )?,
            },
            session: SessionConfig {
                jwt_secret: SecretString::new(get_env("JWT_SECRET", None, is_prod)?),
                cookie_name: get_env("SESSION_COOKIE_NAME", Some("session_id"), is_prod)?,
            },
            login: LoginConfig {
                max_attempts: parse_env("LOGIN_MAX_ATTEMPTS", "5", is_prod)?,
                lockout_minutes: parse_env("LOGIN_LOCKOUT_MINUTES", "15", is_prod)?,
            },
            two_factor: TwoFactorConfig {
                enabled: parse_env("TWO_FACTOR_ENABLED", "true", is_prod)?,
                issuer: get_env("TWO_FACTOR_ISSUER", Some("Real Estate Platform"), is_prod)?,
            },
            rate_limit: RateLimitConfig {
                tiers,
                retention_hours: parse_env("RATE_LIMIT_RETENTION_HOURS", "24", is_prod)?,
            },
            scheduler: SchedulerConfig {
                monitor_interval_seconds: parse_env("MONITOR_INTERVAL_SECONDS", "300", is_prod)?,
                key_rotation_check_interval_seconds: parse_env(
                    "KEY_ROTATION_CHECK_INTERVAL_SECONDS",
                    "86400",
                    is_prod,
                )?,
                rate_limit_sweep_interval_seconds: parse_env(
                    "RATE_LIMIT_SWEEP_INTERVAL_SECONDS",
                    "3600",
                    is_prod,
                )?,
            },
            alerts: AlertConfig {
                admin_email: get_optional_env("ADMIN_EMAIL"),
                app_base_url: get_env("APP_BASE_URL", Some("http://localhost:3000"), is_prod)?,
                smtp,
            },
            security: SecurityConfig {
                internal_api_key: (if is_prod {
                    Some(get_env("INTERNAL_API_KEY", None, true)?)
                } else {
                    get_optional_env("INTERNAL_API_KEY")
                })
                .map(SecretString::new),
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.encryption.kdf_iterations < 1_000 {
            return Err(config_error("ENCRYPTION_KDF_ITERATIONS must be at least 1000"));
        }

        if !(0.0..=1.0).contains(&self.encryption.rotation_min_success_ratio) {
            return Err(config_error(
                "KEY_ROTATION_MIN_SUCCESS_RATIO must be between 0.0 and 1.0",
            ));
        }

        if self.encryption.rotation_days == 0 || self.encryption.rotation_batch_size == 0 {
            return Err(config_error(
                "ENCRYPTION_KEY_ROTATION_DAYS and KEY_ROTATION_BATCH_SIZE must be positive",
            ));
        }

        if self.login.max_attempts == 0 || self.login.lockout_minutes <= 0 {
            return Err(config_error(
                "LOGIN_MAX_ATTEMPTS and LOGIN_LOCKOUT_MINUTES must be positive",
            ));
        }

        for tier in RateLimitTier::ALL {
            let policy = self.rate_limit.tiers.get(tier);
            if policy.max_requests == 0 || policy.window <= chrono::Duration::zero() {
                return Err(config_error(&format!(
                    "Rate limit tier '{}' needs a positive limit and window",
                    tier.as_str()
                )));
            }
        }

        if self.scheduler.monitor_interval_seconds == 0
            || self.scheduler.key_rotation_check_interval_seconds == 0
            || self.scheduler.rate_limit_sweep_interval_seconds == 0
        {
            return Err(config_error("Scheduler intervals must be positive"));
        }

        // In production, ensure stricter validation
        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error("Wildcard CORS origin not allowed in production"));
            }

            if self.encryption.kdf_iterations < DEFAULT_KDF_ITERATIONS {
                return Err(config_error(&format!(
                    "ENCRYPTION_KDF_ITERATIONS must be at least {} in production",
                    DEFAULT_KDF_ITERATIONS
                )));
            }

            if self.session.jwt_secret.expose_secret().len() < 32 {
                return Err(config_error("JWT_SECRET must be at least 32 bytes in production"));
            }

            if self.alerts.admin_email.is_none() || self.alerts.smtp.is_none() {
                tracing::warn!("ADMIN_EMAIL or SMTP_HOST not set - security alerts will not be emailed");
            }
        }

        Ok(())
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
    }
}

fn config_error(message: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(message.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("Invalid {}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
