use std::time::Duration;

use anyhow::{Context, Result};

use crate::services::power::{RetryPolicy, POWER_BASE_URL};

#[derive(Debug, Clone)]
pub struct ClimateConfig {
    pub database_url: String,
    pub power_base_url: String,
    pub power_community: String,
    pub power_timeout_seconds: u64,
    pub power_retry_attempts: u32,
    pub power_retry_base_delay_ms: u64,
    pub power_retry_multiplier: f64,
    pub session_ttl_hours: i64,
}

impl ClimateConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("CLIMATE_DATABASE_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .context("CLIMATE_DATABASE_URL must be set")?;
        let database_url = normalize_database_url(database_url);

        Ok(Self {
            database_url,
            power_base_url: env_string("CLIMATE_POWER_BASE_URL", POWER_BASE_URL),
            power_community: env_string("CLIMATE_POWER_COMMUNITY", "RE"),
            power_timeout_seconds: env_u64("CLIMATE_POWER_TIMEOUT_SECONDS", 30).clamp(1, 300),
            power_retry_attempts: env_u32("CLIMATE_POWER_RETRY_ATTEMPTS", 3).clamp(1, 10),
            power_retry_base_delay_ms: env_u64("CLIMATE_POWER_RETRY_BASE_DELAY_MS", 1600)
                .clamp(1, 60_000),
            power_retry_multiplier: env_f64("CLIMATE_POWER_RETRY_MULTIPLIER", 1.6).clamp(1.0, 10.0),
            session_ttl_hours: env_u64("CLIMATE_SESSION_TTL_HOURS", 24).clamp(1, 24 * 30) as i64,
        })
    }

    pub fn power_timeout(&self) -> Duration {
        Duration::from_secs(self.power_timeout_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.power_retry_attempts,
            base_delay: Duration::from_millis(self.power_retry_base_delay_ms),
            multiplier: self.power_retry_multiplier,
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
}

// SQLAlchemy-style URLs show up in shared deployment configs.
fn normalize_database_url(url: String) -> String {
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+asyncpg://") {
        return format!("postgresql://{stripped}");
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_sqlalchemy_database_urls() {
        assert_eq!(
            normalize_database_url("postgresql+psycopg://u@h/db".to_string()),
            "postgresql://u@h/db"
        );
        assert_eq!(
            normalize_database_url("postgresql+asyncpg://u@h/db".to_string()),
            "postgresql://u@h/db"
        );
        assert_eq!(
            normalize_database_url("postgresql://u@h/db".to_string()),
            "postgresql://u@h/db"
        );
    }

    #[test]
    fn retry_policy_maps_config_fields() {
        let config = crate::test_support::test_config();
        let policy = config.retry_policy();
        assert_eq!(policy.attempts, 2);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
        assert_eq!(policy.multiplier, 1.5);
    }
}
