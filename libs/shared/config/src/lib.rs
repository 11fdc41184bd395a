use std::env;
use tracing::warn;

pub const DEFAULT_DATABASE_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_MISSED_CHECK_INTERVAL_MINUTES: u64 = 30;
pub const DEFAULT_API_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub database_timeout_seconds: u64,
    pub missed_appointment_check_interval_minutes: u64,
    pub fallback_store_enabled: bool,
    pub api_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: String::new(),
            database_timeout_seconds: DEFAULT_DATABASE_TIMEOUT_SECONDS,
            missed_appointment_check_interval_minutes: DEFAULT_MISSED_CHECK_INTERVAL_MINUTES,
            fallback_store_enabled: true,
            api_port: DEFAULT_API_PORT,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            database_timeout_seconds: parse_or_default(
                "DATABASE_TIMEOUT_SECONDS",
                DEFAULT_DATABASE_TIMEOUT_SECONDS,
            ),
            missed_appointment_check_interval_minutes: parse_or_default(
                "MISSED_APPOINTMENT_CHECK_INTERVAL_MINUTES",
                DEFAULT_MISSED_CHECK_INTERVAL_MINUTES,
            ),
            fallback_store_enabled: parse_or_default("FALLBACK_STORE_ENABLED", true),
            api_port: parse_or_default("API_PORT", DEFAULT_API_PORT),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = AppConfig::default();

        assert_eq!(config.database_timeout_seconds, 10);
        assert_eq!(config.missed_appointment_check_interval_minutes, 30);
        assert!(config.fallback_store_enabled);
        assert!(!config.is_configured());
    }

    #[test]
    fn test_parse_or_default_falls_back_on_garbage() {
        env::set_var("TELEHEALTH_TEST_INTERVAL", "not-a-number");
        assert_eq!(parse_or_default("TELEHEALTH_TEST_INTERVAL", 30u64), 30);

        env::set_var("TELEHEALTH_TEST_INTERVAL", " 5 ");
        assert_eq!(parse_or_default("TELEHEALTH_TEST_INTERVAL", 30u64), 5);

        env::remove_var("TELEHEALTH_TEST_INTERVAL");
        assert_eq!(parse_or_default("TELEHEALTH_TEST_INTERVAL", 30u64), 30);
    }
}
