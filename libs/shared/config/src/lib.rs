use std::env;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_token: String,
    pub redis_url: Option<String>,
    pub notification_gateway_url: Option<String>,
    pub utc_offset_minutes: i32,
    pub daily_batch_hour: u32,
    pub auto_assign_deadline: Duration,
    pub slot_granularity_minutes: u32,
    pub default_reminder_offsets: Vec<u32>,
    pub reminder_workers: u32,
    pub reminder_max_attempts: u32,
    pub reminder_retry_base_seconds: u64,
    /// How long a claimed reminder may stay active before another worker may take it.
    pub reminder_visibility_timeout_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_service_token: String::new(),
            redis_url: None,
            notification_gateway_url: None,
            utc_offset_minutes: 0,
            daily_batch_hour: 18,
            auto_assign_deadline: Duration::from_millis(5000),
            slot_granularity_minutes: 30,
            default_reminder_offsets: vec![24],
            reminder_workers: 2,
            reminder_max_attempts: 3,
            reminder_retry_base_seconds: 30,
            reminder_visibility_timeout_seconds: 1800,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

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
            supabase_service_token: env::var("SUPABASE_SERVICE_TOKEN")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_TOKEN not set, background jobs will use the anon key");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok(),
            notification_gateway_url: env::var("NOTIFICATION_GATEWAY_URL").ok(),
            utc_offset_minutes: parse_var("SCHEDULER_UTC_OFFSET_MINUTES", defaults.utc_offset_minutes),
            daily_batch_hour: parse_var("DAILY_REMINDER_HOUR", defaults.daily_batch_hour),
            auto_assign_deadline: Duration::from_millis(
                parse_var("AUTO_ASSIGN_DEADLINE_MS", defaults.auto_assign_deadline.as_millis() as u64),
            ),
            slot_granularity_minutes: parse_var("SLOT_GRANULARITY_MINUTES", defaults.slot_granularity_minutes),
            default_reminder_offsets: env::var("DEFAULT_REMINDER_OFFSETS_HOURS")
                .ok()
                .and_then(|raw| parse_offsets(&raw))
                .unwrap_or(defaults.default_reminder_offsets),
            reminder_workers: parse_var("REMINDER_WORKERS", defaults.reminder_workers),
            reminder_max_attempts: parse_var("REMINDER_MAX_ATTEMPTS", defaults.reminder_max_attempts),
            reminder_retry_base_seconds: parse_var("REMINDER_RETRY_BASE_SECONDS", defaults.reminder_retry_base_seconds),
            reminder_visibility_timeout_seconds: parse_var(
                "REMINDER_VISIBILITY_TIMEOUT_SECONDS",
                defaults.reminder_visibility_timeout_seconds,
            ),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing database environment variables");
        }
        if config.daily_batch_hour > 23 {
            warn!("DAILY_REMINDER_HOUR {} out of range, clamping to 23", config.daily_batch_hour);
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }

    pub fn redis_url(&self) -> String {
        self.redis_url
            .clone()
            .unwrap_or_else(|| "redis://localhost:6379".to_string())
    }

    /// The single canonical clinic clock. Appointment dates and `HH:MM` slots are
    /// interpreted in this offset.
    pub fn clinic_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| {
            warn!("Invalid UTC offset {} minutes, falling back to UTC", self.utc_offset_minutes);
            Utc.fix()
        })
    }

    pub fn batch_hour(&self) -> u32 {
        self.daily_batch_hour.min(23)
    }
}

fn parse_var<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn parse_offsets(raw: &str) -> Option<Vec<u32>> {
    let mut offsets: Vec<u32> = raw
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect();
    offsets.sort_unstable();
    offsets.dedup();
    if offsets.is_empty() {
        warn!("DEFAULT_REMINDER_OFFSETS_HOURS has no valid entries, using default");
        None
    } else {
        Some(offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offsets_sorts_and_dedups() {
        assert_eq!(parse_offsets("24, 2,24,x"), Some(vec![2, 24]));
        assert_eq!(parse_offsets("nope"), None);
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.auto_assign_deadline, Duration::from_secs(5));
        assert_eq!(config.slot_granularity_minutes, 30);
        assert_eq!(config.default_reminder_offsets, vec![24]);
        assert_eq!(config.clinic_offset().local_minus_utc(), 0);
        assert_eq!(config.redis_url(), "redis://localhost:6379");
    }

    #[test]
    fn test_clinic_offset_uses_minutes() {
        let config = AppConfig { utc_offset_minutes: 120, ..AppConfig::default() };
        assert_eq!(config.clinic_offset().local_minus_utc(), 7200);
    }
}
