use std::env;
use tracing::warn;

const DEFAULT_MAX_WINDOW_DAYS: i64 = 370;
const DEFAULT_MAX_OCCURRENCES: usize = 1000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    /// Longest occurrence query window the API will expand, in days.
    pub schedule_max_window_days: i64,
    /// Hard cap on the number of occurrences returned by one expansion.
    pub schedule_max_occurrences: usize,
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
            schedule_max_window_days: parse_or_default(
                "SCHEDULE_MAX_WINDOW_DAYS",
                DEFAULT_MAX_WINDOW_DAYS,
            ),
            schedule_max_occurrences: parse_or_default(
                "SCHEDULE_MAX_OCCURRENCES",
                DEFAULT_MAX_OCCURRENCES,
            ),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    /// Configuration pointing at a specific store, with default schedule limits.
    pub fn for_store(supabase_url: impl Into<String>, supabase_anon_key: impl Into<String>) -> Self {
        Self {
            supabase_url: supabase_url.into(),
            supabase_anon_key: supabase_anon_key.into(),
            schedule_max_window_days: DEFAULT_MAX_WINDOW_DAYS,
            schedule_max_occurrences: DEFAULT_MAX_OCCURRENCES,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
