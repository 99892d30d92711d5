use std::{env, path::PathBuf, str::FromStr, time::Duration};

use crate::model::PriceField;

pub const DEFAULT_YAHOO_BASE: &str = "https://query1.finance.yahoo.com";
/// Longest trailing window accepted from flags or the environment.
pub const MAX_RANGE_DAYS: u32 = 36_500;

/// Runtime settings, read once at startup and passed down by reference.
#[derive(Debug, Clone)]
pub struct BoardConfig {
    /// Length of the trailing fetch window, within `1..=MAX_RANGE_DAYS`.
    pub range_days: u32,
    pub cache_ttl: Duration,
    pub price_field: PriceField,
    pub yahoo_base: String,
    /// Directory of `{source_key}.csv` files for the offline source.
    pub data_dir: PathBuf,
    pub http_timeout: Duration,
    pub fetch_attempts: u32,
    pub backfill: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            range_days: 365 * 3,
            cache_ttl: Duration::from_secs(3600),
            price_field: PriceField::AdjClose,
            yahoo_base: DEFAULT_YAHOO_BASE.to_string(),
            data_dir: PathBuf::from("./data"),
            http_timeout: Duration::from_secs(15),
            fetch_attempts: 3,
            backfill: false,
        }
    }
}

fn env_str(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Unset or unparsable values fall back to `default`.
fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(name, default.as_secs()))
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"))
        .unwrap_or(default)
}

fn clamp_range_days(days: u64) -> u32 {
    days.clamp(1, MAX_RANGE_DAYS as u64) as u32
}

impl BoardConfig {
    pub fn from_env() -> Self {
        let d = Self::default();

        let price_field = env::var("BOARD_PRICE_FIELD")
            .ok()
            .and_then(|s| PriceField::parse(&s))
            .unwrap_or(d.price_field);

        Self {
            range_days: clamp_range_days(env_parse("BOARD_RANGE_DAYS", d.range_days as u64)),
            cache_ttl: env_secs("BOARD_CACHE_TTL_SECS", d.cache_ttl),
            price_field,
            yahoo_base: env_str("BOARD_YAHOO_BASE", &d.yahoo_base),
            data_dir: PathBuf::from(env_str("BOARD_DATA_DIR", &d.data_dir.to_string_lossy())),
            http_timeout: env_secs("BOARD_HTTP_TIMEOUT_SECS", d.http_timeout),
            fetch_attempts: env_parse("BOARD_FETCH_ATTEMPTS", d.fetch_attempts).max(1),
            backfill: env_bool("BOARD_BACKFILL", d.backfill),
        }
    }

    pub fn with_range_days(mut self, days: u32) -> Self {
        self.range_days = clamp_range_days(days as u64);
        self
    }

    pub fn with_backfill(mut self, value: bool) -> Self {
        self.backfill = value;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_price_field(mut self, field: PriceField) -> Self {
        self.price_field = field;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::{env, time::Duration};

    use super::{clamp_range_days, env_parse, env_secs, BoardConfig, MAX_RANGE_DAYS};
    use crate::model::PriceField;

    #[test]
    fn unittest_defaults_match_dashboard_window() {
        let config = BoardConfig::default();

        assert_eq!(config.range_days, 1095);
        assert_eq!(config.cache_ttl.as_secs(), 3600);
        assert_eq!(config.price_field, PriceField::AdjClose);
        assert!(!config.backfill);
    }

    #[test]
    fn unittest_builder_overrides() {
        let config = BoardConfig::default()
            .with_range_days(30)
            .with_backfill(true)
            .with_price_field(PriceField::Close);

        assert_eq!(config.range_days, 30);
        assert!(config.backfill);
        assert_eq!(config.price_field, PriceField::Close);
    }

    #[test]
    fn unittest_env_parse_falls_back() {
        env::set_var("BOARD_UNITTEST_ATTEMPTS", " 7 ");
        env::set_var("BOARD_UNITTEST_TTL", "soon");

        assert_eq!(env_parse("BOARD_UNITTEST_ATTEMPTS", 3u32), 7);
        assert_eq!(env_parse("BOARD_UNITTEST_UNSET", 3u32), 3);
        assert_eq!(
            env_secs("BOARD_UNITTEST_TTL", Duration::from_secs(60)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn unittest_range_days_bounded() {
        assert_eq!(clamp_range_days(u64::MAX), MAX_RANGE_DAYS);
        assert_eq!(clamp_range_days(0), 1);
        assert_eq!(BoardConfig::default().with_range_days(u32::MAX).range_days, MAX_RANGE_DAYS);
        assert_eq!(BoardConfig::default().with_range_days(0).range_days, 1);
    }
}
