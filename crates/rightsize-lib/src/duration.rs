//! Lookback duration strings such as `7d`, `2w`, `1w3d` or `90m`

use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::sync::OnceLock;
use std::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(?:\d+[wdhms])+$").expect("valid duration regex"))
}

fn component() -> &'static Regex {
    static COMPONENT: OnceLock<Regex> = OnceLock::new();
    COMPONENT.get_or_init(|| Regex::new(r"(\d+)([wdhms])").expect("valid component regex"))
}

/// Parse a compound duration string
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let trimmed = input.trim().to_lowercase();
    if !pattern().is_match(&trimmed) {
        return Err(ConfigError::Duration(input.to_string()));
    }

    let mut total: u64 = 0;
    for caps in component().captures_iter(&trimmed) {
        let value: u64 = caps[1]
            .parse()
            .map_err(|_| ConfigError::Duration(input.to_string()))?;
        let unit = match &caps[2] {
            "w" => WEEK,
            "d" => DAY,
            "h" => HOUR,
            "m" => MINUTE,
            _ => 1,
        };
        total = value
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| ConfigError::Duration(input.to_string()))?;
    }

    if total == 0 {
        return Err(ConfigError::Duration(input.to_string()));
    }

    Ok(Duration::from_secs(total))
}

/// Render a duration with the largest whole units, e.g. `1w3d`
pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if secs == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for (unit, suffix) in [(WEEK, 'w'), (DAY, 'd'), (HOUR, 'h'), (MINUTE, 'm'), (1, 's')] {
        if secs >= unit {
            out.push_str(&format!("{}{}", secs / unit, suffix));
            secs %= unit;
        }
    }
    out
}

/// Serde adapter for duration strings in config files and env vars
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(7 * DAY));
        assert_eq!(parse_duration("2w").unwrap(), Duration::from_secs(14 * DAY));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(DAY));
        assert_eq!(parse_duration("90m").unwrap(), Duration::from_secs(90 * MINUTE));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_compound() {
        assert_eq!(parse_duration("1w3d").unwrap(), Duration::from_secs(10 * DAY));
        assert_eq!(parse_duration("1d12h").unwrap(), Duration::from_secs(36 * HOUR));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("0d").is_err());
        assert!(parse_duration("7 days").is_err());
        assert!(parse_duration("7x").is_err());
        assert!(parse_duration("d7").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(7 * DAY)), "1w");
        assert_eq!(format_duration(Duration::from_secs(10 * DAY)), "1w3d");
        assert_eq!(format_duration(Duration::from_secs(90 * MINUTE)), "1h30m");
    }
}
