use std::{env, time::Duration};

use crate::error::ConfigError;

/// Pool bounds shared by every connection the crate opens
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolSettings {
    pub(crate) timeout: Duration,
    pub(crate) max_connections: u32,
}

impl PoolSettings {
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    const DEFAULT_MAX_CONNECTIONS: u32 = 16;

    /// Creates pool settings with defaults
    /// # Defaults
    /// - Timeout: 30s
    /// - Max connections: 16
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: Self::DEFAULT_TIMEOUT,
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Creates pool settings from environment variables
    /// # Environment variables
    /// - `MYSQL_TIMEOUT`: duration such as `30s`, `500ms` or `1m30s`, bare numbers are seconds
    /// - `MYSQL_MAX_CONNECTIONS`: positive integer, anything else keeps the default
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let timeout = match lookup("MYSQL_TIMEOUT") {
            Some(value) if !value.is_empty() => {
                parse_duration(&value).ok_or(ConfigError::InvalidTimeout(value))?
            }
            _ => Self::DEFAULT_TIMEOUT,
        };

        let max_connections = match lookup("MYSQL_MAX_CONNECTIONS") {
            Some(value) if !value.is_empty() => match value.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    tracing::warn!(
                        value = %value,
                        default = Self::DEFAULT_MAX_CONNECTIONS,
                        "ignoring invalid MYSQL_MAX_CONNECTIONS"
                    );
                    Self::DEFAULT_MAX_CONNECTIONS
                }
            },
            _ => Self::DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            timeout,
            max_connections,
        })
    }

    /// Sets a new timeout
    #[must_use]
    pub fn timeout(self, value: Duration) -> Self {
        Self {
            timeout: value,
            ..self
        }
    }

    /// Sets a new maximum number of open connections
    #[must_use]
    pub fn max_connections(self, value: u32) -> Self {
        Self {
            max_connections: value,
            ..self
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses `1h2m3.5s` style durations; a bare number is taken as seconds
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut nanos = 0f64;
    let mut rest = value;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let number = rest[..number_len].parse::<f64>().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        nanos += number * scale;
    }

    Duration::try_from_secs_f64(nanos.round() / 1e9).ok()
}
