//! Typed values for structured log fields
//!
//! Field values go through [`Valuer`] so every value reaching the log sink renders the same
//! way, whatever its source type. Render with `%` in `tracing` macros:
//!
//! ```
//! use std::time::Duration;
//! use mysql_testdb::logging::{Fields, Valuer};
//!
//! let fields = Fields::new()
//!     .with("database", "testabc")
//!     .with("elapsed", Duration::from_millis(1500));
//! tracing::info!(fields = %fields, "created database");
//! assert_eq!(fields.to_string(), "database=testabc elapsed=1.5s");
//! assert_eq!(Valuer::byte_base64(b"\xfb\xff").to_string(), "-_8");
//! ```

use std::{
    fmt::{self, Display, Write},
    time::Duration,
};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, SecondsFormat, TimeZone};

/// A log field value
#[derive(Clone, Debug, PartialEq)]
pub enum Valuer {
    /// Text
    String(String),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float64(f64),
    /// Boolean
    Bool(bool),
}

impl Valuer {
    /// Text value
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    /// Integer value
    #[must_use]
    pub fn int(value: i64) -> Self {
        Self::Int(value)
    }

    /// Floating point value
    #[must_use]
    pub fn float64(value: f64) -> Self {
        Self::Float64(value)
    }

    /// Boolean value
    #[must_use]
    pub fn bool(value: bool) -> Self {
        Self::Bool(value)
    }

    /// Duration rendered as `1h2m3.5s`, `1.5ms`, `0s`
    #[must_use]
    pub fn duration(value: Duration) -> Self {
        Self::String(format_duration(value))
    }

    /// Timestamp rendered as RFC 3339 with trailing fractional zeros dropped, e.g. `05.5Z`
    #[must_use]
    pub fn time<Tz: TimeZone>(value: &DateTime<Tz>) -> Self
    where
        Tz::Offset: Display,
    {
        let rendered = value.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let Some(dot) = rendered.find('.') else {
            return Self::String(rendered);
        };
        let (whole, rest) = rendered.split_at(dot);
        let (fraction, zone) = rest[1..].split_at(9);
        let fraction = fraction.trim_end_matches('0');
        if fraction.is_empty() {
            Self::String(format!("{whole}{zone}"))
        } else {
            Self::String(format!("{whole}.{fraction}{zone}"))
        }
    }

    /// Timestamp rendered with a `strftime` format
    #[must_use]
    pub fn time_formatted<Tz: TimeZone>(value: &DateTime<Tz>, format: &str) -> Self
    where
        Tz::Offset: Display,
    {
        Self::String(value.format(format).to_string())
    }

    /// Bytes as text, invalid UTF-8 replaced
    #[must_use]
    pub fn byte_string(value: &[u8]) -> Self {
        Self::String(String::from_utf8_lossy(value).into_owned())
    }

    /// Bytes as unpadded URL-safe base64
    #[must_use]
    pub fn byte_base64(value: &[u8]) -> Self {
        Self::String(URL_SAFE_NO_PAD.encode(value))
    }

    /// Anything with a display form
    #[must_use]
    pub fn stringer(value: &impl Display) -> Self {
        Self::String(value.to_string())
    }
}

impl Display for Valuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) => f.write_str(value),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float64(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for Valuer {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<String> for Valuer {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Valuer {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for Valuer {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for Valuer {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<bool> for Valuer {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Duration> for Valuer {
    fn from(value: Duration) -> Self {
        Self::duration(value)
    }
}

/// Ordered `key=value` pairs logged as one field
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fields(Vec<(String, Valuer)>);

impl Fields {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pair, replacing an earlier value under the same key
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Valuer>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.0.push((key, value)),
        }
        self
    }

    /// Value under `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Valuer> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Number of pairs
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no pairs
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_char(' ')?;
            }
            let value = value.to_string();
            if value.is_empty() || value.contains([' ', '=', '"']) {
                write!(f, "{key}={value:?}")?;
            } else {
                write!(f, "{key}={value}")?;
            }
        }
        Ok(())
    }
}

fn format_duration(value: Duration) -> String {
    const MICROSECOND: u128 = 1_000;
    const MILLISECOND: u128 = 1_000_000;
    const SECOND: u128 = 1_000_000_000;
    const MINUTE: u128 = 60 * SECOND;
    const HOUR: u128 = 60 * MINUTE;

    let nanos = value.as_nanos();
    match nanos {
        0 => "0s".to_owned(),
        n if n < MICROSECOND => format!("{n}ns"),
        n if n < MILLISECOND => format!("{}µs", decimal(n, MICROSECOND)),
        n if n < SECOND => format!("{}ms", decimal(n, MILLISECOND)),
        n => {
            let hours = n / HOUR;
            let minutes = n % HOUR / MINUTE;
            let seconds = decimal(n % MINUTE, SECOND);
            let mut out = String::new();
            if hours > 0 {
                let _ = write!(out, "{hours}h");
            }
            if hours > 0 || minutes > 0 {
                let _ = write!(out, "{minutes}m");
            }
            let _ = write!(out, "{seconds}s");
            out
        }
    }
}

/// `value / unit` with trailing fractional zeros dropped
fn decimal(value: u128, unit: u128) -> String {
    let whole = value / unit;
    let fraction = value % unit;
    if fraction == 0 {
        return whole.to_string();
    }
    let width = unit.ilog10() as usize;
    let digits = format!("{fraction:0width$}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::time::Duration;

    use chrono::{FixedOffset, TimeZone, Timelike, Utc};

    use super::{Fields, Valuer, format_duration};

    #[test]
    fn renders_durations() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_nanos(999)), "999ns");
        assert_eq!(format_duration(Duration::from_nanos(1_500)), "1.5µs");
        assert_eq!(format_duration(Duration::from_micros(2_250)), "2.25ms");
        assert_eq!(format_duration(Duration::from_millis(1_500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(3_600)), "1h0m0s");
        assert_eq!(format_duration(Duration::from_millis(3_723_500)), "1h2m3.5s");
    }

    #[test]
    fn renders_times() {
        let t = Utc.with_ymd_and_hms(2024, 3, 9, 17, 4, 5).unwrap();
        assert_eq!(Valuer::time(&t).to_string(), "2024-03-09T17:04:05Z");

        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let t = offset.with_ymd_and_hms(2024, 3, 9, 17, 4, 5).unwrap();
        assert_eq!(Valuer::time(&t).to_string(), "2024-03-09T17:04:05+02:00");

        let at = |nanos| {
            Utc.with_ymd_and_hms(2024, 3, 9, 17, 4, 5)
                .unwrap()
                .with_nanosecond(nanos)
                .unwrap()
        };
        assert_eq!(Valuer::time(&at(500_000_000)).to_string(), "2024-03-09T17:04:05.5Z");
        assert_eq!(Valuer::time(&at(1_000)).to_string(), "2024-03-09T17:04:05.000001Z");
        assert_eq!(
            Valuer::time(&at(123_456_789)).to_string(),
            "2024-03-09T17:04:05.123456789Z"
        );
        let t = t.with_nanosecond(250_000_000).unwrap();
        assert_eq!(Valuer::time(&t).to_string(), "2024-03-09T17:04:05.25+02:00");
        assert_eq!(
            Valuer::time_formatted(&t, "%Y/%m/%d").to_string(),
            "2024/03/09"
        );
    }

    #[test]
    fn renders_bytes() {
        assert_eq!(Valuer::byte_string(b"hello").to_string(), "hello");
        assert_eq!(Valuer::byte_string(b"a\xffb").to_string(), "a\u{fffd}b");
        assert_eq!(Valuer::byte_base64(b"hello?").to_string(), "aGVsbG8_");
    }

    #[test]
    fn renders_scalars() {
        assert_eq!(Valuer::string("x").to_string(), "x");
        assert_eq!(Valuer::int(-4).to_string(), "-4");
        assert_eq!(Valuer::float64(1.25).to_string(), "1.25");
        assert_eq!(Valuer::bool(true).to_string(), "true");
        assert_eq!(Valuer::stringer(&std::net::Ipv4Addr::LOCALHOST).to_string(), "127.0.0.1");
    }

    #[test]
    fn fields_keep_order_and_quote_when_needed() {
        let fields = Fields::new()
            .with("database", "testabc")
            .with("count", 2i64)
            .with("message", "two words")
            .with("empty", "")
            .with("count", 3u32);

        assert_eq!(fields.len(), 4);
        assert_eq!(fields.get("count"), Some(&Valuer::Int(3)));
        assert_eq!(
            fields.to_string(),
            r#"database=testabc count=3 message="two words" empty="""#
        );
        assert!(Fields::new().is_empty());
    }
}
