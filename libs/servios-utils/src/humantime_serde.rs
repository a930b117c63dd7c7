//! Serde adapters for human-readable durations.
//!
//! Configuration files spell timeouts as `"10s"`, `"1500ms"` or `"2m"`. Plain
//! integers are accepted as milliseconds so that values copied from
//! environment variables such as `SERVIOS_TIMEOUT=10000` keep working.
//!
//! ```
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Settings {
//!     #[serde(with = "servios_utils::humantime_serde")]
//!     timeout: Duration,
//! }
//!
//! let s: Settings = serde_json::from_str(r#"{"timeout":"250ms"}"#).unwrap();
//! assert_eq!(s.timeout, Duration::from_millis(250));
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserializer, Serializer, de};

/// Deserializes a `Duration` from a humantime string or a millisecond count.
///
/// # Errors
/// Fails when the input is neither a valid humantime string nor a
/// non-negative integer.
pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    d.deserialize_any(DurationVisitor)
}

/// Serializes a `Duration` as a humantime string (`"10s"`).
///
/// # Errors
/// Propagates serializer failures.
pub fn serialize<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.collect_str(&humantime::format_duration(*d))
}

struct DurationVisitor;

impl de::Visitor<'_> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a duration such as \"10s\" or a number of milliseconds")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
        let trimmed = v.trim();
        if let Ok(millis) = trimmed.parse::<u64>() {
            return Ok(Duration::from_millis(millis));
        }
        humantime::parse_duration(trimmed).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
        Ok(Duration::from_millis(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
        u64::try_from(v)
            .map(Duration::from_millis)
            .map_err(|_| E::custom("duration must not be negative"))
    }
}
