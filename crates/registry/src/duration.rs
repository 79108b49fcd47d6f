//! Duration fields in the stack file accept either bare integers
//! (milliseconds) or strings with a unit suffix: `"250ms"`, `"5s"`, `"2m"`.

use std::fmt;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};

use crate::Error;

/// Parses a duration string with a `ms`, `s` or `m` suffix.
///
/// # Errors
///
/// Returns [`Error::InvalidDuration`] if the value has no recognised suffix
/// or a non-numeric magnitude.
pub fn parse_duration(value: &str) -> Result<Duration, Error> {
    let value = value.trim();

    let (digits, unit): (&str, fn(u64) -> Duration) = if let Some(d) = value.strip_suffix("ms") {
        (d, Duration::from_millis)
    } else if let Some(d) = value.strip_suffix('s') {
        (d, Duration::from_secs)
    } else if let Some(d) = value.strip_suffix('m') {
        (d, |n| Duration::from_secs(n * 60))
    } else {
        return Err(Error::InvalidDuration(
            value.to_string(),
            "expected a `ms`, `s` or `m` suffix",
        ));
    };

    digits
        .trim()
        .parse::<u64>()
        .map(unit)
        .map_err(|_| Error::InvalidDuration(value.to_string(), "magnitude is not a whole number"))
}

pub(crate) fn serialize<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Duration, D::Error> {
    struct DurationVisitor;

    impl Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("milliseconds or a string like \"5s\"")
        }

        fn visit_u64<E: de::Error>(self, millis: u64) -> Result<Duration, E> {
            Ok(Duration::from_millis(millis))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
            parse_duration(value).map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
