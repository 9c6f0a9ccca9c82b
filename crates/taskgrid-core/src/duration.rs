//! Human-readable duration strings ("500ms", "30s", "5m").
//!
//! Config files and task submissions carry durations as strings. A bare
//! number, quoted or not, is read as seconds. Sub-millisecond values use
//! "us" and "ns" so formatting is exact.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Parse a duration string like "5s", "500ms", "1m". Out-of-range values
/// are rejected.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (digits, nanos_per_unit) = if let Some(n) = s.strip_suffix("ns") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix("us") {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix("ms") {
        (n, 1_000_000)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, NANOS_PER_SEC)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60 * NANOS_PER_SEC)
    } else {
        (s, NANOS_PER_SEC)
    };
    let count = digits.trim().parse::<u128>().ok()?;
    from_nanos(count.checked_mul(nanos_per_unit)?)
}

fn from_nanos(nanos: u128) -> Option<Duration> {
    let secs = u64::try_from(nanos / NANOS_PER_SEC).ok()?;
    Some(Duration::new(secs, (nanos % NANOS_PER_SEC) as u32))
}

/// Render a duration in the largest exact unit `parse_duration` accepts.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos > 0 && nanos % (60 * NANOS_PER_SEC) == 0 {
        format!("{}m", nanos / (60 * NANOS_PER_SEC))
    } else if nanos % NANOS_PER_SEC == 0 {
        format!("{}s", nanos / NANOS_PER_SEC)
    } else if nanos % 1_000_000 == 0 {
        format!("{}ms", nanos / 1_000_000)
    } else if nanos % 1_000 == 0 {
        format!("{}us", nanos / 1_000)
    } else {
        format!("{nanos}ns")
    }
}

/// Wire form: a unit string, or a bare integer of seconds.
#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Secs(u64),
    Text(String),
}

impl Raw {
    fn into_duration<E: serde::de::Error>(self) -> Result<Duration, E> {
        match self {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(raw) => parse_duration(&raw)
                .ok_or_else(|| E::custom(format!("invalid duration: {raw:?}"))),
        }
    }
}

/// `#[serde(with = "duration::string")]` for `Duration` fields.
pub mod string {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Raw::deserialize(d)?.into_duration()
    }
}

/// `#[serde(with = "duration::option")]` for `Option<Duration>` fields.
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&format_duration(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<Raw>::deserialize(d)?
            .map(Raw::into_duration)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
    }

    #[test]
    fn parse_duration_milliseconds() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
    }

    #[test]
    fn parse_duration_minutes() {
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn parse_duration_plain_number_as_seconds() {
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn parse_duration_sub_millisecond() {
        assert_eq!(parse_duration("1500us"), Some(Duration::from_micros(1500)));
        assert_eq!(parse_duration("42ns"), Some(Duration::from_nanos(42)));
    }

    #[test]
    fn parse_duration_rejects_overflow() {
        assert_eq!(parse_duration("307445734561825861m"), None);
        assert_eq!(parse_duration("18446744073709551615m"), None);
        assert_eq!(
            parse_duration("18446744073709551615s"),
            Some(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn format_picks_largest_exact_unit() {
        assert_eq!(format_duration(Duration::from_secs(300)), "5m");
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::from_micros(2250)), "2250us");
        assert_eq!(format_duration(Duration::new(1, 7)), "1000000007ns");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn format_is_exact() {
        for d in [
            Duration::new(3, 123_456_789),
            Duration::from_micros(999),
            Duration::from_secs(3600),
            Duration::new(u64::MAX, 999_999_999),
        ] {
            assert_eq!(parse_duration(&format_duration(d)), Some(d));
        }
    }

    #[derive(Debug, Deserialize)]
    struct Limits {
        #[serde(with = "string")]
        timeout: Duration,
        #[serde(default, with = "option")]
        grace: Option<Duration>,
    }

    #[test]
    fn deserialize_accepts_bare_seconds() {
        let json: Limits = serde_json::from_str(r#"{ "timeout": 5, "grace": 2 }"#).unwrap();
        assert_eq!(json.timeout, Duration::from_secs(5));
        assert_eq!(json.grace, Some(Duration::from_secs(2)));

        let toml: Limits = toml::from_str("timeout = 30\ngrace = \"250ms\"\n").unwrap();
        assert_eq!(toml.timeout, Duration::from_secs(30));
        assert_eq!(toml.grace, Some(Duration::from_millis(250)));
    }

    #[test]
    fn deserialize_rejects_bad_values() {
        assert!(serde_json::from_str::<Limits>(r#"{ "timeout": "soon" }"#).is_err());
        assert!(serde_json::from_str::<Limits>(r#"{ "timeout": -3 }"#).is_err());
        let none: Limits = serde_json::from_str(r#"{ "timeout": "1m", "grace": null }"#).unwrap();
        assert_eq!(none.grace, None);
    }
}
