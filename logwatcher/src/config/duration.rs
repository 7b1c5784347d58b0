//! Serde support for durations written as `"1m30s"` strings or nanosecond integers.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer, de};

/// Parse a duration such as `"300ms"`, `"1.5s"` or `"1h2m3s"`.
pub fn parse(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {input:?}"))?;
        if number_len == 0 {
            return Err(format!("invalid duration {input:?}"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid number in duration {input:?}"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            unit => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
        };
        rest = &rest[unit_len..];
        total += value * nanos_per_unit;
    }

    Ok(Duration::from_nanos(total.round() as u64))
}

/// Render a duration in the same notation accepted by [`parse`].
pub fn format(duration: &Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return format!("{}ns", duration.as_nanos());
    }
    if duration.subsec_millis() != 0 || millis < 1000 {
        return format!("{millis}ms");
    }
    format!("{}s", duration.as_secs())
}

pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(duration))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Nanos(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Nanos(nanos) => Ok(Duration::from_nanos(nanos)),
        Raw::Text(text) => parse(&text).map_err(de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(parse("").is_err());
        assert!(parse("10").is_err());
        assert!(parse("s").is_err());
        assert!(parse("5 days").is_err());
        assert!(parse("3d").is_err());
    }

    #[test]
    fn test_format_is_parseable() {
        for d in [
            Duration::from_secs(1),
            Duration::from_millis(1500),
            Duration::from_millis(20),
            Duration::from_nanos(10),
        ] {
            assert_eq!(parse(&format(&d)).unwrap(), d);
        }
    }

    #[test]
    fn test_deserialize_number_as_nanoseconds() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(with = "crate::config::duration")]
            d: Duration,
        }
        let h: Holder = serde_json::from_str(r#"{"d": 1000000000}"#).unwrap();
        assert_eq!(h.d, Duration::from_secs(1));
        let h: Holder = serde_json::from_str(r#"{"d": "5s"}"#).unwrap();
        assert_eq!(h.d, Duration::from_secs(5));
    }
}
