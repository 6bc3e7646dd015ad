//! Graphite plaintext line parsing and rendering.
//!
//! One record per line: `metric_path value timestamp`, single-space separated.
//! Values are 64-bit floats with `NaN` and negative infinity rejected; a
//! timestamp of `-1` is replaced with the current wall-clock second at parse
//! time.

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// One metric sample travelling through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricMessage {
    pub path: String,
    pub value: f64,
    pub timestamp: i64,
}

impl MetricMessage {
    /// Render the sample back into wire form, newline terminated.
    pub fn wire_line(&self) -> String {
        format!("{} {} {}\n", self.path, self.value, self.timestamp)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("wrong number of fields in graphite message")]
    FieldCount,
    #[error("empty metric_path in graphite message")]
    EmptyPath,
    #[error("invalid value field in graphite message")]
    InvalidValue,
    #[error("invalid timestamp field in graphite message")]
    InvalidTimestamp,
}

/// Current wall-clock time in whole seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Parse one whitespace-trimmed Graphite plaintext line.
///
/// Exactly three space-separated fields are required. `NaN` and negative
/// infinity are rejected along with anything the float parser refuses.
pub fn parse_line(line: &str) -> Result<MetricMessage, ParseError> {
    let mut fields = line.split(' ');
    let path = fields.next().unwrap_or("");
    let value_field = fields.next().ok_or(ParseError::FieldCount)?;
    let timestamp_field = fields.next().ok_or(ParseError::FieldCount)?;
    if fields.next().is_some() {
        return Err(ParseError::FieldCount);
    }
    if path.is_empty() {
        return Err(ParseError::EmptyPath);
    }

    let value: f64 = value_field.parse().map_err(|_| ParseError::InvalidValue)?;
    if value.is_nan() || value == f64::NEG_INFINITY {
        return Err(ParseError::InvalidValue);
    }

    let mut timestamp: i64 = timestamp_field
        .parse()
        .map_err(|_| ParseError::InvalidTimestamp)?;
    if timestamp == -1 {
        timestamp = unix_now();
    }

    Ok(MetricMessage {
        path: path.to_string(),
        value,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_line() {
        let msg = parse_line("foo.bar.baz 1.5 1234567890").unwrap();
        assert_eq!(msg.path, "foo.bar.baz");
        assert_eq!(msg.value, 1.5);
        assert_eq!(msg.timestamp, 1234567890);
    }

    #[test]
    fn test_parse_negative_value_and_exponent() {
        let msg = parse_line("a -0.25 100").unwrap();
        assert_eq!(msg.value, -0.25);
        let msg = parse_line("a 1e3 100").unwrap();
        assert_eq!(msg.value, 1000.0);
    }

    #[test]
    fn test_parse_field_count() {
        assert_eq!(parse_line(""), Err(ParseError::FieldCount));
        assert_eq!(parse_line("a 1.0"), Err(ParseError::FieldCount));
        assert_eq!(parse_line("a 1.0 100 extra"), Err(ParseError::FieldCount));
        // Double space yields an empty field, so the count is off.
        assert_eq!(parse_line("a  1.0 100"), Err(ParseError::FieldCount));
    }

    #[test]
    fn test_parse_empty_path() {
        assert_eq!(parse_line(" 1.0 100"), Err(ParseError::EmptyPath));
    }

    #[test]
    fn test_parse_rejects_nan_and_negative_infinity() {
        assert_eq!(parse_line("a NaN 100"), Err(ParseError::InvalidValue));
        assert_eq!(parse_line("a nan 100"), Err(ParseError::InvalidValue));
        assert_eq!(parse_line("a -Inf 100"), Err(ParseError::InvalidValue));
        assert_eq!(parse_line("a -inf 100"), Err(ParseError::InvalidValue));
        assert_eq!(parse_line("a nope 100"), Err(ParseError::InvalidValue));
    }

    #[test]
    fn test_parse_accepts_positive_infinity() {
        let msg = parse_line("a Inf 100").unwrap();
        assert_eq!(msg.value, f64::INFINITY);
        let msg = parse_line("a +inf 100").unwrap();
        assert_eq!(msg.value, f64::INFINITY);
    }

    #[test]
    fn test_parse_invalid_timestamp() {
        assert_eq!(parse_line("a 1.0 12.5"), Err(ParseError::InvalidTimestamp));
        assert_eq!(parse_line("a 1.0 soon"), Err(ParseError::InvalidTimestamp));
    }

    #[test]
    fn test_parse_substitutes_current_time_for_minus_one() {
        let before = unix_now();
        let msg = parse_line("a 1.0 -1").unwrap();
        let after = unix_now();
        assert!(msg.timestamp >= before && msg.timestamp <= after);
    }

    #[test]
    fn test_wire_line_round_trip() {
        let msg = parse_line("some.path 10.5 1600000000").unwrap();
        assert_eq!(msg.wire_line(), "some.path 10.5 1600000000\n");
        let again = parse_line(msg.wire_line().trim()).unwrap();
        assert_eq!(again, msg);
    }

    #[test]
    fn test_wire_line_integral_value() {
        let msg = MetricMessage {
            path: "a".into(),
            value: 10.0,
            timestamp: 100,
        };
        assert_eq!(msg.wire_line(), "a 10 100\n");
    }
}
