//! Fixed-width text records.
//!
//! Each sample is stored as one line:
//!
//! ```text
//! <delta, left-aligned in 22 chars><space><value, right-aligned in 25 chars, 9 decimals>\n
//! ```
//!
//! The delta is the difference between this sample's timestamp and the
//! previous one in write order (0 for the first sample). Fixed columns let
//! the parser slice fields by position instead of tokenizing.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const DELTA_WIDTH: usize = 22;
pub const VALUE_WIDTH: usize = 25;
pub const VALUE_PRECISION: usize = 9;
/// Length of one record including the trailing newline, for values that fit
/// the value column.
pub const RECORD_LEN: usize = DELTA_WIDTH + 1 + VALUE_WIDTH + 1;

/// One measurement: nanosecond timestamp and value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A decoded record before delta replay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    pub delta: i64,
    pub value: f64,
}

pub fn encode_record(delta: i64, value: f64) -> String {
    format!(
        "{:<dw$} {:>vw$.prec$}\n",
        delta,
        value,
        dw = DELTA_WIDTH,
        vw = VALUE_WIDTH,
        prec = VALUE_PRECISION
    )
}

/// Decode one line (with or without its newline). `line_no` is 1-based and
/// only used for error reporting.
pub fn decode_record(line: &[u8], line_no: u64) -> Result<Record> {
    let line = std::str::from_utf8(line)
        .map_err(|err| Error::parse(line_no, format!("record is not UTF-8: {err}")))?;
    let line = line.trim_end_matches(['\n', '\r']);
    let delta_field = line
        .get(..DELTA_WIDTH)
        .ok_or_else(|| Error::parse(line_no, "record shorter than delta column"))?;
    let rest = &line[DELTA_WIDTH..];
    let value_field = rest
        .strip_prefix(' ')
        .ok_or_else(|| Error::parse(line_no, "missing field separator"))?;

    let delta = delta_field
        .trim()
        .parse::<i64>()
        .map_err(|err| Error::parse(line_no, format!("timestamp delta {delta_field:?}: {err}")))?;
    let value = value_field
        .trim()
        .parse::<f64>()
        .map_err(|err| Error::parse(line_no, format!("value {value_field:?}: {err}")))?;

    Ok(Record { delta, value })
}

/// Side files hold a single absolute timestamp as decimal text.
pub fn encode_timestamp(timestamp: i64) -> String {
    timestamp.to_string()
}

pub fn decode_timestamp(text: &str) -> Result<i64> {
    text.trim()
        .parse::<i64>()
        .map_err(|err| Error::parse(0, format!("side-file timestamp {text:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_fixed_width() {
        let line = encode_record(0, 99.0);
        assert_eq!(line.len(), RECORD_LEN);
        assert_eq!(&line[..DELTA_WIDTH], "0                     ");
        assert_eq!(&line[DELTA_WIDTH + 1..], "            99.000000000\n");

        let line = encode_record(-1_500_000_000, 75.11);
        assert_eq!(line.len(), RECORD_LEN);
    }

    #[test]
    fn decode_reads_positional_fields() {
        let record = decode_record(encode_record(1_000_000_000, 75.11).as_bytes(), 1).unwrap();
        assert_eq!(record.delta, 1_000_000_000);
        assert_eq!(record.value, 75.11);

        let record = decode_record(encode_record(i64::MIN, -0.5).as_bytes(), 1).unwrap();
        assert_eq!(record.delta, i64::MIN);
        assert_eq!(record.value, -0.5);
    }

    #[test]
    fn oversized_values_widen_the_column() {
        let line = encode_record(7, 1.0e20);
        assert!(line.len() > RECORD_LEN);
        let record = decode_record(line.as_bytes(), 1).unwrap();
        assert_eq!(record.delta, 7);
        assert_eq!(record.value, 1.0e20);
    }

    #[test]
    fn values_keep_nine_decimals() {
        let record = decode_record(encode_record(0, 0.1234567894).as_bytes(), 1).unwrap();
        assert_eq!(record.value, 0.123456789);
    }

    #[test]
    fn malformed_records_report_line() {
        match decode_record(b"12 3.5", 4) {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 4),
            other => panic!("expected parse error, got {other:?}"),
        }

        let bad_delta = format!("{:<22} {:>25}", "12x", "1.0");
        assert!(matches!(decode_record(bad_delta.as_bytes(), 2), Err(Error::Parse { .. })));

        let bad_value = format!("{:<22} {:>25}", "12", "abc");
        assert!(matches!(decode_record(bad_value.as_bytes(), 2), Err(Error::Parse { .. })));

        let no_separator = format!("{:<22}{}", "12", "1.0");
        assert!(matches!(decode_record(no_separator.as_bytes(), 2), Err(Error::Parse { .. })));
    }

    #[test]
    fn non_utf8_record_is_parse_error() {
        let mut line = encode_record(5, 1.0).into_bytes();
        line[DELTA_WIDTH + 3] = 0xff;
        match decode_record(&line, 7) {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 7),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn side_file_timestamps() {
        assert_eq!(decode_timestamp("1411940889515410774\n").unwrap(), 1411940889515410774);
        assert_eq!(encode_timestamp(-5), "-5");
        assert!(decode_timestamp("").is_err());
    }
}
