//! Sensor line protocol decoder
//!
//! Each notification carries one text line:
//!
//! ```text
//! 42,T:21.5,H:55,P:1013.2,IAQ:1.0,CO2:450,Gas:1200,Batt:88
//! ```
//!
//! The match is anchored at the start of the payload. Bytes after a complete
//! match are tolerated and reported back in [`Decoded::trailing`].

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};

use crate::Sample;

static LINE: LazyLock<Regex> = LazyLock::new(|| {
    let dec = r"(-?(?:\d+\.?\d*|\.\d+))";
    let pattern = format!(
        r"^(\d+),T:{dec},H:(\d+),P:{dec},IAQ:{dec},CO2:(\d+),Gas:(\d+),Batt:(\d+)"
    );
    Regex::new(&pattern).expect("line grammar is a valid regex")
});

/// A payload that could not be decoded into a [`Sample`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8 ({len} bytes)")]
    NotUtf8 { len: usize },
    #[error("payload does not match the sensor line format: {raw:?}")]
    Malformed { raw: String },
}

/// A successfully decoded line
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub sample: Sample,
    /// Unmatched text following the recognised line, usually empty
    pub trailing: String,
}

/// Decode a payload, stamping the sample with the current time
pub fn decode(payload: &[u8]) -> Result<Decoded, DecodeError> {
    decode_at(payload, Utc::now())
}

/// Decode a payload, stamping the sample with `observed_at`
pub fn decode_at(payload: &[u8], observed_at: DateTime<Utc>) -> Result<Decoded, DecodeError> {
    let text =
        std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8 { len: payload.len() })?;

    let malformed = || DecodeError::Malformed {
        raw: text.to_string(),
    };

    let caps = LINE.captures(text).ok_or_else(malformed)?;
    let matched_len = caps.get(0).map_or(0, |m| m.end());

    let sample = (|| {
        Some(Sample {
            sequence_id: integer(&caps, 1)?,
            temperature: decimal(&caps, 2)?,
            humidity: integer(&caps, 3)?,
            pressure: decimal(&caps, 4)?,
            air_quality_index: decimal(&caps, 5)?,
            co2: integer(&caps, 6)?,
            gas_resistance: integer(&caps, 7)?,
            battery: integer(&caps, 8)?,
            observed_at,
        })
    })()
    .ok_or_else(malformed)?;

    Ok(Decoded {
        sample,
        trailing: text[matched_len..].to_string(),
    })
}

/// Unsigned integer field; `None` when it does not fit the sink's `i64`
fn integer(caps: &Captures<'_>, index: usize) -> Option<u64> {
    // the capture is all digits, so overflow is the only failure
    let value: u64 = caps[index].parse().ok()?;
    i64::try_from(value).is_ok().then_some(value)
}

/// Decimal field; `None` when it overflows to infinity
fn decimal(caps: &Captures<'_>, index: usize) -> Option<f64> {
    let raw = &caps[index];
    let value: f64 = raw.parse().unwrap_or_else(|e| {
        panic!("line grammar admitted unparsable decimal {index} ({raw:?}): {e:?}")
    });
    value.is_finite().then_some(value)
}
