//! InfluxDB line protocol points

use chrono::{DateTime, Utc};
use senselink_proto::FieldValue;

/// A single measurement row: name, fields and a nanosecond timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub fields: Vec<(String, FieldValue)>,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    pub fn new(measurement: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            fields: Vec::new(),
            timestamp,
        }
    }

    pub fn from_fields(
        measurement: impl Into<String>,
        fields: &[(&'static str, FieldValue)],
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            measurement: measurement.into(),
            fields: fields.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
            timestamp,
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    /// Render as one line of InfluxDB line protocol.
    ///
    /// Non-finite floats have no line protocol form and are dropped. Returns
    /// `None` when no field is left to write.
    pub fn to_line(&self) -> Option<String> {
        let mut line = escape(&self.measurement, &[',', ' ']);
        let mut written = 0;
        for (name, value) in &self.fields {
            let rendered = match value {
                FieldValue::Integer(v) => format!("{v}i"),
                FieldValue::Float(v) if v.is_finite() => v.to_string(),
                FieldValue::Float(v) => {
                    tracing::warn!(
                        measurement = %self.measurement,
                        field = %name,
                        value = %v,
                        "dropping non-finite field"
                    );
                    continue;
                }
            };
            line.push(if written == 0 { ' ' } else { ',' });
            line.push_str(&escape(name, &[',', '=', ' ']));
            line.push('=');
            line.push_str(&rendered);
            written += 1;
        }
        if written == 0 {
            return None;
        }
        let nanos = self
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.timestamp.timestamp_micros().saturating_mul(1000));
        line.push(' ');
        line.push_str(&nanos.to_string());
        Some(line)
    }
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 123).unwrap()
    }

    #[test]
    fn renders_integers_with_suffix_and_floats_plain() {
        let line = Point::new("movement_sensor_data", ts())
            .field("packet_id", FieldValue::Integer(42))
            .field("temperature", FieldValue::Float(21.5))
            .field("iaq", FieldValue::Float(1.0))
            .to_line();
        assert_eq!(
            line.as_deref(),
            Some("movement_sensor_data packet_id=42i,temperature=21.5,iaq=1 1700000000000000123")
        );
    }

    #[test]
    fn escapes_measurement_and_field_keys() {
        let line = Point::new("office 1,lab", ts())
            .field("a=b c", FieldValue::Integer(-3))
            .to_line();
        assert_eq!(line.as_deref(), Some(r"office\ 1\,lab a\=b\ c=-3i 1700000000000000123"));
    }

    #[test]
    fn non_finite_floats_are_left_out() {
        let line = Point::new("m", ts())
            .field("temperature", FieldValue::Float(f64::INFINITY))
            .field("battery", FieldValue::Integer(90))
            .field("pressure", FieldValue::Float(f64::NAN))
            .field("iaq", FieldValue::Float(2.5))
            .to_line();
        assert_eq!(line.as_deref(), Some("m battery=90i,iaq=2.5 1700000000000000123"));
    }

    #[test]
    fn point_without_finite_fields_renders_nothing() {
        let point = Point::new("m", ts())
            .field("temperature", FieldValue::Float(f64::NEG_INFINITY))
            .field("pressure", FieldValue::Float(f64::NAN));
        assert_eq!(point.to_line(), None);
        assert_eq!(Point::new("m", ts()).to_line(), None);
    }
}
