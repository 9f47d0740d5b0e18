//! Decoded sensor readings and their time-series field mapping

use chrono::{DateTime, Utc};

/// One reading from the sensor board
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Sample {
    /// Monotonic packet counter assigned by the board
    pub sequence_id: u64,
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity, percent
    pub humidity: u64,
    pub pressure: f64,
    pub air_quality_index: f64,
    /// ppm
    pub co2: u64,
    pub gas_resistance: u64,
    /// percent
    pub battery: u64,
    /// Wall clock at decode time; the wire format carries no timestamp
    pub observed_at: DateTime<Utc>,
}

/// A single field value as accepted by the time-series sink
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
}

impl FieldValue {
    /// Saturates at `i64::MAX`, the widest integer the sink stores
    fn integer(value: u64) -> Self {
        Self::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl Sample {
    /// Field names and values as written to the sink
    pub fn fields(&self) -> [(&'static str, FieldValue); 8] {
        [
            ("packet_id", FieldValue::integer(self.sequence_id)),
            ("temperature", FieldValue::Float(self.temperature)),
            ("humidity", FieldValue::integer(self.humidity)),
            ("pressure", FieldValue::Float(self.pressure)),
            ("iaq", FieldValue::Float(self.air_quality_index)),
            ("co2", FieldValue::integer(self.co2)),
            ("gas", FieldValue::integer(self.gas_resistance)),
            ("battery", FieldValue::integer(self.battery)),
        ]
    }
}

/// Renders the sample in the sensor's line format (without `observed_at`)
impl std::fmt::Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},T:{},H:{},P:{},IAQ:{},CO2:{},Gas:{},Batt:{}",
            self.sequence_id,
            self.temperature,
            self.humidity,
            self.pressure,
            self.air_quality_index,
            self.co2,
            self.gas_resistance,
            self.battery,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Sample {
        Sample {
            sequence_id: 7,
            temperature: -0.5,
            humidity: 61,
            pressure: 998.25,
            air_quality_index: 25.0,
            co2: 612,
            gas_resistance: 104_233,
            battery: 100,
            observed_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn field_names_match_sink_schema() {
        let names: Vec<_> = sample().fields().iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            ["packet_id", "temperature", "humidity", "pressure", "iaq", "co2", "gas", "battery"]
        );
    }

    #[test]
    fn integers_and_floats_keep_their_kind() {
        let fields = sample().fields();
        assert_eq!(fields[0].1, FieldValue::Integer(7));
        assert_eq!(fields[1].1, FieldValue::Float(-0.5));
        assert_eq!(fields[6].1, FieldValue::Integer(104_233));
    }

    #[test]
    fn wide_integers_are_not_wrapped() {
        let mut s = sample();
        s.battery = 1_234_567_890;
        s.sequence_id = u64::MAX;
        let fields = s.fields();
        assert_eq!(fields[7].1, FieldValue::Integer(1_234_567_890));
        assert_eq!(fields[0].1, FieldValue::Integer(i64::MAX));
    }

    #[test]
    fn display_uses_wire_format() {
        assert_eq!(
            sample().to_string(),
            "7,T:-0.5,H:61,P:998.25,IAQ:25,CO2:612,Gas:104233,Batt:100"
        );
    }

    #[test]
    fn serializes_observed_at_as_rfc3339() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["observed_at"], "2023-11-14T22:13:20Z");
        assert_eq!(json["co2"], 612);
    }
}
