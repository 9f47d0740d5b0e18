//! SenseLink sample sinks
//!
//! A [`SampleSink`] accepts one measurement row at a time and never blocks the
//! caller; durability, batching and retries are the sink's own business.
//!
//! # Example
//!
//! ```ignore
//! use senselink_sink::{HttpTransport, InfluxConfig, InfluxWriter, WriteOptions};
//!
//! let transport = HttpTransport::new(&config)?;
//! let (writer, flush_task) = InfluxWriter::spawn(transport, WriteOptions::default());
//! writer.write_sample("movement_sensor_data", &sample);
//! drop(writer);
//! flush_task.close().await;
//! ```

mod error;
pub mod influx;
mod point;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use senselink_proto::{FieldValue, Sample};

pub use error::SinkError;
pub use influx::{FlushTask, HttpTransport, InfluxConfig, InfluxWriter, WriteOptions, WriteTransport};
pub use point::Point;

/// Measurement name the gateway has always written to
pub const DEFAULT_MEASUREMENT: &str = "movement_sensor_data";

/// Fire-and-forget destination for decoded samples
pub trait SampleSink: Send + Sync {
    fn write(&self, measurement: &str, fields: &[(&'static str, FieldValue)], timestamp: DateTime<Utc>);

    fn write_sample(&self, measurement: &str, sample: &Sample) {
        self.write(measurement, &sample.fields(), sample.observed_at);
    }
}

impl<S: SampleSink + ?Sized> SampleSink for Box<S> {
    fn write(&self, measurement: &str, fields: &[(&'static str, FieldValue)], timestamp: DateTime<Utc>) {
        (**self).write(measurement, fields, timestamp)
    }
}

impl<S: SampleSink + ?Sized> SampleSink for Arc<S> {
    fn write(&self, measurement: &str, fields: &[(&'static str, FieldValue)], timestamp: DateTime<Utc>) {
        (**self).write(measurement, fields, timestamp)
    }
}

/// Logs each row instead of storing it (used when pushing is disabled)
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl SampleSink for LogSink {
    fn write(&self, measurement: &str, fields: &[(&'static str, FieldValue)], timestamp: DateTime<Utc>) {
        let point = Point::from_fields(measurement, fields, timestamp);
        if let Some(line) = point.to_line() {
            tracing::info!(target: "senselink::sink", "{line}");
        }
    }
}
