//! Batching InfluxDB v2 writer
//!
//! [`InfluxWriter`] is the fire-and-forget handle handed to producers. Points
//! are queued and a background [`FlushTask`] groups them into batches, posting
//! each batch when it is full or when the flush interval elapses, retrying
//! transient failures with exponential backoff.

use std::time::Duration;

use rand::Rng;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{Point, SampleSink, SinkError};

/// Where and as whom to write
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

/// Batching and retry behaviour of the writer
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Random extra delay (up to this much) added to every flush interval
    pub jitter_interval: Duration,
    pub retry_interval: Duration,
    pub max_retries: u32,
    pub max_retry_delay: Duration,
    pub exponential_base: u32,
    /// Upper bound on draining queued points at close
    pub max_close_wait: Duration,
    /// Points queued beyond this are dropped
    pub buffer_limit: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval: Duration::from_millis(10_000),
            jitter_interval: Duration::from_millis(2_000),
            retry_interval: Duration::from_millis(5_000),
            max_retries: 5,
            max_retry_delay: Duration::from_millis(30_000),
            exponential_base: 2,
            max_close_wait: Duration::from_millis(300_000),
            buffer_limit: 10_000,
        }
    }
}

impl WriteOptions {
    /// Backoff before retry number `attempt` (0-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = self.exponential_base.saturating_pow(attempt);
        self.retry_interval
            .saturating_mul(factor)
            .min(self.max_retry_delay)
    }

    fn next_flush(&self) -> Instant {
        let jitter_ms = self.jitter_interval.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        Instant::now() + self.flush_interval + Duration::from_millis(jitter)
    }
}

/// Delivers one line-protocol body to the store
#[async_trait::async_trait]
pub trait WriteTransport: Send + Sync + 'static {
    async fn post(&self, body: String) -> Result<(), SinkError>;
}

/// InfluxDB v2 `/api/v2/write` over HTTP
pub struct HttpTransport {
    client: reqwest::Client,
    write_url: reqwest::Url,
    token: String,
}

impl HttpTransport {
    pub fn new(config: &InfluxConfig) -> Result<Self, SinkError> {
        let endpoint = format!("{}/api/v2/write", config.url.trim_end_matches('/'));
        let write_url = reqwest::Url::parse_with_params(
            &endpoint,
            &[
                ("org", config.org.as_str()),
                ("bucket", config.bucket.as_str()),
                ("precision", "ns"),
            ],
        )
        .map_err(|e| SinkError::InvalidUrl(format!("{endpoint}: {e}")))?;

        Ok(Self {
            client: reqwest::Client::new(),
            write_url,
            token: config.token.clone(),
        })
    }
}

#[async_trait::async_trait]
impl WriteTransport for HttpTransport {
    async fn post(&self, body: String) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.write_url.clone())
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Producer handle; cloning shares the same queue
#[derive(Clone)]
pub struct InfluxWriter {
    tx: mpsc::Sender<Point>,
}

/// The background task draining the queue
pub struct FlushTask {
    handle: JoinHandle<()>,
    max_close_wait: Duration,
}

impl InfluxWriter {
    /// Spawn the flush task on the current tokio runtime
    pub fn spawn<T: WriteTransport>(transport: T, options: WriteOptions) -> (Self, FlushTask) {
        let (tx, rx) = mpsc::channel(options.buffer_limit.max(1));
        let max_close_wait = options.max_close_wait;
        let handle = tokio::spawn(run_flusher(rx, transport, options));
        (
            Self { tx },
            FlushTask {
                handle,
                max_close_wait,
            },
        )
    }

    /// Queue a point without waiting; drops it when the queue is full
    pub fn enqueue(&self, point: Point) {
        match self.tx.try_send(point) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(point)) => {
                warn!(measurement = %point.measurement, "write queue full, dropping point");
            }
            Err(mpsc::error::TrySendError::Closed(point)) => {
                warn!(measurement = %point.measurement, "writer closed, dropping point");
            }
        }
    }
}

impl SampleSink for InfluxWriter {
    fn write(
        &self,
        measurement: &str,
        fields: &[(&'static str, senselink_proto::FieldValue)],
        timestamp: chrono::DateTime<chrono::Utc>,
    ) {
        let point = Point::from_fields(measurement, fields, timestamp);
        self.enqueue(point);
    }
}

impl FlushTask {
    /// Wait for queued points to be written once every [`InfluxWriter`] is dropped
    pub async fn close(self) {
        let mut handle = self.handle;
        match tokio::time::timeout(self.max_close_wait, &mut handle).await {
            Ok(Ok(())) => info!("write queue drained"),
            Ok(Err(e)) => error!("flush task failed: {e}"),
            Err(_) => {
                warn!(
                    "write queue not drained within {:?}, abandoning remaining points",
                    self.max_close_wait
                );
                handle.abort();
            }
        }
    }
}

async fn run_flusher<T: WriteTransport>(
    mut rx: mpsc::Receiver<Point>,
    transport: T,
    options: WriteOptions,
) {
    let mut batch: Vec<Point> = Vec::with_capacity(options.batch_size);
    let mut deadline = options.next_flush();

    loop {
        tokio::select! {
            point = rx.recv() => match point {
                Some(point) => {
                    batch.push(point);
                    if batch.len() >= options.batch_size {
                        flush(&transport, &options, &mut batch).await;
                        deadline = options.next_flush();
                    }
                }
                None => break,
            },
            _ = tokio::time::sleep_until(deadline) => {
                if !batch.is_empty() {
                    flush(&transport, &options, &mut batch).await;
                }
                deadline = options.next_flush();
            }
        }
    }

    if !batch.is_empty() {
        flush(&transport, &options, &mut batch).await;
    }
    debug!("flush task finished");
}

async fn flush<T: WriteTransport>(transport: &T, options: &WriteOptions, batch: &mut Vec<Point>) {
    let lines: Vec<String> = batch.drain(..).filter_map(|p| p.to_line()).collect();
    if lines.is_empty() {
        return;
    }
    let count = lines.len();
    let body = lines.join("\n");

    let mut attempt = 0;
    loop {
        match transport.post(body.clone()).await {
            Ok(()) => {
                debug!(points = count, "batch written");
                return;
            }
            Err(e) if e.is_retryable() && attempt < options.max_retries => {
                let delay = options.retry_delay(attempt);
                warn!(points = count, attempt, "write failed: {e}, retrying in {delay:?}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                error!(points = count, attempt, "dropping batch: {e}");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use chrono::DateTime;
    use senselink_proto::FieldValue;

    use super::*;

    #[derive(Clone, Default)]
    struct Recorder {
        bodies: Arc<Mutex<Vec<String>>>,
        failures: Arc<Mutex<VecDeque<u16>>>,
    }

    impl Recorder {
        fn failing_with(statuses: &[u16]) -> Self {
            let r = Self::default();
            r.failures.lock().unwrap().extend(statuses.iter().copied());
            r
        }

        fn bodies(&self) -> Vec<String> {
            self.bodies.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl WriteTransport for Recorder {
        async fn post(&self, body: String) -> Result<(), SinkError> {
            self.bodies.lock().unwrap().push(body);
            match self.failures.lock().unwrap().pop_front() {
                Some(status) => Err(SinkError::Status { status, body: String::new() }),
                None => Ok(()),
            }
        }
    }

    fn point(n: i64) -> Point {
        Point::new("m", DateTime::from_timestamp(n, 0).unwrap())
            .field("packet_id", FieldValue::Integer(n))
    }

    fn options() -> WriteOptions {
        WriteOptions {
            batch_size: 3,
            jitter_interval: Duration::ZERO,
            ..WriteOptions::default()
        }
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        let o = WriteOptions::default();
        assert_eq!(o.retry_delay(0), Duration::from_secs(5));
        assert_eq!(o.retry_delay(1), Duration::from_secs(10));
        assert_eq!(o.retry_delay(2), Duration::from_secs(20));
        assert_eq!(o.retry_delay(3), Duration::from_secs(30));
        assert_eq!(o.retry_delay(40), Duration::from_secs(30));
    }

    #[test]
    fn http_transport_builds_write_url() {
        let t = HttpTransport::new(&InfluxConfig {
            url: "http://localhost:8086/".into(),
            token: "t".into(),
            org: "home lab".into(),
            bucket: "sensors".into(),
        })
        .unwrap();
        assert_eq!(
            t.write_url.as_str(),
            "http://localhost:8086/api/v2/write?org=home+lab&bucket=sensors&precision=ns"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_is_written_at_once() {
        let recorder = Recorder::default();
        let (writer, task) = InfluxWriter::spawn(recorder.clone(), options());
        for n in 1..=3 {
            writer.enqueue(point(n));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let bodies = recorder.bodies();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0].lines().count(), 3);

        drop(writer);
        task.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_waits_for_flush_interval() {
        let recorder = Recorder::default();
        let (writer, task) = InfluxWriter::spawn(recorder.clone(), options());
        writer.enqueue(point(1));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(recorder.bodies().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(recorder.bodies(), vec!["m packet_id=1i 1000000000".to_string()]);

        drop(writer);
        task.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn non_finite_values_do_not_poison_the_batch() {
        let recorder = Recorder::default();
        let (writer, task) = InfluxWriter::spawn(recorder.clone(), options());
        writer.enqueue(point(1).field("temperature", FieldValue::Float(f64::INFINITY)));
        writer.enqueue(
            Point::new("m", DateTime::from_timestamp(2, 0).unwrap())
                .field("pressure", FieldValue::Float(f64::NAN)),
        );
        writer.enqueue(point(3));
        drop(writer);
        task.close().await;

        assert_eq!(
            recorder.bodies(),
            vec!["m packet_id=1i 1000000000\nm packet_id=3i 3000000000".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let recorder = Recorder::failing_with(&[503, 429]);
        let (writer, task) = InfluxWriter::spawn(recorder.clone(), options());
        for n in 1..=3 {
            writer.enqueue(point(n));
        }
        drop(writer);
        task.close().await;

        let bodies = recorder.bodies();
        assert_eq!(bodies.len(), 3);
        assert!(bodies.iter().all(|b| b == &bodies[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let recorder = Recorder::failing_with(&[500; 10]);
        let (writer, task) = InfluxWriter::spawn(
            recorder.clone(),
            WriteOptions { max_retries: 2, ..options() },
        );
        writer.enqueue(point(1));
        drop(writer);
        task.close().await;

        assert_eq!(recorder.bodies().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_drop_the_batch() {
        let recorder = Recorder::failing_with(&[400]);
        let (writer, task) = InfluxWriter::spawn(recorder.clone(), options());
        writer.enqueue(point(1));
        drop(writer);
        task.close().await;

        assert_eq!(recorder.bodies().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sample_sink_write_builds_point() {
        let recorder = Recorder::default();
        let (writer, task) = InfluxWriter::spawn(recorder.clone(), options());
        writer.write(
            "movement_sensor_data",
            &[("co2", FieldValue::Integer(450)), ("temperature", FieldValue::Float(21.5))],
            DateTime::from_timestamp(2, 0).unwrap(),
        );
        drop(writer);
        task.close().await;

        assert_eq!(
            recorder.bodies(),
            vec!["movement_sensor_data co2=450i,temperature=21.5 2000000000".to_string()]
        );
    }
}
