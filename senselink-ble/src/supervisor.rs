//! Connection supervisor
//!
//! Keeps readings flowing from the sensor board for as long as the process
//! runs. The board forgets that it was started whenever the link drops, so
//! the start command is written exactly once after every fresh connect.
//!
//! ```text
//! Disconnected -> Connecting -> Arming -> Streaming
//!       ^______________|___________|__________|   (any error or drop)
//! ```

use std::time::Duration;

use senselink_proto::Command;
use senselink_sink::{DEFAULT_MEASUREMENT, SampleSink};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Link, LinkError, SupervisorError};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Arming,
    Streaming,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Fixed delay before every reconnect attempt
    pub backoff: Duration,
    /// How often link liveness is checked while streaming
    pub poll_interval: Duration,
    /// Measurement name samples are written under
    pub measurement: String,
    /// Upper bound on unsubscribe plus disconnect when releasing the link
    pub cleanup_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
            measurement: DEFAULT_MEASUREMENT.to_string(),
            cleanup_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorStats {
    pub connects: u64,
    pub start_commands: u64,
    pub samples: u64,
    pub rejections: u64,
    pub failures: u64,
}

pub struct Supervisor<L, S> {
    link: L,
    sink: S,
    config: SupervisorConfig,
    state: watch::Sender<LinkState>,
    armed: bool,
    subscribed: bool,
    stats: SupervisorStats,
}

impl<L: Link, S: SampleSink> Supervisor<L, S> {
    pub fn new(link: L, sink: S, config: SupervisorConfig) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            link,
            sink,
            config,
            state,
            armed: false,
            subscribed: false,
            stats: SupervisorStats::default(),
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Follow state transitions from another task
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Whether the board has been sent the start command on the current connection
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn stats(&self) -> SupervisorStats {
        self.stats
    }

    /// Run until `shutdown` is cancelled, reconnecting after every failure
    pub async fn run(&mut self, shutdown: &CancellationToken) {
        info!("supervisor started");

        loop {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => Err(SupervisorError::Shutdown),
                outcome = self.session() => outcome,
            };

            match outcome {
                Ok(()) => info!("link lost"),
                Err(e) if !e.is_recoverable() => {
                    info!("{e}");
                    break;
                }
                Err(SupervisorError::Link(e)) => {
                    self.stats.failures += 1;
                    warn!("link error: {e}");
                }
                Err(e) => {
                    self.stats.failures += 1;
                    warn!("{e}");
                }
            }

            self.release_link().await;
            info!("reconnecting in {:?}", self.config.backoff);

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                _ = tokio::time::sleep(self.config.backoff) => {}
            }
        }

        self.release_link().await;
        info!(stats = ?self.stats, "supervisor stopped");
    }

    /// Connect, arm and stream until the link drops
    async fn session(&mut self) -> Result<(), SupervisorError> {
        self.transition(LinkState::Connecting);
        self.link.connect().await?;
        if !self.link.is_connected().await? {
            return Err(LinkError::NotConnected.into());
        }
        self.stats.connects += 1;

        if self.armed {
            debug!("board already armed, skipping start command");
        } else {
            self.transition(LinkState::Arming);
            self.link.write_command(Command::Start).await?;
            self.stats.start_commands += 1;
            self.armed = true;
            info!("start command sent");
        }

        let mut notifications = self.link.subscribe().await?;
        self.subscribed = true;
        self.transition(LinkState::Streaming);

        let period = self.config.poll_interval.max(MIN_POLL_INTERVAL);
        let mut liveness = tokio::time::interval_at(Instant::now() + period, period);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                payload = notifications.recv() => match payload {
                    Some(payload) => self.handle_notification(&payload),
                    None => {
                        return Err(SupervisorError::Unexpected(
                            "notification stream closed while connected".to_string(),
                        ));
                    }
                },
                _ = liveness.tick() => {
                    if !self.link.is_connected().await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn handle_notification(&mut self, payload: &[u8]) {
        let decoded = match senselink_proto::decode(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.rejections += 1;
                warn!("invalid data received: {e}");
                return;
            }
        };

        if !decoded.trailing.is_empty() {
            warn!(trailing = ?decoded.trailing, "ignoring bytes after sensor line");
        }

        let s = &decoded.sample;
        info!(
            packet_id = s.sequence_id,
            temperature = s.temperature,
            humidity = s.humidity,
            pressure = s.pressure,
            iaq = s.air_quality_index,
            co2 = s.co2,
            gas = s.gas_resistance,
            battery = s.battery,
            "sample"
        );
        self.sink.write_sample(&self.config.measurement, s);
        self.stats.samples += 1;
    }

    /// Drop back to `Disconnected`: the board has forgotten its program state
    async fn release_link(&mut self) {
        self.armed = false;

        let limit = self.config.cleanup_timeout;
        if tokio::time::timeout(limit, self.teardown()).await.is_err() {
            warn!("link cleanup did not finish within {limit:?}, abandoning it");
        }

        self.transition(LinkState::Disconnected);
    }

    /// Best effort unsubscribe and disconnect; failures are only logged
    async fn teardown(&mut self) {
        if self.subscribed {
            self.subscribed = false;
            if let Err(e) = self.link.unsubscribe().await {
                warn!("failed to unsubscribe: {e}");
            }
        }

        match self.link.is_connected().await {
            Ok(true) => {
                if let Err(e) = self.link.disconnect().await {
                    warn!("failed to disconnect: {e}");
                }
            }
            Ok(false) => {}
            Err(e) => warn!("failed to query link: {e}"),
        }
    }

    fn transition(&mut self, next: LinkState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!(from = ?prev, to = ?next, "link state");
        }
    }
}
