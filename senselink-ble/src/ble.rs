//! btleplug-backed link to the SenseLink sensor board
//!
//! Provides scanning and a [`Link`] implementation that locates the board by
//! hardware address, resolves its characteristics and forwards notifications.

use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use senselink_proto::Command;
use senselink_proto::ble::{PROGRAM_COMMAND_UUID, SENSOR_STREAM_UUID};

use crate::{Link, LinkError};

/// A discovered BLE peripheral
#[derive(Debug, Clone)]
pub struct SensorDevice {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    pub is_sensor: bool,
}

/// Parse UUID string into uuid::Uuid
fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).expect("invalid UUID in senselink_proto")
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, LinkError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(LinkError::NoAdapter)
}

/// Scan for BLE devices
///
/// Devices whose address equals `sensor_address` have `is_sensor = true`.
pub async fn scan(duration: Duration, sensor_address: &str) -> Result<Vec<SensorDevice>, LinkError> {
    let adapter = get_adapter().await?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter.peripherals().await?;
    let mut devices = Vec::new();

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            let address = peripheral.address().to_string();
            let is_sensor = address.eq_ignore_ascii_case(sensor_address);
            devices.push(SensorDevice { name, address, rssi: props.rssi, is_sensor });
        }
    }

    adapter.stop_scan().await?;
    Ok(devices)
}

/// Find the peripheral with the given hardware address
pub async fn find_device(address: &str, duration: Duration) -> Result<Peripheral, LinkError> {
    let adapter = get_adapter().await?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter.peripherals().await?;
    let found = peripherals
        .into_iter()
        .find(|p| p.address().to_string().eq_ignore_ascii_case(address));

    adapter.stop_scan().await?;
    found.ok_or_else(|| LinkError::DeviceNotFound(address.to_string()))
}

/// Pick the command and stream characteristics out of a discovered set
fn find_characteristics(
    characteristics: &BTreeSet<Characteristic>,
) -> Result<(Characteristic, Characteristic), LinkError> {
    let find = |uuid: Uuid| {
        characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or(LinkError::CharacteristicNotFound(uuid))
    };
    Ok((find(parse_uuid(PROGRAM_COMMAND_UUID))?, find(parse_uuid(SENSOR_STREAM_UUID))?))
}

/// Run `disconnect` when `result` is an error, so a half set up connection
/// is not left open. The original error is returned either way.
async fn disconnect_on_error<T, F>(result: Result<T, LinkError>, disconnect: F) -> Result<T, LinkError>
where
    F: Future<Output = Result<(), btleplug::Error>>,
{
    if let Err(e) = &result {
        if let Err(undo) = disconnect.await {
            warn!("disconnect after failed setup ({e}) also failed: {undo}");
        }
    }
    result
}

/// Live handles for one connection
struct Session {
    peripheral: Peripheral,
    command: Characteristic,
    stream: Characteristic,
}

/// [`Link`] to the sensor board over the host's Bluetooth adapter
pub struct BleLink {
    address: String,
    scan_duration: Duration,
    peripheral: Option<Peripheral>,
    session: Option<Session>,
    forwarder: Option<JoinHandle<()>>,
}

impl BleLink {
    pub fn new(address: impl Into<String>, scan_duration: Duration) -> Self {
        Self {
            address: address.into(),
            scan_duration,
            peripheral: None,
            session: None,
            forwarder: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn session(&self) -> Result<&Session, LinkError> {
        self.session.as_ref().ok_or(LinkError::NotConnected)
    }

    fn stop_forwarder(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

#[async_trait::async_trait]
impl Link for BleLink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        self.stop_forwarder();
        self.session = None;

        // taken so that a failed attempt rescans, the cached handle may be stale
        let peripheral = match self.peripheral.take() {
            Some(p) => p,
            None => {
                debug!(address = %self.address, "scanning for sensor");
                find_device(&self.address, self.scan_duration).await?
            }
        };

        peripheral.connect().await?;

        let setup = async {
            peripheral.discover_services().await?;
            find_characteristics(&peripheral.characteristics())
        }
        .await;
        let (command, stream) = disconnect_on_error(setup, peripheral.disconnect()).await?;

        info!(address = %self.address, "connected to sensor");
        self.peripheral = Some(peripheral.clone());
        self.session = Some(Session { peripheral, command, stream });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        self.stop_forwarder();
        match self.session.take() {
            Some(session) => Ok(session.peripheral.disconnect().await?),
            None => Ok(()),
        }
    }

    async fn is_connected(&self) -> Result<bool, LinkError> {
        match &self.session {
            Some(session) => Ok(session.peripheral.is_connected().await?),
            None => Ok(false),
        }
    }

    async fn write_command(&mut self, command: Command) -> Result<(), LinkError> {
        let session = self.session()?;
        session
            .peripheral
            .write(&session.command, &[command.as_byte()], WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, LinkError> {
        let session = self.session()?;
        let mut notifications = session.peripheral.notifications().await?;
        session.peripheral.subscribe(&session.stream).await?;

        let uuid = session.stream.uuid;
        let (tx, rx) = mpsc::unbounded_channel();
        self.stop_forwarder();
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid == uuid && tx.send(notification.value).is_err() {
                    break;
                }
            }
        }));
        Ok(rx)
    }

    async fn unsubscribe(&mut self) -> Result<(), LinkError> {
        self.stop_forwarder();
        let session = self.session()?;
        session.peripheral.unsubscribe(&session.stream).await?;
        Ok(())
    }
}
