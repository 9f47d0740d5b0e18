//! The transport seam between the supervisor and the radio

use senselink_proto::Command;
use tokio::sync::mpsc;

use crate::LinkError;

/// One connection-oriented link to the sensor board
///
/// Notifications are delivered through the receiver returned by
/// [`Link::subscribe`], in arrival order.
#[async_trait::async_trait]
pub trait Link: Send + Sync {
    async fn connect(&mut self) -> Result<(), LinkError>;

    async fn disconnect(&mut self) -> Result<(), LinkError>;

    async fn is_connected(&self) -> Result<bool, LinkError>;

    /// Write a program command to the command characteristic
    async fn write_command(&mut self, command: Command) -> Result<(), LinkError>;

    /// Subscribe to the sensor stream characteristic
    async fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, LinkError>;

    async fn unsubscribe(&mut self) -> Result<(), LinkError>;
}
