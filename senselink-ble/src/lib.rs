//! SenseLink BLE
//!
//! Link to the SenseLink environmental sensor board and the supervisor that
//! keeps it streaming.
//!
//! # Example
//!
//! ```ignore
//! use senselink_ble::{BleLink, Supervisor, SupervisorConfig};
//! use senselink_sink::LogSink;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let link = BleLink::new("EE:DF:46:E7:08:80", std::time::Duration::from_secs(5));
//!     let mut supervisor = Supervisor::new(link, LogSink, SupervisorConfig::default());
//!     supervisor.run(&CancellationToken::new()).await;
//! }
//! ```

pub mod ble;
mod error;
mod link;
pub mod supervisor;

pub use ble::{BleLink, SensorDevice};
pub use error::{LinkError, SupervisorError};
pub use link::Link;
pub use supervisor::{LinkState, Supervisor, SupervisorConfig, SupervisorStats};
