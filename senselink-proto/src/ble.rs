//! BLE GATT constants for the SenseLink environmental sensor
//!
//! The sensor board exposes a write-only program command characteristic and a
//! notify characteristic that emits one text line per reading.

/// Hardware address of the sensor board
pub const DEVICE_ADDRESS: &str = "EE:DF:46:E7:08:80";

/// Program Command Characteristic UUID (write)
pub const PROGRAM_COMMAND_UUID: &str = "19b10000-8002-537e-4f6c-d104768a1214";

/// Sensor Stream Characteristic UUID (read/notify)
pub const SENSOR_STREAM_UUID: &str = "19b10000-a001-537e-4f6c-d104768a1214";

/// Program command bytes
pub mod commands {
    /// Stop streaming readings
    pub const STOP: u8 = 0x00;

    /// Start streaming readings - the board forgets this on link loss
    pub const START: u8 = 0x01;
}

/// A single-byte program command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Stop,
    Start,
}

impl Command {
    pub fn as_byte(self) -> u8 {
        match self {
            Command::Stop => commands::STOP,
            Command::Start => commands::START,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_bytes() {
        assert_eq!(Command::Start.as_byte(), 1);
        assert_eq!(Command::Stop.as_byte(), 0);
    }
}
