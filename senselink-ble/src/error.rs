/// Failures of the radio link to the sensor board
#[derive(thiserror::Error, Debug)]
pub enum LinkError {
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("sensor {0} not found while scanning")]
    DeviceNotFound(String),
    #[error("link is not connected")]
    NotConnected,
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(uuid::Uuid),
    #[error("bluetooth error: {0}")]
    Btleplug(#[from] btleplug::Error),
}

/// Why a supervised session ended
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("link error: {0}")]
    Link(#[from] LinkError),
    #[error("shutdown requested")]
    Shutdown,
    /// Anything else; treated as recoverable so the gateway keeps running
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl SupervisorError {
    /// Only an operator shutdown stops the supervisor
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SupervisorError::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_shutdown_is_terminal() {
        assert!(SupervisorError::Link(LinkError::NotConnected).is_recoverable());
        assert!(SupervisorError::Link(LinkError::DeviceNotFound("x".into())).is_recoverable());
        assert!(SupervisorError::Unexpected("boom".into()).is_recoverable());
        assert!(!SupervisorError::Shutdown.is_recoverable());
    }
}
