#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("invalid InfluxDB url: {0}")]
    InvalidUrl(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("InfluxDB rejected write with status {status}: {body}")]
    Status { status: u16, body: String },
}

impl SinkError {
    /// Transport failures, throttling and server errors are worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::InvalidUrl(_) => false,
            SinkError::Http(_) => true,
            SinkError::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}
