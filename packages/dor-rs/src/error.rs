use thiserror::Error;

#[derive(Error, Debug)]
pub enum DorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to decode message: {0}")]
    Decode(String),

    #[error("Unsupported message type: {0}")]
    UnsupportedMessageType(String),

    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("The placeholder '{0}' is not specified in the data")]
    MissingPlaceholder(String),

    #[error("Invalid series data: {0}")]
    Series(String),

    #[error("Worker interrupted")]
    Interrupted,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DorError>;
