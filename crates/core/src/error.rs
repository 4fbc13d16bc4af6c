use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Registration error: {0}")]
    Registration(String),

    #[error("No free port in range {start}-{end}")]
    PortExhausted { start: u16, end: u16 },

    #[error("Bridge not connected: {0}")]
    NotConnected(String),

    #[error("No active profile. Run `browsermux profiles use <id>` to select one")]
    NoActiveProfile,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
