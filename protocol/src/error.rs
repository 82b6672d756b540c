use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("server address must be \"address:port\", got {0:?}")]
    InvalidAddress(String),

    #[error("server response timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("malformed packet: {0}")]
    Malformed(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
