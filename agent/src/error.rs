use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("command channel is not live yet")]
    NotLive,

    #[error("permission store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("permission store unavailable: {0}")]
    StoreUnavailable(&'static str),

    #[error("no player in slot {0}")]
    UnknownSlot(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
