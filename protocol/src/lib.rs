//! Quake 3 connectionless protocol: packet framing, status parsing and the
//! UDP client used to talk to the game server's query and rcon interface.

pub mod client;
pub mod error;
pub mod packet;
pub mod status;

pub use client::{Endpoint, ProtocolClient, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT};
pub use error::{ProtocolError, Result};
pub use packet::{RawPacket, PACKET_PREFIX};
pub use status::{StatusPlayer, StatusRow, StatusSnapshot};
