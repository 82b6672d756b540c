//! # Remote Administration Agent
//!
//! This library runs alongside a Quake 3 protocol game server. It follows the
//! server's activity log to learn who is connected and what they say, and it
//! talks back to the server over the remote console (rcon) UDP protocol.
//!
//! ## Core Responsibilities
//!
//! ### Session Tracking
//! Every `ClientUserinfo` line creates or updates the session for a slot and
//! every `ClientDisconnect` line removes it. A reserved World session (slot
//! 1022) stands in for the server itself and is never removed.
//!
//! ### Permissions
//! Permission levels live in a durable store keyed by player guid. A session
//! asks the store once, when it is first created. Grants go through the store
//! and the session takes whatever level the store reports back.
//!
//! ### Command Delivery
//! All console commands travel through a single queue drained by one worker,
//! so commands reach the server in the order they were issued and replies can
//! never be mixed up between callers.
//!
//! ## Architecture Design
//!
//! ### Two Long-Running Tasks
//! The agent runs two tokio tasks: the log tailer, which is the only writer
//! of the session directory, and the command worker, which owns the socket.
//! Commands submitted while the tailer is still replaying history are dropped;
//! the channel goes live the first time the tailer catches up with the log.
//!
//! ### Shared State
//! The session directory sits behind a `tokio::sync::RwLock`. The protocol
//! client sits behind a `tokio::sync::Mutex` shared by the worker and by
//! callers that need an answer immediately.
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! Session records, permission levels and the slot-indexed directory with
//! lookup by name.
//!
//! ### Store Module (`store`)
//! The `PermissionStore` trait with `SQLite` and in-memory backends.
//!
//! ### Channel Module (`channel`)
//! The ordered command queue and its worker.
//!
//! ### Tailer Module (`tailer`)
//! Log following and classification of log lines into events.
//!
//! ### Controller Module (`controller`)
//! The handle used to act on the server: intents, the map catalogue,
//! permission grants and event application.
//!
//! ### Dispatch Module (`dispatch`)
//! The boundary through which chat commands leave the agent core.
//!
//! ## Error Handling
//!
//! Construction failures (bad address, unreadable log, unopenable database)
//! are returned to the caller. Once running, failures are logged and the
//! affected command or line is skipped.

pub mod channel;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod session;
pub mod store;
pub mod tailer;

pub use channel::{ChannelConfig, CommandChannel, CommandWorker, QueuedCommand};
pub use config::{AgentConfig, Args};
pub use controller::{GameController, MapMatch, Team};
pub use dispatch::{ChatCommand, CommandDispatcher, LoggingDispatcher};
pub use error::{AgentError, Result};
pub use session::{NameMatch, PermissionLevel, Session, SessionDirectory, UserInfo, WORLD_SLOT};
pub use store::{MemoryPermissionStore, PermissionRecord, PermissionStore, SqlitePermissionStore};
pub use tailer::{parse_line, LogEvent, LogTailer};
