use crate::channel::{ChannelConfig, DEFAULT_POLL_INTERVAL};
use crate::tailer::DEFAULT_TAIL_INTERVAL;
use clap::Parser;
use protocol::{Endpoint, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT};
use std::path::PathBuf;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Remote administration agent for Quake 3 protocol game servers", long_about = None)]
pub struct Args {
    /// Game server address as host:port
    #[arg(short, long, default_value = "127.0.0.1:27960")]
    pub server: String,

    /// Remote console password
    #[arg(short = 'p', long, env = "RCON_PASSWORD", default_value = "", hide_env_values = true)]
    pub rcon_password: String,

    /// Server activity log to follow
    #[arg(short, long, default_value = "games.log")]
    pub log_file: PathBuf,

    /// SQLite database holding permission levels
    #[arg(short, long, default_value = "data.sqlite")]
    pub database: PathBuf,

    /// Time to wait for each reply, in milliseconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_millis() as u64)]
    pub query_timeout_ms: u64,

    /// Attempts per query before giving up
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Idle sleep of the command worker, in milliseconds
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64)]
    pub poll_interval_ms: u64,

    /// Idle sleep of the log follower, in milliseconds
    #[arg(long, default_value_t = DEFAULT_TAIL_INTERVAL.as_millis() as u64)]
    pub tail_interval_ms: u64,

    /// Most commands allowed to wait in the queue; unbounded when omitted
    #[arg(long)]
    pub queue_limit: Option<usize>,
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub endpoint: Endpoint,
    pub rcon_password: String,
    pub log_file: PathBuf,
    pub database: PathBuf,
    pub channel: ChannelConfig,
    pub tail_interval: Duration,
}

impl TryFrom<Args> for AgentConfig {
    type Error = protocol::ProtocolError;

    fn try_from(args: Args) -> protocol::Result<Self> {
        Ok(AgentConfig {
            endpoint: Endpoint::parse(&args.server)?,
            rcon_password: args.rcon_password,
            log_file: args.log_file,
            database: args.database,
            channel: ChannelConfig {
                poll_interval: Duration::from_millis(args.poll_interval_ms),
                query_timeout: Duration::from_millis(args.query_timeout_ms),
                max_retries: args.max_retries,
                queue_limit: args.queue_limit,
            },
            tail_interval: Duration::from_millis(args.tail_interval_ms),
        })
    }
}
