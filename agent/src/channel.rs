//! Serialized command channel owning the single rcon connection

use crate::error::{AgentError, Result};
use log::{debug, error, warn};
use protocol::{ProtocolClient, StatusSnapshot, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(330);

/// Work items consumed by the worker, in submission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuedCommand {
    /// Console command text, sent verbatim after authentication
    Rcon(String),
    /// Privileged status query run for its side effect only
    Refresh,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Idle sleep of the worker between queue checks
    pub poll_interval: Duration,
    /// Per-attempt wait for a server reply
    pub query_timeout: Duration,
    /// Attempts per command before it is dropped
    pub max_retries: u32,
    /// Maximum pending commands; `None` leaves the queue unbounded
    pub queue_limit: Option<usize>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            query_timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            queue_limit: None,
        }
    }
}

/// Accepts commands from any number of producers and runs them one at a time.
///
/// Nothing reaches the protocol client before [`CommandChannel::go_live`].
/// The worker and [`CommandChannel::query_now`] share one lock, so a command
/// always runs to completion before the next one is sent.
pub struct CommandChannel {
    client: Mutex<ProtocolClient>,
    live: AtomicBool,
    pending: AtomicUsize,
    queue_limit: Option<usize>,
    queue_tx: mpsc::UnboundedSender<QueuedCommand>,
}

impl CommandChannel {
    /// Wraps `client` in a channel. The returned worker must be spawned for
    /// queued commands to execute.
    pub fn new(client: ProtocolClient, config: ChannelConfig) -> (Arc<Self>, CommandWorker) {
        let client = client.with_retry_policy(config.query_timeout, config.max_retries);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let channel = Arc::new(CommandChannel {
            client: Mutex::new(client),
            live: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            queue_limit: config.queue_limit,
            queue_tx,
        });

        let worker = CommandWorker {
            channel: Arc::clone(&channel),
            queue_rx,
            poll_interval: config.poll_interval,
        };

        (channel, worker)
    }

    pub fn go_live(&self) {
        if !self.live.swap(true, Ordering::AcqRel) {
            debug!("Command channel is live");
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Number of commands waiting for the worker.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Queues a console command. Silently dropped before go-live.
    pub fn submit(&self, command: impl Into<String>) {
        self.enqueue(QueuedCommand::Rcon(command.into()));
    }

    /// Queues a privileged status refresh.
    pub fn request_refresh(&self) {
        self.enqueue(QueuedCommand::Refresh);
    }

    fn enqueue(&self, command: QueuedCommand) {
        if !self.is_live() {
            debug!("Dropping {:?}, command channel not live", command);
            return;
        }

        let admitted = match self.queue_limit {
            Some(limit) => self
                .pending
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
                .is_ok(),
            None => {
                self.pending.fetch_add(1, Ordering::AcqRel);
                true
            }
        };

        if !admitted {
            warn!("Command queue full, dropping {:?}", command);
            return;
        }

        if let Err(e) = self.queue_tx.send(command) {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            error!("Command worker is gone, dropping {:?}", e.0);
        }
    }

    /// Runs a privileged query immediately and returns its output.
    ///
    /// Waits for any command the worker is executing to finish first.
    pub async fn query_now(&self, command: &str) -> Result<String> {
        if !self.is_live() {
            return Err(AgentError::NotLive);
        }

        let mut client = self.client.lock().await;
        let packet = client.rcon_query(command).await?;
        Ok(packet.payload)
    }

    /// Public status query, serialized with everything else on the socket.
    pub async fn status(&self) -> Result<StatusSnapshot> {
        if !self.is_live() {
            return Err(AgentError::NotLive);
        }

        let mut client = self.client.lock().await;
        Ok(client.status().await?)
    }

    async fn execute(&self, command: QueuedCommand) {
        let mut client = self.client.lock().await;

        let result = match &command {
            QueuedCommand::Rcon(text) => client.rcon_query(text).await.map(|_| ()),
            QueuedCommand::Refresh => client
                .rcon_status()
                .await
                .map(|rows| debug!("Status refresh reported {} players", rows.len())),
        };

        if let Err(e) = result {
            warn!("Command {:?} failed: {}", command, e);
        }
    }
}

/// Background consumer of the command queue
pub struct CommandWorker {
    channel: Arc<CommandChannel>,
    queue_rx: mpsc::UnboundedReceiver<QueuedCommand>,
    poll_interval: Duration,
}

impl CommandWorker {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Executes queued commands in order for as long as the process lives.
    pub async fn run(mut self) {
        loop {
            if self.channel.is_live() {
                if let Ok(command) = self.queue_rx.try_recv() {
                    self.channel.pending.fetch_sub(1, Ordering::AcqRel);
                    self.channel.execute(command).await;
                    continue;
                }
            }

            sleep(self.poll_interval).await;
        }
    }
}
