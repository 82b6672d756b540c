//! Game log follower
//!
//! The tailer opens the server's activity log at its current end, so nothing
//! written before the agent started is replayed. From then on it alternates
//! between two states:
//! - catching up: complete lines are read, classified and applied
//! - blocked: no complete line yet, sleep and try again
//!
//! The first time the tailer blocks it has seen everything the server wrote
//! so far, and the controller is told to go live.

use crate::controller::GameController;
use crate::dispatch::ChatCommand;
use crate::error::Result;
use crate::session::{UserInfo, WORLD_SLOT};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::sleep;

pub const DEFAULT_TAIL_INTERVAL: Duration = Duration::from_millis(125);

/// Width of the `mmm:ss ` timestamp that starts every log line.
const TIMESTAMP_WIDTH: usize = 7;

const DEFAULT_NAME: &str = "UnnamedPlayer";
const DEFAULT_GUID: &str = "None";
const DEFAULT_IP_PORT: &str = "0.0.0.0:0";

/// Structured form of the log lines the agent reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    UserInfo(UserInfo),
    Disconnect { slot: u32 },
    Say(ChatCommand),
}

/// Classifies one raw log line. Returns `None` for lines the agent ignores
/// and for lines that do not have the expected structure.
pub fn parse_line(raw: &str) -> Option<LogEvent> {
    let line = raw.get(TIMESTAMP_WIDTH..)?;
    let (action, rest) = line.split_once(':')?;
    let rest = rest.trim();

    let event = match action.trim() {
        "ClientUserinfo" => parse_userinfo(rest).map(LogEvent::UserInfo),
        "ClientDisconnect" => rest.parse().ok().map(|slot| LogEvent::Disconnect { slot }),
        "say" => Some(LogEvent::Say(parse_say(rest))),
        _ => return None,
    };

    if event.is_none() {
        debug!("Skipping malformed log line {:?}", raw.trim_end());
    }
    event
}

/// `<slot> \key\value\key\value...`, the slot taking the first two characters.
fn parse_userinfo(rest: &str) -> Option<UserInfo> {
    let split = rest.char_indices().nth(2).map_or(rest.len(), |(i, _)| i);
    let (slot, block) = rest.split_at(split);
    let slot: u32 = slot.trim().parse().ok()?;

    let values = parse_info_block(block.trim_start_matches('\\').trim_start());

    let name: String = values
        .get("name")
        .map(|name| name.split_whitespace().collect())
        .unwrap_or_else(|| DEFAULT_NAME.to_string());
    let guid = values.get("cl_guid").copied().unwrap_or(DEFAULT_GUID);
    let ip_port = values.get("ip").copied().unwrap_or(DEFAULT_IP_PORT);
    let address = ip_port.split(':').next().unwrap_or_default().trim();

    Some(UserInfo {
        slot,
        name,
        guid: guid.to_string(),
        address: address.to_string(),
    })
}

fn parse_info_block(block: &str) -> HashMap<&str, &str> {
    let fields: Vec<&str> = block
        .trim_start()
        .trim_start_matches('\\')
        .split('\\')
        .collect();

    fields
        .chunks_exact(2)
        .map(|pair| (pair[0].trim_end(), pair[1].trim_end()))
        .collect()
}

/// `<slot> <name>: <message>`. Anything unparseable is attributed to World
/// with an empty command.
fn parse_say(rest: &str) -> ChatCommand {
    let line = rest.trim();

    let parsed = line.split_once(": ").and_then(|(speaker, message)| {
        let slot = speaker.split(' ').next()?.parse().ok()?;
        let command = message.split_whitespace().next()?;
        Some((slot, command.to_string()))
    });
    let (slot, command) = parsed.unwrap_or((WORLD_SLOT, String::new()));

    ChatCommand {
        slot,
        command,
        line: line.to_string(),
    }
}

/// Follows a growing log file line by line
pub struct LogTailer {
    reader: BufReader<File>,
    path: PathBuf,
    interval: Duration,
    partial: Vec<u8>,
}

impl LogTailer {
    /// Opens `path` positioned at its current end.
    pub async fn open(path: impl AsRef<Path>, interval: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).await?;
        let end = file.seek(SeekFrom::End(0)).await?;
        info!("Following {} from byte {}", path.display(), end);

        Ok(LogTailer {
            reader: BufReader::new(file),
            path,
            interval,
            partial: Vec::new(),
        })
    }

    /// Returns the next complete line, or `None` if the writer has not
    /// finished one yet. A partial line is kept until its newline arrives.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        self.reader.read_until(b'\n', &mut self.partial).await?;

        if !self.partial.ends_with(b"\n") {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        Ok(Some(line))
    }

    /// Applies every new log line to `controller` for the rest of the process
    /// lifetime, going live the first time the log runs dry.
    pub async fn run(mut self, controller: GameController) {
        let mut synchronized = false;

        loop {
            match self.next_line().await {
                Ok(Some(line)) => {
                    if let Some(event) = parse_line(&line) {
                        controller.apply_event(event).await;
                    }
                }
                Ok(None) => {
                    if !synchronized {
                        synchronized = true;
                        info!("Caught up with {}", self.path.display());
                        controller.go_live().await;
                    }
                    sleep(self.interval).await;
                }
                Err(e) => {
                    warn!("Reading {} failed: {}", self.path.display(), e);
                    sleep(self.interval).await;
                }
            }
        }
    }
}
