//! Game Controller
//!
//! The controller is the single handle the rest of the agent uses to act on
//! the game server. It combines:
//! - the session directory, mutated only through [`GameController::apply_event`]
//! - the command channel, for every command sent to the server
//! - the permission store, the only source of session permission levels
//! - the map catalogue, populated once the channel goes live
//!
//! Intents such as [`GameController::tell`] or [`GameController::kick`] are
//! fire-and-forget: they format a console command and submit it. Before the
//! channel is live they do nothing.

use crate::channel::CommandChannel;
use crate::dispatch::CommandDispatcher;
use crate::error::{AgentError, Result};
use crate::session::{PermissionLevel, SessionDirectory, UpsertOutcome, WORLD_SLOT};
use crate::store::{PermissionRecord, PermissionStore};
use crate::tailer::LogEvent;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, PoisonError};
use tokio::sync::RwLock;

/// Longest line a single `tell` command carries.
pub const TELL_WIDTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Team {
    Red,
    Blue,
    Spectator,
    Green,
}

impl Team {
    /// Resolves the abbreviations players type in chat.
    pub fn from_alias(alias: &str) -> Option<Team> {
        match alias.to_lowercase().as_str() {
            "r" | "re" | "red" => Some(Team::Red),
            "b" | "bl" | "blu" | "blue" => Some(Team::Blue),
            "s" | "sp" | "spe" | "spec" | "spectator" => Some(Team::Spectator),
            "green" => Some(Team::Green),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Team::Red => "red",
            Team::Blue => "blue",
            Team::Spectator => "spectator",
            Team::Green => "green",
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapMatch {
    NotFound,
    Unique(String),
    Ambiguous(Vec<String>),
}

#[derive(Clone)]
pub struct GameController {
    directory: Arc<RwLock<SessionDirectory>>,
    channel: Arc<CommandChannel>,
    store: Arc<dyn PermissionStore>,
    dispatcher: Arc<dyn CommandDispatcher>,
    maps: Arc<std::sync::RwLock<Vec<String>>>,
}

impl GameController {
    pub fn new(
        channel: Arc<CommandChannel>,
        store: Arc<dyn PermissionStore>,
        dispatcher: Arc<dyn CommandDispatcher>,
    ) -> Self {
        Self {
            directory: Arc::new(RwLock::new(SessionDirectory::new())),
            channel,
            store,
            dispatcher,
            maps: Arc::new(std::sync::RwLock::new(Vec::new())),
        }
    }

    pub fn directory(&self) -> &Arc<RwLock<SessionDirectory>> {
        &self.directory
    }

    pub fn channel(&self) -> &Arc<CommandChannel> {
        &self.channel
    }

    pub fn is_live(&self) -> bool {
        self.channel.is_live()
    }

    pub fn send_rcon(&self, command: impl Into<String>) {
        self.channel.submit(command);
    }

    /// Private message to `slot`, split into as many `tell` commands as needed.
    pub fn tell(&self, slot: u32, message: &str) {
        for line in wrap_message(message, TELL_WIDTH) {
            self.channel.submit(format!("tell {} {}", slot, line));
        }
    }

    pub fn force_team(&self, slot: u32, team: Team) {
        self.channel.submit(format!("forceteam {} {}", slot, team));
    }

    /// Returns false without sending anything when asked to kick World.
    pub fn kick(&self, slot: u32) -> bool {
        if slot == WORLD_SLOT {
            warn!("Refusing to kick the World slot");
            return false;
        }
        self.channel.submit(format!("kick {}", slot));
        true
    }

    pub fn request_refresh(&self) {
        self.channel.request_refresh();
    }

    /// Opens the channel, then announces the server and loads the map catalogue.
    pub async fn go_live(&self) {
        self.channel.go_live();
        info!("Command channel is live");

        match self.channel.status().await {
            Ok(snapshot) => info!(
                "Attached to {} on {} with {} players",
                snapshot.get("sv_hostname").unwrap_or("unnamed server"),
                snapshot.get("mapname").unwrap_or("unknown map"),
                snapshot.players.len()
            ),
            Err(e) => warn!("Server status unavailable: {}", e),
        }

        self.refresh_maps().await;
        self.channel.request_refresh();
    }

    /// Rebuilds the map catalogue from the server's file listings. An empty
    /// result leaves the previous catalogue in place. Returns the catalogue size.
    pub async fn refresh_maps(&self) -> usize {
        let mut found = BTreeSet::new();

        match self.channel.query_now("dir map bsp").await {
            Ok(listing) => found.extend(bsp_maps(&listing)),
            Err(e) => warn!("Listing bsp maps failed: {}", e),
        }
        match self.channel.query_now("fdir *.pk3").await {
            Ok(listing) => found.extend(pk3_maps(&listing)),
            Err(e) => warn!("Listing pk3 maps failed: {}", e),
        }

        let mut maps = self.maps.write().unwrap_or_else(PoisonError::into_inner);
        if found.is_empty() {
            warn!("No maps found, keeping {} known maps", maps.len());
        } else {
            *maps = found.into_iter().collect();
            info!("Map catalogue holds {} maps", maps.len());
        }
        maps.len()
    }

    pub fn maps(&self) -> Vec<String> {
        self.maps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn find_map(&self, name: &str) -> MapMatch {
        let needle = name.to_lowercase();
        let prefixed = format!("ut4_{}", needle);
        let maps = self.maps.read().unwrap_or_else(PoisonError::into_inner);

        let mut matches = Vec::new();
        for map in maps.iter() {
            if *map == needle || *map == prefixed {
                return MapMatch::Unique(map.clone());
            }
            if map.contains(&needle) {
                matches.push(map.clone());
            }
        }

        match matches.len() {
            0 => MapMatch::NotFound,
            1 => MapMatch::Unique(matches.remove(0)),
            _ => MapMatch::Ambiguous(matches),
        }
    }

    /// Applies one log event. The tailer is the only caller, which keeps it the
    /// only writer of the directory.
    pub async fn apply_event(&self, event: LogEvent) {
        match event {
            LogEvent::UserInfo(info) => {
                let slot = info.slot;
                let guid = info.guid.clone();
                let mut directory = self.directory.write().await;

                if directory.upsert(info) != UpsertOutcome::Created {
                    return;
                }
                match self.store.lookup(&guid) {
                    Ok(Some(level)) => {
                        directory.set_permission(slot, level, true);
                        debug!("Slot {} is registered as {}", slot, level);
                    }
                    Ok(None) => debug!("Slot {} is not registered", slot),
                    Err(e) => warn!("Permission lookup for slot {} failed: {}", slot, e),
                }
            }
            LogEvent::Disconnect { slot } => {
                self.directory.write().await.remove(slot);
            }
            LogEvent::Say(chat) => {
                let directory = self.directory.read().await;
                self.dispatcher.dispatch(&chat, &directory, self);
            }
        }
    }

    /// Stores `level` for the player in `slot` and returns the level the store
    /// reports afterwards, which is also what the session now holds.
    pub async fn grant(&self, slot: u32, level: PermissionLevel) -> Result<PermissionLevel> {
        let record = {
            let directory = self.directory.read().await;
            let session = directory.get(slot).ok_or(AgentError::UnknownSlot(slot))?;
            PermissionRecord {
                guid: session.guid.clone(),
                name: session.pretty_name.clone(),
                address: session.address.clone(),
                level,
            }
        };

        if self.store.lookup(&record.guid)?.is_some() {
            self.store.update_level(&record.guid, level)?;
        } else {
            self.store.register(&record)?;
        }

        let stored = self.store.lookup(&record.guid)?;
        let granted = stored.unwrap_or_default();

        let mut directory = self.directory.write().await;
        if directory.set_permission(slot, granted, stored.is_some()) {
            info!("{} [{}] is now {}", record.name, slot, granted);
        } else {
            debug!("Slot {} left before its grant completed", slot);
        }
        Ok(granted)
    }
}

fn bsp_maps(listing: &str) -> impl Iterator<Item = String> + '_ {
    listing
        .split_whitespace()
        .filter(|entry| entry.starts_with('/'))
        .map(|entry| entry.replace('/', "").replace(".bsp", ""))
}

fn pk3_maps(listing: &str) -> impl Iterator<Item = String> + '_ {
    listing
        .split_whitespace()
        .filter(|entry| entry.starts_with("/ut4_"))
        .map(|entry| entry.replace('/', "").replace(".pk3", "").replace(".bsp", ""))
}

/// Greedy word wrap. Words longer than `width` are split.
fn wrap_message(message: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in message.split_whitespace() {
        let mut word = word;
        while word.chars().count() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let split = word.char_indices().nth(width).map_or(word.len(), |(i, _)| i);
            lines.push(word[..split].to_string());
            word = &word[split..];
        }
        if word.is_empty() {
            continue;
        }

        let word_len = word.chars().count();
        if current_len > 0 && current_len + 1 + word_len > width {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
