//! Connected-player sessions keyed by server slot
//!
//! This module holds the agent's view of who is on the server:
//! - Session identity (slot, name, guid, address) as reported by the game log
//! - Permission level as answered by the permission store
//! - Lookup by slot and fuzzy lookup by name for command producers
//!
//! The directory is only written from log events. The reserved World slot
//! stands for the agent itself and is always present.

use log::{debug, info};
use std::collections::HashMap;
use std::fmt;

/// Slot of the built-in World session that represents the agent.
pub const WORLD_SLOT: u32 = 1022;

/// Ordered permission scale. The numeric values are the ones kept in the
/// permission store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PermissionLevel {
    #[default]
    Guest,
    User,
    Admin,
    HeadAdmin,
}

impl PermissionLevel {
    pub fn value(self) -> i64 {
        match self {
            PermissionLevel::Guest => 0,
            PermissionLevel::User => 1,
            PermissionLevel::Admin => 40,
            PermissionLevel::HeadAdmin => 100,
        }
    }

    /// Maps a stored value onto the scale, rounding down to the nearest level.
    pub fn from_value(value: i64) -> Self {
        match value {
            v if v >= 100 => PermissionLevel::HeadAdmin,
            v if v >= 40 => PermissionLevel::Admin,
            v if v >= 1 => PermissionLevel::User,
            _ => PermissionLevel::Guest,
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PermissionLevel::Guest => "Guest",
            PermissionLevel::User => "User",
            PermissionLevel::Admin => "Admin",
            PermissionLevel::HeadAdmin => "Head Admin",
        };
        f.write_str(name)
    }
}

/// Identity fields reported by a `ClientUserinfo` log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub slot: u32,
    pub name: String,
    pub guid: String,
    pub address: String,
}

/// One connected player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Server slot, distinguishes players sharing a name
    pub slot: u32,
    /// Name as sent by the client with spaces removed
    pub name: String,
    /// Name with color codes removed
    pub pretty_name: String,
    pub guid: String,
    /// IP address without port
    pub address: String,
    pub level: PermissionLevel,
    /// Whether the permission store has a record for this guid
    pub registered: bool,
}

impl Session {
    pub fn new(slot: u32, name: &str, guid: &str, address: &str) -> Self {
        let name = name.replace(' ', "");
        Self {
            slot,
            pretty_name: strip_color_codes(&name),
            name,
            guid: guid.to_string(),
            address: address.to_string(),
            level: PermissionLevel::Guest,
            registered: false,
        }
    }

    /// The session standing for the agent itself.
    pub fn world() -> Self {
        Self::new(WORLD_SLOT, "World", "NONE", "127.0.0.1")
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.replace(' ', "");
        self.pretty_name = strip_color_codes(&self.name);
    }
}

/// Removes `^0` through `^9` color codes from a player name.
pub fn strip_color_codes(name: &str) -> String {
    let mut pretty = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '^' && chars.peek().is_some_and(|next| next.is_ascii_digit()) {
            chars.next();
            continue;
        }
        pretty.push(c);
    }

    pretty
}

/// What an upsert did to the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Result of a fuzzy player lookup
#[derive(Debug, PartialEq, Eq)]
pub enum NameMatch<'a> {
    NotFound,
    Unique(&'a Session),
    /// Every candidate, ordered by slot, so the caller can ask which one was meant
    Ambiguous(Vec<&'a Session>),
}

/// Authoritative map from slot to connected player
pub struct SessionDirectory {
    sessions: HashMap<u32, Session>,
}

impl SessionDirectory {
    /// Creates a directory holding only the World session.
    pub fn new() -> Self {
        let mut sessions = HashMap::new();
        sessions.insert(WORLD_SLOT, Session::world());
        Self { sessions }
    }

    pub fn get(&self, slot: u32) -> Option<&Session> {
        self.sessions.get(&slot)
    }

    /// Creates the session for `info.slot`, or updates its guid and name in place.
    pub fn upsert(&mut self, info: UserInfo) -> UpsertOutcome {
        match self.sessions.get_mut(&info.slot) {
            Some(session) => {
                let mut outcome = UpsertOutcome::Unchanged;
                if session.guid != info.guid {
                    debug!("Slot {} guid changed to {}", info.slot, info.guid);
                    session.guid = info.guid;
                    outcome = UpsertOutcome::Updated;
                }
                if session.name != info.name.replace(' ', "") {
                    debug!("Slot {} renamed {} -> {}", info.slot, session.name, info.name);
                    session.set_name(&info.name);
                    outcome = UpsertOutcome::Updated;
                }
                outcome
            }
            None => {
                let session = Session::new(info.slot, &info.name, &info.guid, &info.address);
                info!("Player {} connected in slot {} from {}", session.name, info.slot, info.address);
                self.sessions.insert(info.slot, session);
                UpsertOutcome::Created
            }
        }
    }

    /// Applies the permission store's answer for a slot.
    ///
    /// Returns false if the slot is not connected.
    pub fn set_permission(&mut self, slot: u32, level: PermissionLevel, registered: bool) -> bool {
        match self.sessions.get_mut(&slot) {
            Some(session) => {
                session.level = level;
                session.registered = registered;
                true
            }
            None => false,
        }
    }

    /// Removes a session. The World session cannot be removed.
    pub fn remove(&mut self, slot: u32) -> Option<Session> {
        if slot == WORLD_SLOT {
            return None;
        }

        let removed = self.sessions.remove(&slot);
        if let Some(session) = &removed {
            info!("Player {} disconnected from slot {}", session.name, slot);
        }
        removed
    }

    /// Finds a connected player by name or slot number.
    ///
    /// An exact case-insensitive name or an exact slot number wins outright.
    /// Otherwise every case-insensitive substring match is a candidate.
    pub fn find_by_name(&self, query: &str) -> NameMatch<'_> {
        let needle = query.to_lowercase();
        let candidates = || self.sessions.values().filter(|s| s.slot != WORLD_SLOT);

        if let Some(exact) =
            candidates().find(|s| s.name.to_lowercase() == needle || s.slot.to_string() == query)
        {
            return NameMatch::Unique(exact);
        }

        let mut matches: Vec<&Session> = candidates()
            .filter(|s| s.name.to_lowercase().contains(&needle))
            .collect();
        matches.sort_by_key(|s| s.slot);

        match matches.len() {
            0 => NameMatch::NotFound,
            1 => NameMatch::Unique(matches[0]),
            _ => NameMatch::Ambiguous(matches),
        }
    }

    /// Connected players ordered by slot, World excluded.
    pub fn connected(&self) -> Vec<&Session> {
        let mut sessions: Vec<&Session> = self
            .sessions
            .values()
            .filter(|s| s.slot != WORLD_SLOT)
            .collect();
        sessions.sort_by_key(|s| s.slot);
        sessions
    }

    /// Number of connected players, World excluded.
    pub fn len(&self) -> usize {
        self.sessions.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionDirectory {
    fn default() -> Self {
        Self::new()
    }
}
