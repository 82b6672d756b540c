//! Parsers for the two status formats the server answers with.
//!
//! `getstatus` returns a `\`-delimited key/value record whose last value runs
//! into a newline-separated player block. `rcon status` returns a text table.
//! Both parsers skip rows they cannot decompose instead of failing the call.

use log::debug;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Placeholder slot for players reported by `getstatus`, which carries no slot numbers.
pub const UNKNOWN_SLOT: u32 = 1;

/// Header lines preceding the player rows of an `rcon status` table
/// (map line, column names, dashes).
const RCON_STATUS_HEADER_LINES: usize = 3;

/// slot, score, ping, name, lastmsg, address; qport and rate may be cut off.
const RCON_STATUS_MIN_COLUMNS: usize = 6;

fn player_line_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| Regex::new(r#"^(\d+) (\d+) "(.*)""#).expect("player regex must compile"))
}

/// Player row from the public status response. Informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPlayer {
    pub slot: u32,
    pub name: String,
    pub frags: u32,
    pub ping: u32,
}

/// Player row from the privileged `rcon status` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub slot: u32,
    pub score: i32,
    pub ping: u32,
    pub name: String,
    pub address: String,
    pub qport: Option<u32>,
    pub rate: Option<u32>,
}

/// Result of one `getstatus` query. Never merged with an earlier snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub values: HashMap<String, String>,
    pub players: Vec<StatusPlayer>,
}

impl StatusSnapshot {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Parses a `\key\value\key\value\nplayer\nplayer` status payload.
///
/// A trailing key without a value is dropped. If a value contains a line
/// break, the text after it is the player block.
pub fn parse_status(payload: &str) -> StatusSnapshot {
    let body = payload.strip_prefix('\\').unwrap_or(payload);
    let fields: Vec<&str> = body.split('\\').collect();

    let mut snapshot = StatusSnapshot::default();
    for pair in fields.chunks(2) {
        let &[key, value] = pair else {
            continue;
        };

        match value.split_once('\n') {
            Some((value, player_block)) => {
                snapshot.values.insert(key.to_string(), value.to_string());
                snapshot.players = parse_players(player_block);
            }
            None => {
                snapshot.values.insert(key.to_string(), value.to_string());
            }
        }
    }

    snapshot
}

/// Parses the newline-separated `frags ping "name"` player block.
pub fn parse_players(block: &str) -> Vec<StatusPlayer> {
    let mut players = Vec::new();

    for line in block.split('\n').filter(|line| !line.is_empty()) {
        let parsed = player_line_regex().captures(line).and_then(|caps| {
            Some(StatusPlayer {
                slot: UNKNOWN_SLOT,
                frags: caps[1].parse().ok()?,
                ping: caps[2].parse().ok()?,
                name: caps[3].to_string(),
            })
        });

        match parsed {
            Some(player) => players.push(player),
            None => debug!("Skipping unmatched player line {:?}", line),
        }
    }

    players
}

/// Parses the table returned by `rcon status`.
pub fn parse_rcon_status(payload: &str) -> Vec<StatusRow> {
    payload
        .split('\n')
        .skip(RCON_STATUS_HEADER_LINES)
        .filter_map(parse_rcon_status_row)
        .collect()
}

fn parse_rcon_status_row(line: &str) -> Option<StatusRow> {
    let columns: Vec<&str> = line.split_whitespace().collect();
    if columns.is_empty() {
        return None;
    }
    if columns.len() < RCON_STATUS_MIN_COLUMNS {
        debug!("Skipping short status row {:?}", line);
        return None;
    }

    let row = StatusRow {
        slot: columns[0].parse().ok()?,
        score: columns[1].parse().ok()?,
        // CNCT and ZMBI in the ping column mean the slot is not playing yet
        ping: columns[2].parse().ok()?,
        name: columns[3].to_string(),
        address: columns[5].to_string(),
        qport: columns.get(6).and_then(|qport| qport.parse().ok()),
        rate: columns.get(7).and_then(|rate| rate.parse().ok()),
    };

    Some(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_values_and_players() {
        let payload = "\\key1\\val1\\key2\\val2\n12 50 \"Alice\"\n3 120 \"Bob\"";
        let snapshot = parse_status(payload);

        assert_eq!(snapshot.values.len(), 2);
        assert_eq!(snapshot.get("key1"), Some("val1"));
        assert_eq!(snapshot.get("key2"), Some("val2"));

        assert_eq!(snapshot.players.len(), 2);
        assert_eq!(snapshot.players[0].name, "Alice");
        assert_eq!(snapshot.players[0].frags, 12);
        assert_eq!(snapshot.players[0].ping, 50);
        assert_eq!(snapshot.players[0].slot, UNKNOWN_SLOT);
        assert_eq!(snapshot.players[1].name, "Bob");
    }

    #[test]
    fn test_parse_status_without_players() {
        let snapshot = parse_status("\\sv_hostname\\My Server\\mapname\\ut4_casa\n");

        assert_eq!(snapshot.get("sv_hostname"), Some("My Server"));
        assert_eq!(snapshot.get("mapname"), Some("ut4_casa"));
        assert!(snapshot.players.is_empty());
    }

    #[test]
    fn test_parse_status_skips_unmatched_player_lines() {
        let payload = "\\g_gametype\\4\n5 30 \"Carol\"\nnot a player\n7 \"NoPing\"\n0 999 \"Dave\"\n";
        let snapshot = parse_status(payload);

        let names: Vec<&str> = snapshot.players.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Carol", "Dave"]);
    }

    #[test]
    fn test_parse_status_drops_dangling_key() {
        let snapshot = parse_status("\\a\\1\\b");
        assert_eq!(snapshot.values.len(), 1);
        assert_eq!(snapshot.get("a"), Some("1"));
        assert_eq!(snapshot.get("b"), None);
    }

    #[test]
    fn test_parse_status_empty_payload() {
        let snapshot = parse_status("");
        assert!(snapshot.values.is_empty());
        assert!(snapshot.players.is_empty());
    }

    #[test]
    fn test_parse_rcon_status_table() {
        let payload = "map: ut4_abbey\n\
num score ping name            lastmsg address               qport rate\n\
--- ----- ---- --------------- ------- --------------------- ----- -----\n\
  0     5   48 Alice                 0 192.168.0.10:27960    1234 25000\n\
  1    -2   97 Bob                  50 10.0.0.7:27960        4321 16000\n";

        let rows = parse_rcon_status(payload);
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].slot, 0);
        assert_eq!(rows[0].score, 5);
        assert_eq!(rows[0].ping, 48);
        assert_eq!(rows[0].name, "Alice");
        assert_eq!(rows[0].address, "192.168.0.10:27960");
        assert_eq!(rows[0].qport, Some(1234));
        assert_eq!(rows[0].rate, Some(25000));

        assert_eq!(rows[1].slot, 1);
        assert_eq!(rows[1].score, -2);
        assert_eq!(rows[1].name, "Bob");
    }

    #[test]
    fn test_parse_rcon_status_skips_bad_rows() {
        let payload = "map: ut4_abbey\nheader\n---\n\
  0     5 CNCT Connecting            0 192.168.0.11:27960    1111 25000\n\
  x     1   20 Broken                0 192.168.0.12:27960    2222 25000\n\
  2     3\n\
\n\
  3     1   20 Eve                   0 192.168.0.13:27960\n";

        let rows = parse_rcon_status(payload);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].slot, 3);
        assert_eq!(rows[0].name, "Eve");
        assert_eq!(rows[0].qport, None);
        assert_eq!(rows[0].rate, None);
    }

    #[test]
    fn test_parse_rcon_status_header_only() {
        assert!(parse_rcon_status("map: ut4_abbey\nheader\n---\n").is_empty());
        assert!(parse_rcon_status("").is_empty());
    }
}
