//! Boundary to the chat command catalogue.
//!
//! Every `say` line in the game log becomes a [`ChatCommand`] handed to a
//! [`CommandDispatcher`] together with read access to the session directory
//! and the controller for submitting commands.

use crate::controller::GameController;
use crate::session::SessionDirectory;
use log::{debug, info};

/// A chat line split into speaker slot and first word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCommand {
    pub slot: u32,
    /// First whitespace-delimited token of the message, e.g. `!kick`
    pub command: String,
    /// The whole `<slot> <name>: <message>` text
    pub line: String,
}

impl ChatCommand {
    /// Message text following the command token, trimmed.
    pub fn args(&self) -> &str {
        self.line
            .split_once(": ")
            .and_then(|(_, message)| message.trim_start().strip_prefix(self.command.as_str()))
            .map(str::trim)
            .unwrap_or("")
    }
}

pub trait CommandDispatcher: Send + Sync {
    /// Called once per chat line while the directory read lock is held.
    fn dispatch(&self, chat: &ChatCommand, directory: &SessionDirectory, controller: &GameController);
}

/// Records chat commands without acting on them.
pub struct LoggingDispatcher;

impl CommandDispatcher for LoggingDispatcher {
    fn dispatch(&self, chat: &ChatCommand, directory: &SessionDirectory, _controller: &GameController) {
        if !chat.command.starts_with('!') {
            return;
        }

        match directory.get(chat.slot) {
            Some(session) => info!(
                "{} [{}] ({}) issued {} {}",
                session.pretty_name,
                chat.slot,
                session.level,
                chat.command,
                chat.args()
            ),
            None => debug!("Chat command {} from unknown slot {}", chat.command, chat.slot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(slot: u32, command: &str, line: &str) -> ChatCommand {
        ChatCommand {
            slot,
            command: command.to_string(),
            line: line.to_string(),
        }
    }

    #[test]
    fn test_args_after_command() {
        let chat = chat(2, "!force", "2 Alice: !force bob red");
        assert_eq!(chat.args(), "bob red");
    }

    #[test]
    fn test_args_empty() {
        assert_eq!(chat(2, "!list", "2 Alice: !list").args(), "");
        assert_eq!(chat(2, "!list", "2 Alice: !list   ").args(), "");
    }

    #[test]
    fn test_args_ignores_command_text_in_name() {
        let chat = chat(4, "!kick", "4 !kickme: !kick Bob");
        assert_eq!(chat.args(), "Bob");
    }

    #[test]
    fn test_args_without_message() {
        assert_eq!(chat(1022, "", "garbage").args(), "");
    }
}
