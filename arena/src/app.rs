//! Line-mode input parsing and output formatting for the `arena` binary.

use arena_proto::model::{ChatMessage, Friend, UnreadSummary, UserId};

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Plain text for the selected peer.
    Send(String),
    /// `/with <username>`: open a conversation.
    With(String),
    /// `/friends`: list friends.
    Friends,
    /// `/unread`: show the unread summary.
    Unread,
    /// `/read <userId>`: mark messages from a sender read.
    Read(UserId),
    /// `/help`
    Help,
    /// `/quit`
    Quit,
    /// Blank line.
    Empty,
    /// A command that could not be parsed; holds a usage hint.
    Invalid(String),
}

/// Usage text printed by `/help`.
pub const HELP: &str = "\
commands:
  /with <username>   open the conversation with a friend
  /friends           list friends
  /unread            show unread messages
  /read <userId>     mark messages from a sender as read
  /quit              exit
anything else is sent to the open conversation";

/// Parses one input line.
#[must_use]
pub fn parse_input(line: &str) -> Input {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.trim_start().strip_prefix('/') else {
        return Input::Send(line.to_string());
    };

    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(n, a)| (n, a.trim()));
    match (name.to_ascii_lowercase().as_str(), arg) {
        ("with", "") => Input::Invalid("usage: /with <username>".to_string()),
        ("with", who) => Input::With(who.to_string()),
        ("friends", _) => Input::Friends,
        ("unread", _) => Input::Unread,
        ("read", "") => Input::Invalid("usage: /read <userId>".to_string()),
        ("read", id) => Input::Read(UserId::new(id)),
        ("help", _) => Input::Help,
        ("quit" | "exit", _) => Input::Quit,
        (other, _) => Input::Invalid(format!("unknown command /{other}, try /help")),
    }
}

/// Formats a transcript line. Messages from `me` are labelled `you`;
/// others use the peer's username when known.
#[must_use]
pub fn format_message(message: &ChatMessage, me: &UserId, peer: Option<&Friend>, clock: &str) -> String {
    let author = if message.sender_id == *me {
        "you".to_string()
    } else {
        peer.filter(|p| p.id == message.sender_id)
            .map_or_else(|| message.sender_id.to_string(), |p| p.username.clone())
    };
    format!("[{clock}] {author}: {}", message.content)
}

/// Formats the friend list.
#[must_use]
pub fn format_friends(friends: &[Friend]) -> Vec<String> {
    if friends.is_empty() {
        return vec!["no friends yet".to_string()];
    }
    friends
        .iter()
        .map(|f| {
            let name = format!("{} {}", f.firstname, f.lastname);
            let name = name.trim();
            if name.is_empty() {
                format!("  {} (id {})", f.username, f.id)
            } else {
                format!("  {} - {name} (id {})", f.username, f.id)
            }
        })
        .collect()
}

/// Formats the unread summary.
#[must_use]
pub fn format_unread(summary: &UnreadSummary) -> Vec<String> {
    let mut lines = vec![format!("{} unread", summary.total_unread)];
    lines.extend(summary.items.iter().map(|item| {
        format!(
            "  {} (id {}): {} - {}",
            item.from_username, item.from_user_id, item.count, item.preview
        )
    }));
    lines
}
