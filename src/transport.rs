use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Inbound chat-platform events, pre-parsed by the transport layer.
/// The `run` subcommand reads these as JSON lines on stdin.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Command {
        chat_id: String,
        user_id: String,
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        message_id: Option<i64>,
    },
    Text {
        chat_id: String,
        user_id: String,
        text: String,
    },
    ChatCreated {
        chat_id: String,
    },
    ChatMigrated {
        chat_id: String,
        new_chat_id: String,
    },
    MembersAdded {
        chat_id: String,
        #[serde(default)]
        member_names: Vec<String>,
        #[serde(default)]
        includes_self: bool,
    },
    Private {
        chat_id: String,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub chat_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<i64>,
}

/// Handle the core uses to request message delivery. The other end is
/// owned by the transport; a closed channel means shutdown is underway,
/// so failures are logged rather than propagated.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Outbox {
    pub fn new(tx: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send_text(&self, chat_id: &str, text: impl Into<String>) {
        self.deliver(OutboundMessage {
            chat_id: chat_id.to_string(),
            text: text.into(),
            reply_to: None,
        });
    }

    pub fn reply(&self, chat_id: &str, reply_to: Option<i64>, text: impl Into<String>) {
        self.deliver(OutboundMessage {
            chat_id: chat_id.to_string(),
            text: text.into(),
            reply_to,
        });
    }

    fn deliver(&self, message: OutboundMessage) {
        if self.tx.send(message).is_err() {
            warn!("outbox channel closed; dropping outbound message");
        }
    }
}

/// Chat-platform membership query, consulted before mutating commands.
pub trait Capabilities {
    fn is_admin(&self, chat_id: &str, user_id: &str) -> bool;
}

/// CLI-configured implementation: an explicit allow-list, or chats where
/// every member counts as an administrator.
#[derive(Clone, Debug, Default)]
pub struct AdminList {
    users: HashSet<String>,
    everyone: bool,
}

impl AdminList {
    pub fn new(users: impl IntoIterator<Item = String>, everyone: bool) -> Self {
        Self {
            users: users.into_iter().collect(),
            everyone,
        }
    }
}

impl Capabilities for AdminList {
    fn is_admin(&self, _chat_id: &str, user_id: &str) -> bool {
        self.everyone || self.users.contains(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_list_checks_membership() {
        let admins = AdminList::new(vec!["7".to_string()], false);
        assert!(admins.is_admin("c", "7"));
        assert!(!admins.is_admin("c", "8"));
    }

    #[test]
    fn everyone_flag_admits_anyone() {
        let admins = AdminList::new(Vec::new(), true);
        assert!(admins.is_admin("c", "anybody"));
    }

    #[test]
    fn event_json_round_trip() {
        let line = r#"{"type":"command","chat_id":"42","user_id":"u1","command":"stat","args":[],"message_id":5}"#;
        let event: Event = serde_json::from_str(line).expect("parse event");
        match event {
            Event::Command {
                chat_id,
                command,
                message_id,
                ..
            } => {
                assert_eq!(chat_id, "42");
                assert_eq!(command, "stat");
                assert_eq!(message_id, Some(5));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn outbox_collects_messages() {
        let (outbox, mut rx) = Outbox::channel();
        outbox.send_text("42", "hello");
        outbox.reply("42", Some(9), "pong");
        let first = rx.try_recv().expect("first message");
        assert_eq!(first.chat_id, "42");
        assert_eq!(first.reply_to, None);
        let second = rx.try_recv().expect("second message");
        assert_eq!(second.reply_to, Some(9));
    }
}
