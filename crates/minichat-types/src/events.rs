use serde::{Deserialize, Serialize};

use crate::models::{Group, Message};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Connection established. `username` is `None` for an anonymous connection.
    Ready { username: Option<String> },

    /// A message posted to a private-chat topic this connection subscribed to
    ChatMessage { chat_id: String, message: Message },

    /// A group message delivered to one member
    GroupMessage { group_id: i64, message: Message },

    /// Echo of a message this connection sent, with server-assigned fields
    MessageSent { message: Message },

    /// The receiving user was made a member of a new group
    GroupCreated { group: Group },

    /// A user came online or went offline
    PresenceUpdate { username: String, online: bool },

    /// A command from this connection was rejected
    Error { code: String, detail: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Bind an identity to a connection that is still anonymous
    Identify { token: String },

    /// Start receiving messages posted to a private-chat topic
    Subscribe { chat_id: String },

    Unsubscribe { chat_id: String },

    SendPrivate { chat_id: String, content: String },

    SendGroup { group_id: i64, content: String },
}
