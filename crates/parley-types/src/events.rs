use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events pushed from the server over the socket channel.
///
/// Encoded as `{"event": "<name>", "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Full set of users that currently hold an open connection.
    /// Sent to every connection whenever someone joins or leaves.
    GetOnlineUsers(Vec<Uuid>),

    /// A message was just stored for the receiving connection's user.
    NewMessage(Message),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetOnlineUsers(_) => "getOnlineUsers",
            Self::NewMessage(_) => "newMessage",
        }
    }
}
