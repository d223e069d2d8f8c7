use std::collections::HashMap;

use uuid::Uuid;

use parley_types::api::SendMessageRequest;
use parley_types::events::ServerEvent;
use parley_types::models::{Message, User};

use crate::auth_store::AuthStore;
use crate::error::{ClientError, Result};

/// Conversation state: contacts, the open thread and unseen counters.
///
/// Holds no connection of its own. Every call that talks to the server
/// borrows the session from an [`AuthStore`].
#[derive(Default)]
pub struct ChatStore {
    users: Vec<User>,
    selected: Option<User>,
    messages: Vec<Message>,
    unseen: HashMap<Uuid, u32>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn selected_user(&self) -> Option<&User> {
        self.selected.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn unseen(&self) -> &HashMap<Uuid, u32> {
        &self.unseen
    }

    pub fn unseen_from(&self, sender: Uuid) -> u32 {
        self.unseen.get(&sender).copied().unwrap_or(0)
    }

    /// Reload contacts and the server's unseen counts.
    pub async fn get_users(&mut self, auth: &AuthStore) -> Result<()> {
        let resp = auth.api().users().await?;
        self.users = resp.users;
        self.unseen = resp.unseen_messages;
        if let Some(active) = self.selected.as_ref().map(|u| u.id) {
            self.unseen.remove(&active);
        }
        Ok(())
    }

    /// Replace the open thread with the server's copy.
    pub async fn get_messages(&mut self, auth: &AuthStore, user_id: Uuid) -> Result<()> {
        let resp = auth.api().messages(user_id).await?;
        self.messages = resp.messages;
        Ok(())
    }

    /// Open a thread (or close it with `None`). Clears the local thread and
    /// the unseen counter for the newly selected user.
    pub fn select_user(&mut self, user: Option<User>) {
        self.messages.clear();
        if let Some(user) = &user {
            self.unseen.remove(&user.id);
        }
        self.selected = user;
    }

    /// Send to the selected user and append the stored message locally
    /// without waiting for the socket. Returns the appended message.
    pub async fn send_message(&mut self, auth: &AuthStore, body: SendMessageRequest) -> Result<Message> {
        let me = auth.user().ok_or(ClientError::NotLoggedIn)?.id;
        let to = self.selected.as_ref().ok_or(ClientError::NoConversation)?.id;

        let mut message = auth.api().send(to, &body).await?.message;
        message.sender_id = me;
        self.messages.push(message.clone());
        Ok(message)
    }

    /// Tell the server a pushed message has been read.
    pub async fn mark_seen(&self, auth: &AuthStore, message_id: Uuid) -> Result<()> {
        auth.api().mark_seen(message_id).await?;
        Ok(())
    }

    /// Fold a socket event into local state. Returns the id of a message that
    /// landed in the open thread, which the caller may mark as seen.
    pub fn apply_event(&mut self, event: &ServerEvent, me: Uuid) -> Option<Uuid> {
        let ServerEvent::NewMessage(message) = event else {
            return None;
        };
        // Own messages are already appended by send_message.
        if message.sender_id == me {
            return None;
        }

        let open = self.selected.as_ref().map(|u| u.id);
        if open == Some(message.sender_id) {
            self.messages.push(message.clone());
            Some(message.id)
        } else {
            *self.unseen.entry(message.sender_id).or_insert(0) += 1;
            None
        }
    }

    /// Image URLs shared in the open thread, oldest first.
    pub fn media(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter_map(|m| m.image.as_deref())
            .collect()
    }
}
