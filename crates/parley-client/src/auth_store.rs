use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use parley_types::api::{LoginRequest, SignupRequest, UpdateProfileRequest};
use parley_types::events::ServerEvent;
use parley_types::models::User;

use crate::error::{ClientError, Result};
use crate::http::ApiClient;
use crate::socket::SocketHandle;

/// Which auth endpoint to hit, with its body.
pub enum Credentials {
    Signup(SignupRequest),
    Login(LoginRequest),
}

/// Session state: token, signed-in user, online set and the live socket.
pub struct AuthStore {
    api: ApiClient,
    user: Option<User>,
    online: Vec<Uuid>,
    socket: Option<SocketHandle>,
    events: Option<mpsc::UnboundedReceiver<ServerEvent>>,
}

impl AuthStore {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            user: None,
            online: Vec::new(),
            socket: None,
            events: None,
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.api.token()
    }

    pub fn online_users(&self) -> &[Uuid] {
        &self.online
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.online.contains(&user_id)
    }

    pub fn is_connected(&self) -> bool {
        self.socket.as_ref().is_some_and(SocketHandle::is_alive)
    }

    /// Resume a session from a stored token. On success the user is loaded
    /// and the socket opened; on failure the store is left signed out.
    pub async fn check(&mut self, token: String) -> Result<&User> {
        self.api.set_token(Some(token));
        match self.api.check().await {
            Ok(resp) => {
                self.close_socket().await;
                self.user = Some(resp.user);
                self.connect_socket().await;
                self.user.as_ref().ok_or(ClientError::NotLoggedIn)
            }
            Err(e) => {
                self.logout().await;
                Err(e)
            }
        }
    }

    /// Sign up or log in. Returns the server's confirmation message.
    pub async fn login(&mut self, credentials: Credentials) -> Result<String> {
        let resp = match &credentials {
            Credentials::Signup(req) => self.api.signup(req).await?,
            Credentials::Login(req) => self.api.login(req).await?,
        };

        info!("Signed in as {}", resp.user_data.user.id);
        // The previous session's socket is registered under its own user.
        self.close_socket().await;
        self.api.set_token(Some(resp.user_data.token));
        self.user = Some(resp.user_data.user);
        self.connect_socket().await;
        Ok(resp.message)
    }

    pub async fn logout(&mut self) {
        self.api.set_token(None);
        self.user = None;
        self.close_socket().await;
    }

    pub async fn update_profile(&mut self, req: &UpdateProfileRequest) -> Result<String> {
        if self.user.is_none() {
            return Err(ClientError::NotLoggedIn);
        }
        let resp = self.api.update_profile(req).await?;
        self.user = Some(resp.user);
        Ok(resp.message)
    }

    /// Wait for the next socket event. Pends forever while disconnected and
    /// yields `None` once when the server drops the socket.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        let event = match self.events.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        };
        if event.is_none() {
            warn!("Socket closed by server");
            self.events = None;
            self.socket = None;
            self.online.clear();
        }
        event
    }

    pub fn apply_event(&mut self, event: &ServerEvent) {
        if let ServerEvent::GetOnlineUsers(users) = event {
            self.online = users.clone();
        }
    }

    /// Open the socket for the current user. Presence is best effort, so a
    /// failure is logged and the session carries on over REST.
    async fn connect_socket(&mut self) {
        let Some(user) = &self.user else { return };

        match SocketHandle::connect(&self.api.socket_url(user.id)).await {
            Ok((socket, events)) => {
                self.socket = Some(socket);
                self.events = Some(events);
            }
            Err(e) => warn!("Socket connect failed: {}", e),
        }
    }

    async fn close_socket(&mut self) {
        self.events = None;
        self.online.clear();
        if let Some(socket) = self.socket.take() {
            socket.close().await;
        }
    }
}
