use reqwest::{Client, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use parley_types::api::{
    Ack, AuthResponse, CheckResponse, LoginRequest, MessagesResponse, ProfileResponse,
    SendMessageRequest, SendMessageResponse, SignupRequest, UpdateProfileRequest, UsersResponse,
};

use crate::error::{ClientError, Result};

/// Thin REST client. Every response is checked for `success` before it is
/// decoded into the expected shape.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    /// WebSocket URL for `user_id`, carrying the current token when there is one.
    pub fn socket_url(&self, user_id: Uuid) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };

        match &self.token {
            Some(token) => format!("{}/socket?userId={}&token={}", ws_base, user_id, token),
            None => format!("{}/socket?userId={}", ws_base, user_id),
        }
    }

    pub async fn check(&self) -> Result<CheckResponse> {
        self.call(Method::GET, "/api/auth/check", None::<&()>).await
    }

    pub async fn signup(&self, req: &SignupRequest) -> Result<AuthResponse> {
        self.call(Method::POST, "/api/auth/signup", Some(req)).await
    }

    pub async fn login(&self, req: &LoginRequest) -> Result<AuthResponse> {
        self.call(Method::POST, "/api/auth/login", Some(req)).await
    }

    pub async fn update_profile(&self, req: &UpdateProfileRequest) -> Result<ProfileResponse> {
        self.call(Method::PUT, "/api/auth/update-profile", Some(req)).await
    }

    pub async fn users(&self) -> Result<UsersResponse> {
        self.call(Method::GET, "/api/messages/users", None::<&()>).await
    }

    pub async fn messages(&self, user_id: Uuid) -> Result<MessagesResponse> {
        self.call(Method::GET, &format!("/api/messages/{}", user_id), None::<&()>)
            .await
    }

    pub async fn send(&self, user_id: Uuid, req: &SendMessageRequest) -> Result<SendMessageResponse> {
        self.call(Method::POST, &format!("/api/messages/send/{}", user_id), Some(req))
            .await
    }

    pub async fn mark_seen(&self, message_id: Uuid) -> Result<Ack> {
        self.call(Method::PUT, &format!("/api/messages/mark/{}", message_id), None::<&()>)
            .await
    }

    async fn call<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut req = self.http.request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let value: Value = req.send().await?.json().await?;
        if value.get("success").and_then(Value::as_bool) != Some(true) {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Request failed");
            return Err(ClientError::Rejected(message.to_string()));
        }

        Ok(serde_json::from_value(value)?)
    }
}
