//! Headless client for a parley server.
//!
//! [`AuthStore`] owns the session: token, signed-in user, online set and the
//! live socket. [`ChatStore`] owns the conversation state and borrows the
//! `AuthStore` for every call that needs the network.

pub mod auth_store;
pub mod chat_store;
pub mod error;
pub mod http;
pub mod socket;

pub use auth_store::{AuthStore, Credentials};
pub use chat_store::ChatStore;
pub use error::{ClientError, Result};
pub use http::ApiClient;
pub use socket::SocketHandle;
