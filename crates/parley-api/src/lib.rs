pub mod auth;
pub mod error;
pub mod media;
pub mod messages;
pub mod middleware;
pub mod router;

pub use auth::{AppState, AppStateInner};
pub use error::{ApiError, ApiResult};
