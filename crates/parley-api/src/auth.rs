use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{error, info};
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::{ProfileChanges, UserRow, format_time};
use parley_gateway::Dispatcher;
use parley_types::api::{
    AuthResponse, CheckResponse, Claims, LoginRequest, ProfileResponse, SignupRequest,
    UpdateProfileRequest, UserData,
};

use crate::error::{ApiError, ApiResult};
use crate::media::MediaStore;
use crate::middleware::CurrentUser;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub media: Arc<dyn MediaStore>,
}

/// Tokens stay valid for this many days.
const TOKEN_TTL_DAYS: i64 = 30;

/// Run blocking DB work off the async runtime.
pub(crate) async fn run_db<F, T>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })?
        .map_err(ApiError::Internal)
}

/// POST /api/auth/signup
pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> ApiResult<Json<AuthResponse>> {
    let Json(req) = payload?;

    let (Some(full_name), Some(email), Some(password), Some(bio)) = (
        present(req.full_name),
        present(req.email),
        present(req.password),
        present(req.bio),
    ) else {
        return Err(ApiError::Validation("Missing Details".into()));
    };

    let lookup = email.clone();
    if run_db(&state, move |db| db.get_user_by_email(&lookup))
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("User already exists".into()));
    }

    let password_hash = hash_password(password).await?;

    let user_id = Uuid::new_v4();
    let now = format_time(chrono::Utc::now());
    let row = UserRow {
        id: user_id.to_string(),
        full_name,
        email,
        password: password_hash,
        bio,
        profile_pic: String::new(),
        created_at: now.clone(),
        updated_at: now,
    };

    // A concurrent signup may have taken the email since the lookup above.
    let stored = row.clone();
    if !run_db(&state, move |db| db.create_user(&stored)).await? {
        return Err(ApiError::Conflict("User already exists".into()));
    }

    let token = create_token(&state.jwt_secret, user_id)?;
    info!("User signed up: {}", user_id);

    Ok(Json(AuthResponse {
        success: true,
        message: "Account created successfully".into(),
        user_data: UserData {
            user: row.into_user(),
            token,
        },
    }))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<AuthResponse>> {
    let Json(req) = payload?;

    let (Some(email), Some(password)) = (present(req.email), present(req.password)) else {
        return Err(ApiError::Validation("Missing Details".into()));
    };

    let user = run_db(&state, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or_else(|| ApiError::NotFound("User does not exist".into()))?;

    verify_password(password, user.password.clone()).await?;

    let user = user.into_user();
    let token = create_token(&state.jwt_secret, user.id)?;
    info!("User logged in: {}", user.id);

    Ok(Json(AuthResponse {
        success: true,
        message: "Login successful".into(),
        user_data: UserData { user, token },
    }))
}

/// GET /api/auth/check. The middleware already resolved the user.
pub async fn check(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<CheckResponse> {
    Json(CheckResponse {
        success: true,
        message: "User is authenticated".into(),
        user,
    })
}

/// PUT /api/auth/update-profile
///
/// An avatar payload is uploaded first; the profile is only written once the
/// media service has returned a URL.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> ApiResult<Json<ProfileResponse>> {
    let Json(req) = payload?;

    let mut changes = ProfileChanges {
        full_name: present(req.full_name),
        bio: present(req.bio),
        profile_pic: None,
    };

    if let Some(data_uri) = present(req.profile_pic) {
        let url = state
            .media
            .upload(&data_uri)
            .await
            .map_err(|e| ApiError::Upstream(format!("Avatar upload failed: {}", e)))?;
        changes.profile_pic = Some(url);
    }

    let id = user.id.to_string();
    let now = format_time(chrono::Utc::now());
    let updated = run_db(&state, move |db| db.update_profile(&id, &changes, &now))
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(Json(ProfileResponse {
        success: true,
        message: "Profile updated successfully".into(),
        user: updated.into_user(),
    }))
}

pub fn create_token(secret: &str, user_id: Uuid) -> ApiResult<String> {
    let claims = Claims {
        sub: user_id,
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(e.into()))
}

/// Check signature and expiry; returns the claims on success.
pub fn verify_token(secret: &str, token: &str) -> ApiResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| ApiError::Auth(format!("Invalid token: {}", e)))
}

/// Run CPU-heavy work (argon2) on the blocking pool.
async fn blocking<F, T>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?
}

/// Salted Argon2id hash in PHC string form.
async fn hash_password(password: String) -> ApiResult<String> {
    blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
    })
    .await
}

async fn verify_password(password: String, stored_hash: String) -> ApiResult<()> {
    blocking(move || {
        let parsed = PasswordHash::new(&stored_hash)
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("stored hash unreadable: {}", e)))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| ApiError::Auth("Invalid Credentials".into()))
    })
    .await
}

/// Treat blank strings like absent fields.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_roundtrip_carries_subject() {
        let id = Uuid::new_v4();
        let token = create_token("secret", id).unwrap();
        assert_eq!(verify_token("secret", &token).unwrap().sub, id);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = create_token("secret", Uuid::new_v4()).unwrap();
        assert!(matches!(verify_token("other", &token), Err(ApiError::Auth(_))));
    }

    #[tokio::test]
    async fn password_hash_verifies_only_the_original_password() {
        let hash = hash_password("correct horse".into()).await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse".into(), hash.clone()).await.is_ok());
        assert!(matches!(
            verify_password("battery staple".into(), hash).await,
            Err(ApiError::Auth(_))
        ));
    }

    #[test]
    fn blank_fields_count_as_missing() {
        assert_eq!(present(Some("  ".into())), None);
        assert_eq!(present(Some("x".into())), Some("x".into()));
        assert_eq!(present(None), None);
    }
}
