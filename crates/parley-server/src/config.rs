use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::warn;

/// Placeholder secrets that only make sense on a developer machine.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

/// Credentials for the hosted media service.
#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// `*` allows any origin.
    pub allowed_origin: String,
    pub public_url: String,
    pub upload_dir: PathBuf,
    /// `None` when any of the three variables is unset; images then go to `upload_dir`.
    pub cloudinary: Option<CloudinaryConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, so tests don't have to touch the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let host = var("PARLEY_HOST", "0.0.0.0");
        let port: u16 = var("PARLEY_PORT", "5001")
            .parse()
            .context("PARLEY_PORT must be a port number")?;

        let jwt_secret = var("PARLEY_JWT_SECRET", "dev-secret-change-me");
        if jwt_secret.is_empty() {
            bail!("PARLEY_JWT_SECRET is set but empty");
        }
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            warn!("PARLEY_JWT_SECRET is a placeholder; set a real secret before deploying");
        }

        let cloudinary = match (
            get("CLOUDINARY_CLOUD_NAME"),
            get("CLOUDINARY_API_KEY"),
            get("CLOUDINARY_API_SECRET"),
        ) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => Some(CloudinaryConfig {
                cloud_name,
                api_key,
                api_secret,
            }),
            (None, None, None) => None,
            _ => {
                warn!("Cloudinary credentials incomplete; storing images locally");
                None
            }
        };

        Ok(Self {
            public_url: var("PARLEY_PUBLIC_URL", &format!("http://localhost:{}", port)),
            db_path: var("PARLEY_DB_PATH", "parley.db").into(),
            allowed_origin: var("PARLEY_ALLOWED_ORIGIN", "*"),
            upload_dir: var("PARLEY_UPLOAD_DIR", "./uploads").into(),
            host,
            port,
            jwt_secret,
            cloudinary,
        })
    }
}
