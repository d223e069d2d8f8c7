//! Image upload collaborator used for avatars and image messages.
//!
//! Clients send images as base64 data URIs. A [`MediaStore`] turns one into
//! a public URL, which is what gets stored.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tracing::info;
use uuid::Uuid;

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store the image and return the URL it can be fetched from.
    async fn upload(&self, data_uri: &str) -> Result<String>;
}

/// Decoded `data:<mime>;base64,<payload>` URI.
#[derive(Debug, PartialEq)]
pub struct DataUri {
    pub mime: String,
    pub bytes: Vec<u8>,
}

pub fn parse_data_uri(uri: &str) -> Result<DataUri> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("not a data URI"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("data URI has no payload"))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| anyhow!("data URI is not base64 encoded"))?;

    let bytes = B64.decode(payload.trim()).context("invalid base64 payload")?;
    if bytes.is_empty() {
        bail!("empty image");
    }

    Ok(DataUri {
        mime: mime.to_ascii_lowercase(),
        bytes,
    })
}

fn extension_for(mime: &str) -> Option<&'static str> {
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/avif" => Some("avif"),
        _ => None,
    }
}

// -- Local disk --

/// Writes images under `dir` and hands out `{public_url}/uploads/{file}`.
/// The server mounts `dir` at `/uploads`.
pub struct LocalMediaStore {
    dir: PathBuf,
    public_url: String,
}

impl LocalMediaStore {
    pub fn new(dir: impl Into<PathBuf>, public_url: &str) -> Self {
        Self {
            dir: dir.into(),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn upload(&self, data_uri: &str) -> Result<String> {
        let image = parse_data_uri(data_uri)?;
        let ext = extension_for(&image.mime)
            .ok_or_else(|| anyhow!("unsupported image type {}", image.mime))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;

        let file_name = format!("{}.{}", Uuid::new_v4(), ext);
        let path = self.dir.join(&file_name);
        tokio::fs::write(&path, &image.bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;

        info!("Stored {} byte image at {}", image.bytes.len(), path.display());
        Ok(format!("{}/uploads/{}", self.public_url, file_name))
    }
}

// -- Cloudinary --

const CLOUDINARY_API: &str = "https://api.cloudinary.com/v1_1";

/// Signed uploads to a Cloudinary account.
pub struct CloudinaryStore {
    client: reqwest::Client,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

#[derive(Deserialize)]
struct CloudinaryUpload {
    secure_url: String,
}

#[derive(Deserialize)]
struct CloudinaryFailure {
    error: CloudinaryErrorBody,
}

#[derive(Deserialize)]
struct CloudinaryErrorBody {
    message: String,
}

impl CloudinaryStore {
    pub fn new(cloud_name: String, api_key: String, api_secret: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            cloud_name,
            api_key,
            api_secret,
        }
    }
}

/// Cloudinary request signature: params sorted by name, joined as
/// `k=v&k=v`, secret appended, SHA-1 hex digest.
pub fn sign_params(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha1::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl MediaStore for CloudinaryStore {
    async fn upload(&self, data_uri: &str) -> Result<String> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = sign_params(&[("timestamp", timestamp.as_str())], &self.api_secret);

        let url = format!("{}/{}/image/upload", CLOUDINARY_API, self.cloud_name);
        let resp = self
            .client
            .post(&url)
            .form(&[
                ("file", data_uri),
                ("api_key", self.api_key.as_str()),
                ("timestamp", timestamp.as_str()),
                ("signature", signature.as_str()),
            ])
            .send()
            .await
            .context("media service unreachable")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp
                .json::<CloudinaryFailure>()
                .await
                .map(|f| f.error.message)
                .unwrap_or_else(|_| status.to_string());
            bail!("media service rejected upload: {}", detail);
        }

        let body: CloudinaryUpload = resp.json().await.context("unexpected media response")?;
        info!("Uploaded image to {}", body.secure_url);
        Ok(body.secure_url)
    }
}
