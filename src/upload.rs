#![doc = "Google Drive implementation of the core `RemoteStore` seam: keeps a copy of every finished bundle in a shared Drive folder."]
//
//! # Google Drive remote store
//!
//! [`DriveClient`] authenticates as a service account and uploads the final PDF of
//! each job into one fixed folder.
//!
//! - Authentication: a JWT signed with the service account's private key (RS256) is
//!   exchanged at the key's `token_uri` for an access token. The token is cached until
//!   shortly before it expires.
//! - Upload: a resumable upload session is opened with the file metadata, then the PDF
//!   bytes are sent to the session URL in one request. Drive answers with `{id, name}`.
//!
//! Construct it with [`DriveClient::from_settings`], using the settings resolved by
//! [`crate::load_config`] (`DRIVE_KEY_FILE`, `DRIVE_FOLDER_ID`).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use code_bundle_core::contract::{BoxError, RemoteStore, StoredFile};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use serde::{Deserialize, Serialize};
use std::fs;
use tokio::sync::Mutex;

use crate::load_config::DriveSettings;

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const PDF_MIME: &str = "application/pdf";

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("cannot read service-account key file: {0}")]
    KeyFile(#[from] std::io::Error),
    #[error("invalid service-account key file: {0}")]
    KeyFormat(#[from] serde_json::Error),
    #[error("cannot sign token request: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error("request to Google failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{stage} rejected with {status}: {body}")]
    Status {
        stage: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("upload session response carried no Location header")]
    MissingLocation,
}

/// The fields of a Google service-account key file that are needed here.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Serialize)]
struct FileMetadata<'a> {
    name: &'a str,
    parents: [&'a str; 1],
    #[serde(rename = "mimeType")]
    mime_type: &'a str,
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

pub struct DriveClient {
    http: reqwest::Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    folder_id: String,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl DriveClient {
    pub fn new(key: ServiceAccountKey, folder_id: impl Into<String>) -> Result<Self, DriveError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        let folder_id = folder_id.into();
        tracing::info!(
            client_email = %key.client_email,
            folder_id = %folder_id,
            "Initialized DriveClient"
        );
        Ok(Self {
            http: reqwest::Client::new(),
            key,
            encoding_key,
            folder_id,
            api_base: DEFAULT_API_BASE.to_string(),
            token: Mutex::new(None),
        })
    }

    pub fn from_settings(settings: &DriveSettings) -> Result<Self, DriveError> {
        let raw = fs::read_to_string(&settings.key_file).map_err(|e| {
            tracing::error!(error = ?e, key_file = %settings.key_file.display(), "Failed to read service-account key");
            e
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&raw).map_err(|e| {
            tracing::error!(error = ?e, key_file = %settings.key_file.display(), "Failed to parse service-account key");
            e
        })?;
        Self::new(key, settings.folder_id.clone())
    }

    /// Send Drive API calls to `api_base` instead of `https://www.googleapis.com`.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    async fn access_token(&self) -> Result<String, DriveError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref() {
            if token.expires_at > now + Duration::seconds(60) {
                return Ok(token.access_token.clone());
            }
        }

        let claims = Claims {
            iss: &self.key.client_email,
            scope: DRIVE_SCOPE,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)?;

        tracing::debug!(token_uri = %self.key.token_uri, "Requesting Drive access token");
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let response = check_status(response, "token request").await?;
        let token: TokenResponse = response.json().await?;

        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in),
        });
        Ok(access_token)
    }

    /// Store `content` as `file_name` in the configured folder.
    pub async fn upload_pdf(&self, file_name: &str, content: Vec<u8>) -> Result<StoredFile, DriveError> {
        let token = self.access_token().await?;

        let metadata = FileMetadata {
            name: file_name,
            parents: [self.folder_id.as_str()],
            mime_type: PDF_MIME,
        };
        let session = self
            .http
            .post(format!(
                "{}/upload/drive/v3/files?uploadType=resumable&fields=id,name",
                self.api_base
            ))
            .bearer_auth(&token)
            .header("X-Upload-Content-Type", PDF_MIME)
            .header("X-Upload-Content-Length", content.len())
            .json(&metadata)
            .send()
            .await?;
        let session = check_status(session, "upload session").await?;
        let session_url = session
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(DriveError::MissingLocation)?
            .to_string();

        let size = content.len();
        let response = self
            .http
            .put(&session_url)
            .bearer_auth(&token)
            .header(CONTENT_TYPE, PDF_MIME)
            .body(content)
            .send()
            .await?;
        let response = check_status(response, "file upload").await?;
        let stored: StoredFile = response.json().await?;
        tracing::info!(id = %stored.id, name = %stored.name, size, "File uploaded to Drive");
        Ok(stored)
    }
}

async fn check_status(
    response: reqwest::Response,
    stage: &'static str,
) -> Result<reqwest::Response, DriveError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::error!(%status, stage, body = %body, "Drive API returned an error");
    Err(DriveError::Status { stage, status, body })
}

#[async_trait]
impl RemoteStore for DriveClient {
    async fn store(&self, file_name: &str, content: Vec<u8>) -> Result<StoredFile, BoxError> {
        tracing::info!(file_name, folder_id = %self.folder_id, "Uploading PDF to Google Drive");
        Ok(self.upload_pdf(file_name, content).await?)
    }
}
