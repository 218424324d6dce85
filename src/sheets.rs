//! Spreadsheet title lookup
//!
//! Resolves a submitted Google Sheets link into the spreadsheet's title using
//! a service account. A successful lookup doubles as a permission check: the
//! service account can only read sheets that were shared with it.

#![allow(clippy::non_std_lazy_statics)]

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use lazy_regex::lazy_regex;
use moka::future::Cache;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Read-only spreadsheet scope requested for the service account
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Google issues tokens for one hour; refresh a little earlier.
const TOKEN_TTL: Duration = Duration::from_secs(50 * 60);
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Match the spreadsheet id in `/spreadsheets/d/<id>`
static RE_SPREADSHEET_ID: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"/spreadsheets/d/([a-zA-Z0-9_-]+)");

/// Errors raised while resolving a spreadsheet title
#[derive(Error, Debug)]
pub enum SheetsError {
    /// The submitted text is not a spreadsheet link
    #[error("Not a spreadsheet link: {0}")]
    InvalidUrl(String),
    /// The service-account key could not be loaded
    #[error("Credentials error: {0}")]
    Credentials(String),
    /// Token exchange was rejected
    #[error("Auth error: {0}")]
    Auth(String),
    /// The request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Transport-level failure
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),
    /// Non-success response from the Sheets API
    #[error("Sheets API returned {status}: {body}")]
    Status {
        /// HTTP status
        status: StatusCode,
        /// Response body
        body: String,
    },
    /// Response body did not contain a title
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for SheetsError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(e)
        }
    }
}

/// Resolves a spreadsheet link into its display title
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SheetResolver: Send + Sync {
    /// Canonical title of the spreadsheet behind `url`
    async fn resolve(&self, url: &str) -> Result<String, SheetsError>;
}

/// Fields of a Google service-account key file used here
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Service account address users share their sheets with
    pub client_email: String,
    /// PEM-encoded RSA private key
    pub private_key: String,
    /// OAuth token endpoint
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Load a key file downloaded from the Google Cloud console.
    ///
    /// # Errors
    ///
    /// Returns `SheetsError::Credentials` if the file is missing or malformed.
    pub fn from_file(path: &Path) -> Result<Self, SheetsError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SheetsError::Credentials(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| SheetsError::Credentials(format!("{}: {e}", path.display())))
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct SpreadsheetResponse {
    properties: Option<SpreadsheetProperties>,
}

#[derive(Deserialize)]
struct SpreadsheetProperties {
    title: Option<String>,
}

/// Extract the spreadsheet id from a Google Sheets link.
///
/// # Examples
///
/// ```
/// use scoredesk::sheets::spreadsheet_id;
/// let url = "https://docs.google.com/spreadsheets/d/1FzS710Q-x_Y/edit#gid=0";
/// assert_eq!(spreadsheet_id(url), Some("1FzS710Q-x_Y"));
/// assert_eq!(spreadsheet_id("https://example.com"), None);
/// ```
#[must_use]
pub fn spreadsheet_id(url: &str) -> Option<&str> {
    let parsed = reqwest::Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    RE_SPREADSHEET_ID
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Sheets API client authenticated as a service account
pub struct GoogleSheetsClient {
    http: reqwest::Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    token_cache: Cache<(), String>,
}

impl GoogleSheetsClient {
    /// Create a client for the given service account.
    ///
    /// # Errors
    ///
    /// Returns an error if the private key is invalid or the HTTP client
    /// cannot be built.
    pub fn new(key: ServiceAccountKey, timeout: Duration) -> Result<Self, SheetsError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| SheetsError::Credentials(format!("invalid private key: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SheetsError::Http)?;
        let token_cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(TOKEN_TTL)
            .build();

        info!(
            "Sheets client initialized for {} (timeout {}s).",
            key.client_email,
            timeout.as_secs()
        );

        Ok(Self {
            http,
            key,
            encoding_key,
            token_cache,
        })
    }

    /// Load the key file and create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the key file cannot be loaded.
    pub fn from_key_file(path: &Path, timeout: Duration) -> Result<Self, SheetsError> {
        Self::new(ServiceAccountKey::from_file(path)?, timeout)
    }

    /// Address sheets must be shared with
    #[must_use]
    pub fn service_account_email(&self) -> &str {
        &self.key.client_email
    }

    async fn access_token(&self) -> Result<String, SheetsError> {
        if let Some(token) = self.token_cache.get(&()).await {
            return Ok(token);
        }

        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let assertion =
            jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
                .map_err(|e| SheetsError::Auth(format!("failed to sign assertion: {e}")))?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SheetsError::Auth(format!("token endpoint returned {status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SheetsError::Auth(format!("invalid token response: {e}")))?;
        debug!("Obtained new Sheets access token.");
        self.token_cache.insert((), token.access_token.clone()).await;
        Ok(token.access_token)
    }
}

#[async_trait]
impl SheetResolver for GoogleSheetsClient {
    async fn resolve(&self, url: &str) -> Result<String, SheetsError> {
        let id = spreadsheet_id(url).ok_or_else(|| SheetsError::InvalidUrl(url.to_string()))?;
        let token = self.access_token().await?;

        let response = self
            .http
            .get(format!("{SHEETS_API_BASE}/{id}"))
            .query(&[("fields", "properties.title")])
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                self.token_cache.invalidate(&()).await;
            }
            let body = response.text().await.unwrap_or_default();
            return Err(SheetsError::Status { status, body });
        }

        let sheet: SpreadsheetResponse = response
            .json()
            .await
            .map_err(|e| SheetsError::MalformedResponse(e.to_string()))?;
        sheet
            .properties
            .and_then(|p| p.title)
            .filter(|title| !title.trim().is_empty())
            .ok_or_else(|| SheetsError::MalformedResponse("missing properties.title".to_string()))
    }
}
