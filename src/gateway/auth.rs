//! OAuth2 access tokens for Google APIs.
//!
//! A service-account key file is turned into a short-lived bearer token by
//! signing an RS256 JWT assertion and exchanging it at the key's token
//! endpoint. Tokens are cached and refreshed 60 s before they expire, so a
//! run that makes a dozen calls signs at most one assertion.

use crate::error::AuthError;
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Scopes needed to upload images, move files, and edit forms.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/forms.body",
];

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const REFRESH_MARGIN: Duration = Duration::from_secs(60);
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Source of bearer tokens for the Google adapter.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, AuthError>;
}

/// A fixed token, e.g. one minted by `gcloud auth print-access-token`.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS as u64
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Service-account token provider with an in-process cache.
pub struct ServiceAccountTokens {
    client_email: String,
    token_uri: String,
    key: EncodingKey,
    http: reqwest::Client,
    cache: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for ServiceAccountTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountTokens")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountTokens {
    /// Load a service-account JSON key file.
    pub fn from_file(path: &Path, http: reqwest::Client) -> Result<Self, AuthError> {
        let raw = std::fs::read_to_string(path).map_err(|source| AuthError::CredentialsUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw, path, http)
    }

    fn from_json(raw: &str, path: &Path, http: reqwest::Client) -> Result<Self, AuthError> {
        let malformed = |detail: String| AuthError::CredentialsMalformed {
            path: PathBuf::from(path),
            detail,
        };
        let key: ServiceAccountKey = serde_json::from_str(raw).map_err(|e| malformed(e.to_string()))?;
        let encoding = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| malformed(format!("private_key: {e}")))?;

        Ok(Self {
            client_email: key.client_email,
            token_uri: key.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            key: encoding,
            http,
            cache: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    fn assertion(&self) -> Result<String, AuthError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &self.client_email,
            scope: SCOPES.join(" "),
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    async fn exchange(&self) -> Result<TokenResponse, AuthError> {
        let assertion = self.assertion()?;
        let response = self
            .http
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Exchange(format!("HTTP {status}: {body}")));
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountTokens {
    async fn access_token(&self) -> Result<String, AuthError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.value.clone());
            }
        }

        let token = self.exchange().await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_MARGIN);
        debug!(
            client = %self.client_email,
            expires_in = token.expires_in,
            "Obtained access token"
        );
        *cache = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_unreadable() {
        let err = ServiceAccountTokens::from_file(
            Path::new("/definitely/not/here.json"),
            reqwest::Client::new(),
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::CredentialsUnreadable { .. }), "got {err:?}");
    }

    #[test]
    fn non_json_is_malformed() {
        let err = ServiceAccountTokens::from_json("nope", Path::new("k.json"), reqwest::Client::new())
            .unwrap_err();
        assert!(matches!(err, AuthError::CredentialsMalformed { .. }), "got {err:?}");
    }

    #[test]
    fn bad_private_key_is_malformed() {
        let raw = r#"{"client_email":"svc@p.iam.gserviceaccount.com","private_key":"not a pem"}"#;
        let err = ServiceAccountTokens::from_json(raw, Path::new("k.json"), reqwest::Client::new())
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("private_key"), "got: {msg}");
    }

    #[tokio::test]
    async fn static_token_is_returned_verbatim() {
        let t = StaticToken("ya29.abc".into());
        assert_eq!(t.access_token().await.unwrap(), "ya29.abc");
    }

    #[test]
    fn scopes_cover_drive_and_forms() {
        assert!(SCOPES.iter().any(|s| s.ends_with("/drive")));
        assert!(SCOPES.iter().any(|s| s.ends_with("/forms.body")));
    }
}
