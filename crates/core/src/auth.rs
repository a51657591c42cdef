//! OAuth credentials and bearer-token minting.
//!
//! Supports the two key-file formats Google tooling produces (`service_account` and
//! `authorized_user`) plus a pre-minted access token. Minted tokens are cached until shortly
//! before they expire so a single process does not hit the token endpoint for every call.

use crate::config::CredentialsSource;
use crate::constants::{CLOUD_PLATFORM_SCOPE, DEFAULT_TOKEN_URI};
use crate::{CloudError, CloudResult};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::Mutex;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Clone, Deserialize)]
pub struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsFile {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
}

/// Credentials used to obtain bearer tokens.
#[derive(Clone)]
pub enum Credentials {
    AccessToken(String),
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::AccessToken(_) => f.write_str("AccessToken(<redacted>)"),
            Credentials::ServiceAccount(key) => f
                .debug_struct("ServiceAccount")
                .field("client_email", &key.client_email)
                .field("token_uri", &key.token_uri)
                .finish_non_exhaustive(),
            Credentials::AuthorizedUser(user) => f
                .debug_struct("AuthorizedUser")
                .field("client_id", &user.client_id)
                .field("token_uri", &user.token_uri)
                .finish_non_exhaustive(),
        }
    }
}

impl Credentials {
    /// Parse a JSON key file.
    pub fn from_json(json: &str) -> CloudResult<Self> {
        let file: CredentialsFile =
            serde_json::from_str(json).map_err(|e| CloudError::Credentials(e.to_string()))?;
        Ok(match file {
            CredentialsFile::ServiceAccount(key) => Credentials::ServiceAccount(key),
            CredentialsFile::AuthorizedUser(user) => Credentials::AuthorizedUser(user),
        })
    }

    pub async fn load(source: &CredentialsSource) -> CloudResult<Self> {
        match source {
            CredentialsSource::AccessToken(token) => Ok(Credentials::AccessToken(token.clone())),
            CredentialsSource::File(path) => {
                let json = tokio::fs::read_to_string(path)
                    .await
                    .map_err(CloudError::CredentialsRead)?;
                Self::from_json(&json)
            }
        }
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Mints and caches bearer tokens for one set of credentials.
pub struct Authenticator {
    http: reqwest::Client,
    credentials: Credentials,
    cached: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    pub fn new(http: reqwest::Client, credentials: Credentials) -> Self {
        Self {
            http,
            credentials,
            cached: Mutex::new(None),
        }
    }

    /// Returns a bearer token, minting a new one when the cached token is missing or about to
    /// expire.
    pub async fn token(&self) -> CloudResult<String> {
        if let Credentials::AccessToken(token) = &self.credentials {
            return Ok(token.clone());
        }

        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref() {
            if token.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) > now {
                return Ok(token.value.clone());
            }
        }

        let minted = self.mint(now).await?;
        let value = minted.value.clone();
        *cached = Some(minted);
        Ok(value)
    }

    async fn mint(&self, now: DateTime<Utc>) -> CloudResult<CachedToken> {
        let (token_uri, form) = match &self.credentials {
            Credentials::AccessToken(token) => {
                return Ok(CachedToken {
                    value: token.clone(),
                    expires_at: now + Duration::seconds(ASSERTION_LIFETIME_SECS),
                })
            }
            Credentials::ServiceAccount(key) => {
                let assertion = sign_assertion(key, now)?;
                (
                    key.token_uri.as_str(),
                    vec![("grant_type", JWT_BEARER_GRANT.to_string()), ("assertion", assertion)],
                )
            }
            Credentials::AuthorizedUser(user) => (
                user.token_uri.as_str(),
                vec![
                    ("grant_type", "refresh_token".to_string()),
                    ("client_id", user.client_id.clone()),
                    ("client_secret", user.client_secret.clone()),
                    ("refresh_token", user.refresh_token.clone()),
                ],
            ),
        };

        tracing::debug!("requesting access token from {}", token_uri);
        let response = self.http.post(token_uri).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CloudError::TokenExchange { status, body });
        }
        let token: TokenResponse = response.json().await?;

        Ok(CachedToken {
            value: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS)),
        })
    }
}

fn sign_assertion(key: &ServiceAccountKey, now: DateTime<Utc>) -> CloudResult<String> {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: CLOUD_PLATFORM_SCOPE,
        aud: &key.token_uri,
        iat: now.timestamp(),
        exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
    };
    let signing_key =
        EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(CloudError::TokenSigning)?;
    jsonwebtoken::encode(&header, &claims, &signing_key).map_err(CloudError::TokenSigning)
}
