use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use lookout_core::{GitHubConfig, InstallationToken, LookoutError};
use serde::{Deserialize, Serialize};

/// Seconds the `iat` claim is backdated to tolerate clock drift.
const CLOCK_SKEW_SECS: i64 = 60;
/// Lifetime of the app assertion, measured from the real current time.
const ASSERTION_TTL_SECS: i64 = 9 * 60;

/// Mints installation-scoped access tokens.
///
/// A fresh token is requested for every pipeline run; implementations
/// must not cache tokens across calls.
#[async_trait]
pub trait InstallationTokens: Send + Sync {
    async fn mint_installation_token(
        &self,
        installation_id: u64,
    ) -> Result<InstallationToken, LookoutError>;
}

/// Claims of the RS256 app assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl AppClaims {
    /// Claims for an assertion issued at `now` (unix seconds).
    ///
    /// # Examples
    ///
    /// ```
    /// use lookout_review::auth::AppClaims;
    ///
    /// let claims = AppClaims::issued_at("12345", 1_700_000_000);
    /// assert_eq!(claims.iat, 1_699_999_940);
    /// assert_eq!(claims.exp, 1_700_000_540);
    /// assert_eq!(claims.iss, "12345");
    /// ```
    pub fn issued_at(app_id: &str, now: i64) -> Self {
        Self {
            iat: now - CLOCK_SKEW_SECS,
            exp: now + ASSERTION_TTL_SECS,
            iss: app_id.to_string(),
        }
    }
}

/// Sign `claims` with an RSA private key in PEM form.
///
/// # Errors
///
/// Returns [`LookoutError::Auth`] if the key cannot be parsed or signing fails.
pub fn sign_app_jwt(claims: &AppClaims, private_key_pem: &str) -> Result<String, LookoutError> {
    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| LookoutError::Auth(format!("failed to parse private key: {e}")))?;
    encode(&Header::new(Algorithm::RS256), claims, &key)
        .map_err(|e| LookoutError::Auth(format!("failed to sign app JWT: {e}")))
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
}

/// GitHub App authenticator backed by the installation access token endpoint.
///
/// # Examples
///
/// ```
/// use lookout_core::GitHubConfig;
/// use lookout_review::auth::AppAuthenticator;
///
/// let auth = AppAuthenticator::new(&GitHubConfig::default()).unwrap();
/// ```
pub struct AppAuthenticator {
    http: reqwest::Client,
    config: GitHubConfig,
}

impl AppAuthenticator {
    /// Build an authenticator from the `[github]` section.
    ///
    /// Credentials are checked when a token is minted, not here, so a
    /// server without app credentials can still start and accept webhooks.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &GitHubConfig) -> Result<Self, LookoutError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent("lookout")
            .build()
            .map_err(|e| LookoutError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    fn app_jwt(&self) -> Result<String, LookoutError> {
        let app_id = self.config.app_id.as_deref().filter(|s| !s.is_empty());
        let private_key = self
            .config
            .resolve_private_key()
            .map_err(|e| LookoutError::Auth(e.to_string()))?;
        let (Some(app_id), Some(private_key)) = (app_id, private_key) else {
            return Err(LookoutError::Auth(
                "missing GITHUB_APP_ID or GITHUB_PRIVATE_KEY".into(),
            ));
        };
        let claims = AppClaims::issued_at(app_id, chrono::Utc::now().timestamp());
        sign_app_jwt(&claims, &private_key)
    }
}

#[async_trait]
impl InstallationTokens for AppAuthenticator {
    async fn mint_installation_token(
        &self,
        installation_id: u64,
    ) -> Result<InstallationToken, LookoutError> {
        let jwt = self.app_jwt()?;
        let url = format!(
            "{}/app/installations/{installation_id}/access_tokens",
            self.config.api_base_url.trim_end_matches('/')
        );

        tracing::debug!(installation_id, "requesting installation access token");

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {jwt}"))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| LookoutError::Auth(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LookoutError::Auth(format!(
                "token issuance failed with {status}: {body}"
            )));
        }

        let parsed: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| LookoutError::Auth(format!("failed to parse token response: {e}")))?;

        Ok(InstallationToken::new(parsed.token))
    }
}
