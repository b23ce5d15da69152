use std::{collections::HashMap, fmt, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::debug;

use super::jwks::KeyCacheError;

const USER_AGENT: &str = "AccountsServer/1.0";

pub const GOOGLE_TOKENINFO_URL: &str = "https://www.googleapis.com/oauth2/v1/tokeninfo";
pub const KAKAO_PROFILE_URL: &str = "https://kapi.kakao.com/v2/user/me";
pub const NAVER_PROFILE_URL: &str = "https://openapi.naver.com/v1/nid/me";

const NAVER_SUCCESS_CODE: &str = "00";
const NAVER_SUCCESS_MESSAGE: &str = "success";

/// HTTP client shared by every verifier. All outbound calls are bounded by `timeout`.
pub fn http_client(timeout: Duration) -> reqwest::Result<Client> {
    // reqwest is built without a bundled provider; a no-op once one is installed.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    Apple,
    Kakao,
    Naver,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Google => "google",
            ProviderKind::Apple => "apple",
            ProviderKind::Kakao => "kakao",
            ProviderKind::Naver => "naver",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unsupported provider `{0}`")]
pub struct UnsupportedProvider(pub String);

impl FromStr for ProviderKind {
    type Err = UnsupportedProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(ProviderKind::Google),
            "apple" => Ok(ProviderKind::Apple),
            "kakao" => Ok(ProviderKind::Kakao),
            "naver" => Ok(ProviderKind::Naver),
            _ => Err(UnsupportedProvider(value.to_string())),
        }
    }
}

/// Credential handed over by the client for one provider. Never persisted.
#[derive(Clone)]
pub struct IdentityCredential {
    pub provider: ProviderKind,
    raw: SecretString,
}

impl IdentityCredential {
    pub fn new(provider: ProviderKind, raw: impl Into<String>) -> Self {
        Self {
            provider,
            raw: SecretString::new(raw.into().into()),
        }
    }

    pub fn raw(&self) -> &str {
        self.raw.expose_secret()
    }

    pub fn is_blank(&self) -> bool {
        self.raw().trim().is_empty()
    }
}

impl fmt::Debug for IdentityCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCredential")
            .field("provider", &self.provider)
            .field("raw", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub provider: ProviderKind,
    pub subject_email: String,
    pub subject_id: Option<String>,
}

impl VerifiedIdentity {
    /// Builds an identity, refusing a missing or blank email.
    pub fn new(
        provider: ProviderKind,
        email: Option<String>,
        subject_id: Option<String>,
    ) -> Result<Self, VerifyError> {
        let subject_email = email
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(VerifyError::EmailMissing)?;

        Ok(Self {
            provider,
            subject_email,
            subject_id,
        })
    }
}

/// Provider failures, normalized so callers never see provider-native shapes.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("credential is malformed")]
    MalformedCredential,
    #[error("identity provider unreachable: {0}")]
    ProviderUnreachable(String),
    #[error("identity provider rejected the credential: {0}")]
    ProviderRejected(String),
    #[error("token audience does not match this application")]
    AudienceMismatch,
    #[error("provider did not return an email")]
    EmailMissing,
    #[error("no signing key with id `{0}`")]
    KeyNotFound(String),
    #[error("failed to fetch signing keys: {0}")]
    KeyFetchFailed(String),
    #[error("token signature is invalid")]
    SignatureInvalid,
    #[error("token has expired")]
    TokenExpired,
    #[error("token is missing claim `{0}`")]
    ClaimMissing(&'static str),
}

impl VerifyError {
    pub fn code(&self) -> &'static str {
        match self {
            VerifyError::MalformedCredential => "malformed_credential",
            VerifyError::ProviderUnreachable(_) => "provider_unreachable",
            VerifyError::ProviderRejected(_) => "provider_rejected",
            VerifyError::AudienceMismatch => "audience_mismatch",
            VerifyError::EmailMissing => "email_missing",
            VerifyError::KeyNotFound(_) => "key_not_found",
            VerifyError::KeyFetchFailed(_) => "key_fetch_failed",
            VerifyError::SignatureInvalid => "signature_invalid",
            VerifyError::TokenExpired => "token_expired",
            VerifyError::ClaimMissing(_) => "claim_missing",
        }
    }

    /// Upstream trouble rather than a bad credential.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VerifyError::ProviderUnreachable(_) | VerifyError::KeyFetchFailed(_)
        )
    }

    fn unreachable(err: reqwest::Error) -> Self {
        let reason = if err.is_timeout() {
            "request timed out".to_string()
        } else {
            format!("request failed: {err}")
        };
        Self::ProviderUnreachable(reason)
    }
}

impl From<KeyCacheError> for VerifyError {
    fn from(err: KeyCacheError) -> Self {
        match err {
            KeyCacheError::KeyNotFound(kid) => VerifyError::KeyNotFound(kid),
            KeyCacheError::KeyFetchFailed(reason) => VerifyError::KeyFetchFailed(reason),
        }
    }
}

/// Turns a provider credential into a verified identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    fn kind(&self) -> ProviderKind;
    async fn verify(
        &self,
        credential: &IdentityCredential,
    ) -> Result<VerifiedIdentity, VerifyError>;
}

#[derive(Default)]
pub struct ProviderRegistry {
    verifiers: HashMap<ProviderKind, Arc<dyn IdentityVerifier>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<V>(&mut self, verifier: V)
    where
        V: IdentityVerifier + 'static,
    {
        self.verifiers.insert(verifier.kind(), Arc::new(verifier));
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn IdentityVerifier>> {
        self.verifiers.get(&kind).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.verifiers.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.kinds())
            .finish()
    }
}

/// Throttling and server errors are upstream trouble, whatever the body says.
fn is_outage(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Maps a non-success HTTP status from a provider to the error taxonomy.
fn status_error(provider: ProviderKind, status: StatusCode) -> VerifyError {
    if is_outage(status) {
        VerifyError::ProviderUnreachable(format!("{provider} returned {status}"))
    } else {
        VerifyError::ProviderRejected(format!("{provider} returned {status}"))
    }
}

/// Reads and decodes a provider response body. A body that stalls past the client timeout or
/// breaks off mid-stream is an outage; only a complete body that fails to decode is a rejection.
async fn read_json<T>(response: Response, what: &str) -> Result<T, VerifyError>
where
    T: DeserializeOwned,
{
    let body = response.bytes().await.map_err(VerifyError::unreachable)?;
    serde_json::from_slice(&body)
        .map_err(|err| VerifyError::ProviderRejected(format!("malformed {what}: {err}")))
}

pub struct GoogleVerifier {
    client: Client,
    client_id: String,
    tokeninfo_url: String,
}

impl GoogleVerifier {
    pub fn new(client: Client, client_id: impl Into<String>) -> Self {
        Self::with_endpoint(client, client_id, GOOGLE_TOKENINFO_URL)
    }

    pub fn with_endpoint(
        client: Client,
        client_id: impl Into<String>,
        tokeninfo_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            client_id: client_id.into(),
            tokeninfo_url: tokeninfo_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleTokenInfo {
    #[serde(default, alias = "aud")]
    audience: Option<String>,
    #[serde(default, alias = "azp")]
    issued_to: Option<String>,
    #[serde(default, alias = "sub")]
    user_id: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, alias = "email_verified")]
    verified_email: Option<BoolOrString>,
    #[serde(default)]
    error_description: Option<String>,
}

// tokeninfo v1 reports booleans, the id_token variant reports "true"/"false".
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum BoolOrString {
    Bool(bool),
    String(String),
}

impl BoolOrString {
    pub(crate) fn is_true(&self) -> bool {
        match self {
            BoolOrString::Bool(value) => *value,
            BoolOrString::String(value) => value.eq_ignore_ascii_case("true"),
        }
    }
}

#[async_trait]
impl IdentityVerifier for GoogleVerifier {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn verify(
        &self,
        credential: &IdentityCredential,
    ) -> Result<VerifiedIdentity, VerifyError> {
        let token = credential.raw().trim();
        // id tokens are JWTs, access tokens are opaque
        let parameter = if token.matches('.').count() == 2 {
            "id_token"
        } else {
            "access_token"
        };

        let response = self
            .client
            .get(&self.tokeninfo_url)
            .query(&[(parameter, token)])
            .send()
            .await
            .map_err(VerifyError::unreachable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(self.kind(), status));
        }

        let info: GoogleTokenInfo = read_json(response, "tokeninfo").await?;

        if let Some(description) = info.error_description {
            return Err(VerifyError::ProviderRejected(description));
        }

        let audience = info.audience.as_deref().or(info.issued_to.as_deref());
        if audience != Some(self.client_id.as_str()) {
            debug!(?audience, "google audience mismatch");
            return Err(VerifyError::AudienceMismatch);
        }

        let verified = info.verified_email.as_ref().is_none_or(BoolOrString::is_true);
        let email = info.email.filter(|_| verified);

        VerifiedIdentity::new(self.kind(), email, info.user_id)
    }
}

pub struct KakaoVerifier {
    client: Client,
    profile_url: String,
}

impl KakaoVerifier {
    pub fn new(client: Client) -> Self {
        Self::with_endpoint(client, KAKAO_PROFILE_URL)
    }

    pub fn with_endpoint(client: Client, profile_url: impl Into<String>) -> Self {
        Self {
            client,
            profile_url: profile_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct KakaoProfile {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    kakao_account: Option<KakaoAccount>,
}

#[derive(Debug, Deserialize)]
struct KakaoAccount {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    is_email_valid: Option<bool>,
    #[serde(default)]
    is_email_verified: Option<bool>,
}

#[async_trait]
impl IdentityVerifier for KakaoVerifier {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Kakao
    }

    async fn verify(
        &self,
        credential: &IdentityCredential,
    ) -> Result<VerifiedIdentity, VerifyError> {
        let response = self
            .client
            .get(&self.profile_url)
            .bearer_auth(credential.raw().trim())
            .send()
            .await
            .map_err(VerifyError::unreachable)?;

        let status = response.status();
        if is_outage(status) {
            return Err(status_error(self.kind(), status));
        }

        let profile: KakaoProfile = match read_json(response, "kakao profile").await {
            Ok(profile) => profile,
            Err(VerifyError::ProviderRejected(_)) if !status.is_success() => {
                return Err(status_error(self.kind(), status));
            }
            Err(err) => return Err(err),
        };

        // Kakao reports failures as {"code": <negative>, "msg": ...}
        if let Some(code) = profile.code
            && code != 0
        {
            let detail = profile.msg.unwrap_or_default();
            return Err(VerifyError::ProviderRejected(format!(
                "kakao result code {code}: {detail}"
            )));
        }
        if !status.is_success() {
            return Err(status_error(self.kind(), status));
        }

        let Some(id) = profile.id else {
            return Err(VerifyError::ProviderRejected(
                "kakao profile has no id".to_string(),
            ));
        };

        let email = profile.kakao_account.and_then(|account| {
            let usable = account.is_email_valid.unwrap_or(true)
                && account.is_email_verified.unwrap_or(true);
            account.email.filter(|_| usable)
        });

        VerifiedIdentity::new(self.kind(), email, Some(id.to_string()))
    }
}

pub struct NaverVerifier {
    client: Client,
    profile_url: String,
}

impl NaverVerifier {
    pub fn new(client: Client) -> Self {
        Self::with_endpoint(client, NAVER_PROFILE_URL)
    }

    pub fn with_endpoint(client: Client, profile_url: impl Into<String>) -> Self {
        Self {
            client,
            profile_url: profile_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NaverEnvelope {
    #[serde(default)]
    resultcode: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    response: Option<NaverProfile>,
}

#[derive(Debug, Deserialize)]
struct NaverProfile {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[async_trait]
impl IdentityVerifier for NaverVerifier {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Naver
    }

    async fn verify(
        &self,
        credential: &IdentityCredential,
    ) -> Result<VerifiedIdentity, VerifyError> {
        let response = self
            .client
            .get(&self.profile_url)
            .bearer_auth(credential.raw().trim())
            .send()
            .await
            .map_err(VerifyError::unreachable)?;

        let status = response.status();
        if is_outage(status) {
            return Err(status_error(self.kind(), status));
        }

        let envelope: NaverEnvelope = read_json(response, "naver profile").await?;

        let succeeded = envelope.resultcode.as_deref() == Some(NAVER_SUCCESS_CODE)
            && envelope.message.as_deref() == Some(NAVER_SUCCESS_MESSAGE);
        if !succeeded || !status.is_success() {
            return Err(VerifyError::ProviderRejected(format!(
                "naver result code {}: {}",
                envelope.resultcode.unwrap_or_default(),
                envelope.message.unwrap_or_default()
            )));
        }

        let profile = envelope.response.ok_or(VerifyError::EmailMissing)?;
        VerifiedIdentity::new(self.kind(), profile.email, profile.id)
    }
}
