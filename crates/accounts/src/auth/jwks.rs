use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::DecodingKey;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub const APPLE_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";

/// Largest exponent we accept, in bytes. Real keys use 3 (65537).
const MAX_EXPONENT_BYTES: usize = 8;

/// Identity tokens are only ever verified with RS256.
const SIGNING_ALGORITHM: &str = "RS256";

#[derive(Debug, Error)]
pub enum KeyCacheError {
    #[error("no signing key with id `{0}`")]
    KeyNotFound(String),
    #[error("failed to fetch signing keys: {0}")]
    KeyFetchFailed(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyDecodeError {
    #[error("`{0}` is not valid base64url")]
    Base64(&'static str),
    #[error("`{0}` is empty")]
    Empty(&'static str),
    #[error("exponent is {0} bytes long")]
    ExponentTooLong(usize),
    #[error("exponent {0} is not a usable RSA exponent")]
    UnusableExponent(u64),
}

/// RSA public key rebuilt from the base64url `n`/`e` pair of a JWK.
///
/// Both components are kept as minimal big-endian unsigned integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicKey {
    modulus: Vec<u8>,
    exponent: Vec<u8>,
}

impl RsaPublicKey {
    pub fn from_base64url(modulus: &str, exponent: &str) -> Result<Self, KeyDecodeError> {
        let modulus = decode_unsigned_be(modulus, "n")?;
        let exponent = decode_unsigned_be(exponent, "e")?;

        if exponent.len() > MAX_EXPONENT_BYTES {
            return Err(KeyDecodeError::ExponentTooLong(exponent.len()));
        }
        let value = be_bytes_to_u64(&exponent);
        if value < 3 || value % 2 == 0 {
            return Err(KeyDecodeError::UnusableExponent(value));
        }

        Ok(Self { modulus, exponent })
    }

    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    pub fn exponent(&self) -> &[u8] {
        &self.exponent
    }

    pub fn exponent_value(&self) -> u64 {
        be_bytes_to_u64(&self.exponent)
    }

    pub fn modulus_bits(&self) -> usize {
        let leading = self.modulus.first().map_or(0, |b| b.leading_zeros() as usize);
        self.modulus.len() * 8 - leading
    }

    pub fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_rsa_raw_components(&self.modulus, &self.exponent)
    }
}

fn decode_unsigned_be(encoded: &str, field: &'static str) -> Result<Vec<u8>, KeyDecodeError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim().trim_end_matches('='))
        .map_err(|_| KeyDecodeError::Base64(field))?;
    let first_significant = bytes.iter().position(|b| *b != 0);
    match first_significant {
        Some(start) => Ok(bytes[start..].to_vec()),
        None => Err(KeyDecodeError::Empty(field)),
    }
}

fn be_bytes_to_u64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// An RSA key usable for RS256 signatures.
#[derive(Debug, Clone)]
pub struct SigningKey {
    pub key_id: String,
    pub key: Arc<RsaPublicKey>,
}

/// A provider's published keys, replaced as a whole on every refresh.
#[derive(Debug, Clone)]
pub struct SigningKeySet {
    provider: &'static str,
    keys: Vec<SigningKey>,
    fetched_at: DateTime<Utc>,
}

impl SigningKeySet {
    pub fn provider(&self) -> &'static str {
        self.provider
    }

    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn find(&self, key_id: &str) -> Option<&SigningKey> {
        self.keys.iter().find(|key| key.key_id == key_id)
    }

    fn from_document(
        provider: &'static str,
        document: JwksDocument,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, String> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();

        for entry in document.into_keys() {
            if entry.kty != "RSA" {
                debug!(provider, kty = %entry.kty, "skipping non-RSA key");
                continue;
            }
            if entry.key_use.as_deref().is_some_and(|value| value != "sig") {
                continue;
            }
            if let Some(alg) = entry.alg.as_deref()
                && alg != SIGNING_ALGORITHM
            {
                debug!(provider, kid = ?entry.kid, alg, "skipping key for another algorithm");
                continue;
            }

            let key_id = entry.kid.ok_or("RSA key without `kid`")?;
            if !seen.insert(key_id.clone()) {
                return Err(format!("duplicate key id `{key_id}`"));
            }

            let (Some(n), Some(e)) = (entry.n.as_deref(), entry.e.as_deref()) else {
                return Err(format!("key `{key_id}` is missing `n` or `e`"));
            };
            let key = RsaPublicKey::from_base64url(n, e)
                .map_err(|err| format!("key `{key_id}`: {err}"))?;

            keys.push(SigningKey {
                key_id,
                key: Arc::new(key),
            });
        }

        Ok(Self {
            provider,
            keys,
            fetched_at,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JwksDocument {
    Set { keys: Vec<JwkEntry> },
    Bare(Vec<JwkEntry>),
}

impl JwksDocument {
    fn into_keys(self) -> Vec<JwkEntry> {
        match self {
            JwksDocument::Set { keys } | JwksDocument::Bare(keys) => keys,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JwkEntry {
    kty: String,
    kid: Option<String>,
    #[serde(rename = "use")]
    key_use: Option<String>,
    alg: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

#[derive(Default)]
struct RefreshState {
    last_error: Option<String>,
}

/// Holds one provider's signing keys and refreshes them on demand.
///
/// Reads share the current set. A refresh is single-flight: callers that miss
/// while a fetch is running wait for it and reuse its outcome. A failed fetch
/// leaves the previous set in place.
pub struct KeyMaterialCache {
    provider: &'static str,
    jwks_url: String,
    client: Client,
    current: RwLock<Option<Arc<SigningKeySet>>>,
    refresh: Mutex<RefreshState>,
    attempts: AtomicU64,
}

impl KeyMaterialCache {
    pub fn new(provider: &'static str, jwks_url: impl Into<String>, client: Client) -> Self {
        Self {
            provider,
            jwks_url: jwks_url.into(),
            client,
            current: RwLock::new(None),
            refresh: Mutex::new(RefreshState::default()),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn apple(client: Client) -> Self {
        Self::new("apple", APPLE_JWKS_URL, client)
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    pub async fn current(&self) -> Option<Arc<SigningKeySet>> {
        self.current.read().await.clone()
    }

    /// Returns the key for `key_id`, refreshing the set at most once on a miss.
    pub async fn get_key(&self, key_id: &str) -> Result<Arc<RsaPublicKey>, KeyCacheError> {
        let observed = self.attempts.load(Ordering::Acquire);
        if let Some(key) = self.lookup(key_id).await {
            return Ok(key);
        }

        debug!(provider = self.provider, key_id, "signing key not cached, refreshing");
        self.refresh_after(observed).await?;

        self.lookup(key_id)
            .await
            .ok_or_else(|| KeyCacheError::KeyNotFound(key_id.to_string()))
    }

    /// Forces a refresh unless one completes while waiting for the lock.
    pub async fn refresh(&self) -> Result<(), KeyCacheError> {
        let observed = self.attempts.load(Ordering::Acquire);
        self.refresh_after(observed).await
    }

    async fn lookup(&self, key_id: &str) -> Option<Arc<RsaPublicKey>> {
        let current = self.current.read().await;
        current
            .as_ref()
            .and_then(|set| set.find(key_id))
            .map(|entry| Arc::clone(&entry.key))
    }

    async fn refresh_after(&self, observed: u64) -> Result<(), KeyCacheError> {
        let mut state = self.refresh.lock().await;

        if self.attempts.load(Ordering::Acquire) != observed {
            return match &state.last_error {
                None => Ok(()),
                Some(reason) => Err(KeyCacheError::KeyFetchFailed(reason.clone())),
            };
        }

        let outcome = self.fetch().await;
        let result = match outcome {
            Ok(set) => {
                info!(
                    provider = self.provider,
                    keys = set.keys().len(),
                    "signing keys refreshed"
                );
                *self.current.write().await = Some(Arc::new(set));
                state.last_error = None;
                Ok(())
            }
            Err(reason) => {
                warn!(
                    provider = self.provider,
                    error = %reason,
                    "signing key refresh failed, keeping previous keys"
                );
                state.last_error = Some(reason.clone());
                Err(KeyCacheError::KeyFetchFailed(reason))
            }
        };

        self.attempts.fetch_add(1, Ordering::Release);
        result
    }

    async fn fetch(&self) -> Result<SigningKeySet, String> {
        let response = self
            .client
            .get(&self.jwks_url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(request_failed)?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("unexpected status {status}"));
        }

        let body = response.bytes().await.map_err(request_failed)?;
        let document: JwksDocument = serde_json::from_slice(&body)
            .map_err(|err| format!("malformed key set: {err}"))?;

        SigningKeySet::from_document(self.provider, document, Utc::now())
    }
}

fn request_failed(err: reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else {
        format!("request failed: {err}")
    }
}
