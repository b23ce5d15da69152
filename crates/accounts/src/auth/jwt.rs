use std::{collections::HashSet, sync::Arc};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
    errors::ErrorKind,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const ACCESS_TOKEN_AUDIENCE: &str = "access";
const DEFAULT_JWT_LEEWAY_SECONDS: u64 = 60;
const REFRESH_NONCE_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid token")]
    InvalidToken,
    #[error("invalid jwt secret")]
    InvalidSecret,
    #[error("token expired")]
    TokenExpired,
    #[error("token signature invalid")]
    SignatureInvalid,
    #[error("unexpected signing algorithm {0:?}")]
    AlgorithmMismatch(Algorithm),
    #[error("token is missing the `{0}` claim")]
    ClaimMissing(&'static str),
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub aud: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTokenDetails {
    pub user_id: Uuid,
    pub email: String,
    pub roles: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionTokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
}

/// Issues and validates the service's own session credentials.
///
/// Access tokens are HS256 JWTs keyed by the base64 secret. Refresh tokens are opaque:
/// an HMAC over the issue instant and a fresh random nonce, so no two issuances collide
/// and none can be derived from another.
#[derive(Clone)]
pub struct JwtService {
    secret: Arc<SecretString>,
}

impl JwtService {
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret: Arc::new(secret),
        }
    }

    pub fn issue(
        &self,
        user_id: Uuid,
        email: &str,
        roles: &[String],
    ) -> Result<SessionTokenPair, JwtError> {
        let now = Utc::now();
        let access_expires_at = now + ChronoDuration::seconds(ACCESS_TOKEN_TTL_SECONDS);

        let claims = AccessTokenClaims {
            sub: user_id,
            email: Some(email.to_string()),
            roles: roles.to_vec(),
            iat: now.timestamp(),
            exp: access_expires_at.timestamp(),
            aud: ACCESS_TOKEN_AUDIENCE.to_string(),
        };

        let encoding_key = EncodingKey::from_base64_secret(self.secret.expose_secret())?;
        let access_token = encode(&Header::new(Algorithm::HS256), &claims, &encoding_key)?;
        let refresh_token = self.refresh_token(now)?;

        Ok(SessionTokenPair {
            access_token,
            refresh_token,
            access_expires_at,
        })
    }

    fn refresh_token(&self, now: DateTime<Utc>) -> Result<String, JwtError> {
        let key = STANDARD
            .decode(self.secret.expose_secret())
            .map_err(|_| JwtError::InvalidSecret)?;
        let nonce: [u8; REFRESH_NONCE_BYTES] = rand::random();

        let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| JwtError::InvalidSecret)?;
        mac.update(&now.timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
        mac.update(&nonce);

        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn decode_access_token(&self, token: &str) -> Result<AccessTokenDetails, JwtError> {
        self.decode_access_token_with_leeway(token, DEFAULT_JWT_LEEWAY_SECONDS)
    }

    pub fn decode_access_token_with_leeway(
        &self,
        token: &str,
        leeway_seconds: u64,
    ) -> Result<AccessTokenDetails, JwtError> {
        if token.trim().is_empty() {
            return Err(JwtError::InvalidToken);
        }

        // Checked before the signature so a foreign algorithm never reaches key selection.
        let header = decode_header(token).map_err(|_| JwtError::InvalidToken)?;
        if header.alg != Algorithm::HS256 {
            return Err(JwtError::AlgorithmMismatch(header.alg));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.set_audience(&[ACCESS_TOKEN_AUDIENCE]);
        validation.required_spec_claims =
            HashSet::from(["sub".to_string(), "exp".to_string(), "aud".to_string()]);
        validation.leeway = leeway_seconds;

        let decoding_key = DecodingKey::from_base64_secret(self.secret.expose_secret())?;
        let data = decode::<AccessTokenClaims>(token, &decoding_key, &validation)
            .map_err(classify)?;
        let claims = data.claims;

        let email = claims
            .email
            .filter(|email| !email.trim().is_empty())
            .ok_or(JwtError::ClaimMissing("email"))?;
        let expires_at = DateTime::from_timestamp(claims.exp, 0).ok_or(JwtError::InvalidToken)?;

        Ok(AccessTokenDetails {
            user_id: claims.sub,
            email,
            roles: claims.roles,
            expires_at,
        })
    }
}

fn classify(err: jsonwebtoken::errors::Error) -> JwtError {
    match err.into_kind() {
        ErrorKind::ExpiredSignature => JwtError::TokenExpired,
        ErrorKind::InvalidSignature => JwtError::SignatureInvalid,
        ErrorKind::InvalidAlgorithm => JwtError::AlgorithmMismatch(Algorithm::HS256),
        ErrorKind::MissingRequiredClaim(claim) => match claim.as_str() {
            "sub" => JwtError::ClaimMissing("sub"),
            "exp" => JwtError::ClaimMissing("exp"),
            _ => JwtError::ClaimMissing("aud"),
        },
        ErrorKind::InvalidAudience
        | ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => JwtError::InvalidToken,
        kind => JwtError::Jwt(kind.into()),
    }
}
