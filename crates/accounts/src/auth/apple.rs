use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, Validation, decode, decode_header, errors::ErrorKind};
use serde::Deserialize;
use tracing::debug;

use super::{
    jwks::KeyMaterialCache,
    provider::{
        BoolOrString, IdentityCredential, IdentityVerifier, ProviderKind, VerifiedIdentity,
        VerifyError,
    },
};

pub const APPLE_ISSUER: &str = "https://appleid.apple.com";
const LEEWAY_SECONDS: u64 = 60;

#[derive(Debug, Deserialize)]
struct AppleIdentityClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<BoolOrString>,
}

/// Verifies Sign in with Apple identity tokens locally against Apple's published keys.
pub struct AppleVerifier {
    keys: Arc<KeyMaterialCache>,
    client_id: String,
}

impl AppleVerifier {
    pub fn new(keys: Arc<KeyMaterialCache>, client_id: impl Into<String>) -> Self {
        Self {
            keys,
            client_id: client_id.into(),
        }
    }

    fn validation(&self) -> Validation {
        // pinned, never taken from the token header
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[APPLE_ISSUER]);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.leeway = LEEWAY_SECONDS;
        validation.required_spec_claims =
            HashSet::from(["exp".to_string(), "iss".to_string(), "aud".to_string()]);
        validation
    }
}

#[async_trait]
impl IdentityVerifier for AppleVerifier {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Apple
    }

    async fn verify(
        &self,
        credential: &IdentityCredential,
    ) -> Result<VerifiedIdentity, VerifyError> {
        let token = credential.raw().trim();

        let header = decode_header(token).map_err(|_| VerifyError::MalformedCredential)?;
        if header.alg != Algorithm::RS256 {
            debug!(alg = ?header.alg, "apple identity token uses unexpected algorithm");
            return Err(VerifyError::SignatureInvalid);
        }
        let key_id = header.kid.ok_or(VerifyError::MalformedCredential)?;

        let key = self.keys.get_key(&key_id).await?;

        let data = decode::<AppleIdentityClaims>(token, &key.decoding_key(), &self.validation())
            .map_err(|err| claims_error(err.into_kind()))?;
        let claims = data.claims;

        let verified = claims
            .email_verified
            .as_ref()
            .is_none_or(BoolOrString::is_true);
        let email = claims
            .email
            .filter(|value| verified && !value.trim().is_empty())
            .ok_or(VerifyError::ClaimMissing("email"))?;

        VerifiedIdentity::new(self.kind(), Some(email), claims.sub)
    }
}

fn claims_error(kind: ErrorKind) -> VerifyError {
    match kind {
        ErrorKind::ExpiredSignature => VerifyError::TokenExpired,
        ErrorKind::InvalidAudience => VerifyError::AudienceMismatch,
        ErrorKind::InvalidIssuer => {
            VerifyError::ProviderRejected("token was not issued by apple".to_string())
        }
        ErrorKind::MissingRequiredClaim(claim) => VerifyError::ClaimMissing(match claim.as_str() {
            "exp" => "exp",
            "iss" => "iss",
            "aud" => "aud",
            _ => "unknown",
        }),
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => VerifyError::MalformedCredential,
        _ => VerifyError::SignatureInvalid,
    }
}
