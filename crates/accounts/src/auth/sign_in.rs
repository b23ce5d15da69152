use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use super::{
    jwt::{JwtError, JwtService, SessionTokenPair},
    provider::{IdentityCredential, ProviderKind, ProviderRegistry, VerifyError},
    resolver::{IdentityResolver, Resolution},
};
use crate::db::identity_errors::IdentityError;

#[derive(Debug, Error)]
pub enum SignInError {
    #[error("unsupported provider `{0}`")]
    UnsupportedProvider(String),
    #[error("credential is empty")]
    EmptyCredential,
    #[error(transparent)]
    Verification(#[from] VerifyError),
    #[error("user lookup failed: {0}")]
    Identity(#[from] IdentityError),
    #[error("failed to issue session: {0}")]
    Issue(#[from] JwtError),
}

#[derive(Debug)]
pub enum SignInOutcome {
    Issued(SessionTokenPair),
    /// The credential was valid but no account uses its email.
    NotRegistered,
}

/// Verify, resolve, issue.
pub struct SignInService {
    providers: Arc<ProviderRegistry>,
    resolver: IdentityResolver,
    jwt: Arc<JwtService>,
}

impl SignInService {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        resolver: IdentityResolver,
        jwt: Arc<JwtService>,
    ) -> Self {
        Self {
            providers,
            resolver,
            jwt,
        }
    }

    #[instrument(
        name = "sign_in",
        skip(self, provider, raw_credential),
        fields(provider = %provider)
    )]
    pub async fn sign_in(
        &self,
        provider: &str,
        raw_credential: &str,
    ) -> Result<SignInOutcome, SignInError> {
        let kind: ProviderKind = provider
            .parse()
            .map_err(|_| SignInError::UnsupportedProvider(provider.to_string()))?;
        let verifier = self
            .providers
            .get(kind)
            .ok_or_else(|| SignInError::UnsupportedProvider(provider.to_string()))?;

        let credential = IdentityCredential::new(kind, raw_credential);
        if credential.is_blank() {
            return Err(SignInError::EmptyCredential);
        }

        let identity = match verifier.verify(&credential).await {
            Ok(identity) => identity,
            Err(err) if err.is_transient() => {
                error!(provider = %kind, reason = %err, "identity provider unavailable");
                return Err(err.into());
            }
            Err(err) => {
                warn!(provider = %kind, reason = err.code(), "credential verification failed");
                return Err(err.into());
            }
        };

        let user = match self.resolver.resolve(&identity).await {
            Ok(Resolution::Existing(user)) => user,
            Ok(Resolution::NotFound) => {
                info!(provider = %kind, "verified identity has no account");
                return Ok(SignInOutcome::NotRegistered);
            }
            Err(err) => {
                error!(?err, "failed to resolve verified identity");
                return Err(err.into());
            }
        };

        let tokens = self
            .jwt
            .issue(user.id, &user.email, &user.roles)
            .inspect_err(|err| error!(?err, "failed to sign session tokens"))?;

        info!(provider = %kind, user_id = %user.id, "session issued");
        Ok(SignInOutcome::Issued(tokens))
    }
}
