mod apple;
mod jwks;
mod jwt;
mod middleware;
mod provider;
mod resolver;
mod sign_in;

pub use apple::{APPLE_ISSUER, AppleVerifier};
pub use jwks::{
    APPLE_JWKS_URL, KeyCacheError, KeyDecodeError, KeyMaterialCache, RsaPublicKey, SigningKey,
    SigningKeySet,
};
pub use jwt::{
    ACCESS_TOKEN_TTL_SECONDS, AccessTokenClaims, AccessTokenDetails, JwtError, JwtService,
    SessionTokenPair,
};
pub use middleware::{AuthenticatedUser, SessionRejection, require_session};
pub use provider::{
    GoogleVerifier, IdentityCredential, IdentityVerifier, KakaoVerifier, NaverVerifier,
    ProviderKind, ProviderRegistry, UnsupportedProvider, VerifiedIdentity, VerifyError,
    http_client,
};
pub use resolver::{IdentityResolver, Resolution};
pub use sign_in::{SignInError, SignInOutcome, SignInService};
