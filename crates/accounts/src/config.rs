use std::{env, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use secrecy::SecretString;
use thiserror::Error;

const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct AccountsServerConfig {
    pub database_url: String,
    pub listen_addr: String,
    pub sentry_dsn: Option<String>,
    pub auth: AuthConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable `{0}` is not set")]
    MissingVar(&'static str),
    #[error("invalid value for environment variable `{0}`")]
    InvalidVar(&'static str),
    #[error("no identity providers configured")]
    NoIdentityProviders,
}

impl AccountsServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("SERVER_DATABASE_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .map_err(|_| ConfigError::MissingVar("SERVER_DATABASE_URL"))?;

        let listen_addr =
            env::var("SERVER_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let sentry_dsn = env::var("SENTRY_DSN").ok().filter(|dsn| !dsn.is_empty());

        let auth = AuthConfig::from_env()?;

        Ok(Self {
            database_url,
            listen_addr,
            sentry_dsn,
            auth,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    jwt_secret: SecretString,
    google_client_id: Option<String>,
    apple_client_id: Option<String>,
    kakao_enabled: bool,
    naver_enabled: bool,
    provider_timeout: Duration,
}

impl AuthConfig {
    pub fn new(jwt_secret: SecretString) -> Self {
        Self {
            jwt_secret,
            google_client_id: None,
            apple_client_id: None,
            kakao_enabled: false,
            naver_enabled: false,
            provider_timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
        }
    }

    fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = env::var("ACCOUNTS_JWT_SECRET")
            .map_err(|_| ConfigError::MissingVar("ACCOUNTS_JWT_SECRET"))?;
        validate_jwt_secret(&jwt_secret)?;

        let provider_timeout = match env::var("PROVIDER_TIMEOUT_SECS") {
            Ok(value) => value
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or(ConfigError::InvalidVar("PROVIDER_TIMEOUT_SECS"))?,
            Err(_) => Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
        };

        let config = Self {
            jwt_secret: SecretString::new(jwt_secret.into()),
            google_client_id: non_empty_var("GOOGLE_CLIENT_ID"),
            apple_client_id: non_empty_var("APPLE_CLIENT_ID"),
            kakao_enabled: flag_var("KAKAO_ENABLED")?,
            naver_enabled: flag_var("NAVER_ENABLED")?,
            provider_timeout,
        };

        if !config.has_any_provider() {
            return Err(ConfigError::NoIdentityProviders);
        }

        Ok(config)
    }

    pub fn with_google(mut self, client_id: impl Into<String>) -> Self {
        self.google_client_id = Some(client_id.into());
        self
    }

    pub fn with_apple(mut self, client_id: impl Into<String>) -> Self {
        self.apple_client_id = Some(client_id.into());
        self
    }

    pub fn with_kakao(mut self) -> Self {
        self.kakao_enabled = true;
        self
    }

    pub fn with_naver(mut self) -> Self {
        self.naver_enabled = true;
        self
    }

    pub fn jwt_secret(&self) -> &SecretString {
        &self.jwt_secret
    }

    pub fn google_client_id(&self) -> Option<&str> {
        self.google_client_id.as_deref()
    }

    pub fn apple_client_id(&self) -> Option<&str> {
        self.apple_client_id.as_deref()
    }

    pub fn kakao_enabled(&self) -> bool {
        self.kakao_enabled
    }

    pub fn naver_enabled(&self) -> bool {
        self.naver_enabled
    }

    pub fn provider_timeout(&self) -> Duration {
        self.provider_timeout
    }

    pub fn has_any_provider(&self) -> bool {
        self.google_client_id.is_some()
            || self.apple_client_id.is_some()
            || self.kakao_enabled
            || self.naver_enabled
    }
}

fn non_empty_var(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn flag_var(name: &'static str) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(value) => parse_flag(&value).ok_or(ConfigError::InvalidVar(name)),
        Err(_) => Ok(false),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

pub(crate) fn validate_jwt_secret(secret: &str) -> Result<(), ConfigError> {
    let decoded = BASE64_STANDARD
        .decode(secret.as_bytes())
        .map_err(|_| ConfigError::InvalidVar("ACCOUNTS_JWT_SECRET"))?;

    if decoded.len() < 32 {
        return Err(ConfigError::InvalidVar("ACCOUNTS_JWT_SECRET"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_secret_must_be_base64_of_at_least_32_bytes() {
        assert!(validate_jwt_secret("not base64!!").is_err());
        assert!(validate_jwt_secret(&BASE64_STANDARD.encode([7u8; 16])).is_err());
        assert!(validate_jwt_secret(&BASE64_STANDARD.encode([7u8; 32])).is_ok());
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn builder_enables_providers() {
        let config = AuthConfig::new(SecretString::new("secret".into()));
        assert!(!config.has_any_provider());

        let config = config.with_kakao().with_apple("com.example.app");
        assert!(config.has_any_provider());
        assert!(config.kakao_enabled());
        assert!(!config.naver_enabled());
        assert_eq!(config.apple_client_id(), Some("com.example.app"));
        assert_eq!(config.provider_timeout(), Duration::from_secs(5));
    }
}
