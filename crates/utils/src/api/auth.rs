use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `POST /auth/{provider}`.
///
/// Apple and Google clients send `idToken`; Kakao and Naver clients may send the
/// provider access token as `accessToken` instead.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    #[serde(alias = "accessToken")]
    pub id_token: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPairResponse {
    /// Response for a valid credential that does not belong to a registered user.
    pub fn not_registered() -> Self {
        Self {
            access_token: String::new(),
            refresh_token: String::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResponse {
    pub user_id: Uuid,
    pub email: String,
    pub roles: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_in_request_accepts_access_token_alias() {
        let body: SignInRequest = serde_json::from_str(r#"{"accessToken":"abc"}"#).unwrap();
        assert_eq!(body.id_token, "abc");

        let body: SignInRequest = serde_json::from_str(r#"{"idToken":"xyz"}"#).unwrap();
        assert_eq!(body.id_token, "xyz");
    }

    #[test]
    fn not_registered_serializes_empty_strings() {
        let json = serde_json::to_value(TokenPairResponse::not_registered()).unwrap();
        assert_eq!(json, serde_json::json!({ "accessToken": "", "refreshToken": "" }));
    }
}
