use std::{io::Write, sync::Arc, time::Duration};

use accounts::{
    AppState,
    auth::{
        APPLE_ISSUER, AppleVerifier, JwtService, KakaoVerifier, KeyMaterialCache, ProviderRegistry,
        http_client,
    },
    db::users::{InMemoryUserStore, User},
    routes,
};
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Utc;
use http_body_util::BodyExt;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;

const APPLE_SIGNING_KEY: &str = include_str!("fixtures/apple_signing_key.pem");
const APPLE_MODULUS: &str = "rdklKCk9YnhmA07WbvG0p6HV7cFQ9R2uLEFUwjqkYyr4WscgYgAmjF7Evfd9Ok9k7gHR3IAnxlG6mkHzDnVpuck0tvKIJbDsKyx5Q6lBqpxBfC-H6SZO2PXAIoJEk6oUNDOyJzGqsx8dn7JKbUsXvPLssP_e_Fuw2xxX0Y8aaGtN8e9YdipJ8BKSJYu-mg2ukyPIPytZ6xvqYQrwDknYH60MLSHrTl7TvVBzDnOccdTPPBw3fEuhAoS4hnlkOSTxzci-TgHagiyrn7zTnDAmNIUZstzT538HbGITPQU9MISx15z6e89-1CoiKdX-40W5aEXl3sKk-SjUfLKNya5VpQ";
const APPLE_CLIENT_ID: &str = "com.example.links";
const APPLE_KID: &str = "fixture-key";

struct TestApp {
    router: Router,
    jwt: JwtService,
    _provider: mockito::ServerGuard,
}

fn jwt_secret() -> SecretString {
    SecretString::new(STANDARD.encode([11u8; 32]).into())
}

async fn app_with_users(users: Vec<User>) -> TestApp {
    let mut provider = mockito::Server::new_async().await;
    provider
        .mock("GET", "/auth/keys")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({ "keys": [{
                "kty": "RSA",
                "kid": APPLE_KID,
                "use": "sig",
                "alg": "RS256",
                "n": APPLE_MODULUS,
                "e": "AQAB",
            }]})
            .to_string(),
        )
        .create_async()
        .await;
    provider
        .mock("GET", "/v2/user/me")
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(json!({ "msg": "this access token does not exist", "code": -401 }).to_string())
        .create_async()
        .await;

    let client = http_client(Duration::from_secs(2)).unwrap();

    let keys_url = format!("{}/auth/keys", provider.url());
    let keys = KeyMaterialCache::new("apple", keys_url, client.clone());
    let mut registry = ProviderRegistry::new();
    registry.register(AppleVerifier::new(Arc::new(keys), APPLE_CLIENT_ID));
    registry.register(KakaoVerifier::with_endpoint(
        client,
        format!("{}/v2/user/me", provider.url()),
    ));

    let state = AppState::new(
        Arc::new(InMemoryUserStore::with_users(users)),
        registry,
        JwtService::new(jwt_secret()),
    );

    TestApp {
        router: routes::router(state),
        jwt: JwtService::new(jwt_secret()),
        _provider: provider,
    }
}

fn apple_token(email: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = json!({
        "iss": APPLE_ISSUER,
        "aud": APPLE_CLIENT_ID,
        "sub": "000123.fixture",
        "email": email,
        "email_verified": "true",
        "iat": now,
        "exp": now + 600,
    });
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(APPLE_KID.to_string());
    encode(
        &header,
        &claims,
        &EncodingKey::from_rsa_pem(APPLE_SIGNING_KEY.as_bytes()).unwrap(),
    )
    .unwrap()
}

fn sign_in_request(provider: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/auth/{provider}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn identity_request(bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri("/v1/identity");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn apple_sign_in_for_registered_user_issues_tokens() {
    let app = app_with_users(vec![User::new("a@x.com", vec!["user".into()])]).await;

    let (status, body) = send(
        &app.router,
        sign_in_request("apple", json!({ "idToken": apple_token("a@x.com") })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let access = body["accessToken"].as_str().unwrap();
    assert!(!access.is_empty());
    assert!(!body["refreshToken"].as_str().unwrap().is_empty());
    assert_eq!(app.jwt.decode_access_token(access).unwrap().email, "a@x.com");
}

#[tokio::test]
async fn apple_sign_in_for_unregistered_user_returns_empty_tokens() {
    let app = app_with_users(vec![]).await;

    let (status, body) = send(
        &app.router,
        sign_in_request("apple", json!({ "idToken": apple_token("a@x.com") })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "accessToken": "", "refreshToken": "" }));
}

#[tokio::test]
async fn tampered_apple_token_is_unauthorized() {
    let app = app_with_users(vec![User::new("a@x.com", vec![])]).await;

    let token = apple_token("a@x.com");
    let (head, signature) = token.rsplit_once('.').unwrap();
    let flipped = if signature.starts_with('A') { "B" } else { "A" };
    let tampered = format!("{head}.{flipped}{}", &signature[1..]);

    let (status, body) = send(
        &app.router,
        sign_in_request("apple", json!({ "idToken": tampered })),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "signature_invalid" }));
}

#[tokio::test]
async fn kakao_failure_code_is_unauthorized() {
    let app = app_with_users(vec![User::new("k@x.com", vec![])]).await;

    let (status, body) = send(
        &app.router,
        sign_in_request("kakao", json!({ "accessToken": "expired-kakao-token" })),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "provider_rejected" }));
}

#[tokio::test]
async fn stalled_kakao_profile_is_provider_unavailable() {
    let mut provider = mockito::Server::new_async().await;
    let _stalled = provider
        .mock("GET", "/v2/user/me")
        .with_status(200)
        .with_chunked_body(|writer| {
            writer.write_all(b"{\"id\":")?;
            writer.flush()?;
            std::thread::sleep(Duration::from_secs(2));
            writer.write_all(b"1}")
        })
        .create_async()
        .await;

    let mut registry = ProviderRegistry::new();
    registry.register(KakaoVerifier::with_endpoint(
        http_client(Duration::from_millis(300)).unwrap(),
        format!("{}/v2/user/me", provider.url()),
    ));
    let state = AppState::new(
        Arc::new(InMemoryUserStore::with_users(vec![User::new("k@x.com", vec![])])),
        registry,
        JwtService::new(jwt_secret()),
    );
    let router = routes::router(state);

    let (status, body) = send(
        &router,
        sign_in_request("kakao", json!({ "accessToken": "kakao-token" })),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "provider_unavailable" }));
}

#[tokio::test]
async fn malformed_requests_are_bad_requests() {
    let app = app_with_users(vec![]).await;

    let (status, body) = send(&app.router, sign_in_request("apple", json!({ "token": "x" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "invalid_request" }));

    let (status, _) = send(&app.router, sign_in_request("apple", json!({ "idToken": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app.router,
        sign_in_request("naver", json!({ "idToken": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "unsupported_provider" }));
}

#[tokio::test]
async fn issued_access_token_opens_protected_routes_repeatedly() {
    let user = User::new("a@x.com", vec!["user".into(), "editor".into()]);
    let app = app_with_users(vec![user.clone()]).await;

    let (_, body) = send(
        &app.router,
        sign_in_request("apple", json!({ "idToken": apple_token("a@x.com") })),
    )
    .await;
    let access = body["accessToken"].as_str().unwrap().to_string();

    let first = send(&app.router, identity_request(Some(&access))).await;
    let second = send(&app.router, identity_request(Some(&access))).await;

    assert_eq!(first.0, StatusCode::OK);
    assert_eq!(first, second);
    assert_eq!(
        first.1,
        json!({ "userId": user.id, "email": "a@x.com", "roles": ["user", "editor"] })
    );
}

#[tokio::test]
async fn protected_route_requires_bearer_token() {
    let app = app_with_users(vec![]).await;

    let (status, body) = send(&app.router, identity_request(None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "missing_credential" }));
}

#[tokio::test]
async fn access_token_with_unexpected_algorithm_is_rejected() {
    let user = User::new("a@x.com", vec!["admin".into()]);
    let app = app_with_users(vec![user.clone()]).await;

    // Correct claims, but signed with RS256 instead of the server's HS256 secret.
    let now = Utc::now().timestamp();
    let claims = json!({
        "sub": user.id,
        "email": "a@x.com",
        "roles": ["admin"],
        "iat": now,
        "exp": now + 600,
        "aud": "access",
    });
    let forged = encode(
        &Header::new(Algorithm::RS256),
        &claims,
        &EncodingKey::from_rsa_pem(APPLE_SIGNING_KEY.as_bytes()).unwrap(),
    )
    .unwrap();

    let (status, body) = send(&app.router, identity_request(Some(&forged))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "signature_invalid" }));
}

#[tokio::test]
async fn session_for_deleted_user_is_rejected() {
    let app = app_with_users(vec![]).await;
    let ghost = User::new("gone@x.com", vec![]);
    let pair = app.jwt.issue(ghost.id, &ghost.email, &ghost.roles).unwrap();

    let (status, body) = send(&app.router, identity_request(Some(&pair.access_token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "user_not_found" }));
}

#[tokio::test]
async fn health_is_public() {
    let app = app_with_users(vec![]).await;
    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ok");
}
