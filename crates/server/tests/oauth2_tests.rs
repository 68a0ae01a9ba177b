use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum_test::{TestResponse, TestServer};
use migration::{Migrator, MigratorTrait};
use miniauth::config::{AppConfig, OAuth2Config};
use miniauth::entity::{
    oauth2_access_token, oauth2_authorization_code, oauth2_refresh_token, organization,
    organization_member, user,
};
use miniauth::oauth2::pkce::s256_challenge;
use miniauth::oauth2::session::{SESSION_COOKIE, issue_session_token};
use miniauth::oauth2::{
    DbIdentityStore, IdentityStore, JwtSessionProvider, NewClient, OAuth2State, SessionProvider,
};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, Database,
    DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
};
use serde_json::json;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

const SESSION_SECRET: &[u8] = b"test-session-secret-0123456789abcdef";
const INTERNAL_TOKEN: &str = "internal-token-0123456789abcdef0123";
const CALLBACK: &str = "http://localhost:3000/callback";

const ADMIN_ID: &str = "1";
const MEMBER_ID: &str = "2";

struct TestEnv {
    server: TestServer,
    db: Arc<DatabaseConnection>,
    state: OAuth2State,
}

fn create_test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        listen_addr: "127.0.0.1:0".into(),
        issuer_url: "http://localhost:8080/".into(),
        login_url: "/login".into(),
        session_secret: String::from_utf8_lossy(SESSION_SECRET).into_owned(),
        internal_token: Some(INTERNAL_TOKEN.into()),
        internal_admin_id: ADMIN_ID.into(),
        oauth2: OAuth2Config::default(),
    }
}

async fn create_oauth2_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.expect("connect");
    Migrator::up(&db, None).await.expect("migrate");

    let now = OffsetDateTime::now_utc();
    for (id, username, email, role) in [
        (ADMIN_ID, "alice", "alice@example.com", "admin"),
        (MEMBER_ID, "bob", "bob@example.com", "user"),
    ] {
        user::ActiveModel {
            id: Set(id.into()),
            username: Set(username.into()),
            email: Set(email.into()),
            role: Set(role.into()),
            created_at: Set(now),
        }
        .insert(&db)
        .await
        .expect("insert user");
    }

    organization::ActiveModel {
        id: Set("org-1".into()),
        name: Set("Acme".into()),
        slug: Set("acme".into()),
    }
    .insert(&db)
    .await
    .expect("insert organization");
    organization_member::ActiveModel {
        organization_id: Set("org-1".into()),
        user_id: Set(MEMBER_ID.into()),
        role: Set("owner".into()),
    }
    .insert(&db)
    .await
    .expect("insert membership");

    db
}

/// An in-memory server with two clients: `trusted-app` (skips consent,
/// `read profile`) and `consent-app` (needs consent, `read write profile`).
async fn create_test_env() -> TestEnv {
    let db = Arc::new(create_oauth2_test_db().await);
    let config = create_test_config();
    let identity: Arc<dyn IdentityStore> = Arc::new(DbIdentityStore::new(db.clone()));
    let sessions: Arc<dyn SessionProvider> =
        Arc::new(JwtSessionProvider::new(SESSION_SECRET, identity.clone()));
    let state = OAuth2State::new(db.clone(), &config, identity, sessions);

    for (client_id, secret, name, scopes, trusted) in [
        ("trusted-app", "trusted-secret", "Trusted App", "read profile", true),
        ("consent-app", "consent-secret", "Consent App", "read write profile", false),
    ] {
        state
            .registry
            .register_with_fixed_credentials(
                NewClient {
                    name: name.into(),
                    redirect_uris: vec![CALLBACK.into()],
                    scopes: vec![scopes.into()],
                    trusted,
                    ..Default::default()
                },
                ADMIN_ID,
                client_id,
                secret,
            )
            .await
            .expect("register client");
    }

    let server = TestServer::new(miniauth::api::app(state.clone())).expect("create test server");
    TestEnv { server, db, state }
}

fn session_cookie(user_id: &str) -> HeaderValue {
    let token = issue_session_token(SESSION_SECRET, user_id, 3600).expect("session token");
    HeaderValue::from_str(&format!("{SESSION_COOKIE}={token}")).expect("cookie header")
}

fn query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| urlencoding::decode(v).expect("decode").into_owned())
}

fn location(response: &TestResponse) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

/// Run the trusted authorize leg as `user_id` and return the issued code.
async fn authorize_trusted(env: &TestEnv, user_id: &str, extra: &[(&str, &str)]) -> String {
    let mut request = env
        .server
        .get("/oauth/authorize")
        .add_header(header::COOKIE, session_cookie(user_id))
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "trusted-app")
        .add_query_param("redirect_uri", CALLBACK)
        .add_query_param("state", "xyz");
    for (key, value) in extra {
        request = request.add_query_param(key, value);
    }
    let response = request.await;

    response.assert_status_see_other();
    let location = location(&response);
    assert!(location.starts_with(CALLBACK));
    assert_eq!(query_param(&location, "state").as_deref(), Some("xyz"));
    query_param(&location, "code").expect("code in redirect")
}

async fn exchange(env: &TestEnv, code: &str, verifier: Option<&str>) -> TestResponse {
    let mut form = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", CALLBACK),
        ("client_id", "trusted-app"),
        ("client_secret", "trusted-secret"),
    ];
    if let Some(verifier) = verifier {
        form.push(("code_verifier", verifier));
    }
    env.server.post("/oauth/token").form(&form).await
}

async fn refresh(env: &TestEnv, refresh_token: &str) -> TestResponse {
    env.server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", "trusted-app"),
            ("client_secret", "trusted-secret"),
        ])
        .await
}

async fn userinfo(env: &TestEnv, access_token: &str) -> TestResponse {
    env.server
        .get("/oauth/userinfo")
        .add_header(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {access_token}")).expect("bearer header"),
        )
        .await
}

fn tokens_of(response: &TestResponse) -> (String, String) {
    let body: serde_json::Value = response.json();
    (
        body["access_token"].as_str().expect("access_token").to_string(),
        body["refresh_token"].as_str().expect("refresh_token").to_string(),
    )
}

// =============================================================================
// Authorization Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_authorize_without_session_redirects_to_login() {
    let env = create_test_env().await;

    let response = env
        .server
        .get("/oauth/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "consent-app")
        .add_query_param("redirect_uri", CALLBACK)
        .add_query_param("scope", "read profile")
        .add_query_param("state", "random-state")
        .add_query_param("code_challenge", s256_challenge("verifier123"))
        .add_query_param("code_challenge_method", "S256")
        .await;

    response.assert_status_see_other();
    let location = location(&response);
    assert!(location.starts_with("/login?oauth_redirect=true"));
    assert_eq!(query_param(&location, "client_id").as_deref(), Some("consent-app"));
    assert_eq!(query_param(&location, "redirect_uri").as_deref(), Some(CALLBACK));
    assert_eq!(query_param(&location, "scope").as_deref(), Some("read profile"));
    assert_eq!(query_param(&location, "state").as_deref(), Some("random-state"));
    assert_eq!(
        query_param(&location, "code_challenge_method").as_deref(),
        Some("S256")
    );
}

#[tokio::test]
async fn test_authorize_invalid_response_type() {
    let env = create_test_env().await;

    let response = env
        .server
        .get("/oauth/authorize")
        .add_query_param("response_type", "token")
        .add_query_param("client_id", "trusted-app")
        .add_query_param("redirect_uri", CALLBACK)
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_authorize_unknown_client_is_not_redirected() {
    let env = create_test_env().await;

    let response = env
        .server
        .get("/oauth/authorize")
        .add_header(header::COOKIE, session_cookie(MEMBER_ID))
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "nonexistent-client")
        .add_query_param("redirect_uri", CALLBACK)
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_authorize_unregistered_redirect_uri() {
    let env = create_test_env().await;

    let response = env
        .server
        .get("/oauth/authorize")
        .add_header(header::COOKIE, session_cookie(MEMBER_ID))
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "trusted-app")
        .add_query_param("redirect_uri", "http://localhost:3000/callback/")
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_authorize_inactive_client_is_unknown() {
    let env = create_test_env().await;
    env.state
        .registry
        .toggle_active("trusted-app")
        .await
        .expect("deactivate");

    let response = env
        .server
        .get("/oauth/authorize")
        .add_header(header::COOKIE, session_cookie(MEMBER_ID))
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "trusted-app")
        .add_query_param("redirect_uri", CALLBACK)
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_authorize_trusted_client_skips_consent() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[("scope", "read")]).await;

    let stored = oauth2_authorization_code::Entity::find_by_id(code.as_str())
        .one(env.db.as_ref())
        .await
        .expect("query")
        .expect("code stored");
    assert_eq!(stored.client_id, "trusted-app");
    assert_eq!(stored.user_id, MEMBER_ID);
    assert!(!stored.used);
    assert!(stored.expires_at > OffsetDateTime::now_utc() + Duration::minutes(9));
}

#[tokio::test]
async fn test_authorize_untrusted_client_returns_consent_payload() {
    let env = create_test_env().await;

    let response = env
        .server
        .get("/oauth/authorize")
        .add_header(header::COOKIE, session_cookie(MEMBER_ID))
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "consent-app")
        .add_query_param("redirect_uri", CALLBACK)
        .add_query_param("scope", "profile admin")
        .add_query_param("state", "abc")
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["client_name"], "Consent App");
    assert_eq!(body["client_id"], "consent-app");
    assert_eq!(body["scope"], "profile admin");
    assert_eq!(body["state"], "abc");
    assert_eq!(body["user"]["username"], "bob");
    let scopes = body["scopes"].as_array().expect("scopes");
    assert_eq!(scopes.len(), 1);
    assert_eq!(scopes[0]["name"], "profile");
    assert!(!scopes[0]["description"].as_str().unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_consent_decision_requires_login() {
    let env = create_test_env().await;

    let response = env
        .server
        .post("/oauth/authorize")
        .json(&json!({
            "authorized": true,
            "response_type": "code",
            "client_id": "consent-app",
            "redirect_uri": CALLBACK,
        }))
        .await;

    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "login_required");
}

#[tokio::test]
async fn test_consent_decision_requires_authorized_flag() {
    let env = create_test_env().await;

    let response = env
        .server
        .post("/oauth/authorize")
        .add_header(header::COOKIE, session_cookie(MEMBER_ID))
        .json(&json!({
            "response_type": "code",
            "client_id": "consent-app",
            "redirect_uri": CALLBACK,
        }))
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_consent_denied_redirects_with_access_denied() {
    let env = create_test_env().await;

    let response = env
        .server
        .post("/oauth/authorize")
        .add_header(header::COOKIE, session_cookie(MEMBER_ID))
        .json(&json!({
            "authorized": false,
            "response_type": "code",
            "client_id": "consent-app",
            "redirect_uri": CALLBACK,
            "state": "s1",
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let url = body["redirect_url"].as_str().expect("redirect_url");
    assert!(url.starts_with(CALLBACK));
    assert_eq!(query_param(url, "error").as_deref(), Some("access_denied"));
    assert_eq!(query_param(url, "state").as_deref(), Some("s1"));
    assert!(query_param(url, "code").is_none());

    let codes = oauth2_authorization_code::Entity::find()
        .count(env.db.as_ref())
        .await
        .expect("count");
    assert_eq!(codes, 0);
}

#[tokio::test]
async fn test_consent_flow_end_to_end() {
    let env = create_test_env().await;
    let verifier = "consent-flow-verifier-0123456789";

    let response = env
        .server
        .post("/oauth/authorize")
        .add_header(header::COOKIE, session_cookie(MEMBER_ID))
        .json(&json!({
            "authorized": true,
            "response_type": "code",
            "client_id": "consent-app",
            "redirect_uri": CALLBACK,
            "scope": "read write",
            "state": "s2",
            "code_challenge": s256_challenge(verifier),
            "code_challenge_method": "S256",
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let url = body["redirect_url"].as_str().expect("redirect_url");
    assert_eq!(query_param(url, "state").as_deref(), Some("s2"));
    let code = query_param(url, "code").expect("code");

    // Public client: no secret.
    let response = env
        .server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", CALLBACK),
            ("client_id", "consent-app"),
            ("code_verifier", verifier),
        ])
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 3600);
    assert_eq!(body["scope"], "read write");

    let access_token = body["access_token"].as_str().expect("access_token");
    let response = userinfo(&env, access_token).await;
    response.assert_status_ok();
    let info: serde_json::Value = response.json();
    assert_eq!(info["sub"], MEMBER_ID);
    assert_eq!(info["id"], MEMBER_ID);
}

// =============================================================================
// Token Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_token_authorization_code_success() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[("scope", "read profile")]).await;

    let response = exchange(&env, &code, None).await;

    response.assert_status_ok();
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL),
        Some(&HeaderValue::from_static("no-store"))
    );
    assert_eq!(
        response.headers().get(header::PRAGMA),
        Some(&HeaderValue::from_static("no-cache"))
    );
    let body: serde_json::Value = response.json();
    assert!(body["access_token"].as_str().is_some());
    assert!(body["refresh_token"].as_str().is_some());
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["scope"], "read profile");
}

#[tokio::test]
async fn test_token_code_is_single_use() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[]).await;

    exchange(&env, &code, None).await.assert_status_ok();

    let response = exchange(&env, &code, None).await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_token_expired_code() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[]).await;

    let stored = oauth2_authorization_code::Entity::find_by_id(code.as_str())
        .one(env.db.as_ref())
        .await
        .expect("query")
        .expect("code stored");
    let mut expired: oauth2_authorization_code::ActiveModel = stored.into();
    expired.expires_at = Set(OffsetDateTime::now_utc() - Duration::seconds(1));
    expired.update(env.db.as_ref()).await.expect("expire code");

    let response = exchange(&env, &code, None).await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_token_redirect_uri_mismatch() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[]).await;

    let response = env
        .server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", "http://localhost:3000/other"),
            ("client_id", "trusted-app"),
        ])
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");

    // A mismatch leaves the code redeemable.
    exchange(&env, &code, None).await.assert_status_ok();
}

#[tokio::test]
async fn test_token_pkce_s256() {
    let env = create_test_env().await;
    let challenge = s256_challenge("verifier123");
    let pkce = [
        ("code_challenge", challenge.as_str()),
        ("code_challenge_method", "S256"),
    ];

    let code = authorize_trusted(&env, MEMBER_ID, &pkce).await;
    exchange(&env, &code, Some("verifier123"))
        .await
        .assert_status_ok();

    let code = authorize_trusted(&env, MEMBER_ID, &pkce).await;
    let response = exchange(&env, &code, Some("wrong-verifier")).await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");

    // The failed attempt consumed the code.
    let response = exchange(&env, &code, Some("verifier123")).await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_token_pkce_verifier_required() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[("code_challenge", "plain-challenge")]).await;

    let response = exchange(&env, &code, None).await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_token_pkce_plain_is_default_method() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[("code_challenge", "plain-challenge")]).await;

    exchange(&env, &code, Some("plain-challenge"))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_token_scope_negotiation() {
    let env = create_test_env().await;

    // `write` is not allowed for trusted-app and is dropped.
    let code = authorize_trusted(&env, MEMBER_ID, &[("scope", "profile write profile")]).await;
    let body: serde_json::Value = exchange(&env, &code, None).await.json();
    assert_eq!(body["scope"], "profile");

    let code = authorize_trusted(&env, MEMBER_ID, &[]).await;
    let body: serde_json::Value = exchange(&env, &code, None).await.json();
    assert_eq!(body["scope"], "read");
}

#[tokio::test]
async fn test_token_missing_client_id() {
    let env = create_test_env().await;

    let response = env
        .server
        .post("/oauth/token")
        .form(&[("grant_type", "authorization_code"), ("code", "x")])
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_token_rejects_json_body_with_error_object() {
    let env = create_test_env().await;

    let response = env
        .server
        .post("/oauth/token")
        .json(&json!({
            "grant_type": "authorization_code",
            "client_id": "trusted-app",
        }))
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");
    assert!(body["error_description"].as_str().is_some());

    let response = env
        .server
        .post("/oauth/revoke")
        .json(&json!({"token": "x", "client_id": "trusted-app"}))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_token_unsupported_grant_type() {
    let env = create_test_env().await;

    let response = env
        .server
        .post("/oauth/token")
        .form(&[("grant_type", "password"), ("client_id", "trusted-app")])
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_token_wrong_client_secret() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[]).await;

    let response = env
        .server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", CALLBACK),
            ("client_id", "trusted-app"),
            ("client_secret", "nope"),
        ])
        .await;

    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn test_token_code_issued_to_another_client() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[]).await;

    let response = env
        .server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", CALLBACK),
            ("client_id", "consent-app"),
        ])
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_token_confidential_client_with_basic_auth() {
    use base64::Engine;

    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[]).await;
    let credentials =
        base64::engine::general_purpose::STANDARD.encode("trusted-app:trusted-secret");

    let response = env
        .server
        .post("/oauth/token")
        .add_header(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {credentials}")).expect("basic header"),
        )
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", CALLBACK),
        ])
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body["access_token"].as_str().is_some());
}

#[tokio::test]
async fn test_basic_auth_credentials_are_form_decoded() {
    use base64::Engine;

    let env = create_test_env().await;
    env.state
        .registry
        .register_with_fixed_credentials(
            NewClient {
                name: "Ops App".into(),
                redirect_uris: vec![CALLBACK.into()],
                ..Default::default()
            },
            ADMIN_ID,
            "ops:app",
            "p&ss word+1",
        )
        .await
        .expect("register client");

    let basic = |raw: &str| {
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
        HeaderValue::from_str(&format!("Basic {encoded}")).expect("basic header")
    };

    env.server
        .post("/oauth/revoke")
        .add_header(header::AUTHORIZATION, basic("ops%3Aapp:p%26ss+word%2B1"))
        .form(&[("token", "unknown-token")])
        .await
        .assert_status_ok();

    let response = env
        .server
        .post("/oauth/revoke")
        .add_header(header::AUTHORIZATION, basic("ops%3Aapp:p%26ss+word+1"))
        .form(&[("token", "unknown-token")])
        .await;
    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn test_token_refresh_rotates_access_token_only() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[("scope", "read profile")]).await;
    let (access_1, refresh_1) = tokens_of(&exchange(&env, &code, None).await);

    let response = refresh(&env, &refresh_1).await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["scope"], "read profile");
    let (access_2, refresh_2) = tokens_of(&response);

    assert_ne!(access_1, access_2);
    assert_eq!(refresh_1, refresh_2);

    let response = userinfo(&env, &access_1).await;
    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_token");

    userinfo(&env, &access_2).await.assert_status_ok();

    let stored = oauth2_refresh_token::Entity::find_by_id(refresh_1.as_str())
        .one(env.db.as_ref())
        .await
        .expect("query")
        .expect("refresh token stored");
    assert_eq!(stored.access_token, access_2);
}

#[tokio::test]
async fn test_token_refresh_by_other_client_rejected() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[]).await;
    let (_, refresh_token) = tokens_of(&exchange(&env, &code, None).await);

    let response = env
        .server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", "consent-app"),
        ])
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_token_refresh_expired() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[]).await;
    let (_, refresh_token) = tokens_of(&exchange(&env, &code, None).await);

    oauth2_refresh_token::Entity::update_many()
        .col_expr(
            oauth2_refresh_token::Column::ExpiresAt,
            sea_orm::sea_query::Expr::value(OffsetDateTime::now_utc() - Duration::seconds(1)),
        )
        .filter(oauth2_refresh_token::Column::Token.eq(refresh_token.as_str()))
        .exec(env.db.as_ref())
        .await
        .expect("expire refresh token");

    let response = refresh(&env, &refresh_token).await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
}

// =============================================================================
// Revocation Tests
// =============================================================================

#[tokio::test]
async fn test_revoke_refresh_token_revokes_access_token() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[]).await;
    let (access_token, refresh_token) = tokens_of(&exchange(&env, &code, None).await);

    let response = env
        .server
        .post("/oauth/revoke")
        .form(&[
            ("token", refresh_token.as_str()),
            ("token_type_hint", "refresh_token"),
            ("client_id", "trusted-app"),
            ("client_secret", "trusted-secret"),
        ])
        .await;
    response.assert_status_ok();

    userinfo(&env, &access_token)
        .await
        .assert_status_unauthorized();
    let body: serde_json::Value = refresh(&env, &refresh_token).await.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_revoke_ignores_tokens_of_other_clients() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[]).await;
    let (access_token, _) = tokens_of(&exchange(&env, &code, None).await);

    let response = env
        .server
        .post("/oauth/revoke")
        .form(&[("token", access_token.as_str()), ("client_id", "consent-app")])
        .await;
    response.assert_status_ok();

    userinfo(&env, &access_token).await.assert_status_ok();
}

#[tokio::test]
async fn test_revoke_unknown_token_is_ok() {
    let env = create_test_env().await;

    let response = env
        .server
        .post("/oauth/revoke")
        .form(&[("token", "does-not-exist"), ("client_id", "trusted-app")])
        .await;

    response.assert_status_ok();
}

// =============================================================================
// UserInfo Tests
// =============================================================================

#[tokio::test]
async fn test_userinfo_without_token() {
    let env = create_test_env().await;

    let response = env.server.get("/oauth/userinfo").await;

    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn test_userinfo_profile_scope_only() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[("scope", "profile")]).await;
    let (access_token, _) = tokens_of(&exchange(&env, &code, None).await);

    let response = userinfo(&env, &access_token).await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["sub"], MEMBER_ID);
    assert_eq!(body["username"], "bob");
    assert_eq!(body["email"], "bob@example.com");
    assert!(body.get("id").is_none());
    assert!(body.get("role").is_none());
    assert!(body.get("organizations").is_none());
}

#[tokio::test]
async fn test_userinfo_read_scope_includes_organizations() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[("scope", "read")]).await;
    let (access_token, _) = tokens_of(&exchange(&env, &code, None).await);

    let body: serde_json::Value = userinfo(&env, &access_token).await.json();
    assert_eq!(body["id"], MEMBER_ID);
    assert_eq!(body["role"], "user");
    assert!(body.get("username").is_none());
    let organizations = body["organizations"].as_array().expect("organizations");
    assert_eq!(organizations.len(), 1);
    assert_eq!(organizations[0]["slug"], "acme");
    assert_eq!(organizations[0]["role"], "owner");
}

#[tokio::test]
async fn test_userinfo_omits_empty_organizations() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, ADMIN_ID, &[("scope", "read")]).await;
    let (access_token, _) = tokens_of(&exchange(&env, &code, None).await);

    let body: serde_json::Value = userinfo(&env, &access_token).await.json();
    assert_eq!(body["role"], "admin");
    assert!(body.get("organizations").is_none());
}

// =============================================================================
// Metadata and Health
// =============================================================================

#[tokio::test]
async fn test_authorization_server_metadata() {
    let env = create_test_env().await;

    let response = env
        .server
        .get("/.well-known/oauth-authorization-server")
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["issuer"], "http://localhost:8080");
    assert_eq!(
        body["token_endpoint"],
        "http://localhost:8080/oauth/token"
    );
    let scopes = body["scopes_supported"].as_array().expect("scopes");
    for scope in ["read", "write", "profile"] {
        assert!(scopes.iter().any(|s| s == scope), "missing {scope}");
    }
    assert_eq!(body["code_challenge_methods_supported"], json!(["S256", "plain"]));
}

#[tokio::test]
async fn test_healthz() {
    let env = create_test_env().await;
    env.server.get("/healthz").await.assert_status_ok();
}

// =============================================================================
// Administration Tests
// =============================================================================

fn internal_token_header() -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-internal-token"),
        HeaderValue::from_static(INTERNAL_TOKEN),
    )
}

#[tokio::test]
async fn test_admin_requires_authentication() {
    let env = create_test_env().await;

    let response = env.server.get("/admin/oauth/applications").await;
    response.assert_status_unauthorized();

    let response = env
        .server
        .get("/admin/oauth/applications")
        .add_header(
            HeaderName::from_static("x-internal-token"),
            HeaderValue::from_static("wrong-token"),
        )
        .await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_admin_rejects_non_admin_session() {
    let env = create_test_env().await;

    let response = env
        .server
        .get("/admin/oauth/applications")
        .add_header(header::COOKIE, session_cookie(MEMBER_ID))
        .await;

    response.assert_status_forbidden();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "admin_required");
}

#[tokio::test]
async fn test_internal_token_cannot_manage_clients() {
    let env = create_test_env().await;

    for request in [
        env.server.get("/admin/oauth/applications"),
        env.server.delete("/admin/oauth/applications/trusted-app"),
        env.server.post("/admin/oauth/applications/trusted-app/toggle"),
    ] {
        let (name, value) = internal_token_header();
        let response = request.add_header(name, value).await;
        response.assert_status_unauthorized();
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "unauthorized");
    }

    let client = env
        .state
        .registry
        .get("trusted-app")
        .await
        .expect("client survives");
    assert!(client.active);
}

#[tokio::test]
async fn test_admin_session_can_provision() {
    let env = create_test_env().await;

    let response = env
        .server
        .post("/admin/oauth/internal/applications")
        .add_header(header::COOKIE, session_cookie(ADMIN_ID))
        .json(&json!({
            "client_id": "session-provisioned",
            "client_secret": "session-secret",
            "name": "Session Provisioned",
            "redirect_uris": [CALLBACK],
        }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["created_by"], ADMIN_ID);
}

#[tokio::test]
async fn test_internal_create_rejects_malformed_body() {
    let env = create_test_env().await;
    let (name, value) = internal_token_header();

    let response = env
        .server
        .post("/admin/oauth/internal/applications")
        .add_header(name.clone(), value.clone())
        .json(&json!({
            "client_id": "no-secret",
            "name": "No Secret",
            "redirect_uris": [CALLBACK],
        }))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");

    let response = env
        .server
        .post("/admin/oauth/internal/applications/batch")
        .add_header(name, value)
        .json(&json!({"client_id": "not-an-array"}))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_admin_create_rejects_malformed_body() {
    let env = create_test_env().await;

    let response = env
        .server
        .post("/admin/oauth/applications")
        .add_header(header::COOKIE, session_cookie(ADMIN_ID))
        .json(&json!({"redirect_uris": "not-a-list"}))
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_admin_session_creates_and_lists_clients() {
    let env = create_test_env().await;

    let response = env
        .server
        .post("/admin/oauth/applications")
        .add_header(header::COOKIE, session_cookie(ADMIN_ID))
        .json(&json!({
            "name": "Dashboard",
            "redirect_uris": ["https://dash.example.com/cb"],
        }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let created: serde_json::Value = response.json();
    assert_eq!(created["scopes"], json!(["read"]));
    assert_eq!(created["created_by"], ADMIN_ID);
    assert_eq!(created["active"], true);
    assert_eq!(created["client_secret"].as_str().map(str::len), Some(43));

    let response = env
        .server
        .get("/admin/oauth/applications")
        .add_header(header::COOKIE, session_cookie(ADMIN_ID))
        .await;
    response.assert_status_ok();
    let clients: serde_json::Value = response.json();
    assert_eq!(clients.as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn test_admin_rejects_unknown_scope() {
    let env = create_test_env().await;

    let response = env
        .server
        .post("/admin/oauth/applications")
        .add_header(header::COOKIE, session_cookie(ADMIN_ID))
        .json(&json!({
            "name": "Bad",
            "redirect_uris": ["https://bad.example.com/cb"],
            "scopes": ["read", "admin"],
        }))
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_internal_create_with_fixed_credentials() {
    let env = create_test_env().await;
    let payload = json!({
        "client_id": "provisioned-app",
        "client_secret": "provisioned-secret",
        "name": "Provisioned",
        "redirect_uris": [CALLBACK],
        "scopes": ["read", "profile"],
    });

    let (name, value) = internal_token_header();
    let response = env
        .server
        .post("/admin/oauth/internal/applications")
        .add_header(name, value)
        .json(&payload)
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["client_id"], "provisioned-app");
    assert_eq!(body["client_secret"], "provisioned-secret");
    assert_eq!(body["created_by"], ADMIN_ID);

    let response = env
        .server
        .post("/admin/oauth/internal/applications")
        .add_header(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Internal {INTERNAL_TOKEN}")).expect("header"),
        )
        .json(&payload)
        .await;
    response.assert_status(StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "client_id_exists");
}

#[tokio::test]
async fn test_internal_batch_create() {
    let env = create_test_env().await;
    let (name, value) = internal_token_header();

    let response = env
        .server
        .post("/admin/oauth/internal/applications/batch")
        .add_header(name.clone(), value.clone())
        .json(&json!([]))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "empty_request");

    let response = env
        .server
        .post("/admin/oauth/internal/applications/batch")
        .add_header(name, value)
        .json(&json!([
            {
                "client_id": "batch-1",
                "client_secret": "s1",
                "name": "Batch One",
                "redirect_uris": [CALLBACK],
            },
            {
                "client_id": "trusted-app",
                "client_secret": "s2",
                "name": "Duplicate",
                "redirect_uris": [CALLBACK],
            },
            {
                "client_id": "batch-3",
                "client_secret": "s3",
                "name": "No Redirects",
                "redirect_uris": [],
            },
        ]))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success_count"], 1);
    assert_eq!(body["error_count"], 2);
    assert_eq!(body["successful"][0]["client_id"], "batch-1");
    assert_eq!(body["errors"][0]["index"], 1);
    assert_eq!(body["errors"][0]["error"], "client_id_exists");
    assert_eq!(body["errors"][1]["index"], 2);
    assert_eq!(body["errors"][1]["error"], "validation_error");
}

#[tokio::test]
async fn test_admin_toggle_trusted_changes_authorize_outcome() {
    let env = create_test_env().await;

    env.server
        .post("/admin/oauth/applications/trusted-app/toggle-trusted")
        .add_header(header::COOKIE, session_cookie(ADMIN_ID))
        .await
        .assert_status(StatusCode::NO_CONTENT);

    let response = env
        .server
        .get("/oauth/authorize")
        .add_header(header::COOKIE, session_cookie(MEMBER_ID))
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "trusted-app")
        .add_query_param("redirect_uri", CALLBACK)
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["client_id"], "trusted-app");
}

#[tokio::test]
async fn test_admin_delete_cascades_credentials() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[]).await;
    let (access_token, refresh_token) = tokens_of(&exchange(&env, &code, None).await);
    authorize_trusted(&env, MEMBER_ID, &[]).await;

    env.server
        .delete("/admin/oauth/applications/trusted-app")
        .add_header(header::COOKIE, session_cookie(ADMIN_ID))
        .await
        .assert_status(StatusCode::NO_CONTENT);

    let codes = oauth2_authorization_code::Entity::find()
        .filter(oauth2_authorization_code::Column::ClientId.eq("trusted-app"))
        .count(env.db.as_ref())
        .await
        .expect("count codes");
    let access = oauth2_access_token::Entity::find()
        .filter(oauth2_access_token::Column::ClientId.eq("trusted-app"))
        .count(env.db.as_ref())
        .await
        .expect("count access tokens");
    let refresh_tokens = oauth2_refresh_token::Entity::find()
        .filter(oauth2_refresh_token::Column::ClientId.eq("trusted-app"))
        .count(env.db.as_ref())
        .await
        .expect("count refresh tokens");
    assert_eq!((codes, access, refresh_tokens), (0, 0, 0));

    userinfo(&env, &access_token)
        .await
        .assert_status_unauthorized();
    let response = refresh(&env, &refresh_token).await;
    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_client");

    env.server
        .get("/admin/oauth/applications/trusted-app")
        .add_header(header::COOKIE, session_cookie(ADMIN_ID))
        .await
        .assert_status_not_found();
    let response = env
        .server
        .delete("/admin/oauth/applications/trusted-app")
        .add_header(header::COOKIE, session_cookie(ADMIN_ID))
        .await;
    response.assert_status_not_found();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "application_not_found");
}

#[tokio::test]
async fn test_delete_rolls_back_when_cascade_fails() {
    let env = create_test_env().await;
    let code = authorize_trusted(&env, MEMBER_ID, &[]).await;
    exchange(&env, &code, None).await.assert_status_ok();
    authorize_trusted(&env, MEMBER_ID, &[]).await;

    env.db
        .execute_unprepared("DROP TABLE oauth2_refresh_token")
        .await
        .expect("drop table");

    let result = env.state.registry.delete("trusted-app").await;
    assert!(result.is_err());

    env.state
        .registry
        .get("trusted-app")
        .await
        .expect("client survives");
    let codes = oauth2_authorization_code::Entity::find()
        .filter(oauth2_authorization_code::Column::ClientId.eq("trusted-app"))
        .count(env.db.as_ref())
        .await
        .expect("count codes");
    assert_eq!(codes, 2);
    let access = oauth2_access_token::Entity::find()
        .filter(oauth2_access_token::Column::ClientId.eq("trusted-app"))
        .count(env.db.as_ref())
        .await
        .expect("count access tokens");
    assert_eq!(access, 1);
}
