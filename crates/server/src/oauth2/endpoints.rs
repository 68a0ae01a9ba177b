//! OAuth2 HTTP endpoints.
//!
//! Implements the authorization server facade:
//! - Authorization endpoint (consent payload or redirect) and consent decision
//! - Token endpoint (`authorization_code` and `refresh_token` grants)
//! - Token revocation
//! - UserInfo
//! - Authorization server metadata (RFC 8414)

use crate::error::{ErrorResponse, OAuthError};
use crate::oauth2::codes::AuthorizeParams;
use crate::oauth2::identity::{OrganizationMembership, User};
use crate::oauth2::tokens::{CodeExchange, RefreshRequest, TokenResponse};
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};
use axum::{
    Form, Json,
    extract::{
        Query, State,
        rejection::{FormRejection, JsonRejection},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Creates the OAuth2 router.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(authorize, authorize_decision))
        .routes(routes!(token))
        .routes(routes!(revoke))
        .routes(routes!(userinfo))
        .routes(routes!(authorization_server_metadata))
        .with_state(state)
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// The user's answer to a consent prompt, together with the original request.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConsentDecision {
    /// `true` to grant access, `false` to deny. Required.
    pub authorized: bool,
    #[serde(flatten)]
    pub request: AuthorizeParams,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ScopeDescription {
    pub name: String,
    pub description: String,
}

/// Returned by `GET /oauth/authorize` when an untrusted client needs consent.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConsentPayload {
    pub client_name: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: String,
    pub response_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    /// Scopes that would be granted, with human-readable descriptions
    pub scopes: Vec<ScopeDescription>,
    pub user: User,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RedirectResponse {
    pub redirect_url: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub code_verifier: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RevokeRequest {
    pub token: Option<String>,
    /// Accepted and ignored; both token kinds are always checked
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Claims returned by the UserInfo endpoint. Which fields are present depends
/// on the granted scopes.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserInfoResponse {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organizations: Option<Vec<OrganizationMembership>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub revocation_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

// =============================================================================
// Endpoints
// =============================================================================

/// OAuth2 Authorization endpoint.
#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    get,
    path = "/oauth/authorize",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize",
    summary = "Start the Authorization Code flow",
    description = "Validates the authorization request, then:\n\n\
                   - redirects to the login page (all parameters preserved, plus `oauth_redirect=true`) \
                   when no user is signed in\n\
                   - redirects straight back to the client with a code when the client is trusted\n\
                   - otherwise returns a consent payload describing the request\n\n\
                   **PKCE:** `code_challenge_method` may be `S256` or `plain` (the default).",
    params(AuthorizeParams),
    responses(
        (status = 200, description = "Consent is required", body = ConsentPayload),
        (status = 303, description = "Redirect to the login page or back to the client with a code"),
        (status = 400, description = "Invalid authorization request", body = ErrorResponse),
    )
)]
pub async fn authorize(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Query(params): Query<AuthorizeParams>,
) -> Result<Response, OAuthError> {
    let client = state.codes.validate_authorization_request(&params).await?;

    let Some(user) = state.sessions.current_user(&headers).await? else {
        return Ok(Redirect::to(&login_redirect_url(&state.login_url, &params)).into_response());
    };

    if client.trusted {
        let code = state.codes.issue(&user.id, &client, &params).await?;
        let url = append_query(
            &params.redirect_uri,
            &[("code", code.as_str()), ("state", params.state.as_str())],
        );
        return Ok(Redirect::to(&url).into_response());
    }

    let granted = crate::oauth2::scope::negotiate(&params.scope, &client.scopes);
    let scopes = state
        .scopes
        .describe(&granted)
        .await?
        .into_iter()
        .map(|s| ScopeDescription {
            name: s.name,
            description: s.description,
        })
        .collect();

    let payload = ConsentPayload {
        client_name: client.name,
        client_id: client.client_id,
        redirect_uri: params.redirect_uri.clone(),
        scope: params.scope.clone(),
        state: params.state.clone(),
        response_type: params.response_type.clone(),
        code_challenge: params.challenge().map(String::from),
        code_challenge_method: params.code_challenge_method.clone(),
        scopes,
        user,
    };
    Ok((StatusCode::OK, Json(payload)).into_response())
}

/// Consent decision endpoint.
#[tracing::instrument(skip(state, headers, payload))]
#[utoipa::path(
    post,
    path = "/oauth/authorize",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Consent Decision",
    summary = "Approve or deny an authorization request",
    description = "Submits the signed-in user's consent decision. The request is validated again \
                   before any redirect URL is produced. Denial yields an `error=access_denied` \
                   redirect, approval yields a redirect carrying a fresh authorization code.",
    request_body(content = ConsentDecision, content_type = "application/json"),
    responses(
        (status = 200, description = "Where the user agent should go next", body = RedirectResponse),
        (status = 400, description = "Invalid request or missing `authorized` flag", body = ErrorResponse),
        (status = 401, description = "No signed-in user", body = ErrorResponse),
    )
)]
pub async fn authorize_decision(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    payload: Result<Json<ConsentDecision>, JsonRejection>,
) -> Result<Json<RedirectResponse>, OAuthError> {
    let Json(decision) = payload.map_err(|e| OAuthError::InvalidRequest(e.body_text()))?;

    let user = state
        .sessions
        .current_user(&headers)
        .await?
        .ok_or(OAuthError::LoginRequired)?;

    let params = decision.request;
    let client = state.codes.validate_authorization_request(&params).await?;

    if !decision.authorized {
        tracing::info!(
            client_id = %client.client_id,
            user_id = %user.id,
            "User denied authorization request"
        );
        let url = append_query(
            &params.redirect_uri,
            &[("error", "access_denied"), ("state", params.state.as_str())],
        );
        return Ok(Json(RedirectResponse { redirect_url: url }));
    }

    let code = state.codes.issue(&user.id, &client, &params).await?;
    let url = append_query(
        &params.redirect_uri,
        &[("code", code.as_str()), ("state", params.state.as_str())],
    );
    Ok(Json(RedirectResponse { redirect_url: url }))
}

/// OAuth2 Token endpoint.
#[tracing::instrument(skip(state, headers, params))]
#[utoipa::path(
    post,
    path = "/oauth/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Exchange an authorization code or refresh token",
    description = "**Supported grant types:**\n\
                   - `authorization_code`: exchange a code for an access and refresh token\n\
                   - `refresh_token`: obtain a new access token; the refresh token itself is returned unchanged\n\n\
                   **Client authentication:** HTTP Basic or `client_id`/`client_secret` in the body. \
                   Public clients may omit the secret.\n\n\
                   **PKCE:** a `code_verifier` is mandatory when the code was issued with a challenge.",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request parameters"
    ),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Invalid request or grant", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    params: Result<Form<TokenRequest>, FormRejection>,
) -> Result<Response, OAuthError> {
    let Form(params) = params.map_err(|e| OAuthError::InvalidRequest(e.body_text()))?;
    let (client_id, client_secret) =
        extract_client_credentials(&headers, params.client_id.clone(), params.client_secret.clone());
    let client_id = client_id
        .ok_or_else(|| OAuthError::InvalidRequest("client_id is required".into()))?;

    let response = match params.grant_type.as_deref() {
        Some("authorization_code") => {
            state
                .tokens
                .exchange_code_for_token(CodeExchange {
                    code: params.code.unwrap_or_default(),
                    redirect_uri: params.redirect_uri.unwrap_or_default(),
                    client_id,
                    client_secret,
                    code_verifier: params.code_verifier,
                })
                .await?
        }
        Some("refresh_token") => {
            state
                .tokens
                .refresh(RefreshRequest {
                    refresh_token: params.refresh_token.unwrap_or_default(),
                    client_id,
                    client_secret,
                })
                .await?
        }
        Some(other) => {
            return Err(OAuthError::UnsupportedGrantType(format!(
                "grant_type '{other}' is not supported"
            )));
        }
        None => return Err(OAuthError::InvalidRequest("grant_type is required".into())),
    };

    Ok((
        StatusCode::OK,
        [(header::CACHE_CONTROL, "no-store"), (header::PRAGMA, "no-cache")],
        Json(response),
    )
        .into_response())
}

/// Token revocation endpoint (RFC 7009).
#[tracing::instrument(skip(state, headers, params))]
#[utoipa::path(
    post,
    path = "/oauth/revoke",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Revoke Token",
    summary = "Revoke an access or refresh token",
    description = "Revokes a token issued to the authenticated client. Returns 200 even if the token \
                   was unknown or already revoked. Revoking a refresh token also revokes the access \
                   token currently associated with it.",
    request_body(
        content = RevokeRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token revocation request"
    ),
    responses(
        (status = 200, description = "Token revoked (or was already invalid)"),
        (status = 400, description = "Missing token parameter", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn revoke(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    params: Result<Form<RevokeRequest>, FormRejection>,
) -> Result<StatusCode, OAuthError> {
    let Form(params) = params.map_err(|e| OAuthError::InvalidRequest(e.body_text()))?;
    let (client_id, client_secret) =
        extract_client_credentials(&headers, params.client_id, params.client_secret);
    let client_id = client_id
        .ok_or_else(|| OAuthError::InvalidRequest("client_id is required".into()))?;
    let token = params
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest("token is required".into()))?;

    let client = state
        .tokens
        .authenticate_client(&client_id, client_secret.as_deref())
        .await?;
    state.tokens.revoke(&client.client_id, &token).await?;
    Ok(StatusCode::OK)
}

/// UserInfo endpoint.
#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    get,
    path = "/oauth/userinfo",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 UserInfo",
    summary = "Get the token owner's profile",
    description = "Returns claims about the user who authorized the access token.\n\n\
                   **Returned claims depend on granted scopes:**\n\
                   - always: `sub`\n\
                   - `profile`: `username`, `email`\n\
                   - `read`: `id`, `role`, `organizations` (omitted when the user has none)",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "User claims", body = UserInfoResponse),
        (status = 401, description = "Missing, invalid, revoked or expired access token", body = ErrorResponse),
    )
)]
pub async fn userinfo(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
) -> Result<Json<UserInfoResponse>, OAuthError> {
    let access_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            OAuthError::InvalidToken("missing or invalid Authorization header".into())
        })?;

    let grant = state.tokens.validate_access_token(access_token).await?;
    let user = state
        .identity
        .get_user(&grant.user_id)
        .await?
        .ok_or_else(|| OAuthError::InvalidToken("token owner no longer exists".into()))?;

    let mut response = UserInfoResponse {
        sub: user.id.clone(),
        username: None,
        email: None,
        id: None,
        role: None,
        organizations: None,
    };

    if grant.has_scope("profile") {
        response.username = Some(user.username.clone());
        response.email = Some(user.email.clone());
    }

    if grant.has_scope("read") {
        let organizations = state
            .identity
            .get_user_organizations_with_roles(&user.id)
            .await?;
        response.id = Some(user.id);
        response.role = Some(user.role);
        if !organizations.is_empty() {
            response.organizations = Some(organizations);
        }
    }

    Ok(Json(response))
}

/// Authorization server metadata (RFC 8414).
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/oauth-authorization-server",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Server Metadata",
    summary = "Authorization server metadata",
    description = "Endpoint URLs and capabilities of this authorization server.",
    responses(
        (status = 200, description = "Metadata document", body = AuthorizationServerMetadata),
    )
)]
pub async fn authorization_server_metadata(
    State(state): State<OAuth2State>,
) -> Result<Json<AuthorizationServerMetadata>, OAuthError> {
    let scopes_supported = state
        .scopes
        .list()
        .await?
        .into_iter()
        .map(|s| s.name)
        .collect();

    Ok(Json(AuthorizationServerMetadata {
        issuer: state.issuer_url.clone(),
        authorization_endpoint: format!("{}/oauth/authorize", state.issuer_url),
        token_endpoint: format!("{}/oauth/token", state.issuer_url),
        userinfo_endpoint: format!("{}/oauth/userinfo", state.issuer_url),
        revocation_endpoint: format!("{}/oauth/revoke", state.issuer_url),
        response_types_supported: vec!["code".to_string()],
        grant_types_supported: vec![
            "authorization_code".to_string(),
            "refresh_token".to_string(),
        ],
        scopes_supported,
        token_endpoint_auth_methods_supported: vec![
            "client_secret_basic".to_string(),
            "client_secret_post".to_string(),
            "none".to_string(),
        ],
        code_challenge_methods_supported: vec!["S256".to_string(), "plain".to_string()],
    }))
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Client credentials from HTTP Basic auth, falling back to the form body.
/// Basic credentials are form-urlencoded before base64 (RFC 6749 section
/// 2.3.1). Empty secrets count as absent.
fn extract_client_credentials(
    headers: &HeaderMap,
    form_client_id: Option<String>,
    form_client_secret: Option<String>,
) -> (Option<String>, Option<String>) {
    // Try Basic auth first
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        && let Ok(decoded) =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, auth.trim())
        && let Ok(creds) = String::from_utf8(decoded)
        && let Some((id, secret)) = creds.split_once(':')
        && let Some(id) = form_decode(id)
        && let Some(secret) = form_decode(secret)
    {
        let secret = (!secret.is_empty()).then_some(secret);
        return (Some(id), secret);
    }

    (
        form_client_id.filter(|id| !id.is_empty()),
        form_client_secret.filter(|s| !s.is_empty()),
    )
}

fn form_decode(value: &str) -> Option<String> {
    urlencoding::decode(&value.replace('+', " "))
        .ok()
        .map(|v| v.into_owned())
}

/// Append query parameters to `base`. Empty values are skipped.
pub fn append_query(base: &str, pairs: &[(&str, &str)]) -> String {
    let mut url = base.to_string();
    let mut sep = if base.contains('?') { '&' } else { '?' };
    for (key, value) in pairs.iter().filter(|(_, v)| !v.is_empty()) {
        url.push(sep);
        url.push_str(key);
        url.push('=');
        url.push_str(&urlencoding::encode(value));
        sep = '&';
    }
    url
}

/// Login URL carrying the whole authorization request.
fn login_redirect_url(login_url: &str, params: &AuthorizeParams) -> String {
    let challenge = params.challenge().unwrap_or_default();
    let method = if challenge.is_empty() {
        ""
    } else {
        params.code_challenge_method.as_deref().unwrap_or_default()
    };
    append_query(
        login_url,
        &[
            ("oauth_redirect", "true"),
            ("client_id", params.client_id.as_str()),
            ("redirect_uri", params.redirect_uri.as_str()),
            ("scope", params.scope.as_str()),
            ("state", params.state.as_str()),
            ("response_type", params.response_type.as_str()),
            ("code_challenge", challenge),
            ("code_challenge_method", method),
        ],
    )
}
