//! Client administration API.
//!
//! Client management takes an [`AdminSession`]: a signed-in user with the
//! `admin` role. The two provisioning routes under `/internal` take a
//! [`Provisioner`], which also accepts the configured internal token.

use crate::error::{ErrorResponse, RegistryError};
use crate::oauth2::credentials;
use crate::oauth2::registry::{ClientView, NewClient};
use crate::oauth2::state::OAuth2State;
use axum::{
    Json,
    extract::{FromRequestParts, Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Tag for OpenAPI documentation.
pub const ADMIN_TAG: &str = "OAuth2 Administration";

pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// Creates the admin router, to be nested under `/admin/oauth`.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(create_application, list_applications))
        .routes(routes!(
            get_application,
            update_application,
            delete_application
        ))
        .routes(routes!(toggle_application))
        .routes(routes!(toggle_application_trusted))
        .routes(routes!(internal_create_application))
        .routes(routes!(internal_batch_create_applications))
        .with_state(state)
}

/// A signed-in user with the `admin` role.
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub user_id: String,
}

/// Caller of the provisioning routes: the internal token or an admin session.
#[derive(Debug, Clone)]
pub struct Provisioner {
    /// User id recorded as `created_by`
    pub actor_id: String,
}

fn internal_token_from(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(INTERNAL_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Internal "))
        })
        .map(str::trim)
}

fn reject(status: StatusCode, error: &str, description: Option<&str>) -> Response {
    (
        status,
        Json(ErrorResponse::new(error, description.map(String::from))),
    )
        .into_response()
}

fn invalid_body(rejection: JsonRejection) -> RegistryError {
    RegistryError::Invalid(rejection.body_text())
}

impl FromRequestParts<OAuth2State> for AdminSession {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &OAuth2State,
    ) -> Result<Self, Self::Rejection> {
        let user = state
            .sessions
            .current_user(&parts.headers)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to resolve session user");
                reject(StatusCode::INTERNAL_SERVER_ERROR, "server_error", None)
            })?;

        match user {
            None => Err(reject(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                Some("an administrator session is required"),
            )),
            Some(u) if !u.is_admin() => {
                Err(reject(StatusCode::FORBIDDEN, "admin_required", None))
            }
            Some(u) => Ok(AdminSession { user_id: u.id }),
        }
    }
}

impl FromRequestParts<OAuth2State> for Provisioner {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &OAuth2State,
    ) -> Result<Self, Self::Rejection> {
        let Some(presented) = internal_token_from(&parts.headers) else {
            let admin = AdminSession::from_request_parts(parts, state).await?;
            return Ok(Provisioner {
                actor_id: admin.user_id,
            });
        };

        match state.internal_token.as_deref() {
            Some(expected) if credentials::secrets_match(presented, expected) => Ok(Provisioner {
                actor_id: state.internal_admin_id.clone(),
            }),
            Some(_) => {
                tracing::warn!("Rejected request with an invalid internal token");
                Err(reject(
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    Some("invalid internal token"),
                ))
            }
            None => Err(reject(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                Some("internal token authentication is disabled"),
            )),
        }
    }
}

/// A client registration with caller-chosen credentials.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct InternalClientRequest {
    pub client_id: String,
    pub client_secret: String,
    #[serde(flatten)]
    pub client: NewClient,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchItemError {
    pub index: usize,
    pub client_id: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchCreateResponse {
    pub success_count: usize,
    pub error_count: usize,
    pub successful: Vec<ClientView>,
    pub errors: Vec<BatchItemError>,
}

#[tracing::instrument(skip(state, body), fields(actor = %admin.user_id))]
#[utoipa::path(
    post,
    path = "/applications",
    tag = ADMIN_TAG,
    operation_id = "Create OAuth2 Application",
    summary = "Register a client application",
    description = "Registers a client with generated credentials. The secret is part of the response. \
                   Scopes default to `read` and must exist in the scope vocabulary.",
    request_body = NewClient,
    responses(
        (status = 201, description = "Client registered", body = ClientView),
        (status = 400, description = "Invalid registration", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 403, description = "Not an administrator", body = ErrorResponse),
    )
)]
pub async fn create_application(
    admin: AdminSession,
    State(state): State<OAuth2State>,
    body: Result<Json<NewClient>, JsonRejection>,
) -> Result<(StatusCode, Json<ClientView>), RegistryError> {
    let Json(body) = body.map_err(invalid_body)?;
    let client = state.registry.register(body, &admin.user_id).await?;
    Ok((StatusCode::CREATED, Json(client.into())))
}

#[tracing::instrument(skip(state, _admin))]
#[utoipa::path(
    get,
    path = "/applications",
    tag = ADMIN_TAG,
    operation_id = "List OAuth2 Applications",
    summary = "List all client applications",
    responses(
        (status = 200, description = "All registered clients, newest first", body = Vec<ClientView>),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 403, description = "Not an administrator", body = ErrorResponse),
    )
)]
pub async fn list_applications(
    _admin: AdminSession,
    State(state): State<OAuth2State>,
) -> Result<Json<Vec<ClientView>>, RegistryError> {
    let clients = state.registry.list().await?;
    Ok(Json(clients.into_iter().map(ClientView::from).collect()))
}

#[tracing::instrument(skip(state, _admin))]
#[utoipa::path(
    get,
    path = "/applications/{client_id}",
    tag = ADMIN_TAG,
    operation_id = "Get OAuth2 Application",
    params(("client_id" = String, Path, description = "Client identifier")),
    responses(
        (status = 200, description = "The client", body = ClientView),
        (status = 404, description = "Unknown client", body = ErrorResponse),
    )
)]
pub async fn get_application(
    _admin: AdminSession,
    State(state): State<OAuth2State>,
    Path(client_id): Path<String>,
) -> Result<Json<ClientView>, RegistryError> {
    Ok(Json(state.registry.get(&client_id).await?.into()))
}

#[tracing::instrument(skip(state, _admin, body))]
#[utoipa::path(
    put,
    path = "/applications/{client_id}",
    tag = ADMIN_TAG,
    operation_id = "Update OAuth2 Application",
    summary = "Replace a client's editable fields",
    description = "Credentials and the active flag are not changed by this call.",
    params(("client_id" = String, Path, description = "Client identifier")),
    request_body = NewClient,
    responses(
        (status = 200, description = "Updated client", body = ClientView),
        (status = 400, description = "Invalid update", body = ErrorResponse),
        (status = 404, description = "Unknown client", body = ErrorResponse),
    )
)]
pub async fn update_application(
    _admin: AdminSession,
    State(state): State<OAuth2State>,
    Path(client_id): Path<String>,
    body: Result<Json<NewClient>, JsonRejection>,
) -> Result<Json<ClientView>, RegistryError> {
    let Json(body) = body.map_err(invalid_body)?;
    Ok(Json(state.registry.update(&client_id, body).await?.into()))
}

#[tracing::instrument(skip(state), fields(actor = %admin.user_id))]
#[utoipa::path(
    delete,
    path = "/applications/{client_id}",
    tag = ADMIN_TAG,
    operation_id = "Delete OAuth2 Application",
    summary = "Delete a client and all credentials issued to it",
    params(("client_id" = String, Path, description = "Client identifier")),
    responses(
        (status = 204, description = "Client deleted"),
        (status = 404, description = "Unknown client", body = ErrorResponse),
    )
)]
pub async fn delete_application(
    admin: AdminSession,
    State(state): State<OAuth2State>,
    Path(client_id): Path<String>,
) -> Result<StatusCode, RegistryError> {
    state.registry.delete(&client_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state, _admin))]
#[utoipa::path(
    post,
    path = "/applications/{client_id}/toggle",
    tag = ADMIN_TAG,
    operation_id = "Toggle OAuth2 Application",
    summary = "Activate or deactivate a client",
    params(("client_id" = String, Path, description = "Client identifier")),
    responses(
        (status = 204, description = "Flag toggled"),
        (status = 404, description = "Unknown client", body = ErrorResponse),
    )
)]
pub async fn toggle_application(
    _admin: AdminSession,
    State(state): State<OAuth2State>,
    Path(client_id): Path<String>,
) -> Result<StatusCode, RegistryError> {
    state.registry.toggle_active(&client_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state, _admin))]
#[utoipa::path(
    post,
    path = "/applications/{client_id}/toggle-trusted",
    tag = ADMIN_TAG,
    operation_id = "Toggle OAuth2 Application Trust",
    summary = "Mark or unmark a client as trusted (skips consent)",
    params(("client_id" = String, Path, description = "Client identifier")),
    responses(
        (status = 204, description = "Flag toggled"),
        (status = 404, description = "Unknown client", body = ErrorResponse),
    )
)]
pub async fn toggle_application_trusted(
    _admin: AdminSession,
    State(state): State<OAuth2State>,
    Path(client_id): Path<String>,
) -> Result<StatusCode, RegistryError> {
    state.registry.toggle_trusted(&client_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state, body), fields(actor = %auth.actor_id))]
#[utoipa::path(
    post,
    path = "/internal/applications",
    tag = ADMIN_TAG,
    operation_id = "Internal Create OAuth2 Application",
    summary = "Register a client with fixed credentials",
    description = "Provisioning endpoint for trusted pipelines. Accepts `X-Internal-Token: <token>` or \
                   `Authorization: Internal <token>` as well as an admin session.",
    request_body = InternalClientRequest,
    responses(
        (status = 201, description = "Client registered", body = ClientView),
        (status = 400, description = "Invalid registration", body = ErrorResponse),
        (status = 409, description = "client_id already exists", body = ErrorResponse),
    )
)]
pub async fn internal_create_application(
    auth: Provisioner,
    State(state): State<OAuth2State>,
    body: Result<Json<InternalClientRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ClientView>), RegistryError> {
    let Json(body) = body.map_err(invalid_body)?;
    let client = state
        .registry
        .register_with_fixed_credentials(
            body.client,
            &auth.actor_id,
            &body.client_id,
            &body.client_secret,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(client.into())))
}

#[tracing::instrument(skip(state, body), fields(actor = %auth.actor_id))]
#[utoipa::path(
    post,
    path = "/internal/applications/batch",
    tag = ADMIN_TAG,
    operation_id = "Internal Batch Create OAuth2 Applications",
    summary = "Register many clients with fixed credentials",
    description = "Each entry is registered independently; failures are reported per index and do not \
                   abort the rest of the batch.",
    request_body = Vec<InternalClientRequest>,
    responses(
        (status = 200, description = "Per-entry outcome", body = BatchCreateResponse),
        (status = 400, description = "Empty batch", body = ErrorResponse),
    )
)]
pub async fn internal_batch_create_applications(
    auth: Provisioner,
    State(state): State<OAuth2State>,
    body: Result<Json<Vec<InternalClientRequest>>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return invalid_body(rejection).into_response(),
    };
    if body.is_empty() {
        return reject(
            StatusCode::BAD_REQUEST,
            "empty_request",
            Some("At least one application must be provided"),
        );
    }

    let mut successful = Vec::new();
    let mut errors = Vec::new();
    for (index, req) in body.into_iter().enumerate() {
        let client_id = req.client_id.clone();
        match state
            .registry
            .register_with_fixed_credentials(
                req.client,
                &auth.actor_id,
                &req.client_id,
                &req.client_secret,
            )
            .await
        {
            Ok(client) => successful.push(ClientView::from(client)),
            Err(e) => {
                let error = match &e {
                    RegistryError::ClientIdConflict(_) => "client_id_exists",
                    RegistryError::Storage(_) | RegistryError::Randomness(_) => {
                        tracing::error!(index, error = %e, "Batch registration entry failed");
                        "server_error"
                    }
                    _ => "validation_error",
                };
                errors.push(BatchItemError {
                    index,
                    client_id,
                    error: error.to_string(),
                    error_description: e.public_description(),
                });
            }
        }
    }

    tracing::info!(
        succeeded = successful.len(),
        failed = errors.len(),
        "Processed batch client registration"
    );
    (
        StatusCode::OK,
        Json(BatchCreateResponse {
            success_count: successful.len(),
            error_count: errors.len(),
            successful,
            errors,
        }),
    )
        .into_response()
}
