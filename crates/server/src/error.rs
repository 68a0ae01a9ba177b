use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Error body shared by every endpoint: `{error, error_description?}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: &str, description: Option<String>) -> Self {
        Self {
            error: error.to_string(),
            error_description: description,
        }
    }
}

/// OAuth 2.0 protocol errors.
///
/// The string payload is a human-readable description. For `ServerError` it is
/// logged and never returned to the caller.
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),
    #[error("invalid_client: {0}")]
    InvalidClient(String),
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),
    #[error("invalid_token: {0}")]
    InvalidToken(String),
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),
    #[error("access_denied")]
    AccessDenied,
    #[error("login_required")]
    LoginRequired,
    #[error("server_error: {0}")]
    ServerError(String),
}

impl OAuthError {
    /// The RFC 6749 error code.
    pub fn code(&self) -> &'static str {
        match self {
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::InvalidClient(_) => "invalid_client",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::InvalidToken(_) => "invalid_token",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuthError::AccessDenied => "access_denied",
            OAuthError::LoginRequired => "login_required",
            OAuthError::ServerError(_) => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            OAuthError::InvalidClient(_)
            | OAuthError::InvalidToken(_)
            | OAuthError::LoginRequired => StatusCode::UNAUTHORIZED,
            OAuthError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn description(&self) -> Option<String> {
        match self {
            OAuthError::InvalidRequest(d)
            | OAuthError::InvalidClient(d)
            | OAuthError::InvalidGrant(d)
            | OAuthError::InvalidToken(d)
            | OAuthError::UnsupportedGrantType(d)
                if !d.is_empty() =>
            {
                Some(d.clone())
            }
            _ => None,
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        if let OAuthError::ServerError(detail) = &self {
            tracing::error!(error = %detail, "OAuth2 request failed with a server error");
        }
        let body = ErrorResponse::new(self.code(), self.description());
        (self.status(), Json(body)).into_response()
    }
}

impl From<sea_orm::DbErr> for OAuthError {
    fn from(e: sea_orm::DbErr) -> Self {
        OAuthError::ServerError(format!("database error: {e}"))
    }
}

impl From<getrandom::Error> for OAuthError {
    fn from(e: getrandom::Error) -> Self {
        OAuthError::ServerError(format!("randomness source failed: {e}"))
    }
}

impl From<RegistryError> for OAuthError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound => OAuthError::InvalidClient("unknown or inactive client".into()),
            RegistryError::Storage(e) => e.into(),
            RegistryError::Randomness(e) => e.into(),
            other => OAuthError::InvalidRequest(other.to_string()),
        }
    }
}

/// Errors raised by the client registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("application not found")]
    NotFound,
    #[error("client_id {0} already exists")]
    ClientIdConflict(String),
    #[error("at least one redirect URI is required")]
    InvalidRedirectUris,
    #[error("unknown scope: {0}")]
    UnknownScope(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("storage error: {0}")]
    Storage(#[from] sea_orm::DbErr),
    #[error("randomness source failed: {0}")]
    Randomness(#[from] getrandom::Error),
}

impl RegistryError {
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::NotFound => "application_not_found",
            RegistryError::ClientIdConflict(_) => "client_id_exists",
            RegistryError::InvalidRedirectUris
            | RegistryError::UnknownScope(_)
            | RegistryError::Invalid(_) => "invalid_request",
            RegistryError::Storage(_) | RegistryError::Randomness(_) => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RegistryError::NotFound => StatusCode::NOT_FOUND,
            RegistryError::ClientIdConflict(_) => StatusCode::CONFLICT,
            RegistryError::InvalidRedirectUris
            | RegistryError::UnknownScope(_)
            | RegistryError::Invalid(_) => StatusCode::BAD_REQUEST,
            RegistryError::Storage(_) | RegistryError::Randomness(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Description safe to return to the caller; internal failures carry none.
    pub fn public_description(&self) -> Option<String> {
        match self {
            RegistryError::Storage(_) | RegistryError::Randomness(_) => None,
            other => Some(other.to_string()),
        }
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        if matches!(
            self,
            RegistryError::Storage(_) | RegistryError::Randomness(_)
        ) {
            tracing::error!(error = %self, "Client registry operation failed");
        }
        let body = ErrorResponse::new(self.code(), self.public_description());
        (self.status(), Json(body)).into_response()
    }
}
