//! Token Engine.
//!
//! Exchanges authorization codes for access/refresh token pairs, rotates the
//! access token behind a refresh token, and validates bearer tokens. Refresh
//! tokens are not rotated: a refresh returns the same refresh token value.

use crate::entity::{oauth2_access_token, oauth2_client, oauth2_refresh_token};
use crate::error::OAuthError;
use crate::oauth2::codes::AuthorizationCodeEngine;
use crate::oauth2::credentials;
use crate::oauth2::pkce::{self, PkceMethod};
use crate::oauth2::registry::ClientRegistry;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;

#[derive(Debug, Clone)]
pub struct CodeExchange {
    pub code: String,
    pub redirect_uri: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Granted scopes, space-separated
    pub scope: String,
}

/// What a valid access token grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub user_id: String,
    pub client_id: String,
    pub scopes: Vec<String>,
}

impl AccessGrant {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

#[derive(Clone)]
pub struct TokenEngine {
    db: Arc<DatabaseConnection>,
    registry: ClientRegistry,
    codes: AuthorizationCodeEngine,
    access_lifetime: i64,
    refresh_lifetime: i64,
}

impl TokenEngine {
    pub fn new(
        db: Arc<DatabaseConnection>,
        registry: ClientRegistry,
        codes: AuthorizationCodeEngine,
        access_lifetime: i64,
        refresh_lifetime: i64,
    ) -> Self {
        Self {
            db,
            registry,
            codes,
            access_lifetime,
            refresh_lifetime,
        }
    }

    /// Resolve an active client. A supplied secret must match; public
    /// clients may omit it.
    pub async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> Result<oauth2_client::Model, OAuthError> {
        if client_id.is_empty() {
            return Err(OAuthError::InvalidRequest("client_id is required".into()));
        }
        let client = self.registry.lookup_active(client_id).await?;
        if let Some(secret) = client_secret
            && !credentials::secrets_match(secret, &client.client_secret)
        {
            tracing::warn!(client_id = client_id, "Client authentication failed");
            return Err(OAuthError::InvalidClient(
                "client authentication failed".into(),
            ));
        }
        Ok(client)
    }

    /// Insert a new access token and return its value and expiry.
    async fn insert_access_token<C: ConnectionTrait>(
        &self,
        txn: &C,
        client_id: &str,
        user_id: &str,
        scope: &str,
        now: OffsetDateTime,
    ) -> Result<String, OAuthError> {
        let token = credentials::generate_access_token();
        oauth2_access_token::ActiveModel {
            token: Set(token.clone()),
            client_id: Set(client_id.to_string()),
            user_id: Set(user_id.to_string()),
            scope: Set(scope.to_string()),
            expires_at: Set(now + Duration::seconds(self.access_lifetime)),
            revoked: Set(false),
            created_at: Set(now),
        }
        .insert(txn)
        .await?;
        Ok(token)
    }

    /// `authorization_code` grant.
    #[tracing::instrument(skip(self, req), fields(client_id = %req.client_id))]
    pub async fn exchange_code_for_token(
        &self,
        req: CodeExchange,
    ) -> Result<TokenResponse, OAuthError> {
        if req.code.is_empty() {
            return Err(OAuthError::InvalidRequest("code is required".into()));
        }
        let client = self
            .authenticate_client(&req.client_id, req.client_secret.as_deref())
            .await?;

        let txn = self.db.begin().await?;
        let code = self
            .codes
            .redeem(&txn, &req.code, &client.client_id, &req.redirect_uri)
            .await?;

        if let Some(challenge) = code.code_challenge.as_deref().filter(|c| !c.is_empty()) {
            let method = code
                .code_challenge_method
                .as_deref()
                .map(str::parse::<PkceMethod>)
                .transpose()
                .map_err(OAuthError::InvalidGrant)?;
            let verified = req
                .code_verifier
                .as_deref()
                .is_some_and(|v| pkce::verify(challenge, method, v));
            if !verified {
                // The code stays consumed: a wrong verifier burns it.
                txn.commit().await?;
                tracing::warn!(
                    client_id = %client.client_id,
                    "PKCE verification failed, authorization code revoked"
                );
                return Err(OAuthError::InvalidGrant(
                    "PKCE verification failed".into(),
                ));
            }
        }

        let now = OffsetDateTime::now_utc();
        let access_token = self
            .insert_access_token(&txn, &client.client_id, &code.user_id, &code.scope, now)
            .await?;
        let refresh_token = credentials::generate_secret()?;
        oauth2_refresh_token::ActiveModel {
            token: Set(refresh_token.clone()),
            client_id: Set(client.client_id.clone()),
            user_id: Set(code.user_id.clone()),
            access_token: Set(access_token.clone()),
            expires_at: Set(now + Duration::seconds(self.refresh_lifetime)),
            revoked: Set(false),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        tracing::info!(
            client_id = %client.client_id,
            user_id = %code.user_id,
            "Authorization code exchanged for tokens"
        );
        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_lifetime,
            refresh_token: Some(refresh_token),
            scope: code.scope,
        })
    }

    /// `refresh_token` grant. Only the access token rotates.
    #[tracing::instrument(skip(self, req), fields(client_id = %req.client_id))]
    pub async fn refresh(&self, req: RefreshRequest) -> Result<TokenResponse, OAuthError> {
        if req.refresh_token.is_empty() {
            return Err(OAuthError::InvalidRequest(
                "refresh_token is required".into(),
            ));
        }
        let client = self
            .authenticate_client(&req.client_id, req.client_secret.as_deref())
            .await?;

        let txn = self.db.begin().await?;

        // The first statement must write. On SQLite a transaction that reads
        // first cannot upgrade to a writer while another refresh holds the
        // lock and fails with SQLITE_BUSY instead of waiting.
        let locked = oauth2_refresh_token::Entity::update_many()
            .col_expr(oauth2_refresh_token::Column::Revoked, Expr::value(false))
            .filter(oauth2_refresh_token::Column::Token.eq(req.refresh_token.as_str()))
            .filter(oauth2_refresh_token::Column::Revoked.eq(false))
            .exec(&txn)
            .await?;
        if locked.rows_affected == 0 {
            return Err(OAuthError::InvalidGrant("refresh token is invalid".into()));
        }

        let record = oauth2_refresh_token::Entity::find_by_id(req.refresh_token.as_str())
            .filter(oauth2_refresh_token::Column::Revoked.eq(false))
            .one(&txn)
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant("refresh token is invalid".into()))?;

        if record.is_expired() {
            return Err(OAuthError::InvalidGrant("refresh token expired".into()));
        }
        if record.client_id != client.client_id {
            tracing::warn!(
                client_id = %client.client_id,
                owner = %record.client_id,
                "Rejected refresh token presented by another client"
            );
            return Err(OAuthError::InvalidGrant(
                "refresh token was not issued to this client".into(),
            ));
        }

        let previous = oauth2_access_token::Entity::find_by_id(record.access_token.as_str())
            .one(&txn)
            .await?
            .ok_or_else(|| {
                OAuthError::InvalidGrant("refresh token has no associated access token".into())
            })?;

        oauth2_access_token::Entity::update_many()
            .col_expr(oauth2_access_token::Column::Revoked, Expr::value(true))
            .filter(oauth2_access_token::Column::Token.eq(previous.token.as_str()))
            .exec(&txn)
            .await?;

        let now = OffsetDateTime::now_utc();
        let access_token = self
            .insert_access_token(&txn, &client.client_id, &record.user_id, &previous.scope, now)
            .await?;

        let repointed = oauth2_refresh_token::Entity::update_many()
            .col_expr(
                oauth2_refresh_token::Column::AccessToken,
                Expr::value(access_token.clone()),
            )
            .filter(oauth2_refresh_token::Column::Token.eq(record.token.as_str()))
            .filter(oauth2_refresh_token::Column::AccessToken.eq(previous.token.as_str()))
            .filter(oauth2_refresh_token::Column::Revoked.eq(false))
            .exec(&txn)
            .await?;
        if repointed.rows_affected == 0 {
            return Err(OAuthError::InvalidGrant(
                "refresh token was used concurrently".into(),
            ));
        }
        txn.commit().await?;

        tracing::info!(
            client_id = %client.client_id,
            user_id = %record.user_id,
            "Access token rotated via refresh token"
        );
        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_lifetime,
            refresh_token: Some(record.token),
            scope: previous.scope,
        })
    }

    /// Resolve a bearer token. Read-only.
    pub async fn validate_access_token(&self, token: &str) -> Result<AccessGrant, OAuthError> {
        let record = oauth2_access_token::Entity::find_by_id(token)
            .one(self.db.as_ref())
            .await?
            .filter(|t| t.is_valid())
            .ok_or_else(|| OAuthError::InvalidToken("access token is invalid or expired".into()))?;

        Ok(AccessGrant {
            scopes: record.scopes_list(),
            user_id: record.user_id,
            client_id: record.client_id,
        })
    }

    /// Revoke an access or refresh token owned by `client_id`.
    ///
    /// Revoking a refresh token also revokes its current access token.
    /// Unknown tokens and tokens of other clients are ignored.
    #[tracing::instrument(skip(self, token))]
    pub async fn revoke(&self, client_id: &str, token: &str) -> Result<(), OAuthError> {
        let txn = self.db.begin().await?;

        // Write before reading, see `refresh`.
        let revoked_refresh = oauth2_refresh_token::Entity::update_many()
            .col_expr(oauth2_refresh_token::Column::Revoked, Expr::value(true))
            .filter(oauth2_refresh_token::Column::Token.eq(token))
            .filter(oauth2_refresh_token::Column::ClientId.eq(client_id))
            .exec(&txn)
            .await?;

        let access_token = if revoked_refresh.rows_affected > 0 {
            tracing::info!(client_id = client_id, "Refresh token revoked");
            oauth2_refresh_token::Entity::find_by_id(token)
                .one(&txn)
                .await?
                .map(|record| record.access_token)
                .unwrap_or_else(|| token.to_string())
        } else {
            token.to_string()
        };

        let revoked = oauth2_access_token::Entity::update_many()
            .col_expr(oauth2_access_token::Column::Revoked, Expr::value(true))
            .filter(oauth2_access_token::Column::Token.eq(access_token.as_str()))
            .filter(oauth2_access_token::Column::ClientId.eq(client_id))
            .exec(&txn)
            .await?;
        if revoked.rows_affected > 0 {
            tracing::info!(client_id = client_id, "Access token revoked");
        }

        txn.commit().await?;
        Ok(())
    }
}
