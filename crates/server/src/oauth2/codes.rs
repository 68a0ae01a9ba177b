//! Authorization Code Engine.
//!
//! A code is either `Issued`, `Consumed` or `Expired`. Expiry is derived from
//! `expires_at` at read time and is never written. Consumption is a single
//! conditional update on the `used` flag, so of two concurrent redemptions of
//! the same code exactly one observes `rows_affected == 1`.

use crate::entity::{oauth2_authorization_code, oauth2_client};
use crate::error::{OAuthError, RegistryError};
use crate::oauth2::credentials;
use crate::oauth2::pkce::PkceMethod;
use crate::oauth2::registry::ClientRegistry;
use crate::oauth2::scope;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter,
};
use serde::Deserialize;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use utoipa::{IntoParams, ToSchema};

/// Parameters of an authorization request, shared by the query string of
/// `GET /oauth/authorize` and the body of the consent decision.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(default)]
pub struct AuthorizeParams {
    /// Must be `code`
    pub response_type: String,
    pub client_id: String,
    /// Must exactly match one of the client's registered redirect URIs
    pub redirect_uri: String,
    /// Space-separated list of requested scopes
    pub scope: String,
    /// Opaque value echoed back to the client
    pub state: String,
    /// PKCE code challenge
    pub code_challenge: Option<String>,
    /// `S256` or `plain`; absent means `plain`
    pub code_challenge_method: Option<String>,
}

impl AuthorizeParams {
    /// The PKCE challenge, treating an empty value as absent.
    pub fn challenge(&self) -> Option<&str> {
        self.code_challenge.as_deref().filter(|c| !c.is_empty())
    }

    /// The parsed challenge method, or `None` when absent.
    pub fn challenge_method(&self) -> Result<Option<PkceMethod>, OAuthError> {
        match self.code_challenge_method.as_deref() {
            None | Some("") => Ok(None),
            Some(m) => m.parse().map(Some).map_err(OAuthError::InvalidRequest),
        }
    }
}

#[derive(Clone)]
pub struct AuthorizationCodeEngine {
    db: Arc<DatabaseConnection>,
    registry: ClientRegistry,
    lifetime: Duration,
}

impl AuthorizationCodeEngine {
    pub fn new(db: Arc<DatabaseConnection>, registry: ClientRegistry, lifetime_secs: i64) -> Self {
        Self {
            db,
            registry,
            lifetime: Duration::seconds(lifetime_secs),
        }
    }

    /// Check the shape of an authorization request and resolve its client.
    ///
    /// Every failure is `invalid_request`: an unknown client or unregistered
    /// redirect URI must never be redirected to.
    pub async fn validate_authorization_request(
        &self,
        params: &AuthorizeParams,
    ) -> Result<oauth2_client::Model, OAuthError> {
        if params.response_type != "code" {
            return Err(OAuthError::InvalidRequest(
                "response_type must be 'code'".into(),
            ));
        }
        if params.client_id.is_empty() {
            return Err(OAuthError::InvalidRequest("client_id is required".into()));
        }
        if params.redirect_uri.is_empty() {
            return Err(OAuthError::InvalidRequest("redirect_uri is required".into()));
        }

        let client = match self.registry.lookup_active(&params.client_id).await {
            Ok(c) => c,
            Err(RegistryError::NotFound) => {
                return Err(OAuthError::InvalidRequest(
                    "unknown or inactive client".into(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        if !client.is_redirect_uri_allowed(&params.redirect_uri) {
            return Err(OAuthError::InvalidRequest(
                "redirect_uri is not registered for this client".into(),
            ));
        }

        if params.challenge().is_some() {
            params.challenge_method()?;
        }

        Ok(client)
    }

    /// Store a fresh code for `user_id` and return its value.
    #[tracing::instrument(skip(self, client, params), fields(client_id = %client.client_id))]
    pub async fn issue(
        &self,
        user_id: &str,
        client: &oauth2_client::Model,
        params: &AuthorizeParams,
    ) -> Result<String, OAuthError> {
        let granted = scope::negotiate(&params.scope, &client.scopes);
        let code = credentials::generate_secret()?;
        let now = OffsetDateTime::now_utc();

        let (challenge, method) = match params.challenge() {
            Some(c) => (
                Some(c.to_string()),
                params.challenge_method()?.map(|m| m.to_string()),
            ),
            None => (None, None),
        };

        oauth2_authorization_code::ActiveModel {
            code: Set(code.clone()),
            client_id: Set(client.client_id.clone()),
            user_id: Set(user_id.to_string()),
            redirect_uri: Set(params.redirect_uri.clone()),
            scope: Set(granted.join(" ")),
            expires_at: Set(now + self.lifetime),
            used: Set(false),
            code_challenge: Set(challenge),
            code_challenge_method: Set(method),
            created_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await?;

        tracing::info!(
            client_id = %client.client_id,
            user_id = user_id,
            scope = %granted.join(" "),
            "Authorization code issued"
        );
        Ok(code)
    }

    /// Consume a code inside the caller's transaction.
    ///
    /// The `used` flag is flipped before any other check. If a later check
    /// fails the caller must drop the transaction so the flip is rolled back.
    pub async fn redeem<C: ConnectionTrait>(
        &self,
        txn: &C,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<oauth2_authorization_code::Model, OAuthError> {
        let flipped = oauth2_authorization_code::Entity::update_many()
            .col_expr(oauth2_authorization_code::Column::Used, Expr::value(true))
            .filter(oauth2_authorization_code::Column::Code.eq(code))
            .filter(oauth2_authorization_code::Column::Used.eq(false))
            .exec(txn)
            .await?;

        if flipped.rows_affected == 0 {
            tracing::warn!(
                client_id = client_id,
                "Rejected redemption of unknown or already used authorization code"
            );
            return Err(OAuthError::InvalidGrant(
                "authorization code is invalid or already used".into(),
            ));
        }

        let record = oauth2_authorization_code::Entity::find_by_id(code)
            .one(txn)
            .await?
            .ok_or_else(|| OAuthError::InvalidGrant("authorization code is invalid".into()))?;

        if record.is_expired() {
            tracing::warn!(client_id = client_id, "Rejected expired authorization code");
            return Err(OAuthError::InvalidGrant("authorization code expired".into()));
        }
        if record.client_id != client_id {
            tracing::warn!(
                client_id = client_id,
                owner = %record.client_id,
                "Rejected authorization code presented by another client"
            );
            return Err(OAuthError::InvalidGrant(
                "authorization code was not issued to this client".into(),
            ));
        }
        if record.redirect_uri != redirect_uri {
            return Err(OAuthError::InvalidGrant("redirect_uri mismatch".into()));
        }

        Ok(record)
    }
}
