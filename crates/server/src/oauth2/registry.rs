//! Database-backed client registry.
//!
//! Owns the lifecycle of registered client applications. Deleting a client
//! cascades through its authorization codes, access tokens and refresh tokens
//! inside a single transaction.

use crate::entity::{
    oauth2_access_token, oauth2_authorization_code, oauth2_client, oauth2_refresh_token,
};
use crate::error::RegistryError;
use crate::oauth2::credentials;
use crate::oauth2::scope::{DEFAULT_SCOPE, ScopeCatalog};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use utoipa::ToSchema;

/// Fields an administrator supplies when registering or updating a client.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct NewClient {
    pub name: String,
    pub redirect_uris: Vec<String>,
    /// Defaults to `["read"]` when empty
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub trusted: bool,
}

/// A registered client as returned by the admin API, secret included.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ClientView {
    pub client_id: String,
    pub client_secret: String,
    pub name: String,
    pub description: String,
    pub website: String,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub trusted: bool,
    pub active: bool,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<oauth2_client::Model> for ClientView {
    fn from(m: oauth2_client::Model) -> Self {
        Self {
            redirect_uris: m.redirect_uris_list(),
            scopes: m.scopes_list(),
            created_at: m.created_at.format(&Rfc3339).unwrap_or_default(),
            updated_at: m.updated_at.format(&Rfc3339).unwrap_or_default(),
            client_id: m.client_id,
            client_secret: m.client_secret,
            name: m.name,
            description: m.description,
            website: m.website,
            trusted: m.trusted,
            active: m.active,
            created_by: m.created_by,
        }
    }
}

#[derive(Clone)]
pub struct ClientRegistry {
    db: Arc<DatabaseConnection>,
    scopes: ScopeCatalog,
}

impl ClientRegistry {
    pub fn new(db: Arc<DatabaseConnection>, scopes: ScopeCatalog) -> Self {
        Self { db, scopes }
    }

    /// Validate a registration request and return the normalized
    /// `(redirect_uris_json, scopes)` pair.
    async fn normalize(&self, req: &NewClient) -> Result<(String, String), RegistryError> {
        if req.name.trim().is_empty() {
            return Err(RegistryError::Invalid("name is required".into()));
        }
        if req.redirect_uris.is_empty() || req.redirect_uris.iter().any(|u| u.trim().is_empty())
        {
            return Err(RegistryError::InvalidRedirectUris);
        }

        let mut scopes: Vec<String> = Vec::new();
        for s in req.scopes.iter().flat_map(|s| s.split_whitespace()) {
            if !scopes.iter().any(|existing| existing == s) {
                scopes.push(s.to_string());
            }
        }
        if scopes.is_empty() {
            scopes.push(DEFAULT_SCOPE.to_string());
        }
        if let Some(unknown) = self.scopes.first_unknown(&scopes).await? {
            return Err(RegistryError::UnknownScope(unknown));
        }

        let redirect_uris = serde_json::to_string(&req.redirect_uris)
            .map_err(|e| RegistryError::Invalid(e.to_string()))?;
        Ok((redirect_uris, scopes.join(" ")))
    }

    fn active_model(
        req: NewClient,
        redirect_uris: String,
        scopes: String,
        created_by: &str,
        client_id: String,
        client_secret: String,
    ) -> oauth2_client::ActiveModel {
        let now = OffsetDateTime::now_utc();
        oauth2_client::ActiveModel {
            client_id: Set(client_id),
            client_secret: Set(client_secret),
            name: Set(req.name),
            description: Set(req.description),
            website: Set(req.website),
            redirect_uris: Set(redirect_uris),
            scopes: Set(scopes),
            trusted: Set(req.trusted),
            active: Set(true),
            created_by: Set(created_by.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
    }

    /// Register a client with generated credentials.
    #[tracing::instrument(skip(self, req), fields(name = %req.name))]
    pub async fn register(
        &self,
        req: NewClient,
        created_by: &str,
    ) -> Result<oauth2_client::Model, RegistryError> {
        let (redirect_uris, scopes) = self.normalize(&req).await?;
        let client_id = credentials::generate_client_id();
        let client_secret = credentials::generate_secret()?;

        let model = Self::active_model(
            req,
            redirect_uris,
            scopes,
            created_by,
            client_id,
            client_secret,
        )
        .insert(self.db.as_ref())
        .await?;

        tracing::info!(
            client_id = %model.client_id,
            created_by = created_by,
            "Registered OAuth2 client"
        );
        Ok(model)
    }

    /// Register a client whose credentials are supplied by the caller.
    ///
    /// Fails with `ClientIdConflict` when the id is taken, whether or not the
    /// existing client is active.
    #[tracing::instrument(skip(self, req, client_secret))]
    pub async fn register_with_fixed_credentials(
        &self,
        req: NewClient,
        created_by: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<oauth2_client::Model, RegistryError> {
        if client_id.trim().is_empty() {
            return Err(RegistryError::Invalid("client_id is required".into()));
        }
        if client_secret.is_empty() {
            return Err(RegistryError::Invalid("client_secret is required".into()));
        }
        let (redirect_uris, scopes) = self.normalize(&req).await?;

        // The primary key decides conflicts, so two racing registrations of the
        // same id cannot both succeed.
        let model = Self::active_model(
            req,
            redirect_uris,
            scopes,
            created_by,
            client_id.to_string(),
            client_secret.to_string(),
        )
        .insert(self.db.as_ref())
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                RegistryError::ClientIdConflict(client_id.to_string())
            }
            _ => RegistryError::Storage(e),
        })?;

        tracing::info!(
            client_id = %model.client_id,
            created_by = created_by,
            "Registered OAuth2 client with fixed credentials"
        );
        Ok(model)
    }

    /// Look up a client that may take part in authorization. Inactive clients
    /// are reported as `NotFound`.
    pub async fn lookup_active(
        &self,
        client_id: &str,
    ) -> Result<oauth2_client::Model, RegistryError> {
        oauth2_client::Entity::find_by_id(client_id)
            .filter(oauth2_client::Column::Active.eq(true))
            .one(self.db.as_ref())
            .await?
            .ok_or(RegistryError::NotFound)
    }

    pub async fn get(&self, client_id: &str) -> Result<oauth2_client::Model, RegistryError> {
        oauth2_client::Entity::find_by_id(client_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(RegistryError::NotFound)
    }

    pub async fn list(&self) -> Result<Vec<oauth2_client::Model>, RegistryError> {
        Ok(oauth2_client::Entity::find()
            .order_by_desc(oauth2_client::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?)
    }

    /// Replace the mutable fields of a client. Credentials, `active` and
    /// `created_by` are left untouched.
    #[tracing::instrument(skip(self, req))]
    pub async fn update(
        &self,
        client_id: &str,
        req: NewClient,
    ) -> Result<oauth2_client::Model, RegistryError> {
        let existing = self.get(client_id).await?;
        let (redirect_uris, scopes) = self.normalize(&req).await?;

        let mut active: oauth2_client::ActiveModel = existing.into();
        active.name = Set(req.name);
        active.description = Set(req.description);
        active.website = Set(req.website);
        active.redirect_uris = Set(redirect_uris);
        active.scopes = Set(scopes);
        active.trusted = Set(req.trusted);
        active.updated_at = Set(OffsetDateTime::now_utc());
        Ok(active.update(self.db.as_ref()).await?)
    }

    /// Delete a client and every credential issued to it.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, client_id: &str) -> Result<(), RegistryError> {
        let txn = self.db.begin().await?;

        // Touching the row first takes the write lock before any read.
        let locked = oauth2_client::Entity::update_many()
            .col_expr(
                oauth2_client::Column::UpdatedAt,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(oauth2_client::Column::ClientId.eq(client_id))
            .exec(&txn)
            .await?;
        if locked.rows_affected == 0 {
            return Err(RegistryError::NotFound);
        }

        let codes = oauth2_authorization_code::Entity::delete_many()
            .filter(oauth2_authorization_code::Column::ClientId.eq(client_id))
            .exec(&txn)
            .await?;
        let access_tokens = oauth2_access_token::Entity::delete_many()
            .filter(oauth2_access_token::Column::ClientId.eq(client_id))
            .exec(&txn)
            .await?;
        let refresh_tokens = oauth2_refresh_token::Entity::delete_many()
            .filter(oauth2_refresh_token::Column::ClientId.eq(client_id))
            .exec(&txn)
            .await?;
        oauth2_client::Entity::delete_by_id(client_id)
            .exec(&txn)
            .await?;

        txn.commit().await?;

        tracing::info!(
            client_id = client_id,
            codes = codes.rows_affected,
            access_tokens = access_tokens.rows_affected,
            refresh_tokens = refresh_tokens.rows_affected,
            "Deleted OAuth2 client and its credentials"
        );
        Ok(())
    }

    pub async fn toggle_active(
        &self,
        client_id: &str,
    ) -> Result<oauth2_client::Model, RegistryError> {
        let existing = self.get(client_id).await?;
        let next = !existing.active;
        let mut active: oauth2_client::ActiveModel = existing.into();
        active.active = Set(next);
        self.save_toggled(active).await
    }

    pub async fn toggle_trusted(
        &self,
        client_id: &str,
    ) -> Result<oauth2_client::Model, RegistryError> {
        let existing = self.get(client_id).await?;
        let next = !existing.trusted;
        let mut active: oauth2_client::ActiveModel = existing.into();
        active.trusted = Set(next);
        self.save_toggled(active).await
    }

    async fn save_toggled(
        &self,
        mut active: oauth2_client::ActiveModel,
    ) -> Result<oauth2_client::Model, RegistryError> {
        active.updated_at = Set(OffsetDateTime::now_utc());
        let updated = active.update(self.db.as_ref()).await?;
        tracing::info!(
            client_id = %updated.client_id,
            active = updated.active,
            trusted = updated.trusted,
            "Toggled OAuth2 client flag"
        );
        Ok(updated)
    }
}
