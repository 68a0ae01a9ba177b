//! OAuth2 state management.
//!
//! Every component is built once from explicit handles and shared by clone.

use crate::config::AppConfig;
use crate::oauth2::codes::AuthorizationCodeEngine;
use crate::oauth2::identity::IdentityStore;
use crate::oauth2::registry::ClientRegistry;
use crate::oauth2::scope::ScopeCatalog;
use crate::oauth2::session::SessionProvider;
use crate::oauth2::tokens::TokenEngine;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// OAuth2 state containing all components needed for the authorization server.
#[derive(Clone)]
pub struct OAuth2State {
    pub registry: ClientRegistry,
    pub codes: AuthorizationCodeEngine,
    pub tokens: TokenEngine,
    pub scopes: ScopeCatalog,
    pub identity: Arc<dyn IdentityStore>,
    pub sessions: Arc<dyn SessionProvider>,
    /// Base URL for the OAuth2 server (used as issuer in metadata)
    pub issuer_url: String,
    /// Login page unauthenticated users are sent to
    pub login_url: String,
    /// Shared secret of the internal provisioning API, if enabled
    pub internal_token: Option<String>,
    /// User id recorded as `created_by` for internal-token requests
    pub internal_admin_id: String,
}

impl OAuth2State {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        identity: Arc<dyn IdentityStore>,
        sessions: Arc<dyn SessionProvider>,
    ) -> Self {
        let scopes = ScopeCatalog::new(db.clone());
        let registry = ClientRegistry::new(db.clone(), scopes.clone());
        let codes = AuthorizationCodeEngine::new(
            db.clone(),
            registry.clone(),
            config.oauth2.authorization_code_lifetime,
        );
        let tokens = TokenEngine::new(
            db,
            registry.clone(),
            codes.clone(),
            config.oauth2.access_token_lifetime,
            config.oauth2.refresh_token_lifetime,
        );

        Self {
            registry,
            codes,
            tokens,
            scopes,
            identity,
            sessions,
            issuer_url: config.issuer_url.trim_end_matches('/').to_string(),
            login_url: config.login_url.clone(),
            internal_token: config.internal_token.clone(),
            internal_admin_id: config.internal_admin_id.clone(),
        }
    }
}
