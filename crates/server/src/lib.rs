//! A small OAuth 2.0 identity provider.
//!
//! Issues and validates authorization codes, access tokens and refresh tokens
//! for registered client applications, with PKCE, scope negotiation and
//! single-use code redemption.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;

pub mod api;
pub mod config;
pub mod entity;
pub mod error;
pub mod oauth2;

#[derive(Clone, Debug)]
pub struct AppResources {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
}
