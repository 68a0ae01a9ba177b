//! SeaORM entities for every persisted table.

pub mod oauth2_access_token;
pub mod oauth2_authorization_code;
pub mod oauth2_client;
pub mod oauth2_refresh_token;
pub mod oauth2_scope;
pub mod organization;
pub mod organization_member;
pub mod user;
