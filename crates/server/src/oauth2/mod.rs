//! OAuth2 Authorization Server module.
//!
//! Issues and validates OAuth 2.0 credentials for registered client
//! applications.
//!
//! ## Supported Flows
//!
//! - Authorization Code, with optional PKCE (`S256` or `plain`)
//! - Refresh Token (rotates the access token only)
//!
//! ## Endpoints
//!
//! - `GET /oauth/authorize` - Authorization endpoint (consent payload or redirect)
//! - `POST /oauth/authorize` - Consent decision
//! - `POST /oauth/token` - Token endpoint
//! - `POST /oauth/revoke` - Token revocation
//! - `GET /oauth/userinfo` - Scope-shaped user claims
//! - `GET /.well-known/oauth-authorization-server` - Server metadata
//! - `/admin/oauth/*` - Client administration

pub mod admin;
pub mod codes;
pub mod credentials;
pub mod endpoints;
pub mod identity;
pub mod pkce;
pub mod registry;
pub mod scope;
pub mod session;
pub mod state;
pub mod tokens;

pub use codes::{AuthorizationCodeEngine, AuthorizeParams};
pub use endpoints::router;
pub use identity::{DbIdentityStore, IdentityStore, OrganizationMembership, User};
pub use registry::{ClientRegistry, ClientView, NewClient};
pub use session::{JwtSessionProvider, SessionProvider};
pub use state::OAuth2State;
pub use tokens::{AccessGrant, TokenEngine, TokenResponse};

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";
