//! Session Provider collaborator.
//!
//! Browser legs of the authorize flow need the currently logged-in user.
//! `JwtSessionProvider` reads an HS256 token from the `miniauth_session`
//! cookie and resolves its subject through the identity store. Issuing the
//! cookie is the login service's job; `issue_session_token` exists for it and
//! for tests.

use crate::oauth2::identity::{IdentityStore, User};
use async_trait::async_trait;
use axum::http::{HeaderMap, header::COOKIE};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;

pub const SESSION_COOKIE: &str = "miniauth_session";

#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// The authenticated user behind the request, if any.
    async fn current_user(&self, headers: &HeaderMap) -> Result<Option<User>, DbErr>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

pub struct JwtSessionProvider {
    key: DecodingKey,
    identity: Arc<dyn IdentityStore>,
}

impl JwtSessionProvider {
    pub fn new(secret: &[u8], identity: Arc<dyn IdentityStore>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            identity,
        }
    }
}

/// Sign a session token for `user_id` valid for `ttl_secs`.
pub fn issue_session_token(
    secret: &[u8],
    user_id: &str,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = OffsetDateTime::now_utc();
    let claims = SessionClaims {
        sub: user_id.to_string(),
        iat: now.unix_timestamp() as usize,
        exp: (now + time::Duration::seconds(ttl_secs)).unix_timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

/// Extract a cookie value by name from every `Cookie` header.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

#[async_trait]
impl SessionProvider for JwtSessionProvider {
    async fn current_user(&self, headers: &HeaderMap) -> Result<Option<User>, DbErr> {
        let Some(token) = cookie_value(headers, SESSION_COOKIE) else {
            return Ok(None);
        };

        let claims = match decode::<SessionClaims>(token, &self.key, &Validation::default()) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring invalid session cookie");
                return Ok(None);
            }
        };

        self.identity.get_user(&claims.sub).await
    }
}
