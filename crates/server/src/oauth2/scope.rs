//! Scope Negotiator and scope vocabulary.
//!
//! Negotiation grants the intersection of what was requested and what the
//! client is allowed, in request order. Disallowed scopes are dropped, never
//! rejected.

use crate::entity::oauth2_scope;
use sea_orm::{DatabaseConnection, DbErr, EntityTrait, QueryOrder};
use std::sync::Arc;

/// Scope granted when a request names none.
pub const DEFAULT_SCOPE: &str = "read";

/// Negotiate granted scopes from space-delimited `requested` and `allowed` lists.
pub fn negotiate(requested: &str, allowed: &str) -> Vec<String> {
    let allowed: Vec<&str> = allowed.split_whitespace().collect();
    let mut requested: Vec<&str> = requested.split_whitespace().collect();
    if requested.is_empty() {
        requested.push(DEFAULT_SCOPE);
    }

    let mut granted: Vec<String> = Vec::with_capacity(requested.len());
    for scope in requested {
        if allowed.contains(&scope) && !granted.iter().any(|g| g == scope) {
            granted.push(scope.to_string());
        }
    }
    granted
}

/// Read access to the `oauth2_scope` vocabulary table.
#[derive(Clone)]
pub struct ScopeCatalog {
    db: Arc<DatabaseConnection>,
}

impl ScopeCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn list(&self) -> Result<Vec<oauth2_scope::Model>, DbErr> {
        oauth2_scope::Entity::find()
            .order_by_asc(oauth2_scope::Column::Name)
            .all(self.db.as_ref())
            .await
    }

    /// Descriptions for the given scope names, in the given order. Unknown
    /// names are skipped.
    pub async fn describe(&self, names: &[String]) -> Result<Vec<oauth2_scope::Model>, DbErr> {
        let all = self.list().await?;
        Ok(names
            .iter()
            .filter_map(|n| all.iter().find(|s| &s.name == n).cloned())
            .collect())
    }

    /// Returns the first name not present in the vocabulary, if any.
    pub async fn first_unknown(&self, names: &[String]) -> Result<Option<String>, DbErr> {
        let all = self.list().await?;
        Ok(names
            .iter()
            .find(|n| !all.iter().any(|s| &s.name == *n))
            .cloned())
    }
}
