//! Identity Store collaborator.
//!
//! The authorization server only reads identities. Account management lives
//! elsewhere; `DbIdentityStore` reads the `user` and organization tables.

use crate::entity::{organization, organization_member, user};
use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

/// A user as seen by the authorization server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: String,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

impl From<user::Model> for User {
    fn from(m: user::Model) -> Self {
        Self {
            id: m.id,
            username: m.username,
            email: m.email,
            role: m.role,
        }
    }
}

/// An organization the user belongs to, with the user's role in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrganizationMembership {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub role: String,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get_user(&self, id: &str) -> Result<Option<User>, DbErr>;

    async fn get_user_organizations_with_roles(
        &self,
        user_id: &str,
    ) -> Result<Vec<OrganizationMembership>, DbErr>;
}

pub struct DbIdentityStore {
    db: Arc<DatabaseConnection>,
}

impl DbIdentityStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IdentityStore for DbIdentityStore {
    async fn get_user(&self, id: &str) -> Result<Option<User>, DbErr> {
        Ok(user::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(User::from))
    }

    async fn get_user_organizations_with_roles(
        &self,
        user_id: &str,
    ) -> Result<Vec<OrganizationMembership>, DbErr> {
        let rows = organization_member::Entity::find()
            .filter(organization_member::Column::UserId.eq(user_id))
            .find_also_related(organization::Entity)
            .all(self.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(member, org)| {
                org.map(|org| OrganizationMembership {
                    id: org.id,
                    name: org.name,
                    slug: org.slug,
                    role: member.role,
                })
            })
            .collect())
    }
}
