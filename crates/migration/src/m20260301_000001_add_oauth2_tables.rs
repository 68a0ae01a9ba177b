//! Migration adding the OAuth2 authorization server tables.
//!
//! Creates tables for:
//! - oauth2_scope: The scope vocabulary shared by all clients (seeded)
//! - oauth2_client: Registered client applications
//! - oauth2_authorization_code: Single-use authorization codes
//! - oauth2_access_token: Bearer access tokens
//! - oauth2_refresh_token: Refresh tokens pointing at their current access token

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Scope vocabulary seeded on first migration: (name, description, is_default).
const SEED_SCOPES: [(&str, &str, bool); 3] = [
    (
        "read",
        "Read your account id, role and organization memberships",
        true,
    ),
    ("write", "Modify resources on your behalf", false),
    ("profile", "Access your username and email address", false),
];

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 1. Scope vocabulary
        manager
            .create_table(
                Table::create()
                    .table(OAuth2Scope::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2Scope::Name)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Scope::Description)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(OAuth2Scope::IsDefault)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        let mut seed = Query::insert();
        seed.into_table(OAuth2Scope::Table).columns([
            OAuth2Scope::Name,
            OAuth2Scope::Description,
            OAuth2Scope::IsDefault,
        ]);
        for (name, description, is_default) in SEED_SCOPES {
            seed.values([name.into(), description.into(), is_default.into()])
                .map_err(|e| DbErr::Migration(e.to_string()))?;
        }
        manager.exec_stmt(seed.to_owned()).await?;

        // 2. Clients
        manager
            .create_table(
                Table::create()
                    .table(OAuth2Client::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2Client::ClientId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OAuth2Client::ClientSecret).string().not_null())
                    .col(ColumnDef::new(OAuth2Client::Name).string().not_null())
                    .col(
                        ColumnDef::new(OAuth2Client::Description)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::Website)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(OAuth2Client::RedirectUris).text().not_null())
                    .col(
                        ColumnDef::new(OAuth2Client::Scopes)
                            .text()
                            .not_null()
                            .default("read"),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::Trusted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(OAuth2Client::CreatedBy).string().not_null())
                    .col(
                        ColumnDef::new(OAuth2Client::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 3. Authorization codes (short-lived, single use)
        manager
            .create_table(
                Table::create()
                    .table(OAuth2AuthorizationCode::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2AuthorizationCode::Code)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationCode::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationCode::UserId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationCode::RedirectUri)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationCode::Scope)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationCode::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationCode::Used)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationCode::CodeChallenge)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationCode::CodeChallengeMethod)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationCode::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 4. Access tokens
        manager
            .create_table(
                Table::create()
                    .table(OAuth2AccessToken::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2AccessToken::Token)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OAuth2AccessToken::ClientId).string().not_null())
                    .col(ColumnDef::new(OAuth2AccessToken::UserId).string().not_null())
                    .col(ColumnDef::new(OAuth2AccessToken::Scope).text().not_null())
                    .col(
                        ColumnDef::new(OAuth2AccessToken::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2AccessToken::Revoked)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(OAuth2AccessToken::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 5. Refresh tokens
        manager
            .create_table(
                Table::create()
                    .table(OAuth2RefreshToken::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::Token)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OAuth2RefreshToken::UserId).string().not_null())
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::AccessToken)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::Revoked)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Indexes backing the per-client cascade delete and token lookups
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_authorization_code_client_id")
                    .table(OAuth2AuthorizationCode::Table)
                    .col(OAuth2AuthorizationCode::ClientId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_access_token_client_id")
                    .table(OAuth2AccessToken::Table)
                    .col(OAuth2AccessToken::ClientId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_refresh_token_client_id")
                    .table(OAuth2RefreshToken::Table)
                    .col(OAuth2RefreshToken::ClientId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_refresh_token_access_token")
                    .table(OAuth2RefreshToken::Table)
                    .col(OAuth2RefreshToken::AccessToken)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_oauth2_refresh_token_access_token",
            "idx_oauth2_refresh_token_client_id",
            "idx_oauth2_access_token_client_id",
            "idx_oauth2_authorization_code_client_id",
        ] {
            manager
                .drop_index(Index::drop().name(name).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(OAuth2RefreshToken::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OAuth2AccessToken::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OAuth2AuthorizationCode::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OAuth2Client::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OAuth2Scope::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum OAuth2Scope {
    #[sea_orm(iden = "oauth2_scope")]
    Table,
    Name,
    Description,
    IsDefault,
}

#[derive(DeriveIden)]
enum OAuth2Client {
    #[sea_orm(iden = "oauth2_client")]
    Table,
    ClientId,
    ClientSecret,
    Name,
    Description,
    Website,
    RedirectUris,
    Scopes,
    Trusted,
    Active,
    CreatedBy,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum OAuth2AuthorizationCode {
    #[sea_orm(iden = "oauth2_authorization_code")]
    Table,
    Code,
    ClientId,
    UserId,
    RedirectUri,
    Scope,
    ExpiresAt,
    Used,
    CodeChallenge,
    CodeChallengeMethod,
    CreatedAt,
}

#[derive(DeriveIden)]
enum OAuth2AccessToken {
    #[sea_orm(iden = "oauth2_access_token")]
    Table,
    Token,
    ClientId,
    UserId,
    Scope,
    ExpiresAt,
    Revoked,
    CreatedAt,
}

#[derive(DeriveIden)]
enum OAuth2RefreshToken {
    #[sea_orm(iden = "oauth2_refresh_token")]
    Table,
    Token,
    ClientId,
    UserId,
    AccessToken,
    ExpiresAt,
    Revoked,
    CreatedAt,
}
