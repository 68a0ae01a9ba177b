use migration::{Migrator, MigratorTrait};
use miniauth::AppResources;
use miniauth::api::start_webserver;
use miniauth::config::load_config;
use miniauth::oauth2::{DbIdentityStore, IdentityStore, JwtSessionProvider, OAuth2State};
use sea_orm::Database;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_standard_tracing() {
    let default_directives = "miniauth=info,sea_orm=info,tower_http=info";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    initialize_standard_tracing();

    // Load config
    let config = Arc::new(load_config()?);

    // Set up SeaORM database connection and bring the schema up to date
    let db = Arc::new(Database::connect(&config.database_url).await?);
    Migrator::up(db.as_ref(), None).await?;

    let identity: Arc<dyn IdentityStore> = Arc::new(DbIdentityStore::new(db.clone()));
    let sessions = Arc::new(JwtSessionProvider::new(
        config.session_secret.as_bytes(),
        identity.clone(),
    ));
    let state = OAuth2State::new(db.clone(), &config, identity, sessions);

    tracing::info!(
        issuer = %config.issuer_url,
        internal_api = config.internal_token.is_some(),
        code_lifetime = config.oauth2.authorization_code_lifetime,
        access_token_lifetime = config.oauth2.access_token_lifetime,
        refresh_token_lifetime = config.oauth2.refresh_token_lifetime,
        "OAuth2 configuration"
    );

    let resources = AppResources { db, config };
    start_webserver(state, resources).await?;
    Ok(())
}
