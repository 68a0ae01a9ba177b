use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Lifetimes (in seconds) of the credentials the authorization server issues.
#[derive(Clone, Debug, Deserialize)]
pub struct OAuth2Config {
    #[serde(default = "default_authorization_code_lifetime")]
    pub authorization_code_lifetime: i64,
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime: i64,
    #[serde(default = "default_refresh_token_lifetime")]
    pub refresh_token_lifetime: i64,
}

impl Default for OAuth2Config {
    fn default() -> Self {
        Self {
            authorization_code_lifetime: default_authorization_code_lifetime(),
            access_token_lifetime: default_access_token_lifetime(),
            refresh_token_lifetime: default_refresh_token_lifetime(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Public base URL of this server, used in the metadata document
    pub issuer_url: String,
    /// Where unauthenticated users are sent from the authorize endpoint
    #[serde(default = "default_login_url")]
    pub login_url: String,
    /// HS256 key for session tokens
    pub session_secret: String,
    /// Shared secret for the internal provisioning API. Disabled when unset.
    #[serde(default)]
    pub internal_token: Option<String>,
    /// User id recorded as `created_by` for internal-token requests
    #[serde(default = "default_internal_admin_id")]
    pub internal_admin_id: String,
    #[serde(default)]
    pub oauth2: OAuth2Config,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_login_url() -> String {
    "/login".to_string()
}

fn default_internal_admin_id() -> String {
    "1".to_string()
}

fn default_authorization_code_lifetime() -> i64 {
    600
}

fn default_access_token_lifetime() -> i64 {
    3600
}

fn default_refresh_token_lifetime() -> i64 {
    30 * 24 * 3600
}

impl AppConfig {
    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_secret.len() < 32 {
            return Err(ConfigError::Validation(
                "session_secret must be at least 32 bytes".into(),
            ));
        }
        if let Some(token) = &self.internal_token
            && token.len() < 32
        {
            return Err(ConfigError::Validation(
                "internal_token must be at least 32 bytes when set".into(),
            ));
        }
        if self.issuer_url.is_empty() {
            return Err(ConfigError::Validation("issuer_url must not be empty".into()));
        }
        let lifetimes = [
            (
                "oauth2.authorization_code_lifetime",
                self.oauth2.authorization_code_lifetime,
            ),
            (
                "oauth2.access_token_lifetime",
                self.oauth2.access_token_lifetime,
            ),
            (
                "oauth2.refresh_token_lifetime",
                self.oauth2.refresh_token_lifetime,
            ),
        ];
        for (name, value) in lifetimes {
            if value <= 0 {
                return Err(ConfigError::Validation(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Any environment variable matching the key path separated by double
/// underscores (e.g. `OAUTH2__ACCESS_TOKEN_LIFETIME`) overrides the file value.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .add_source(Environment::default().separator("__").try_parsing(true))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}
