//! Server configuration

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use parley_gateway::connection::GatewayConfig;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// SQLite database file
    pub db_path: PathBuf,
    /// HS256 signing secret for session tokens
    pub jwt_secret: String,
    /// Comma-separated list of allowed CORS origins (None = permissive)
    pub allowed_origins: Option<String>,
    /// Lifetime of issued tokens
    pub token_ttl_hours: i64,
    /// Seconds a new gateway connection has to send Identify
    pub handshake_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = var("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder");
        }

        Ok(ServerConfig {
            host: var("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: var("PARLEY_PORT")
                .unwrap_or_else(|| "5000".to_string())
                .parse()
                .context("Invalid PARLEY_PORT")?,
            db_path: var("PARLEY_DB_PATH")
                .unwrap_or_else(|| "parley.db".to_string())
                .into(),
            jwt_secret,
            allowed_origins: var("PARLEY_ALLOWED_ORIGINS").filter(|v| !v.trim().is_empty()),
            token_ttl_hours: var("PARLEY_TOKEN_TTL_HOURS")
                .unwrap_or_else(|| "168".to_string()) // 7 days
                .parse()
                .context("Invalid PARLEY_TOKEN_TTL_HOURS")?,
            handshake_timeout_secs: var("PARLEY_HANDSHAKE_TIMEOUT_SECS")
                .unwrap_or_else(|| "10".to_string())
                .parse()
                .context("Invalid PARLEY_HANDSHAKE_TIMEOUT_SECS")?,
        })
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            ..GatewayConfig::new(self.jwt_secret.clone())
        }
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.token_ttl_hours)
    }
}
