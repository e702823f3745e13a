use std::{env, fmt::Display, str::FromStr};

use rand::RngCore;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("JWT_SECRET must be set when APP_ENV=production")]
    MissingSecret,

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub token_secret: Vec<u8>,
    /// Adds the `Secure` attribute to the auth cookie.
    pub secure_cookies: bool,
    /// Enables the destructive schema reset.
    pub allow_init_db: bool,
}

impl Config {
    /// Reads the environment (and `.env`, if present).
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let production = var("APP_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let token_secret = match var("JWT_SECRET") {
            Some(secret) if !secret.is_empty() => secret.into_bytes(),
            _ if production => return Err(ConfigError::MissingSecret),
            _ => {
                warn!("JWT_SECRET not set, using a random secret; sessions end on restart");
                random_secret()
            }
        };

        Ok(Self {
            database_url: try_load("DATABASE_URL", "db/pazik.db")?,
            bind_addr: try_load("BIND_ADDR", "0.0.0.0:3000")?,
            token_secret,
            secure_cookies: production,
            allow_init_db: try_load("ALLOW_INIT_DB", "false")?,
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("bind_addr", &self.bind_addr)
            .field("token_secret", &"<redacted>")
            .field("secure_cookies", &self.secure_cookies)
            .field("allow_init_db", &self.allow_init_db)
            .finish()
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");
            ConfigError::Invalid {
                key,
                message: e.to_string(),
            }
        })
}

fn random_secret() -> Vec<u8> {
    let mut secret = vec![0u8; 32];
    rand::rng().fill_bytes(&mut secret);
    secret
}
