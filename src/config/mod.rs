//! Typed configuration from environment variables.
//!
//! Loads once at startup. `DATABASE_URL` is only required by the Postgres
//! collaborators, so it is checked where they are constructed.

use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: Option<SecretString>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: optional_var("DATABASE_URL").map(SecretString::from),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// The database URL, or a config error naming the component that needs it.
    pub fn require_database_url(&self, needed_by: &str) -> Result<&SecretString> {
        self.database_url
            .as_ref()
            .ok_or_else(|| Error::Config(format!("DATABASE_URL must be set to use {needed_by}")))
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
