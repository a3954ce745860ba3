//! Application configuration
//!
//! The backend coordinates are the only required configuration. Load
//! them from the environment in deployed builds; tests construct the
//! config directly against a mock server.

use crate::error::StoreError;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Supabase project.
    pub url: Url,
    /// Anonymous API key; row-level security does the real gating.
    pub anon_key: String,
}

impl Config {
    /// Create a configuration, validating the URL and key up front.
    pub fn new(url_str: &str, anon_key: impl Into<String>) -> Result<Self, StoreError> {
        let url = Url::parse(url_str)
            .map_err(|e| StoreError::Config(format!("invalid backend URL: {}", e)))?;
        let anon_key = anon_key.into();
        if anon_key.is_empty() {
            return Err(StoreError::Config("anon_key cannot be empty".to_string()));
        }
        Ok(Self { url, anon_key })
    }

    /// Read `SUPABASE_URL` and `SUPABASE_ANON_KEY` from the environment.
    pub fn from_env() -> Result<Self, StoreError> {
        let url_str = std::env::var("SUPABASE_URL")
            .map_err(|_| StoreError::Config("SUPABASE_URL environment variable not found".to_string()))?;
        let anon_key = std::env::var("SUPABASE_ANON_KEY").map_err(|_| {
            StoreError::Config("SUPABASE_ANON_KEY environment variable not found".to_string())
        })?;
        Self::new(&url_str, anon_key)
    }

    /// Base URL without a trailing slash, as the service clients expect.
    pub fn base_url(&self) -> String {
        self.url.as_str().trim_end_matches('/').to_string()
    }
}
