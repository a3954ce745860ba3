//! Edge Functions client for the Habit Flow backend
//!
//! The application calls exactly one serverless function
//! (`send-email-notification`), but the invocation surface is generic:
//! POST a JSON body, forward the caller's authorization, deserialize the
//! JSON response.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Structured error body a function may return alongside a non-2xx
/// status.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FunctionErrorDetails {
    pub error: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Error)]
pub enum FunctionsError {
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Function error: {message} (Status: {status})")]
    FunctionError {
        status: u16,
        message: String,
        details: Option<FunctionErrorDetails>,
    },
}

pub type Result<T> = std::result::Result<T, FunctionsError>;

/// Per-invocation options.
#[derive(Default)]
pub struct FunctionOptions {
    /// Extra request headers; an `Authorization` entry overrides the
    /// default anon-key bearer so the function sees the signed-in user.
    pub headers: Option<HashMap<String, String>>,
}

pub struct FunctionsClient {
    base_url: String,
    api_key: String,
    http_client: Client,
}

impl FunctionsClient {
    pub fn new(supabase_url: &str, supabase_key: &str, http_client: Client) -> Self {
        Self {
            base_url: supabase_url.trim_end_matches('/').to_string(),
            api_key: supabase_key.to_string(),
            http_client,
        }
    }

    /// Invoke a function and deserialize its JSON response.
    pub async fn invoke<T, R>(
        &self,
        function_name: &str,
        body: Option<T>,
        options: Option<FunctionOptions>,
    ) -> Result<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| FunctionsError::UrlError(url::ParseError::EmptyHost))?
            .push("functions")
            .push("v1")
            .push(function_name);

        debug!(function = function_name, "invoking edge function");

        let opts = options.unwrap_or_default();

        let mut request = self
            .http_client
            .post(url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", &self.api_key));

        if let Some(headers) = opts.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        if let Some(body_data) = body {
            request = request.json(&body_data);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await?;
            let details = serde_json::from_str::<FunctionErrorDetails>(&error_text).ok();
            let message = details
                .as_ref()
                .and_then(|d| d.error.clone())
                .unwrap_or(error_text);
            return Err(FunctionsError::FunctionError {
                status: status.as_u16(),
                message,
                details,
            });
        }

        Ok(response.json::<R>().await?)
    }
}
