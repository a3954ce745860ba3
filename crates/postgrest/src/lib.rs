//! PostgREST table client for the Habit Flow backend
//!
//! Every collection the application touches (`habits`, `habit_completions`,
//! `habit_streaks`, `profiles`, `achievements`, `user_achievements`) is a
//! PostgREST resource behind row-level security. This crate provides the
//! query surface the stores need: select with equality filters and
//! ordering, insert/update returning the persisted representation, and
//! delete.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Structured error body returned by PostgREST.
///
/// The `code` field carries PostgREST's own error codes; `PGRST116`
/// (zero or many rows where exactly one was requested) is the one the
/// application inspects to detect a missing row.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ApiErrorDetails {
    pub code: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl fmt::Display for ApiErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(code) = &self.code {
            parts.push(format!("Code: {}", code));
        }
        if let Some(message) = &self.message {
            parts.push(format!("Message: {}", message));
        }
        if let Some(details) = &self.details {
            parts.push(format!("Details: {}", details));
        }
        if let Some(hint) = &self.hint {
            parts.push(format!("Hint: {}", hint));
        }
        write!(f, "{}", parts.join(", "))
    }
}

#[derive(Error, Debug)]
pub enum PostgrestError {
    #[error("API error: {details} (Status: {status})")]
    ApiError {
        details: ApiErrorDetails,
        status: reqwest::StatusCode,
    },

    #[error("API error (unparsed): {message} (Status: {status})")]
    UnparsedApiError {
        message: String,
        status: reqwest::StatusCode,
    },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl PostgrestError {
    /// True when the server reported "zero rows returned for a
    /// single-object request" (PostgREST code `PGRST116`).
    pub fn is_no_rows(&self) -> bool {
        matches!(
            self,
            PostgrestError::ApiError { details, .. }
                if details.code.as_deref() == Some("PGRST116")
        )
    }
}

/// Sort direction for `order()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Client for a single PostgREST table or view.
///
/// Builder methods accumulate query parameters; the terminal methods
/// (`execute`, `single`, `insert*`, `update*`, `delete`) perform the
/// request. Filters are equality-only because every application query is
/// scoped by `user_id` (or `id`/`habit_id`) under row-level security.
pub struct TableClient {
    base_url: String,
    table: String,
    http_client: Client,
    headers: HeaderMap,
    // Ordered so the built URL is deterministic.
    query_params: Vec<(String, String)>,
}

impl TableClient {
    pub fn new(base_url: &str, api_key: &str, table: &str, http_client: Client) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(api_key).unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            table: table.to_string(),
            http_client,
            headers,
            query_params: Vec::new(),
        }
    }

    /// Add an arbitrary request header.
    pub fn with_header(mut self, key: &str, value: &str) -> Result<Self, PostgrestError> {
        let header_name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
            PostgrestError::InvalidParameters(format!("Invalid header name: {}", key))
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            PostgrestError::InvalidParameters(format!("Invalid header value: {}", value))
        })?;
        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// Attach the signed-in user's access token so row-level security
    /// resolves to their rows.
    pub fn with_auth(self, token: &str) -> Result<Self, PostgrestError> {
        self.with_header("Authorization", &format!("Bearer {}", token))
    }

    /// Columns (or embedded resources) to return.
    pub fn select(mut self, columns: &str) -> Self {
        self.set_param("select", columns.to_string());
        self
    }

    /// Equality filter.
    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.set_param(column, format!("eq.{}", value));
        self
    }

    /// Sort order of the result set.
    pub fn order(mut self, column: &str, order: SortOrder) -> Self {
        let direction = match order {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        };
        self.set_param("order", format!("{}.{}", column, direction));
        self
    }

    /// Maximum number of rows to return.
    pub fn limit(mut self, count: i32) -> Self {
        self.set_param("limit", count.to_string());
        self
    }

    fn set_param(&mut self, key: &str, value: String) {
        if let Some(existing) = self.query_params.iter_mut().find(|(k, _)| k == key) {
            existing.1 = value;
        } else {
            self.query_params.push((key.to_string(), value));
        }
    }

    fn build_url(&self) -> Result<String, PostgrestError> {
        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.base_url, self.table))?;
        for (key, value) in &self.query_params {
            url.query_pairs_mut().append_pair(key, value);
        }
        Ok(url.to_string())
    }

    /// Fetch all matching rows.
    pub async fn execute<T: DeserializeOwned>(&self) -> Result<Vec<T>, PostgrestError> {
        let url = self.build_url()?;
        debug!(table = %self.table, %url, "select");

        let response = self
            .http_client
            .get(&url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(PostgrestError::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(status, response).await);
        }

        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| PostgrestError::DeserializationError(e.to_string()))
    }

    /// Fetch exactly one row. PostgREST rejects the request with code
    /// `PGRST116` when zero or multiple rows match.
    pub async fn single<T: DeserializeOwned>(&self) -> Result<T, PostgrestError> {
        let url = self.build_url()?;
        debug!(table = %self.table, %url, "select single");

        let mut headers = self.headers.clone();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/vnd.pgrst.object+json"),
        );

        let response = self
            .http_client
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(PostgrestError::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(status, response).await);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PostgrestError::DeserializationError(e.to_string()))
    }

    /// Insert a row and return the persisted representation.
    pub async fn insert_single<T, R>(&self, values: &T) -> Result<R, PostgrestError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let url = self.build_url()?;
        debug!(table = %self.table, "insert");

        let mut headers = self.headers.clone();
        headers.insert(
            HeaderName::from_static("prefer"),
            HeaderValue::from_static("return=representation"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/vnd.pgrst.object+json"),
        );

        let response = self
            .http_client
            .post(&url)
            .headers(headers)
            .json(values)
            .send()
            .await
            .map_err(PostgrestError::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(status, response).await);
        }

        response
            .json::<R>()
            .await
            .map_err(|e| PostgrestError::DeserializationError(e.to_string()))
    }

    /// Update matching rows and return the first persisted representation.
    pub async fn update_single<T, R>(&self, values: &T) -> Result<R, PostgrestError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let url = self.build_url()?;
        debug!(table = %self.table, "update");

        let mut headers = self.headers.clone();
        headers.insert(
            HeaderName::from_static("prefer"),
            HeaderValue::from_static("return=representation"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/vnd.pgrst.object+json"),
        );

        let response = self
            .http_client
            .patch(&url)
            .headers(headers)
            .json(values)
            .send()
            .await
            .map_err(PostgrestError::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(status, response).await);
        }

        response
            .json::<R>()
            .await
            .map_err(|e| PostgrestError::DeserializationError(e.to_string()))
    }

    /// Delete matching rows.
    pub async fn delete(&self) -> Result<(), PostgrestError> {
        let url = self.build_url()?;
        debug!(table = %self.table, %url, "delete");

        let response = self
            .http_client
            .delete(&url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(PostgrestError::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(status, response).await);
        }

        Ok(())
    }
}

async fn error_from_response(
    status: reqwest::StatusCode,
    response: reqwest::Response,
) -> PostgrestError {
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error response".to_string());

    match serde_json::from_str::<ApiErrorDetails>(&error_text) {
        Ok(details) => PostgrestError::ApiError { details, status },
        Err(_) => PostgrestError::UnparsedApiError {
            message: error_text,
            status,
        },
    }
}
