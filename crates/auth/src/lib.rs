//! Authentication client for the Habit Flow backend
//!
//! Wraps the GoTrue endpoints the application uses: sign up, sign in,
//! sign out, session recovery and the current-user lookup. The client
//! keeps the active session in memory and publishes every session change
//! on a watch channel so the rest of the application can react to
//! sign-in/sign-out without polling.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing session")]
    MissingSession,
}

/// Authenticated user as returned by the auth service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Access/refresh token pair plus the user it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: String,
    pub user: User,
}

#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub persist_session: bool,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            persist_session: true,
        }
    }
}

/// Auth client. Cheap to share behind an `Arc`; all state is interior.
pub struct AuthClient {
    url: String,
    key: String,
    http_client: Client,
    options: AuthOptions,
    current_session: RwLock<Option<Session>>,
    events: watch::Sender<Option<Session>>,
}

impl AuthClient {
    pub fn new(url: &str, key: &str, http_client: Client, options: AuthOptions) -> Arc<Self> {
        let (events, _) = watch::channel(None);
        Arc::new(Self {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            http_client,
            options,
            current_session: RwLock::new(None),
            events,
        })
    }

    /// Register a new user. The service returns a session immediately
    /// when email confirmation is disabled.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let url = format!("{}/auth/v1/signup", self.url);
        let payload = serde_json::json!({ "email": email, "password": password });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(AuthError::ApiError(error_text));
        }

        let session: Session = response.json().await?;
        self.store_session(Some(session.clone()));
        Ok(session)
    }

    /// Sign in with email and password.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.url);
        let payload = serde_json::json!({ "email": email, "password": password });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(AuthError::ApiError(error_text));
        }

        let session: Session = response.json().await?;
        debug!(user = %session.user.id, "signed in");
        self.store_session(Some(session.clone()));
        Ok(session)
    }

    /// Current in-memory session, if any.
    pub fn get_session(&self) -> Option<Session> {
        self.current_session.read().unwrap().clone()
    }

    /// Validate the current session against the auth service and return
    /// the user it belongs to.
    pub async fn get_user(&self) -> Result<User, AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let url = format!("{}/auth/v1/user", self.url);
        let response = self
            .http_client
            .get(&url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(AuthError::ApiError(error_text));
        }

        let user: User = response.json().await?;
        Ok(user)
    }

    /// Exchange the current session's refresh token for a new session.
    pub async fn refresh_session(&self) -> Result<Session, AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;
        self.exchange_refresh_token(&session.refresh_token).await
    }

    /// Restore a session from a refresh token kept by the embedding
    /// application (e.g. from its own persisted state). This is how a
    /// fresh process re-enters a signed-in state without credentials.
    pub async fn recover_session(&self, refresh_token: &str) -> Result<Session, AuthError> {
        self.exchange_refresh_token(refresh_token).await
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let url = format!("{}/auth/v1/token?grant_type=refresh_token", self.url);
        let payload = serde_json::json!({ "refresh_token": refresh_token });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(AuthError::ApiError(error_text));
        }

        let session: Session = response.json().await?;
        self.store_session(Some(session.clone()));
        Ok(session)
    }

    /// Invalidate the session server-side and clear it locally. The
    /// local session is cleared even when the revocation call fails, so
    /// a dead token can never wedge the client in a signed-in state.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let url = format!("{}/auth/v1/logout", self.url);
        let result = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await;

        self.store_session(None);

        let response = result?;
        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(AuthError::ApiError(error_text));
        }
        Ok(())
    }

    /// Observe session changes. The receiver yields the latest session
    /// (or `None` after sign-out) whenever it changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.events.subscribe()
    }

    fn store_session(&self, session: Option<Session>) {
        if self.options.persist_session || session.is_none() {
            let mut guard = self.current_session.write().unwrap();
            *guard = session.clone();
        }
        self.events.send_replace(session);
    }
}
