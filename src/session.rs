//! Session management
//!
//! Thin layer over the auth client that the rest of the application
//! talks to: it restores a session at startup, exposes the
//! `NotAuthenticated` gate every store goes through, and republishes the
//! auth client's session-change stream.

use crate::error::StoreError;
use habitflow_auth::{AuthClient, Session, User};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{info, warn};

pub struct SessionManager {
    auth: Arc<AuthClient>,
    last_error: RwLock<Option<String>>,
}

impl SessionManager {
    pub fn new(auth: Arc<AuthClient>) -> Self {
        Self {
            auth,
            last_error: RwLock::new(None),
        }
    }

    /// Restore the signed-in state at startup. When no session is live
    /// and the embedding application kept a refresh token, exchange it;
    /// a failed recovery is not fatal, the user simply signs in again.
    pub async fn init(&self, stored_refresh_token: Option<&str>) -> Option<Session> {
        if let Some(session) = self.auth.get_session() {
            return Some(session);
        }
        let token = stored_refresh_token?;
        match self.auth.recover_session(token).await {
            Ok(session) => {
                info!(user = %session.user.id, "session restored");
                Some(session)
            }
            Err(err) => {
                warn!("session recovery failed: {}", err);
                None
            }
        }
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Session, StoreError> {
        let result = self.auth.sign_up(email, password).await.map_err(Into::into);
        self.remember(result)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, StoreError> {
        let result = self
            .auth
            .sign_in_with_password(email, password)
            .await
            .map_err(Into::into);
        self.remember(result)
    }

    pub async fn sign_out(&self) -> Result<(), StoreError> {
        let result = self.auth.sign_out().await.map_err(Into::into);
        self.remember(result)
    }

    pub fn session(&self) -> Option<Session> {
        self.auth.get_session()
    }

    pub fn current_user(&self) -> Option<User> {
        self.auth.get_session().map(|s| s.user)
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.get_session().is_some()
    }

    /// The gate used by every repository call: the live session, or
    /// `NotAuthenticated`.
    pub fn require_session(&self) -> Result<Session, StoreError> {
        self.auth.get_session().ok_or(StoreError::NotAuthenticated)
    }

    /// Observe sign-in/sign-out transitions.
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.auth.subscribe()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().unwrap().clone()
    }

    pub fn clear_error(&self) {
        *self.last_error.write().unwrap() = None;
    }

    fn remember<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if let Err(err) = &result {
            *self.last_error.write().unwrap() = Some(err.to_string());
        }
        result
    }
}
