//! Store-level error taxonomy
//!
//! Every store operation returns `Result<T, StoreError>` instead of
//! letting remote failures propagate as panics or raw transport errors.
//! The variants follow the application's failure classes: missing
//! authentication, remote-service failures (carrying the service's own
//! message), validation problems, unavailable platform capabilities and
//! configuration gaps.

use habitflow_auth::AuthError;
use habitflow_functions::FunctionsError;
use habitflow_postgrest::PostgrestError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("User not authenticated")]
    NotAuthenticated,

    /// Network or service error, surfaced with the service's message.
    #[error("{0}")]
    Service(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Habit not found")]
    HabitNotFound,

    #[error("Title is required")]
    TitleRequired,

    #[error("Habit already completed today")]
    AlreadyCompletedToday,

    #[error("No completion recorded for today")]
    NotCompletedToday,

    #[error("Profile not loaded")]
    ProfileNotLoaded,

    #[error("Notifications are not supported in this environment")]
    NotificationsUnsupported,

    #[error("Notification permission denied")]
    PermissionDenied,

    #[error("Quiet hours active")]
    QuietHours,

    #[error("Email notifications disabled")]
    EmailDisabled,
}

impl From<PostgrestError> for StoreError {
    fn from(err: PostgrestError) -> Self {
        StoreError::Service(err.to_string())
    }
}

impl From<AuthError> for StoreError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingSession => StoreError::NotAuthenticated,
            other => StoreError::Service(other.to_string()),
        }
    }
}

impl From<FunctionsError> for StoreError {
    fn from(err: FunctionsError) -> Self {
        match err {
            FunctionsError::FunctionError { message, .. } => StoreError::Service(message),
            other => StoreError::Service(other.to_string()),
        }
    }
}
