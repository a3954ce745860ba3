//! User profile store
//!
//! Exactly one profile row per authenticated user, keyed by the user id.
//! Fetching a profile that does not exist yet creates one with default
//! notification preferences, so the rest of the application can assume a
//! profile is always available once `fetch_profile` succeeds.

use crate::error::StoreError;
use crate::session::SessionManager;
use crate::Backend;
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub email_notifications: bool,
    pub daily_reminders: bool,
    pub weekly_reports: bool,
    pub push_notifications: bool,
    /// Single reminder time-of-day shared by all reminder days.
    pub reminder_time: NaiveTime,
    /// Days of week the reminder fires on, 1=Monday..7=Sunday.
    pub reminder_days: Vec<u8>,
    pub notification_sound: bool,
    pub quiet_hours_start: NaiveTime,
    pub quiet_hours_end: NaiveTime,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial profile update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_notifications: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_reminders: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_reports: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_notifications: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_days: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_sound: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiet_hours_start: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiet_hours_end: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Stamped by the store on every update; caller values are replaced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct DefaultProfileRow<'a> {
    id: Uuid,
    email: &'a str,
    email_notifications: bool,
    daily_reminders: bool,
    weekly_reports: bool,
    push_notifications: bool,
    reminder_time: NaiveTime,
    reminder_days: Vec<u8>,
    notification_sound: bool,
    quiet_hours_start: NaiveTime,
    quiet_hours_end: NaiveTime,
    timezone: &'a str,
}

fn default_time(hour: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, 0, 0).expect("whole hours are valid times")
}

pub struct ProfileStore {
    backend: Arc<Backend>,
    session: Arc<SessionManager>,
    profile: RwLock<Option<UserProfile>>,
    last_error: RwLock<Option<String>>,
}

impl ProfileStore {
    pub fn new(backend: Arc<Backend>, session: Arc<SessionManager>) -> Self {
        Self {
            backend,
            session,
            profile: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.profile.read().unwrap().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.profile.read().unwrap().is_some()
    }

    /// First and last name joined, skipping missing parts.
    pub fn full_name(&self) -> String {
        match self.profile.read().unwrap().as_ref() {
            Some(profile) => [profile.first_name.as_deref(), profile.last_name.as_deref()]
                .iter()
                .flatten()
                .copied()
                .collect::<Vec<_>>()
                .join(" "),
            None => String::new(),
        }
    }

    /// Fetch the user's profile, creating one with defaults when the
    /// backend reports no row.
    pub async fn fetch_profile(&self) -> Result<UserProfile, StoreError> {
        let result = self.do_fetch_profile().await;
        self.remember(result)
    }

    async fn do_fetch_profile(&self) -> Result<UserProfile, StoreError> {
        let session = self.session.require_session()?;

        let fetched = self
            .backend
            .table("profiles")
            .with_auth(&session.access_token)?
            .select("*")
            .eq("id", &session.user.id.to_string())
            .single::<UserProfile>()
            .await;

        let profile = match fetched {
            Ok(profile) => profile,
            Err(err) if err.is_no_rows() => self.create_default_profile(&session).await?,
            Err(err) => return Err(err.into()),
        };

        *self.profile.write().unwrap() = Some(profile.clone());
        Ok(profile)
    }

    async fn create_default_profile(
        &self,
        session: &habitflow_auth::Session,
    ) -> Result<UserProfile, StoreError> {
        info!(user = %session.user.id, "creating default profile");
        let email = session.user.email.clone().unwrap_or_default();
        let row = DefaultProfileRow {
            id: session.user.id,
            email: &email,
            email_notifications: true,
            daily_reminders: true,
            weekly_reports: false,
            push_notifications: true,
            reminder_time: default_time(9),
            reminder_days: vec![1, 2, 3, 4, 5, 6, 7],
            notification_sound: true,
            quiet_hours_start: default_time(22),
            quiet_hours_end: default_time(8),
            timezone: "UTC",
        };

        let created: UserProfile = self
            .backend
            .table("profiles")
            .with_auth(&session.access_token)?
            .insert_single(&row)
            .await?;
        Ok(created)
    }

    /// Apply a partial update; `updated_at` is stamped here.
    pub async fn update_profile(&self, changes: ProfileUpdate) -> Result<UserProfile, StoreError> {
        let result = self.do_update_profile(changes).await;
        self.remember(result)
    }

    async fn do_update_profile(
        &self,
        mut changes: ProfileUpdate,
    ) -> Result<UserProfile, StoreError> {
        let session = self.session.require_session()?;
        if self.profile.read().unwrap().is_none() {
            return Err(StoreError::ProfileNotLoaded);
        }

        changes.updated_at = Some(Utc::now());
        let updated: UserProfile = self
            .backend
            .table("profiles")
            .with_auth(&session.access_token)?
            .eq("id", &session.user.id.to_string())
            .update_single(&changes)
            .await?;

        *self.profile.write().unwrap() = Some(updated.clone());
        Ok(updated)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().unwrap().clone()
    }

    pub fn clear_error(&self) {
        *self.last_error.write().unwrap() = None;
    }

    /// Drop all per-session state (sign-out).
    pub fn reset(&self) {
        *self.profile.write().unwrap() = None;
        self.clear_error();
    }

    fn remember<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if let Err(err) = &result {
            *self.last_error.write().unwrap() = Some(err.to_string());
        }
        result
    }
}
