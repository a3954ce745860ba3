//! Notification scheduling and delivery
//!
//! Computes next-fire times for habit reminders from the user's
//! preferences, runs them on client-local timers, and performs the side
//! effects when one fires: permission gate, quiet-hours gate, show the
//! notification, optionally send an email through the backend function.
//! Timers are process-local and individually uncancelable; the only
//! operation is clear-all-and-reschedule, and nothing survives a
//! restart.
//!
//! The platform notification capability is injected once at
//! construction as a trait object; an environment without notification
//! support simply passes `None`.

use crate::error::StoreError;
use crate::habits::Habit;
use crate::profile::{ProfileStore, ProfileUpdate, UserProfile};
use crate::session::SessionManager;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Local, NaiveTime};
use habitflow_functions::{FunctionOptions, FunctionsClient};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Streak lengths that trigger a milestone notification.
pub const STREAK_MILESTONES: [i32; 6] = [3, 7, 14, 30, 60, 100];

/// Platform notification permission, mirroring the browser's tri-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    /// Not yet decided by the user.
    Default,
}

/// What gets displayed when a notification fires.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub data: serde_json::Value,
    pub sound: bool,
}

/// Platform notification support, injected at startup. Implementations
/// wrap whatever the embedding environment provides (web notifications,
/// a desktop tray, a test recorder).
#[async_trait]
pub trait NotificationCapability: Send + Sync {
    fn permission(&self) -> PermissionState;
    /// One-shot, user-triggered permission prompt. The outcome persists
    /// per platform rules, outside this system's control.
    async fn request_permission(&self) -> PermissionState;
    async fn show(&self, payload: &NotificationPayload) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Reminder,
    Streak,
    Milestone,
}

/// A pending reminder. Exists only in memory for the current process
/// lifetime; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledNotification {
    /// "habit id-day of week", unique per timer.
    pub id: String,
    pub habit_id: Uuid,
    pub habit_title: String,
    pub scheduled_time: DateTime<Local>,
    pub kind: NotificationKind,
    pub message: String,
}

/// Notification preferences, derived from the profile.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationSettings {
    pub push_enabled: bool,
    pub email_enabled: bool,
    pub sound_enabled: bool,
    pub reminder_time: NaiveTime,
    pub reminder_days: Vec<u8>,
    pub quiet_hours_start: NaiveTime,
    pub quiet_hours_end: NaiveTime,
    pub timezone: String,
}

impl From<&UserProfile> for NotificationSettings {
    fn from(profile: &UserProfile) -> Self {
        Self {
            push_enabled: profile.push_notifications,
            email_enabled: profile.email_notifications,
            sound_enabled: profile.notification_sound,
            reminder_time: profile.reminder_time,
            reminder_days: profile.reminder_days.clone(),
            quiet_hours_start: profile.quiet_hours_start,
            quiet_hours_end: profile.quiet_hours_end,
            timezone: profile.timezone.clone(),
        }
    }
}

/// Partial settings change, mapped onto a profile update.
#[derive(Debug, Clone, Default)]
pub struct UpdateNotificationSettings {
    pub push_enabled: Option<bool>,
    pub email_enabled: Option<bool>,
    pub sound_enabled: Option<bool>,
    pub reminder_time: Option<NaiveTime>,
    pub reminder_days: Option<Vec<u8>>,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    Reminder,
    Streak,
    WeeklyReport,
}

/// Body of the `send-email-notification` backend function. Field names
/// are camelCase on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRequest {
    pub to: String,
    pub subject: String,
    pub habit_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub habit_description: Option<String>,
    #[serde(rename = "type")]
    pub kind: EmailKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streak_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailResponse {
    pub success: bool,
    pub message_id: Option<String>,
}

/// Events delivered back from the platform notification channel, e.g.
/// when the user taps "complete" on a background notification.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum NotificationAction {
    #[serde(rename = "COMPLETE_HABIT")]
    CompleteHabit {
        #[serde(rename = "habitId")]
        habit_id: Uuid,
    },
}

/// True when `time` falls inside the quiet-hours window. Windows where
/// start > end wrap past midnight (22:00–08:00 covers 23:30 and 06:00).
pub fn is_quiet_time(time: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start > end {
        time >= start || time <= end
    } else {
        time >= start && time <= end
    }
}

/// Next occurrence of `day_of_week` (1=Monday..7=Sunday) at
/// `reminder_time`, strictly after `now`. A target day equal to today
/// whose time has already passed rolls forward a full week.
pub fn next_occurrence(
    now: DateTime<Local>,
    day_of_week: u8,
    reminder_time: NaiveTime,
) -> Option<DateTime<Local>> {
    if !(1..=7).contains(&day_of_week) {
        return None;
    }
    let current = now.weekday().number_from_monday() as i64;
    let mut days_until = (day_of_week as i64 - current).rem_euclid(7);
    if days_until == 0 && now.time() >= reminder_time {
        days_until = 7;
    }
    let date = now.date_naive() + Duration::days(days_until);
    date.and_time(reminder_time)
        .and_local_timezone(Local)
        .earliest()
}

pub struct NotificationService {
    functions: Arc<FunctionsClient>,
    session: Arc<SessionManager>,
    profile: Arc<ProfileStore>,
    capability: Option<Arc<dyn NotificationCapability>>,
    permission: RwLock<PermissionState>,
    scheduled: Mutex<Vec<ScheduledNotification>>,
    timers: Mutex<Vec<JoinHandle<()>>>,
    last_error: RwLock<Option<String>>,
}

impl NotificationService {
    pub fn new(
        functions: Arc<FunctionsClient>,
        session: Arc<SessionManager>,
        profile: Arc<ProfileStore>,
        capability: Option<Arc<dyn NotificationCapability>>,
    ) -> Self {
        Self {
            functions,
            session,
            profile,
            capability,
            permission: RwLock::new(PermissionState::Default),
            scheduled: Mutex::new(Vec::new()),
            timers: Mutex::new(Vec::new()),
            last_error: RwLock::new(None),
        }
    }

    // --- Permission ---

    /// Query the platform permission once at startup.
    pub fn initialize_permissions(&self) -> Result<PermissionState, StoreError> {
        let result = match &self.capability {
            Some(capability) => {
                let state = capability.permission();
                *self.permission.write().unwrap() = state;
                Ok(state)
            }
            None => Err(StoreError::NotificationsUnsupported),
        };
        self.remember(result)
    }

    /// Explicit, user-triggered permission prompt.
    pub async fn request_permission(&self) -> Result<PermissionState, StoreError> {
        let capability = match &self.capability {
            Some(capability) => Arc::clone(capability),
            None => return self.remember(Err(StoreError::NotificationsUnsupported)),
        };
        let state = capability.request_permission().await;
        *self.permission.write().unwrap() = state;
        match state {
            PermissionState::Granted => Ok(state),
            _ => self.remember(Err(StoreError::PermissionDenied)),
        }
    }

    pub fn permission(&self) -> PermissionState {
        *self.permission.read().unwrap()
    }

    pub fn can_send(&self) -> bool {
        self.permission() == PermissionState::Granted
    }

    // --- Settings ---

    pub fn settings(&self) -> Option<NotificationSettings> {
        self.profile
            .profile()
            .as_ref()
            .map(NotificationSettings::from)
    }

    pub fn is_quiet_hours(&self) -> bool {
        match self.settings() {
            Some(settings) => is_quiet_time(
                Local::now().time(),
                settings.quiet_hours_start,
                settings.quiet_hours_end,
            ),
            None => false,
        }
    }

    /// Persist a partial settings change through the profile. Callers
    /// reschedule reminders after a successful update.
    pub async fn update_settings(
        &self,
        changes: UpdateNotificationSettings,
    ) -> Result<UserProfile, StoreError> {
        let update = ProfileUpdate {
            push_notifications: changes.push_enabled,
            email_notifications: changes.email_enabled,
            notification_sound: changes.sound_enabled,
            reminder_time: changes.reminder_time,
            reminder_days: changes.reminder_days,
            quiet_hours_start: changes.quiet_hours_start,
            quiet_hours_end: changes.quiet_hours_end,
            timezone: changes.timezone,
            ..Default::default()
        };
        let result = self.profile.update_profile(update).await;
        self.remember(result)
    }

    // --- Scheduling ---

    /// Discard every pending timer and reschedule from the current
    /// preferences: one timer per active habit per configured reminder
    /// day. Returns the number of timers armed.
    pub fn schedule_habit_reminders(self: &Arc<Self>, habits: &[Habit]) -> usize {
        self.clear_scheduled();

        let settings = match self.settings() {
            Some(settings) => settings,
            None => return 0,
        };

        let now = Local::now();
        let mut count = 0;

        for habit in habits.iter().filter(|h| h.is_active) {
            for &day in &settings.reminder_days {
                let fire_at = match next_occurrence(now, day, settings.reminder_time) {
                    Some(fire_at) => fire_at,
                    None => continue,
                };
                let delay = match (fire_at - now).to_std() {
                    Ok(delay) => delay,
                    Err(_) => continue,
                };

                self.scheduled.lock().unwrap().push(ScheduledNotification {
                    id: format!("{}-{}", habit.id, day),
                    habit_id: habit.id,
                    habit_title: habit.title.clone(),
                    scheduled_time: fire_at,
                    kind: NotificationKind::Reminder,
                    message: format!("Time for {}!", habit.title),
                });

                let service = Arc::clone(self);
                let habit = habit.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    service.fire_reminder(&habit).await;
                });
                self.timers.lock().unwrap().push(handle);
                count += 1;
            }
        }

        debug!(count, "habit reminders scheduled");
        count
    }

    /// Pending reminders, most useful for display and tests.
    pub fn scheduled(&self) -> Vec<ScheduledNotification> {
        self.scheduled.lock().unwrap().clone()
    }

    /// Abort every pending timer. Individual timers cannot be canceled.
    pub fn clear_scheduled(&self) {
        for handle in self.timers.lock().unwrap().drain(..) {
            handle.abort();
        }
        self.scheduled.lock().unwrap().clear();
    }

    async fn fire_reminder(&self, habit: &Habit) {
        let settings = self.settings();
        let payload = NotificationPayload {
            title: format!("Time for {}!", habit.title),
            body: if habit.description.is_empty() {
                "Don't forget to complete your habit today.".to_string()
            } else {
                habit.description.clone()
            },
            tag: format!("habit-{}", habit.id),
            data: serde_json::json!({ "habitId": habit.id, "type": "reminder" }),
            sound: settings.as_ref().map(|s| s.sound_enabled).unwrap_or(false),
        };

        match self.send_notification(payload).await {
            Ok(()) => {
                if settings.map(|s| s.email_enabled).unwrap_or(false) {
                    if let Err(err) = self
                        .send_reminder_email(&habit.title, Some(habit.description.clone()))
                        .await
                    {
                        warn!(habit = %habit.title, "reminder email failed: {}", err);
                    }
                }
            }
            Err(err) => warn!(habit = %habit.title, "reminder not delivered: {}", err),
        }
    }

    // --- Delivery ---

    /// Show a notification now, subject to the permission and
    /// quiet-hours gates. A notification falling inside quiet hours is
    /// suppressed entirely, not deferred.
    pub async fn send_notification(
        &self,
        payload: NotificationPayload,
    ) -> Result<(), StoreError> {
        let result = self.do_send_notification(payload).await;
        self.remember(result)
    }

    async fn do_send_notification(&self, payload: NotificationPayload) -> Result<(), StoreError> {
        let capability = self
            .capability
            .as_ref()
            .ok_or(StoreError::NotificationsUnsupported)?;
        if !self.can_send() {
            return Err(StoreError::PermissionDenied);
        }
        if self.is_quiet_hours() {
            warn!(tag = %payload.tag, "notification suppressed by quiet hours");
            return Err(StoreError::QuietHours);
        }
        capability.show(&payload).await
    }

    pub async fn send_test_notification(&self) -> Result<(), StoreError> {
        let sound = self
            .settings()
            .map(|s| s.sound_enabled)
            .unwrap_or(false);
        self.send_notification(NotificationPayload {
            title: "Test Notification".to_string(),
            body: "Your notifications are working correctly!".to_string(),
            tag: "test-notification".to_string(),
            data: serde_json::Value::Null,
            sound,
        })
        .await
    }

    /// Celebrate a streak milestone: browser notification (best effort)
    /// plus an email when email notifications are enabled. Counts off
    /// the milestone set are a no-op.
    pub async fn send_streak_notification(
        &self,
        habit_title: &str,
        streak_count: i32,
    ) -> Result<(), StoreError> {
        if !STREAK_MILESTONES.contains(&streak_count) {
            return Ok(());
        }

        let sound = self
            .settings()
            .map(|s| s.sound_enabled)
            .unwrap_or(false);
        let payload = NotificationPayload {
            title: format!("{}-day streak!", streak_count),
            body: format!(
                "Amazing! You've maintained {} for {} days in a row!",
                habit_title, streak_count
            ),
            tag: format!("streak-{}", streak_count),
            data: serde_json::json!({
                "type": "streak",
                "streakCount": streak_count,
                "habitTitle": habit_title,
            }),
            sound,
        };
        if let Err(err) = self.send_notification(payload).await {
            debug!("streak notification not shown: {}", err);
        }

        if self.settings().map(|s| s.email_enabled).unwrap_or(false) {
            let subject = format!("{}-day streak with {}!", streak_count, habit_title);
            if let Err(err) = self
                .send_email_notification(
                    EmailKind::Streak,
                    habit_title,
                    None,
                    Some(streak_count),
                    subject,
                )
                .await
            {
                warn!(habit = habit_title, "streak email failed: {}", err);
            }
        }
        Ok(())
    }

    pub async fn send_reminder_email(
        &self,
        habit_title: &str,
        habit_description: Option<String>,
    ) -> Result<EmailResponse, StoreError> {
        if !self.settings().map(|s| s.email_enabled).unwrap_or(false) {
            return self.remember(Err(StoreError::EmailDisabled));
        }
        let subject = format!("Time for {}!", habit_title);
        self.send_email_notification(
            EmailKind::Reminder,
            habit_title,
            habit_description,
            None,
            subject,
        )
        .await
    }

    /// Invoke the backend email function as the signed-in user. An
    /// unconfigured provider fails closed with the server's message.
    pub async fn send_email_notification(
        &self,
        kind: EmailKind,
        habit_title: &str,
        habit_description: Option<String>,
        streak_count: Option<i32>,
        subject: String,
    ) -> Result<EmailResponse, StoreError> {
        let result = self
            .do_send_email(kind, habit_title, habit_description, streak_count, subject)
            .await;
        self.remember(result)
    }

    async fn do_send_email(
        &self,
        kind: EmailKind,
        habit_title: &str,
        habit_description: Option<String>,
        streak_count: Option<i32>,
        subject: String,
    ) -> Result<EmailResponse, StoreError> {
        let session = self.session.require_session()?;
        let profile = self
            .profile
            .profile()
            .ok_or(StoreError::ProfileNotLoaded)?;

        let full_name = self.profile.full_name();
        let user_name = if full_name.is_empty() {
            profile.first_name.clone()
        } else {
            Some(full_name)
        };

        let request = EmailRequest {
            to: profile.email,
            subject,
            habit_title: habit_title.to_string(),
            habit_description,
            kind,
            streak_count,
            user_name,
        };

        let mut headers = HashMap::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", session.access_token),
        );

        let response: EmailResponse = self
            .functions
            .invoke(
                "send-email-notification",
                Some(&request),
                Some(FunctionOptions {
                    headers: Some(headers),
                }),
            )
            .await?;
        debug!(message_id = ?response.message_id, "notification email sent");
        Ok(response)
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
