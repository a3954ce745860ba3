//! Habit Flow application core
//!
//! The state layer of the Habit Flow habit tracker: repositories over a
//! Supabase backend, pure analytics aggregation, achievement progress,
//! reminder scheduling and session management. Presentation is someone
//! else's job; this crate exposes constructed service objects and
//! plain data.
//!
//! # Example
//!
//! ```no_run
//! use habitflow::{App, Config};
//! use habitflow::theme::MemoryPreferences;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), habitflow::StoreError> {
//! let config = Config::from_env()?;
//! let app = App::new(config, None, Arc::new(MemoryPreferences::default()))?;
//! app.session.sign_in("me@example.com", "secret").await?;
//! app.initialize(None).await?;
//! # Ok(())
//! # }
//! ```

pub mod achievements;
pub mod analytics;
pub mod config;
pub mod error;
pub mod habits;
pub mod notifications;
pub mod profile;
pub mod session;
pub mod theme;

pub use config::Config;
pub use error::StoreError;

use crate::achievements::AchievementStore;
use crate::habits::{HabitCompletion, HabitStore};
use crate::notifications::{
    NotificationAction, NotificationCapability, NotificationService, UpdateNotificationSettings,
};
use crate::profile::{ProfileStore, UserProfile};
use crate::session::SessionManager;
use crate::theme::{PreferenceStorage, ThemeStore};
use chrono::Local;
use habitflow_auth::{AuthClient, AuthOptions};
use habitflow_functions::FunctionsClient;
use habitflow_postgrest::TableClient;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared backend plumbing: one HTTP client handed to every service
/// client, plus per-table query construction.
pub struct Backend {
    config: Config,
    http_client: reqwest::Client,
    pub auth: Arc<AuthClient>,
    pub functions: Arc<FunctionsClient>,
}

impl Backend {
    pub fn new(config: Config) -> Result<Self, StoreError> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| StoreError::Config(format!("failed to build HTTP client: {}", e)))?;

        let auth = AuthClient::new(
            &config.base_url(),
            &config.anon_key,
            http_client.clone(),
            AuthOptions::default(),
        );
        let functions = Arc::new(FunctionsClient::new(
            &config.base_url(),
            &config.anon_key,
            http_client.clone(),
        ));

        Ok(Self {
            config,
            http_client,
            auth,
            functions,
        })
    }

    /// Query builder for one backend table.
    pub fn table(&self, name: &str) -> TableClient {
        TableClient::new(
            &self.config.base_url(),
            &self.config.anon_key,
            name,
            self.http_client.clone(),
        )
    }
}

/// Composition root. Constructs every service in dependency order and
/// wires references explicitly. There is no global state, and services
/// never reach for each other behind the root's back.
pub struct App {
    pub backend: Arc<Backend>,
    pub session: Arc<SessionManager>,
    pub profile: Arc<ProfileStore>,
    pub achievements: Arc<AchievementStore>,
    pub habits: Arc<HabitStore>,
    pub notifications: Arc<NotificationService>,
    pub theme: ThemeStore,
}

impl App {
    pub fn new(
        config: Config,
        notification_capability: Option<Arc<dyn NotificationCapability>>,
        preferences: Arc<dyn PreferenceStorage>,
    ) -> Result<Arc<Self>, StoreError> {
        let backend = Arc::new(Backend::new(config)?);
        let session = Arc::new(SessionManager::new(backend.auth.clone()));
        let profile = Arc::new(ProfileStore::new(backend.clone(), session.clone()));
        let achievements = Arc::new(AchievementStore::new(backend.clone(), session.clone()));
        let habits = Arc::new(HabitStore::new(
            backend.clone(),
            session.clone(),
            Some(achievements.clone()),
        ));
        let notifications = Arc::new(NotificationService::new(
            backend.functions.clone(),
            session.clone(),
            profile.clone(),
            notification_capability,
        ));
        let theme = ThemeStore::new(preferences);

        Ok(Arc::new(Self {
            backend,
            session,
            profile,
            achievements,
            habits,
            notifications,
            theme,
        }))
    }

    /// Restore the session (optionally from a stored refresh token) and,
    /// when signed in, load everything: habit data, profile and
    /// achievements fetched concurrently, then reminders scheduled from
    /// the loaded preferences. Notification permission is queried once
    /// here; an environment without notification support is not an
    /// error.
    pub async fn initialize(
        self: &Arc<Self>,
        stored_refresh_token: Option<&str>,
    ) -> Result<(), StoreError> {
        self.session.init(stored_refresh_token).await;
        if !self.session.is_authenticated() {
            return Ok(());
        }

        tokio::try_join!(
            self.habits.initialize_data(),
            async {
                self.profile.fetch_profile().await?;
                Ok::<(), StoreError>(())
            },
            self.achievements.initialize(),
        )?;

        if self.notifications.initialize_permissions().is_ok() {
            self.notifications
                .schedule_habit_reminders(&self.habits.habits());
        }
        info!(user = ?self.session.current_user().map(|u| u.id), "application initialized");
        Ok(())
    }

    /// Mark a habit completed and, when the refreshed streak lands on a
    /// milestone, celebrate it. The milestone side effect never fails
    /// the completion.
    pub async fn mark_habit_completed(
        &self,
        habit_id: Uuid,
        notes: Option<String>,
    ) -> Result<HabitCompletion, StoreError> {
        let completion = self.habits.mark_habit_completed(habit_id, notes).await?;

        let title = self
            .habits
            .habits()
            .iter()
            .find(|h| h.id == habit_id)
            .map(|h| h.title.clone());
        let current_streak = self
            .habits
            .streaks()
            .iter()
            .find(|s| s.habit_id == habit_id)
            .map(|s| s.current_streak);
        if let (Some(title), Some(streak)) = (title, current_streak) {
            if let Err(err) = self
                .notifications
                .send_streak_notification(&title, streak)
                .await
            {
                warn!("streak celebration failed: {}", err);
            }
        }

        Ok(completion)
    }

    /// Dashboard statistics over the current caches, evaluated against
    /// the local calendar date.
    pub fn dashboard_stats(&self) -> analytics::DashboardStats {
        analytics::dashboard_stats(
            &self.habits.habits(),
            &self.habits.completions(),
            &self.habits.streaks(),
            Local::now().date_naive(),
        )
    }

    /// Per-habit analytics bundle, or `None` for an unknown habit.
    pub fn habit_analytics(&self, habit_id: Uuid) -> Option<analytics::HabitAnalytics> {
        let habits = self.habits.habits();
        let habit = habits.iter().find(|h| h.id == habit_id)?;
        Some(analytics::habit_analytics(
            habit,
            &self.habits.streaks(),
            &self.habits.completions(),
            Local::now().date_naive(),
        ))
    }

    /// Persist a notification settings change and reschedule reminders
    /// with the new preferences.
    pub async fn update_notification_settings(
        self: &Arc<Self>,
        changes: UpdateNotificationSettings,
    ) -> Result<UserProfile, StoreError> {
        let updated = self.notifications.update_settings(changes).await?;
        self.notifications
            .schedule_habit_reminders(&self.habits.habits());
        Ok(updated)
    }

    /// Drain platform notification actions (e.g. "complete" tapped on a
    /// background notification) into the repository.
    pub fn spawn_action_handler(
        self: &Arc<Self>,
        mut actions: mpsc::UnboundedReceiver<NotificationAction>,
    ) -> JoinHandle<()> {
        let app = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(action) = actions.recv().await {
                match action {
                    NotificationAction::CompleteHabit { habit_id } => {
                        if let Err(err) = app.mark_habit_completed(habit_id, None).await {
                            warn!(%habit_id, "completion from notification failed: {}", err);
                        }
                    }
                }
            }
        })
    }

    /// End the session and discard every per-session cache. The local
    /// state is cleared even when the remote sign-out fails.
    pub async fn sign_out(&self) -> Result<(), StoreError> {
        let result = self.session.sign_out().await;

        self.notifications.clear_scheduled();
        self.habits.reset();
        self.profile.reset();
        self.achievements.reset();

        result
    }
}
