//! Habit repository
//!
//! Caches the signed-in user's habits, completions and streak rows,
//! mediating every CRUD call against the backend. Fetches replace a
//! cache wholesale; a failed fetch leaves the previous cache untouched,
//! so consumers see stale-but-consistent data rather than a silently
//! emptied list. Streaks are server-maintained: after every completion
//! change the repository re-fetches them instead of computing locally.

use crate::achievements::AchievementStore;
use crate::error::StoreError;
use crate::session::SessionManager;
use crate::Backend;
use chrono::{DateTime, Local, NaiveDate, Utc};
use habitflow_postgrest::SortOrder;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Cadence a habit is expected to be completed at. The derived ordering
/// (daily < weekly < monthly) is the one the frequency sort key uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Habit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub frequency: Frequency,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateHabit {
    pub title: String,
    pub description: String,
    pub frequency: Frequency,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateHabit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Frequency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HabitCompletion {
    pub id: Uuid,
    pub habit_id: Uuid,
    pub user_id: Uuid,
    pub completed_date: NaiveDate,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Server-maintained streak row; the client only ever reads these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HabitStreak {
    pub id: Uuid,
    pub habit_id: Uuid,
    pub current_streak: i32,
    pub best_streak: i32,
    pub last_completed_date: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

/// A habit joined to its streak row, as the views consume it.
#[derive(Debug, Clone, PartialEq)]
pub struct HabitWithStreak {
    pub habit: Habit,
    pub streak: Option<HabitStreak>,
}

impl HabitWithStreak {
    pub fn current_streak(&self) -> i32 {
        self.streak.as_ref().map(|s| s.current_streak).unwrap_or(0)
    }

    pub fn best_streak(&self) -> i32 {
        self.streak.as_ref().map(|s| s.best_streak).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    Name,
    Frequency,
    /// Active habits before inactive ones.
    Status,
    CurrentStreak,
    BestStreak,
    #[default]
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

/// Filter and sort state for the habit list view.
#[derive(Debug, Clone, Default)]
pub struct HabitQuery {
    pub status: StatusFilter,
    pub frequency: Option<Frequency>,
    /// Case-insensitive substring match over title and description.
    pub search: String,
    pub sort_key: SortKey,
    pub direction: SortDirection,
}

#[derive(Serialize)]
struct NewHabitRow<'a> {
    user_id: Uuid,
    title: &'a str,
    description: &'a str,
    frequency: Frequency,
    is_active: bool,
}

#[derive(Serialize)]
struct NewCompletionRow<'a> {
    habit_id: Uuid,
    user_id: Uuid,
    completed_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<&'a str>,
}

pub struct HabitStore {
    backend: Arc<Backend>,
    session: Arc<SessionManager>,
    /// Wired by the composition root; completion events trigger a
    /// re-evaluation there.
    achievements: Option<Arc<AchievementStore>>,
    habits: RwLock<Vec<Habit>>,
    completions: RwLock<Vec<HabitCompletion>>,
    streaks: RwLock<Vec<HabitStreak>>,
    last_error: RwLock<Option<String>>,
}

impl HabitStore {
    pub fn new(
        backend: Arc<Backend>,
        session: Arc<SessionManager>,
        achievements: Option<Arc<AchievementStore>>,
    ) -> Self {
        Self {
            backend,
            session,
            achievements,
            habits: RwLock::new(Vec::new()),
            completions: RwLock::new(Vec::new()),
            streaks: RwLock::new(Vec::new()),
            last_error: RwLock::new(None),
        }
    }

    // --- Cache views ---

    pub fn habits(&self) -> Vec<Habit> {
        self.habits.read().unwrap().clone()
    }

    pub fn completions(&self) -> Vec<HabitCompletion> {
        self.completions.read().unwrap().clone()
    }

    pub fn streaks(&self) -> Vec<HabitStreak> {
        self.streaks.read().unwrap().clone()
    }

    pub fn active_habits(&self) -> Vec<Habit> {
        self.habits
            .read()
            .unwrap()
            .iter()
            .filter(|h| h.is_active)
            .cloned()
            .collect()
    }

    pub fn habits_with_streaks(&self) -> Vec<HabitWithStreak> {
        let streaks = self.streaks.read().unwrap();
        self.habits
            .read()
            .unwrap()
            .iter()
            .map(|habit| HabitWithStreak {
                habit: habit.clone(),
                streak: streaks.iter().find(|s| s.habit_id == habit.id).cloned(),
            })
            .collect()
    }

    // --- Fetches ---

    pub async fn fetch_habits(&self) -> Result<(), StoreError> {
        let result = self.do_fetch_habits().await;
        self.remember(result)
    }

    async fn do_fetch_habits(&self) -> Result<(), StoreError> {
        let session = self.session.require_session()?;
        let rows = self
            .backend
            .table("habits")
            .with_auth(&session.access_token)?
            .select("*")
            .eq("user_id", &session.user.id.to_string())
            .order("created_at", SortOrder::Descending)
            .execute::<Habit>()
            .await?;
        debug!(count = rows.len(), "habits refreshed");
        *self.habits.write().unwrap() = rows;
        Ok(())
    }

    pub async fn fetch_completions(&self) -> Result<(), StoreError> {
        let result = self.do_fetch_completions().await;
        self.remember(result)
    }

    async fn do_fetch_completions(&self) -> Result<(), StoreError> {
        let session = self.session.require_session()?;
        let rows = self
            .backend
            .table("habit_completions")
            .with_auth(&session.access_token)?
            .select("*")
            .eq("user_id", &session.user.id.to_string())
            .order("completed_date", SortOrder::Descending)
            .execute::<HabitCompletion>()
            .await?;
        debug!(count = rows.len(), "completions refreshed");
        *self.completions.write().unwrap() = rows;
        Ok(())
    }

    pub async fn fetch_streaks(&self) -> Result<(), StoreError> {
        let result = self.do_fetch_streaks().await;
        self.remember(result)
    }

    async fn do_fetch_streaks(&self) -> Result<(), StoreError> {
        let session = self.session.require_session()?;
        let rows = self
            .backend
            .table("habit_streaks")
            .with_auth(&session.access_token)?
            .select("*")
            .eq("user_id", &session.user.id.to_string())
            .execute::<HabitStreak>()
            .await?;
        debug!(count = rows.len(), "streaks refreshed");
        *self.streaks.write().unwrap() = rows;
        Ok(())
    }

    /// Load all three collections concurrently. Initialization is
    /// complete only when every fetch has landed; the first failure
    /// wins, and each cache keeps its previous contents on failure.
    pub async fn initialize_data(&self) -> Result<(), StoreError> {
        let result = tokio::try_join!(
            self.do_fetch_habits(),
            self.do_fetch_completions(),
            self.do_fetch_streaks(),
        )
        .map(|_| ());
        self.remember(result)
    }

    // --- Habit CRUD ---

    pub async fn create_habit(&self, data: CreateHabit) -> Result<Habit, StoreError> {
        let result = self.do_create_habit(data).await;
        self.remember(result)
    }

    async fn do_create_habit(&self, data: CreateHabit) -> Result<Habit, StoreError> {
        if data.title.trim().is_empty() {
            return Err(StoreError::TitleRequired);
        }
        let session = self.session.require_session()?;

        let row = NewHabitRow {
            user_id: session.user.id,
            title: data.title.trim(),
            description: &data.description,
            frequency: data.frequency,
            is_active: true,
        };
        let created: Habit = self
            .backend
            .table("habits")
            .with_auth(&session.access_token)?
            .insert_single(&row)
            .await?;

        // Most-recent-first ordering: new habits go to the front.
        self.habits.write().unwrap().insert(0, created.clone());
        Ok(created)
    }

    pub async fn update_habit(&self, id: Uuid, changes: UpdateHabit) -> Result<Habit, StoreError> {
        let result = self.do_update_habit(id, changes).await;
        self.remember(result)
    }

    async fn do_update_habit(&self, id: Uuid, changes: UpdateHabit) -> Result<Habit, StoreError> {
        let session = self.session.require_session()?;
        if !self.habits.read().unwrap().iter().any(|h| h.id == id) {
            return Err(StoreError::HabitNotFound);
        }

        let updated: Habit = self
            .backend
            .table("habits")
            .with_auth(&session.access_token)?
            .eq("id", &id.to_string())
            .update_single(&changes)
            .await?;

        let mut habits = self.habits.write().unwrap();
        if let Some(entry) = habits.iter_mut().find(|h| h.id == id) {
            *entry = updated.clone();
        }
        Ok(updated)
    }

    pub async fn delete_habit(&self, id: Uuid) -> Result<(), StoreError> {
        let result = self.do_delete_habit(id).await;
        self.remember(result)
    }

    async fn do_delete_habit(&self, id: Uuid) -> Result<(), StoreError> {
        let session = self.session.require_session()?;
        if !self.habits.read().unwrap().iter().any(|h| h.id == id) {
            return Err(StoreError::HabitNotFound);
        }

        self.backend
            .table("habits")
            .with_auth(&session.access_token)?
            .eq("id", &id.to_string())
            .delete()
            .await?;

        self.habits.write().unwrap().retain(|h| h.id != id);
        Ok(())
    }

    /// Flip the active flag via a partial update.
    pub async fn toggle_habit_status(&self, id: Uuid) -> Result<Habit, StoreError> {
        let is_active = {
            let habits = self.habits.read().unwrap();
            match habits.iter().find(|h| h.id == id) {
                Some(habit) => habit.is_active,
                None => return self.remember(Err(StoreError::HabitNotFound)),
            }
        };
        self.update_habit(
            id,
            UpdateHabit {
                is_active: Some(!is_active),
                ..Default::default()
            },
        )
        .await
    }

    // --- Completions ---

    /// Mark a habit completed for today. At most one completion may
    /// exist per (habit, day); the check runs against the local cache,
    /// so a concurrent client can still race past it and the server
    /// takes the last write. Side effect order on success: cache
    /// insert, streak re-fetch, achievement re-evaluation; the latter
    /// two never roll back the completion.
    pub async fn mark_habit_completed(
        &self,
        habit_id: Uuid,
        notes: Option<String>,
    ) -> Result<HabitCompletion, StoreError> {
        let result = self.do_mark_habit_completed(habit_id, notes).await;
        self.remember(result)
    }

    async fn do_mark_habit_completed(
        &self,
        habit_id: Uuid,
        notes: Option<String>,
    ) -> Result<HabitCompletion, StoreError> {
        let session = self.session.require_session()?;
        if !self.habits.read().unwrap().iter().any(|h| h.id == habit_id) {
            return Err(StoreError::HabitNotFound);
        }

        let today = Local::now().date_naive();
        let already_completed = self
            .completions
            .read()
            .unwrap()
            .iter()
            .any(|c| c.habit_id == habit_id && c.completed_date == today);
        if already_completed {
            return Err(StoreError::AlreadyCompletedToday);
        }

        let row = NewCompletionRow {
            habit_id,
            user_id: session.user.id,
            completed_date: today,
            notes: notes.as_deref(),
        };
        let completion: HabitCompletion = self
            .backend
            .table("habit_completions")
            .with_auth(&session.access_token)?
            .insert_single(&row)
            .await?;

        self.completions.write().unwrap().insert(0, completion.clone());

        // The server owns streak math; pick up its recomputation.
        if let Err(err) = self.do_fetch_streaks().await {
            warn!("streak refresh after completion failed: {}", err);
        }
        if let Some(achievements) = &self.achievements {
            if let Err(err) = achievements.check_for_new_achievements().await {
                warn!("achievement check after completion failed: {}", err);
            }
        }

        Ok(completion)
    }

    /// Remove today's completion only; there is no retroactive unmark.
    pub async fn unmark_habit_completed(&self, habit_id: Uuid) -> Result<(), StoreError> {
        let result = self.do_unmark_habit_completed(habit_id).await;
        self.remember(result)
    }

    async fn do_unmark_habit_completed(&self, habit_id: Uuid) -> Result<(), StoreError> {
        let session = self.session.require_session()?;
        let today = Local::now().date_naive();

        let completion_id = {
            let completions = self.completions.read().unwrap();
            completions
                .iter()
                .find(|c| c.habit_id == habit_id && c.completed_date == today)
                .map(|c| c.id)
        };
        let completion_id = completion_id.ok_or(StoreError::NotCompletedToday)?;

        self.backend
            .table("habit_completions")
            .with_auth(&session.access_token)?
            .eq("id", &completion_id.to_string())
            .delete()
            .await?;

        self.completions
            .write()
            .unwrap()
            .retain(|c| c.id != completion_id);

        if let Err(err) = self.do_fetch_streaks().await {
            warn!("streak refresh after unmark failed: {}", err);
        }
        Ok(())
    }

    /// True when the habit has a completion cached for today.
    pub fn is_completed_today(&self, habit_id: Uuid) -> bool {
        let today = Local::now().date_naive();
        self.completions
            .read()
            .unwrap()
            .iter()
            .any(|c| c.habit_id == habit_id && c.completed_date == today)
    }

    // --- Derived projection ---

    /// Filtered and sorted habit list. Recomputed from the caches and
    /// the query on every call; identical inputs yield identical output.
    pub fn filtered_and_sorted_habits(&self, query: &HabitQuery) -> Vec<HabitWithStreak> {
        let search = query.search.trim().to_lowercase();
        let mut rows: Vec<HabitWithStreak> = self
            .habits_with_streaks()
            .into_iter()
            .filter(|row| match query.status {
                StatusFilter::All => true,
                StatusFilter::Active => row.habit.is_active,
                StatusFilter::Inactive => !row.habit.is_active,
            })
            .filter(|row| match query.frequency {
                Some(frequency) => row.habit.frequency == frequency,
                None => true,
            })
            .filter(|row| {
                search.is_empty()
                    || row.habit.title.to_lowercase().contains(&search)
                    || row.habit.description.to_lowercase().contains(&search)
            })
            .collect();

        rows.sort_by(|a, b| {
            let ordering = match query.sort_key {
                SortKey::Name => a
                    .habit
                    .title
                    .to_lowercase()
                    .cmp(&b.habit.title.to_lowercase()),
                SortKey::Frequency => a.habit.frequency.cmp(&b.habit.frequency),
                SortKey::Status => b.habit.is_active.cmp(&a.habit.is_active),
                SortKey::CurrentStreak => a.current_streak().cmp(&b.current_streak()),
                SortKey::BestStreak => a.best_streak().cmp(&b.best_streak()),
                SortKey::CreatedAt => a.habit.created_at.cmp(&b.habit.created_at),
            };
            match query.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        });

        rows
    }

    // --- Housekeeping ---

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().unwrap().clone()
    }

    pub fn clear_error(&self) {
        *self.last_error.write().unwrap() = None;
    }

    /// Drop all per-session state (sign-out).
    pub fn reset(&self) {
        self.habits.write().unwrap().clear();
        self.completions.write().unwrap().clear();
        self.streaks.write().unwrap().clear();
        self.clear_error();
    }

    fn remember<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if let Err(err) = &result {
            *self.last_error.write().unwrap() = Some(err.to_string());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::Duration;

    fn store_with(habits: Vec<Habit>, streaks: Vec<HabitStreak>) -> HabitStore {
        let config = Config::new("http://localhost:54321", "test-key").unwrap();
        let backend = Arc::new(Backend::new(config).unwrap());
        let session = Arc::new(SessionManager::new(backend.auth.clone()));
        let store = HabitStore::new(backend, session, None);
        *store.habits.write().unwrap() = habits;
        *store.streaks.write().unwrap() = streaks;
        store
    }

    fn habit(title: &str, frequency: Frequency, is_active: bool, days_ago: i64) -> Habit {
        let created = Utc::now() - Duration::days(days_ago);
        Habit {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: title.to_string(),
            description: format!("{} every day", title),
            frequency,
            is_active,
            created_at: created,
            updated_at: created,
        }
    }

    fn streak_for(habit: &Habit, current: i32, best: i32) -> HabitStreak {
        HabitStreak {
            id: Uuid::new_v4(),
            habit_id: habit.id,
            current_streak: current,
            best_streak: best,
            last_completed_date: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn sorts_by_name_ascending() {
        let store = store_with(
            vec![
                habit("Run", Frequency::Daily, true, 1),
                habit("meditate", Frequency::Daily, true, 2),
                habit("Journal", Frequency::Daily, true, 3),
            ],
            vec![],
        );
        let query = HabitQuery {
            sort_key: SortKey::Name,
            direction: SortDirection::Ascending,
            ..Default::default()
        };
        let titles: Vec<String> = store
            .filtered_and_sorted_habits(&query)
            .into_iter()
            .map(|r| r.habit.title)
            .collect();
        assert_eq!(titles, vec!["Journal", "meditate", "Run"]);
    }

    #[test]
    fn frequency_sorts_daily_before_weekly_before_monthly() {
        let store = store_with(
            vec![
                habit("Budget", Frequency::Monthly, true, 1),
                habit("Run", Frequency::Daily, true, 2),
                habit("Review", Frequency::Weekly, true, 3),
            ],
            vec![],
        );
        let query = HabitQuery {
            sort_key: SortKey::Frequency,
            direction: SortDirection::Ascending,
            ..Default::default()
        };
        let frequencies: Vec<Frequency> = store
            .filtered_and_sorted_habits(&query)
            .into_iter()
            .map(|r| r.habit.frequency)
            .collect();
        assert_eq!(
            frequencies,
            vec![Frequency::Daily, Frequency::Weekly, Frequency::Monthly]
        );
    }

    #[test]
    fn status_sort_puts_active_first() {
        let store = store_with(
            vec![
                habit("Paused", Frequency::Daily, false, 1),
                habit("Running", Frequency::Daily, true, 2),
            ],
            vec![],
        );
        let query = HabitQuery {
            sort_key: SortKey::Status,
            direction: SortDirection::Ascending,
            ..Default::default()
        };
        let rows = store.filtered_and_sorted_habits(&query);
        assert!(rows[0].habit.is_active);
        assert!(!rows[1].habit.is_active);
    }

    #[test]
    fn sorts_by_current_streak_descending() {
        let short = habit("Short", Frequency::Daily, true, 1);
        let long = habit("Long", Frequency::Daily, true, 2);
        let streaks = vec![streak_for(&short, 2, 5), streak_for(&long, 9, 12)];
        let store = store_with(vec![short, long], streaks);

        let query = HabitQuery {
            sort_key: SortKey::CurrentStreak,
            direction: SortDirection::Descending,
            ..Default::default()
        };
        let rows = store.filtered_and_sorted_habits(&query);
        assert_eq!(rows[0].habit.title, "Long");
        assert_eq!(rows[0].current_streak(), 9);
        assert_eq!(rows[1].current_streak(), 2);
    }

    #[test]
    fn search_matches_title_and_description_case_insensitively() {
        let mut water = habit("Drink Water", Frequency::Daily, true, 1);
        water.description = "Eight glasses".to_string();
        let store = store_with(vec![water, habit("Run", Frequency::Daily, true, 2)], vec![]);

        let by_title = HabitQuery {
            search: "WATER".to_string(),
            ..Default::default()
        };
        assert_eq!(store.filtered_and_sorted_habits(&by_title).len(), 1);

        let by_description = HabitQuery {
            search: "glasses".to_string(),
            ..Default::default()
        };
        assert_eq!(store.filtered_and_sorted_habits(&by_description).len(), 1);

        let no_match = HabitQuery {
            search: "cycling".to_string(),
            ..Default::default()
        };
        assert!(store.filtered_and_sorted_habits(&no_match).is_empty());
    }

    #[test]
    fn status_and_frequency_filters_combine() {
        let store = store_with(
            vec![
                habit("Run", Frequency::Daily, true, 1),
                habit("Paused run", Frequency::Daily, false, 2),
                habit("Review", Frequency::Weekly, true, 3),
            ],
            vec![],
        );
        let query = HabitQuery {
            status: StatusFilter::Active,
            frequency: Some(Frequency::Daily),
            ..Default::default()
        };
        let rows = store.filtered_and_sorted_habits(&query);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].habit.title, "Run");
    }

    #[test]
    fn projection_is_idempotent_for_unchanged_inputs() {
        let a = habit("Run", Frequency::Daily, true, 1);
        let b = habit("Read", Frequency::Weekly, false, 2);
        let streaks = vec![streak_for(&a, 3, 4)];
        let store = store_with(vec![a, b], streaks);

        let query = HabitQuery {
            sort_key: SortKey::BestStreak,
            direction: SortDirection::Descending,
            ..Default::default()
        };
        let first = store.filtered_and_sorted_habits(&query);
        let second = store.filtered_and_sorted_habits(&query);
        assert_eq!(first, second);
    }
}
