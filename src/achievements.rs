//! Achievement catalog and progress evaluation
//!
//! The catalog is static and server-defined; earned rows are written by
//! a server-side process. This store only reads both and derives
//! display state: whether each achievement is earned and, if not, how
//! far along the user is. Re-evaluation after a completion is a
//! re-fetch plus a recompute; the client never decides "newly earned"
//! itself.

use crate::error::StoreError;
use crate::session::SessionManager;
use crate::Backend;
use chrono::{DateTime, Utc};
use habitflow_postgrest::SortOrder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AchievementKind {
    Streak,
    Completion,
    Consistency,
    Milestone,
}

/// Which tracked statistic an achievement's threshold applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementType {
    CurrentStreak,
    BestStreak,
    TotalCompletions,
    ConsecutiveDays,
    HabitsCount,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Achievement {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub icon: String,
    #[serde(rename = "type")]
    pub kind: AchievementKind,
    pub requirement_type: RequirementType,
    pub requirement_value: i64,
    pub points: i32,
    pub color: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserAchievement {
    pub id: Uuid,
    pub user_id: Uuid,
    pub achievement_id: Uuid,
    pub habit_id: Option<Uuid>,
    pub earned_at: DateTime<Utc>,
    pub progress_value: Option<i64>,
    pub created_at: DateTime<Utc>,
    /// Populated by the embedded select against the catalog.
    pub achievement: Option<Achievement>,
}

/// Aggregate statistics achievement progress is measured against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserStats {
    pub total_completions: i64,
    pub active_habits: i64,
    pub max_current_streak: i64,
    pub max_best_streak: i64,
}

impl UserStats {
    fn progress_for(&self, requirement: RequirementType) -> i64 {
        match requirement {
            RequirementType::TotalCompletions => self.total_completions,
            RequirementType::HabitsCount => self.active_habits,
            RequirementType::CurrentStreak => self.max_current_streak,
            // Consecutive days are tracked server-side through streaks.
            RequirementType::ConsecutiveDays | RequirementType::BestStreak => {
                self.max_best_streak
            }
        }
    }
}

/// A catalog entry merged with the user's earned/progress state.
#[derive(Debug, Clone, PartialEq)]
pub struct AchievementWithProgress {
    pub achievement: Achievement,
    pub is_earned: bool,
    pub earned_at: Option<DateTime<Utc>>,
    pub progress_value: Option<i64>,
    pub habit_id: Option<Uuid>,
    pub current_progress: i64,
    /// 0–100, capped at 100.
    pub progress_percentage: f64,
}

#[derive(Deserialize)]
struct IdRow {
    #[allow(dead_code)]
    id: Uuid,
}

#[derive(Deserialize)]
struct StreakCountsRow {
    current_streak: i64,
    best_streak: i64,
}

pub struct AchievementStore {
    backend: Arc<Backend>,
    session: Arc<SessionManager>,
    achievements: RwLock<Vec<Achievement>>,
    user_achievements: RwLock<Vec<UserAchievement>>,
    stats: RwLock<UserStats>,
    last_error: RwLock<Option<String>>,
}

impl AchievementStore {
    pub fn new(backend: Arc<Backend>, session: Arc<SessionManager>) -> Self {
        Self {
            backend,
            session,
            achievements: RwLock::new(Vec::new()),
            user_achievements: RwLock::new(Vec::new()),
            stats: RwLock::new(UserStats::default()),
            last_error: RwLock::new(None),
        }
    }

    // --- Cache views ---

    pub fn achievements(&self) -> Vec<Achievement> {
        self.achievements.read().unwrap().clone()
    }

    pub fn user_achievements(&self) -> Vec<UserAchievement> {
        self.user_achievements.read().unwrap().clone()
    }

    pub fn user_stats(&self) -> UserStats {
        *self.stats.read().unwrap()
    }

    /// Earned rows whose catalog entry was resolved by the join.
    pub fn earned(&self) -> Vec<UserAchievement> {
        self.user_achievements
            .read()
            .unwrap()
            .iter()
            .filter(|ua| ua.achievement.is_some())
            .cloned()
            .collect()
    }

    pub fn total_points(&self) -> i64 {
        self.earned()
            .iter()
            .filter_map(|ua| ua.achievement.as_ref())
            .map(|a| a.points as i64)
            .sum()
    }

    /// The five most recently earned achievements.
    pub fn recent(&self) -> Vec<UserAchievement> {
        let mut earned = self.earned();
        earned.sort_by(|a, b| b.earned_at.cmp(&a.earned_at));
        earned.truncate(5);
        earned
    }

    pub fn habit_achievements(&self, habit_id: Uuid) -> Vec<UserAchievement> {
        self.user_achievements
            .read()
            .unwrap()
            .iter()
            .filter(|ua| ua.habit_id == Some(habit_id))
            .cloned()
            .collect()
    }

    /// Catalog merged with earned state and current progress.
    pub fn achievements_with_progress(&self) -> Vec<AchievementWithProgress> {
        let stats = self.user_stats();
        let user_achievements = self.user_achievements.read().unwrap();
        self.achievements
            .read()
            .unwrap()
            .iter()
            .map(|achievement| {
                let earned = user_achievements
                    .iter()
                    .find(|ua| ua.achievement_id == achievement.id);
                let current_progress = stats.progress_for(achievement.requirement_type);
                let progress_percentage = if achievement.requirement_value <= 0 {
                    100.0
                } else {
                    (current_progress as f64 / achievement.requirement_value as f64 * 100.0)
                        .min(100.0)
                };
                AchievementWithProgress {
                    achievement: achievement.clone(),
                    is_earned: earned.is_some(),
                    earned_at: earned.map(|ua| ua.earned_at),
                    progress_value: earned.and_then(|ua| ua.progress_value),
                    habit_id: earned.and_then(|ua| ua.habit_id),
                    current_progress,
                    progress_percentage,
                }
            })
            .collect()
    }

    pub fn by_kind(&self, kind: AchievementKind) -> Vec<AchievementWithProgress> {
        self.achievements_with_progress()
            .into_iter()
            .filter(|a| a.achievement.kind == kind)
            .collect()
    }

    /// Derived grouping, not stored state.
    pub fn grouped_by_kind(&self) -> BTreeMap<AchievementKind, Vec<AchievementWithProgress>> {
        let mut grouped: BTreeMap<AchievementKind, Vec<AchievementWithProgress>> = BTreeMap::new();
        for entry in self.achievements_with_progress() {
            grouped.entry(entry.achievement.kind).or_default().push(entry);
        }
        grouped
    }

    // --- Fetches ---

    /// Fetch the active catalog, smallest thresholds first.
    pub async fn fetch_achievements(&self) -> Result<(), StoreError> {
        let result = self.do_fetch_achievements().await;
        self.remember(result)
    }

    async fn do_fetch_achievements(&self) -> Result<(), StoreError> {
        let session = self.session.require_session()?;
        let rows = self
            .backend
            .table("achievements")
            .with_auth(&session.access_token)?
            .select("*")
            .eq("is_active", "true")
            .order("requirement_value", SortOrder::Ascending)
            .execute::<Achievement>()
            .await?;
        debug!(count = rows.len(), "achievement catalog refreshed");
        *self.achievements.write().unwrap() = rows;
        Ok(())
    }

    pub async fn fetch_user_achievements(&self) -> Result<(), StoreError> {
        let result = self.do_fetch_user_achievements().await;
        self.remember(result)
    }

    async fn do_fetch_user_achievements(&self) -> Result<(), StoreError> {
        let session = self.session.require_session()?;
        let rows = self
            .backend
            .table("user_achievements")
            .with_auth(&session.access_token)?
            .select("*,achievement:achievements(*)")
            .eq("user_id", &session.user.id.to_string())
            .order("earned_at", SortOrder::Descending)
            .execute::<UserAchievement>()
            .await?;
        debug!(count = rows.len(), "earned achievements refreshed");
        *self.user_achievements.write().unwrap() = rows;
        Ok(())
    }

    /// Recompute the aggregate statistics progress is measured against.
    pub async fn refresh_progress(&self) -> Result<(), StoreError> {
        let result = self.do_refresh_progress().await;
        self.remember(result)
    }

    async fn do_refresh_progress(&self) -> Result<(), StoreError> {
        let session = self.session.require_session()?;
        let user_id = session.user.id.to_string();
        let token = &session.access_token;

        let completions_query = self
            .backend
            .table("habit_completions")
            .with_auth(token)?
            .select("id")
            .eq("user_id", &user_id);
        let habits_query = self
            .backend
            .table("habits")
            .with_auth(token)?
            .select("id")
            .eq("user_id", &user_id)
            .eq("is_active", "true");
        let streaks_query = self
            .backend
            .table("habit_streaks")
            .with_auth(token)?
            .select("current_streak,best_streak")
            .eq("user_id", &user_id);

        let (completions, habits, streaks) = tokio::try_join!(
            completions_query.execute::<IdRow>(),
            habits_query.execute::<IdRow>(),
            streaks_query.execute::<StreakCountsRow>(),
        )?;

        let stats = UserStats {
            total_completions: completions.len() as i64,
            active_habits: habits.len() as i64,
            max_current_streak: streaks.iter().map(|s| s.current_streak).max().unwrap_or(0),
            max_best_streak: streaks.iter().map(|s| s.best_streak).max().unwrap_or(0),
        };
        debug!(?stats, "achievement progress stats refreshed");
        *self.stats.write().unwrap() = stats;
        Ok(())
    }

    /// Triggered after every completion event: pick up rows the server
    /// may have just written, then recompute progress for display.
    pub async fn check_for_new_achievements(&self) -> Result<(), StoreError> {
        self.fetch_user_achievements().await?;
        self.refresh_progress().await
    }

    /// Catalog and earned rows fetched concurrently, then progress.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        let result = tokio::try_join!(self.do_fetch_achievements(), self.do_fetch_user_achievements())
            .map(|_| ());
        self.remember(result)?;
        self.refresh_progress().await
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().unwrap().clone()
    }

    pub fn clear_error(&self) {
        *self.last_error.write().unwrap() = None;
    }

    /// Drop all per-session state (sign-out).
    pub fn reset(&self) {
        self.achievements.write().unwrap().clear();
        self.user_achievements.write().unwrap().clear();
        *self.stats.write().unwrap() = UserStats::default();
        self.clear_error();
    }

    fn remember<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if let Err(err) = &result {
            *self.last_error.write().unwrap() = Some(err.to_string());
        }
        result
    }
}
