//! Analytics aggregation
//!
//! Pure functions deriving weekly/monthly series, per-habit analytics
//! and dashboard statistics from snapshots of the repository caches.
//! Everything takes an explicit `today` so results are deterministic and
//! testable; callers pass the local calendar date. Weeks start on
//! Sunday, and all window math uses local dates; mixing in UTC here
//! would drift results by a day around midnight.

use crate::habits::{Frequency, Habit, HabitCompletion, HabitStreak, HabitWithStreak};
use chrono::{Datelike, Duration, NaiveDate};
use uuid::Uuid;

pub const DEFAULT_WEEKS: u32 = 8;
pub const DEFAULT_MONTHS: u32 = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyCompletion {
    /// Label like "Jul 27-2" (short month, start and end day of month).
    pub week: String,
    pub completions: u32,
    pub expected: u32,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyCompletion {
    /// Label like "Aug 2026".
    pub month: String,
    pub completions: u32,
    pub expected: u32,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HabitAnalytics {
    pub habit: Habit,
    pub streak: Option<HabitStreak>,
    pub weekly_completions: Vec<WeeklyCompletion>,
    pub monthly_completions: Vec<MonthlyCompletion>,
    pub total_completions: u32,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardStats {
    pub total_active_habits: u32,
    pub total_completions_today: u32,
    pub average_streak: f64,
    pub best_streak: i32,
    pub weekly_completion_rate: f64,
    pub monthly_completion_rate: f64,
    pub total_completions: u32,
}

/// Per-day completion counts for the trailing window, chart-ready.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionChartData {
    pub labels: Vec<String>,
    pub data: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreakChartData {
    pub labels: Vec<String>,
    pub current_streaks: Vec<i32>,
    pub best_streaks: Vec<i32>,
}

/// Start of the Sunday-based week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_sunday() as i64)
}

/// First day of the month `months_back` months before `today`'s month.
fn month_start(today: NaiveDate, months_back: u32) -> NaiveDate {
    let total = today.year() * 12 + today.month0() as i32 - months_back as i32;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1).expect("first of month is always a valid date")
}

fn days_in_month(start: NaiveDate) -> u32 {
    let next = month_start(start, 0)
        .checked_add_months(chrono::Months::new(1))
        .expect("month arithmetic stays in range");
    (next - start).num_days() as u32
}

/// Completions a habit is expected to have within one week.
pub fn weekly_expected(frequency: Frequency) -> u32 {
    match frequency {
        Frequency::Daily => 7,
        Frequency::Weekly => 1,
        Frequency::Monthly => 0,
    }
}

/// Completions a habit is expected to have within one month.
pub fn monthly_expected(frequency: Frequency, days_in_month: u32) -> u32 {
    match frequency {
        Frequency::Daily => days_in_month,
        Frequency::Weekly => days_in_month.div_ceil(7),
        Frequency::Monthly => 1,
    }
}

fn percentage(completions: u32, expected: u32) -> f64 {
    if expected == 0 {
        0.0
    } else {
        completions as f64 / expected as f64 * 100.0
    }
}

fn count_in_window(
    completions: &[HabitCompletion],
    habit_id: Uuid,
    start: NaiveDate,
    end: NaiveDate,
) -> u32 {
    completions
        .iter()
        .filter(|c| c.habit_id == habit_id && c.completed_date >= start && c.completed_date <= end)
        .count() as u32
}

/// Completion series for the trailing `weeks` Sunday-start weeks ending
/// in the current week.
pub fn weekly_completions(
    habit: &Habit,
    completions: &[HabitCompletion],
    today: NaiveDate,
    weeks: u32,
) -> Vec<WeeklyCompletion> {
    let current_week = week_start(today);
    let expected = weekly_expected(habit.frequency);

    (0..weeks)
        .rev()
        .map(|back| {
            let start = current_week - Duration::weeks(back as i64);
            let end = start + Duration::days(6);
            let count = count_in_window(completions, habit.id, start, end);
            WeeklyCompletion {
                week: format!("{} {}-{}", start.format("%b"), start.day(), end.day()),
                completions: count,
                expected,
                percentage: percentage(count, expected),
            }
        })
        .collect()
}

/// Completion series for the trailing `months` calendar months ending in
/// the current month.
pub fn monthly_completions(
    habit: &Habit,
    completions: &[HabitCompletion],
    today: NaiveDate,
    months: u32,
) -> Vec<MonthlyCompletion> {
    (0..months)
        .rev()
        .map(|back| {
            let start = month_start(today, back);
            let days = days_in_month(start);
            let end = start + Duration::days(days as i64 - 1);
            let expected = monthly_expected(habit.frequency, days);
            let count = count_in_window(completions, habit.id, start, end);
            MonthlyCompletion {
                month: start.format("%b %Y").to_string(),
                completions: count,
                expected,
                percentage: percentage(count, expected),
            }
        })
        .collect()
}

/// Full analytics bundle for one habit.
pub fn habit_analytics(
    habit: &Habit,
    streaks: &[HabitStreak],
    completions: &[HabitCompletion],
    today: NaiveDate,
) -> HabitAnalytics {
    let total_completions = completions
        .iter()
        .filter(|c| c.habit_id == habit.id)
        .count() as u32;

    // Inclusive day count: a habit created today has one expected day.
    let days_since_creation = (today - habit.created_at.date_naive()).num_days() + 1;
    let expected_all_time = if days_since_creation <= 0 {
        0
    } else {
        match habit.frequency {
            Frequency::Daily => days_since_creation,
            Frequency::Weekly => (days_since_creation + 6) / 7,
            Frequency::Monthly => (days_since_creation + 29) / 30,
        }
    } as u32;

    HabitAnalytics {
        habit: habit.clone(),
        streak: streaks.iter().find(|s| s.habit_id == habit.id).cloned(),
        weekly_completions: weekly_completions(habit, completions, today, DEFAULT_WEEKS),
        monthly_completions: monthly_completions(habit, completions, today, DEFAULT_MONTHS),
        total_completions,
        completion_rate: percentage(total_completions, expected_all_time),
    }
}

/// Aggregate statistics across all habits for the dashboard.
pub fn dashboard_stats(
    habits: &[Habit],
    completions: &[HabitCompletion],
    streaks: &[HabitStreak],
    today: NaiveDate,
) -> DashboardStats {
    let active: Vec<&Habit> = habits.iter().filter(|h| h.is_active).collect();

    let total_completions_today = completions
        .iter()
        .filter(|c| c.completed_date == today)
        .count() as u32;

    let average_streak = if streaks.is_empty() {
        0.0
    } else {
        streaks.iter().map(|s| s.current_streak as f64).sum::<f64>() / streaks.len() as f64
    };
    let best_streak = streaks.iter().map(|s| s.best_streak).max().unwrap_or(0);

    let this_week_start = week_start(today);
    let this_week_end = this_week_start + Duration::days(6);
    let weekly_completions = completions
        .iter()
        .filter(|c| c.completed_date >= this_week_start && c.completed_date <= this_week_end)
        .count() as u32;
    let weekly_expected_total: u32 = active.iter().map(|h| weekly_expected(h.frequency)).sum();

    let this_month_start = month_start(today, 0);
    let month_days = days_in_month(this_month_start);
    let this_month_end = this_month_start + Duration::days(month_days as i64 - 1);
    let monthly_completions = completions
        .iter()
        .filter(|c| c.completed_date >= this_month_start && c.completed_date <= this_month_end)
        .count() as u32;
    let monthly_expected_total: u32 = active
        .iter()
        .map(|h| monthly_expected(h.frequency, month_days))
        .sum();

    DashboardStats {
        total_active_habits: active.len() as u32,
        total_completions_today,
        average_streak,
        best_streak,
        weekly_completion_rate: percentage(weekly_completions, weekly_expected_total),
        monthly_completion_rate: percentage(monthly_completions, monthly_expected_total),
        total_completions: completions.len() as u32,
    }
}

/// Daily completion counts for the trailing `days` window, optionally
/// restricted to one habit.
pub fn completion_chart_data(
    completions: &[HabitCompletion],
    habit_id: Option<Uuid>,
    today: NaiveDate,
    days: u32,
) -> CompletionChartData {
    let mut labels = Vec::with_capacity(days as usize);
    let mut data = Vec::with_capacity(days as usize);

    for back in (0..days).rev() {
        let date = today - Duration::days(back as i64);
        let count = completions
            .iter()
            .filter(|c| c.completed_date == date)
            .filter(|c| habit_id.map_or(true, |id| c.habit_id == id))
            .count() as u32;
        labels.push(format!("{} {}", date.format("%b"), date.day()));
        data.push(count);
    }

    CompletionChartData { labels, data }
}

/// Current/best streaks per habit, chart-ready.
pub fn streak_chart_data(habits_with_streaks: &[HabitWithStreak]) -> StreakChartData {
    StreakChartData {
        labels: habits_with_streaks
            .iter()
            .map(|h| h.habit.title.clone())
            .collect(),
        current_streaks: habits_with_streaks
            .iter()
            .map(HabitWithStreak::current_streak)
            .collect(),
        best_streaks: habits_with_streaks
            .iter()
            .map(HabitWithStreak::best_streak)
            .collect(),
    }
}
