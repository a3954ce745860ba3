use chrono::{Duration, Local};
use habitflow::config::Config;
use habitflow::habits::{CreateHabit, Frequency, HabitStore, UpdateHabit};
use habitflow::session::SessionManager;
use habitflow::{Backend, StoreError};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USER_ID: &str = "6f2d6a6a-9a8e-4a7e-8a37-2e6d4f1b5c3d";
const HABIT_ID: &str = "11111111-2222-3333-4444-555555555555";

fn habit_row(id: &str, title: &str) -> serde_json::Value {
    json!({
        "id": id,
        "user_id": USER_ID,
        "title": title,
        "description": "Stay hydrated",
        "frequency": "daily",
        "is_active": true,
        "created_at": "2026-07-01T08:00:00Z",
        "updated_at": "2026-07-01T08:00:00Z"
    })
}

fn completion_row(id: &str, habit_id: &str, date: &str) -> serde_json::Value {
    json!({
        "id": id,
        "habit_id": habit_id,
        "user_id": USER_ID,
        "completed_date": date,
        "notes": null,
        "created_at": format!("{}T10:00:00Z", date)
    })
}

fn streak_row(habit_id: &str, current: i32, best: i32) -> serde_json::Value {
    json!({
        "id": Uuid::new_v4(),
        "habit_id": habit_id,
        "current_streak": current,
        "best_streak": best,
        "last_completed_date": null,
        "updated_at": "2026-07-01T08:00:00Z"
    })
}

async fn mount_sign_in(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "user-token",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "refresh-token",
            "user": { "id": USER_ID, "email": "test@example.com" }
        })))
        .mount(server)
        .await;
}

async fn signed_in_store(server: &MockServer) -> HabitStore {
    mount_sign_in(server).await;
    let config = Config::new(&server.uri(), "test-key").unwrap();
    let backend = Arc::new(Backend::new(config).unwrap());
    let session = Arc::new(SessionManager::new(backend.auth.clone()));
    session
        .sign_in("test@example.com", "password123")
        .await
        .unwrap();
    HabitStore::new(backend, session, None)
}

#[tokio::test]
async fn fetch_habits_replaces_cache_wholesale() {
    let server = MockServer::start().await;
    let store = signed_in_store(&server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/habits"))
        .and(query_param("user_id", &format!("eq.{}", USER_ID)))
        .and(query_param("order", "created_at.desc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            habit_row(HABIT_ID, "Drink Water"),
            habit_row("99999999-8888-7777-6666-555555555555", "Read"),
        ])))
        .mount(&server)
        .await;

    store.fetch_habits().await.unwrap();
    let habits = store.habits();
    assert_eq!(habits.len(), 2);
    assert_eq!(habits[0].title, "Drink Water");
    assert_eq!(habits[0].frequency, Frequency::Daily);
}

#[tokio::test]
async fn unauthenticated_calls_fail_and_record_the_error() {
    let server = MockServer::start().await;
    let config = Config::new(&server.uri(), "test-key").unwrap();
    let backend = Arc::new(Backend::new(config).unwrap());
    let session = Arc::new(SessionManager::new(backend.auth.clone()));
    let store = HabitStore::new(backend, session, None);

    let err = store.fetch_habits().await.unwrap_err();
    assert!(matches!(err, StoreError::NotAuthenticated));
    assert_eq!(store.last_error().unwrap(), "User not authenticated");

    store.clear_error();
    assert!(store.last_error().is_none());
}

#[tokio::test]
async fn failed_fetch_leaves_previous_cache_untouched() {
    let server = MockServer::start().await;
    let store = signed_in_store(&server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/habits"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([habit_row(HABIT_ID, "Drink Water")])),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/habits"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "code": "503", "message": "service unavailable", "details": null, "hint": null
        })))
        .mount(&server)
        .await;

    store.fetch_habits().await.unwrap();
    assert_eq!(store.habits().len(), 1);

    let err = store.fetch_habits().await.unwrap_err();
    assert!(matches!(err, StoreError::Service(_)));
    assert_eq!(store.habits().len(), 1, "stale cache beats silently empty");
}

#[tokio::test]
async fn create_habit_requires_title_and_prepends_result() {
    let server = MockServer::start().await;
    let store = signed_in_store(&server).await;

    let err = store
        .create_habit(CreateHabit {
            title: "   ".to_string(),
            description: String::new(),
            frequency: Frequency::Daily,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::TitleRequired));

    Mock::given(method("GET"))
        .and(path("/rest/v1/habits"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([habit_row(HABIT_ID, "Read")])),
        )
        .mount(&server)
        .await;
    store.fetch_habits().await.unwrap();

    Mock::given(method("POST"))
        .and(path("/rest/v1/habits"))
        .respond_with(ResponseTemplate::new(201).set_body_json(habit_row(
            "99999999-8888-7777-6666-555555555555",
            "Meditate",
        )))
        .mount(&server)
        .await;

    let created = store
        .create_habit(CreateHabit {
            title: "Meditate".to_string(),
            description: "Ten minutes".to_string(),
            frequency: Frequency::Daily,
        })
        .await
        .unwrap();
    assert_eq!(created.title, "Meditate");

    let habits = store.habits();
    assert_eq!(habits.len(), 2);
    assert_eq!(habits[0].title, "Meditate", "new habit goes to the front");
}

#[tokio::test]
async fn update_habit_replaces_entry_in_place() {
    let server = MockServer::start().await;
    let store = signed_in_store(&server).await;

    let other_id = "99999999-8888-7777-6666-555555555555";
    Mock::given(method("GET"))
        .and(path("/rest/v1/habits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            habit_row(HABIT_ID, "Drink Water"),
            habit_row(other_id, "Read"),
        ])))
        .mount(&server)
        .await;
    store.fetch_habits().await.unwrap();

    let mut updated = habit_row(other_id, "Read books");
    updated["is_active"] = json!(false);
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/habits"))
        .and(query_param("id", &format!("eq.{}", other_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(updated))
        .mount(&server)
        .await;

    store
        .update_habit(
            other_id.parse().unwrap(),
            UpdateHabit {
                title: Some("Read books".to_string()),
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let habits = store.habits();
    assert_eq!(habits.len(), 2);
    assert_eq!(habits[1].title, "Read books", "position is preserved");
    assert!(!habits[1].is_active);

    let missing = Uuid::new_v4();
    let err = store
        .update_habit(missing, UpdateHabit::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::HabitNotFound));
}

#[tokio::test]
async fn duplicate_same_day_completion_is_rejected_with_single_cache_entry() {
    let server = MockServer::start().await;
    let store = signed_in_store(&server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/habits"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([habit_row(HABIT_ID, "Drink Water")])),
        )
        .mount(&server)
        .await;
    store.fetch_habits().await.unwrap();

    let today = Local::now().date_naive().to_string();
    Mock::given(method("POST"))
        .and(path("/rest/v1/habit_completions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(completion_row(
            "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee",
            HABIT_ID,
            &today,
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/habit_streaks"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([streak_row(HABIT_ID, 1, 1)])),
        )
        .mount(&server)
        .await;

    let habit_id: Uuid = HABIT_ID.parse().unwrap();
    store.mark_habit_completed(habit_id, None).await.unwrap();

    let err = store.mark_habit_completed(habit_id, None).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyCompletedToday));

    let today_entries: Vec<_> = store
        .completions()
        .into_iter()
        .filter(|c| c.habit_id == habit_id && c.completed_date.to_string() == today)
        .collect();
    assert_eq!(today_entries.len(), 1);
}

#[tokio::test]
async fn completion_refreshes_streaks_keyed_to_the_habit() {
    let server = MockServer::start().await;
    let store = signed_in_store(&server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/habits"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([habit_row(HABIT_ID, "Drink Water")])),
        )
        .mount(&server)
        .await;
    store.fetch_habits().await.unwrap();

    let today = Local::now().date_naive().to_string();
    Mock::given(method("POST"))
        .and(path("/rest/v1/habit_completions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(completion_row(
            "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee",
            HABIT_ID,
            &today,
        )))
        .mount(&server)
        .await;
    // The server is the source of truth for streak math: after three
    // consecutive days it reports a current streak of 3.
    Mock::given(method("GET"))
        .and(path("/rest/v1/habit_streaks"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([streak_row(HABIT_ID, 3, 3)])),
        )
        .mount(&server)
        .await;

    let habit_id: Uuid = HABIT_ID.parse().unwrap();
    store.mark_habit_completed(habit_id, None).await.unwrap();

    let rows = store.habits_with_streaks();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].habit.id, habit_id);
    assert_eq!(rows[0].current_streak(), 3);
}

#[tokio::test]
async fn unmark_removes_only_todays_completion() {
    let server = MockServer::start().await;
    let store = signed_in_store(&server).await;

    let today = Local::now().date_naive();
    let yesterday = today - Duration::days(1);
    let today_id = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee";

    Mock::given(method("GET"))
        .and(path("/rest/v1/habit_completions"))
        .and(query_param("select", "*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            completion_row(today_id, HABIT_ID, &today.to_string()),
            completion_row(
                "ffffffff-0000-1111-2222-333333333333",
                HABIT_ID,
                &yesterday.to_string()
            ),
        ])))
        .mount(&server)
        .await;
    store.fetch_completions().await.unwrap();
    assert_eq!(store.completions().len(), 2);

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/habit_completions"))
        .and(query_param("id", &format!("eq.{}", today_id)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/habit_streaks"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([streak_row(HABIT_ID, 0, 3)])),
        )
        .mount(&server)
        .await;

    let habit_id: Uuid = HABIT_ID.parse().unwrap();
    store.unmark_habit_completed(habit_id).await.unwrap();

    let remaining = store.completions();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].completed_date, yesterday);

    // A second unmark has nothing to remove.
    let err = store.unmark_habit_completed(habit_id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotCompletedToday));
}

#[tokio::test]
async fn delete_habit_removes_it_from_the_cache() {
    let server = MockServer::start().await;
    let store = signed_in_store(&server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/habits"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([habit_row(HABIT_ID, "Drink Water")])),
        )
        .mount(&server)
        .await;
    store.fetch_habits().await.unwrap();

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/habits"))
        .and(query_param("id", &format!("eq.{}", HABIT_ID)))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    store
        .delete_habit(HABIT_ID.parse().unwrap())
        .await
        .unwrap();
    assert!(store.habits().is_empty());
}

#[tokio::test]
async fn initialize_data_loads_all_three_collections() {
    let server = MockServer::start().await;
    let store = signed_in_store(&server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/habits"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([habit_row(HABIT_ID, "Drink Water")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/habit_completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([completion_row(
            "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee",
            HABIT_ID,
            "2026-08-01"
        )])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/habit_streaks"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([streak_row(HABIT_ID, 2, 4)])),
        )
        .mount(&server)
        .await;

    store.initialize_data().await.unwrap();
    assert_eq!(store.habits().len(), 1);
    assert_eq!(store.completions().len(), 1);
    assert_eq!(store.streaks().len(), 1);

    store.reset();
    assert!(store.habits().is_empty());
    assert!(store.completions().is_empty());
    assert!(store.streaks().is_empty());
}
