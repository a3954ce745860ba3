use chrono::NaiveTime;
use habitflow::config::Config;
use habitflow::profile::{ProfileStore, ProfileUpdate};
use habitflow::session::SessionManager;
use habitflow::{Backend, StoreError};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USER_ID: &str = "6f2d6a6a-9a8e-4a7e-8a37-2e6d4f1b5c3d";

fn profile_row(first_name: Option<&str>) -> serde_json::Value {
    json!({
        "id": USER_ID,
        "email": "test@example.com",
        "first_name": first_name,
        "last_name": null,
        "phone": null,
        "avatar_url": null,
        "email_notifications": true,
        "daily_reminders": true,
        "weekly_reports": false,
        "push_notifications": true,
        "reminder_time": "09:00:00",
        "reminder_days": [1, 2, 3, 4, 5, 6, 7],
        "notification_sound": true,
        "quiet_hours_start": "22:00:00",
        "quiet_hours_end": "08:00:00",
        "timezone": "UTC",
        "created_at": "2026-07-01T08:00:00Z",
        "updated_at": "2026-07-01T08:00:00Z"
    })
}

async fn signed_in_store(server: &MockServer) -> ProfileStore {
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

    let config = Config::new(&server.uri(), "test-key").unwrap();
    let backend = Arc::new(Backend::new(config).unwrap());
    let session = Arc::new(SessionManager::new(backend.auth.clone()));
    session
        .sign_in("test@example.com", "password123")
        .await
        .unwrap();
    ProfileStore::new(backend, session)
}

#[tokio::test]
async fn fetch_loads_existing_profile() {
    let server = MockServer::start().await;
    let store = signed_in_store(&server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("id", &format!("eq.{}", USER_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_row(Some("Jo"))))
        .mount(&server)
        .await;

    let profile = store.fetch_profile().await.unwrap();
    assert_eq!(profile.email, "test@example.com");
    assert_eq!(
        profile.reminder_time,
        NaiveTime::from_hms_opt(9, 0, 0).unwrap()
    );
    assert!(store.is_loaded());
    assert_eq!(store.full_name(), "Jo");
}

#[tokio::test]
async fn missing_profile_is_created_with_defaults() {
    let server = MockServer::start().await;
    let store = signed_in_store(&server).await;

    // PostgREST reports "no rows" for the single-object select; the
    // store responds by inserting a default profile.
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(406).set_body_json(json!({
            "code": "PGRST116",
            "message": "JSON object requested, multiple (or no) rows returned",
            "details": "Results contain 0 rows",
            "hint": null
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(201).set_body_json(profile_row(None)))
        .expect(1)
        .mount(&server)
        .await;

    let profile = store.fetch_profile().await.unwrap();
    assert_eq!(profile.reminder_days, vec![1, 2, 3, 4, 5, 6, 7]);
    assert_eq!(
        profile.quiet_hours_start,
        NaiveTime::from_hms_opt(22, 0, 0).unwrap()
    );
    assert!(profile.push_notifications);
    assert!(store.is_loaded());
}

#[tokio::test]
async fn update_requires_loaded_profile_and_replaces_cache() {
    let server = MockServer::start().await;
    let store = signed_in_store(&server).await;

    let err = store
        .update_profile(ProfileUpdate {
            first_name: Some("Jo".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ProfileNotLoaded));

    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_row(None)))
        .mount(&server)
        .await;
    store.fetch_profile().await.unwrap();

    let mut updated = profile_row(Some("Jo"));
    updated["reminder_time"] = json!("07:30:00");
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("id", &format!("eq.{}", USER_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(updated))
        .mount(&server)
        .await;

    let profile = store
        .update_profile(ProfileUpdate {
            first_name: Some("Jo".to_string()),
            reminder_time: NaiveTime::from_hms_opt(7, 30, 0),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(profile.first_name.as_deref(), Some("Jo"));
    assert_eq!(
        store.profile().unwrap().reminder_time,
        NaiveTime::from_hms_opt(7, 30, 0).unwrap()
    );
}

#[tokio::test]
async fn reset_drops_profile_state() {
    let server = MockServer::start().await;
    let store = signed_in_store(&server).await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_row(None)))
        .mount(&server)
        .await;
    store.fetch_profile().await.unwrap();
    assert!(store.is_loaded());

    store.reset();
    assert!(!store.is_loaded());
    assert_eq!(store.full_name(), "");
}
