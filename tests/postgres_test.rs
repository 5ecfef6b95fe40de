use code_checker::{
    config::AppConfig,
    db::{self, store::PgStore},
    models::request::{NewRequest, RequestStatus},
    models::settings::KEY_TOTAL_ATTEMPTS,
    services::store::{FinalOutcome, RequestStore, SettingsSource},
};
use serde_json::json;

/// Round trip through the PostgreSQL store: create, transition, finalize, query by status.
///
/// Note: This requires a running PostgreSQL instance configured via DATABASE_URL.
#[tokio::test]
#[ignore] // Run with: cargo test --test postgres_test -- --ignored
async fn test_request_lifecycle_in_postgres() {
    let config = AppConfig::from_env().expect("Failed to load config");

    let pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    let store = PgStore::new(pool);

    let created = store
        .create_request(&NewRequest {
            user_prompt: Some("SELECT * FROM users".to_string()),
            image_references: vec!["screens/login.png".to_string()],
        })
        .await
        .expect("Failed to create request");
    assert_eq!(created.status, RequestStatus::Queued);
    assert_eq!(created.image_references, vec!["screens/login.png".to_string()]);

    let in_flight = store
        .ids_with_status(&RequestStatus::IN_FLIGHT)
        .await
        .expect("Failed to list in-flight requests");
    assert!(in_flight.contains(&created.id));

    store
        .update_status(created.id, RequestStatus::Processing, None)
        .await
        .expect("Failed to mark Processing");

    let payload = json!({ "issues": [], "summary": "looks fine" });
    store
        .finalize(created.id, &FinalOutcome::Completed(payload.clone()))
        .await
        .expect("Failed to finalize");

    let row = store
        .get_request(created.id)
        .await
        .expect("Failed to read request")
        .expect("Request should exist");
    assert_eq!(row.status, RequestStatus::Completed);
    assert_eq!(row.result, Some(payload));
    assert!(row.is_success);
    assert!(row.updated_at >= row.created_at);

    let missing = store
        .update_status(i32::MAX, RequestStatus::Failed, Some("nope"))
        .await;
    assert!(missing.is_err());

    let settings = store.load_settings().await.expect("Failed to load settings");
    assert!(settings.get(KEY_TOTAL_ATTEMPTS).is_some());
}
