//! API layer - HTTP handlers and routing
//!
//! All endpoints live under `/api/v1`:
//! - Class, token and attendance endpoints
//! - Student and semester endpoints
//! - Statistics endpoints
//! - Health check

pub mod classes;
pub mod health;
pub mod middleware;
pub mod stats;
pub mod students;

use anyhow::Context;
use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use middleware::{ApiError, AppState, RequestStats};

use crate::cache::StatsCache;
use crate::config::Config;
use crate::db::repositories::{
    SqlxAttendanceRepository, SqlxClassRepository, SqlxSemesterRepository, SqlxStudentRepository,
};
use crate::db::DynDatabasePool;
use crate::services::{
    AttendanceService, ClassService, Clock, PayloadCodec, RosterService, SessionTokenManager,
    StatsService,
};

/// Wire repositories, the statistics cache and services into the shared state
pub fn build_state(pool: DynDatabasePool, config: &Config, clock: Arc<dyn Clock>) -> anyhow::Result<AppState> {
    let tz = config.attendance.tz()?;
    let codec = PayloadCodec::new(config.attendance.link_base()?)
        .context("Invalid attendance link base")?;

    let classes = SqlxClassRepository::boxed(pool.clone());
    let records = SqlxAttendanceRepository::boxed(pool.clone());
    let students = SqlxStudentRepository::boxed(pool.clone());
    let semesters = SqlxSemesterRepository::boxed(pool.clone());
    let stats_cache = Arc::new(StatsCache::from_config(&config.stats));

    Ok(AppState {
        class_service: Arc::new(ClassService::new(
            classes.clone(),
            records.clone(),
            stats_cache.clone(),
            clock.clone(),
        )),
        token_manager: Arc::new(SessionTokenManager::new(
            classes.clone(),
            clock.clone(),
            codec,
            config.attendance.token_ttl(),
        )),
        attendance_service: Arc::new(AttendanceService::new(
            classes.clone(),
            students.clone(),
            records.clone(),
            stats_cache.clone(),
            clock.clone(),
            tz,
        )),
        roster_service: Arc::new(RosterService::new(
            students.clone(),
            semesters.clone(),
            stats_cache.clone(),
            clock.clone(),
        )),
        stats_service: Arc::new(StatsService::new(
            students,
            semesters,
            classes,
            records,
            stats_cache,
            clock,
            tz,
            config.stats.clone(),
        )),
        request_stats: Arc::new(RequestStats::new()),
        pool,
    })
}

/// Build the `/api/v1` router
pub fn build_api_router() -> Router<AppState> {
    Router::new()
        .nest("/classes", classes::router())
        .nest("/students", students::students_router())
        .nest("/semesters", students::semesters_router())
        .nest("/health", health::router())
        .merge(stats::router())
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> anyhow::Result<Router> {
    let origin = cors_origin
        .parse::<HeaderValue>()
        .with_context(|| format!("Invalid CORS origin: {}", cors_origin))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE]);

    Ok(Router::new()
        .nest("/api/v1", build_api_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_stats_middleware,
        ))
        .with_state(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use crate::services::ManualClock;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::{json, Value};

    /// Monday 2024-07-15
    fn monday_at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 15, h, m, 0).unwrap()
    }

    async fn server() -> (TestServer, Arc<ManualClock>) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let mut config = Config::default();
        config.attendance.link_base_url = "https://campus.example/attend".to_string();
        config.stats.batch_delay_ms = 1;

        let clock = Arc::new(ManualClock::new(monday_at(8, 0)));
        let state = build_state(pool, &config, clock.clone()).expect("Failed to build state");
        let app = build_router(state, &config.server.cors_origin).expect("Failed to build router");
        (TestServer::new(app).expect("Failed to start test server"), clock)
    }

    async fn seed(server: &TestServer) -> (i64, i64) {
        server
            .put("/api/v1/semesters/2024-odd")
            .json(&json!({ "startsOn": "2024-07-15" }))
            .await
            .assert_status_ok();

        let class: Value = server
            .post("/api/v1/classes")
            .json(&json!({
                "subject": "Algorithms",
                "department": "CS",
                "semester": "2024-odd",
                "schedules": [
                    { "dayOfWeek": "monday", "startTime": "09:00", "endTime": "10:00", "room": "A-101" },
                    { "dayOfWeek": "wednesday", "startTime": "09:00", "endTime": "10:00" }
                ]
            }))
            .await
            .json();

        let student: Value = server
            .post("/api/v1/students")
            .json(&json!({ "name": "Ana", "department": "CS", "semester": "2024-odd" }))
            .await
            .json();

        (class["id"].as_i64().unwrap(), student["id"].as_i64().unwrap())
    }

    async fn attend(server: &TestServer, class_id: i64, student_id: i64, code: &str) -> Value {
        let response = server
            .post(&format!("/api/v1/classes/{}/attendance", class_id))
            .json(&json!({ "studentId": student_id, "code": code, "deviceFingerprint": "pixel-7" }))
            .await;
        response.assert_status_ok();
        response.json()
    }

    #[tokio::test]
    async fn test_health() {
        let (server, _) = server().await;
        let body: Value = server.get("/api/v1/health").await.json();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "ok");
    }

    #[tokio::test]
    async fn test_class_hides_token_value() {
        let (server, clock) = server().await;
        let (class_id, _) = seed(&server).await;
        clock.set(monday_at(9, 0));

        let issued: Value = server
            .post(&format!("/api/v1/classes/{}/token", class_id))
            .await
            .json();
        let token = issued["token"].as_str().unwrap().to_string();
        assert_eq!(issued["manualCode"], format!("{}:{}", class_id, token));
        assert_eq!(
            issued["uri"],
            format!("https://campus.example/attend/{}?token={}", class_id, token)
        );

        let response = server.get(&format!("/api/v1/classes/{}", class_id)).await;
        let text = response.text();
        assert!(!text.contains(&token));
        let class: Value = response.json();
        assert_eq!(class["subject"], "Algorithms");
        assert_eq!(class["schedules"][0]["dayOfWeek"], "monday");
        assert_eq!(class["schedules"][1]["room"], "");
        assert!(class["tokenExpiresAt"].is_string());
    }

    #[tokio::test]
    async fn test_scan_flow_over_http() {
        let (server, clock) = server().await;
        let (class_id, student_id) = seed(&server).await;

        clock.set(monday_at(9, 0));
        let old: Value = server
            .post(&format!("/api/v1/classes/{}/token", class_id))
            .await
            .json();
        clock.set(monday_at(9, 6));
        let new: Value = server
            .post(&format!("/api/v1/classes/{}/token", class_id))
            .await
            .json();

        clock.set(monday_at(9, 7));
        let stale = attend(&server, class_id, student_id, old["manualCode"].as_str().unwrap()).await;
        assert_eq!(stale["state"], "expired_token");

        let other = format!("{}:{}", class_id + 1, new["token"].as_str().unwrap());
        let wrong = attend(&server, class_id, student_id, &other).await;
        assert_eq!(wrong["state"], "wrong_session");

        let ok = attend(&server, class_id, student_id, new["uri"].as_str().unwrap()).await;
        assert_eq!(ok["state"], "success");
        assert_eq!(ok["record"]["attendedOn"], "2024-07-15");
        assert_eq!(ok["record"]["deviceFingerprint"], "pixel-7");

        clock.set(monday_at(9, 10));
        let again = attend(&server, class_id, student_id, new["manualCode"].as_str().unwrap()).await;
        assert_eq!(again["state"], "already_marked");
        assert!(again.get("record").is_none());

        let records: Value = server
            .get(&format!("/api/v1/classes/{}/records", class_id))
            .add_query_param("date", "2024-07-15")
            .await
            .json();
        assert_eq!(records["total"], 1);
    }

    #[tokio::test]
    async fn test_scan_by_unknown_student() {
        let (server, clock) = server().await;
        let (class_id, _) = seed(&server).await;

        clock.set(monday_at(9, 0));
        let issued: Value = server
            .post(&format!("/api/v1/classes/{}/token", class_id))
            .await
            .json();
        clock.set(monday_at(9, 5));

        let outcome = attend(&server, class_id, 4242, issued["manualCode"].as_str().unwrap()).await;
        assert_eq!(outcome["state"], "wrong_session");
        assert_eq!(outcome["retryable"], false);

        let records: Value = server
            .get(&format!("/api/v1/classes/{}/records", class_id))
            .await
            .json();
        assert_eq!(records["total"], 0);
    }

    #[tokio::test]
    async fn test_scan_outside_schedule() {
        let (server, clock) = server().await;
        let (class_id, student_id) = seed(&server).await;

        clock.set(monday_at(10, 0));
        let issued: Value = server
            .post(&format!("/api/v1/classes/{}/token", class_id))
            .await
            .json();
        clock.set(monday_at(10, 0) + Duration::seconds(1));

        let outcome = attend(&server, class_id, student_id, issued["manualCode"].as_str().unwrap()).await;
        assert_eq!(outcome["state"], "outside_schedule");
    }

    #[tokio::test]
    async fn test_expected_and_stats() {
        let (server, clock) = server().await;
        let (class_id, student_id) = seed(&server).await;

        let expected: Value = server
            .get(&format!("/api/v1/classes/{}/expected", class_id))
            .add_query_param("from", "2024-07-15")
            .add_query_param("to", "2024-07-24")
            .await
            .json();
        assert_eq!(expected["expectedCount"], 4);
        assert_eq!(expected["sessions"][1]["date"], "2024-07-17");
        assert_eq!(expected["sessions"][1]["dayOfWeek"], "wednesday");

        clock.set(monday_at(9, 0));
        let issued: Value = server
            .post(&format!("/api/v1/classes/{}/token", class_id))
            .await
            .json();
        clock.set(monday_at(9, 5));
        attend(&server, class_id, student_id, issued["manualCode"].as_str().unwrap()).await;

        clock.set(Utc.with_ymd_and_hms(2024, 7, 24, 18, 0, 0).unwrap());
        let stats: Value = server
            .get(&format!("/api/v1/students/{}/stats", student_id))
            .await
            .json();
        assert_eq!(stats["totalClasses"], 4);
        assert_eq!(stats["attendedClasses"], 1);
        assert_eq!(stats["attendanceRate"], 25);
        assert_eq!(stats["subjectBreakdown"][0]["subject"], "Algorithms");

        let trends: Value = server
            .get(&format!("/api/v1/students/{}/trends", student_id))
            .add_query_param("granularity", "week")
            .await
            .json();
        assert_eq!(trends["buckets"].as_array().unwrap().len(), 2);
        assert_eq!(trends["buckets"][1]["attendedChange"], -1);

        let batch: Value = server
            .post("/api/v1/stats/batch")
            .json(&json!({ "studentIds": [student_id] }))
            .await
            .json();
        assert_eq!(batch["results"][0]["studentId"], student_id);
    }

    #[tokio::test]
    async fn test_error_envelopes() {
        let (server, _) = server().await;

        let missing = server.get("/api/v1/classes/999").await;
        missing.assert_status(StatusCode::NOT_FOUND);
        let body: Value = missing.json();
        assert_eq!(body["error"]["code"], "NOT_FOUND");

        let bad_rule = server
            .post("/api/v1/classes")
            .json(&json!({
                "subject": "Algorithms",
                "department": "CS",
                "semester": "2024-odd",
                "schedules": [{ "dayOfWeek": "monday", "startTime": "10:00", "endTime": "09:00" }]
            }))
            .await;
        bad_rule.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = bad_rule.json();
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let bad_day = server
            .post("/api/v1/classes")
            .json(&json!({ "subject": "A", "department": "CS", "semester": "s", "schedules": [{ "dayOfWeek": "someday", "startTime": "09:00", "endTime": "10:00" }] }))
            .await;
        bad_day.assert_status(StatusCode::BAD_REQUEST);

        let bad_granularity = server
            .get("/api/v1/students/1/trends")
            .add_query_param("granularity", "daily")
            .await;
        bad_granularity.assert_status(StatusCode::BAD_REQUEST);

        let repeated = server
            .get("/api/v1/students/1/trends?granularity=week&granularity=month")
            .await;
        repeated.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = repeated.json();
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        server
            .get("/api/v1/students/12345/stats")
            .await
            .assert_status(StatusCode::NOT_FOUND);

        server
            .post("/api/v1/stats/batch")
            .json(&json!({ "studentIds": [12345] }))
            .await
            .assert_status(StatusCode::NOT_FOUND);

        server
            .post("/api/v1/classes/1/token")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
