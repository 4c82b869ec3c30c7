//! HTTP ingestion and query API.
//!
//! Handlers are thin: deserialize, call the store (on the blocking pool,
//! diesel is synchronous), shape the response. Trip start/end hold
//! `trip_lock` across their whole critical section so the at-most-one-
//! active-trip invariant survives concurrent callers.

use std::sync::{Arc, Mutex};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sysinfo::{System, SystemExt};

use crate::models::telemetry::{Reading, TripId, TripSummary};
use crate::services::store::Store;
use crate::services::{diag, trips};

/// Speed above which the vehicle counts as moving, in mph.
const MOVING_SPEED_MPH: f64 = 1.0;
/// Coolant bands in °F.
const COOLANT_COOL_MAX_F: f64 = 140.0;
const COOLANT_NORMAL_MAX_F: f64 = 220.0;
/// Throttle bands in percent.
const THROTTLE_IDLE_MAX_PCT: f64 = 5.0;
const THROTTLE_LIGHT_MAX_PCT: f64 = 30.0;

const DEFAULT_STATS_WINDOW: i64 = 60;
const DEFAULT_RECENT_WINDOW_SECS: i64 = 60;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    trip_lock: Arc<tokio::sync::Mutex<()>>,
    system: Arc<Mutex<System>>,
}

impl AppState {
    pub fn new(store: Store) -> Self {
        AppState {
            store,
            trip_lock: Arc::new(tokio::sync::Mutex::new(())),
            system: Arc::new(Mutex::new(System::new())),
        }
    }
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Internal(m) => {
                log::error!("request failed: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<String> for ApiError {
    fn from(value: String) -> Self {
        ApiError::Internal(value)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/readings", post(ingest_reading).get(recent_readings))
        .route("/readings/range", get(readings_in_range))
        .route("/recent", get(recent_window))
        .route("/latest", get(latest_reading))
        .route("/trip/start", post(trip_start))
        .route("/trip/end", post(trip_end))
        .route("/trip/status", get(trip_status))
        .route("/stats", get(stats))
        .route("/vehicle-state", get(vehicle_state))
        .route("/diagnostics", get(diagnostics))
        .route("/health", get(health))
        .with_state(state)
}

/// Runs a synchronous store call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, String> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("storage task panicked: {}", e)))?
        .map_err(ApiError::from)
}

async fn ingest_reading(
    State(state): State<AppState>,
    payload: Result<Json<Reading>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(reading) = payload.map_err(|e| ApiError::BadRequest(format!("invalid reading payload: {}", e)))?;
    let store = state.store.clone();
    let stored = blocking(move || store.append_reading(&reading)).await?;
    Ok(Json(json!({ "id": stored.id, "timestamp": stored.timestamp })))
}

async fn latest_reading(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.clone();
    let latest = blocking(move || store.latest_reading()).await?;
    match latest {
        Some(reading) => Ok(Json(reading)),
        None => Err(ApiError::NotFound("no readings recorded yet".to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<i64>,
}

async fn recent_readings(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(limit) = params.limit {
        if limit < 1 {
            return Err(ApiError::BadRequest(format!("limit must be positive, got {}", limit)));
        }
    }
    let store = state.store.clone();
    let rows = blocking(move || store.recent_readings(params.limit)).await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

async fn readings_in_range(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<impl IntoResponse, ApiError> {
    if params.start > params.end {
        return Err(ApiError::BadRequest(format!(
            "start {} is after end {}",
            params.start, params.end
        )));
    }
    let store = state.store.clone();
    let rows = blocking(move || store.readings_in_range(params.start, params.end)).await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
struct RecentWindowParams {
    seconds: Option<i64>,
}

/// Relative-window view of the readings stream: everything from
/// `now - seconds` to now, ascending.
async fn recent_window(
    State(state): State<AppState>,
    Query(params): Query<RecentWindowParams>,
) -> Result<impl IntoResponse, ApiError> {
    let seconds = params.seconds.unwrap_or(DEFAULT_RECENT_WINDOW_SECS);
    if seconds < 1 {
        return Err(ApiError::BadRequest(format!("seconds must be positive, got {}", seconds)));
    }
    let end = Utc::now();
    let start = end - chrono::Duration::seconds(seconds);
    let store = state.store.clone();
    let rows = blocking(move || store.readings_in_range(start, end)).await?;
    Ok(Json(rows))
}

async fn trip_start(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let _guard = state.trip_lock.lock().await;
    let store = state.store.clone();
    let trip = blocking(move || store.start_trip(Utc::now())).await?;
    Ok(Json(trip))
}

async fn trip_end(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let _guard = state.trip_lock.lock().await;
    let store = state.store.clone();
    let summary = blocking(move || {
        let Some(trip) = store.end_active_trip(Utc::now())? else {
            return Ok(None);
        };
        // end_active_trip always sets ended_at on the returned row.
        let ended_at = trip.ended_at.unwrap_or_else(Utc::now);
        let readings = store.readings_in_range(trip.started_at, ended_at)?;
        Ok(Some(TripSummary {
            trip_id: TripId(trip.id),
            trip_start: trip.started_at,
            trip_end: Some(ended_at),
            aggregates: trips::summarize(&readings, trip.started_at, ended_at),
        }))
    })
    .await?;
    match summary {
        Some(summary) => Ok(Json(summary)),
        None => Err(ApiError::Conflict("no active trip".to_string())),
    }
}

async fn trip_status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.clone();
    let status = blocking(move || {
        let Some(trip) = store.active_trip()? else {
            return Ok(None);
        };
        let now = Utc::now();
        let readings = store.readings_in_range(trip.started_at, now)?;
        Ok(Some(TripSummary {
            trip_id: TripId(trip.id),
            trip_start: trip.started_at,
            trip_end: None,
            aggregates: trips::summarize(&readings, trip.started_at, now),
        }))
    })
    .await?;
    match status {
        Some(summary) => Ok(Json(json!({ "active": true, "trip": summary }))),
        None => Ok(Json(json!({ "active": false }))),
    }
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    total_readings: i64,
    window_samples: usize,
    average_speed_mph: Option<f64>,
    max_speed_mph: Option<f64>,
    average_rpm: Option<f64>,
    max_rpm: Option<i32>,
    max_coolant_temp_f: Option<f64>,
}

async fn stats(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_STATS_WINDOW);
    if limit < 1 {
        return Err(ApiError::BadRequest(format!("limit must be positive, got {}", limit)));
    }
    let store = state.store.clone();
    let (total, window) = blocking(move || {
        let total = store.reading_count()?;
        let window = store.recent_readings(Some(limit))?;
        Ok((total, window))
    })
    .await?;

    let mut speed_sum = 0.0;
    let mut speed_count = 0u64;
    let mut max_speed: Option<f64> = None;
    let mut rpm_sum = 0i64;
    let mut rpm_count = 0u64;
    let mut max_rpm: Option<i32> = None;
    let mut max_coolant: Option<f64> = None;
    for r in &window {
        if let Some(mph) = r.speed_mph {
            speed_sum += mph;
            speed_count += 1;
            max_speed = Some(max_speed.map_or(mph, |m: f64| m.max(mph)));
        }
        if let Some(rpm) = r.rpm {
            rpm_sum += rpm as i64;
            rpm_count += 1;
            max_rpm = Some(max_rpm.map_or(rpm, |m| m.max(rpm)));
        }
        if let Some(temp) = r.coolant_temp_f {
            max_coolant = Some(max_coolant.map_or(temp, |m: f64| m.max(temp)));
        }
    }

    Ok(Json(StatsResponse {
        total_readings: total,
        window_samples: window.len(),
        average_speed_mph: (speed_count > 0).then(|| speed_sum / speed_count as f64),
        max_speed_mph: max_speed,
        average_rpm: (rpm_count > 0).then(|| rpm_sum as f64 / rpm_count as f64),
        max_rpm,
        max_coolant_temp_f: max_coolant,
    }))
}

#[derive(Debug, Serialize)]
struct VehicleState {
    timestamp: DateTime<Utc>,
    is_moving: Option<bool>,
    engine_temp_status: Option<&'static str>,
    throttle_activity: Option<&'static str>,
}

async fn vehicle_state(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.clone();
    let latest = blocking(move || store.latest_reading()).await?;
    let Some(reading) = latest else {
        return Err(ApiError::NotFound("no readings recorded yet".to_string()));
    };

    Ok(Json(VehicleState {
        timestamp: reading.timestamp,
        is_moving: reading.speed_mph.map(|mph| mph > MOVING_SPEED_MPH),
        engine_temp_status: reading.coolant_temp_f.map(|f| {
            if f < COOLANT_COOL_MAX_F {
                "cool"
            } else if f <= COOLANT_NORMAL_MAX_F {
                "normal"
            } else {
                "hot"
            }
        }),
        throttle_activity: reading.throttle_pct.map(|pct| {
            if pct < THROTTLE_IDLE_MAX_PCT {
                "idle"
            } else if pct <= THROTTLE_LIGHT_MAX_PCT {
                "light"
            } else {
                "high"
            }
        }),
    }))
}

async fn diagnostics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let system = state.system.clone();
    let snapshot = tokio::task::spawn_blocking(move || {
        let mut sys = system.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        diag::snapshot(&mut sys)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("diagnostics task panicked: {}", e)))?;
    Ok(Json(snapshot))
}

/// Liveness only. Deliberately touches nothing but the process itself.
async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use diesel::r2d2::{ConnectionManager, Pool};
    use diesel_migrations::MigrationHarness;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let manager = ConnectionManager::<diesel::SqliteConnection>::new(":memory:");
        let pool = Pool::builder().max_size(1).build(manager).unwrap();
        let mut conn = pool.get().unwrap();
        conn.run_pending_migrations(crate::services::store::MIGRATIONS).unwrap();
        drop(conn);
        router(AppState::new(Store::from_pool(pool)))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_works_without_any_data() {
        let app = test_router();
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn null_only_reading_is_ingested() {
        let app = test_router();
        let response = app
            .oneshot(post_json(
                "/readings",
                json!({ "timestamp": "2026-08-28T12:00:00Z" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["id"].is_number());
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected_with_400() {
        let app = test_router();
        let response = app
            .oneshot(post_json("/readings", json!({ "timestamp": "not-a-time" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn latest_round_trips_an_ingested_reading() {
        let app = test_router();
        let reading = json!({
            "timestamp": "2026-08-28T12:00:00Z",
            "rpm": 1500,
            "speed_mph": 42.5,
            "coolant_temp_f": 185.0,
            "throttle_pct": 12.5,
            "load_pct": 15.0,
            "maf_gps": 5.12
        });
        let response = app.clone().oneshot(post_json("/readings", reading)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/latest")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["rpm"], 1500);
        assert_eq!(json["speed_mph"], 42.5);
    }

    #[tokio::test]
    async fn latest_is_404_when_empty() {
        let app = test_router();
        let response = app.oneshot(get("/latest")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn recent_readings_honors_limit() {
        let app = test_router();
        for i in 0..5 {
            let reading = json!({
                "timestamp": format!("2026-08-28T12:00:0{}Z", i),
                "rpm": 1000 + i,
            });
            let response = app.clone().oneshot(post_json("/readings", reading)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.oneshot(get("/readings?limit=2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["rpm"], 1004);
        assert_eq!(rows[1]["rpm"], 1003);
    }

    #[tokio::test]
    async fn range_query_is_inclusive_and_ascending() {
        let app = test_router();
        for i in 0..5 {
            let reading = json!({
                "timestamp": format!("2026-08-28T12:00:0{}Z", i),
                "rpm": 1000 + i,
            });
            app.clone().oneshot(post_json("/readings", reading)).await.unwrap();
        }

        let uri = "/readings/range?start=2026-08-28T12:00:01Z&end=2026-08-28T12:00:03Z";
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let rpms: Vec<_> = json.as_array().unwrap().iter().map(|r| r["rpm"].as_i64().unwrap()).collect();
        assert_eq!(rpms, vec![1001, 1002, 1003]);

        let inverted = "/readings/range?start=2026-08-28T12:00:03Z&end=2026-08-28T12:00:01Z";
        let response = app.oneshot(get(inverted)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn recent_window_keeps_only_fresh_readings() {
        let app = test_router();
        let fresh = (Utc::now() - chrono::Duration::seconds(10)).to_rfc3339();
        let stale = (Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
        for (ts, rpm) in [(stale, 900), (fresh, 1800)] {
            let reading = json!({ "timestamp": ts, "rpm": rpm });
            let response = app.clone().oneshot(post_json("/readings", reading)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(get("/recent?seconds=60")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["rpm"], 1800);

        let response = app.oneshot(get("/recent?seconds=0")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn trip_lifecycle_start_status_end() {
        let app = test_router();

        let response = app.clone().oneshot(get("/trip/status")).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["active"], false);

        let response = app.clone().oneshot(post_json("/trip/start", json!({}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(get("/trip/status")).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["active"], true);
        assert!(json["trip"]["trip_id"].is_number());

        let response = app.clone().oneshot(post_json("/trip/end", json!({}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["total_samples"], 0);

        let response = app.oneshot(post_json("/trip/end", json!({}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn concurrent_trip_starts_keep_one_active() {
        let manager = ConnectionManager::<diesel::SqliteConnection>::new(":memory:");
        let pool = Pool::builder().max_size(1).build(manager).unwrap();
        {
            let mut conn = pool.get().unwrap();
            conn.run_pending_migrations(crate::services::store::MIGRATIONS).unwrap();
        }
        let app = router(AppState::new(Store::from_pool(pool.clone())));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let app = app.clone();
            handles.push(tokio::spawn(async move {
                app.oneshot(post_json("/trip/start", json!({}))).await.unwrap().status()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), StatusCode::OK);
        }

        use crate::schema::trips::dsl as T;
        use diesel::prelude::*;
        let mut conn = pool.get().unwrap();
        let active: i64 = T::trips
            .filter(T::ended_at.is_null())
            .count()
            .get_result(&mut conn)
            .unwrap();
        let total: i64 = T::trips.count().get_result(&mut conn).unwrap();
        assert_eq!(active, 1);
        assert_eq!(total, 6);
    }

    #[tokio::test]
    async fn vehicle_state_interprets_latest_reading() {
        let app = test_router();
        let reading = json!({
            "timestamp": "2026-08-28T12:00:00Z",
            "speed_mph": 0.0,
            "coolant_temp_f": 250.0,
            "throttle_pct": 50.0,
        });
        app.clone().oneshot(post_json("/readings", reading)).await.unwrap();

        let response = app.oneshot(get("/vehicle-state")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["is_moving"], false);
        assert_eq!(json["engine_temp_status"], "hot");
        assert_eq!(json["throttle_activity"], "high");
    }

    #[tokio::test]
    async fn stats_summarizes_recent_window() {
        let app = test_router();
        for i in 0..3 {
            let reading = json!({
                "timestamp": format!("2026-08-28T12:00:0{}Z", i),
                "rpm": 1000 + 100 * i,
                "speed_mph": 30.0 + i as f64,
            });
            app.clone().oneshot(post_json("/readings", reading)).await.unwrap();
        }

        let response = app.oneshot(get("/stats?limit=2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["total_readings"], 3);
        assert_eq!(json["window_samples"], 2);
        assert_eq!(json["max_rpm"], 1200);
        assert_eq!(json["max_speed_mph"], 32.0);
    }

    #[tokio::test]
    async fn diagnostics_always_answers() {
        let app = test_router();
        let response = app.oneshot(get("/diagnostics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json.get("memory_total_bytes").is_some());
    }
}
