use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use quick_ops_storage::Database;

use crate::cache::OperationsCache;
use crate::{operations, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    cache: OperationsCache,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: Database, cache: OperationsCache) -> Self {
        Self {
            metrics,
            storage,
            cache,
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn cache(&self) -> &OperationsCache {
        &self.cache
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route(
            "/users/:user_id/operations",
            get(operations::list).put(operations::replace),
        )
        .route("/operations", post(operations::create))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, response::Response};
    use chrono::TimeZone;
    use http_body_util::BodyExt;
    use quick_ops_storage::bootstrap;
    use quick_ops_util::CacheSettings;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn setup_state_with_cache(cache: CacheSettings) -> AppState {
        let metrics = telemetry::init_metrics().expect("metrics init");

        let database = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        database.run_migrations().await.expect("migrations");
        bootstrap(&database, Utc::now()).await.expect("seed");

        let fixed = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        AppState::new(metrics, database, OperationsCache::new(cache))
            .with_clock(Arc::new(move || fixed))
    }

    async fn setup_state() -> AppState {
        setup_state_with_cache(CacheSettings::default()).await
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_json(response: Response) -> Value {
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        serde_json::from_slice(&collected.to_bytes()).expect("json body")
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = app_router(setup_state().await);

        let response = app
            .oneshot(get_request("/healthz"))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let app = app_router(setup_state().await);

        let response = app
            .oneshot(get_request("/metrics"))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn lists_seeded_operations_in_order() {
        let app = app_router(setup_state().await);

        let response = app
            .oneshot(get_request("/users/1/operations"))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            read_json(response).await,
            json!([
                { "icon": "https://img-1", "title": "Организациям", "url": "https://url-1" },
                { "icon": "https://img-2", "title": "Интернет", "url": "https://url-2" },
                { "icon": "https://img-3", "title": "Запрос денег", "url": "https://url-3" }
            ])
        );
    }

    #[tokio::test]
    async fn unknown_user_gets_empty_list() {
        let app = app_router(setup_state().await);

        let response = app
            .oneshot(get_request("/users/999/operations"))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await, json!([]));
    }

    #[tokio::test]
    async fn non_numeric_user_id_is_problem() {
        let app = app_router(setup_state().await);

        let response = app
            .oneshot(get_request("/users/abc/operations"))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
        assert_eq!(read_json(response).await["type"], "invalid_user_id");
    }

    #[tokio::test]
    async fn put_inserts_then_updates() {
        let app = app_router(setup_state().await);
        let body = json!([
            { "icon": "https://img-2", "title": "Интернет", "url": "https://url-2" }
        ]);

        let created = app
            .clone()
            .oneshot(json_request("PUT", "/users/3/operations", body.clone()))
            .await
            .expect("handler should respond");
        assert_eq!(created.status(), StatusCode::CREATED);
        let created = read_json(created).await;
        assert_eq!(created["user_id"], 3);
        assert_eq!(created["operations"], body);
        assert_eq!(created["created_at"], "2024-05-01T12:00:00Z");

        let updated = app
            .oneshot(json_request("PUT", "/users/3/operations", json!([])))
            .await
            .expect("handler should respond");
        assert_eq!(updated.status(), StatusCode::OK);
        let updated = read_json(updated).await;
        assert_eq!(updated["id"], created["id"]);
        assert_eq!(updated["operations"], json!([]));
    }

    #[tokio::test]
    async fn post_requires_user_id() {
        let app = app_router(setup_state().await);

        let response = app
            .oneshot(json_request("POST", "/operations", json!({ "operations": [] })))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let problem = read_json(response).await;
        assert_eq!(problem["type"], "required_user_id");
        assert_eq!(problem["detail"], "required parameter is missing: User ID");
    }

    #[tokio::test]
    async fn post_rejects_incomplete_operation() {
        let app = app_router(setup_state().await);

        let response = app
            .oneshot(json_request(
                "POST",
                "/operations",
                json!({ "user_id": 2, "operations": [{ "icon": "https://img-1", "url": "https://url-1" }] }),
            ))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await["type"], "validation_failed");
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_json() {
        let app = app_router(setup_state().await);

        let request = Request::builder()
            .method("POST")
            .uri("/operations")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.expect("handler should respond");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await["type"], "invalid_json");
    }

    #[tokio::test]
    async fn write_invalidates_cached_list() {
        let state = setup_state().await;
        let app = app_router(state.clone());

        let first = app
            .clone()
            .oneshot(get_request("/users/2/operations"))
            .await
            .expect("handler should respond");
        assert_eq!(read_json(first).await.as_array().map(Vec::len), Some(1));
        assert_eq!(state.cache().len().await, 1);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/operations",
                json!({ "user_id": 2, "operations": [] }),
            ))
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::OK);

        let second = app
            .oneshot(get_request("/users/2/operations"))
            .await
            .expect("handler should respond");
        assert_eq!(read_json(second).await, json!([]));
    }

    #[tokio::test]
    async fn cached_list_survives_store_outage() {
        let state = setup_state_with_cache(CacheSettings {
            ttl: Duration::from_secs(300),
            max_entries: 16,
        })
        .await;
        let app = app_router(state.clone());

        let warm = app
            .clone()
            .oneshot(get_request("/users/1/operations"))
            .await
            .expect("handler should respond");
        assert_eq!(warm.status(), StatusCode::OK);

        state.storage().close().await;

        let cached = app
            .clone()
            .oneshot(get_request("/users/1/operations"))
            .await
            .expect("handler should respond");
        assert_eq!(cached.status(), StatusCode::OK);

        let uncached = app
            .oneshot(get_request("/users/2/operations"))
            .await
            .expect("handler should respond");
        assert_eq!(uncached.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(read_json(uncached).await["type"], "store_unavailable");
    }

    #[tokio::test]
    async fn malformed_document_is_data_integrity_problem() {
        let state = setup_state_with_cache(CacheSettings {
            ttl: Duration::ZERO,
            max_entries: 0,
        })
        .await;
        sqlx_insert_malformed(state.storage()).await;
        let app = app_router(state);

        let response = app
            .oneshot(get_request("/users/77/operations"))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(read_json(response).await["type"], "data_integrity");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_read_does_not_cache_list_older_than_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("ops.db").display());
        let database = Database::connect(&url).await.expect("connect");
        database.run_migrations().await.expect("migrations");
        let cache = OperationsCache::new(CacheSettings {
            ttl: Duration::from_secs(300),
            max_entries: 16,
        });
        let metrics = telemetry::init_metrics().expect("metrics init");
        let app = app_router(AppState::new(metrics, database, cache));

        let single = |title: &str| json!([{ "icon": "https://img-1", "title": title, "url": "https://url-1" }]);

        for round in 0..100 {
            let old = format!("old-{round}");
            let new = format!("new-{round}");

            let seeded = app
                .clone()
                .oneshot(json_request("PUT", "/users/42/operations", single(&old)))
                .await
                .expect("handler should respond");
            assert!(seeded.status().is_success());

            let read = tokio::spawn(app.clone().oneshot(get_request("/users/42/operations")));
            let write = tokio::spawn(
                app.clone()
                    .oneshot(json_request("PUT", "/users/42/operations", single(&new))),
            );
            let (read, write) = (
                read.await.expect("join").expect("handler should respond"),
                write.await.expect("join").expect("handler should respond"),
            );
            assert_eq!(read.status(), StatusCode::OK);
            assert_eq!(write.status(), StatusCode::OK);

            let after = app
                .clone()
                .oneshot(get_request("/users/42/operations"))
                .await
                .expect("handler should respond");
            assert_eq!(read_json(after).await, single(&new), "round {round}");
        }
    }

    async fn sqlx_insert_malformed(database: &Database) {
        sqlx::query(
            "INSERT INTO operations (id, user_id, operations_json, created_at, updated_at) \
             VALUES ('broken', 77, ?, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        )
        .bind(r#"[{"title":"Интернет","url":"https://url-2"}]"#)
        .execute(database.pool())
        .await
        .expect("insert malformed document");
    }
}
