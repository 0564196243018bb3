//! Integration tests for the HTTP shell.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use reqwest::Client;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::db::test_support::init_test_db;
use crate::{create_router, AppState};

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let (db, startup) = init_test_db(temp_dir.path()).await;

        let state = AppState::new(db);
        state.track_startup(startup);

        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        TestFixture {
            client: Client::new(),
            base_url: format!("http://{}", addr),
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Poll the readiness endpoint until the startup report is published.
    async fn wait_ready(&self) -> Value {
        for _ in 0..50 {
            let resp = self
                .client
                .get(self.url("/health/ready"))
                .send()
                .await
                .unwrap();
            if resp.status() == 200 {
                return resp.json().await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("startup report was never published");
    }
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_readiness_reports_startup() {
    let fixture = TestFixture::new().await;

    let body = fixture.wait_ready().await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["project_seed"]["status"], "applied");
    assert_eq!(body["data"]["project_seed"]["count"], 1);
    assert_eq!(body["data"]["admin_seed"]["status"], "applied");
    assert_eq!(body["data"]["legacy_upgrade"]["status"], "skipped");
}

#[tokio::test]
async fn test_readiness_before_startup_finishes() {
    let temp_dir = TempDir::new().unwrap();
    let (db, startup) = init_test_db(temp_dir.path()).await;
    startup.wait().await;

    // Never publish a report.
    let app = create_router(AppState::new(db));

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/health/ready")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/projects/UNNAMED"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert_eq!(body["error"]["message"], "No route for /projects/UNNAMED");
}
