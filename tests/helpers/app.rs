use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use stockroom::authz::store::MemoryAdapter;
use stockroom::authz::Enforcer;
use stockroom::settings::Settings;
use stockroom::web::{self, AppState};
use tower::ServiceExt;

use super::db::TestDb;

pub const TEST_SECRET: &str = "0123456789abcdef0123456789abcdef";

/// Router over a fresh database and an in-memory policy store.
pub struct TestApp {
    pub db: TestDb,
    pub enforcer: Enforcer,
    pub policy: Arc<MemoryAdapter>,
    pub router: Router,
}

impl TestApp {
    pub async fn new(policy: &str) -> Self {
        let db = TestDb::new().await;
        let adapter = Arc::new(MemoryAdapter::new(policy));
        let enforcer = Enforcer::load(adapter.clone());

        let mut settings = Settings::default();
        settings.auth.jwt_secret = TEST_SECRET.to_string();

        let state = AppState::new(settings, db.connection().clone(), enforcer.clone());
        Self {
            router: web::router(state),
            db,
            enforcer,
            policy: adapter,
        }
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("Failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Request failed");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// Logs in and returns the bearer token.
    pub async fn login(&self, username: &str, password: &str) -> String {
        let (status, body) = self
            .request(
                "POST",
                "/login",
                None,
                Some(serde_json::json!({"username": username, "password": password})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        body["token"].as_str().expect("No token in response").to_string()
    }
}
