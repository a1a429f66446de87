//! End-to-end tests for the HTTP gateway.
//!
//! Each test starts a real Axum server on a random port against the
//! in-memory backend and drives it over HTTP with reqwest.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{Value, json};

use advisor_connect::advisor::Advisor;
use advisor_connect::app::App;
use advisor_connect::backend::memory::MemoryBackend;
use advisor_connect::backend::{Backend, UserProfile, UserType};
use advisor_connect::config::FeedConfig;
use advisor_connect::email::{MemoryMailer, Notifier};
use advisor_connect::gateway::{GatewayState, RateLimiter, start_server};
use advisor_connect::lists::MemoryListStore;

const PASSWORD: &str = "correct-horse";

struct TestServer {
    base: String,
    backend: Arc<MemoryBackend>,
    mailer: Arc<MemoryMailer>,
    state: Arc<GatewayState>,
    client: reqwest::Client,
}

fn advisor(first: &str, last: &str, province: &str, city: &str, email: &str) -> Advisor {
    Advisor {
        first_name: first.to_string(),
        last_name: last.to_string(),
        firm: "Maple Securities".to_string(),
        city: city.to_string(),
        province: province.to_string(),
        email: Some(email.to_string()),
        ..Default::default()
    }
}

async fn start_test_server() -> TestServer {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_advisors([
        advisor("Jane", "Smith", "Ontario", "Toronto", "jane.smith@maple.ca"),
        advisor("Raj", "Smithers", "Ontario", "Ottawa", "raj@maple.ca"),
        advisor("Luc", "Smith", "Quebec", "Montreal", "luc@maple.ca"),
        advisor("Ava", "Brown", "Ontario", "Toronto", "ava@maple.ca"),
    ]);
    let mailer = Arc::new(MemoryMailer::new());
    let notifier = Arc::new(
        Notifier::new(
            mailer.clone(),
            "http://localhost:3100",
            Some("admin-inbox@example.com".to_string()),
        )
        .expect("templates"),
    );
    let app = App::from_parts(
        Backend::from_single(backend.clone()),
        Arc::new(MemoryListStore::new()),
        notifier,
        &FeedConfig::default(),
    );
    let state = Arc::new(GatewayState {
        app,
        login_rate_limiter: RateLimiter::new(1_000, 60),
        allowed_origins: Vec::new(),
        shutdown_tx: tokio::sync::RwLock::new(None),
        startup_time: std::time::Instant::now(),
    });

    let addr: SocketAddr = "127.0.0.1:0".parse().expect("addr");
    let bound = start_server(addr, state.clone())
        .await
        .expect("Failed to start test server");

    TestServer {
        base: format!("http://{}", bound),
        backend,
        mailer,
        state,
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn add_user(&self, email: &str, user_type: UserType) -> UserProfile {
        self.backend.add_account(email, PASSWORD, user_type, true)
    }

    async fn login(&self, email: &str) -> String {
        let resp = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&json!({ "email": email, "password": PASSWORD }))
            .send()
            .await
            .expect("login request");
        assert_eq!(resp.status(), 200, "login for {email}");
        let body: Value = resp.json().await.expect("login body");
        body["access_token"]
            .as_str()
            .expect("access token")
            .to_string()
    }

    async fn get_json(&self, path: &str, token: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("request");
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn post_json(&self, path: &str, token: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("request")
    }
}

#[tokio::test]
async fn health_is_public_and_api_requires_a_token() {
    let server = start_test_server().await;

    let resp = server
        .client
        .get(server.url("/api/health"))
        .send()
        .await
        .expect("health");
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()
            .get("x-content-type-options")
            .and_then(|v| v.to_str().ok()),
        Some("nosniff")
    );
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["status"], "healthy");

    let resp = server
        .client
        .get(server.url("/api/advisors"))
        .send()
        .await
        .expect("advisors");
    assert_eq!(resp.status(), 401);

    assert!(server.state.shutdown().await);
}

#[tokio::test]
async fn province_and_search_filters_reach_the_backend() {
    let server = start_test_server().await;
    server.add_user("viewer@example.com", UserType::User);
    let token = server.login("viewer@example.com").await;

    let (status, body) = server
        .get_json("/api/advisors?province=Ontario&search=Smith", &token)
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["total"], 2);
    assert_eq!(body["empty"], false);
    assert_eq!(body["has_more"], false);
    let names: Vec<&str> = body["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .filter_map(|r| r["last_name"].as_str())
        .collect();
    assert_eq!(names, vec!["Smith", "Smithers"]);

    let query = server
        .backend
        .recorded_queries()
        .pop()
        .expect("backend was queried");
    assert!(query.filter.provinces.contains("Ontario"));
    assert_eq!(query.filter.search, "Smith");
    assert!(query.with_count);

    let (status, body) = server
        .get_json("/api/advisors?province=Manitoba&search=Smith", &token)
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["empty"], true);
    assert_eq!(body["total"], 0);
    assert_eq!(body["rows"], json!([]));

    let (status, options) = server.get_json("/api/advisors/options", &token).await;
    assert_eq!(status, 200);
    assert_eq!(options["provinces"], json!(["Ontario", "Quebec"]));
}

#[tokio::test]
async fn adding_the_same_advisor_twice_reports_a_duplicate() {
    let server = start_test_server().await;
    server.add_user("fan@example.com", UserType::User);
    let token = server.login("fan@example.com").await;

    let first = server
        .post_json("/api/favorites/Top%20picks/rows", &token, json!({ "advisor_id": "1" }))
        .await;
    assert_eq!(first.status(), 201);
    let first: Value = first.json().await.expect("json");
    assert_eq!(first["len"], 1);
    assert_eq!(first["duplicate"], false);

    let mut same_email = advisor("J.", "Smith", "Ontario", "Toronto", " JANE.SMITH@maple.ca ");
    same_email.title = "Different title".to_string();
    let second = server
        .post_json(
            "/api/favorites/Top%20picks/rows",
            &token,
            json!({ "advisor": same_email }),
        )
        .await;
    assert_eq!(second.status(), 200);
    let second: Value = second.json().await.expect("json");
    assert_eq!(second["len"], 1);
    assert_eq!(second["duplicate"], true);

    let (status, lists) = server.get_json("/api/favorites", &token).await;
    assert_eq!(status, 200);
    assert_eq!(lists["lists"], json!([{ "name": "Top picks", "count": 1 }]));

    // Lists are scoped to their owner.
    server.add_user("other@example.com", UserType::User);
    let other = server.login("other@example.com").await;
    let (_, lists) = server.get_json("/api/favorites", &other).await;
    assert_eq!(lists["lists"], json!([]));
}

#[tokio::test]
async fn deactivated_user_cannot_sign_in() {
    let server = start_test_server().await;
    server.add_user("boss@example.com", UserType::Admin);
    let user = server.add_user("leaving@example.com", UserType::User);
    let user_token = server.login("leaving@example.com").await;

    let resp = server
        .client
        .post(server.url("/api/auth/admin/login"))
        .json(&json!({ "email": "boss@example.com", "password": PASSWORD }))
        .send()
        .await
        .expect("admin login");
    assert_eq!(resp.status(), 200);
    let admin_token = resp.json::<Value>().await.expect("json")["access_token"]
        .as_str()
        .expect("token")
        .to_string();

    let resp = server
        .post_json(
            &format!("/api/admin/users/{}/deactivate", user.id),
            &admin_token,
            json!({}),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let change: Value = resp.json().await.expect("json");
    assert_eq!(change["profile"]["is_active"], false);

    let resp = server
        .client
        .post(server.url("/api/auth/login"))
        .json(&json!({ "email": "leaving@example.com", "password": PASSWORD }))
        .send()
        .await
        .expect("login");
    assert_eq!(resp.status(), 403);
    let message = resp.text().await.expect("text");
    assert!(message.to_lowercase().contains("deactivated"), "{message}");

    // The old session no longer works either.
    let (status, _) = server.get_json("/api/auth/me", &user_token).await;
    assert_eq!(status, 401);

    assert!(
        server
            .mailer
            .sent()
            .iter()
            .any(|m| m.to == "leaving@example.com" && m.subject.contains("deactivated"))
    );
}

#[tokio::test]
async fn saving_a_report_under_a_used_name_conflicts() {
    let server = start_test_server().await;
    server.add_user("analyst@example.com", UserType::User);
    let token = server.login("analyst@example.com").await;

    let resp = server
        .post_json(
            "/api/reports",
            &token,
            json!({ "name": "Ontario", "filter": { "provinces": ["Ontario"] } }),
        )
        .await;
    assert_eq!(resp.status(), 201);
    let summary: Value = resp.json().await.expect("json");
    assert_eq!(summary["count"], 3);

    let resp = server
        .post_json(
            "/api/reports",
            &token,
            json!({ "name": "Ontario", "filter": { "provinces": ["Quebec"] } }),
        )
        .await;
    assert_eq!(resp.status(), 409);
    assert!(resp.text().await.expect("text").contains("already exists"));

    let (status, view) = server
        .get_json("/api/reports/Ontario?per_page=2", &token)
        .await;
    assert_eq!(status, 200);
    assert_eq!(view["total"], 3);
    assert_eq!(view["total_pages"], 2);
    assert_eq!(view["rows"].as_array().map(Vec::len), Some(2));

    let resp = server
        .client
        .get(server.url("/api/reports/Ontario/export"))
        .bearer_auth(&token)
        .send()
        .await
        .expect("export");
    assert_eq!(resp.status(), 200);
    assert!(
        resp.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/csv"))
    );
    let csv = resp.text().await.expect("csv");
    assert!(csv.starts_with("First Name,Last Name"));
    assert_eq!(csv.lines().count(), 4);
}

#[tokio::test]
async fn admin_routes_reject_regular_users() {
    let server = start_test_server().await;
    server.add_user("plain@example.com", UserType::User);
    server.add_user("root@example.com", UserType::Admin);
    let user_token = server.login("plain@example.com").await;
    let admin_token = server.login("root@example.com").await;

    let (status, _) = server.get_json("/api/admin/dashboard", &user_token).await;
    assert_eq!(status, 403);

    let resp = server
        .client
        .post(server.url("/api/auth/admin/login"))
        .json(&json!({ "email": "plain@example.com", "password": PASSWORD }))
        .send()
        .await
        .expect("admin login");
    assert_eq!(resp.status(), 403);

    let (status, stats) = server.get_json("/api/admin/dashboard", &admin_token).await;
    assert_eq!(status, 200);
    assert_eq!(stats["advisors"], 4);
    assert_eq!(stats["admins"], 1);

    let resp = server
        .post_json(
            "/api/admin/advisors",
            &admin_token,
            json!({ "first_name": "Nora", "last_name": "Chen", "province": "Alberta" }),
        )
        .await;
    assert_eq!(resp.status(), 201);
    let (_, options) = server.get_json("/api/advisors/options", &user_token).await;
    assert_eq!(options["provinces"], json!(["Alberta", "Ontario", "Quebec"]));
}

#[tokio::test]
async fn reporting_an_issue_emails_the_admin_inbox() {
    let server = start_test_server().await;
    server.add_user("spotter@example.com", UserType::User);
    let token = server.login("spotter@example.com").await;

    let resp = server
        .post_json(
            "/api/advisors/1/report-issue",
            &token,
            json!({ "message": "Moved to the Ottawa branch" }),
        )
        .await;
    assert_eq!(resp.status(), 200);

    let sent = server.mailer.sent();
    let issue = sent
        .iter()
        .find(|m| m.to == "admin-inbox@example.com")
        .expect("admin notified");
    assert_eq!(issue.subject, "Issue reported for Jane Smith");
    assert!(issue.html.contains("Moved to the Ottawa branch"));

    let resp = server
        .post_json(
            "/api/advisors/999/report-issue",
            &token,
            json!({ "message": "Who?" }),
        )
        .await;
    assert_eq!(resp.status(), 404);
}
