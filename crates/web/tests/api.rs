//! HTTP surface against an in-memory database and a scripted panel

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use craftcloud_common::panel::testing::{FakeFailure, FakePanel, PanelCall};
use craftcloud_common::{
    Database, PlanType, PowerAction, ProvisionConfig, ServerInstance, ServerState,
};
use craftcloud_web::auth::SessionStore;
use craftcloud_web::{WebServer, WebServerConfig};

struct TestApp {
    router: Router,
    panel: Arc<FakePanel>,
    db: Database,
}

fn app() -> TestApp {
    let db = Database::open_memory().unwrap();
    let panel = Arc::new(FakePanel::new());
    let cfg = WebServerConfig {
        provision: ProvisionConfig {
            retry_delay: Duration::from_millis(10),
            settle_delay: Duration::ZERO,
            ..Default::default()
        },
        ..Default::default()
    };
    let server = WebServer::with_parts(cfg, db.clone(), panel.clone());
    TestApp {
        router: server.router(),
        panel,
        db,
    }
}

impl TestApp {
    async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value, HeaderMap) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body, headers)
    }

    /// A user owning `identifier`, with a live session token.
    fn seed(&self, email: &str, identifier: &str, expires_at: Option<DateTime<Utc>>) -> String {
        let user = self.db.create_user(email, "seed", "x", Some(7), None).unwrap();
        let now = Utc::now();
        self.db
            .create_server(&ServerInstance {
                id: Uuid::new_v4(),
                owner_user_id: user.id,
                external_server_id: 42,
                external_identifier: identifier.to_string(),
                name: "seed's Demo Server".to_string(),
                plan_type: PlanType::Demo,
                is_demo: true,
                demo_expires_at: expires_at,
                suspended_at: None,
                created_at: now,
            })
            .unwrap();
        SessionStore::new(self.db.clone()).issue(user.id).unwrap().token
    }
}

fn far_future() -> Option<DateTime<Utc>> {
    Some(Utc::now() + chrono::Duration::hours(12))
}

#[tokio::test]
async fn test_demo_registration() {
    let app = app();

    let (status, body, headers) = app
        .call(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({"email": "a@b.com", "password": "password1", "isDemo": true})),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["email"], "a@b.com");
    assert_eq!(body["serverId"], "srv00501");
    assert!(body["token"].as_str().unwrap().len() == 64);

    let cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cookie.starts_with("craftcloud_session="));
    assert!(cookie.contains("HttpOnly"));

    let expires: DateTime<Utc> = body["demoExpiresAt"].as_str().unwrap().parse().unwrap();
    let ahead = expires - Utc::now();
    assert!(ahead > chrono::Duration::hours(23) + chrono::Duration::minutes(59));
    assert!(ahead <= chrono::Duration::hours(24));

    // Stored record: exactly created_at + 24h
    let user = app.db.get_user_by_email("a@b.com").unwrap().unwrap();
    let server = app.db.get_server_by_owner(user.id).unwrap().unwrap();
    assert!(server.is_demo);
    assert_eq!(server.plan_type, PlanType::Demo);
    assert_eq!(
        server.demo_expires_at.unwrap() - server.created_at,
        chrono::Duration::hours(24)
    );

    assert_eq!(
        app.panel.count(|c| matches!(c, PanelCall::CreateAccount { .. })),
        1
    );
    assert_eq!(
        app.panel.count(|c| matches!(c, PanelCall::CreateServer { name, .. } if name.ends_with("-demo"))),
        1
    );
}

#[tokio::test]
async fn test_duplicate_email_rejected() {
    let app = app();
    let register = |email: &'static str| {
        json!({"email": email, "password": "password1", "isDemo": true})
    };

    let (status, _, _) = app.call("POST", "/api/auth/register", None, Some(register("a@b.com"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body, _) = app
        .call("POST", "/api/auth/register", None, Some(register("  A@B.com ")))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "An account with this email already exists"}));

    // No second upstream account
    assert_eq!(
        app.panel.count(|c| matches!(c, PanelCall::CreateAccount { .. })),
        1
    );
}

#[tokio::test]
async fn test_registration_validation() {
    let app = app();

    let (status, body, _) = app
        .call("POST", "/api/auth/register", None, Some(json!({"email": "a@b.com"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Email and password are required");

    let (status, body, _) = app
        .call(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({"email": "a@b.com", "password": "short"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Password must be at least 8 characters");

    // Ten bytes, five characters
    let (status, body, _) = app
        .call(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({"email": "a@b.com", "password": "ééééé"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Password must be at least 8 characters");

    assert!(app.panel.calls().is_empty());
}

#[tokio::test]
async fn test_malformed_bodies_use_error_shape() {
    let app = app();
    let token = app.seed("a@b.com", "abcd1234", far_future());

    for (uri, token) in [
        ("/api/auth/register", None),
        ("/api/auth/login", None),
        ("/api/servers/abcd1234/power", Some(token.as_str())),
        ("/api/servers/abcd1234/command", Some(token.as_str())),
    ] {
        let mut req = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let resp = app
            .router
            .clone()
            .oneshot(req.body(Body::from("{\"email\":")).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"error": "Invalid request body"}), "{}", uri);
    }

    // A body that parses but has the wrong shape
    let (status, body, _) = app
        .call(
            "POST",
            "/api/servers/abcd1234/power",
            Some(&token),
            Some(json!({"action": 5})),
        )
        .await;
    assert!(status.is_client_error());
    assert_eq!(body["error"], "Invalid request body");
    assert!(app.panel.calls().is_empty());
}

#[tokio::test]
async fn test_upstream_account_failure() {
    let app = app();
    app.panel
        .script(|s| s.create_account_failure = Some(FakeFailure::Status(500)));

    let (status, body, _) = app
        .call(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({"email": "a@b.com", "password": "password1"})),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Failed to create account. Please try again."}));
    assert!(app.db.get_user_by_email("a@b.com").unwrap().is_none());
}

#[tokio::test]
async fn test_demo_server_failure_is_not_fatal() {
    let app = app();
    app.panel
        .script(|s| s.create_server_failure = Some(FakeFailure::Network));

    let (status, body, _) = app
        .call(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({"email": "a@b.com", "password": "password1", "isDemo": true})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["serverId"].is_null());
    assert!(body["demoExpiresAt"].is_null());
}

#[tokio::test]
async fn test_login_failures_are_uniform() {
    let app = app();
    app.call(
        "POST",
        "/api/auth/register",
        None,
        Some(json!({"email": "a@b.com", "password": "password1", "isDemo": true})),
    )
    .await;

    let wrong = json!({"email": "a@b.com", "password": "password2"});
    for _ in 0..3 {
        let (status, body, _) = app.call("POST", "/api/auth/login", None, Some(wrong.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "Invalid credentials"}));
    }

    let (status, body, _) = app
        .call(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "nobody@b.com", "password": "password1"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "Invalid credentials"}));

    // No lockout: the right password still works
    let (status, body, _) = app
        .call(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "A@b.com", "password": "password1"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["serverId"], "srv00501");
}

#[tokio::test]
async fn test_session_and_logout() {
    let app = app();
    let token = app.seed("a@b.com", "abcd1234", far_future());

    let (_, body, _) = app.call("GET", "/api/auth/session", None, None).await;
    assert_eq!(body, json!({"user": null}));

    let (_, body, _) = app.call("GET", "/api/auth/session", Some(&token), None).await;
    assert_eq!(body["user"]["email"], "a@b.com");
    assert_eq!(body["serverId"], "abcd1234");

    let (status, body, headers) = app.call("POST", "/api/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cookie.contains("Max-Age=0"));

    let (_, body, _) = app.call("GET", "/api/auth/session", Some(&token), None).await;
    assert_eq!(body, json!({"user": null}));
}

#[tokio::test]
async fn test_server_routes_require_identity_and_ownership() {
    let app = app();
    let _mine = app.seed("a@b.com", "abcd1234", far_future());
    let theirs = app.seed("c@d.com", "ffff0000", far_future());

    let (status, body, _) = app.call("GET", "/api/servers/abcd1234", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "Unauthorized"}));

    let (status, _, _) = app.call("GET", "/api/servers/abcd1234", Some("bogus"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body, _) = app
        .call(
            "POST",
            "/api/servers/abcd1234/power",
            Some(&theirs),
            Some(json!({"action": "stop"})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "Server not found"}));

    // Nothing reached the panel
    assert!(app.panel.calls().is_empty());
}

#[tokio::test]
async fn test_server_detail_shape() {
    let app = app();
    let token = app.seed("a@b.com", "abcd1234", far_future());
    app.panel.script(|s| s.state = ServerState::Running);

    let (status, body, _) = app.call("GET", "/api/servers/abcd1234", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["installing"], false);
    assert_eq!(body["server"]["identifier"], "abcd1234");
    assert_eq!(body["server"]["allocations"][0]["isDefault"], true);
    assert_eq!(body["server"]["sftp"]["port"], 2022);
    assert_eq!(body["resources"]["state"], "running");
    assert_eq!(body["resources"]["uptimeMs"], 65_000);
    assert_eq!(body["plan"]["planType"], "demo");
}

#[tokio::test]
async fn test_installing_server_is_not_an_error() {
    let app = app();
    let token = app.seed("a@b.com", "abcd1234", far_future());
    app.panel
        .script(|s| s.status_failure = Some(FakeFailure::Installing));

    let (status, body, _) = app.call("GET", "/api/servers/abcd1234", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"installing": true, "server": null, "resources": null}));

    app.panel
        .script(|s| s.status_failure = Some(FakeFailure::Status(502)));
    let (status, body, _) = app.call("GET", "/api/servers/abcd1234", Some(&token), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Failed to fetch server details"}));
}

#[tokio::test]
async fn test_expired_demo_is_reported_without_mutation() {
    let app = app();
    let token = app.seed("a@b.com", "abcd1234", Some(Utc::now() - chrono::Duration::minutes(5)));

    let (status, body, _) = app.call("GET", "/api/servers/abcd1234", Some(&token), None).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body, json!({"error": "Demo expired", "expired": true}));

    assert!(app.panel.calls().is_empty());
    let user = app.db.get_user_by_email("a@b.com").unwrap().unwrap();
    let server = app.db.get_server_by_owner(user.id).unwrap().unwrap();
    assert!(server.suspended_at.is_none());
}

#[tokio::test]
async fn test_start_passes_through_when_running() {
    let app = app();
    let token = app.seed("a@b.com", "abcd1234", far_future());
    app.panel.script(|s| s.state = ServerState::Running);

    for _ in 0..2 {
        let (status, body, _) = app
            .call(
                "POST",
                "/api/servers/abcd1234/power",
                Some(&token),
                Some(json!({"action": "start"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "action": "start"}));
    }
    assert_eq!(
        app.panel.count(|c| matches!(
            c,
            PanelCall::Power { action: PowerAction::Start, identifier, .. } if identifier == "abcd1234"
        )),
        2
    );

    let (status, body, _) = app
        .call(
            "POST",
            "/api/servers/abcd1234/power",
            Some(&token),
            Some(json!({"action": "explode"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid power signal");

    app.panel
        .script(|s| s.power_failures.push_back(FakeFailure::Status(500)));
    let (status, body, _) = app
        .call(
            "POST",
            "/api/servers/abcd1234/power",
            Some(&token),
            Some(json!({"action": "kill"})),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Failed to send power signal"}));
}

#[tokio::test]
async fn test_command_relay() {
    let app = app();
    let token = app.seed("a@b.com", "abcd1234", far_future());

    let (status, body, _) = app
        .call(
            "POST",
            "/api/servers/abcd1234/command",
            Some(&token),
            Some(json!({"command": "   "})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Command is required");

    let (status, body, _) = app
        .call(
            "POST",
            "/api/servers/abcd1234/command",
            Some(&token),
            Some(json!({"command": "say hi"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(app.panel.calls().contains(&PanelCall::Command {
        identifier: "abcd1234".into(),
        command: "say hi".into(),
    }));
}

#[tokio::test]
async fn test_eula_reaccept_runs_in_background() {
    let app = app();
    let token = app.seed("a@b.com", "abcd1234", far_future());
    let other = app.seed("c@d.com", "ffff0000", far_future());

    let (status, _, _) = app
        .call("POST", "/api/servers/abcd1234/eula", Some(&other), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body, _) = app
        .call("POST", "/api/servers/abcd1234/eula", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], true);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let calls = app.panel.calls();
    assert!(calls.iter().any(|c| matches!(
        c,
        PanelCall::WriteFile { identifier, path, .. } if identifier == "abcd1234" && path == "/eula.txt"
    )));
    assert!(!calls.iter().any(|c| matches!(c, PanelCall::Power { .. })));
}

#[tokio::test]
async fn test_log_tail() {
    let app = app();
    let token = app.seed("a@b.com", "abcd1234", far_future());
    let contents: String = (1..=120).map(|i| format!("[12:00:00] line {}\n", i)).collect();
    app.panel.script(|s| s.log_contents = contents);

    let (status, body, _) = app.call("GET", "/api/servers/abcd1234/logs", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let logs = body["logs"].as_array().unwrap();
    assert_eq!(logs.len(), 100);
    assert_eq!(logs[0], "[12:00:00] line 21");
    assert!(app.panel.calls().contains(&PanelCall::ReadFile {
        identifier: "abcd1234".into(),
        path: "/logs/latest.log".into(),
    }));

    app.panel.script(|s| s.read_failure = Some(FakeFailure::Status(404)));
    let (status, body, _) = app.call("GET", "/api/servers/abcd1234/logs", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"logs": []}));
}

#[tokio::test]
async fn test_websocket_credentials_are_rewritten() {
    let app = app();
    let token = app.seed("a@b.com", "abcd1234", far_future());

    let (status, body, _) = app
        .call("GET", "/api/servers/abcd1234/websocket", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token"], "jwt-abcd1234");
    assert_eq!(body["url"], "wss://panel.example.com:8080/api/servers/fake/ws");

    let (_, body, _) = app
        .call("GET", "/api/servers/abcd1234/ws-proxy", Some(&token), None)
        .await;
    assert_eq!(body["panelOrigin"], "https://panel.example.com");

    app.panel
        .script(|s| s.websocket_failure = Some(FakeFailure::Status(403)));
    let (status, body, _) = app
        .call("GET", "/api/servers/abcd1234/websocket", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Failed to get WebSocket credentials"}));
}

#[tokio::test]
async fn test_health_reports_missing_keys() {
    let app = app();

    let (status, body, _) = app.call("GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"]["env"]["adminKey"], "missing");
    assert_eq!(body["checks"]["database"], "connected (0 users)");
    assert_eq!(body["checks"]["panel"], "connected");
}
