//! HTTP API tests, driving the router in-process.

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use common::{CRA_BUILD, zip_bytes};
use spadock::auth::{TENANT_HEADER, TokenGenerator};
use spadock::config::{ServerConfig, Settings};
use spadock::server::{AppState, create_router};
use spadock::store::{SqliteStore, Store};
use spadock::types::{DEFAULT_TENANT, Tenant, Token};

const BOUNDARY: &str = "spadock-test-boundary";

struct TestApp {
    _temp_dir: TempDir,
    state: Arc<AppState>,
    router: Router,
    admin_token: String,
    tenant_token: String,
}

fn issue_token(store: &SqliteStore, tenant_id: Option<String>) -> String {
    let (raw, lookup, hash) = TokenGenerator::new().generate().expect("generate token");
    store
        .create_token(&Token {
            id: Uuid::new_v4().to_string(),
            token_hash: hash,
            token_lookup: lookup,
            is_admin: tenant_id.is_none(),
            tenant_id,
            created_at: Utc::now(),
            expires_at: None,
            last_used_at: None,
        })
        .expect("store token");
    raw
}

impl TestApp {
    fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    fn with_settings(settings: Settings) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = SqliteStore::in_memory().expect("open store");
        store.initialize().expect("initialize store");

        let tenant = Tenant {
            id: Uuid::new_v4().to_string(),
            name: DEFAULT_TENANT.to_string(),
            created_at: Utc::now(),
        };
        store.create_tenant(&tenant).expect("create tenant");
        let admin_token = issue_token(&store, None);
        let tenant_token = issue_token(&store, Some(tenant.id));

        let config = ServerConfig {
            data_dir: temp_dir.path().to_path_buf(),
            public_base_url: Some("https://apps.example.com".to_string()),
            ..ServerConfig::default()
        };
        let state = Arc::new(AppState::new(Arc::new(store), &config, settings));
        let router = create_router(Arc::clone(&state));

        Self {
            _temp_dir: temp_dir,
            state,
            router,
            admin_token,
            tenant_token,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router never fails");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        (status, body.to_vec())
    }

    async fn json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = self.send(request).await;
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    async fn upload(&self, token: &str, slug: &str, archive: &[u8]) -> (StatusCode, Value) {
        self.json(multipart_upload(token, slug, archive)).await
    }
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn send_json(method: &str, uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart_upload(token: &str, slug: &str, archive: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"slug\"\r\n\r\n{slug}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"build.zip\"\r\nContent-Type: application/zip\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(archive);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/api/v1/projects")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.send(get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn test_projects_require_auth() {
    let app = TestApp::new();
    let (status, body) = app.json(get("/api/v1/projects", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authentication required");

    let (status, _) = app.json(get("/api/v1/projects", Some("spadock_bogus_token"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_routes_reject_tenant_tokens() {
    let app = TestApp::new();
    let (status, _) = app
        .json(get("/api/v1/admin/tenants", Some(&app.tenant_token)))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_upload_then_query_catalog_and_plan() {
    let app = TestApp::new();

    let (status, body) = app
        .upload(&app.tenant_token, "demo", &zip_bytes(CRA_BUILD))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["created"], true);
    assert_eq!(body["data"]["project"]["slug"], "demo");
    assert_eq!(body["data"]["report"]["extracted_file_count"], 3);

    let (status, body) = app
        .json(get("/api/v1/projects/demo/assets", Some(&app.tenant_token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    let paths: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["relative_path"].as_str().unwrap())
        .collect();
    assert_eq!(
        paths,
        ["static/css/main.css", "static/js/main.abc123.js", "index.html"]
    );

    let (status, body) = app
        .json(get("/api/v1/projects/demo/plan", Some(&app.tenant_token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    let css_url = body["data"]["critical_css"][0]["url"].as_str().unwrap();
    assert!(
        css_url.starts_with("https://apps.example.com/assets/default/demo/static/css/main.css?v="),
        "{css_url}"
    );
    assert_eq!(body["data"]["critical_css"][0]["strategy"], "inline");

    // Re-upload of the same slug replaces it, and the next plan reflects the
    // new files without waiting for the event-driven invalidation.
    let v2 = zip_bytes(&[
        ("index.html", b"<!doctype html><html><body>v2</body></html>"),
        ("static/js/main.def456.js", b"console.log('main v2');"),
    ]);
    let (status, body) = app.upload(&app.tenant_token, "demo", &v2).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["created"], false);
    let new_version = body["data"]["project"]["content_version"].clone();

    let (status, body) = app
        .json(get("/api/v1/projects/demo/plan", Some(&app.tenant_token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["content_version"], new_version);
    assert!(body["data"]["critical_css"].as_array().unwrap().is_empty());
    let js_url = body["data"]["critical_js"][0]["url"].as_str().unwrap();
    assert!(js_url.contains("static/js/main.def456.js"), "{js_url}");
}

#[tokio::test]
async fn test_security_detail_depends_on_caller() {
    let app = TestApp::new();
    let archive = zip_bytes(&[
        ("index.html", b"<html></html>"),
        ("../escape.js", b"1"),
        ("shell.php", b"<?php system($_GET['c']); ?>"),
    ]);

    let (status, tenant_body) = app.upload(&app.tenant_token, "demo", &archive).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let (status, admin_body) = app.upload(&app.admin_token, "demo", &archive).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let tenant_msg = tenant_body["error"].as_str().unwrap();
    let admin_msg = admin_body["error"].as_str().unwrap();
    assert!(admin_msg.contains(';'), "{admin_msg}");
    assert!(!tenant_msg.contains(';'), "{tenant_msg}");
    assert!(admin_msg.len() > tenant_msg.len());
}

#[tokio::test]
async fn test_invalid_slug_is_bad_request() {
    let app = TestApp::new();
    let (status, body) = app
        .upload(&app.tenant_token, "Not A Slug", &zip_bytes(CRA_BUILD))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
async fn test_render_and_serve_assets() {
    let app = TestApp::new();
    let (status, uploaded) = app
        .upload(&app.tenant_token, "demo", &zip_bytes(CRA_BUILD))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let version = uploaded["data"]["project"]["content_version"]
        .as_str()
        .unwrap()
        .to_string();
    let main_hash = uploaded["data"]["assets"]
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["relative_path"] == "static/js/main.abc123.js")
        .map(|a| a["content_hash"].as_str().unwrap().to_string())
        .unwrap();

    let (status, body) = app
        .send(get("/render/default/demo?class=hero&responsive=true", None))
        .await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("<style data-spadock=\"demo\">body { margin: 0; }</style>"));
    assert!(html.contains("spadock-app spadock-responsive hero"), "{html}");
    assert!(html.contains("<script>console.log('main');</script>"), "{html}");

    let (status, body) = app
        .json(get("/render/default/demo?format=json", None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["markup"].as_str().unwrap().contains("data-spadock-slug=\"demo\""));

    let main_js = "/assets/default/demo/static/js/main.abc123.js";
    for (query, immutable) in [
        (format!("?v={version}"), true),
        (format!("?v={main_hash}"), true),
        ("?v=abc".to_string(), false),
        (String::new(), false),
    ] {
        let response = app
            .router
            .clone()
            .oneshot(get(&format!("{main_js}{query}"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/javascript; charset=utf-8"
        );
        let cache_control = response.headers()[header::CACHE_CONTROL].to_str().unwrap();
        assert_eq!(cache_control.contains("immutable"), immutable, "{query}: {cache_control}");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"console.log('main');");
    }

    for hidden in [
        "/assets/default/demo/.htaccess",
        "/assets/default/demo/.spadock-report.json",
        "/assets/default/demo/static/js/missing.js",
        "/assets/default/demo/..%2F..%2Fspadock.db",
    ] {
        let (status, _) = app.send(get(hidden, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{hidden}");
    }
}

#[tokio::test]
async fn test_deactivated_project_renders_by_viewer() {
    let app = TestApp::new();
    app.upload(&app.tenant_token, "demo", &zip_bytes(CRA_BUILD))
        .await;

    let (status, body) = app
        .json(send_json(
            "POST",
            "/api/v1/projects/demo/deactivate",
            &app.tenant_token,
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "inactive");

    let (_, anonymous) = app.send(get("/render/default/demo", None)).await;
    assert!(anonymous.is_empty());

    let (_, privileged) = app
        .send(get("/render/default/demo", Some(&app.tenant_token)))
        .await;
    let privileged = String::from_utf8(privileged).unwrap();
    assert!(privileged.contains("spadock-notice"));
    assert!(privileged.contains("is deactivated"));

    let (status, _) = app
        .send(get("/assets/default/demo/static/css/main.css", None))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_project_keeps_backup() {
    let app = TestApp::new();
    app.upload(&app.tenant_token, "demo", &zip_bytes(CRA_BUILD))
        .await;

    let request = Request::delete("/api/v1/projects/demo")
        .header(header::AUTHORIZATION, format!("Bearer {}", app.tenant_token))
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.json(request).await;
    assert_eq!(status, StatusCode::OK);
    let backup = body["data"]["backup_path"].as_str().unwrap();
    assert!(std::path::Path::new(backup).join("index.html").is_file());

    let (status, _) = app
        .json(get("/api/v1/projects/demo", Some(&app.tenant_token)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_chunked_upload() {
    let app = TestApp::new();
    let archive = zip_bytes(CRA_BUILD);
    let (first, second) = archive.split_at(archive.len() / 2);

    let (status, body) = app
        .json(send_json(
            "POST",
            "/api/v1/uploads",
            &app.tenant_token,
            json!({"slug": "chunked", "filename": "build.zip", "total_chunks": 2}),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    // Out of order, with a duplicate.
    for (index, part) in [(1, second), (0, first), (1, second)] {
        let request = Request::put(format!("/api/v1/uploads/{id}/chunks/{index}"))
            .header(header::AUTHORIZATION, format!("Bearer {}", app.tenant_token))
            .body(Body::from(part.to_vec()))
            .unwrap();
        let (status, _) = app.send(request).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let (status, body) = app
        .json(get(&format!("/api/v1/uploads/{id}"), Some(&app.tenant_token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["received_chunks"], json!([0, 1]));

    let (status, body) = app
        .json(send_json(
            "POST",
            &format!("/api/v1/uploads/{id}/finalize"),
            &app.tenant_token,
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["project"]["slug"], "chunked");

    assert!(app.state.store.get_upload_session(&id).unwrap().is_none());
}

#[tokio::test]
async fn test_admin_tenant_and_token_lifecycle() {
    let app = TestApp::new();

    let (status, _) = app
        .json(send_json(
            "POST",
            "/api/v1/admin/tenants",
            &app.admin_token,
            json!({"name": "acme"}),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .json(send_json(
            "POST",
            "/api/v1/admin/tokens",
            &app.admin_token,
            json!({"tenant": "acme"}),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let acme_token = body["data"]["token"].as_str().unwrap().to_string();

    let (status, _) = app
        .upload(&acme_token, "site", &zip_bytes(CRA_BUILD))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // The default tenant's token cannot see acme's project.
    let (status, _) = app
        .json(get("/api/v1/projects/site", Some(&app.tenant_token)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // An admin picks the tenant by header.
    let request = Request::get("/api/v1/projects/site")
        .header(header::AUTHORIZATION, format!("Bearer {}", app.admin_token))
        .header(TENANT_HEADER, "acme")
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.json(request).await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::delete("/api/v1/admin/tenants/acme")
        .header(header::AUTHORIZATION, format!("Bearer {}", app.admin_token))
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.json(request).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected() {
    let settings = Settings {
        max_upload_bytes: 64,
        ..Settings::default()
    };
    let app = TestApp::with_settings(settings);
    let (status, _) = app
        .upload(&app.tenant_token, "demo", &zip_bytes(CRA_BUILD))
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
