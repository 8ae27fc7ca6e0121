use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
    routing::{get, post},
};
use chrono::{Duration, Utc};
use diskform::clients::{DiskError, RemoteStorage};
use diskform::config::Config;
use diskform::db::ProviderTokens;
use diskform::services::Sleeper;
use diskform::spreadsheet;
use diskform::state::SharedState;
use http_body_util::BodyExt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// In-memory Disk that counts every remote call.
#[derive(Default)]
struct FakeDisk {
    file: Mutex<Option<Vec<u8>>>,
    calls: AtomicU32,
}

impl FakeDisk {
    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteStorage for FakeDisk {
    async fn ensure_directory(&self, _token: &str, _path: &str) -> Result<(), DiskError> {
        self.hit();
        Ok(())
    }

    async fn get_upload_url(
        &self,
        _token: &str,
        _path: &str,
        _overwrite: bool,
    ) -> Result<String, DiskError> {
        self.hit();
        Ok("https://uploader.example/upload".to_string())
    }

    async fn upload_bytes(
        &self,
        _token: &str,
        _upload_url: &str,
        bytes: &[u8],
    ) -> Result<(), DiskError> {
        self.hit();
        *self.file.lock().unwrap() = Some(bytes.to_vec());
        Ok(())
    }

    async fn publish(&self, _token: &str, _path: &str) -> Result<String, DiskError> {
        self.hit();
        Ok("https://yadi.sk/d/ledger".to_string())
    }

    async fn public_url(&self, _token: &str, _path: &str) -> Result<Option<String>, DiskError> {
        self.hit();
        Ok(None)
    }

    async fn get_download_url(&self, _token: &str, path: &str) -> Result<String, DiskError> {
        self.hit();
        if self.file.lock().unwrap().is_some() {
            Ok("https://downloader.example/ledger".to_string())
        } else {
            Err(DiskError::NotFound(path.to_string()))
        }
    }

    async fn download_bytes(&self, _token: &str, _url: &str) -> Result<Vec<u8>, DiskError> {
        self.hit();
        self.file
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DiskError::NotFound("ledger".to_string()))
    }

    async fn download_public(&self, _public_key: &str) -> Result<Vec<u8>, DiskError> {
        self.hit();
        Err(DiskError::Download("not published".to_string()))
    }
}

struct NoSleep;

#[async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _duration: std::time::Duration) {}
}

struct TestApp {
    router: Router,
    shared: Arc<SharedState>,
    disk: Arc<FakeDisk>,
}

async fn spawn_app_with(config: Config) -> TestApp {
    let disk = Arc::new(FakeDisk::default());
    let shared = Arc::new(
        SharedState::with_storage(config, reqwest::Client::new(), disk.clone(), Arc::new(NoSleep))
            .await
            .expect("Failed to create shared state"),
    );
    let state = diskform::api::create_app_state(shared.clone(), None);
    let router = diskform::api::router(state).await;

    TestApp {
        router,
        shared,
        disk,
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.general.database_path = "sqlite::memory:".to_string();
    config
}

async fn spawn_app() -> TestApp {
    spawn_app_with(test_config()).await
}

/// User with a linked Yandex account and a valid API key.
async fn seed_user_with_key(app: &TestApp, email: &str, expires_in: Duration) -> String {
    let tokens = ProviderTokens {
        access_token: "yandex-token".to_string(),
        refresh_token: None,
        expires_at: None,
    };
    let user = app
        .shared
        .store
        .upsert_oauth_identity(email, "Test", &tokens)
        .await
        .unwrap();

    let key = diskform::db::generate_api_key();
    app.shared
        .store
        .set_user_api_key(user.id, &key, Utc::now() + expires_in)
        .await
        .unwrap();
    key
}

fn upload_request(api_key: Option<&str>, body: &serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = api_key {
        builder = builder.header("X-API-KEY", key);
    }
    builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

async fn json_body(response: Response<Body>) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn forms() -> serde_json::Value {
    serde_json::json!({ "forms": [{ "name": "John", "email": "j@x.com" }] })
}

#[tokio::test]
async fn test_upload_without_key_is_unauthorized() {
    let app = spawn_app().await;

    let response = app
        .router
        .clone()
        .oneshot(upload_request(None, &forms()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());
    assert_eq!(app.disk.calls(), 0);
}

#[tokio::test]
async fn test_upload_with_unknown_key_is_unauthorized() {
    let app = spawn_app().await;
    seed_user_with_key(&app, "john@example.com", Duration::days(30)).await;

    let response = app
        .router
        .clone()
        .oneshot(upload_request(Some("wrong-key"), &forms()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.disk.calls(), 0);
}

#[tokio::test]
async fn test_upload_with_expired_key_is_unauthorized() {
    let app = spawn_app().await;
    let key = seed_user_with_key(&app, "john@example.com", -Duration::minutes(1)).await;

    let response = app
        .router
        .clone()
        .oneshot(upload_request(Some(&key), &forms()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.disk.calls(), 0);
}

#[tokio::test]
async fn test_first_upload_creates_ledger() {
    let app = spawn_app().await;
    let key = seed_user_with_key(&app, "john@example.com", Duration::days(30)).await;

    let response = app
        .router
        .clone()
        .oneshot(upload_request(Some(&key), &forms()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["action"], "updated");
    assert_eq!(body["attempts"], 1);
    assert_eq!(body["file_name"], "data.xlsx");
    assert!(!body["url"].as_str().unwrap().is_empty());

    let bytes = app.disk.file.lock().unwrap().clone().unwrap();
    let sheet = spreadsheet::decode(&bytes).unwrap();
    assert_eq!(sheet.headers, vec!["name".to_string(), "email".to_string()]);
    assert_eq!(sheet.rows.len(), 1);
    assert_eq!(sheet.rows[0]["email"], "j@x.com");
}

#[tokio::test]
async fn test_second_upload_appends_rows() {
    let app = spawn_app().await;
    let key = seed_user_with_key(&app, "john@example.com", Duration::days(30)).await;

    for body in [
        forms(),
        serde_json::json!({ "forms": [{ "name": "Ann", "phone": "123" }] }),
    ] {
        let response = app
            .router
            .clone()
            .oneshot(upload_request(Some(&key), &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let bytes = app.disk.file.lock().unwrap().clone().unwrap();
    let sheet = spreadsheet::decode(&bytes).unwrap();
    assert_eq!(sheet.headers, vec!["name", "email", "phone"]);
    assert_eq!(sheet.rows.len(), 2);
    assert_eq!(sheet.rows[1]["phone"], "123");
    assert_eq!(sheet.rows[1]["email"], "");
}

#[tokio::test]
async fn test_invalid_forms_are_rejected() {
    let app = spawn_app().await;
    let key = seed_user_with_key(&app, "john@example.com", Duration::days(30)).await;

    for body in [
        serde_json::json!({}),
        serde_json::json!({ "forms": [] }),
        serde_json::json!({ "forms": ["not an object"] }),
    ] {
        let response = app
            .router
            .clone()
            .oneshot(upload_request(Some(&key), &body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(json_body(response).await["success"], false);
    }
    assert_eq!(app.disk.calls(), 0);
}

#[tokio::test]
async fn test_fallback_identity_serves_keyless_requests() {
    let mut config = test_config();
    config.upload.fallback_identity_email = Some("admin@example.com".to_string());
    let app = spawn_app_with(config).await;
    seed_user_with_key(&app, "admin@example.com", Duration::days(30)).await;

    let response = app
        .router
        .clone()
        .oneshot(upload_request(None, &forms()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.disk.calls() > 0);
}

#[tokio::test]
async fn test_browser_upload_without_session_is_unauthorized() {
    let app = spawn_app().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload-to-yandex")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&forms()).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.disk.calls(), 0);
}

#[tokio::test]
async fn test_health() {
    let app = spawn_app().await;

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
}

// ============================================================================
// Session flow against a local fake Yandex OAuth server
// ============================================================================

async fn spawn_fake_oauth() -> String {
    let app = Router::new()
        .route(
            "/token",
            post(|| async {
                Json(serde_json::json!({
                    "access_token": "fresh-token",
                    "refresh_token": "refresh",
                    "expires_in": 3600
                }))
            }),
        )
        .route(
            "/info",
            get(|| async {
                Json(serde_json::json!({
                    "login": "jdoe",
                    "default_email": "jdoe@example.com",
                    "real_name": "John Doe"
                }))
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn session_cookie(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .expect("session cookie")
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

/// Logs in through `/auth/yandex` and returns the session cookie.
async fn login(app: &TestApp) -> String {
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/auth/yandex").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.status().is_redirection());

    let cookie = session_cookie(&response);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    let authorize = url::Url::parse(location).unwrap();
    let state = authorize
        .query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/auth/yandex/callback?code=abc&state={state}"))
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_redirection(), "{}", response.status());

    session_cookie(&response)
}

async fn spawn_app_with_oauth() -> TestApp {
    let oauth = spawn_fake_oauth().await;
    let mut config = test_config();
    config.yandex.oauth_url = oauth.clone();
    config.yandex.login_info_url = format!("{oauth}/info");
    spawn_app_with(config).await
}

#[tokio::test]
async fn test_login_creates_session_user() {
    let app = spawn_app_with_oauth().await;
    let cookie = login(&app).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["email"], "jdoe@example.com");
    assert_eq!(body["name"], "John Doe");
    assert_eq!(body["yandex_linked"], true);
}

#[tokio::test]
async fn test_callback_rejects_mismatched_state() {
    let app = spawn_app_with_oauth().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/auth/yandex/callback?code=abc&state=forged")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_api_key_issuance_is_limited() {
    let app = spawn_app_with_oauth().await;
    let cookie = login(&app).await;

    let issue = || {
        Request::builder()
            .method("POST")
            .uri("/api/auth/api-key")
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .unwrap()
    };

    let response = app.router.clone().oneshot(issue()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let key = body["api_key"].as_str().unwrap().to_string();
    assert_eq!(key.len(), 64);

    let response = app.router.clone().oneshot(issue()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json_body(response).await["success"], false);

    // The issued key works on the JSON API
    let response = app
        .router
        .clone()
        .oneshot(upload_request(Some(&key), &forms()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_api_key_issuance_requires_session() {
    let app = spawn_app().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/api-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_browser_upload_with_session() {
    let app = spawn_app_with_oauth().await;
    let cookie = login(&app).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload-to-yandex")
                .header(header::COOKIE, &cookie)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&forms()).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["attempts"], 1);
}

#[tokio::test]
async fn test_browser_upload_accepts_xlsx_file() {
    let app = spawn_app_with_oauth().await;
    let cookie = login(&app).await;

    let mut upload = spreadsheet::Sheet::default();
    upload.merge(vec![
        [("name", "Ann"), ("city", "Kazan")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    ]);
    let file = spreadsheet::encode(&upload).unwrap();

    let boundary = "diskformboundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"forms.xlsx\"\r\n\
             Content-Type: application/vnd.openxmlformats-officedocument.spreadsheetml.sheet\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(&file);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload-to-yandex")
                .header(header::COOKIE, &cookie)
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let bytes = app.disk.file.lock().unwrap().clone().unwrap();
    let sheet = spreadsheet::decode(&bytes).unwrap();
    assert_eq!(sheet.headers, vec!["name", "city"]);
    assert_eq!(sheet.rows[0]["city"], "Kazan");
}

#[tokio::test]
async fn test_logout_ends_session() {
    let app = spawn_app_with_oauth().await;
    let cookie = login(&app).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/logout")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
