//! A stub org served by axum on an ephemeral port.
//!
//! It accepts exactly one bearer token at a time, answers everything else
//! with `INVALID_SESSION_ID`, and exposes counters so tests can assert how
//! many data, token, and relay calls were made.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Form, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use forcelink_session::{ClientConfig, ForceClient, Session};

/// How the token endpoint answers a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Issue a new token and start accepting it.
    Rotate,
    /// Issue a token the data endpoints still reject.
    Stale,
    /// Reject the refresh token.
    Reject,
}

/// A request the stub saw on a data endpoint.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub via_proxy: bool,
}

pub struct OrgState {
    pub base: Mutex<String>,
    pub valid_token: Mutex<String>,
    pub refresh_mode: Mutex<RefreshMode>,
    pub refresh_delay: Mutex<Duration>,
    pub limit_info: Mutex<Option<String>>,
    pub identity_fails: Mutex<bool>,
    pub data_hits: AtomicUsize,
    pub token_hits: AtomicUsize,
    pub proxy_hits: AtomicUsize,
    pub requests: Mutex<Vec<Recorded>>,
    pub refresh_forms: Mutex<Vec<HashMap<String, String>>>,
}

impl OrgState {
    fn new() -> Self {
        Self {
            base: Mutex::new(String::new()),
            valid_token: Mutex::new("valid-token".to_string()),
            refresh_mode: Mutex::new(RefreshMode::Rotate),
            refresh_delay: Mutex::new(Duration::ZERO),
            limit_info: Mutex::new(None),
            identity_fails: Mutex::new(false),
            data_hits: AtomicUsize::new(0),
            token_hits: AtomicUsize::new(0),
            proxy_hits: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            refresh_forms: Mutex::new(Vec::new()),
        }
    }

    pub fn data_hits(&self) -> usize {
        self.data_hits.load(Ordering::SeqCst)
    }

    pub fn token_hits(&self) -> usize {
        self.token_hits.load(Ordering::SeqCst)
    }

    pub fn proxy_hits(&self) -> usize {
        self.proxy_hits.load(Ordering::SeqCst)
    }

    pub fn set_valid_token(&self, token: &str) {
        *self.valid_token.lock().unwrap() = token.to_string();
    }

    pub fn set_refresh_mode(&self, mode: RefreshMode) {
        *self.refresh_mode.lock().unwrap() = mode;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn set_limit_info(&self, value: Option<&str>) {
        *self.limit_info.lock().unwrap() = value.map(str::to_string);
    }

    pub fn last_request(&self) -> Recorded {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no request recorded")
    }
}

pub struct StubOrg {
    pub base: String,
    pub state: Arc<OrgState>,
    _server: tokio::task::JoinHandle<()>,
}

impl StubOrg {
    /// Bind to 127.0.0.1:0 and serve the stub org.
    pub async fn start() -> Self {
        let state = Arc::new(OrgState::new());
        let app = Router::new()
            .route("/services/data/", any(data))
            .route("/services/data/{*rest}", any(data))
            .route("/services/oauth2/token", post(token))
            .route("/id/{org}/{user}", get(identity))
            .route("/proxy", any(proxy))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to port 0");
        let addr: SocketAddr = listener.local_addr().expect("get local addr");
        let base = format!("http://127.0.0.1:{}", addr.port());
        *state.base.lock().unwrap() = base.clone();

        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            base,
            state,
            _server: server,
        }
    }

    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new("test-consumer", format!("{}/cb", self.base));
        config.login_url = format!("{}/", self.base);
        config
    }

    pub fn client(&self) -> ForceClient {
        ForceClient::new(self.config()).expect("valid config")
    }

    /// A session whose token the org currently accepts.
    pub fn valid_session(&self) -> Session {
        let token = self.state.valid_token.lock().unwrap().clone();
        Session::from_access_token(token, self.base.clone()).with_refresh_token("refresh-1")
    }

    /// A session the org rejects as expired.
    pub fn stale_session(&self) -> Session {
        Session::from_access_token("stale-token", self.base.clone()).with_refresh_token("refresh-1")
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn bearer(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn expired() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(json!([{"errorCode": "INVALID_SESSION_ID", "message": "Session expired or invalid"}])),
    )
        .into_response()
}

async fn data(
    State(org): State<Arc<OrgState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let token = bearer(&headers, AUTHORIZATION.as_str());
    respond(
        &org,
        Recorded {
            method,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers,
            body,
            via_proxy: false,
        },
        token,
    )
}

async fn proxy(
    State(org): State<Arc<OrgState>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    org.proxy_hits.fetch_add(1, Ordering::SeqCst);

    let Some(endpoint) = headers
        .get("salesforceproxy-endpoint")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| url::Url::parse(v).ok())
    else {
        return (StatusCode::BAD_REQUEST, "ERROR: SALESFORCEPROXY-ENDPOINT NOT SPECIFIED")
            .into_response();
    };

    if endpoint.path() == "/services/oauth2/token" {
        let form = url::form_urlencoded::parse(&body).into_owned().collect();
        return refresh(&org, form).await;
    }

    let token = bearer(&headers, "x-authorization");
    respond(
        &org,
        Recorded {
            method,
            path: endpoint.path().to_string(),
            query: endpoint.query().map(str::to_string),
            headers,
            body,
            via_proxy: true,
        },
        token,
    )
}

fn respond(org: &OrgState, request: Recorded, token: Option<String>) -> Response {
    org.data_hits.fetch_add(1, Ordering::SeqCst);
    org.requests.lock().unwrap().push(request.clone());

    let valid = org.valid_token.lock().unwrap().clone();
    if token.as_deref() != Some(valid.as_str()) {
        return expired();
    }

    let path = request.path.as_str();
    let mut response = if path.ends_with("/missing") {
        (
            StatusCode::NOT_FOUND,
            axum::Json(json!([{"errorCode": "NOT_FOUND", "message": "The requested resource does not exist"}])),
        )
            .into_response()
    } else if path.ends_with("/Body") {
        (
            [(CONTENT_TYPE, "application/octet-stream")],
            Bytes::from_static(b"%PDF-1.4 binary"),
        )
            .into_response()
    } else if path.ends_with("/query") {
        axum::Json(json!({
            "totalSize": 3,
            "done": false,
            "nextRecordsUrl": "/services/data/v35.0/query/01gQ-2",
            "records": [{"Id": "001A"}, {"Id": "001B"}]
        }))
        .into_response()
    } else if path.ends_with("/query/01gQ-2") {
        axum::Json(json!({
            "totalSize": 3,
            "done": true,
            "records": [{"Id": "001C"}]
        }))
        .into_response()
    } else if request.method == Method::POST && path.ends_with("/sobjects/Account") {
        (
            StatusCode::CREATED,
            axum::Json(json!({"id": "001NEW", "success": true, "errors": []})),
        )
            .into_response()
    } else if request.method == Method::PATCH || request.method == Method::DELETE {
        StatusCode::NO_CONTENT.into_response()
    } else {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        axum::Json(json!({
            "method": request.method.as_str(),
            "path": path,
            "query": request.query,
            "body": body,
        }))
        .into_response()
    };

    if let Some(limit) = org.limit_info.lock().unwrap().clone() {
        response.headers_mut().insert(
            "sforce-limit-info",
            HeaderValue::from_str(&limit).unwrap(),
        );
    }
    response
}

async fn token(State(org): State<Arc<OrgState>>, Form(form): Form<HashMap<String, String>>) -> Response {
    refresh(&org, form).await
}

async fn refresh(org: &OrgState, form: HashMap<String, String>) -> Response {
    let hit = org.token_hits.fetch_add(1, Ordering::SeqCst) + 1;
    org.refresh_forms.lock().unwrap().push(form);

    let delay = *org.refresh_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mode = *org.refresh_mode.lock().unwrap();
    match mode {
        RefreshMode::Rotate => {
            let token = format!("fresh-{hit}");
            org.set_valid_token(&token);
            let base = org.base.lock().unwrap().clone();
            axum::Json(json!({
                "access_token": token,
                "instance_url": base,
                "id": format!("{base}/id/00D/005"),
                "issued_at": "1700000000000",
                "signature": "sig",
                "token_type": "Bearer"
            }))
            .into_response()
        }
        RefreshMode::Stale => axum::Json(json!({"access_token": "still-stale"})).into_response(),
        RefreshMode::Reject => (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({"error": "invalid_grant", "error_description": "expired access/refresh token"})),
        )
            .into_response(),
    }
}

async fn identity(State(org): State<Arc<OrgState>>, headers: HeaderMap) -> Response {
    if *org.identity_fails.lock().unwrap() {
        return (
            StatusCode::FORBIDDEN,
            axum::Json(json!({"error": "forbidden", "error_description": "identity unavailable"})),
        )
            .into_response();
    }
    let valid = org.valid_token.lock().unwrap().clone();
    if bearer(&headers, AUTHORIZATION.as_str()).as_deref() != Some(valid.as_str()) {
        return expired();
    }
    axum::Json(json!({
        "user_id": "005",
        "organization_id": "00D",
        "username": "user@example.com.dev",
        "email": "user@example.com"
    }))
    .into_response()
}
