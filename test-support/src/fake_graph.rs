use crate::serve_on_ephemeral_port;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    borrow::Cow,
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

const ACCESS_TOKEN: &str = "fake-graph-access-token";
const TOKEN_LIFETIME_SECONDS: i64 = 3599;

/// Stand-in for both the Azure AD token endpoint (under `/login`) and the
/// Graph API (under `/graph`).
#[derive(Clone)]
pub struct FakeGraph {
    client_secret: Cow<'static, str>,
    accept_any_token: bool,
    omit_access_token: bool,
    mail_failure: Option<u16>,
    list_failure: Option<u16>,
    subscribers: Vec<String>,
}

#[derive(Default)]
struct Recorded {
    token_requests: Vec<String>,
    sent_mail: Vec<Value>,
    mail_senders: Vec<String>,
    list_filters: Vec<String>,
    list_items: Vec<Value>,
    subscribers: BTreeSet<String>,
}

struct FakeGraphState {
    config: FakeGraph,
    recorded: Mutex<Recorded>,
}

pub struct RunningFakeGraph {
    base_url: String,
    state: Arc<FakeGraphState>,
}

#[derive(Deserialize)]
struct CreateItemPayload {
    fields: Value,
}

impl FakeGraph {
    pub fn new(client_secret: impl Into<Cow<'static, str>>) -> Self {
        Self {
            client_secret: client_secret.into(),
            accept_any_token: false,
            omit_access_token: false,
            mail_failure: None,
            list_failure: None,
            subscribers: vec![],
        }
    }

    /// Accepts any bearer token on Graph calls instead of only the one this
    /// fake issued.
    pub fn accept_any_token(self) -> Self {
        Self {
            accept_any_token: true,
            ..self
        }
    }

    pub fn omit_access_token(self) -> Self {
        Self {
            omit_access_token: true,
            ..self
        }
    }

    pub fn fail_mail_with(self, status: u16) -> Self {
        Self {
            mail_failure: Some(status),
            ..self
        }
    }

    pub fn fail_list_with(self, status: u16) -> Self {
        Self {
            list_failure: Some(status),
            ..self
        }
    }

    pub fn with_subscriber(mut self, email: impl Into<String>) -> Self {
        self.subscribers.push(email.into());
        self
    }

    pub async fn start(self) -> RunningFakeGraph {
        let recorded = Recorded {
            subscribers: self.subscribers.iter().cloned().collect(),
            ..Default::default()
        };
        let state = Arc::new(FakeGraphState {
            config: self,
            recorded: Mutex::new(recorded),
        });
        let app = Router::new()
            .route("/login/:tenant/oauth2/v2.0/token", post(issue_token))
            .route("/graph/users/:sender/sendMail", post(send_mail))
            .route(
                "/graph/sites/:site/lists/:list/items",
                get(query_items).post(create_item),
            )
            .with_state(state.clone());
        RunningFakeGraph {
            base_url: serve_on_ephemeral_port(app).await,
            state,
        }
    }
}

impl RunningFakeGraph {
    pub fn authority_host(&self) -> String {
        format!("{}/login", self.base_url)
    }

    pub fn graph_url(&self) -> String {
        format!("{}/graph", self.base_url)
    }

    pub fn access_token(&self) -> String {
        ACCESS_TOKEN.into()
    }

    /// Raw form-encoded bodies of every token request.
    pub fn token_requests(&self) -> Vec<String> {
        self.recorded().token_requests.clone()
    }

    pub fn sent_mail(&self) -> Vec<Value> {
        self.recorded().sent_mail.clone()
    }

    pub fn mail_senders(&self) -> Vec<String> {
        self.recorded().mail_senders.clone()
    }

    pub fn list_filters(&self) -> Vec<String> {
        self.recorded().list_filters.clone()
    }

    /// The `fields` object of every list item created.
    pub fn list_items(&self) -> Vec<Value> {
        self.recorded().list_items.clone()
    }

    fn recorded(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.state.recorded.lock().unwrap()
    }
}

async fn issue_token(State(state): State<Arc<FakeGraphState>>, body: Bytes) -> Response {
    let form: HashMap<String, String> = url::form_urlencoded::parse(&body).into_owned().collect();
    state
        .recorded
        .lock()
        .unwrap()
        .token_requests
        .push(String::from_utf8_lossy(&body).into_owned());

    let config = &state.config;
    if form.get("client_secret").map(String::as_str) != Some(config.client_secret.as_ref())
        || form.get("grant_type").map(String::as_str) != Some("client_credentials")
    {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_client"})),
        )
            .into_response();
    }
    let payload = if config.omit_access_token {
        json!({"token_type": "Bearer", "expires_in": TOKEN_LIFETIME_SECONDS})
    } else {
        json!({
            "token_type": "Bearer",
            "expires_in": TOKEN_LIFETIME_SECONDS,
            "access_token": ACCESS_TOKEN,
        })
    };
    (StatusCode::OK, Json(payload)).into_response()
}

async fn send_mail(
    State(state): State<Arc<FakeGraphState>>,
    Path(sender): Path<String>,
    headers: HeaderMap,
    Json(message): Json<Value>,
) -> Response {
    if let Some(rejection) = check_authorization(&state.config, &headers) {
        return rejection;
    }
    if let Some(status) = state.config.mail_failure {
        return failure(status);
    }
    let mut recorded = state.recorded.lock().unwrap();
    recorded.sent_mail.push(message);
    recorded.mail_senders.push(sender);
    StatusCode::ACCEPTED.into_response()
}

async fn query_items(
    State(state): State<Arc<FakeGraphState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Some(rejection) = check_authorization(&state.config, &headers) {
        return rejection;
    }
    if let Some(status) = state.config.list_failure {
        return failure(status);
    }
    let filter = query.get("$filter").cloned().unwrap_or_default();
    let mut recorded = state.recorded.lock().unwrap();
    let matched = filter
        .strip_prefix("fields/Email eq '")
        .and_then(|rest| rest.strip_suffix('\''))
        .is_some_and(|email| recorded.subscribers.contains(email));
    recorded.list_filters.push(filter);
    let value = if matched {
        json!([{"id": "1"}])
    } else {
        json!([])
    };
    (StatusCode::OK, Json(json!({ "value": value }))).into_response()
}

async fn create_item(
    State(state): State<Arc<FakeGraphState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateItemPayload>,
) -> Response {
    if let Some(rejection) = check_authorization(&state.config, &headers) {
        return rejection;
    }
    if let Some(status) = state.config.list_failure {
        return failure(status);
    }
    let mut recorded = state.recorded.lock().unwrap();
    if let Some(email) = payload.fields.get("Email").and_then(Value::as_str) {
        recorded.subscribers.insert(email.to_string());
    }
    recorded.list_items.push(payload.fields.clone());
    let id = recorded.list_items.len().to_string();
    (
        StatusCode::CREATED,
        Json(json!({"id": id, "fields": payload.fields})),
    )
        .into_response()
}

fn check_authorization(config: &FakeGraph, headers: &HeaderMap) -> Option<Response> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let authorized = match token {
        Some(token) => config.accept_any_token || token == ACCESS_TOKEN,
        None => false,
    };
    (!authorized).then(|| failure(401))
}

fn failure(status: u16) -> Response {
    let status = StatusCode::from_u16(status).unwrap();
    (
        status,
        Json(json!({"error": {"code": "fakeFailure", "message": status.to_string()}})),
    )
        .into_response()
}
