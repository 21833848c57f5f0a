use crate::serve_on_ephemeral_port;
use axum::{
    extract::{Form, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    sync::{Arc, Mutex},
};

const VERIFY_PATH: &str = "/turnstile/v0/siteverify";

/// Stand-in for the Turnstile siteverify endpoint.
#[derive(Clone)]
pub struct FakeTurnstile {
    required_secret: Cow<'static, str>,
    required_token: Option<String>,
    hostname: Option<String>,
    return_invalid_response: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct VerifyRequest {
    pub secret: String,
    pub response: String,
    #[serde(default)]
    pub remoteip: String,
}

#[derive(Serialize)]
struct VerifyResponsePayload {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<String>,
    #[serde(rename = "error-codes")]
    error_codes: Vec<&'static str>,
}

struct FakeTurnstileState {
    config: FakeTurnstile,
    requests: Mutex<Vec<VerifyRequest>>,
}

pub struct RunningFakeTurnstile {
    base_url: String,
    state: Arc<FakeTurnstileState>,
}

impl FakeTurnstile {
    pub fn new(required_secret: impl Into<Cow<'static, str>>) -> Self {
        Self {
            required_secret: required_secret.into(),
            required_token: None,
            hostname: None,
            return_invalid_response: false,
        }
    }

    pub fn require_token(self, token: impl AsRef<str>) -> Self {
        Self {
            required_token: Some(token.as_ref().into()),
            ..self
        }
    }

    pub fn report_hostname(self, hostname: impl AsRef<str>) -> Self {
        Self {
            hostname: Some(hostname.as_ref().into()),
            ..self
        }
    }

    pub fn return_invalid_response(self) -> Self {
        Self {
            return_invalid_response: true,
            ..self
        }
    }

    pub async fn start(self) -> RunningFakeTurnstile {
        let state = Arc::new(FakeTurnstileState {
            config: self,
            requests: Mutex::new(vec![]),
        });
        let app = Router::new()
            .route(VERIFY_PATH, post(verify))
            .with_state(state.clone());
        RunningFakeTurnstile {
            base_url: serve_on_ephemeral_port(app).await,
            state,
        }
    }
}

impl RunningFakeTurnstile {
    pub fn verify_url(&self) -> String {
        format!("{}{VERIFY_PATH}", self.base_url)
    }

    pub fn requests(&self) -> Vec<VerifyRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

async fn verify(
    State(state): State<Arc<FakeTurnstileState>>,
    Form(request): Form<VerifyRequest>,
) -> Response {
    let config = &state.config;
    let error_code = if request.secret != config.required_secret {
        Some("invalid-input-secret")
    } else if config
        .required_token
        .as_ref()
        .is_some_and(|token| *token != request.response)
    {
        Some("invalid-input-response")
    } else {
        None
    };
    state.requests.lock().unwrap().push(request);

    if config.return_invalid_response {
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            "Invalid response",
        )
            .into_response();
    }
    let payload = match error_code {
        Some(code) => VerifyResponsePayload {
            success: false,
            hostname: None,
            error_codes: vec![code],
        },
        None => VerifyResponsePayload {
            success: true,
            hostname: config.hostname.clone(),
            error_codes: vec![],
        },
    };
    (StatusCode::OK, Json(payload)).into_response()
}
