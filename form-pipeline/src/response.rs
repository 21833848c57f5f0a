use lambda_http::{
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, CACHE_CONTROL, CONTENT_TYPE,
            EXPIRES, PRAGMA, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
        },
        HeaderMap, HeaderValue, StatusCode,
    },
    Body, Response,
};
use serde::Serialize;

#[derive(Serialize, Debug)]
struct ResponseBody<'a> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// Produces every response the handlers send, all with the same headers.
#[derive(Clone, Debug)]
pub struct ResponseBuilder {
    headers: HeaderMap,
}

impl ResponseBuilder {
    pub fn new(allowed_origin: &str) -> Result<Self, lambda_http::http::header::InvalidHeaderValue> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_str(allowed_origin)?);
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("POST, OPTIONS"),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        );
        headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, proxy-revalidate"),
        );
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(EXPIRES, HeaderValue::from_static("0"));
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        Ok(Self { headers })
    }

    pub fn preflight(&self) -> Response<Body> {
        self.build(StatusCode::NO_CONTENT, Body::Empty)
    }

    pub fn success(&self, message: &str) -> Response<Body> {
        self.json(
            StatusCode::OK,
            &ResponseBody {
                success: true,
                message: Some(message),
                error: None,
            },
        )
    }

    pub fn error(&self, status: StatusCode, message: &str) -> Response<Body> {
        self.json(
            status,
            &ResponseBody {
                success: false,
                message: None,
                error: Some(message),
            },
        )
    }

    fn json(&self, status: StatusCode, body: &ResponseBody) -> Response<Body> {
        let text = serde_json::to_string(body).unwrap_or_else(|_| r#"{"success":false}"#.into());
        self.build(status, Body::Text(text))
    }

    fn build(&self, status: StatusCode, body: Body) -> Response<Body> {
        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}
