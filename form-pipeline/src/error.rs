use crate::{
    pipeline::FormMessages, request_id::RequestId, token_cache::TokenError,
    validation::ValidationErrors,
};
use lambda_http::http::StatusCode;
use std::fmt::Display;
use tracing::{error, warn};

pub const MALFORMED_BODY_MESSAGE: &str = "Invalid request format";
pub const MISSING_CALLER_IP_MESSAGE: &str = "Unable to verify request origin.";
pub const VERIFICATION_FAILED_MESSAGE: &str = "Verification failed. Please try again.";
pub const METHOD_NOT_ALLOWED_MESSAGE: &str = "Method not allowed";

/// Every way a submission can fail. Each variant maps to one status code and
/// one message from a fixed vocabulary; detail only ever reaches the log.
#[derive(Debug)]
pub enum FormError {
    MalformedBody(BodyError),
    InvalidInput(ValidationErrors),
    MissingCallerIp,
    Verification(VerificationFailure),
    Upstream(UpstreamError),
    MethodNotAllowed,
}

impl FormError {
    pub fn status(&self) -> StatusCode {
        match self {
            FormError::MalformedBody(_)
            | FormError::InvalidInput(_)
            | FormError::MissingCallerIp
            | FormError::Verification(_) => StatusCode::BAD_REQUEST,
            FormError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FormError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    pub fn client_message(&self, messages: &FormMessages) -> &'static str {
        match self {
            FormError::MalformedBody(BodyError::Missing) => messages.missing_body,
            FormError::MalformedBody(BodyError::NotJson) => MALFORMED_BODY_MESSAGE,
            FormError::InvalidInput(_) => messages.invalid_input,
            FormError::MissingCallerIp => MISSING_CALLER_IP_MESSAGE,
            FormError::Verification(_) => VERIFICATION_FAILED_MESSAGE,
            FormError::Upstream(_) => messages.failure,
            FormError::MethodNotAllowed => METHOD_NOT_ALLOWED_MESSAGE,
        }
    }

    pub fn log(&self, request_id: &RequestId) {
        match self {
            FormError::MalformedBody(error) => {
                warn!(%request_id, reason = error.tag(), "Rejected request body");
            }
            FormError::InvalidInput(errors) => {
                warn!(%request_id, "Validation failed: {errors}");
            }
            FormError::MissingCallerIp => warn!(%request_id, "Missing client IP"),
            FormError::Verification(reason) => {
                warn!(%request_id, reason = reason.as_str(), "Verification failed");
            }
            FormError::Upstream(error) => error!(%request_id, "Error: {error}"),
            FormError::MethodNotAllowed => warn!(%request_id, "Method not allowed"),
        }
    }
}

impl Display for FormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormError::MalformedBody(error) => write!(f, "Client error: {error}"),
            FormError::InvalidInput(errors) => write!(f, "Client error: {errors}"),
            FormError::MissingCallerIp => write!(f, "Client error: missing client IP"),
            FormError::Verification(reason) => write!(f, "Verification error: {reason}"),
            FormError::Upstream(error) => write!(f, "Upstream error: {error}"),
            FormError::MethodNotAllowed => write!(f, "Method not allowed"),
        }
    }
}

impl std::error::Error for FormError {}

impl From<BodyError> for FormError {
    fn from(error: BodyError) -> Self {
        FormError::MalformedBody(error)
    }
}

impl From<ValidationErrors> for FormError {
    fn from(errors: ValidationErrors) -> Self {
        FormError::InvalidInput(errors)
    }
}

impl From<UpstreamError> for FormError {
    fn from(error: UpstreamError) -> Self {
        FormError::Upstream(error)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyError {
    Missing,
    NotJson,
}

impl BodyError {
    pub fn tag(&self) -> &'static str {
        match self {
            BodyError::Missing => "missing_body",
            BodyError::NotJson => "malformed_json",
        }
    }
}

impl Display for BodyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::error::Error for BodyError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationFailure {
    VerificationFailed,
    HostnameMismatch,
    ServiceError,
}

impl VerificationFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationFailure::VerificationFailed => "verification_failed",
            VerificationFailure::HostnameMismatch => "hostname_mismatch",
            VerificationFailure::ServiceError => "service_error",
        }
    }
}

impl Display for VerificationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures of the identity provider or the data/mail API. Only status codes
/// and fixed tags are kept; response bodies are never read into errors.
#[derive(Debug)]
pub enum UpstreamError {
    TokenAcquisition(TokenError),
    EmailSendFailed(StatusCode),
    GraphApi(StatusCode),
    Unreachable,
    EmailRender,
}

impl Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamError::TokenAcquisition(error) => {
                write!(f, "TOKEN_ACQUISITION_FAILED ({error})")
            }
            UpstreamError::EmailSendFailed(status) => {
                write!(f, "EMAIL_SEND_FAILED (status {})", status.as_u16())
            }
            UpstreamError::GraphApi(status) => {
                write!(f, "GRAPH_API_ERROR (status {})", status.as_u16())
            }
            UpstreamError::Unreachable => write!(f, "GRAPH_API_UNREACHABLE"),
            UpstreamError::EmailRender => write!(f, "EMAIL_RENDER_FAILED"),
        }
    }
}

impl std::error::Error for UpstreamError {}

impl From<TokenError> for UpstreamError {
    fn from(error: TokenError) -> Self {
        UpstreamError::TokenAcquisition(error)
    }
}
