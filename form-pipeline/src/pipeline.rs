use crate::{
    context::InboundRequest,
    error::{BodyError, FormError, UpstreamError, VerificationFailure},
    request_id::RequestId,
    response::ResponseBuilder,
    turnstile::BotVerifier,
    validation::ValidationErrors,
};
use async_trait::async_trait;
use lambda_http::{Body, Error, Request, Response};
use serde_json::Value;
use tracing::{info, info_span, Instrument};

/// Client-visible texts that differ between forms.
#[derive(Clone, Copy, Debug)]
pub struct FormMessages {
    pub success: &'static str,
    /// Answer to a POST without a body.
    pub missing_body: &'static str,
    pub invalid_input: &'static str,
    pub failure: &'static str,
}

/// What the downstream system did with a submission. Both outcomes produce
/// the same client response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    AlreadyPresent,
}

pub struct DeliveryContext<'a> {
    pub caller_ip: &'a str,
    pub user_agent: &'a str,
    pub request_id: &'a RequestId,
}

/// One kind of form: its schema and the downstream call it triggers.
#[async_trait]
pub trait FormKind: Send + Sync {
    type Submission: Send + Sync;

    const MESSAGES: FormMessages;

    fn validate(&self, body: Value) -> Result<Self::Submission, ValidationErrors>;

    fn captcha_token<'a>(&self, submission: &'a Self::Submission) -> &'a str;

    async fn deliver(
        &self,
        submission: &Self::Submission,
        context: &DeliveryContext<'_>,
    ) -> Result<Delivery, UpstreamError>;
}

pub struct FormPipeline<FormT: FormKind, VerifierT: BotVerifier> {
    form: FormT,
    verifier: VerifierT,
    responses: ResponseBuilder,
}

impl<FormT: FormKind, VerifierT: BotVerifier> FormPipeline<FormT, VerifierT> {
    pub fn new(form: FormT, verifier: VerifierT, responses: ResponseBuilder) -> Self {
        Self {
            form,
            verifier,
            responses,
        }
    }

    pub async fn handle(&self, event: Request) -> Result<Response<Body>, Error> {
        let request = InboundRequest::from_lambda(&event);
        Ok(self.process(&request, &RequestId::generate()).await)
    }

    /// Runs one request. Everything logged while it runs, including by the
    /// verifier and downstream clients, is inside a span carrying the id.
    pub async fn process(&self, request: &InboundRequest, request_id: &RequestId) -> Response<Body> {
        self.dispatch(request, request_id)
            .instrument(info_span!("request", %request_id))
            .await
    }

    async fn dispatch(&self, request: &InboundRequest, request_id: &RequestId) -> Response<Body> {
        info!(%request_id, "{} request received", request.method);
        match request.method.as_str() {
            "OPTIONS" => return self.responses.preflight(),
            "POST" => {}
            _ => return self.respond_with_error(FormError::MethodNotAllowed, request_id),
        }
        match self.submit(request, request_id).await {
            Ok(delivery) => {
                info!(%request_id, ?delivery, "Form submitted successfully");
                self.responses.success(FormT::MESSAGES.success)
            }
            Err(error) => self.respond_with_error(error, request_id),
        }
    }

    async fn submit(
        &self,
        request: &InboundRequest,
        request_id: &RequestId,
    ) -> Result<Delivery, FormError> {
        let body = parse_body(request.body.as_deref())?;
        let submission = self.form.validate(body)?;
        let Some(caller_ip) = request.caller_ip.as_deref() else {
            return Err(FormError::MissingCallerIp);
        };
        let verification = self
            .verifier
            .verify(self.form.captcha_token(&submission), caller_ip, request_id)
            .await;
        if !verification.valid {
            let reason = verification
                .reason
                .unwrap_or(VerificationFailure::VerificationFailed);
            return Err(FormError::Verification(reason));
        }
        let context = DeliveryContext {
            caller_ip,
            user_agent: &request.user_agent,
            request_id,
        };
        Ok(self.form.deliver(&submission, &context).await?)
    }

    fn respond_with_error(&self, error: FormError, request_id: &RequestId) -> Response<Body> {
        error.log(request_id);
        self.responses
            .error(error.status(), error.client_message(&FormT::MESSAGES))
    }
}

fn parse_body(body: Option<&str>) -> Result<Value, BodyError> {
    let body = body.filter(|body| !body.trim().is_empty()).ok_or(BodyError::Missing)?;
    serde_json::from_str(body).map_err(|_| BodyError::NotJson)
}

#[cfg(test)]
mod tests {
    use super::{Delivery, DeliveryContext, FormKind, FormMessages, FormPipeline};
    use crate::{
        context::{
            test_events::{http_api_event, rest_api_event},
            InboundRequest,
        },
        error::{UpstreamError, VerificationFailure},
        request_id::RequestId,
        response::ResponseBuilder,
        token_cache::TokenError,
        turnstile::{BotVerifier, VerificationResult},
        validation::{ValidationErrors, Validator},
    };
    use async_trait::async_trait;
    use googletest::prelude::*;
    use lambda_http::{http::Method, Body, Response};
    use parking_lot::Mutex;
    use serde::Deserialize;
    use serde_json::Value;
    use std::{
        io::Write,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };
    use tracing::info;

    const CALLER_IP: &str = "203.0.113.7";

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct NoteMessage {
        note: Option<String>,
        turnstile_token: Option<String>,
    }

    struct Note {
        text: String,
        token: String,
    }

    #[derive(Clone, Default)]
    struct NoteForm {
        deliveries: Arc<Mutex<Vec<(String, String, String)>>>,
        fail: bool,
    }

    #[async_trait]
    impl FormKind for NoteForm {
        type Submission = Note;

        const MESSAGES: FormMessages = FormMessages {
            success: "Noted",
            missing_body: "Nothing to note",
            invalid_input: "Check the note",
            failure: "Try later",
        };

        fn validate(&self, body: Value) -> std::result::Result<Note, ValidationErrors> {
            let message: NoteMessage =
                serde_json::from_value(body).map_err(|_| ValidationErrors::unexpected_shape())?;
            let mut validator = Validator::new();
            let text = validator.required_text("note", message.note.as_deref(), 1, 20);
            let token = validator.captcha_token("turnstileToken", message.turnstile_token.as_deref());
            validator.finish()?;
            Ok(Note { text, token })
        }

        fn captcha_token<'a>(&self, submission: &'a Note) -> &'a str {
            &submission.token
        }

        async fn deliver(
            &self,
            submission: &Note,
            context: &DeliveryContext<'_>,
        ) -> std::result::Result<Delivery, UpstreamError> {
            if self.fail {
                return Err(UpstreamError::TokenAcquisition(TokenError::MissingToken));
            }
            info!("Note stored");
            self.deliveries.lock().push((
                submission.text.clone(),
                context.caller_ip.to_string(),
                context.user_agent.to_string(),
            ));
            Ok(Delivery::Delivered)
        }
    }

    impl NoteForm {
        fn delivered(&self) -> Vec<(String, String, String)> {
            self.deliveries.lock().clone()
        }
    }

    #[derive(Clone)]
    struct FakeVerifier {
        calls: Arc<AtomicUsize>,
        result: VerificationResult,
    }

    impl FakeVerifier {
        fn returning(result: VerificationResult) -> Self {
            Self {
                calls: Default::default(),
                result,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BotVerifier for FakeVerifier {
        async fn verify(&self, _: &str, _: &str, _: &RequestId) -> VerificationResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
        }
    }

    fn pipeline(form: NoteForm, verifier: FakeVerifier) -> FormPipeline<NoteForm, FakeVerifier> {
        FormPipeline::new(
            form,
            verifier,
            ResponseBuilder::new("https://www.example.com").unwrap(),
        )
    }

    fn body_text(response: &Response<Body>) -> String {
        match response.body() {
            Body::Text(text) => text.clone(),
            _ => String::new(),
        }
    }

    const VALID_BODY: &str = r#"{"note":"hello","turnstileToken":"token"}"#;

    #[tokio::test]
    async fn delivers_valid_submission() -> Result<()> {
        let form = NoteForm::default();
        let subject = pipeline(form.clone(), FakeVerifier::returning(VerificationResult::passed()));
        let mut event = http_api_event(Method::POST, Some(CALLER_IP), VALID_BODY);
        event
            .headers_mut()
            .append("User-Agent", "agent/1.0".parse().unwrap());

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(200))?;
        verify_that!(body_text(&response), eq(r#"{"success":true,"message":"Noted"}"#))?;
        verify_that!(
            form.delivered(),
            elements_are![eq((
                "hello".to_string(),
                CALLER_IP.to_string(),
                "agent/1.0".to_string()
            ))]
        )
    }

    #[tokio::test]
    async fn options_is_204_regardless_of_body() -> Result<()> {
        let verifier = FakeVerifier::returning(VerificationResult::passed());
        let subject = pipeline(NoteForm::default(), verifier.clone());
        let event = rest_api_event(Method::OPTIONS, None, "not json at all");

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(204))?;
        verify_that!(matches!(response.body(), Body::Empty), eq(true))?;
        verify_that!(
            response.headers().get("X-Frame-Options").map(|v| v.to_str().unwrap()),
            some(eq("DENY"))
        )?;
        verify_that!(verifier.calls(), eq(0))
    }

    #[tokio::test]
    async fn other_methods_are_405() -> Result<()> {
        let subject = pipeline(
            NoteForm::default(),
            FakeVerifier::returning(VerificationResult::passed()),
        );
        let event = http_api_event(Method::GET, Some(CALLER_IP), VALID_BODY);

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(405))?;
        verify_that!(
            body_text(&response),
            eq(r#"{"success":false,"error":"Method not allowed"}"#)
        )
    }

    #[tokio::test]
    async fn missing_method_is_405() -> Result<()> {
        let subject = pipeline(
            NoteForm::default(),
            FakeVerifier::returning(VerificationResult::passed()),
        );
        let request = InboundRequest::default();

        let response = subject.process(&request, &RequestId::generate()).await;

        verify_that!(response.status().as_u16(), eq(405))
    }

    #[tokio::test]
    async fn malformed_json_is_400_without_verification() -> Result<()> {
        let verifier = FakeVerifier::returning(VerificationResult::passed());
        let subject = pipeline(NoteForm::default(), verifier.clone());
        let event = http_api_event(Method::POST, Some(CALLER_IP), "{not json");

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(400))?;
        verify_that!(body_text(&response), contains_substring("Invalid request format"))?;
        verify_that!(verifier.calls(), eq(0))
    }

    #[tokio::test]
    async fn missing_body_is_400() -> Result<()> {
        let subject = pipeline(
            NoteForm::default(),
            FakeVerifier::returning(VerificationResult::passed()),
        );
        let event = http_api_event(Method::POST, Some(CALLER_IP), "");

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(400))?;
        verify_that!(
            body_text(&response),
            eq(r#"{"success":false,"error":"Nothing to note"}"#)
        )
    }

    #[tokio::test]
    async fn validation_failure_uses_generic_message() -> Result<()> {
        let verifier = FakeVerifier::returning(VerificationResult::passed());
        let subject = pipeline(NoteForm::default(), verifier.clone());
        let event = http_api_event(
            Method::POST,
            Some(CALLER_IP),
            r#"{"note":"this note is far too long to pass","turnstileToken":"token"}"#,
        );

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(400))?;
        verify_that!(
            body_text(&response),
            eq(r#"{"success":false,"error":"Check the note"}"#)
        )?;
        verify_that!(verifier.calls(), eq(0))
    }

    #[tokio::test]
    async fn wrong_shape_is_validation_failure() -> Result<()> {
        let subject = pipeline(
            NoteForm::default(),
            FakeVerifier::returning(VerificationResult::passed()),
        );
        let event = http_api_event(Method::POST, Some(CALLER_IP), r#"{"note":5}"#);

        let response = subject.handle(event).await.unwrap();

        verify_that!(body_text(&response), contains_substring("Check the note"))
    }

    #[tokio::test]
    async fn missing_caller_ip_is_400_without_verification() -> Result<()> {
        let verifier = FakeVerifier::returning(VerificationResult::passed());
        let subject = pipeline(NoteForm::default(), verifier.clone());
        let event = http_api_event(Method::POST, None, VALID_BODY);

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(400))?;
        verify_that!(
            body_text(&response),
            contains_substring("Unable to verify request origin.")
        )?;
        verify_that!(verifier.calls(), eq(0))
    }

    #[tokio::test]
    async fn failed_verification_is_400_without_delivery() -> Result<()> {
        let form = NoteForm::default();
        let subject = pipeline(
            form.clone(),
            FakeVerifier::returning(VerificationResult::failed(
                VerificationFailure::HostnameMismatch,
            )),
        );
        let event = http_api_event(Method::POST, Some(CALLER_IP), VALID_BODY);

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(400))?;
        verify_that!(
            body_text(&response),
            eq(r#"{"success":false,"error":"Verification failed. Please try again."}"#)
        )?;
        verify_that!(form.delivered(), empty())
    }

    #[tokio::test]
    async fn upstream_failure_is_500_with_generic_message() -> Result<()> {
        let form = NoteForm {
            fail: true,
            ..Default::default()
        };
        let subject = pipeline(form, FakeVerifier::returning(VerificationResult::passed()));
        let event = http_api_event(Method::POST, Some(CALLER_IP), VALID_BODY);

        let response = subject.handle(event).await.unwrap();

        verify_that!(response.status().as_u16(), eq(500))?;
        verify_that!(
            body_text(&response),
            eq(r#"{"success":false,"error":"Try later"}"#)
        )
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl CapturedLog {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn nested_log_lines_carry_request_id() -> Result<()> {
        let log = CapturedLog::default();
        let writer = log.clone();
        let _subscriber = tracing::subscriber::set_default(
            tracing_subscriber::fmt()
                .with_writer(move || writer.clone())
                .finish(),
        );
        let subject = pipeline(
            NoteForm::default(),
            FakeVerifier::returning(VerificationResult::passed()),
        );
        let request = InboundRequest {
            method: "POST".into(),
            caller_ip: Some(CALLER_IP.into()),
            user_agent: String::new(),
            body: Some(VALID_BODY.into()),
        };
        let request_id = RequestId::generate();

        subject.process(&request, &request_id).await;

        let stored_line = log
            .contents()
            .lines()
            .find(|line| line.contains("Note stored"))
            .map(String::from);
        verify_that!(stored_line, some(contains_substring(request_id.as_str())))
    }
}
