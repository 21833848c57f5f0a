use crate::email_body::render_email_body;
use async_trait::async_trait;
use form_pipeline::{
    error::UpstreamError,
    graph::{GraphClient, ItemBody, MailMessage, Recipient, SendMailRequest},
    pipeline::{Delivery, DeliveryContext, FormKind, FormMessages},
    request_id::RequestId,
    token_cache::TokenSource,
    validation::{sanitize_input, strip_html, ValidationErrors, Validator},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::error;

const MAX_NAME_LENGTH: usize = 100;
const MAX_COMPANY_LENGTH: usize = 200;
const MAX_PHONE_LENGTH: usize = 30;
const MIN_MESSAGE_LENGTH: usize = 10;
const MAX_MESSAGE_LENGTH: usize = 5000;
const MIN_EMAIL_LENGTH: usize = 1;

/// Where notifications go. Both addresses come from the deployment, never
/// from the submission.
#[derive(Clone, Debug)]
pub struct MailSettings {
    pub sender: String,
    pub recipient: String,
    pub site_host: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ContactFormMessage {
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    company: Option<String>,
    phone: Option<String>,
    interest: Option<Interest>,
    message: Option<String>,
    turnstile_token: Option<String>,
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Interest {
    Consultation,
    Training,
    Implementation,
    Development,
    Other,
    #[default]
    #[serde(rename = "")]
    Unspecified,
}

impl Interest {
    /// Wire value, used verbatim in the mail subject.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Interest::Consultation => Some("consultation"),
            Interest::Training => Some("training"),
            Interest::Implementation => Some("implementation"),
            Interest::Development => Some("development"),
            Interest::Other => Some("other"),
            Interest::Unspecified => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Interest::Consultation => "AI Consultation",
            Interest::Training => "AI Training",
            Interest::Implementation => "AI Implementation",
            Interest::Development => "Custom AI Development",
            Interest::Other => "Other",
            Interest::Unspecified => "Not specified",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContactSubmission {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub interest: Interest,
    pub message: String,
    pub turnstile_token: String,
}

impl ContactSubmission {
    fn subject(&self) -> String {
        format!(
            "[Hybetech Contact] {} - {} {}",
            self.interest.key().unwrap_or("General Inquiry"),
            self.first_name,
            self.last_name
        )
    }

    fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Contact form: forwards each verified submission as an HTML email through
/// Microsoft Graph.
pub struct ContactForm<TokenSourceT: TokenSource> {
    graph: GraphClient<TokenSourceT>,
    mail: MailSettings,
}

impl<TokenSourceT: TokenSource> ContactForm<TokenSourceT> {
    pub fn new(graph: GraphClient<TokenSourceT>, mail: MailSettings) -> Self {
        Self { graph, mail }
    }

    fn build_mail(
        &self,
        submission: &ContactSubmission,
        request_id: &RequestId,
    ) -> Result<SendMailRequest, UpstreamError> {
        let content = render_email_body(submission, &self.mail.site_host).map_err(|e| {
            error!(%request_id, "Unable to render contact email: {e}");
            UpstreamError::EmailRender
        })?;
        Ok(SendMailRequest {
            message: MailMessage {
                subject: submission.subject(),
                body: ItemBody::html(content),
                to_recipients: vec![Recipient::new(&self.mail.recipient, None)],
                reply_to: vec![Recipient::new(
                    &submission.email,
                    Some(submission.full_name()),
                )],
            },
            save_to_sent_items: true,
        })
    }
}

#[async_trait]
impl<TokenSourceT: TokenSource> FormKind for ContactForm<TokenSourceT> {
    type Submission = ContactSubmission;

    const MESSAGES: FormMessages = FormMessages {
        success: "Thank you for your message! We'll be in touch soon.",
        missing_body: "Request body is required",
        invalid_input: "Please check your input and try again.",
        failure: "Unable to send message. Please try again later.",
    };

    fn validate(&self, body: Value) -> Result<ContactSubmission, ValidationErrors> {
        let message: ContactFormMessage =
            serde_json::from_value(body).map_err(|_| ValidationErrors::unexpected_shape())?;
        let mut validator = Validator::new();
        let first_name = validator.required_text(
            "firstName",
            message.first_name.as_deref(),
            1,
            MAX_NAME_LENGTH,
        );
        let last_name =
            validator.required_text("lastName", message.last_name.as_deref(), 1, MAX_NAME_LENGTH);
        let email = validator.email("email", message.email.as_deref(), MIN_EMAIL_LENGTH);
        let company =
            validator.optional_text("company", message.company.as_deref(), MAX_COMPANY_LENGTH);
        let phone = validator.optional_text("phone", message.phone.as_deref(), MAX_PHONE_LENGTH);
        let body = validator.required_text(
            "message",
            message.message.as_deref(),
            MIN_MESSAGE_LENGTH,
            MAX_MESSAGE_LENGTH,
        );
        let turnstile_token =
            validator.captcha_token("turnstileToken", message.turnstile_token.as_deref());
        validator.finish()?;

        Ok(ContactSubmission {
            first_name: sanitize_input(&first_name),
            last_name: sanitize_input(&last_name),
            email,
            company: company.as_deref().map(sanitize_input),
            phone: phone.as_deref().map(sanitize_input),
            interest: message.interest.unwrap_or_default(),
            message: strip_html(&body),
            turnstile_token,
        })
    }

    fn captcha_token<'a>(&self, submission: &'a ContactSubmission) -> &'a str {
        &submission.turnstile_token
    }

    async fn deliver(
        &self,
        submission: &ContactSubmission,
        context: &DeliveryContext<'_>,
    ) -> Result<Delivery, UpstreamError> {
        let mail = self.build_mail(submission, context.request_id)?;
        self.graph
            .send_mail(&self.mail.sender, &mail, context.request_id)
            .await?;
        Ok(Delivery::Delivered)
    }
}
