use async_trait::async_trait;
use chrono::SecondsFormat;
use form_pipeline::{
    error::UpstreamError,
    graph::{GraphClient, ListRef},
    pipeline::{Delivery, DeliveryContext, FormKind, FormMessages},
    token_cache::{Clock, SystemClock, TokenSource},
    validation::{strip_unsafe_chars, Problem, ValidationErrors, Validator},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

const MIN_EMAIL_LENGTH: usize = 5;
const MAX_SOURCE_LENGTH: usize = 50;
const DEFAULT_SOURCE: &str = "Website Footer";
const ACTIVE_STATUS: &str = "Active";

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SubscribeMessage {
    email: Option<String>,
    turnstile_token: Option<String>,
    source: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub email: String,
    pub source: String,
    pub turnstile_token: String,
}

/// Columns of the subscriber list.
#[derive(Serialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct SubscriberFields<'a> {
    title: &'a str,
    email: &'a str,
    #[serde(rename = "IPAddress")]
    ip_address: &'a str,
    subscribed_at: String,
    source: &'a str,
    status: &'static str,
    user_agent: &'a str,
}

/// Newsletter signup: records each verified address once in a SharePoint
/// list. Resubmitting a known address succeeds without a second insert.
pub struct NewsletterForm<TokenSourceT: TokenSource, ClockT: Clock = SystemClock> {
    graph: GraphClient<TokenSourceT>,
    list: ListRef,
    clock: ClockT,
}

impl<TokenSourceT: TokenSource> NewsletterForm<TokenSourceT> {
    pub fn new(graph: GraphClient<TokenSourceT>, list: ListRef) -> Self {
        Self::with_clock(graph, list, SystemClock)
    }
}

impl<TokenSourceT: TokenSource, ClockT: Clock> NewsletterForm<TokenSourceT, ClockT> {
    pub fn with_clock(graph: GraphClient<TokenSourceT>, list: ListRef, clock: ClockT) -> Self {
        Self { graph, list, clock }
    }
}

#[async_trait]
impl<TokenSourceT: TokenSource, ClockT: Clock> FormKind for NewsletterForm<TokenSourceT, ClockT> {
    type Submission = Subscription;

    const MESSAGES: FormMessages = FormMessages {
        success: "Thanks for subscribing!",
        missing_body: "Please enter a valid email address.",
        invalid_input: "Please enter a valid email address.",
        failure: "Unable to process request. Please try again later.",
    };

    fn validate(&self, body: Value) -> Result<Subscription, ValidationErrors> {
        let message: SubscribeMessage =
            serde_json::from_value(body).map_err(|_| ValidationErrors::unexpected_shape())?;
        let mut validator = Validator::new();
        let email = validator.email("email", message.email.as_deref(), MIN_EMAIL_LENGTH);
        let turnstile_token =
            validator.captcha_token("turnstileToken", message.turnstile_token.as_deref());
        // The limit applies to the source as sent, padding included.
        let source = match message.source.as_deref() {
            Some(raw) if raw.chars().count() > MAX_SOURCE_LENGTH => {
                validator.reject("source", Problem::TooLong);
                None
            }
            raw => validator.optional_text("source", raw, MAX_SOURCE_LENGTH),
        }
        .unwrap_or_else(|| DEFAULT_SOURCE.into());
        validator.finish()?;

        Ok(Subscription {
            email,
            source: strip_unsafe_chars(&source),
            turnstile_token,
        })
    }

    fn captcha_token<'a>(&self, subscription: &'a Subscription) -> &'a str {
        &subscription.turnstile_token
    }

    async fn deliver(
        &self,
        subscription: &Subscription,
        context: &DeliveryContext<'_>,
    ) -> Result<Delivery, UpstreamError> {
        let request_id = context.request_id;
        if self
            .graph
            .list_contains_email(&self.list, &subscription.email, request_id)
            .await?
        {
            info!(%request_id, "Subscriber already present");
            return Ok(Delivery::AlreadyPresent);
        }
        let fields = SubscriberFields {
            title: &subscription.email,
            email: &subscription.email,
            ip_address: context.caller_ip,
            subscribed_at: self
                .clock
                .now()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            source: &subscription.source,
            status: ACTIVE_STATUS,
            user_agent: context.user_agent,
        };
        self.graph
            .create_list_item(&self.list, &fields, request_id)
            .await?;
        Ok(Delivery::Delivered)
    }
}
