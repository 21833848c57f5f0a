mod subscription;

use form_pipeline::{
    config::{required_env, Config},
    graph::ListRef,
    init_logging,
    pipeline::FormPipeline,
    secrets::open_secret_repository,
    services::{CachedTokens, Services},
    turnstile::TurnstileVerifier,
};
use lambda_http::{run, service_fn, Error};
use subscription::NewsletterForm;

type NewsletterPipeline = FormPipeline<NewsletterForm<CachedTokens>, TurnstileVerifier>;

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging();

    let config = Config::from_env()?;
    let list = ListRef {
        site_id: required_env("SHAREPOINT_SITE_ID")?,
        list_id: required_env("SHAREPOINT_LIST_ID")?,
    };
    let services = Services::new(config, open_secret_repository().await);
    let pipeline = build_pipeline(&services, list)?;
    run(service_fn(|event| pipeline.handle(event))).await
}

fn build_pipeline(services: &Services, list: ListRef) -> anyhow::Result<NewsletterPipeline> {
    Ok(FormPipeline::new(
        NewsletterForm::new(services.graph_client(), list),
        services.bot_verifier(),
        services.responses()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::{build_pipeline, NewsletterPipeline};
    use chrono::DateTime;
    use form_pipeline::{
        config::{parse_origin, Config, Endpoints},
        graph::ListRef,
        secrets::{StaticSecretRepository, AZURE_CLIENT_SECRET, TURNSTILE_SECRET_KEY},
        services::Services,
    };
    use googletest::prelude::*;
    use lambda_http::{
        aws_lambda_events::apigw::ApiGatewayProxyRequestContext,
        http::{HeaderValue, Method},
        request::RequestContext,
        Body, Request, RequestExt,
    };
    use serde::Serialize;
    use std::sync::Arc;
    use test_support::{
        fake_graph::{FakeGraph, RunningFakeGraph},
        fake_turnstile::{FakeTurnstile, RunningFakeTurnstile},
        setup_logging,
    };

    const SITE_HOST: &str = "www.example.com";
    const TURNSTILE_SECRET: &str = "turnstile secret";
    const CLIENT_SECRET: &str = "client secret";
    const CALLER_IP: &str = "192.0.2.44";
    const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64)";
    const SUCCESS_BODY: &str = r#"{"success":true,"message":"Thanks for subscribing!"}"#;

    #[tokio::test]
    async fn records_new_subscriber() -> Result<()> {
        let (turnstile, graph) = start_fakes(FakeGraph::new(CLIENT_SECRET)).await;
        let subject = subject(&turnstile, &graph);

        let response = subject
            .handle(EventPayload::arbitrary().into_event())
            .await
            .unwrap();

        verify_that!(response.status().as_u16(), eq(200))?;
        verify_that!(
            response.body(),
            points_to(matches_pattern!(Body::Text(eq(SUCCESS_BODY))))
        )?;
        let items = graph.list_items();
        verify_that!(items.len(), eq(1))?;
        let item = &items[0];
        verify_that!(item["Title"].as_str(), some(eq("reader@example.com")))?;
        verify_that!(item["Email"].as_str(), some(eq("reader@example.com")))?;
        verify_that!(item["IPAddress"].as_str(), some(eq(CALLER_IP)))?;
        verify_that!(item["Source"].as_str(), some(eq("Website Footer")))?;
        verify_that!(item["Status"].as_str(), some(eq("Active")))?;
        verify_that!(item["UserAgent"].as_str(), some(eq(USER_AGENT)))?;
        let subscribed_at = item["SubscribedAt"].as_str().unwrap_or_default();
        verify_that!(DateTime::parse_from_rfc3339(subscribed_at), ok(anything()))?;
        verify_that!(subscribed_at, ends_with("Z"))?;
        verify_that!(subscribed_at.len(), eq("2024-01-01T00:00:00.000Z".len()))
    }

    #[tokio::test]
    async fn repeated_signup_is_indistinguishable_and_inserts_once() -> Result<()> {
        let (turnstile, graph) = start_fakes(FakeGraph::new(CLIENT_SECRET)).await;
        let subject = subject(&turnstile, &graph);

        let first = subject
            .handle(EventPayload::arbitrary().into_event())
            .await
            .unwrap();
        let second = subject
            .handle(EventPayload::arbitrary().into_event())
            .await
            .unwrap();

        verify_that!(first.status().as_u16(), eq(200))?;
        verify_that!(second.status().as_u16(), eq(200))?;
        verify_that!(
            second.body(),
            points_to(matches_pattern!(Body::Text(eq(SUCCESS_BODY))))
        )?;
        verify_that!(graph.list_items().len(), eq(1))?;
        verify_that!(
            graph.list_filters(),
            each(eq("fields/Email eq 'reader@example.com'"))
        )
    }

    #[tokio::test]
    async fn known_subscriber_is_not_inserted_again() -> Result<()> {
        let (turnstile, graph) = start_fakes(
            FakeGraph::new(CLIENT_SECRET).with_subscriber("reader@example.com"),
        )
        .await;
        let subject = subject(&turnstile, &graph);

        let response = subject
            .handle(
                EventPayload::arbitrary()
                    .with_email("Reader@Example.com")
                    .into_event(),
            )
            .await
            .unwrap();

        verify_that!(
            response.body(),
            points_to(matches_pattern!(Body::Text(eq(SUCCESS_BODY))))
        )?;
        verify_that!(graph.list_items(), empty())
    }

    #[tokio::test]
    async fn strips_unsafe_characters_from_source() -> Result<()> {
        let (turnstile, graph) = start_fakes(FakeGraph::new(CLIENT_SECRET)).await;
        let subject = subject(&turnstile, &graph);

        subject
            .handle(
                EventPayload::arbitrary()
                    .with_source(r#"<Blog "Sidebar">"#)
                    .into_event(),
            )
            .await
            .unwrap();

        let items = graph.list_items();
        verify_that!(items[0]["Source"].as_str(), some(eq("Blog Sidebar")))
    }

    #[tokio::test]
    async fn rejects_quote_in_email_before_verification() -> Result<()> {
        let (turnstile, graph) = start_fakes(FakeGraph::new(CLIENT_SECRET)).await;
        let subject = subject(&turnstile, &graph);

        let response = subject
            .handle(
                EventPayload::arbitrary()
                    .with_email("o'brien@example.com")
                    .into_event(),
            )
            .await
            .unwrap();

        verify_that!(response.status().as_u16(), eq(400))?;
        verify_that!(
            response.body(),
            points_to(matches_pattern!(Body::Text(eq(
                r#"{"success":false,"error":"Please enter a valid email address."}"#
            ))))
        )?;
        verify_that!(turnstile.requests(), empty())?;
        verify_that!(graph.list_filters(), empty())
    }

    #[tokio::test]
    async fn reports_generic_failure_when_lookup_fails() -> Result<()> {
        let (turnstile, graph) =
            start_fakes(FakeGraph::new(CLIENT_SECRET).fail_list_with(503)).await;
        let subject = subject(&turnstile, &graph);

        let response = subject
            .handle(EventPayload::arbitrary().into_event())
            .await
            .unwrap();

        verify_that!(response.status().as_u16(), eq(500))?;
        verify_that!(
            response.body(),
            points_to(matches_pattern!(Body::Text(eq(
                r#"{"success":false,"error":"Unable to process request. Please try again later."}"#
            ))))
        )
    }

    #[tokio::test]
    async fn reports_generic_failure_when_token_is_refused() -> Result<()> {
        let (turnstile, graph) = start_fakes(FakeGraph::new("another secret")).await;
        let subject = subject(&turnstile, &graph);

        let response = subject
            .handle(EventPayload::arbitrary().into_event())
            .await
            .unwrap();

        verify_that!(response.status().as_u16(), eq(500))?;
        verify_that!(graph.list_filters(), empty())
    }

    #[tokio::test]
    async fn answers_preflight_with_204() -> Result<()> {
        let (turnstile, graph) = start_fakes(FakeGraph::new(CLIENT_SECRET)).await;
        let subject = subject(&turnstile, &graph);

        let response = subject
            .handle(EventPayload::arbitrary().into_event_with(Method::OPTIONS))
            .await
            .unwrap();

        verify_that!(response.status().as_u16(), eq(204))?;
        verify_that!(matches!(response.body(), Body::Empty), eq(true))
    }

    async fn start_fakes(graph: FakeGraph) -> (RunningFakeTurnstile, RunningFakeGraph) {
        setup_logging();
        let turnstile = FakeTurnstile::new(TURNSTILE_SECRET)
            .report_hostname(SITE_HOST)
            .start()
            .await;
        (turnstile, graph.start().await)
    }

    fn subject(turnstile: &RunningFakeTurnstile, graph: &RunningFakeGraph) -> NewsletterPipeline {
        let config = Config {
            allowed_origin: parse_origin("https://www.example.com").unwrap(),
            tenant_id: "tenant".into(),
            client_id: "client id".into(),
            endpoints: Endpoints {
                turnstile_verify_url: turnstile.verify_url(),
                authority_host: graph.authority_host(),
                graph_api_url: graph.graph_url(),
            },
        };
        let secrets = StaticSecretRepository::default()
            .with_secret(TURNSTILE_SECRET_KEY, TURNSTILE_SECRET)
            .with_secret(AZURE_CLIENT_SECRET, CLIENT_SECRET);
        let list = ListRef {
            site_id: "site".into(),
            list_id: "subscribers".into(),
        };
        build_pipeline(&Services::new(config, Arc::new(secrets)), list).unwrap()
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct EventPayload {
        email: String,
        turnstile_token: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    }

    impl EventPayload {
        fn arbitrary() -> Self {
            Self {
                email: "reader@example.com".into(),
                turnstile_token: "turnstile token".into(),
                source: None,
            }
        }

        fn with_email(self, email: impl AsRef<str>) -> Self {
            Self {
                email: email.as_ref().into(),
                ..self
            }
        }

        fn with_source(self, source: impl AsRef<str>) -> Self {
            Self {
                source: Some(source.as_ref().into()),
                ..self
            }
        }

        fn into_event(self) -> Request {
            self.into_event_with(Method::POST)
        }

        /// REST API (v1) shaped event, as sent by the newsletter's gateway stage.
        fn into_event_with(self, method: Method) -> Request {
            let mut context = ApiGatewayProxyRequestContext::default();
            context.http_method = method;
            context.identity.source_ip = Some(CALLER_IP.into());
            let mut event = Request::new(Body::Text(serde_json::to_string(&self).unwrap()));
            event
                .headers_mut()
                .append("Content-Type", HeaderValue::from_static("application/json"));
            event
                .headers_mut()
                .append("User-Agent", HeaderValue::from_static(USER_AGENT));
            event.with_request_context(RequestContext::ApiGatewayV1(context))
        }
    }
}
