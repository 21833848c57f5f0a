use lambda_http::{request::RequestContext, Body, Request, RequestExt};

const MAX_USER_AGENT_LENGTH: usize = 255;

/// Transport-independent view of an inbound request. Built once at the
/// boundary so that the rest of the pipeline never sees gateway event shapes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InboundRequest {
    /// Empty when neither event shape carries a method.
    pub method: String,
    pub caller_ip: Option<String>,
    pub user_agent: String,
    pub body: Option<String>,
}

impl InboundRequest {
    pub fn from_lambda(event: &Request) -> Self {
        Self {
            method: http_method(event),
            caller_ip: caller_ip(event),
            user_agent: user_agent(event),
            body: body_text(event.body()),
        }
    }
}

/// HTTP API (v2) context first, then REST API (v1).
fn http_method(event: &Request) -> String {
    match event.request_context_ref() {
        Some(RequestContext::ApiGatewayV2(context)) => context.http.method.to_string(),
        Some(RequestContext::ApiGatewayV1(context)) => context.http_method.to_string(),
        _ => String::new(),
    }
}

fn caller_ip(event: &Request) -> Option<String> {
    let from_context = match event.request_context_ref() {
        Some(RequestContext::ApiGatewayV2(context)) => context.http.source_ip.clone(),
        Some(RequestContext::ApiGatewayV1(context)) => context.identity.source_ip.clone(),
        _ => None,
    };
    from_context
        .filter(|ip| !ip.is_empty())
        .or_else(|| forwarded_for(event))
}

fn forwarded_for(event: &Request) -> Option<String> {
    let header = event.headers().get("x-forwarded-for")?.to_str().ok()?;
    let first = header.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

fn user_agent(event: &Request) -> String {
    let Some(user_agent) = event
        .headers()
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
    else {
        return String::new();
    };
    user_agent
        .chars()
        .take(MAX_USER_AGENT_LENGTH)
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\'' | '\\'))
        .collect()
}

fn body_text(body: &Body) -> Option<String> {
    let text = match body {
        Body::Text(text) => text.clone(),
        Body::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
