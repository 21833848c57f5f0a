//! Authenticated calls against Microsoft Graph: sending mail on behalf of a
//! mailbox, and looking up or inserting SharePoint list items.

use crate::{error::UpstreamError, request_id::RequestId, token_cache::TokenSource};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{de::IgnoredAny, Deserialize, Serialize};
use tracing::error;

pub struct GraphClient<TokenSourceT: TokenSource> {
    http: Client,
    base_url: String,
    tokens: TokenSourceT,
}

/// A SharePoint list addressed by site and list id.
#[derive(Clone, Debug)]
pub struct ListRef {
    pub site_id: String,
    pub list_id: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SendMailRequest {
    pub message: MailMessage,
    pub save_to_sent_items: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MailMessage {
    pub subject: String,
    pub body: ItemBody,
    pub to_recipients: Vec<Recipient>,
    pub reply_to: Vec<Recipient>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    pub content_type: &'static str,
    pub content: String,
}

impl ItemBody {
    pub fn html(content: String) -> Self {
        Self {
            content_type: "HTML",
            content,
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email_address: EmailAddress,
}

#[derive(Serialize, Debug)]
pub struct EmailAddress {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Recipient {
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            email_address: EmailAddress {
                address: address.into(),
                name,
            },
        }
    }
}

#[derive(Serialize)]
struct NewListItem<'a, FieldsT: Serialize> {
    fields: &'a FieldsT,
}

#[derive(Deserialize)]
struct ListItems {
    #[serde(default)]
    value: Vec<IgnoredAny>,
}

impl<TokenSourceT: TokenSource> GraphClient<TokenSourceT> {
    pub fn new(http: Client, base_url: &str, tokens: TokenSourceT) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub async fn send_mail(
        &self,
        sender: &str,
        mail: &SendMailRequest,
        request_id: &RequestId,
    ) -> Result<(), UpstreamError> {
        let url = format!("{}/users/{sender}/sendMail", self.base_url);
        let response = self
            .send(self.request(Method::POST, &url).await?.json(mail))
            .await?;
        if !response.status().is_success() {
            error!(%request_id, "Graph API error: {}", response.status().as_u16());
            return Err(UpstreamError::EmailSendFailed(response.status()));
        }
        Ok(())
    }

    /// Whether the list already holds an item whose `Email` field equals
    /// `email`. The address must already be free of quote characters since it
    /// is placed inside a quoted filter literal.
    pub async fn list_contains_email(
        &self,
        list: &ListRef,
        email: &str,
        request_id: &RequestId,
    ) -> Result<bool, UpstreamError> {
        let filter = format!("fields/Email eq '{email}'");
        let request = self
            .request(Method::GET, &self.items_url(list))
            .await?
            .query(&[("$filter", filter.as_str()), ("$select", "id")]);
        let response = self.send(request).await?;
        if !response.status().is_success() {
            error!(%request_id, "Graph API check failed: {}", response.status().as_u16());
            return Err(UpstreamError::GraphApi(response.status()));
        }
        let items: ListItems = response.json().await.map_err(|_| {
            error!(%request_id, "Graph API check returned an unreadable response");
            UpstreamError::Unreachable
        })?;
        Ok(!items.value.is_empty())
    }

    pub async fn create_list_item<FieldsT: Serialize + Sync>(
        &self,
        list: &ListRef,
        fields: &FieldsT,
        request_id: &RequestId,
    ) -> Result<(), UpstreamError> {
        let request = self
            .request(Method::POST, &self.items_url(list))
            .await?
            .json(&NewListItem { fields });
        let response = self.send(request).await?;
        if !response.status().is_success() {
            error!(%request_id, "Graph API add failed: {}", response.status().as_u16());
            return Err(UpstreamError::GraphApi(response.status()));
        }
        Ok(())
    }

    fn items_url(&self, list: &ListRef) -> String {
        format!(
            "{}/sites/{}/lists/{}/items",
            self.base_url, list.site_id, list.list_id
        )
    }

    async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, UpstreamError> {
        let token = self.tokens.get_token().await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, UpstreamError> {
        request.send().await.map_err(|_| UpstreamError::Unreachable)
    }
}
