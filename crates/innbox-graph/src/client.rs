use crate::payload::{parse_listing, ProviderMessage};
use crate::{GraphError, TokenProvider};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

/// One fetch pass over a mailbox. `sent` may be empty because the sent
/// folder degraded, not only because nothing was sent.
#[derive(Debug, Clone, Default)]
pub struct FetchedMail {
    pub inbound: Vec<ProviderMessage>,
    pub sent: Vec<ProviderMessage>,
}

/// Content and recipients for an existing reply draft. Subject is absent on
/// purpose: the provider derives it from the thread and patching it would
/// break threading in some clients.
#[derive(Debug, Clone)]
pub struct ReplyPatch {
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FileAttachment {
    pub file_name: String,
    pub content_type: String,
    pub content_base64: String,
}

#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub subject: String,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub attachments: Vec<FileAttachment>,
}

/// The mail-provider seam. Everything the sync and outbound services need
/// from Microsoft Graph, so tests can substitute a scripted fake.
#[async_trait]
pub trait MailProvider: Send + Sync {
    async fn fetch_recent(&self, mailbox: &str, page_size: usize)
        -> Result<FetchedMail, GraphError>;
    async fn fetch_conversation(
        &self,
        mailbox: &str,
        thread_id: &str,
    ) -> Result<Vec<ProviderMessage>, GraphError>;
    /// Creates a provider-side reply draft and returns its id.
    async fn create_reply(&self, mailbox: &str, message_id: &str) -> Result<String, GraphError>;
    async fn update_draft(
        &self,
        mailbox: &str,
        draft_id: &str,
        patch: &ReplyPatch,
    ) -> Result<(), GraphError>;
    async fn add_attachment(
        &self,
        mailbox: &str,
        draft_id: &str,
        attachment: &FileAttachment,
    ) -> Result<(), GraphError>;
    async fn send_draft(&self, mailbox: &str, draft_id: &str) -> Result<(), GraphError>;
    async fn delete_draft(&self, mailbox: &str, draft_id: &str) -> Result<(), GraphError>;
    async fn send_mail(&self, mailbox: &str, mail: &OutgoingMail) -> Result<(), GraphError>;
    async fn mark_read(&self, mailbox: &str, message_id: &str) -> Result<(), GraphError>;
}

#[derive(Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenProvider,
}

#[derive(Debug, Deserialize)]
struct CreatedDraft {
    id: String,
}

impl GraphClient {
    pub fn new(base_url: String, tokens: TokenProvider) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn mailbox_url(&self, mailbox: &str, rest: &str) -> String {
        format!("{}/users/{}/{}", self.base_url, mailbox, rest)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, GraphError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(GraphError::Fetch { status, body })
    }

    fn body_json(body_html: &Option<String>, body_text: &Option<String>) -> serde_json::Value {
        match (body_html, body_text) {
            (Some(html), _) => json!({"contentType": "HTML", "content": html}),
            (None, Some(text)) => json!({"contentType": "Text", "content": text}),
            (None, None) => json!({"contentType": "Text", "content": ""}),
        }
    }

    fn recipients_json(addresses: &[String]) -> serde_json::Value {
        json!(addresses
            .iter()
            .map(|address| json!({"emailAddress": {"address": address}}))
            .collect::<Vec<_>>())
    }

    fn attachment_json(attachment: &FileAttachment) -> serde_json::Value {
        json!({
            "@odata.type": "#microsoft.graph.fileAttachment",
            "name": attachment.file_name,
            "contentType": attachment.content_type,
            "contentBytes": attachment.content_base64,
        })
    }
}

#[async_trait]
impl MailProvider for GraphClient {
    async fn fetch_recent(
        &self,
        mailbox: &str,
        page_size: usize,
    ) -> Result<FetchedMail, GraphError> {
        let token = self.tokens.access_token(mailbox).await?;

        let inbox_url = self.mailbox_url(mailbox, "mailFolders/Inbox/messages");
        let response = self
            .http
            .get(&inbox_url)
            .bearer_auth(&token)
            .query(&[
                ("$top", page_size.to_string()),
                ("$orderby", "receivedDateTime desc".to_string()),
            ])
            .send()
            .await?;
        let inbound = parse_listing(Self::check(response).await?.json().await?)?;

        // The sent folder is best-effort: a failure here must not cost us
        // the inbound messages we already have.
        let sent_url = self.mailbox_url(mailbox, "mailFolders/SentItems/messages");
        let sent = match self
            .http
            .get(&sent_url)
            .bearer_auth(&token)
            .query(&[
                ("$top", page_size.to_string()),
                ("$orderby", "sentDateTime desc".to_string()),
            ])
            .send()
            .await
        {
            Ok(response) => match Self::check(response).await {
                Ok(response) => parse_listing(response.json().await?)?,
                Err(err) => {
                    warn!(mailbox = %mailbox, error = %err, "sent folder fetch degraded");
                    Vec::new()
                }
            },
            Err(err) => {
                warn!(mailbox = %mailbox, error = %err, "sent folder fetch degraded");
                Vec::new()
            }
        };

        debug!(
            mailbox = %mailbox,
            inbound = inbound.len(),
            sent = sent.len(),
            "fetched recent messages"
        );
        Ok(FetchedMail { inbound, sent })
    }

    async fn fetch_conversation(
        &self,
        mailbox: &str,
        thread_id: &str,
    ) -> Result<Vec<ProviderMessage>, GraphError> {
        let token = self.tokens.access_token(mailbox).await?;
        let url = self.mailbox_url(mailbox, "messages");
        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .query(&[
                ("$filter", format!("conversationId eq '{thread_id}'")),
                ("$top", "50".to_string()),
            ])
            .send()
            .await?;

        parse_listing(Self::check(response).await?.json().await?)
    }

    async fn create_reply(&self, mailbox: &str, message_id: &str) -> Result<String, GraphError> {
        let token = self.tokens.access_token(mailbox).await?;
        let url = self.mailbox_url(mailbox, &format!("messages/{message_id}/createReply"));
        let response = self.http.post(&url).bearer_auth(&token).send().await?;

        let draft: CreatedDraft = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|err| GraphError::Payload(format!("reply draft without id: {err}")))?;
        Ok(draft.id)
    }

    async fn update_draft(
        &self,
        mailbox: &str,
        draft_id: &str,
        patch: &ReplyPatch,
    ) -> Result<(), GraphError> {
        let token = self.tokens.access_token(mailbox).await?;
        let url = self.mailbox_url(mailbox, &format!("messages/{draft_id}"));
        let mut payload = json!({
            "body": Self::body_json(&patch.body_html, &patch.body_text),
            "toRecipients": Self::recipients_json(&patch.to),
        });
        if !patch.cc.is_empty() {
            payload["ccRecipients"] = Self::recipients_json(&patch.cc);
        }

        let response = self
            .http
            .patch(&url)
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn add_attachment(
        &self,
        mailbox: &str,
        draft_id: &str,
        attachment: &FileAttachment,
    ) -> Result<(), GraphError> {
        let token = self.tokens.access_token(mailbox).await?;
        let url = self.mailbox_url(mailbox, &format!("messages/{draft_id}/attachments"));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&Self::attachment_json(attachment))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn send_draft(&self, mailbox: &str, draft_id: &str) -> Result<(), GraphError> {
        let token = self.tokens.access_token(mailbox).await?;
        let url = self.mailbox_url(mailbox, &format!("messages/{draft_id}/send"));
        let response = self.http.post(&url).bearer_auth(&token).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_draft(&self, mailbox: &str, draft_id: &str) -> Result<(), GraphError> {
        let token = self.tokens.access_token(mailbox).await?;
        let url = self.mailbox_url(mailbox, &format!("messages/{draft_id}"));
        let response = self.http.delete(&url).bearer_auth(&token).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn send_mail(&self, mailbox: &str, mail: &OutgoingMail) -> Result<(), GraphError> {
        let token = self.tokens.access_token(mailbox).await?;
        let url = self.mailbox_url(mailbox, "sendMail");
        let mut message = json!({
            "subject": mail.subject,
            "body": Self::body_json(&mail.body_html, &mail.body_text),
            "toRecipients": Self::recipients_json(&mail.to),
        });
        if !mail.cc.is_empty() {
            message["ccRecipients"] = Self::recipients_json(&mail.cc);
        }
        if !mail.attachments.is_empty() {
            message["attachments"] = json!(mail
                .attachments
                .iter()
                .map(Self::attachment_json)
                .collect::<Vec<_>>());
        }

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&json!({"message": message, "saveToSentItems": true}))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn mark_read(&self, mailbox: &str, message_id: &str) -> Result<(), GraphError> {
        let token = self.tokens.access_token(mailbox).await?;
        let url = self.mailbox_url(mailbox, &format!("messages/{message_id}"));
        let response = self
            .http
            .patch(&url)
            .bearer_auth(&token)
            .json(&json!({"isRead": true}))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_prefers_html() {
        let body = GraphClient::body_json(&Some("<p>hi</p>".to_string()), &Some("hi".to_string()));
        assert_eq!(body["contentType"], "HTML");

        let body = GraphClient::body_json(&None, &Some("hi".to_string()));
        assert_eq!(body["contentType"], "Text");
        assert_eq!(body["content"], "hi");
    }

    #[test]
    fn recipients_take_graph_shape() {
        let recipients = GraphClient::recipients_json(&["a@example.com".to_string()]);
        assert_eq!(recipients[0]["emailAddress"]["address"], "a@example.com");
    }

    #[test]
    fn attachments_declare_their_odata_type() {
        let rendered = GraphClient::attachment_json(&FileAttachment {
            file_name: "rates.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            content_base64: "QUJD".to_string(),
        });
        assert_eq!(rendered["@odata.type"], "#microsoft.graph.fileAttachment");
        assert_eq!(rendered["name"], "rates.pdf");
        assert_eq!(rendered["contentBytes"], "QUJD");
    }
}
