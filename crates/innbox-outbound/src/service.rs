use crate::OutboundError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use innbox_core::DraftStatus;
use innbox_graph::{FileAttachment, MailProvider, OutgoingMail, ReplyPatch};
use innbox_storage::Storage;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SendRequest {
    pub reservation_id: Uuid,
    /// When set and the thread is known locally, the email goes out as a
    /// provider-side reply to the thread's newest message. Otherwise it is
    /// sent standalone.
    pub thread_id: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub attachment_ids: Vec<Uuid>,
}

/// Sends reservation emails through the provider. The sent message is never
/// written locally; the provider assigns it a fresh id and the next sync
/// pass picks it up from the sent folder.
pub struct OutboundService<P> {
    storage: Storage,
    provider: Arc<P>,
    mailbox: String,
}

impl<P> OutboundService<P>
where
    P: MailProvider,
{
    pub fn new(storage: Storage, provider: Arc<P>, mailbox: String) -> Self {
        Self {
            storage,
            provider,
            mailbox,
        }
    }

    pub async fn send(&self, request: &SendRequest) -> Result<(), OutboundError> {
        if request.to.is_empty() {
            return Err(OutboundError::NoRecipients);
        }

        let (attachments, attached_ids) = self.load_attachments(&request.attachment_ids).await?;

        let reply_anchor = match &request.thread_id {
            Some(thread_id) => self.reply_anchor(thread_id).await?,
            None => None,
        };

        match reply_anchor {
            Some(message_id) => self.send_reply(request, &message_id, &attachments).await?,
            None => {
                self.provider
                    .send_mail(
                        &self.mailbox,
                        &OutgoingMail {
                            subject: request.subject.clone(),
                            body_html: request.body_html.clone(),
                            body_text: request.body_text.clone(),
                            to: request.to.clone(),
                            cc: request.cc.clone(),
                            attachments,
                        },
                    )
                    .await?
            }
        }

        self.finish(request.reservation_id, &attached_ids).await;
        Ok(())
    }

    /// Sends a stored pending draft, walking it through
    /// pending -> sending -> sent, or recording the failure.
    pub async fn send_pending_draft(&self, draft_id: Uuid) -> Result<(), OutboundError> {
        let draft = self
            .storage
            .draft_by_id(draft_id)
            .await?
            .ok_or(OutboundError::DraftNotFound(draft_id))?;
        if draft.status != DraftStatus::Pending {
            return Err(OutboundError::Send(format!(
                "draft {draft_id} is {} and cannot be sent",
                draft.status.as_str()
            )));
        }

        self.storage
            .set_draft_status(draft.id, DraftStatus::Sending)
            .await?;

        let thread_id = self
            .storage
            .conversation_by_id(draft.conversation_id)
            .await?
            .map(|conversation| conversation.thread_id);

        let request = SendRequest {
            reservation_id: draft.reservation_id,
            thread_id,
            to: draft.to_recipients.clone(),
            cc: draft.cc_recipients.clone(),
            subject: draft.subject.clone(),
            body_text: draft.body_text.clone(),
            body_html: draft.body_html.clone(),
            attachment_ids: Vec::new(),
        };

        match self.send(&request).await {
            Ok(()) => {
                self.storage
                    .set_draft_status(draft.id, DraftStatus::Sent)
                    .await?;
                Ok(())
            }
            Err(err) => {
                if let Err(record_err) = self
                    .storage
                    .record_draft_failure(draft.id, &err.to_string())
                    .await
                {
                    warn!(draft = %draft.id, error = %record_err, "failed to record draft failure");
                }
                Err(err)
            }
        }
    }

    /// The provider message the reply hangs off: the newest stored message
    /// of the thread, if the thread is known locally.
    async fn reply_anchor(&self, thread_id: &str) -> Result<Option<String>, OutboundError> {
        let Some(conversation) = self.storage.conversation_by_thread_id(thread_id).await? else {
            return Ok(None);
        };
        Ok(self
            .storage
            .latest_message(conversation.id)
            .await?
            .map(|message| message.provider_message_id))
    }

    /// createReply, patch content/recipients (the subject stays whatever the
    /// provider derived), attach best-effort, send. A failure after the
    /// provider draft exists deletes it so no orphan lingers in the mailbox.
    async fn send_reply(
        &self,
        request: &SendRequest,
        anchor_message_id: &str,
        attachments: &[FileAttachment],
    ) -> Result<(), OutboundError> {
        let provider_draft_id = self
            .provider
            .create_reply(&self.mailbox, anchor_message_id)
            .await?;

        let patch = ReplyPatch {
            body_html: request.body_html.clone(),
            body_text: request.body_text.clone(),
            to: request.to.clone(),
            cc: request.cc.clone(),
        };
        if let Err(err) = self
            .provider
            .update_draft(&self.mailbox, &provider_draft_id, &patch)
            .await
        {
            self.cleanup_provider_draft(&provider_draft_id).await;
            return Err(err.into());
        }

        for attachment in attachments {
            if let Err(err) = self
                .provider
                .add_attachment(&self.mailbox, &provider_draft_id, attachment)
                .await
            {
                warn!(
                    file = %attachment.file_name,
                    error = %err,
                    "attachment upload failed, sending without it"
                );
            }
        }

        if let Err(err) = self
            .provider
            .send_draft(&self.mailbox, &provider_draft_id)
            .await
        {
            self.cleanup_provider_draft(&provider_draft_id).await;
            return Err(err.into());
        }

        Ok(())
    }

    async fn cleanup_provider_draft(&self, provider_draft_id: &str) {
        if let Err(err) = self
            .provider
            .delete_draft(&self.mailbox, provider_draft_id)
            .await
        {
            warn!(draft = %provider_draft_id, error = %err, "failed to delete orphaned provider draft");
        }
    }

    /// Loads stored attachments as base64. Unknown ids are skipped with a
    /// warning; the ids actually loaded come back for the audit trail.
    async fn load_attachments(
        &self,
        attachment_ids: &[Uuid],
    ) -> Result<(Vec<FileAttachment>, Vec<Uuid>), OutboundError> {
        let mut attachments = Vec::with_capacity(attachment_ids.len());
        let mut loaded_ids = Vec::with_capacity(attachment_ids.len());
        for id in attachment_ids {
            match self.storage.template_attachment_by_id(*id).await? {
                Some(stored) => {
                    attachments.push(FileAttachment {
                        file_name: stored.file_name,
                        content_type: stored.content_type,
                        content_base64: BASE64.encode(&stored.content),
                    });
                    loaded_ids.push(*id);
                }
                None => warn!(attachment = %id, "unknown attachment id, skipping"),
            }
        }
        Ok((attachments, loaded_ids))
    }

    /// Post-send bookkeeping. The mail is already out, so failures here are
    /// logged rather than surfaced.
    async fn finish(&self, reservation_id: Uuid, attached_ids: &[Uuid]) {
        let now = Utc::now();
        if let Err(err) = self
            .storage
            .record_attachment_use(reservation_id, attached_ids, now)
            .await
        {
            warn!(reservation = %reservation_id, error = %err, "failed to record attachment audit");
        }
        if let Err(err) = self.storage.set_last_email_sent(reservation_id, now).await {
            warn!(reservation = %reservation_id, error = %err, "failed to stamp last_email_sent_at");
        }
        info!(reservation = %reservation_id, "email sent");
    }
}
