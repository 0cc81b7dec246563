use crate::{render_template, ExtractError};
use innbox_core::{Conversation, EmailDraft, Reservation};
use innbox_storage::{NewDraft, Storage};
use tracing::info;
use uuid::Uuid;

/// Creates at most one pending missing-details draft per reservation.
/// Calling it again while a pending draft exists is a no-op, which is what
/// makes the sync pass safe to repeat.
#[derive(Clone)]
pub struct DraftGenerator {
    storage: Storage,
    mailbox: String,
    template_id: Option<Uuid>,
}

impl DraftGenerator {
    pub fn new(storage: Storage, mailbox: String, template_id: Option<Uuid>) -> Self {
        Self {
            storage,
            mailbox,
            template_id,
        }
    }

    pub async fn maybe_create_missing_details_draft(
        &self,
        reservation: &Reservation,
        conversation: &Conversation,
    ) -> Result<Option<EmailDraft>, ExtractError> {
        if reservation.is_complete() {
            return Ok(None);
        }
        if self
            .storage
            .pending_draft_for_reservation(reservation.id)
            .await?
            .is_some()
        {
            return Ok(None);
        }

        let to_recipients = match self.recipient(reservation, conversation).await? {
            Some(address) => vec![address],
            None => Vec::new(),
        };

        let (template_id, subject, body_text, body_html) =
            self.render(reservation, conversation).await?;

        let draft = self
            .storage
            .insert_draft(&NewDraft {
                reservation_id: reservation.id,
                conversation_id: conversation.id,
                template_id,
                to_recipients,
                cc_recipients: Vec::new(),
                subject,
                body_text,
                body_html,
            })
            .await?;

        info!(
            reservation = %reservation.id,
            draft = %draft.id,
            "created missing-details draft"
        );
        Ok(Some(draft))
    }

    /// Extracted contact address first, then the first inbound sender in the
    /// thread. May legitimately resolve to nothing; staff fill it in before
    /// sending.
    async fn recipient(
        &self,
        reservation: &Reservation,
        conversation: &Conversation,
    ) -> Result<Option<String>, ExtractError> {
        if let Some(email) = &reservation.guest_email {
            return Ok(Some(email.clone()));
        }

        let mailbox = self.mailbox.to_lowercase();
        let messages = self
            .storage
            .messages_for_conversation(conversation.id)
            .await?;
        Ok(messages
            .into_iter()
            .find(|message| !message.from_address.to_lowercase().contains(&mailbox))
            .map(|message| message.from_address))
    }

    async fn render(
        &self,
        reservation: &Reservation,
        conversation: &Conversation,
    ) -> Result<(Option<Uuid>, String, Option<String>, Option<String>), ExtractError> {
        if let Some(template_id) = self.template_id {
            if let Some(template) = self.storage.active_template_by_id(template_id).await? {
                let subject = render_template(&template.subject_template, reservation)?;
                let body_text = template
                    .body_template
                    .as_deref()
                    .map(|body| render_template(body, reservation))
                    .transpose()?;
                let body_html = template
                    .html_body_template
                    .as_deref()
                    .map(|body| render_template(body, reservation))
                    .transpose()?;
                return Ok((Some(template.id), subject, body_text, body_html));
            }
        }

        Ok((
            None,
            reply_subject(&conversation.subject),
            Some(fallback_body(reservation)),
            None,
        ))
    }
}

fn reply_subject(subject: &str) -> String {
    if subject.to_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

fn fallback_body(reservation: &Reservation) -> String {
    let bullets = reservation
        .missing_guest_details()
        .iter()
        .map(|label| format!("- {label}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Dear guest,\n\nThank you for your enquiry. To prepare an offer we still need \
         the following details:\n\n{bullets}\n\nKind regards,\nThe reception team"
    )
}
