use crate::StorageError;
use chrono::{DateTime, NaiveDate, Utc};
use innbox_core::{
    Conversation, Direction, DraftStatus, EmailDraft, Importance, MailboxToken, MessageTemplate,
    Reservation, ReservationStatus, RoomProposal, StoredMessage, TemplateAttachment,
};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// Everything the sync pass knows about a thread before it exists locally.
/// Subject is only applied on first insert; later passes never rewrite it.
#[derive(Debug, Clone)]
pub struct ConversationUpsert {
    pub thread_id: String,
    pub subject: String,
    pub participants: Vec<String>,
    pub first_message_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub last_message_direction: Direction,
}

#[derive(Debug, Clone)]
pub struct NewDraft {
    pub reservation_id: Uuid,
    pub conversation_id: Uuid,
    pub template_id: Option<Uuid>,
    pub to_recipients: Vec<String>,
    pub cc_recipients: Vec<String>,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
}

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn connect(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());
        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30))
            .pragma("temp_store", "memory")
            .pragma("cache_size", "-20000");

        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// In-memory database for tests. Single connection so every query sees
    /// the same database.
    pub async fn connect_in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // conversations

    pub async fn upsert_conversation(
        &self,
        upsert: &ConversationUpsert,
    ) -> Result<Conversation, StorageError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO conversations (
              id, thread_id, subject, participants_json,
              first_message_at, last_message_at, last_message_direction,
              created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(thread_id) DO UPDATE SET
              participants_json = excluded.participants_json,
              first_message_at = excluded.first_message_at,
              last_message_at = excluded.last_message_at,
              last_message_direction = excluded.last_message_direction,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&upsert.thread_id)
        .bind(&upsert.subject)
        .bind(serde_json::to_string(&upsert.participants)?)
        .bind(upsert.first_message_at.to_rfc3339())
        .bind(upsert.last_message_at.to_rfc3339())
        .bind(upsert.last_message_direction.as_str())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        match self.conversation_by_thread_id(&upsert.thread_id).await? {
            Some(conversation) => Ok(conversation),
            None => Err(StorageError::Data(format!(
                "conversation `{}` missing after upsert",
                upsert.thread_id
            ))),
        }
    }

    pub async fn conversation_by_thread_id(
        &self,
        thread_id: &str,
    ) -> Result<Option<Conversation>, StorageError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE thread_id = ?1")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_conversation).transpose()
    }

    pub async fn conversation_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<Conversation>, StorageError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_conversation).transpose()
    }

    pub async fn list_conversations(&self, limit: i64) -> Result<Vec<Conversation>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM conversations
            ORDER BY last_message_at DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_conversation).collect()
    }

    /// Stamps the first time staff opened the thread; later opens keep the
    /// original timestamp.
    pub async fn mark_conversation_viewed(
        &self,
        conversation_id: Uuid,
        viewed_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET viewed_at = COALESCE(viewed_at, ?2), updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(conversation_id.to_string())
        .bind(viewed_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records a failed extraction run without touching the watermark, so
    /// the conversation stays eligible for retry.
    pub async fn mark_extraction_attempt(
        &self,
        conversation_id: Uuid,
        attempted_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET last_extraction_attempted_at = ?2,
                last_extraction_error = ?3,
                updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(conversation_id.to_string())
        .bind(attempted_at.to_rfc3339())
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records a successful run: clears the error, stamps the attempt, and
    /// advances the watermark. The CASE guard keeps the watermark monotonic
    /// even if a stale timestamp arrives (RFC3339 UTC strings compare
    /// lexicographically).
    pub async fn mark_extraction_success(
        &self,
        conversation_id: Uuid,
        watermark: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET last_extraction_attempted_at = ?2,
                last_extraction_error = NULL,
                last_extracted_message_at = CASE
                  WHEN last_extracted_message_at IS NULL
                    OR last_extracted_message_at < ?2
                  THEN ?2
                  ELSE last_extracted_message_at
                END,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(conversation_id.to_string())
        .bind(watermark.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // messages

    /// Upsert keyed by the provider's message id. On conflict the local read
    /// flag wins over an unread provider flag (is_read only ever flips
    /// unread -> read here) and the existing row id is kept. Returns the row
    /// as stored.
    pub async fn upsert_message(
        &self,
        message: &StoredMessage,
    ) -> Result<StoredMessage, StorageError> {
        sqlx::query(
            r#"
            INSERT INTO messages (
              id, conversation_id, provider_message_id, subject,
              from_name, from_address, to_json, preview, body,
              received_at, is_read, has_attachments, importance, raw_json,
              created_at, updated_at
            ) VALUES (
              ?1, ?2, ?3, ?4,
              ?5, ?6, ?7, ?8, ?9,
              ?10, ?11, ?12, ?13, ?14,
              ?15, ?16
            )
            ON CONFLICT(provider_message_id) DO UPDATE SET
              conversation_id = excluded.conversation_id,
              subject = excluded.subject,
              from_name = excluded.from_name,
              from_address = excluded.from_address,
              to_json = excluded.to_json,
              preview = excluded.preview,
              body = excluded.body,
              received_at = excluded.received_at,
              is_read = MAX(messages.is_read, excluded.is_read),
              has_attachments = excluded.has_attachments,
              importance = excluded.importance,
              raw_json = excluded.raw_json,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(message.id.to_string())
        .bind(message.conversation_id.to_string())
        .bind(&message.provider_message_id)
        .bind(&message.subject)
        .bind(&message.from_name)
        .bind(&message.from_address)
        .bind(serde_json::to_string(&message.to_addresses)?)
        .bind(&message.preview)
        .bind(&message.body)
        .bind(message.received_at.to_rfc3339())
        .bind(message.is_read)
        .bind(message.has_attachments)
        .bind(message.importance.as_str())
        .bind(serde_json::to_string(&message.raw)?)
        .bind(message.created_at.to_rfc3339())
        .bind(message.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        match self
            .message_by_provider_id(&message.provider_message_id)
            .await?
        {
            Some(stored) => Ok(stored),
            None => Err(StorageError::Data(format!(
                "message `{}` missing after upsert",
                message.provider_message_id
            ))),
        }
    }

    pub async fn message_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<StoredMessage>, StorageError> {
        let row = sqlx::query("SELECT * FROM messages WHERE provider_message_id = ?1")
            .bind(provider_message_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_message).transpose()
    }

    pub async fn messages_for_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = ?1
            ORDER BY received_at ASC
            "#,
        )
        .bind(conversation_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    pub async fn latest_message(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<StoredMessage>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = ?1
            ORDER BY received_at DESC
            LIMIT 1
            "#,
        )
        .bind(conversation_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_message).transpose()
    }

    pub async fn mark_message_read(
        &self,
        provider_message_id: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE messages
            SET is_read = 1, updated_at = ?2
            WHERE provider_message_id = ?1
            "#,
        )
        .bind(provider_message_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // reservations

    pub async fn insert_reservation(&self, reservation: &Reservation) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO reservations (
              id, conversation_id, guest_name, guest_email, guest_phone,
              arrival_date, departure_date, adults, children,
              rooms_json, rate_currency, rate_amount, additional_info,
              status, archived, last_email_sent_at, extractor_version,
              created_at, updated_at
            ) VALUES (
              ?1, ?2, ?3, ?4, ?5,
              ?6, ?7, ?8, ?9,
              ?10, ?11, ?12, ?13,
              ?14, ?15, ?16, ?17,
              ?18, ?19
            )
            "#,
        )
        .bind(reservation.id.to_string())
        .bind(reservation.conversation_id.to_string())
        .bind(&reservation.guest_name)
        .bind(&reservation.guest_email)
        .bind(&reservation.guest_phone)
        .bind(reservation.arrival_date.map(|date| date.to_string()))
        .bind(reservation.departure_date.map(|date| date.to_string()))
        .bind(reservation.adults.map(i64::from))
        .bind(reservation.children.map(i64::from))
        .bind(serde_json::to_string(&reservation.room_selections)?)
        .bind(&reservation.rate_currency)
        .bind(reservation.rate_amount)
        .bind(&reservation.additional_info)
        .bind(reservation.status.as_str())
        .bind(reservation.archived)
        .bind(reservation.last_email_sent_at.map(|value| value.to_rfc3339()))
        .bind(&reservation.extractor_version)
        .bind(reservation.created_at.to_rfc3339())
        .bind(reservation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_reservation(&self, reservation: &Reservation) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE reservations SET
              guest_name = ?2, guest_email = ?3, guest_phone = ?4,
              arrival_date = ?5, departure_date = ?6,
              adults = ?7, children = ?8,
              rooms_json = ?9, rate_currency = ?10, rate_amount = ?11,
              additional_info = ?12, status = ?13, archived = ?14,
              extractor_version = ?15, updated_at = ?16
            WHERE id = ?1
            "#,
        )
        .bind(reservation.id.to_string())
        .bind(&reservation.guest_name)
        .bind(&reservation.guest_email)
        .bind(&reservation.guest_phone)
        .bind(reservation.arrival_date.map(|date| date.to_string()))
        .bind(reservation.departure_date.map(|date| date.to_string()))
        .bind(reservation.adults.map(i64::from))
        .bind(reservation.children.map(i64::from))
        .bind(serde_json::to_string(&reservation.room_selections)?)
        .bind(&reservation.rate_currency)
        .bind(reservation.rate_amount)
        .bind(&reservation.additional_info)
        .bind(reservation.status.as_str())
        .bind(reservation.archived)
        .bind(&reservation.extractor_version)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Zero-or-one per conversation; archived reservations are invisible here
    /// so an archived thread can start over.
    pub async fn reservation_by_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<Reservation>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM reservations
            WHERE conversation_id = ?1 AND archived = 0
            "#,
        )
        .bind(conversation_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    pub async fn reservation_by_id(&self, id: Uuid) -> Result<Option<Reservation>, StorageError> {
        let row = sqlx::query("SELECT * FROM reservations WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    pub async fn archive_reservation(&self, id: Uuid) -> Result<(), StorageError> {
        sqlx::query("UPDATE reservations SET archived = 1, updated_at = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn set_last_email_sent(
        &self,
        reservation_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE reservations
            SET last_email_sent_at = ?2, updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(reservation_id.to_string())
        .bind(sent_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // drafts

    pub async fn insert_draft(&self, draft: &NewDraft) -> Result<EmailDraft, StorageError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO email_drafts (
              id, reservation_id, conversation_id, template_id,
              to_json, cc_json, subject, body_text, body_html,
              status, error, attempt_count, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', NULL, 0, ?10, ?11)
            "#,
        )
        .bind(id.to_string())
        .bind(draft.reservation_id.to_string())
        .bind(draft.conversation_id.to_string())
        .bind(draft.template_id.map(|value| value.to_string()))
        .bind(serde_json::to_string(&draft.to_recipients)?)
        .bind(serde_json::to_string(&draft.cc_recipients)?)
        .bind(&draft.subject)
        .bind(&draft.body_text)
        .bind(&draft.body_html)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(EmailDraft {
            id,
            reservation_id: draft.reservation_id,
            conversation_id: draft.conversation_id,
            template_id: draft.template_id,
            to_recipients: draft.to_recipients.clone(),
            cc_recipients: draft.cc_recipients.clone(),
            subject: draft.subject.clone(),
            body_text: draft.body_text.clone(),
            body_html: draft.body_html.clone(),
            status: DraftStatus::Pending,
            error: None,
            attempt_count: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn pending_draft_for_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<EmailDraft>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM email_drafts
            WHERE reservation_id = ?1 AND status = 'pending'
            LIMIT 1
            "#,
        )
        .bind(reservation_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_draft).transpose()
    }

    pub async fn draft_by_id(&self, id: Uuid) -> Result<Option<EmailDraft>, StorageError> {
        let row = sqlx::query("SELECT * FROM email_drafts WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_draft).transpose()
    }

    pub async fn drafts_for_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Vec<EmailDraft>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM email_drafts
            WHERE reservation_id = ?1
            ORDER BY created_at ASC
            "#,
        )
        .bind(reservation_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_draft).collect()
    }

    pub async fn set_draft_status(
        &self,
        draft_id: Uuid,
        status: DraftStatus,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE email_drafts
            SET status = ?2, error = NULL, updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(draft_id.to_string())
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn record_draft_failure(
        &self,
        draft_id: Uuid,
        error: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE email_drafts
            SET status = 'failed',
                error = ?2,
                attempt_count = attempt_count + 1,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(draft_id.to_string())
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_draft(&self, draft_id: Uuid) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM email_drafts WHERE id = ?1")
            .bind(draft_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // oauth tokens

    pub async fn token_for_mailbox(
        &self,
        mailbox: &str,
    ) -> Result<Option<MailboxToken>, StorageError> {
        let row = sqlx::query("SELECT * FROM oauth_tokens WHERE mailbox = ?1")
            .bind(mailbox)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_token).transpose()
    }

    pub async fn upsert_token(&self, token: &MailboxToken) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO oauth_tokens (mailbox, access_token, refresh_token, expires_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(mailbox) DO UPDATE SET
              access_token = excluded.access_token,
              refresh_token = excluded.refresh_token,
              expires_at = excluded.expires_at,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(&token.mailbox)
        .bind(&token.access_token)
        .bind(&token.refresh_token)
        .bind(token.expires_at.to_rfc3339())
        .bind(token.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // templates

    pub async fn upsert_template(&self, template: &MessageTemplate) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO message_templates (
              id, name, subject_template, body_template, html_body_template, is_active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
              name = excluded.name,
              subject_template = excluded.subject_template,
              body_template = excluded.body_template,
              html_body_template = excluded.html_body_template,
              is_active = excluded.is_active
            "#,
        )
        .bind(template.id.to_string())
        .bind(&template.name)
        .bind(&template.subject_template)
        .bind(&template.body_template)
        .bind(&template.html_body_template)
        .bind(template.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn active_template_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<MessageTemplate>, StorageError> {
        let row = sqlx::query("SELECT * FROM message_templates WHERE id = ?1 AND is_active = 1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_template).transpose()
    }

    pub async fn list_templates(&self) -> Result<Vec<MessageTemplate>, StorageError> {
        let rows = sqlx::query("SELECT * FROM message_templates ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_template).collect()
    }

    // template attachments

    pub async fn insert_template_attachment(
        &self,
        attachment: &TemplateAttachment,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO template_attachments (id, file_name, content_type, content)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(attachment.id.to_string())
        .bind(&attachment.file_name)
        .bind(&attachment.content_type)
        .bind(&attachment.content)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn template_attachment_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<TemplateAttachment>, StorageError> {
        let row = sqlx::query("SELECT * FROM template_attachments WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let id_raw: String = row.try_get("id")?;
                Ok(Some(TemplateAttachment {
                    id: parse_uuid(&id_raw, "template_attachments.id")?,
                    file_name: row.try_get("file_name")?,
                    content_type: row.try_get("content_type")?,
                    content: row.try_get("content")?,
                }))
            }
            None => Ok(None),
        }
    }

    /// Audit trail of which stored attachments went out with which
    /// reservation's email.
    pub async fn record_attachment_use(
        &self,
        reservation_id: Uuid,
        attachment_ids: &[Uuid],
        sent_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if attachment_ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for attachment_id in attachment_ids {
            sqlx::query(
                r#"
                INSERT INTO attachment_audit (id, reservation_id, attachment_id, sent_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(reservation_id.to_string())
            .bind(attachment_id.to_string())
            .bind(sent_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    pub async fn attachment_audit_for_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Vec<Uuid>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT attachment_id FROM attachment_audit
            WHERE reservation_id = ?1
            ORDER BY sent_at ASC
            "#,
        )
        .bind(reservation_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let raw: String = row.try_get("attachment_id")?;
                parse_uuid(&raw, "attachment_audit.attachment_id")
            })
            .collect()
    }

    // room proposals

    pub async fn upsert_room_proposal(&self, proposal: &RoomProposal) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO room_proposals (id, reservation_id, name, rooms_json, display_order)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
              name = excluded.name,
              rooms_json = excluded.rooms_json,
              display_order = excluded.display_order
            "#,
        )
        .bind(proposal.id.to_string())
        .bind(proposal.reservation_id.to_string())
        .bind(&proposal.name)
        .bind(serde_json::to_string(&proposal.rooms)?)
        .bind(proposal.display_order)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn room_proposals_for_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Vec<RoomProposal>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM room_proposals
            WHERE reservation_id = ?1
            ORDER BY display_order ASC
            "#,
        )
        .bind(reservation_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_proposal).collect()
    }

    pub async fn delete_room_proposal(&self, id: Uuid) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM room_proposals WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // row mappers

    fn row_to_conversation(row: sqlx::sqlite::SqliteRow) -> Result<Conversation, StorageError> {
        let id_raw: String = row.try_get("id")?;
        let participants_raw: String = row.try_get("participants_json")?;
        let direction_raw: String = row.try_get("last_message_direction")?;
        let first_raw: String = row.try_get("first_message_at")?;
        let last_raw: String = row.try_get("last_message_at")?;
        let viewed_raw: Option<String> = row.try_get("viewed_at")?;
        let extracted_raw: Option<String> = row.try_get("last_extracted_message_at")?;
        let attempted_raw: Option<String> = row.try_get("last_extraction_attempted_at")?;
        let created_raw: String = row.try_get("created_at")?;
        let updated_raw: String = row.try_get("updated_at")?;

        Ok(Conversation {
            id: parse_uuid(&id_raw, "conversations.id")?,
            thread_id: row.try_get("thread_id")?,
            subject: row.try_get("subject")?,
            participants: parse_json(&participants_raw, "conversations.participants_json")?,
            first_message_at: parse_datetime(&first_raw, "conversations.first_message_at")?,
            last_message_at: parse_datetime(&last_raw, "conversations.last_message_at")?,
            last_message_direction: parse_enum(
                &direction_raw,
                "conversations.last_message_direction",
            )?,
            viewed_at: viewed_raw
                .as_deref()
                .map(|raw| parse_datetime(raw, "conversations.viewed_at"))
                .transpose()?,
            last_extracted_message_at: extracted_raw
                .as_deref()
                .map(|raw| parse_datetime(raw, "conversations.last_extracted_message_at"))
                .transpose()?,
            last_extraction_attempted_at: attempted_raw
                .as_deref()
                .map(|raw| parse_datetime(raw, "conversations.last_extraction_attempted_at"))
                .transpose()?,
            last_extraction_error: row.try_get("last_extraction_error")?,
            created_at: parse_datetime(&created_raw, "conversations.created_at")?,
            updated_at: parse_datetime(&updated_raw, "conversations.updated_at")?,
        })
    }

    fn row_to_message(row: sqlx::sqlite::SqliteRow) -> Result<StoredMessage, StorageError> {
        let id_raw: String = row.try_get("id")?;
        let conversation_raw: String = row.try_get("conversation_id")?;
        let to_raw: String = row.try_get("to_json")?;
        let received_raw: String = row.try_get("received_at")?;
        let importance_raw: String = row.try_get("importance")?;
        let raw_json: String = row.try_get("raw_json")?;
        let created_raw: String = row.try_get("created_at")?;
        let updated_raw: String = row.try_get("updated_at")?;

        Ok(StoredMessage {
            id: parse_uuid(&id_raw, "messages.id")?,
            conversation_id: parse_uuid(&conversation_raw, "messages.conversation_id")?,
            provider_message_id: row.try_get("provider_message_id")?,
            subject: row.try_get("subject")?,
            from_name: row.try_get("from_name")?,
            from_address: row.try_get("from_address")?,
            to_addresses: parse_json(&to_raw, "messages.to_json")?,
            preview: row.try_get("preview")?,
            body: row.try_get("body")?,
            received_at: parse_datetime(&received_raw, "messages.received_at")?,
            is_read: row.try_get("is_read")?,
            has_attachments: row.try_get("has_attachments")?,
            importance: Importance::parse_lenient(&importance_raw),
            raw: parse_json(&raw_json, "messages.raw_json")?,
            created_at: parse_datetime(&created_raw, "messages.created_at")?,
            updated_at: parse_datetime(&updated_raw, "messages.updated_at")?,
        })
    }

    fn row_to_reservation(row: sqlx::sqlite::SqliteRow) -> Result<Reservation, StorageError> {
        let id_raw: String = row.try_get("id")?;
        let conversation_raw: String = row.try_get("conversation_id")?;
        let arrival_raw: Option<String> = row.try_get("arrival_date")?;
        let departure_raw: Option<String> = row.try_get("departure_date")?;
        let adults_raw: Option<i64> = row.try_get("adults")?;
        let children_raw: Option<i64> = row.try_get("children")?;
        let rooms_raw: String = row.try_get("rooms_json")?;
        let status_raw: String = row.try_get("status")?;
        let sent_raw: Option<String> = row.try_get("last_email_sent_at")?;
        let created_raw: String = row.try_get("created_at")?;
        let updated_raw: String = row.try_get("updated_at")?;

        Ok(Reservation {
            id: parse_uuid(&id_raw, "reservations.id")?,
            conversation_id: parse_uuid(&conversation_raw, "reservations.conversation_id")?,
            guest_name: row.try_get("guest_name")?,
            guest_email: row.try_get("guest_email")?,
            guest_phone: row.try_get("guest_phone")?,
            arrival_date: arrival_raw
                .as_deref()
                .map(|raw| parse_date(raw, "reservations.arrival_date"))
                .transpose()?,
            departure_date: departure_raw
                .as_deref()
                .map(|raw| parse_date(raw, "reservations.departure_date"))
                .transpose()?,
            adults: adults_raw
                .map(|value| parse_count(value, "reservations.adults"))
                .transpose()?,
            children: children_raw
                .map(|value| parse_count(value, "reservations.children"))
                .transpose()?,
            room_selections: parse_json(&rooms_raw, "reservations.rooms_json")?,
            rate_currency: row.try_get("rate_currency")?,
            rate_amount: row.try_get("rate_amount")?,
            additional_info: row.try_get("additional_info")?,
            status: parse_enum::<ReservationStatus>(&status_raw, "reservations.status")?,
            archived: row.try_get("archived")?,
            last_email_sent_at: sent_raw
                .as_deref()
                .map(|raw| parse_datetime(raw, "reservations.last_email_sent_at"))
                .transpose()?,
            extractor_version: row.try_get("extractor_version")?,
            created_at: parse_datetime(&created_raw, "reservations.created_at")?,
            updated_at: parse_datetime(&updated_raw, "reservations.updated_at")?,
        })
    }

    fn row_to_draft(row: sqlx::sqlite::SqliteRow) -> Result<EmailDraft, StorageError> {
        let id_raw: String = row.try_get("id")?;
        let reservation_raw: String = row.try_get("reservation_id")?;
        let conversation_raw: String = row.try_get("conversation_id")?;
        let template_raw: Option<String> = row.try_get("template_id")?;
        let to_raw: String = row.try_get("to_json")?;
        let cc_raw: String = row.try_get("cc_json")?;
        let status_raw: String = row.try_get("status")?;
        let attempts_raw: i64 = row.try_get("attempt_count")?;
        let created_raw: String = row.try_get("created_at")?;
        let updated_raw: String = row.try_get("updated_at")?;

        Ok(EmailDraft {
            id: parse_uuid(&id_raw, "email_drafts.id")?,
            reservation_id: parse_uuid(&reservation_raw, "email_drafts.reservation_id")?,
            conversation_id: parse_uuid(&conversation_raw, "email_drafts.conversation_id")?,
            template_id: template_raw
                .as_deref()
                .map(|raw| parse_uuid(raw, "email_drafts.template_id"))
                .transpose()?,
            to_recipients: parse_json(&to_raw, "email_drafts.to_json")?,
            cc_recipients: parse_json(&cc_raw, "email_drafts.cc_json")?,
            subject: row.try_get("subject")?,
            body_text: row.try_get("body_text")?,
            body_html: row.try_get("body_html")?,
            status: parse_enum::<DraftStatus>(&status_raw, "email_drafts.status")?,
            error: row.try_get("error")?,
            attempt_count: parse_count(attempts_raw, "email_drafts.attempt_count")?,
            created_at: parse_datetime(&created_raw, "email_drafts.created_at")?,
            updated_at: parse_datetime(&updated_raw, "email_drafts.updated_at")?,
        })
    }

    fn row_to_token(row: sqlx::sqlite::SqliteRow) -> Result<MailboxToken, StorageError> {
        let expires_raw: String = row.try_get("expires_at")?;
        let updated_raw: String = row.try_get("updated_at")?;

        Ok(MailboxToken {
            mailbox: row.try_get("mailbox")?,
            access_token: row.try_get("access_token")?,
            refresh_token: row.try_get("refresh_token")?,
            expires_at: parse_datetime(&expires_raw, "oauth_tokens.expires_at")?,
            updated_at: parse_datetime(&updated_raw, "oauth_tokens.updated_at")?,
        })
    }

    fn row_to_template(row: sqlx::sqlite::SqliteRow) -> Result<MessageTemplate, StorageError> {
        let id_raw: String = row.try_get("id")?;

        Ok(MessageTemplate {
            id: parse_uuid(&id_raw, "message_templates.id")?,
            name: row.try_get("name")?,
            subject_template: row.try_get("subject_template")?,
            body_template: row.try_get("body_template")?,
            html_body_template: row.try_get("html_body_template")?,
            is_active: row.try_get("is_active")?,
        })
    }

    fn row_to_proposal(row: sqlx::sqlite::SqliteRow) -> Result<RoomProposal, StorageError> {
        let id_raw: String = row.try_get("id")?;
        let reservation_raw: String = row.try_get("reservation_id")?;
        let rooms_raw: String = row.try_get("rooms_json")?;

        Ok(RoomProposal {
            id: parse_uuid(&id_raw, "room_proposals.id")?,
            reservation_id: parse_uuid(&reservation_raw, "room_proposals.reservation_id")?,
            name: row.try_get("name")?,
            rooms: parse_json(&rooms_raw, "room_proposals.rooms_json")?,
            display_order: row.try_get("display_order")?,
        })
    }
}

fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw)
        .map_err(|err| StorageError::Data(format!("invalid uuid for {field}: {err}")))
}

fn parse_datetime(raw: &str, field: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StorageError::Data(format!("invalid datetime for {field}: {err}")))
}

fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, StorageError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|err| StorageError::Data(format!("invalid date for {field}: {err}")))
}

fn parse_count(value: i64, field: &str) -> Result<u32, StorageError> {
    u32::try_from(value)
        .map_err(|err| StorageError::Data(format!("invalid count for {field}: {err}")))
}

fn parse_enum<T>(raw: &str, field: &str) -> Result<T, StorageError>
where
    T: FromStr<Err = String>,
{
    raw.parse()
        .map_err(|err| StorageError::Data(format!("invalid value for {field}: {err}")))
}

fn parse_json<T>(raw: &str, field: &str) -> Result<T, StorageError>
where
    T: DeserializeOwned,
{
    serde_json::from_str(raw)
        .map_err(|err| StorageError::Data(format!("invalid json for {field}: {err}")))
}
