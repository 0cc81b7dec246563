use crate::group::{group_by_thread, ThreadBucket};
use crate::SyncError;
use chrono::Utc;
use innbox_core::{Conversation, StoredMessage};
use innbox_extract::{
    email_content, evaluate_gate, DraftGenerator, ExtractError, Extractor, GateDecision,
    merge_extracted, seed_reservation,
};
use innbox_graph::MailProvider;
use innbox_storage::{ConversationUpsert, Storage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub mailbox: String,
    pub page_size: usize,
    pub extract_timeout_secs: u64,
    pub extractor_version: String,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub conversations: usize,
    pub failed_threads: usize,
    pub messages: Vec<StoredMessage>,
}

enum ExtractionOutcome {
    /// Extracted data was reconciled (or the reservation was seeded).
    Applied,
    /// The gate found the reservation already complete.
    AlreadyComplete,
    /// The extractor completed without producing data, e.g. the thread is
    /// not a reservation enquiry. A benign completion, not a failure.
    NoData(String),
}

/// One full pass over a mailbox: fetch, group, reconcile, then run the
/// extraction queue that reconciliation produced. Everything it does is an
/// upsert keyed by provider ids, so re-running it is harmless.
pub struct SyncService<P, X> {
    storage: Storage,
    provider: Arc<P>,
    extractor: Arc<X>,
    drafts: DraftGenerator,
    settings: SyncSettings,
    mailbox_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<P, X> SyncService<P, X>
where
    P: MailProvider,
    X: Extractor,
{
    pub fn new(
        storage: Storage,
        provider: Arc<P>,
        extractor: Arc<X>,
        drafts: DraftGenerator,
        settings: SyncSettings,
    ) -> Self {
        Self {
            storage,
            provider,
            extractor,
            drafts,
            settings,
            mailbox_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let _guard = self.lock_mailbox().await;

        let fetched = self
            .provider
            .fetch_recent(&self.settings.mailbox, self.settings.page_size)
            .await?;
        let mut all = fetched.inbound;
        all.extend(fetched.sent);

        let mut report = SyncReport::default();
        let mut extraction_queue: Vec<Conversation> = Vec::new();

        for bucket in group_by_thread(all) {
            match self.reconcile_thread(&bucket).await {
                Ok((conversation, written)) => {
                    report.conversations += 1;
                    report.messages.extend(written);
                    if conversation.has_unextracted_messages() {
                        extraction_queue.push(conversation);
                    }
                }
                // One broken thread must not cost the rest of the pass; it
                // will be retried on the next sync.
                Err(err) => {
                    warn!(
                        thread = %bucket.thread_id,
                        error = %err,
                        "thread reconciliation failed"
                    );
                    report.failed_threads += 1;
                }
            }
        }

        info!(
            mailbox = %self.settings.mailbox,
            conversations = report.conversations,
            messages = report.messages.len(),
            queued = extraction_queue.len(),
            "sync pass reconciled"
        );

        for conversation in &extraction_queue {
            self.run_extraction(conversation).await;
        }

        Ok(report)
    }

    /// Targeted refresh of a single thread. Extraction runs regardless of
    /// the watermark; the completeness gate still applies.
    pub async fn sync_conversation(&self, thread_id: &str) -> Result<SyncReport, SyncError> {
        let _guard = self.lock_mailbox().await;

        let messages = self
            .provider
            .fetch_conversation(&self.settings.mailbox, thread_id)
            .await?;

        let mut report = SyncReport::default();
        for bucket in group_by_thread(messages)
            .into_iter()
            .filter(|bucket| bucket.thread_id == thread_id)
        {
            let (conversation, written) = self.reconcile_thread(&bucket).await?;
            report.conversations += 1;
            report.messages.extend(written);
            self.run_extraction(&conversation).await;
        }
        Ok(report)
    }

    /// Read state propagates provider-first so a provider failure leaves the
    /// local flag untouched.
    pub async fn mark_message_read(&self, provider_message_id: &str) -> Result<(), SyncError> {
        self.provider
            .mark_read(&self.settings.mailbox, provider_message_id)
            .await?;
        self.storage.mark_message_read(provider_message_id).await?;
        Ok(())
    }

    pub async fn mark_conversation_viewed(&self, thread_id: &str) -> Result<(), SyncError> {
        if let Some(conversation) = self.storage.conversation_by_thread_id(thread_id).await? {
            self.storage
                .mark_conversation_viewed(conversation.id, Utc::now())
                .await?;
        }
        Ok(())
    }

    async fn lock_mailbox(&self) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.mailbox_locks.lock().await;
            locks
                .entry(self.settings.mailbox.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    async fn reconcile_thread(
        &self,
        bucket: &ThreadBucket,
    ) -> Result<(Conversation, Vec<StoredMessage>), SyncError> {
        let conversation = self
            .storage
            .upsert_conversation(&ConversationUpsert {
                thread_id: bucket.thread_id.clone(),
                subject: bucket.subject.clone(),
                participants: bucket.participants(),
                first_message_at: bucket.first_message_at,
                last_message_at: bucket.last_message_at,
                last_message_direction: bucket.direction(&self.settings.mailbox),
            })
            .await?;

        let now = Utc::now();
        let mut written = Vec::with_capacity(bucket.messages.len());
        for message in &bucket.messages {
            let stored = self
                .storage
                .upsert_message(&StoredMessage {
                    id: Uuid::new_v4(),
                    conversation_id: conversation.id,
                    provider_message_id: message.id.clone(),
                    subject: message.subject.clone(),
                    from_name: message.from_name.clone(),
                    from_address: message.from_address.clone(),
                    to_addresses: message.to_addresses.clone(),
                    preview: message.preview.clone(),
                    body: message.body.clone(),
                    received_at: message.effective_at,
                    is_read: message.is_read,
                    has_attachments: message.has_attachments,
                    importance: message.importance,
                    raw: message.raw.clone(),
                    created_at: now,
                    updated_at: now,
                })
                .await?;
            written.push(stored);
        }

        Ok((conversation, written))
    }

    /// Runs one extraction and records its outcome. Every completed run
    /// advances the watermark, including benign no-data completions; without
    /// that, an unchanged non-reservation thread would be re-extracted on
    /// every pass. Only a failure leaves the watermark alone, making the
    /// conversation eligible for retry once a new message arrives.
    async fn run_extraction(&self, conversation: &Conversation) {
        let watermark = conversation.last_message_at;
        match self.try_extract(conversation).await {
            Ok(ExtractionOutcome::Applied) | Ok(ExtractionOutcome::AlreadyComplete) => {
                if let Err(err) = self
                    .storage
                    .mark_extraction_success(conversation.id, watermark)
                    .await
                {
                    warn!(conversation = %conversation.id, error = %err, "failed to record extraction success");
                }
            }
            Ok(ExtractionOutcome::NoData(reason)) => {
                info!(conversation = %conversation.id, %reason, "extraction produced no data");
                if let Err(err) = self
                    .storage
                    .mark_extraction_success(conversation.id, watermark)
                    .await
                {
                    warn!(conversation = %conversation.id, error = %err, "failed to record extraction success");
                }
            }
            Err(err) => {
                warn!(conversation = %conversation.id, error = %err, "extraction failed");
                if let Err(record_err) = self
                    .storage
                    .mark_extraction_attempt(conversation.id, watermark, Some(&err.to_string()))
                    .await
                {
                    warn!(conversation = %conversation.id, error = %record_err, "failed to record extraction failure");
                }
            }
        }
    }

    async fn try_extract(
        &self,
        conversation: &Conversation,
    ) -> Result<ExtractionOutcome, SyncError> {
        let reservation = self
            .storage
            .reservation_by_conversation(conversation.id)
            .await?;

        let hints = match evaluate_gate(reservation.as_ref()) {
            GateDecision::SkipComplete => return Ok(ExtractionOutcome::AlreadyComplete),
            GateDecision::Run { missing_fields } => missing_fields,
        };

        let messages = self
            .storage
            .messages_for_conversation(conversation.id)
            .await?;
        if messages.is_empty() {
            return Ok(ExtractionOutcome::NoData(
                "no stored messages to extract from".to_string(),
            ));
        }
        let content = email_content(&messages);

        let timeout = Duration::from_secs(self.settings.extract_timeout_secs);
        let outcome =
            match tokio::time::timeout(timeout, self.extractor.extract(&content, &hints)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(
                        ExtractError::Timeout(self.settings.extract_timeout_secs).into(),
                    )
                }
            };

        if outcome.skipped {
            return Ok(ExtractionOutcome::NoData(
                outcome
                    .reason
                    .unwrap_or_else(|| "extractor skipped the thread".to_string()),
            ));
        }
        let Some(extracted) = outcome.data else {
            return Ok(ExtractionOutcome::NoData(
                outcome
                    .reason
                    .unwrap_or_else(|| "extractor returned no data".to_string()),
            ));
        };

        let mailbox = self.settings.mailbox.to_lowercase();
        let inferred_email = messages
            .iter()
            .find(|message| !message.from_address.to_lowercase().contains(&mailbox))
            .map(|message| message.from_address.clone());

        let reservation = match reservation {
            Some(mut existing) => {
                if merge_extracted(
                    &mut existing,
                    &extracted,
                    inferred_email.as_deref(),
                    &self.settings.extractor_version,
                ) {
                    self.storage.update_reservation(&existing).await?;
                }
                existing
            }
            None => {
                let seeded = seed_reservation(
                    conversation.id,
                    &extracted,
                    inferred_email.as_deref(),
                    &self.settings.extractor_version,
                );
                self.storage.insert_reservation(&seeded).await?;
                seeded
            }
        };

        self.drafts
            .maybe_create_missing_details_draft(&reservation, conversation)
            .await?;

        Ok(ExtractionOutcome::Applied)
    }
}
