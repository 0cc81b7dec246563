use async_trait::async_trait;
use chrono::NaiveDate;
use innbox_core::{Direction, ExtractedReservation};
use innbox_extract::{DraftGenerator, ExtractError, ExtractOutcome, Extractor};
use innbox_graph::{
    parse_message, FetchedMail, FileAttachment, GraphError, MailProvider, OutgoingMail,
    ProviderMessage, ReplyPatch,
};
use innbox_storage::Storage;
use innbox_sync::{SyncService, SyncSettings};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const MAILBOX: &str = "frontdesk@hotel.example";

struct FakeProvider {
    mail: Mutex<FetchedMail>,
    fetch_calls: AtomicUsize,
    read_calls: Mutex<Vec<String>>,
}

impl FakeProvider {
    fn new() -> Self {
        Self {
            mail: Mutex::new(FetchedMail::default()),
            fetch_calls: AtomicUsize::new(0),
            read_calls: Mutex::new(Vec::new()),
        }
    }

    fn push_inbound(&self, message: ProviderMessage) {
        self.mail.lock().expect("lock").inbound.push(message);
    }

    fn push_sent(&self, message: ProviderMessage) {
        self.mail.lock().expect("lock").sent.push(message);
    }
}

#[async_trait]
impl MailProvider for FakeProvider {
    async fn fetch_recent(
        &self,
        _mailbox: &str,
        _page_size: usize,
    ) -> Result<FetchedMail, GraphError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.mail.lock().expect("lock").clone())
    }

    async fn fetch_conversation(
        &self,
        _mailbox: &str,
        thread_id: &str,
    ) -> Result<Vec<ProviderMessage>, GraphError> {
        let mail = self.mail.lock().expect("lock").clone();
        Ok(mail
            .inbound
            .into_iter()
            .chain(mail.sent)
            .filter(|message| message.thread_id == thread_id)
            .collect())
    }

    async fn create_reply(&self, _: &str, _: &str) -> Result<String, GraphError> {
        unimplemented!("not used by sync tests")
    }

    async fn update_draft(&self, _: &str, _: &str, _: &ReplyPatch) -> Result<(), GraphError> {
        unimplemented!("not used by sync tests")
    }

    async fn add_attachment(
        &self,
        _: &str,
        _: &str,
        _: &FileAttachment,
    ) -> Result<(), GraphError> {
        unimplemented!("not used by sync tests")
    }

    async fn send_draft(&self, _: &str, _: &str) -> Result<(), GraphError> {
        unimplemented!("not used by sync tests")
    }

    async fn delete_draft(&self, _: &str, _: &str) -> Result<(), GraphError> {
        unimplemented!("not used by sync tests")
    }

    async fn send_mail(&self, _: &str, _: &OutgoingMail) -> Result<(), GraphError> {
        unimplemented!("not used by sync tests")
    }

    async fn mark_read(&self, _mailbox: &str, message_id: &str) -> Result<(), GraphError> {
        self.read_calls
            .lock()
            .expect("lock")
            .push(message_id.to_string());
        Ok(())
    }
}

struct FakeExtractor {
    script: Mutex<VecDeque<Result<ExtractOutcome, ExtractError>>>,
    calls: AtomicUsize,
    hints_seen: Mutex<Vec<Vec<String>>>,
}

impl FakeExtractor {
    fn new(script: Vec<Result<ExtractOutcome, ExtractError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            hints_seen: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(
        &self,
        _email_content: &str,
        missing_fields: &[String],
    ) -> Result<ExtractOutcome, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.hints_seen
            .lock()
            .expect("lock")
            .push(missing_fields.to_vec());
        self.script
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected extraction call"))
    }
}

fn inbound(id: &str, thread: &str, from: &str, received: &str, body: &str) -> ProviderMessage {
    parse_message(json!({
        "id": id,
        "conversationId": thread,
        "subject": "Booking enquiry",
        "from": {"emailAddress": {"name": "Alice Wong", "address": from}},
        "toRecipients": [{"emailAddress": {"address": MAILBOX}}],
        "bodyPreview": body,
        "body": {"contentType": "text", "content": body},
        "receivedDateTime": received,
        "isRead": false,
    }))
    .expect("valid message")
}

fn outbound(id: &str, thread: &str, sent: &str) -> ProviderMessage {
    parse_message(json!({
        "id": id,
        "conversationId": thread,
        "subject": "RE: Booking enquiry",
        "from": {"emailAddress": {"address": MAILBOX}},
        "toRecipients": [{"emailAddress": {"address": "alice@example.com"}}],
        "body": {"contentType": "text", "content": "Thanks, checking availability."},
        "sentDateTime": sent,
        "isRead": true,
    }))
    .expect("valid message")
}

fn full_extraction() -> Result<ExtractOutcome, ExtractError> {
    Ok(ExtractOutcome {
        data: Some(ExtractedReservation {
            arrival_date: NaiveDate::from_ymd_opt(2026, 9, 12),
            departure_date: NaiveDate::from_ymd_opt(2026, 9, 15),
            guest_name: Some("Alice Wong".to_string()),
            guest_email: Some("alice@example.com".to_string()),
            adult_count: Some(2),
            child_count: Some(0),
            ..ExtractedReservation::default()
        }),
        skipped: false,
        reason: None,
    })
}

fn partial_extraction() -> Result<ExtractOutcome, ExtractError> {
    Ok(ExtractOutcome {
        data: Some(ExtractedReservation {
            arrival_date: NaiveDate::from_ymd_opt(2026, 9, 12),
            guest_name: Some("Alice Wong".to_string()),
            adult_count: Some(2),
            child_count: Some(0),
            ..ExtractedReservation::default()
        }),
        skipped: false,
        reason: None,
    })
}

async fn service(
    script: Vec<Result<ExtractOutcome, ExtractError>>,
) -> (
    Storage,
    Arc<FakeProvider>,
    Arc<FakeExtractor>,
    SyncService<FakeProvider, FakeExtractor>,
) {
    let storage = Storage::connect_in_memory().await.expect("storage");
    let provider = Arc::new(FakeProvider::new());
    let extractor = Arc::new(FakeExtractor::new(script));
    let drafts = DraftGenerator::new(storage.clone(), MAILBOX.to_string(), None);
    let service = SyncService::new(
        storage.clone(),
        provider.clone(),
        extractor.clone(),
        drafts,
        SyncSettings {
            mailbox: MAILBOX.to_string(),
            page_size: 50,
            extract_timeout_secs: 5,
            extractor_version: "v1".to_string(),
        },
    );
    (storage, provider, extractor, service)
}

// A complete enquiry in a single message: reservation is filled in one pass
// and no follow-up draft appears.
#[tokio::test]
async fn complete_thread_extracts_without_drafting() {
    let (storage, provider, extractor, service) = service(vec![full_extraction()]).await;
    provider.push_inbound(inbound(
        "m1",
        "t1",
        "alice@example.com",
        "2026-08-20T09:00:00Z",
        "Two adults, Sep 12-15, alice@example.com, Alice Wong",
    ));

    let report = service.sync().await.expect("sync");
    assert_eq!(report.conversations, 1);
    assert_eq!(report.messages.len(), 1);
    assert_eq!(report.failed_threads, 0);

    let conversation = storage
        .conversation_by_thread_id("t1")
        .await
        .expect("lookup")
        .expect("exists");
    assert_eq!(conversation.last_message_direction, Direction::Inbound);
    assert_eq!(
        conversation.last_extracted_message_at,
        Some(conversation.last_message_at)
    );
    assert!(conversation.last_extraction_error.is_none());

    let reservation = storage
        .reservation_by_conversation(conversation.id)
        .await
        .expect("lookup")
        .expect("seeded");
    assert!(reservation.is_complete());
    assert!(storage
        .drafts_for_reservation(reservation.id)
        .await
        .expect("drafts")
        .is_empty());

    assert_eq!(extractor.call_count(), 1);
    let hints = extractor.hints_seen.lock().expect("lock");
    assert!(hints[0].is_empty());
}

// A partial enquiry produces exactly one pending missing-details draft, and
// the draft names what is still missing.
#[tokio::test]
async fn partial_thread_gets_one_missing_details_draft() {
    let (storage, provider, _extractor, service) = service(vec![partial_extraction()]).await;
    provider.push_inbound(inbound(
        "m1",
        "t1",
        "alice@example.com",
        "2026-08-20T09:00:00Z",
        "Arriving Sep 12, two adults. - Alice",
    ));

    service.sync().await.expect("sync");

    let conversation = storage
        .conversation_by_thread_id("t1")
        .await
        .expect("lookup")
        .expect("exists");
    let reservation = storage
        .reservation_by_conversation(conversation.id)
        .await
        .expect("lookup")
        .expect("seeded");
    assert!(!reservation.is_complete());
    // Contact email was inferred from the inbound sender.
    assert_eq!(reservation.guest_email.as_deref(), Some("alice@example.com"));

    let draft = storage
        .pending_draft_for_reservation(reservation.id)
        .await
        .expect("lookup")
        .expect("draft created");
    assert_eq!(draft.to_recipients, vec!["alice@example.com"]);
    let body = draft.body_text.expect("body");
    assert!(body.contains("- Check-out date"));
    assert!(!body.contains("- Contact email"));
}

// Re-syncing with no new mail must neither call the extractor again nor
// create a second draft.
#[tokio::test]
async fn resync_without_new_mail_is_a_no_op() {
    let (storage, provider, extractor, service) = service(vec![partial_extraction()]).await;
    provider.push_inbound(inbound(
        "m1",
        "t1",
        "alice@example.com",
        "2026-08-20T09:00:00Z",
        "Arriving Sep 12, two adults.",
    ));

    service.sync().await.expect("first sync");
    service.sync().await.expect("second sync");

    assert_eq!(extractor.call_count(), 1);

    let conversation = storage
        .conversation_by_thread_id("t1")
        .await
        .expect("lookup")
        .expect("exists");
    let reservation = storage
        .reservation_by_conversation(conversation.id)
        .await
        .expect("lookup")
        .expect("exists");
    let drafts = storage
        .drafts_for_reservation(reservation.id)
        .await
        .expect("drafts");
    assert_eq!(drafts.len(), 1);
}

// A new message re-opens extraction, the second call carries hints for the
// still-missing fields, and existing values survive the merge.
#[tokio::test]
async fn new_message_triggers_hinted_re_extraction() {
    let second = Ok(ExtractOutcome {
        data: Some(ExtractedReservation {
            departure_date: NaiveDate::from_ymd_opt(2026, 9, 15),
            guest_name: Some("Alicia Wong".to_string()),
            ..ExtractedReservation::default()
        }),
        skipped: false,
        reason: None,
    });
    let (storage, provider, extractor, service) =
        service(vec![partial_extraction(), second]).await;
    provider.push_inbound(inbound(
        "m1",
        "t1",
        "alice@example.com",
        "2026-08-20T09:00:00Z",
        "Arriving Sep 12, two adults.",
    ));
    service.sync().await.expect("first sync");

    provider.push_inbound(inbound(
        "m2",
        "t1",
        "alice@example.com",
        "2026-08-21T08:30:00Z",
        "We leave on the 15th.",
    ));
    service.sync().await.expect("second sync");

    assert_eq!(extractor.call_count(), 2);
    let hints = extractor.hints_seen.lock().expect("lock");
    assert!(hints[1].contains(&"departure_date".to_string()));
    assert!(!hints[1].contains(&"arrival_date".to_string()));
    drop(hints);

    let conversation = storage
        .conversation_by_thread_id("t1")
        .await
        .expect("lookup")
        .expect("exists");
    let reservation = storage
        .reservation_by_conversation(conversation.id)
        .await
        .expect("lookup")
        .expect("exists");
    // The earlier name wins; only the missing field was filled.
    assert_eq!(reservation.guest_name.as_deref(), Some("Alice Wong"));
    assert_eq!(
        reservation.departure_date,
        NaiveDate::from_ymd_opt(2026, 9, 15)
    );
    assert!(reservation.is_complete());
    assert_eq!(
        conversation.last_extracted_message_at,
        Some(conversation.last_message_at)
    );
}

// A thread the extractor declines (not a reservation enquiry) is a benign
// completion: the watermark advances, nothing lands in the error field, and
// re-syncing the unchanged thread never calls the extractor again.
#[tokio::test]
async fn skipped_thread_is_extracted_only_once() {
    let skipped = Ok(ExtractOutcome {
        data: None,
        skipped: true,
        reason: Some("not a reservation enquiry".to_string()),
    });
    let (storage, provider, extractor, service) = service(vec![skipped]).await;
    provider.push_inbound(inbound(
        "m1",
        "t1",
        "newsletter@example.com",
        "2026-08-20T09:00:00Z",
        "Our summer deals are here!",
    ));

    service.sync().await.expect("first sync");
    service.sync().await.expect("second sync");
    service.sync().await.expect("third sync");

    assert_eq!(extractor.call_count(), 1);

    let conversation = storage
        .conversation_by_thread_id("t1")
        .await
        .expect("lookup")
        .expect("exists");
    assert_eq!(
        conversation.last_extracted_message_at,
        Some(conversation.last_message_at)
    );
    assert!(conversation.last_extraction_error.is_none());
    assert!(storage
        .reservation_by_conversation(conversation.id)
        .await
        .expect("lookup")
        .is_none());
}

// An extraction failure records the error and leaves the watermark alone;
// the next message retries.
#[tokio::test]
async fn failed_extraction_is_recorded_and_retried() {
    let (storage, provider, extractor, service) = service(vec![
        Err(ExtractError::Remote("extractor returned 500".to_string())),
        partial_extraction(),
    ])
    .await;
    provider.push_inbound(inbound(
        "m1",
        "t1",
        "alice@example.com",
        "2026-08-20T09:00:00Z",
        "Arriving Sep 12.",
    ));

    service.sync().await.expect("sync despite extractor failure");

    let conversation = storage
        .conversation_by_thread_id("t1")
        .await
        .expect("lookup")
        .expect("exists");
    assert!(conversation.last_extracted_message_at.is_none());
    assert!(conversation
        .last_extraction_error
        .as_deref()
        .expect("error recorded")
        .contains("500"));
    // The attempt is stamped with the newest message covered by the run.
    assert_eq!(
        conversation.last_extraction_attempted_at,
        Some(conversation.last_message_at)
    );
    assert!(storage
        .reservation_by_conversation(conversation.id)
        .await
        .expect("lookup")
        .is_none());

    provider.push_inbound(inbound(
        "m2",
        "t1",
        "alice@example.com",
        "2026-08-21T09:00:00Z",
        "Still there?",
    ));
    service.sync().await.expect("retry sync");

    assert_eq!(extractor.call_count(), 2);
    let conversation = storage
        .conversation_by_thread_id("t1")
        .await
        .expect("lookup")
        .expect("exists");
    assert!(conversation.last_extraction_error.is_none());
    assert!(conversation.last_extracted_message_at.is_some());
}

// The watermark survives mixed direction threads: an outbound reply counts
// as a new message and direction flips.
#[tokio::test]
async fn outbound_reply_flips_direction_and_reopens_extraction() {
    let (storage, provider, extractor, service) =
        service(vec![partial_extraction(), partial_extraction()]).await;
    provider.push_inbound(inbound(
        "m1",
        "t1",
        "alice@example.com",
        "2026-08-20T09:00:00Z",
        "Arriving Sep 12.",
    ));
    service.sync().await.expect("first sync");

    provider.push_sent(outbound("m2", "t1", "2026-08-20T11:00:00Z"));
    service.sync().await.expect("second sync");

    let conversation = storage
        .conversation_by_thread_id("t1")
        .await
        .expect("lookup")
        .expect("exists");
    assert_eq!(conversation.last_message_direction, Direction::Outbound);
    assert_eq!(extractor.call_count(), 2);

    let messages = storage
        .messages_for_conversation(conversation.id)
        .await
        .expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].provider_message_id, "m1");
    assert_eq!(messages[1].provider_message_id, "m2");
}

// Targeted refresh bypasses the watermark but still honors the
// completeness gate.
#[tokio::test]
async fn conversation_refresh_extracts_despite_current_watermark() {
    let (storage, provider, extractor, service) = service(vec![
        partial_extraction(),
        Ok(ExtractOutcome {
            data: Some(ExtractedReservation {
                departure_date: NaiveDate::from_ymd_opt(2026, 9, 15),
                ..ExtractedReservation::default()
            }),
            skipped: false,
            reason: None,
        }),
    ])
    .await;
    provider.push_inbound(inbound(
        "m1",
        "t1",
        "alice@example.com",
        "2026-08-20T09:00:00Z",
        "Arriving Sep 12.",
    ));
    service.sync().await.expect("bulk sync");
    assert_eq!(extractor.call_count(), 1);

    let report = service
        .sync_conversation("t1")
        .await
        .expect("targeted sync");
    assert_eq!(report.conversations, 1);
    assert_eq!(extractor.call_count(), 2);

    let conversation = storage
        .conversation_by_thread_id("t1")
        .await
        .expect("lookup")
        .expect("exists");
    let reservation = storage
        .reservation_by_conversation(conversation.id)
        .await
        .expect("lookup")
        .expect("exists");
    assert!(reservation.is_complete());
}

#[tokio::test]
async fn mark_read_propagates_provider_first() {
    let (storage, provider, _extractor, service) = service(vec![full_extraction()]).await;
    provider.push_inbound(inbound(
        "m1",
        "t1",
        "alice@example.com",
        "2026-08-20T09:00:00Z",
        "Hello",
    ));
    service.sync().await.expect("sync");

    service.mark_message_read("m1").await.expect("mark read");

    assert_eq!(
        provider.read_calls.lock().expect("lock").as_slice(),
        &["m1".to_string()]
    );
    let message = storage
        .message_by_provider_id("m1")
        .await
        .expect("lookup")
        .expect("exists");
    assert!(message.is_read);
}

#[tokio::test]
async fn viewed_stamp_is_set_once() {
    let (storage, provider, _extractor, service) = service(vec![full_extraction()]).await;
    provider.push_inbound(inbound(
        "m1",
        "t1",
        "alice@example.com",
        "2026-08-20T09:00:00Z",
        "Hello",
    ));
    service.sync().await.expect("sync");

    service
        .mark_conversation_viewed("t1")
        .await
        .expect("viewed");
    let first = storage
        .conversation_by_thread_id("t1")
        .await
        .expect("lookup")
        .expect("exists")
        .viewed_at
        .expect("stamped");

    service
        .mark_conversation_viewed("t1")
        .await
        .expect("viewed again");
    let second = storage
        .conversation_by_thread_id("t1")
        .await
        .expect("lookup")
        .expect("exists")
        .viewed_at
        .expect("still stamped");
    assert_eq!(first, second);
}
