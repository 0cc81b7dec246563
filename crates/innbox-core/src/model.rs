use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(format!("unknown direction `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    #[default]
    Normal,
    High,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Low => "low",
            Importance::Normal => "normal",
            Importance::High => "high",
        }
    }

    /// Provider importance strings outside the known set collapse to `Normal`.
    pub fn parse_lenient(value: &str) -> Self {
        match value {
            "low" => Importance::Low,
            "high" => Importance::High,
            _ => Importance::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    #[default]
    Pending,
    Quoted,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Quoted => "quoted",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(ReservationStatus::Pending),
            "quoted" => Ok(ReservationStatus::Quoted),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            other => Err(format!("unknown reservation status `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Pending,
    Sending,
    Sent,
    Failed,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Pending => "pending",
            DraftStatus::Sending => "sending",
            DraftStatus::Sent => "sent",
            DraftStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DraftStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(DraftStatus::Pending),
            "sending" => Ok(DraftStatus::Sending),
            "sent" => Ok(DraftStatus::Sent),
            "failed" => Ok(DraftStatus::Failed),
            other => Err(format!("unknown draft status `{other}`")),
        }
    }
}

/// One provider thread, keyed by the provider's conversation id.
///
/// `last_extracted_message_at` is the extraction watermark: the newest message
/// timestamp that a successful extraction run has covered. It only ever moves
/// forward. `last_extraction_attempted_at` moves on every completed attempt,
/// successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub thread_id: String,
    pub subject: String,
    pub participants: Vec<String>,
    pub first_message_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub last_message_direction: Direction,
    pub viewed_at: Option<DateTime<Utc>>,
    pub last_extracted_message_at: Option<DateTime<Utc>>,
    pub last_extraction_attempted_at: Option<DateTime<Utc>>,
    pub last_extraction_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Whether the newest message is strictly newer than the extraction
    /// watermark. A never-extracted conversation always qualifies.
    pub fn has_unextracted_messages(&self) -> bool {
        match self.last_extracted_message_at {
            Some(watermark) => self.last_message_at > watermark,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub provider_message_id: String,
    pub subject: String,
    pub from_name: Option<String>,
    pub from_address: String,
    pub to_addresses: Vec<String>,
    pub preview: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    pub has_attachments: bool,
    pub importance: Importance,
    pub raw: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSelection {
    pub code: String,
    pub name: String,
    pub quantity: u32,
    pub nightly_rate: f64,
}

/// Structured reservation data for one conversation (at most one per thread).
///
/// Guest-provided fields stay `None` until either staff fill them in or an
/// extraction run does. `adults`/`children` are nullable on purpose so that
/// "not stated" is distinguishable from an explicit zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub arrival_date: Option<NaiveDate>,
    pub departure_date: Option<NaiveDate>,
    pub adults: Option<u32>,
    pub children: Option<u32>,
    pub room_selections: Vec<RoomSelection>,
    pub rate_currency: String,
    pub rate_amount: f64,
    pub additional_info: Option<String>,
    pub status: ReservationStatus,
    pub archived: bool,
    pub last_email_sent_at: Option<DateTime<Utc>>,
    pub extractor_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Complete means every field a booking actually needs is present:
    /// both stay dates, guest name and email, and both occupancy counts.
    pub fn is_complete(&self) -> bool {
        self.arrival_date.is_some()
            && self.departure_date.is_some()
            && self.guest_name.is_some()
            && self.guest_email.is_some()
            && self.adults.is_some()
            && self.children.is_some()
    }

    /// Machine-facing field names handed to the extractor as hints. Includes
    /// `additional_info` even though it is not part of [`is_complete`]; it
    /// only biases the extractor toward filling it.
    ///
    /// [`is_complete`]: Reservation::is_complete
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.arrival_date.is_none() {
            missing.push("arrival_date");
        }
        if self.departure_date.is_none() {
            missing.push("departure_date");
        }
        if self.guest_name.is_none() {
            missing.push("guest_name");
        }
        if self.guest_email.is_none() {
            missing.push("guest_email");
        }
        if self.adults.is_none() {
            missing.push("adult_count");
        }
        if self.children.is_none() {
            missing.push("child_count");
        }
        if self.additional_info.is_none() {
            missing.push("additional_info");
        }
        missing
    }

    /// Human-facing labels for the details a guest still needs to provide,
    /// used when rendering follow-up emails.
    pub fn missing_guest_details(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.arrival_date.is_none() {
            missing.push("Check-in date");
        }
        if self.departure_date.is_none() {
            missing.push("Check-out date");
        }
        if self.guest_name.is_none() {
            missing.push("Guest name");
        }
        if self.guest_email.is_none() {
            missing.push("Contact email");
        }
        missing
    }
}

/// The partial record an extraction run produces. Every field is optional;
/// the reconciler decides what, if anything, to apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedReservation {
    pub arrival_date: Option<NaiveDate>,
    pub departure_date: Option<NaiveDate>,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub adult_count: Option<u32>,
    pub child_count: Option<u32>,
    pub room_count: Option<u32>,
    pub additional_info: Option<String>,
}

impl ExtractedReservation {
    pub fn is_empty(&self) -> bool {
        self.arrival_date.is_none()
            && self.departure_date.is_none()
            && self.guest_name.is_none()
            && self.guest_email.is_none()
            && self.guest_phone.is_none()
            && self.adult_count.is_none()
            && self.child_count.is_none()
            && self.room_count.is_none()
            && self.additional_info.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailDraft {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub conversation_id: Uuid,
    pub template_id: Option<Uuid>,
    pub to_recipients: Vec<String>,
    pub cc_recipients: Vec<String>,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub status: DraftStatus,
    pub error: Option<String>,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// OAuth credentials for one mailbox. One row per mailbox address.
#[derive(Clone, Serialize, Deserialize)]
pub struct MailboxToken {
    pub mailbox: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MailboxToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl std::fmt::Debug for MailboxToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxToken")
            .field("mailbox", &self.mailbox)
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: Uuid,
    pub name: String,
    pub subject_template: String,
    pub body_template: Option<String>,
    pub html_body_template: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateAttachment {
    pub id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// A named bundle of room selections staff can propose for a reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomProposal {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub name: String,
    pub rooms: Vec<RoomSelection>,
    pub display_order: i64,
}
