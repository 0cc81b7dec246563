use crate::ExtractError;
use async_trait::async_trait;
use chrono::NaiveDate;
use innbox_core::{ExtractedReservation, StoredMessage};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// What one extraction call produced. `skipped` with a reason is a benign
/// completion, not a failure.
#[derive(Debug, Clone, Default)]
pub struct ExtractOutcome {
    pub data: Option<ExtractedReservation>,
    pub skipped: bool,
    pub reason: Option<String>,
}

/// The extraction seam. Implementations turn a rendered thread transcript
/// into a partial reservation record.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        email_content: &str,
        missing_fields: &[String],
    ) -> Result<ExtractOutcome, ExtractError>;
}

/// Renders a thread's stored messages into the transcript the extractor
/// consumes, oldest first.
pub fn email_content(messages: &[StoredMessage]) -> String {
    let mut content = String::new();
    for (index, message) in messages.iter().enumerate() {
        if index > 0 {
            content.push_str("\n---\n\n");
        }
        content.push_str(&format!(
            "Message {}:\nSubject: {}\nFrom: {} <{}>\nDate: {}\n\n{}\n",
            index + 1,
            message.subject,
            message.from_name.as_deref().unwrap_or(""),
            message.from_address,
            message.received_at.to_rfc3339(),
            message.body,
        ));
    }
    content
}

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    data: Option<WireReservation>,
    skipped: Option<bool>,
    reason: Option<String>,
    error: Option<String>,
    details: Option<String>,
}

/// The extractor's field shape. Dates arrive as strings and counts may be
/// junk; the conversion below is tolerant because a bad field must never
/// fail the whole extraction.
#[derive(Debug, Deserialize)]
struct WireReservation {
    arrival_date: Option<String>,
    departure_date: Option<String>,
    guest_name: Option<String>,
    guest_email: Option<String>,
    guest_phone: Option<String>,
    adult_count: Option<i64>,
    child_count: Option<i64>,
    room_count: Option<i64>,
    additional_info: Option<String>,
}

impl WireReservation {
    fn into_partial(self) -> ExtractedReservation {
        ExtractedReservation {
            arrival_date: self.arrival_date.as_deref().and_then(parse_date),
            departure_date: self.departure_date.as_deref().and_then(parse_date),
            guest_name: clean_text(self.guest_name),
            guest_email: clean_text(self.guest_email),
            guest_phone: clean_text(self.guest_phone),
            adult_count: self.adult_count.and_then(clean_count),
            child_count: self.child_count.and_then(clean_count),
            room_count: self.room_count.and_then(clean_count),
            additional_info: clean_text(self.additional_info),
        }
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn clean_text(raw: Option<String>) -> Option<String> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn clean_count(raw: i64) -> Option<u32> {
    u32::try_from(raw).ok()
}

/// Calls the external extraction service over HTTPS.
#[derive(Clone)]
pub struct HttpExtractor {
    http: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
}

impl HttpExtractor {
    pub fn new(endpoint: Option<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.filter(|value| !value.trim().is_empty()),
            api_key: api_key.filter(|value| !value.trim().is_empty()),
        }
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(
        &self,
        email_content: &str,
        missing_fields: &[String],
    ) -> Result<ExtractOutcome, ExtractError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| ExtractError::Unavailable("extractor endpoint not configured".into()))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ExtractError::Unavailable("extractor API key not configured".into()))?;

        let mut payload = json!({"emailContent": email_content});
        if !missing_fields.is_empty() {
            payload["missingFields"] = json!(missing_fields);
        }

        let response = self
            .http
            .post(endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::Remote(format!(
                "extractor returned {status}: {body}"
            )));
        }

        let envelope: WireEnvelope = response
            .json()
            .await
            .map_err(|err| ExtractError::Parse(err.to_string()))?;

        if let Some(error) = envelope.error {
            let details = envelope.details.unwrap_or_default();
            return Err(ExtractError::Remote(format!("{error} {details}")));
        }

        let outcome = ExtractOutcome {
            data: envelope.data.map(WireReservation::into_partial),
            skipped: envelope.skipped.unwrap_or(false),
            reason: envelope.reason,
        };
        debug!(
            skipped = outcome.skipped,
            has_data = outcome.data.is_some(),
            "extraction call completed"
        );
        Ok(outcome)
    }
}
