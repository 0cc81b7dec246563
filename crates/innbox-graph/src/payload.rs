use crate::GraphError;
use chrono::{DateTime, Utc};
use innbox_core::Importance;
use serde::Deserialize;

/// One provider message after the boundary parse. The original JSON rides
/// along in `raw` so nothing the provider sent is lost.
#[derive(Debug, Clone)]
pub struct ProviderMessage {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from_name: Option<String>,
    pub from_address: String,
    pub to_addresses: Vec<String>,
    pub preview: String,
    pub body: String,
    pub received_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    /// `received_at` when present, otherwise `sent_at`. Always populated.
    pub effective_at: DateTime<Utc>,
    pub is_read: bool,
    pub has_attachments: bool,
    pub importance: Importance,
    pub raw: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: Option<String>,
    conversation_id: Option<String>,
    subject: Option<String>,
    from: Option<RawRecipient>,
    to_recipients: Option<Vec<RawRecipient>>,
    body_preview: Option<String>,
    body: Option<RawBody>,
    received_date_time: Option<DateTime<Utc>>,
    sent_date_time: Option<DateTime<Utc>>,
    is_read: Option<bool>,
    has_attachments: Option<bool>,
    importance: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecipient {
    email_address: Option<RawAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAddress {
    name: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBody {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawListing {
    value: Option<Vec<serde_json::Value>>,
}

/// Parses one provider message, failing fast on structural problems instead
/// of letting placeholder values leak into business logic. Required: id,
/// conversation id, sender address, and at least one timestamp. Cosmetic
/// fields get defaults.
pub fn parse_message(raw: serde_json::Value) -> Result<ProviderMessage, GraphError> {
    let parsed: RawMessage = serde_json::from_value(raw.clone())
        .map_err(|err| GraphError::Payload(format!("message does not match schema: {err}")))?;

    let id = parsed
        .id
        .filter(|value| !value.is_empty())
        .ok_or_else(|| GraphError::Payload("message without id".to_string()))?;
    let thread_id = parsed
        .conversation_id
        .filter(|value| !value.is_empty())
        .ok_or_else(|| GraphError::Payload(format!("message `{id}` without conversationId")))?;

    let (from_name, from_address) = match parsed.from.and_then(|from| from.email_address) {
        Some(address) => {
            let parsed_address = address
                .address
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    GraphError::Payload(format!("message `{id}` without sender address"))
                })?;
            (address.name, parsed_address)
        }
        None => {
            return Err(GraphError::Payload(format!(
                "message `{id}` without sender"
            )))
        }
    };

    let effective_at = parsed
        .received_date_time
        .or(parsed.sent_date_time)
        .ok_or_else(|| GraphError::Payload(format!("message `{id}` without timestamp")))?;

    let to_addresses = parsed
        .to_recipients
        .unwrap_or_default()
        .into_iter()
        .filter_map(|recipient| recipient.email_address.and_then(|address| address.address))
        .filter(|address| !address.is_empty())
        .collect();

    Ok(ProviderMessage {
        id,
        thread_id,
        subject: parsed
            .subject
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "(No Subject)".to_string()),
        from_name,
        from_address,
        to_addresses,
        preview: parsed.body_preview.unwrap_or_default(),
        body: parsed.body.and_then(|body| body.content).unwrap_or_default(),
        received_at: parsed.received_date_time,
        sent_at: parsed.sent_date_time,
        effective_at,
        is_read: parsed.is_read.unwrap_or(false),
        has_attachments: parsed.has_attachments.unwrap_or(false),
        importance: parsed
            .importance
            .as_deref()
            .map(Importance::parse_lenient)
            .unwrap_or_default(),
        raw,
    })
}

/// Parses a Graph listing envelope (`{"value": [...]}`). One malformed
/// message fails the whole page.
pub fn parse_listing(body: serde_json::Value) -> Result<Vec<ProviderMessage>, GraphError> {
    let listing: RawListing = serde_json::from_value(body)
        .map_err(|err| GraphError::Payload(format!("listing does not match schema: {err}")))?;

    listing
        .value
        .unwrap_or_default()
        .into_iter()
        .map(parse_message)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_message() -> serde_json::Value {
        json!({
            "id": "AAMk-1",
            "conversationId": "AAQk-1",
            "subject": "Booking enquiry",
            "from": {"emailAddress": {"name": "Alice Wong", "address": "alice@example.com"}},
            "toRecipients": [
                {"emailAddress": {"address": "frontdesk@hotel.example"}}
            ],
            "bodyPreview": "Hello",
            "body": {"contentType": "text", "content": "Hello, do you have a room?"},
            "receivedDateTime": "2026-08-20T09:15:00Z",
            "sentDateTime": "2026-08-20T09:14:45Z",
            "isRead": false,
            "hasAttachments": true,
            "importance": "high"
        })
    }

    #[test]
    fn parses_a_complete_message() {
        let message = parse_message(full_message()).expect("parsed");
        assert_eq!(message.id, "AAMk-1");
        assert_eq!(message.thread_id, "AAQk-1");
        assert_eq!(message.from_address, "alice@example.com");
        assert_eq!(message.from_name.as_deref(), Some("Alice Wong"));
        assert_eq!(message.to_addresses, vec!["frontdesk@hotel.example"]);
        assert_eq!(message.importance, Importance::High);
        assert!(message.has_attachments);
        assert_eq!(
            message.effective_at,
            message.received_at.expect("received")
        );
        assert_eq!(message.raw["subject"], "Booking enquiry");
    }

    #[test]
    fn falls_back_to_sent_timestamp() {
        let mut raw = full_message();
        raw["receivedDateTime"] = serde_json::Value::Null;
        let message = parse_message(raw).expect("parsed");
        assert_eq!(message.effective_at, message.sent_at.expect("sent"));
    }

    #[test]
    fn defaults_cosmetic_fields() {
        let raw = json!({
            "id": "AAMk-2",
            "conversationId": "AAQk-1",
            "from": {"emailAddress": {"address": "alice@example.com"}},
            "sentDateTime": "2026-08-20T09:14:45Z"
        });
        let message = parse_message(raw).expect("parsed");
        assert_eq!(message.subject, "(No Subject)");
        assert_eq!(message.preview, "");
        assert_eq!(message.body, "");
        assert_eq!(message.importance, Importance::Normal);
        assert!(!message.is_read);
    }

    #[test]
    fn rejects_message_without_thread_id() {
        let mut raw = full_message();
        raw["conversationId"] = serde_json::Value::Null;
        let err = parse_message(raw).expect_err("must fail");
        assert!(matches!(err, GraphError::Payload(_)));
    }

    #[test]
    fn rejects_message_without_sender() {
        let mut raw = full_message();
        raw["from"] = serde_json::Value::Null;
        assert!(parse_message(raw).is_err());
    }

    #[test]
    fn rejects_message_without_any_timestamp() {
        let mut raw = full_message();
        raw["receivedDateTime"] = serde_json::Value::Null;
        raw["sentDateTime"] = serde_json::Value::Null;
        assert!(parse_message(raw).is_err());
    }

    #[test]
    fn listing_parse_fails_on_one_bad_entry() {
        let body = json!({"value": [full_message(), {"id": "broken"}]});
        assert!(parse_listing(body).is_err());

        let good = json!({"value": [full_message()]});
        assert_eq!(parse_listing(good).expect("parsed").len(), 1);
    }
}
