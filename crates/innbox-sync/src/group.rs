use chrono::{DateTime, Utc};
use innbox_core::Direction;
use innbox_graph::ProviderMessage;
use std::collections::{BTreeMap, BTreeSet};

/// All fetched messages for one provider thread, oldest first. Aggregates are
/// computed at grouping time so a bucket is never empty.
#[derive(Debug, Clone)]
pub struct ThreadBucket {
    pub thread_id: String,
    /// Subject of the earliest message; this is what names the conversation.
    pub subject: String,
    pub messages: Vec<ProviderMessage>,
    pub first_message_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    last_sender: String,
}

impl ThreadBucket {
    /// Who spoke last. A sender address containing the watched mailbox
    /// (case-insensitive) counts as us; everything else is the guest. This
    /// is a heuristic, but a wrong guess only mislabels the conversation
    /// list, it never affects reconciliation.
    pub fn direction(&self, mailbox: &str) -> Direction {
        if self
            .last_sender
            .to_lowercase()
            .contains(&mailbox.to_lowercase())
        {
            Direction::Outbound
        } else {
            Direction::Inbound
        }
    }

    /// Deduplicated sender and recipient addresses across the thread.
    pub fn participants(&self) -> Vec<String> {
        let mut addresses = BTreeSet::new();
        for message in &self.messages {
            addresses.insert(message.from_address.clone());
            for address in &message.to_addresses {
                addresses.insert(address.clone());
            }
        }
        addresses.into_iter().collect()
    }
}

/// Groups a mixed inbox/sent page by conversation id and sorts each thread
/// by effective timestamp, ascending. Pure function; the fetch order
/// (newest first) does not survive into the buckets.
pub fn group_by_thread(messages: Vec<ProviderMessage>) -> Vec<ThreadBucket> {
    let mut threads: BTreeMap<String, Vec<ProviderMessage>> = BTreeMap::new();
    for message in messages {
        threads
            .entry(message.thread_id.clone())
            .or_default()
            .push(message);
    }

    let mut buckets = Vec::with_capacity(threads.len());
    for (thread_id, mut messages) in threads {
        messages.sort_by(|a, b| a.effective_at.cmp(&b.effective_at));
        let (Some(first), Some(last)) = (messages.first(), messages.last()) else {
            continue;
        };
        buckets.push(ThreadBucket {
            thread_id,
            subject: first.subject.clone(),
            first_message_at: first.effective_at,
            last_message_at: last.effective_at,
            last_sender: last.from_address.clone(),
            messages,
        });
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use innbox_graph::parse_message;
    use serde_json::json;

    fn message(id: &str, thread: &str, from: &str, received: &str) -> ProviderMessage {
        parse_message(json!({
            "id": id,
            "conversationId": thread,
            "subject": format!("Subject of {id}"),
            "from": {"emailAddress": {"address": from}},
            "toRecipients": [{"emailAddress": {"address": "frontdesk@hotel.example"}}],
            "receivedDateTime": received,
        }))
        .expect("valid message")
    }

    #[test]
    fn threads_sort_ascending_regardless_of_fetch_order() {
        let buckets = group_by_thread(vec![
            message("m3", "t1", "alice@example.com", "2026-08-20T12:00:00Z"),
            message("m1", "t1", "alice@example.com", "2026-08-20T09:00:00Z"),
            message("m2", "t1", "frontdesk@hotel.example", "2026-08-20T10:00:00Z"),
        ]);
        assert_eq!(buckets.len(), 1);
        let bucket = &buckets[0];
        let ids: Vec<_> = bucket.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert_eq!(bucket.subject, "Subject of m1");
        assert_eq!(bucket.first_message_at, bucket.messages[0].effective_at);
        assert_eq!(bucket.last_message_at, bucket.messages[2].effective_at);
    }

    #[test]
    fn direction_follows_the_last_sender() {
        let inbound_last = group_by_thread(vec![
            message("m1", "t1", "Frontdesk@Hotel.example", "2026-08-20T09:00:00Z"),
            message("m2", "t1", "alice@example.com", "2026-08-20T10:00:00Z"),
        ]);
        assert_eq!(
            inbound_last[0].direction("frontdesk@hotel.example"),
            Direction::Inbound
        );

        let outbound_last = group_by_thread(vec![
            message("m1", "t1", "alice@example.com", "2026-08-20T09:00:00Z"),
            message("m2", "t1", "FRONTDESK@hotel.example", "2026-08-20T10:00:00Z"),
        ]);
        assert_eq!(
            outbound_last[0].direction("frontdesk@hotel.example"),
            Direction::Outbound
        );
    }

    #[test]
    fn separate_threads_stay_separate() {
        let buckets = group_by_thread(vec![
            message("m1", "t1", "alice@example.com", "2026-08-20T09:00:00Z"),
            message("m2", "t2", "bob@example.com", "2026-08-20T10:00:00Z"),
        ]);
        assert_eq!(buckets.len(), 2);
    }

    #[test]
    fn participants_are_deduplicated() {
        let buckets = group_by_thread(vec![
            message("m1", "t1", "alice@example.com", "2026-08-20T09:00:00Z"),
            message("m2", "t1", "alice@example.com", "2026-08-20T10:00:00Z"),
        ]);
        assert_eq!(
            buckets[0].participants(),
            vec!["alice@example.com", "frontdesk@hotel.example"]
        );
    }
}
