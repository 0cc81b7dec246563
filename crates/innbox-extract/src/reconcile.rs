use chrono::Utc;
use innbox_core::{ExtractedReservation, Reservation, ReservationStatus};
use uuid::Uuid;

/// Builds the first reservation record for a conversation from extracted
/// data. `inferred_email` is the first inbound sender, used only when the
/// extractor found no explicit contact address.
pub fn seed_reservation(
    conversation_id: Uuid,
    extracted: &ExtractedReservation,
    inferred_email: Option<&str>,
    extractor_version: &str,
) -> Reservation {
    let now = Utc::now();
    Reservation {
        id: Uuid::new_v4(),
        conversation_id,
        guest_name: extracted.guest_name.clone(),
        guest_email: extracted
            .guest_email
            .clone()
            .or_else(|| inferred_email.map(str::to_string)),
        guest_phone: extracted.guest_phone.clone(),
        arrival_date: extracted.arrival_date,
        departure_date: extracted.departure_date,
        adults: extracted.adult_count,
        children: extracted.child_count,
        room_selections: Vec::new(),
        rate_currency: "EUR".to_string(),
        rate_amount: 0.0,
        additional_info: extracted.additional_info.clone(),
        status: ReservationStatus::Pending,
        archived: false,
        last_email_sent_at: None,
        extractor_version: Some(extractor_version.to_string()),
        created_at: now,
        updated_at: now,
    }
}

/// Applies extracted data to an existing reservation, filling nulls only.
/// A field that already has a value is never overwritten, whoever put it
/// there. Returns whether anything changed.
pub fn merge_extracted(
    reservation: &mut Reservation,
    extracted: &ExtractedReservation,
    inferred_email: Option<&str>,
    extractor_version: &str,
) -> bool {
    let mut changed = false;

    changed |= fill(&mut reservation.guest_name, extracted.guest_name.clone());
    changed |= fill(
        &mut reservation.guest_email,
        extracted
            .guest_email
            .clone()
            .or_else(|| inferred_email.map(str::to_string)),
    );
    changed |= fill(&mut reservation.guest_phone, extracted.guest_phone.clone());
    changed |= fill(&mut reservation.arrival_date, extracted.arrival_date);
    changed |= fill(&mut reservation.departure_date, extracted.departure_date);
    changed |= fill(&mut reservation.adults, extracted.adult_count);
    changed |= fill(&mut reservation.children, extracted.child_count);
    changed |= fill(
        &mut reservation.additional_info,
        extracted.additional_info.clone(),
    );

    if changed {
        reservation.extractor_version = Some(extractor_version.to_string());
        reservation.updated_at = Utc::now();
    }
    changed
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) -> bool {
    if slot.is_none() && value.is_some() {
        *slot = value;
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn extracted(name: &str) -> ExtractedReservation {
        ExtractedReservation {
            guest_name: Some(name.to_string()),
            arrival_date: NaiveDate::from_ymd_opt(2026, 9, 12),
            adult_count: Some(2),
            ..ExtractedReservation::default()
        }
    }

    #[test]
    fn seed_uses_inferred_email_as_fallback() {
        let seeded = seed_reservation(
            Uuid::new_v4(),
            &extracted("Alice"),
            Some("alice@example.com"),
            "v1",
        );
        assert_eq!(seeded.guest_email.as_deref(), Some("alice@example.com"));
        assert_eq!(seeded.guest_name.as_deref(), Some("Alice"));
        assert_eq!(seeded.extractor_version.as_deref(), Some("v1"));
        assert!(!seeded.archived);
    }

    #[test]
    fn explicit_email_beats_inferred() {
        let mut data = extracted("Alice");
        data.guest_email = Some("alice.w@guestmail.example".to_string());
        let seeded = seed_reservation(Uuid::new_v4(), &data, Some("alice@example.com"), "v1");
        assert_eq!(
            seeded.guest_email.as_deref(),
            Some("alice.w@guestmail.example")
        );
    }

    #[test]
    fn merge_never_overwrites_existing_values() {
        let mut reservation =
            seed_reservation(Uuid::new_v4(), &extracted("Alice"), None, "v1");
        assert_eq!(reservation.guest_name.as_deref(), Some("Alice"));

        // Later extraction disagrees; the stored value must win.
        let changed = merge_extracted(&mut reservation, &extracted("Bob"), None, "v2");
        assert!(!changed);
        assert_eq!(reservation.guest_name.as_deref(), Some("Alice"));
        assert_eq!(reservation.extractor_version.as_deref(), Some("v1"));
    }

    #[test]
    fn merge_fills_only_missing_fields() {
        let mut reservation =
            seed_reservation(Uuid::new_v4(), &extracted("Alice"), None, "v1");
        assert!(reservation.departure_date.is_none());

        let update = ExtractedReservation {
            guest_name: Some("Bob".to_string()),
            departure_date: NaiveDate::from_ymd_opt(2026, 9, 15),
            child_count: Some(0),
            ..ExtractedReservation::default()
        };
        let changed = merge_extracted(&mut reservation, &update, None, "v2");
        assert!(changed);
        assert_eq!(reservation.guest_name.as_deref(), Some("Alice"));
        assert_eq!(
            reservation.departure_date,
            NaiveDate::from_ymd_opt(2026, 9, 15)
        );
        assert_eq!(reservation.children, Some(0));
        assert_eq!(reservation.extractor_version.as_deref(), Some("v2"));
    }

    #[test]
    fn empty_extraction_changes_nothing() {
        let mut reservation =
            seed_reservation(Uuid::new_v4(), &extracted("Alice"), None, "v1");
        let before = reservation.clone();
        let changed = merge_extracted(
            &mut reservation,
            &ExtractedReservation::default(),
            None,
            "v2",
        );
        assert!(!changed);
        assert_eq!(reservation.guest_name, before.guest_name);
        assert_eq!(reservation.updated_at, before.updated_at);
    }
}
