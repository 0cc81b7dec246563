use innbox_core::Reservation;

/// Whether an extraction call should happen at all, and if so which field
/// hints to pass along.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// The reservation already has everything a booking needs.
    SkipComplete,
    /// Run the extractor. Hints are empty on a first extraction.
    Run { missing_fields: Vec<String> },
}

pub fn evaluate_gate(reservation: Option<&Reservation>) -> GateDecision {
    match reservation {
        Some(reservation) if reservation.is_complete() => GateDecision::SkipComplete,
        Some(reservation) => GateDecision::Run {
            missing_fields: reservation
                .missing_fields()
                .into_iter()
                .map(str::to_string)
                .collect(),
        },
        None => GateDecision::Run {
            missing_fields: Vec::new(),
        },
    }
}
