use crate::ExtractError;
use innbox_core::Reservation;
use regex::Regex;

const NOT_PROVIDED: &str = "Not provided";

/// Substitutes `{{placeholder}}` tokens with reservation data. Unknown
/// placeholders render as empty strings so a typo in a template never leaks
/// braces into a guest email.
pub fn render_template(template: &str, reservation: &Reservation) -> Result<String, ExtractError> {
    let pattern =
        Regex::new(r"\{\{(\w+)\}\}").map_err(|err| ExtractError::Parse(err.to_string()))?;

    let rendered = pattern.replace_all(template, |caps: &regex::Captures<'_>| {
        match caps.get(1).map(|name| name.as_str()) {
            Some("guest_name") => guest_name(reservation),
            Some("guest_email") => reservation
                .guest_email
                .clone()
                .unwrap_or_else(|| NOT_PROVIDED.to_string()),
            Some("arrival_date") => reservation
                .arrival_date
                .map(|date| date.to_string())
                .unwrap_or_else(|| NOT_PROVIDED.to_string()),
            Some("departure_date") => reservation
                .departure_date
                .map(|date| date.to_string())
                .unwrap_or_else(|| NOT_PROVIDED.to_string()),
            Some("adult_count") => reservation
                .adults
                .map(|count| count.to_string())
                .unwrap_or_else(|| NOT_PROVIDED.to_string()),
            Some("child_count") => reservation
                .children
                .map(|count| count.to_string())
                .unwrap_or_else(|| NOT_PROVIDED.to_string()),
            Some("missing_fields_list") => missing_fields_list(reservation),
            _ => String::new(),
        }
    });

    Ok(rendered.into_owned())
}

/// Name, then the email's local part, then a generic salutation.
fn guest_name(reservation: &Reservation) -> String {
    if let Some(name) = &reservation.guest_name {
        return name.clone();
    }
    if let Some(email) = &reservation.guest_email {
        if let Some((local, _)) = email.split_once('@') {
            if !local.is_empty() {
                return local.to_string();
            }
        }
    }
    "Guest".to_string()
}

fn missing_fields_list(reservation: &Reservation) -> String {
    let missing = reservation.missing_guest_details();
    if missing.is_empty() {
        return "N/A".to_string();
    }
    missing
        .iter()
        .map(|label| format!("- {label}"))
        .collect::<Vec<_>>()
        .join("\n")
}
