mod client;
mod draft;
mod error;
mod gate;
mod reconcile;
mod template;

pub use client::{email_content, ExtractOutcome, Extractor, HttpExtractor};
pub use draft::DraftGenerator;
pub use error::ExtractError;
pub use gate::{evaluate_gate, GateDecision};
pub use reconcile::{merge_extracted, seed_reservation};
pub use template::render_template;
