mod auth;
mod client;
mod error;
mod payload;
mod token;

pub use auth::{AuthFlow, AuthSession};
pub use client::{
    FetchedMail, FileAttachment, GraphClient, MailProvider, OutgoingMail, ReplyPatch,
};
pub use error::GraphError;
pub use payload::{parse_listing, parse_message, ProviderMessage};
pub use token::{OAuthSettings, TokenProvider};
