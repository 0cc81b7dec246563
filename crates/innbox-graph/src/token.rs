use crate::GraphError;
use chrono::{Duration, Utc};
use innbox_core::MailboxToken;
use innbox_storage::Storage;
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, ClientSecret, RedirectUrl, RefreshToken, TokenResponse, TokenUrl};

const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub redirect_url: String,
}

impl OAuthSettings {
    pub fn authorize_endpoint(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/authorize",
            self.tenant_id
        )
    }

    pub fn token_endpoint(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.tenant_id
        )
    }
}

impl std::fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("tenant_id", &self.tenant_id)
            .field("redirect_url", &self.redirect_url)
            .finish()
    }
}

/// Hands out a usable access token for a mailbox, refreshing through the
/// token endpoint when the stored one has expired. Rotated credentials are
/// persisted before the token is returned, so a crash after refresh cannot
/// lose the new refresh token.
#[derive(Clone)]
pub struct TokenProvider {
    storage: Storage,
    oauth: OAuthSettings,
}

impl TokenProvider {
    pub fn new(storage: Storage, oauth: OAuthSettings) -> Self {
        Self { storage, oauth }
    }

    pub async fn access_token(&self, mailbox: &str) -> Result<String, GraphError> {
        let token = self
            .storage
            .token_for_mailbox(mailbox)
            .await?
            .ok_or_else(|| GraphError::NotAuthenticated(mailbox.to_string()))?;

        if !token.is_expired(Utc::now()) {
            return Ok(token.access_token);
        }

        let refreshed = self.refresh(&token).await?;
        self.storage.upsert_token(&refreshed).await?;
        Ok(refreshed.access_token)
    }

    async fn refresh(&self, token: &MailboxToken) -> Result<MailboxToken, GraphError> {
        let refresh_token = token.refresh_token.clone().ok_or_else(|| {
            GraphError::Auth("access token expired and no refresh token on file".to_string())
        })?;

        let client = ClientBuilder::build(&self.oauth)?;
        let http_client = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let response = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.clone()))
            .request_async(&http_client)
            .await
            .map_err(|err| GraphError::Auth(err.to_string()))?;

        let lifetime = response
            .expires_in()
            .map(|value| value.as_secs() as i64)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

        Ok(MailboxToken {
            mailbox: token.mailbox.clone(),
            access_token: response.access_token().secret().to_string(),
            // The endpoint may rotate the refresh token; keep the old one
            // when it does not.
            refresh_token: response
                .refresh_token()
                .map(|value| value.secret().to_string())
                .or(Some(refresh_token)),
            expires_at: Utc::now() + Duration::seconds(lifetime),
            updated_at: Utc::now(),
        })
    }
}

pub(crate) struct ClientBuilder;

impl ClientBuilder {
    /// The oauth2 client carries its endpoints in its type, so it is built
    /// fresh per call rather than stored.
    pub(crate) fn build(
        settings: &OAuthSettings,
    ) -> Result<
        BasicClient<
            oauth2::EndpointSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointSet,
        >,
        GraphError,
    > {
        Ok(
            BasicClient::new(ClientId::new(settings.client_id.clone()))
                .set_client_secret(ClientSecret::new(settings.client_secret.clone()))
                .set_auth_uri(AuthUrl::new(settings.authorize_endpoint())?)
                .set_token_uri(TokenUrl::new(settings.token_endpoint())?)
                .set_redirect_uri(RedirectUrl::new(settings.redirect_url.clone())?),
        )
    }
}
