use crate::token::ClientBuilder;
use crate::{GraphError, OAuthSettings};
use chrono::{Duration, Utc};
use innbox_core::MailboxToken;
use innbox_storage::Storage;
use oauth2::{AuthorizationCode, CsrfToken, Scope, TokenResponse};
use serde::Deserialize;
use tracing::info;

const DEFAULT_SCOPES: &[&str] = &[
    "https://graph.microsoft.com/Mail.Read",
    "https://graph.microsoft.com/Mail.ReadWrite",
    "https://graph.microsoft.com/Mail.Send",
    "https://graph.microsoft.com/User.Read",
    "offline_access",
];

#[derive(Clone)]
pub struct AuthSession {
    pub authorization_url: String,
    pub csrf_state: String,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("authorization_url", &self.authorization_url)
            .field("csrf_state", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserProfile {
    mail: Option<String>,
    user_principal_name: Option<String>,
}

/// Interactive mailbox authorization: build the consent URL, then exchange
/// the returned code and persist credentials under the mailbox the account
/// actually resolves to.
#[derive(Clone)]
pub struct AuthFlow {
    storage: Storage,
    oauth: OAuthSettings,
    graph_base_url: String,
    http: reqwest::Client,
}

impl AuthFlow {
    pub fn new(storage: Storage, oauth: OAuthSettings, graph_base_url: String) -> Self {
        Self {
            storage,
            oauth,
            graph_base_url,
            http: reqwest::Client::new(),
        }
    }

    /// Builds the authorization URL. `login_hint` pre-selects the mailbox on
    /// the consent screen.
    pub fn begin_session(&self, login_hint: &str) -> Result<AuthSession, GraphError> {
        let client = ClientBuilder::build(&self.oauth)?;

        let mut request = client
            .authorize_url(CsrfToken::new_random)
            .add_extra_param("prompt", "select_account");
        if !login_hint.is_empty() {
            request = request.add_extra_param("login_hint", login_hint);
        }
        for scope in DEFAULT_SCOPES {
            request = request.add_scope(Scope::new(scope.to_string()));
        }

        let (authorization_url, csrf_state) = request.url();

        Ok(AuthSession {
            authorization_url: authorization_url.to_string(),
            csrf_state: csrf_state.secret().to_string(),
        })
    }

    /// Exchanges the callback code for tokens. The mailbox the tokens are
    /// stored under comes from the account's own profile, not from what the
    /// operator typed; `fallback_mailbox` is only used when the profile
    /// carries no address.
    pub async fn complete(
        &self,
        code: &str,
        fallback_mailbox: &str,
    ) -> Result<MailboxToken, GraphError> {
        let client = ClientBuilder::build(&self.oauth)?;
        let http_client = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&http_client)
            .await
            .map_err(|err| GraphError::Auth(err.to_string()))?;

        let lifetime = response
            .expires_in()
            .map(|value| value.as_secs() as i64)
            .unwrap_or(3600);

        let mailbox = match self
            .resolve_mailbox(response.access_token().secret())
            .await
        {
            Ok(Some(address)) => address,
            Ok(None) => fallback_mailbox.to_string(),
            Err(err) => {
                tracing::warn!(error = %err, "profile lookup failed, using fallback mailbox");
                fallback_mailbox.to_string()
            }
        };

        let token = MailboxToken {
            mailbox: mailbox.clone(),
            access_token: response.access_token().secret().to_string(),
            refresh_token: response
                .refresh_token()
                .map(|value| value.secret().to_string()),
            expires_at: Utc::now() + Duration::seconds(lifetime),
            updated_at: Utc::now(),
        };
        self.storage.upsert_token(&token).await?;

        info!(mailbox = %mailbox, "mailbox authorized");
        Ok(token)
    }

    async fn resolve_mailbox(&self, access_token: &str) -> Result<Option<String>, GraphError> {
        let response = self
            .http
            .get(format!("{}/me", self.graph_base_url))
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GraphError::Fetch { status, body });
        }

        let profile: UserProfile = response
            .json()
            .await
            .map_err(|err| GraphError::Payload(format!("profile does not match schema: {err}")))?;

        Ok(profile
            .mail
            .or(profile.user_principal_name)
            .filter(|address| !address.is_empty()))
    }
}
