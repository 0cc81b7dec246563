use crate::ConfigError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub version: u32,
    pub mailbox: MailboxConfig,
    pub graph: GraphConfig,
    pub extractor: ExtractorConfig,
    pub drafts: DraftConfig,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
}

/// The shared mailbox this deployment watches, e.g. `frontdesk@hotel.example`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub base_url: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub version_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftConfig {
    /// Template used for missing-details follow-ups. When unset (or the
    /// template is inactive) a built-in plain-text fallback is used instead.
    pub missing_details_template_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub poll_interval_secs: u64,
    pub page_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            mailbox: MailboxConfig {
                address: String::new(),
            },
            graph: GraphConfig {
                client_id: String::new(),
                client_secret: String::new(),
                tenant_id: "common".to_string(),
                base_url: "https://graph.microsoft.com/v1.0".to_string(),
                redirect_url: "http://localhost:8765/oauth/callback".to_string(),
            },
            extractor: ExtractorConfig {
                endpoint: None,
                api_key: None,
                timeout_secs: 45,
                version_tag: "v1".to_string(),
            },
            drafts: DraftConfig {
                missing_details_template_id: None,
            },
            database: DatabaseConfig {
                file_name: "innbox.db".to_string(),
            },
            sync: SyncConfig {
                poll_interval_secs: 120,
                page_size: 50,
            },
        }
    }
}

impl AppConfig {
    /// Rejects configurations that cannot possibly sync. A missing extractor
    /// endpoint is deliberately not fatal here: sync still works and the
    /// extraction step records per-conversation unavailability instead.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox.address.trim().is_empty() {
            return Err(ConfigError::Missing("mailbox.address"));
        }
        if self.graph.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("graph.client_id"));
        }
        if self.graph.client_secret.trim().is_empty() {
            return Err(ConfigError::Missing("graph.client_secret"));
        }
        if self.graph.tenant_id.trim().is_empty() {
            return Err(ConfigError::Missing("graph.tenant_id"));
        }
        if self.graph.base_url.trim().is_empty() {
            return Err(ConfigError::Missing("graph.base_url"));
        }
        Ok(())
    }
}
