use anyhow::Context;
use innbox_config::ConfigManager;
use innbox_extract::{DraftGenerator, HttpExtractor};
use innbox_graph::{AuthFlow, GraphClient, OAuthSettings, TokenProvider};
use innbox_storage::Storage;
use innbox_sync::{SyncService, SyncSettings};
use std::io::{BufRead, Write as _};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("innbox=info")),
        )
        .init();

    let manager = ConfigManager::new().context("locating config directory")?;
    let config = manager.load().context("reading config.toml")?;
    config
        .validate()
        .with_context(|| format!("invalid config at {}", manager.config_path().display()))?;

    let db_path = manager.data_dir().join(&config.database.file_name);
    let storage = Storage::connect(&db_path)
        .await
        .with_context(|| format!("opening database at {}", db_path.display()))?;

    let oauth = OAuthSettings {
        client_id: config.graph.client_id.clone(),
        client_secret: config.graph.client_secret.clone(),
        tenant_id: config.graph.tenant_id.clone(),
        redirect_url: config.graph.redirect_url.clone(),
    };

    if std::env::args().nth(1).as_deref() == Some("auth") {
        return authorize(storage, oauth, &config.graph.base_url, &config.mailbox.address).await;
    }

    let tokens = TokenProvider::new(storage.clone(), oauth);
    let provider = Arc::new(GraphClient::new(config.graph.base_url.clone(), tokens));
    let extractor = Arc::new(HttpExtractor::new(
        config.extractor.endpoint.clone(),
        config.extractor.api_key.clone(),
    ));
    let drafts = DraftGenerator::new(
        storage.clone(),
        config.mailbox.address.clone(),
        config.drafts.missing_details_template_id,
    );
    let service = SyncService::new(
        storage,
        provider,
        extractor,
        drafts,
        SyncSettings {
            mailbox: config.mailbox.address.clone(),
            page_size: config.sync.page_size,
            extract_timeout_secs: config.extractor.timeout_secs,
            extractor_version: config.extractor.version_tag.clone(),
        },
    );

    info!(mailbox = %config.mailbox.address, "starting sync loop");
    let mut ticker = tokio::time::interval(Duration::from_secs(config.sync.poll_interval_secs));
    loop {
        ticker.tick().await;
        match service.sync().await {
            Ok(report) => info!(
                conversations = report.conversations,
                failed_threads = report.failed_threads,
                "sync pass finished"
            ),
            Err(err) => error!(error = %err, "sync pass failed"),
        }
    }
}

/// One-time interactive consent: prints the authorization URL and reads the
/// redirected `code` parameter from stdin.
async fn authorize(
    storage: Storage,
    oauth: OAuthSettings,
    graph_base_url: &str,
    mailbox: &str,
) -> anyhow::Result<()> {
    let flow = AuthFlow::new(storage, oauth, graph_base_url.to_string());
    let session = flow.begin_session(mailbox)?;

    println!("Open this URL in a browser and sign in as {mailbox}:");
    println!("\n{}\n", session.authorization_url);
    print!("Paste the `code` query parameter from the redirect: ");
    std::io::stdout().flush()?;

    let mut code = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut code)
        .context("reading authorization code")?;

    let token = flow.complete(code.trim(), mailbox).await?;
    println!("Authorized {}.", token.mailbox);
    Ok(())
}
