//! Safe Companion - daemon entry point
//!
//! Reads push messages as JSON lines from stdin and routes them.
//! Config files: safe-companion.toml, safe-companion.yaml, safe-companion.json

use anyhow::{Context, Result};
use safe_companion::push::{
    FilePreferences, LoggingNotificationSink, PushServiceApi, StaticPushToken,
};
use safe_companion::wallet::HexKeyVault;
use safe_companion::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn, Level};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    let log_level = config.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::fmt()
        .with_max_level(parse_log_level(log_level))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("Starting Safe Companion v{}", VERSION);
    info!("  Push service: {}", config.push.service_url);
    info!("  Safe store: {}", config.store.path.display());

    for file in [&config.store.path, &config.store.preferences_path] {
        if let Some(dir) = file.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create store directory {}", dir.display()))?;
        }
    }
    let store: Arc<dyn SafeStore> = Arc::new(LocalSafeStore::open(&config.store.path)?);
    let router = Arc::new(PushRouter::new(store, Arc::new(LoggingNotificationSink)));

    let service = build_push_service(&config, router.clone())?;
    match &service {
        Some(service) => match service.sync_authentication(false).await {
            Ok(true) => info!("✅ Push authentication synced"),
            Ok(false) => debug!("Push authentication already up to date"),
            Err(e) => warn!("⚠️ Push authentication sync failed: {}", e),
        },
        None => info!("No device key configured, push service client disabled"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut handled = 0u64;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        error!("❌ Failed to read stdin: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let message: PushMessage = match serde_json::from_str(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("⚠️ Skipping malformed push message: {}", e);
                        continue;
                    }
                };
                debug!("📥 Push message {}", message.kind());

                match &service {
                    Some(service) => service.handle_push_message(message).await,
                    None => router.handle_push_message(message).await,
                }
                handled += 1;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    info!("Handled {} push messages", handled);
    Ok(())
}

fn load_config() -> Result<Config> {
    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("No config file found ({}), using defaults", e);
            Config::default()
        }
    };

    // Environment variables always override the file
    config.apply_env();
    config.validate()?;
    Ok(config)
}

/// Push service client, present only when a device key is configured
fn build_push_service(config: &Config, router: Arc<PushRouter>) -> Result<Option<PushService>> {
    let Some(pk) = config.pk.as_deref() else {
        return Ok(None);
    };

    let account = PrivateKeyWallet::from_private_key(pk)
        .map_err(|e| anyhow::anyhow!("Invalid device key: {}", e))?;
    info!("Device account: {}", account.address().to_checksum(None));

    let api: Arc<dyn PushServiceApi> = Arc::new(HttpPushServiceApi::new(
        &config.push.service_url,
        Duration::from_secs(config.push.request_timeout_secs),
    )?);
    let preferences = FilePreferences::open(&config.store.preferences_path)?;

    let mut service = PushService::new(api, Arc::new(account), router, config.client.clone())
        .with_key_vault(Arc::new(HexKeyVault))
        .with_preferences(Arc::new(preferences));
    match &config.push.token {
        Some(token) => {
            service = service.with_token_provider(Arc::new(StaticPushToken(token.clone())));
        }
        None => warn!("⚠️ No push token configured, authentication will not be synced"),
    }

    Ok(Some(service))
}

fn parse_log_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
