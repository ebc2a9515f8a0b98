//! AzireVPN client
//!
//! Main entry point. Installs the global allocator and logging, wires the
//! session to the AzireVPN API and the platform tunnel service, and runs
//! a line-oriented shell in place of the client window.

mod shell;

use anyhow::{Context, Result};
use azire_network::{HttpClientConfig, HttpVpnApi};
use azire_vpn::{RingLogger, Session, Settings, platform_service};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Optional settings file location
const CONFIG_ENV: &str = "AZIREVPN_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("AzireVPN starting...");

    let settings = match std::env::var_os(CONFIG_ENV) {
        Some(path) => Settings::load(Path::new(&path))
            .with_context(|| format!("Failed to load settings from {:?}", path))?,
        None => Settings::default(),
    };
    std::fs::create_dir_all(&settings.user_dir)
        .with_context(|| format!("Failed to create {}", settings.user_dir.display()))?;

    // A fresh log every run
    let log = Arc::new(RingLogger::create(settings.log_file(), "GUI")?);

    let api = Arc::new(HttpVpnApi::new(
        settings.api_url()?,
        HttpClientConfig {
            timeout: settings.http_timeout(),
            ..HttpClientConfig::default()
        },
    ));
    let service = platform_service(settings.tunnel_program.as_deref());

    let (ui_tx, ui_rx) = crossbeam_channel::unbounded();
    let session = Arc::new(Session::new(settings, api, service, log, ui_tx));

    session.start_background();
    session.load_token().await;

    // The shell is usable while the list loads
    let loader = {
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = session.load_servers().await {
                debug!("Server list unavailable: {}", e);
            }
        })
    };

    shell::run(session.clone(), ui_rx).await;

    session.shutdown().await;
    loader.abort();

    info!("AzireVPN shutting down");
    Ok(())
}
