use appium_hub::client::BackendClient;
use appium_hub::config::Config;
use appium_hub::gateway::{Gateway, PKG_NAME, VERSION};
use appium_hub::pool::SessionPool;
use appium_hub::reaper::HealthReaper;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("appium_hub=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration; a missing default file means "run with defaults"
    let config_arg = std::env::args().nth(1).map(PathBuf::from);
    let config = match &config_arg {
        Some(path) => Config::load(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to load configuration");
            e
        })?,
        None => {
            let default_path = PathBuf::from("config.toml");
            if default_path.exists() {
                Config::load(&default_path)?
            } else {
                Config::default()
            }
        }
    };

    print_startup_banner(&config);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Shared backend HTTP client and session pool
    let client = Arc::new(BackendClient::new());
    let pool = SessionPool::new(
        config.pool.clone(),
        config.backend.clone(),
        Arc::clone(&client),
    )?;

    // Spawn the session reaper
    let reaper = HealthReaper::new(
        Arc::clone(&pool),
        config.pool.reap_interval(),
        shutdown_rx.clone(),
    );
    tokio::spawn(reaper.run());

    // Spawn the gateway
    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    let gateway = Gateway::new(
        bind_addr,
        Arc::clone(&pool),
        client,
        config.backend.clone(),
        shutdown_rx.clone(),
    );

    let gateway_handle = tokio::spawn(async move {
        if let Err(e) = gateway.run().await {
            error!(error = %e, "Gateway error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown and tear down every session
    let _ = shutdown_tx.send(true);

    info!("Shutting down all sessions...");
    pool.shutdown_all().await;

    let _ = tokio::time::timeout(Duration::from_secs(5), gateway_handle).await;

    info!("Shutdown complete");
    Ok(())
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting Appium Gateway Hub");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        "Server configuration"
    );
    info!(
        port_range_start = config.pool.port_range_start,
        port_range_end = config.pool.port_range_end,
        max_sessions = config.pool.max_sessions,
        idle_timeout_secs = config.pool.idle_timeout_secs,
        max_lifetime_secs = config.pool.max_lifetime_secs,
        reap_interval_secs = config.pool.reap_interval_secs,
        log_dir = %config.pool.log_dir,
        "Session pool configuration"
    );
    info!(
        command = %config.backend.command,
        status_path = %config.backend.status_path,
        startup_timeout_secs = config.backend.startup_timeout_secs,
        proxy_timeout_secs = config.backend.proxy_timeout_secs,
        shutdown_grace_secs = config.backend.shutdown_grace_secs,
        "Backend configuration"
    );
}
