// monitor: Ingests RFID detections from the gateway over SSE and WebSocket,
// and reconciles them against the operator's case list.
//
// Runtime: loads config, opens the key-value store, builds the Monitor,
// serves the localhost control API, and tears the connection down on
// Ctrl-C / SIGTERM.

use clap::{Arg, ArgAction, Command};
use monitor::config::DEFAULT_CONFIG_PATH;
use monitor::control_api::build_router;
use monitor::{KvStore, Monitor, SqliteStore, load_config_from_path};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "monitor starting");

    // Process-wide TLS provider for wss:// and https:// upstreams.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let matches = Command::new("RFID Reconcile: Monitor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Ingests RFID reads and reconciles them against expected cases")
        .arg(
            Arg::new("config")
                .help("Path to the TOML config file")
                .long("config")
                .value_name("path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("reader_id")
                .help("Reader to subscribe to; overrides `reader_id` in the config")
                .long("reader-id")
                .value_name("id"),
        )
        .arg(
            Arg::new("connect")
                .help("Connect on startup regardless of `auto_connect`")
                .long("connect")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);
    let mut cfg = match load_config_from_path(Path::new(config_path)) {
        Ok(cfg) => {
            info!(
                base_url = %cfg.upstream.base_url,
                bind = %cfg.control.bind,
                "config loaded"
            );
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(reader_id) = matches.get_one::<String>("reader_id") {
        cfg.reader_id = Some(reader_id.clone());
    }
    let auto_connect = cfg.auto_connect || matches.get_flag("connect");

    let store = match SqliteStore::open(Path::new(&cfg.store.sqlite_path)) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("FATAL: failed to open store: {}", e);
            std::process::exit(1);
        }
    };
    match store.integrity_check() {
        Ok(true) => info!(path = %cfg.store.sqlite_path, "store opened"),
        Ok(false) => {
            eprintln!("FATAL: store integrity_check failed");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("FATAL: store integrity_check failed: {}", e);
            std::process::exit(1);
        }
    }
    let store: Arc<dyn KvStore> = Arc::new(store);

    let bind = cfg.control.bind.clone();
    let monitor = match Monitor::new(cfg, store) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            eprintln!("FATAL: failed to start monitor: {}", e);
            std::process::exit(1);
        }
    };
    let _connection_events = monitor.forward_connection_changes();

    if auto_connect {
        monitor.connect(None);
    }

    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("FATAL: failed to bind control API on {}: {}", bind, e);
            std::process::exit(1);
        }
    };
    info!(addr = %bind, "control API listening");

    let router = build_router(Arc::clone(&monitor));
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "control API server failed");
    }

    monitor.disconnect();
    info!("monitor shutdown complete");
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("shutdown: SIGINT received"),
                    _ = sigterm.recv() => info!("shutdown: SIGTERM received"),
                }
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown: Ctrl-C received");
    }
}
