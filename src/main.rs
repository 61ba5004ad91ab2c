use std::sync::Arc;

use axum::http::Method;
use clap::Parser;
use tokio::{signal, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing;
use tracing_subscriber::EnvFilter;
use wifimap::config::{Cli, Config, default_config_dir, default_config_path};
use wifimap::db::Database;
use wifimap::handler::{AppState, routes};
use wifimap::map::route::MapboxDirections;
use wifimap::wifi::WifiFreeClient;

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    let _ = dotenvy::dotenv();

    // --config puts data (database, replica files) next to the config file,
    // otherwise both live under ~/.wifimap/
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = std::path::PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| std::path::PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("wifimap.svc starting");

    let cfg = Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });
    let db = Arc::new(Database::new(&cfg, &data_dir).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup database");
        std::process::exit(1);
    }));
    let wifi = Arc::new(
        WifiFreeClient::new(cfg.wifi.base_url.as_deref(), &cfg.wifi.api_key).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to setup wifi client");
            std::process::exit(1);
        }),
    );
    if !wifi.is_configured() {
        tracing::warn!("wifi api key is not configured, /wifi requests will fail");
    }
    let directions = Arc::new(
        MapboxDirections::new(cfg.map.directions_url.as_deref(), &cfg.map.access_token, &cfg.map.language)
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "failed to setup directions client");
                std::process::exit(1);
            }),
    );

    let address = format!("0.0.0.0:{}", cfg.app.get_port());
    let sync_interval = std::time::Duration::from_secs(cfg.app.sync_interval_seconds.max(1));
    let cfg = Arc::new(cfg);
    let cancellation_token = CancellationToken::new();
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);

    // Push local writes to the replica primary until shutdown.
    let sync_db = db.clone();
    let sync_token = cancellation_token.clone();
    let sync_done = shutdown_complete_tx.clone();
    tokio::spawn(async move {
        let _done = sync_done;
        let mut interval = tokio::time::interval(sync_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = sync_db.sync().await {
                        tracing::warn!("Failed to sync database: {}", e);
                    }
                }
                _ = sync_token.cancelled() => {
                    if let Err(e) = sync_db.sync().await {
                        tracing::warn!("Failed final database sync: {}", e);
                    }
                    tracing::info!("Database sync task shutting down");
                    break;
                }
            }
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let app = routes().layer(cors).with_state(AppState {
        db,
        wifi,
        directions,
        cfg,
    });

    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    tracing::info!("wifimap.svc running on {}", &address);
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "server exited with error");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
            cancellation_token.cancel();
        }
    }

    drop(shutdown_complete_tx);
    shutdown_complete_rx.recv().await;
    tracing::info!("wifimap.svc going off, graceful shutdown complete");
}
