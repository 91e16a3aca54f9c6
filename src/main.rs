mod config;
mod error;
mod handlers;
mod heartbeat;
mod phone;
mod responder;
mod types;
mod webhook;
mod whatsapp;

use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use config::Config;
use handlers::AppState;
use whatsapp::{CloudApiClient, Messenger};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a missing .env is fine
    let _ = dotenvy::dotenv();
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init_timed();

    let config = Config::from_env();

    let messenger: Option<Arc<dyn Messenger>> = match CloudApiClient::from_config(&config) {
        Ok(client) => {
            info!("WhatsApp client initialized");
            Some(Arc::new(client) as Arc<dyn Messenger>)
        }
        Err(e) => {
            warn!(
                "WhatsApp client not initialized ({}); outbound sends will fail",
                e
            );
            None
        }
    };
    if config.admin_phone.is_none() {
        warn!("ADMIN_PHONE not set; admin notifications are disabled");
    }

    let shutdown = CancellationToken::new();
    let heartbeat = heartbeat::spawn(config.heartbeat_interval, shutdown.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let state = Arc::new(AppState { config, messenger });
    let app = handlers::router(state);

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    let _ = heartbeat.await;
    info!("Server stopped");

    Ok(())
}
