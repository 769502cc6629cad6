mod auth;
mod chat;
mod config;
mod error;
mod presence;
mod rooms;
mod routes;
mod state;
mod store;
mod ws;

use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;

use config::{generate_config_template, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "duet_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "duet_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("duet server v{} starting", env!("CARGO_PKG_VERSION"));

    // Load or generate the HS256 signing key (256-bit random, stored in data_dir)
    let signing_key = auth::token::load_or_generate_signing_key(&config.data_dir)?;

    let verifier = auth::verifier::TokenVerifier::new(
        signing_key,
        config.federated_tokeninfo_url.clone(),
        config.federated_audience.clone(),
    );
    if config.federated_audience.is_none() {
        tracing::warn!(
            "No federated audience configured; only locally issued tokens will authenticate"
        );
    }

    let store = store::MessageStore::new(config.store_base_url.clone(), config.store_timeout_secs);
    tracing::info!(store = %config.store_base_url, "Forwarding messages to durable store");

    // Build application state
    let app_state = state::AppState {
        presence: Arc::new(presence::PresenceRegistry::new()),
        rooms: Arc::new(rooms::RoomRegistry::new()),
        typing: chat::signal::new_typing_registry(),
        verifier: Arc::new(verifier),
        store: Arc::new(store),
        connections: Arc::new(AtomicUsize::new(0)),
        started_at: Instant::now(),
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
